/// Forward slack allowed past the validated position, absorbing float drift
/// between the player's reported time and what the monitor has validated.
pub const SEEK_TOLERANCE_SECONDS: f64 = 2.0;

/// Verdict for a requested seek target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SeekDecision {
    Allowed,
    /// The target skipped ahead; playback must be forced back to `back_to`.
    Clamped { back_to: f64 },
}

/// Enforces the "watch in order, no skipping ahead" policy for one lesson.
///
/// `last_validated_time` tracks the furthest point legitimately reached by
/// forward playback (never by seeking). Backward seeks are always permitted;
/// forward seeks are permitted up to the tolerance, and everything is
/// permitted when enforcement is off (dev/test mode).
#[derive(Debug, Clone)]
pub struct SeekGuard {
    enforce_sequential: bool,
    last_validated_time: f64,
}

impl SeekGuard {
    #[must_use]
    pub fn new(enforce_sequential: bool) -> Self {
        Self::seeded(enforce_sequential, 0.0)
    }

    /// Guard seeded from a persisted record's validated position.
    #[must_use]
    pub fn seeded(enforce_sequential: bool, last_validated_time: f64) -> Self {
        Self {
            enforce_sequential,
            last_validated_time: if last_validated_time.is_finite() {
                last_validated_time.max(0.0)
            } else {
                0.0
            },
        }
    }

    /// Evaluate a requested seek target.
    ///
    /// A non-finite target is treated as a skip attempt and clamped.
    #[must_use]
    pub fn evaluate(&self, target: f64) -> SeekDecision {
        if !self.enforce_sequential {
            return SeekDecision::Allowed;
        }
        if target.is_finite() && target <= self.last_validated_time + SEEK_TOLERANCE_SECONDS {
            return SeekDecision::Allowed;
        }
        SeekDecision::Clamped {
            back_to: self.last_validated_time,
        }
    }

    /// Advance the validated position from an accepted, non-seeking tick.
    ///
    /// Monotonic while enforcement is on. With enforcement off the position
    /// simply follows playback, so there is nothing stale to clamp against if
    /// the policy is later turned back on.
    pub fn observe_playback(&mut self, current_time: f64) {
        if !current_time.is_finite() {
            return;
        }
        if self.enforce_sequential {
            if current_time > self.last_validated_time {
                self.last_validated_time = current_time;
            }
        } else {
            self.last_validated_time = current_time.max(0.0);
        }
    }

    #[must_use]
    pub fn last_validated_time(&self) -> f64 {
        self.last_validated_time
    }

    #[must_use]
    pub fn enforced(&self) -> bool {
        self.enforce_sequential
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
