use chrono::{DateTime, Duration, Utc};

/// Settle window after a seek completes, absorbing the player's own jitter.
pub const SEEK_SETTLE_MS: i64 = 100;

/// A validated playback reading: the monitor only hands out samples with a
/// usable duration and position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackSample {
    current_time: f64,
    duration: f64,
}

impl PlaybackSample {
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.current_time
    }

    #[must_use]
    pub fn duration(&self) -> f64 {
        self.duration
    }

    /// Completion percentage of this reading, clamped to `[0, 100]`.
    #[must_use]
    pub fn percentage(&self) -> f64 {
        (self.current_time / self.duration * 100.0).clamp(0.0, 100.0)
    }
}

/// Samples the media element's time/duration on each playback tick.
///
/// Samples taken while a seek is in flight, or inside the settle window
/// right after one, are suppressed so the seek guard never validates a
/// position the user jumped to rather than watched.
#[derive(Debug, Clone, Default)]
pub struct PlaybackMonitor {
    seeking: bool,
    settle_until: Option<DateTime<Utc>>,
}

impl PlaybackMonitor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A seek started; suppress samples until it settles.
    pub fn seek_started(&mut self) {
        self.seeking = true;
    }

    /// The seek finished; keep suppressing for `SEEK_SETTLE_MS` more.
    pub fn seek_ended(&mut self, at: DateTime<Utc>) {
        self.seeking = false;
        self.settle_until = Some(at + Duration::milliseconds(SEEK_SETTLE_MS));
    }

    #[must_use]
    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    /// Validate one playback tick.
    ///
    /// Returns `None` while a seek is in flight or settling, and for
    /// malformed readings (`NaN`/zero/negative duration means the media
    /// metadata is not loaded yet); such ticks advance no state.
    pub fn observe(
        &mut self,
        current_time: f64,
        duration: f64,
        at: DateTime<Utc>,
    ) -> Option<PlaybackSample> {
        if self.seeking {
            return None;
        }
        if let Some(settle_until) = self.settle_until {
            if at < settle_until {
                return None;
            }
            self.settle_until = None;
        }
        if !duration.is_finite() || duration <= 0.0 {
            return None;
        }
        if !current_time.is_finite() || current_time < 0.0 {
            return None;
        }

        Some(PlaybackSample {
            current_time,
            duration,
        })
    }

    /// Clear the seeking flag and settle deadline (lesson switch/unmount).
    pub fn reset(&mut self) {
        self.seeking = false;
        self.settle_until = None;
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::fixed_now;

    #[test]
    fn passes_valid_samples() {
        let mut monitor = PlaybackMonitor::new();
        let sample = monitor.observe(30.0, 120.0, fixed_now()).unwrap();
        assert_eq!(sample.current_time(), 30.0);
        assert_eq!(sample.percentage(), 25.0);
    }

    #[test]
    fn drops_samples_without_metadata() {
        let mut monitor = PlaybackMonitor::new();
        assert!(monitor.observe(10.0, f64::NAN, fixed_now()).is_none());
        assert!(monitor.observe(10.0, 0.0, fixed_now()).is_none());
        assert!(monitor.observe(10.0, -3.0, fixed_now()).is_none());
        assert!(monitor.observe(f64::NAN, 120.0, fixed_now()).is_none());
        assert!(monitor.observe(-1.0, 120.0, fixed_now()).is_none());
    }

    #[test]
    fn drops_samples_while_seeking() {
        let mut monitor = PlaybackMonitor::new();
        monitor.seek_started();
        assert!(monitor.is_seeking());
        assert!(monitor.observe(10.0, 120.0, fixed_now()).is_none());
    }

    #[test]
    fn drops_samples_inside_settle_window() {
        let mut monitor = PlaybackMonitor::new();
        let now = fixed_now();
        monitor.seek_started();
        monitor.seek_ended(now);
        assert!(!monitor.is_seeking());

        // Still inside the 100ms settle window.
        let jittery = now + Duration::milliseconds(SEEK_SETTLE_MS - 1);
        assert!(monitor.observe(10.0, 120.0, jittery).is_none());

        let settled = now + Duration::milliseconds(SEEK_SETTLE_MS);
        assert!(monitor.observe(10.0, 120.0, settled).is_some());
    }

    #[test]
    fn reset_clears_seek_state() {
        let mut monitor = PlaybackMonitor::new();
        monitor.seek_started();
        monitor.reset();
        assert!(!monitor.is_seeking());
        assert!(monitor.observe(10.0, 120.0, fixed_now()).is_some());
    }

    #[test]
    fn percentage_clamps_past_duration() {
        let mut monitor = PlaybackMonitor::new();
        let sample = monitor.observe(130.0, 120.0, fixed_now()).unwrap();
        assert_eq!(sample.percentage(), 100.0);
    }
}
