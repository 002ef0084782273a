use std::collections::BTreeSet;

use crate::model::Milestone;
use crate::playback::PlaybackSample;

/// Cadence of the periodic checkpoint write, independent of milestones.
pub const CHECKPOINT_INTERVAL_SECONDS: f64 = 30.0;

/// What one accepted sample derived: the percentage reading, at most one
/// newly-crossed milestone, and whether a periodic checkpoint is due.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerUpdate {
    pub percentage: f64,
    pub new_milestone: Option<Milestone>,
    pub checkpoint: bool,
}

/// Converts continuous percentage readings into a monotonic set of crossed
/// 10% boundaries, plus a 30-second checkpoint cadence that bounds data loss
/// between milestone crossings.
#[derive(Debug, Clone, Default)]
pub struct MilestoneTracker {
    reached: BTreeSet<Milestone>,
    last_checkpoint_bucket: u64,
}

impl MilestoneTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Tracker seeded from a rehydrated record, so milestones persisted in an
    /// earlier session do not re-fire, and the checkpoint cadence resumes
    /// from the validated position rather than firing immediately.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn seeded(reached: &BTreeSet<Milestone>, position_seconds: f64) -> Self {
        let last_checkpoint_bucket = if position_seconds.is_finite() && position_seconds > 0.0 {
            (position_seconds / CHECKPOINT_INTERVAL_SECONDS).floor() as u64
        } else {
            0
        };
        Self {
            reached: reached.clone(),
            last_checkpoint_bucket,
        }
    }

    /// Derive milestone/checkpoint events from one accepted sample.
    ///
    /// A new milestone is the floor of the current reading when that boundary
    /// has not been seen before; boundaries skipped over in a single jump are
    /// never back-filled. The checkpoint fires whenever playback enters a new
    /// whole 30-second bucket.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn observe(&mut self, sample: &PlaybackSample) -> TrackerUpdate {
        let percentage = sample.percentage();

        let new_milestone = Milestone::from_percentage(percentage)
            .filter(|m| self.reached.insert(*m));

        let bucket = (sample.current_time() / CHECKPOINT_INTERVAL_SECONDS).floor() as u64;
        let checkpoint = bucket > self.last_checkpoint_bucket;
        if checkpoint {
            self.last_checkpoint_bucket = bucket;
        }

        TrackerUpdate {
            percentage,
            new_milestone,
            checkpoint,
        }
    }

    #[must_use]
    pub fn reached(&self) -> &BTreeSet<Milestone> {
        &self.reached
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
