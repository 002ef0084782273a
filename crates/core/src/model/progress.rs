use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::LessonId;

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("completion percentage must be finite and within [0, 100], got {provided}")]
    InvalidPercentage { provided: f64 },

    #[error("validated time must be finite and non-negative, got {provided}")]
    InvalidTime { provided: f64 },

    #[error("milestone {milestone} is ahead of completion percentage {percentage}")]
    MilestoneAheadOfPercentage { milestone: u8, percentage: f64 },
}

/// One of the ten 10%-wide completion boundaries (10, 20, ..., 100).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Milestone(u8);

impl Milestone {
    pub const FINAL: Milestone = Milestone(100);

    /// Construct from a raw boundary value (a multiple of 10 in `10..=100`).
    #[must_use]
    pub fn try_new(value: u8) -> Option<Self> {
        if (10..=100).contains(&value) && value % 10 == 0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Floor of the current percentage reading to its 10% boundary.
    ///
    /// Returns `None` below the first boundary. The rule is "floor of the
    /// current reading": a sample at 63% maps to milestone 60 regardless of
    /// which boundaries earlier samples crossed.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_percentage(percentage: f64) -> Option<Self> {
        if !percentage.is_finite() || percentage < 10.0 {
            return None;
        }
        let floored = ((percentage.min(100.0) / 10.0).floor() * 10.0) as u8;
        Self::try_new(floored)
    }

    #[must_use]
    pub fn value(&self) -> u8 {
        self.0
    }

    #[must_use]
    pub fn is_final(&self) -> bool {
        *self == Self::FINAL
    }

    /// All boundaries in ascending order.
    pub fn all() -> impl Iterator<Item = Milestone> {
        (1..=10).map(|n| Milestone(n * 10))
    }
}

impl fmt::Debug for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Milestone({})", self.0)
    }
}

impl fmt::Display for Milestone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.0)
    }
}

/// Durable progress facts for one (user, lesson) pair.
///
/// Mutated only by the milestone tracker (percentage, milestones) and the
/// completion gate (`is_completed`); never deleted in normal operation.
/// The record enforces its own monotonicity: percentage, validated time,
/// and the milestone set only move forward within a viewing session.
#[derive(Debug, Clone, PartialEq)]
pub struct LessonProgressRecord {
    lesson_id: LessonId,
    completion_percentage: f64,
    last_validated_time: f64,
    milestones_reached: BTreeSet<Milestone>,
    is_completed: bool,
    updated_at: DateTime<Utc>,
}

impl LessonProgressRecord {
    /// Fresh record, created lazily on the first accepted playback tick.
    #[must_use]
    pub fn new(lesson_id: LessonId, created_at: DateTime<Utc>) -> Self {
        Self {
            lesson_id,
            completion_percentage: 0.0,
            last_validated_time: 0.0,
            milestones_reached: BTreeSet::new(),
            is_completed: false,
            updated_at: created_at,
        }
    }

    /// Rehydrate a record from the progress store.
    ///
    /// The milestone set is derived from the stored percentage (every
    /// boundary at or below its floor), so milestones reached in an earlier
    /// session do not fire fresh persistence writes.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` for an out-of-range percentage or a negative
    /// or non-finite validated time.
    pub fn from_persisted(
        lesson_id: LessonId,
        completion_percentage: f64,
        last_validated_time: f64,
        is_completed: bool,
        updated_at: DateTime<Utc>,
    ) -> Result<Self, ProgressError> {
        if !completion_percentage.is_finite() || !(0.0..=100.0).contains(&completion_percentage) {
            return Err(ProgressError::InvalidPercentage {
                provided: completion_percentage,
            });
        }
        if !last_validated_time.is_finite() || last_validated_time < 0.0 {
            return Err(ProgressError::InvalidTime {
                provided: last_validated_time,
            });
        }

        let milestones_reached = Milestone::all()
            .filter(|m| f64::from(m.value()) <= completion_percentage)
            .collect();

        Ok(Self {
            lesson_id,
            completion_percentage,
            last_validated_time,
            milestones_reached,
            is_completed,
            updated_at,
        })
    }

    /// Absorb a percentage reading; a lower reading never regresses the record.
    pub fn observe_percentage(&mut self, percentage: f64, at: DateTime<Utc>) {
        if !percentage.is_finite() {
            return;
        }
        let clamped = percentage.clamp(0.0, 100.0);
        if clamped > self.completion_percentage {
            self.completion_percentage = clamped;
        }
        self.updated_at = at;
    }

    /// Advance the furthest validated playback position (max-only).
    pub fn advance_validated_time(&mut self, seconds: f64) {
        if seconds.is_finite() && seconds > self.last_validated_time {
            self.last_validated_time = seconds;
        }
    }

    /// Record a crossed milestone.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::MilestoneAheadOfPercentage` if the milestone
    /// exceeds the floor of the current percentage.
    pub fn record_milestone(
        &mut self,
        milestone: Milestone,
        at: DateTime<Utc>,
    ) -> Result<(), ProgressError> {
        let floor = (self.completion_percentage / 10.0).floor() * 10.0;
        if f64::from(milestone.value()) > floor {
            return Err(ProgressError::MilestoneAheadOfPercentage {
                milestone: milestone.value(),
                percentage: self.completion_percentage,
            });
        }
        self.milestones_reached.insert(milestone);
        self.updated_at = at;
        Ok(())
    }

    /// Flip the durable completion fact. Idempotent.
    pub fn mark_completed(&mut self, at: DateTime<Utc>) {
        self.is_completed = true;
        self.updated_at = at;
    }

    #[must_use]
    pub fn lesson_id(&self) -> LessonId {
        self.lesson_id
    }

    #[must_use]
    pub fn completion_percentage(&self) -> f64 {
        self.completion_percentage
    }

    #[must_use]
    pub fn last_validated_time(&self) -> f64 {
        self.last_validated_time
    }

    #[must_use]
    pub fn milestones_reached(&self) -> &BTreeSet<Milestone> {
        &self.milestones_reached
    }

    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.is_completed
    }

    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
