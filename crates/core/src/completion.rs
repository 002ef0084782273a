use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, Utc};

use crate::model::LessonId;

/// Minimum spacing between two completion attempts for the same lesson,
/// absorbing milestone-100 and the ended event firing together.
pub const COMPLETION_DEBOUNCE_MS: i64 = 2000;

/// Per-lesson lifecycle within a viewing session. `Completed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LessonState {
    NotStarted,
    InProgress,
    Completed,
}

/// What asked for the completion. Playback ticks reach 100% many times per
/// second, and the ended event can land in the same instant; the gate must
/// collapse all of them into one fact.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTrigger {
    FinalMilestone,
    PlaybackEnded,
}

/// Result of a completion attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionOutcome {
    /// The lesson just transitioned to `Completed`. `notify` is true at most
    /// once per lesson per session.
    Completed { notify: bool },
    /// Duplicate, debounced, or already-completed trigger; nothing happened.
    Ignored,
}

#[derive(Debug, Clone)]
struct GateEntry {
    state: LessonState,
    last_completion_at: Option<DateTime<Utc>>,
    claimed: bool,
    notified: bool,
}

impl Default for GateEntry {
    fn default() -> Self {
        Self {
            state: LessonState::NotStarted,
            last_completion_at: None,
            claimed: false,
            notified: false,
        }
    }
}

/// Race-free, at-most-once lesson completion.
///
/// One authoritative map from lesson id to its gate entry, mutated only by
/// the transition functions below. The claim flag implements "claim before
/// act": a trigger first claims the lesson, then checks the debounce window,
/// and only then flips state — so a second trigger arriving between claim
/// and release is a guaranteed no-op.
#[derive(Debug, Clone, Default)]
pub struct CompletionGate {
    entries: HashMap<LessonId, GateEntry>,
    completed: BTreeSet<LessonId>,
}

impl CompletionGate {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// First accepted playback tick: `NotStarted -> InProgress`.
    pub fn begin(&mut self, lesson_id: LessonId) {
        let entry = self.entries.entry(lesson_id).or_default();
        if entry.state == LessonState::NotStarted {
            entry.state = LessonState::InProgress;
        }
    }

    /// Rehydrate a lesson the store already shows as completed. The notified
    /// latch is set so reloads never replay the completion notification.
    pub fn restore_completed(&mut self, lesson_id: LessonId) {
        let entry = self.entries.entry(lesson_id).or_default();
        entry.state = LessonState::Completed;
        entry.notified = true;
        self.completed.insert(lesson_id);
    }

    /// Attempt to complete a lesson.
    ///
    /// Protocol: abort if already claimed or completed; claim; abort (and
    /// release) if a completion landed less than `COMPLETION_DEBOUNCE_MS`
    /// ago; otherwise record the timestamp, flip to `Completed`, and report
    /// whether the one-per-session notification should be shown. The caller
    /// releases the claim via [`CompletionGate::release`] once downstream
    /// state has settled.
    pub fn try_complete(
        &mut self,
        lesson_id: LessonId,
        _trigger: CompletionTrigger,
        now: DateTime<Utc>,
    ) -> CompletionOutcome {
        let entry = self.entries.entry(lesson_id).or_default();

        if entry.claimed || entry.state == LessonState::Completed {
            return CompletionOutcome::Ignored;
        }
        entry.claimed = true;

        if let Some(previous) = entry.last_completion_at {
            if now - previous < Duration::milliseconds(COMPLETION_DEBOUNCE_MS) {
                entry.claimed = false;
                return CompletionOutcome::Ignored;
            }
        }

        entry.last_completion_at = Some(now);
        entry.state = LessonState::Completed;
        self.completed.insert(lesson_id);

        let notify = !entry.notified;
        entry.notified = true;

        CompletionOutcome::Completed { notify }
    }

    /// Release a claim taken by [`CompletionGate::try_complete`].
    pub fn release(&mut self, lesson_id: LessonId) {
        if let Some(entry) = self.entries.get_mut(&lesson_id) {
            entry.claimed = false;
        }
    }

    /// Drop any pending claim on unmount/lesson switch. Completion facts and
    /// the notified latch survive for the lifetime of the record.
    pub fn cancel_pending(&mut self, lesson_id: LessonId) {
        self.release(lesson_id);
    }

    #[must_use]
    pub fn state(&self, lesson_id: LessonId) -> LessonState {
        self.entries
            .get(&lesson_id)
            .map_or(LessonState::NotStarted, |e| e.state)
    }

    #[must_use]
    pub fn is_completed(&self, lesson_id: LessonId) -> bool {
        self.completed.contains(&lesson_id)
    }

    /// The completed-lesson set: written only here, read by the unlock
    /// policy and the course aggregator.
    #[must_use]
    pub fn completed_lessons(&self) -> &BTreeSet<LessonId> {
        &self.completed
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
