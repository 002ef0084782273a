use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::aggregate::CourseCompletionAggregator;
use crate::completion::{CompletionGate, CompletionOutcome, CompletionTrigger, LessonState};
use crate::milestone::MilestoneTracker;
use crate::model::{
    CourseOutline, LessonId, LessonProgressRecord, Milestone, ProgressError,
};
use crate::playback::PlaybackMonitor;
use crate::seek::{SeekDecision, SeekGuard};
use crate::unlock::{self, UnlockError};

//
// ─── ERRORS & CONFIG ───────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum EngineError {
    #[error("lesson {0} has not been opened in this session")]
    NotOpen(LessonId),

    #[error(transparent)]
    Locked(#[from] UnlockError),

    #[error(transparent)]
    Progress(#[from] ProgressError),
}

/// Engine configuration. One bit: whether forward seeks are clamped at all.
/// Enabled in production, disabled in development/test.
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    pub enforce_sequential: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enforce_sequential: true,
        }
    }
}

//
// ─── EFFECTS ───────────────────────────────────────────────────────────────────
//

/// Which kind of progress snapshot a write carries. The sync layer retries
/// unconfirmed completion writes on checkpoint snapshots only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Milestone,
    Checkpoint,
}

/// A persistence request derived from a transition. The engine never does
/// I/O itself; the sync layer issues these best-effort and in order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressWrite {
    Snapshot {
        lesson_id: LessonId,
        percentage: f64,
        last_validated_time: f64,
        kind: SnapshotKind,
    },
    LessonCompleted {
        lesson_id: LessonId,
    },
    CourseCompleted,
}

/// User-facing messages. Only policy violations and completion events are
/// ever surfaced; all idempotency handling stays invisible.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Notice {
    LessonCompleted(LessonId),
    CourseCompleted,
    SequentialViewingRequired { lesson_id: LessonId, clamped_to: f64 },
}

/// Everything one transition produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickEffects {
    pub writes: Vec<ProgressWrite>,
    pub notices: Vec<Notice>,
    /// When set, the host player must force its position back here.
    pub clamp_to: Option<f64>,
}

/// Persisted progress used to rehydrate a lesson on load.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSeed {
    pub completion_percentage: f64,
    pub last_validated_time: f64,
    pub is_completed: bool,
    pub updated_at: DateTime<Utc>,
}

//
// ─── ENGINE ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone)]
struct LessonRuntime {
    monitor: PlaybackMonitor,
    guard: SeekGuard,
    tracker: MilestoneTracker,
    record: LessonProgressRecord,
}

/// The per-(user, course) progression state machine.
///
/// Owns one runtime per opened lesson (monitor, seek guard, milestone
/// tracker, progress record), the completion gate, and the course
/// aggregator. Every operation is a synchronous transition returning its
/// effects as data, so the whole engine is testable without a media element
/// or a store.
#[derive(Debug, Clone)]
pub struct ProgressionEngine {
    outline: CourseOutline,
    config: EngineConfig,
    runtimes: HashMap<LessonId, LessonRuntime>,
    gate: CompletionGate,
    aggregator: CourseCompletionAggregator,
}

impl ProgressionEngine {
    #[must_use]
    pub fn new(outline: CourseOutline, config: EngineConfig) -> Self {
        let aggregator = CourseCompletionAggregator::new(&outline);
        Self {
            outline,
            config,
            runtimes: HashMap::new(),
            gate: CompletionGate::new(),
            aggregator,
        }
    }

    /// Open a lesson for playback, enforcing the unlock precondition.
    ///
    /// A `seed` rehydrates the record from the progress store; re-opening an
    /// already-open lesson keeps its in-session state untouched.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Locked` when the predecessor is not completed or
    /// the lesson is unknown, and `EngineError::Progress` for a corrupt seed.
    pub fn open_lesson(
        &mut self,
        lesson_id: LessonId,
        seed: Option<ProgressSeed>,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        unlock::ensure_accessible(&self.outline, self.gate.completed_lessons(), lesson_id)?;

        if self.runtimes.contains_key(&lesson_id) {
            return Ok(());
        }

        let record = match seed {
            Some(seed) => LessonProgressRecord::from_persisted(
                lesson_id,
                seed.completion_percentage,
                seed.last_validated_time,
                seed.is_completed,
                seed.updated_at,
            )?,
            None => LessonProgressRecord::new(lesson_id, now),
        };

        if record.is_completed() {
            self.gate.restore_completed(lesson_id);
        }

        let guard = SeekGuard::seeded(
            self.config.enforce_sequential,
            record.last_validated_time(),
        );
        let tracker =
            MilestoneTracker::seeded(record.milestones_reached(), record.last_validated_time());

        self.runtimes.insert(
            lesson_id,
            LessonRuntime {
                monitor: PlaybackMonitor::new(),
                guard,
                tracker,
                record,
            },
        );
        Ok(())
    }

    /// Mark a lesson the store already shows as completed, without opening it.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Locked(UnknownLesson)` for ids outside the outline.
    pub fn restore_completed(&mut self, lesson_id: LessonId) -> Result<(), EngineError> {
        if !self.outline.contains(lesson_id) {
            return Err(UnlockError::UnknownLesson(lesson_id).into());
        }
        self.gate.restore_completed(lesson_id);
        Ok(())
    }

    /// Suppress the course-completion side effect for this session (the
    /// store already recorded it in an earlier one).
    pub fn latch_course_completion(&mut self) {
        self.aggregator.latch();
    }

    /// Process one playback tick.
    ///
    /// The full pipeline: the monitor validates the sample, the gate starts
    /// the lesson, the seek guard advances the validated position, the record
    /// absorbs the percentage, the tracker derives milestone/checkpoint
    /// writes, and reading 100% routes into the completion gate.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotOpen` if the lesson was never opened.
    pub fn tick(
        &mut self,
        lesson_id: LessonId,
        current_time: f64,
        duration: f64,
        now: DateTime<Utc>,
    ) -> Result<TickEffects, EngineError> {
        let mut fx = TickEffects::default();

        let final_reached = {
            let runtime = self
                .runtimes
                .get_mut(&lesson_id)
                .ok_or(EngineError::NotOpen(lesson_id))?;

            let Some(sample) = runtime.monitor.observe(current_time, duration, now) else {
                return Ok(fx);
            };

            self.gate.begin(lesson_id);

            runtime.guard.observe_playback(sample.current_time());
            runtime
                .record
                .advance_validated_time(runtime.guard.last_validated_time());
            runtime.record.observe_percentage(sample.percentage(), now);

            let update = runtime.tracker.observe(&sample);

            if let Some(milestone) = update.new_milestone {
                runtime.record.record_milestone(milestone, now)?;
                fx.writes.push(ProgressWrite::Snapshot {
                    lesson_id,
                    percentage: f64::from(milestone.value()),
                    last_validated_time: runtime.record.last_validated_time(),
                    kind: SnapshotKind::Milestone,
                });
            }

            if update.checkpoint {
                fx.writes.push(ProgressWrite::Snapshot {
                    lesson_id,
                    percentage: update.percentage.round(),
                    last_validated_time: runtime.record.last_validated_time(),
                    kind: SnapshotKind::Checkpoint,
                });
            }

            // Trigger on the current reading, not on set membership: ticks
            // keep reporting 100% several times a second and the gate is
            // what collapses them.
            Milestone::from_percentage(update.percentage).is_some_and(|m| m.is_final())
        };

        if final_reached {
            self.complete(lesson_id, CompletionTrigger::FinalMilestone, now, &mut fx);
        }

        Ok(fx)
    }

    /// Evaluate a requested seek target against the anti-skip policy.
    ///
    /// A clamped seek flips no engine state; it only tells the host player
    /// where to force the position and what to warn.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotOpen` if the lesson was never opened.
    pub fn request_seek(
        &self,
        lesson_id: LessonId,
        target: f64,
    ) -> Result<TickEffects, EngineError> {
        let runtime = self
            .runtimes
            .get(&lesson_id)
            .ok_or(EngineError::NotOpen(lesson_id))?;

        let mut fx = TickEffects::default();
        if let SeekDecision::Clamped { back_to } = runtime.guard.evaluate(target) {
            fx.clamp_to = Some(back_to);
            fx.notices.push(Notice::SequentialViewingRequired {
                lesson_id,
                clamped_to: back_to,
            });
        }
        Ok(fx)
    }

    /// A seek started on the host player.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotOpen` if the lesson was never opened.
    pub fn seek_started(&mut self, lesson_id: LessonId) -> Result<(), EngineError> {
        let runtime = self
            .runtimes
            .get_mut(&lesson_id)
            .ok_or(EngineError::NotOpen(lesson_id))?;
        runtime.monitor.seek_started();
        Ok(())
    }

    /// The host player finished seeking at `at`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotOpen` if the lesson was never opened.
    pub fn seek_ended(&mut self, lesson_id: LessonId, at: DateTime<Utc>) -> Result<(), EngineError> {
        let runtime = self
            .runtimes
            .get_mut(&lesson_id)
            .ok_or(EngineError::NotOpen(lesson_id))?;
        runtime.monitor.seek_ended(at);
        Ok(())
    }

    /// Explicit "playback ended" event: completion trigger (b).
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotOpen` if the lesson was never opened.
    pub fn playback_ended(
        &mut self,
        lesson_id: LessonId,
        now: DateTime<Utc>,
    ) -> Result<TickEffects, EngineError> {
        if !self.runtimes.contains_key(&lesson_id) {
            return Err(EngineError::NotOpen(lesson_id));
        }

        let mut fx = TickEffects::default();
        self.gate.begin(lesson_id);
        self.complete(lesson_id, CompletionTrigger::PlaybackEnded, now, &mut fx);
        Ok(fx)
    }

    /// Lesson switch or player unmount: clears the seeking flag and any
    /// pending completion claim. Milestones and completion facts persist for
    /// the lifetime of the record.
    pub fn close_lesson(&mut self, lesson_id: LessonId) {
        if let Some(runtime) = self.runtimes.get_mut(&lesson_id) {
            runtime.monitor.reset();
        }
        self.gate.cancel_pending(lesson_id);
    }

    fn complete(
        &mut self,
        lesson_id: LessonId,
        trigger: CompletionTrigger,
        now: DateTime<Utc>,
        fx: &mut TickEffects,
    ) {
        match self.gate.try_complete(lesson_id, trigger, now) {
            CompletionOutcome::Completed { notify } => {
                if let Some(runtime) = self.runtimes.get_mut(&lesson_id) {
                    runtime.record.mark_completed(now);
                }
                fx.writes.push(ProgressWrite::LessonCompleted { lesson_id });
                if notify {
                    fx.notices.push(Notice::LessonCompleted(lesson_id));
                }
                if self.aggregator.check(self.gate.completed_lessons()) {
                    fx.writes.push(ProgressWrite::CourseCompleted);
                    fx.notices.push(Notice::CourseCompleted);
                }
                self.gate.release(lesson_id);
            }
            CompletionOutcome::Ignored => {}
        }
    }

    //
    // ─── READ SIDE ─────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn record(&self, lesson_id: LessonId) -> Option<&LessonProgressRecord> {
        self.runtimes.get(&lesson_id).map(|r| &r.record)
    }

    #[must_use]
    pub fn lesson_state(&self, lesson_id: LessonId) -> LessonState {
        self.gate.state(lesson_id)
    }

    #[must_use]
    pub fn completed_lessons(&self) -> &BTreeSet<LessonId> {
        self.gate.completed_lessons()
    }

    /// # Errors
    ///
    /// Returns `UnlockError::UnknownLesson` for ids outside the outline.
    pub fn lesson_accessible(&self, lesson_id: LessonId) -> Result<bool, UnlockError> {
        unlock::lesson_accessible(&self.outline, self.gate.completed_lessons(), lesson_id)
    }

    #[must_use]
    pub fn exam_accessible(&self) -> bool {
        unlock::exam_accessible(&self.outline, self.gate.completed_lessons())
    }

    #[must_use]
    pub fn course_completed(&self) -> bool {
        self.aggregator.has_fired()
    }

    #[must_use]
    pub fn outline(&self) -> &CourseOutline {
        &self.outline
    }

    #[must_use]
    pub fn config(&self) -> EngineConfig {
        self.config
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CourseId, Lesson};
    use crate::time::fixed_now;
    use chrono::Duration;
    use url::Url;

    fn outline(durations: &[f64]) -> CourseOutline {
        let course = CourseId::new(1);
        let lessons = durations
            .iter()
            .enumerate()
            .map(|(i, duration)| {
                Lesson::new(
                    LessonId::new(u64::try_from(i).unwrap() + 1),
                    course,
                    u32::try_from(i).unwrap(),
                    format!("Lesson {i}"),
                    *duration,
                    Url::parse("https://videos.example.com/l.mp4").unwrap(),
                )
                .unwrap()
            })
            .collect();
        CourseOutline::new(course, lessons).unwrap()
    }

    fn engine(durations: &[f64]) -> ProgressionEngine {
        ProgressionEngine::new(outline(durations), EngineConfig::default())
    }

    /// Drive a lesson from 0 to its full duration in ~250ms tick cadence
    /// (4 samples per second of playback), collecting all effects.
    fn watch_to_end(
        engine: &mut ProgressionEngine,
        lesson_id: LessonId,
        duration: f64,
    ) -> Vec<TickEffects> {
        let mut out = Vec::new();
        let mut now = fixed_now();
        let mut t = 0.0;
        while t <= duration {
            out.push(engine.tick(lesson_id, t, duration, now).unwrap());
            t += 0.25;
            now += Duration::milliseconds(250);
        }
        out
    }

    #[test]
    fn locked_lesson_cannot_be_opened() {
        let mut engine = engine(&[100.0, 200.0]);
        let err = engine
            .open_lesson(LessonId::new(2), None, fixed_now())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::Locked(UnlockError::PredecessorIncomplete { .. })
        ));
    }

    #[test]
    fn watching_a_lesson_to_the_end_completes_it_once() {
        let mut engine = engine(&[100.0, 200.0]);
        let lesson = LessonId::new(1);
        engine.open_lesson(lesson, None, fixed_now()).unwrap();

        let effects = watch_to_end(&mut engine, lesson, 100.0);

        let completions: usize = effects
            .iter()
            .flat_map(|fx| &fx.writes)
            .filter(|w| matches!(w, ProgressWrite::LessonCompleted { .. }))
            .count();
        assert_eq!(completions, 1);

        let notices: Vec<Notice> = effects.iter().flat_map(|fx| fx.notices.clone()).collect();
        assert_eq!(notices, vec![Notice::LessonCompleted(lesson)]);

        // All ten milestones were persisted, in order.
        let milestones: Vec<f64> = effects
            .iter()
            .flat_map(|fx| &fx.writes)
            .filter_map(|w| match w {
                ProgressWrite::Snapshot {
                    percentage,
                    kind: SnapshotKind::Milestone,
                    ..
                } => Some(*percentage),
                _ => None,
            })
            .collect();
        assert_eq!(
            milestones,
            vec![10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 80.0, 90.0, 100.0]
        );

        assert_eq!(engine.lesson_state(lesson), LessonState::Completed);
        assert!(engine.lesson_accessible(LessonId::new(2)).unwrap());
        assert!(!engine.course_completed());
    }

    #[test]
    fn persisted_snapshots_are_monotonic() {
        let mut engine = engine(&[100.0]);
        let lesson = LessonId::new(1);
        engine.open_lesson(lesson, None, fixed_now()).unwrap();

        let effects = watch_to_end(&mut engine, lesson, 100.0);

        let mut last_pct = 0.0;
        let mut last_time = 0.0;
        for fx in &effects {
            for write in &fx.writes {
                if let ProgressWrite::Snapshot {
                    percentage,
                    last_validated_time,
                    ..
                } = write
                {
                    assert!(*percentage >= last_pct, "percentage regressed");
                    assert!(*last_validated_time >= last_time, "validated time regressed");
                    last_pct = *percentage;
                    last_time = *last_validated_time;
                }
            }
        }
        assert!(last_pct >= 100.0);
    }

    #[test]
    fn ticks_at_full_percentage_complete_only_once() {
        let mut engine = engine(&[100.0]);
        let lesson = LessonId::new(1);
        let now = fixed_now();
        engine.open_lesson(lesson, None, now).unwrap();

        // Several 100% ticks plus the ended event, all inside 2s.
        let mut writes = Vec::new();
        for i in 0..5 {
            let at = now + Duration::milliseconds(250 * i);
            writes.extend(engine.tick(lesson, 100.0, 100.0, at).unwrap().writes);
        }
        writes.extend(
            engine
                .playback_ended(lesson, now + Duration::milliseconds(1300))
                .unwrap()
                .writes,
        );

        let completions = writes
            .iter()
            .filter(|w| matches!(w, ProgressWrite::LessonCompleted { .. }))
            .count();
        assert_eq!(completions, 1);
    }

    #[test]
    fn ended_event_completes_without_full_milestones() {
        let mut engine = engine(&[100.0]);
        let lesson = LessonId::new(1);
        engine.open_lesson(lesson, None, fixed_now()).unwrap();

        engine.tick(lesson, 42.0, 100.0, fixed_now()).unwrap();
        let fx = engine.playback_ended(lesson, fixed_now()).unwrap();

        assert!(fx
            .writes
            .iter()
            .any(|w| matches!(w, ProgressWrite::LessonCompleted { .. })));
        assert!(engine.record(lesson).unwrap().is_completed());
    }

    #[test]
    fn forward_seek_is_clamped_with_warning() {
        let mut engine = engine(&[300.0]);
        let lesson = LessonId::new(1);
        let mut now = fixed_now();
        engine.open_lesson(lesson, None, now).unwrap();

        // Watch the first 120 seconds.
        let mut t = 0.0;
        while t <= 120.0 {
            engine.tick(lesson, t, 300.0, now).unwrap();
            t += 0.25;
            now += Duration::milliseconds(250);
        }

        let fx = engine.request_seek(lesson, 200.0).unwrap();
        assert_eq!(fx.clamp_to, Some(120.0));
        assert_eq!(
            fx.notices,
            vec![Notice::SequentialViewingRequired {
                lesson_id: lesson,
                clamped_to: 120.0
            }]
        );

        assert_eq!(engine.request_seek(lesson, 121.0).unwrap().clamp_to, None);
        assert_eq!(engine.request_seek(lesson, 60.0).unwrap().clamp_to, None);
    }

    #[test]
    fn ticks_during_seek_are_ignored() {
        let mut engine = engine(&[100.0]);
        let lesson = LessonId::new(1);
        let now = fixed_now();
        engine.open_lesson(lesson, None, now).unwrap();

        engine.seek_started(lesson).unwrap();
        let fx = engine.tick(lesson, 90.0, 100.0, now).unwrap();
        assert_eq!(fx, TickEffects::default());
        assert_eq!(
            engine.record(lesson).unwrap().completion_percentage(),
            0.0
        );

        engine.seek_ended(lesson, now).unwrap();
        // Still inside the settle window.
        let fx = engine
            .tick(lesson, 90.0, 100.0, now + Duration::milliseconds(50))
            .unwrap();
        assert_eq!(fx, TickEffects::default());
    }

    #[test]
    fn malformed_samples_advance_nothing() {
        let mut engine = engine(&[100.0]);
        let lesson = LessonId::new(1);
        engine.open_lesson(lesson, None, fixed_now()).unwrap();

        let fx = engine.tick(lesson, 10.0, f64::NAN, fixed_now()).unwrap();
        assert_eq!(fx, TickEffects::default());
        assert_eq!(engine.lesson_state(lesson), LessonState::NotStarted);
    }

    #[test]
    fn course_completion_fires_once_when_last_lesson_finishes() {
        let mut engine = engine(&[100.0, 200.0, 50.0]);
        let durations = [100.0, 200.0, 50.0];

        let mut notices = Vec::new();
        for (i, duration) in durations.iter().enumerate() {
            let lesson = LessonId::new(u64::try_from(i).unwrap() + 1);
            engine.open_lesson(lesson, None, fixed_now()).unwrap();
            for fx in watch_to_end(&mut engine, lesson, *duration) {
                notices.extend(fx.notices);
            }
        }

        let course_completions = notices
            .iter()
            .filter(|n| matches!(n, Notice::CourseCompleted))
            .count();
        assert_eq!(course_completions, 1);
        assert!(engine.course_completed());
        assert!(engine.exam_accessible());

        // The course notice arrived with the last lesson's completion.
        assert_eq!(
            notices.last(),
            Some(&Notice::CourseCompleted)
        );
    }

    #[test]
    fn seeded_lesson_resumes_without_refiring() {
        let mut engine = engine(&[100.0, 200.0]);
        let lesson = LessonId::new(1);
        let seed = ProgressSeed {
            completion_percentage: 63.0,
            last_validated_time: 63.0,
            is_completed: false,
            updated_at: fixed_now(),
        };
        engine.open_lesson(lesson, Some(seed), fixed_now()).unwrap();

        // Resuming at the stored position re-reads 63%: milestone 60 is
        // already in the set, so nothing is persisted.
        let fx = engine.tick(lesson, 63.0, 100.0, fixed_now()).unwrap();
        assert!(fx.writes.is_empty());

        // A forward seek past the stored validated position is clamped.
        let fx = engine.request_seek(lesson, 90.0).unwrap();
        assert_eq!(fx.clamp_to, Some(63.0));
    }

    #[test]
    fn restored_completions_unlock_and_latch() {
        let mut engine = engine(&[100.0, 200.0, 50.0]);
        engine.restore_completed(LessonId::new(1)).unwrap();
        engine.restore_completed(LessonId::new(2)).unwrap();
        engine.latch_course_completion();

        assert!(engine.lesson_accessible(LessonId::new(3)).unwrap());

        // Completing the last lesson after the latch fires no course notice.
        let lesson = LessonId::new(3);
        engine.open_lesson(lesson, None, fixed_now()).unwrap();
        let notices: Vec<Notice> = watch_to_end(&mut engine, lesson, 50.0)
            .into_iter()
            .flat_map(|fx| fx.notices)
            .collect();
        assert_eq!(notices, vec![Notice::LessonCompleted(lesson)]);
    }

    #[test]
    fn reopening_keeps_in_session_state() {
        let mut engine = engine(&[100.0]);
        let lesson = LessonId::new(1);
        let now = fixed_now();
        engine.open_lesson(lesson, None, now).unwrap();
        engine.tick(lesson, 50.0, 100.0, now).unwrap();

        engine.close_lesson(lesson);
        engine.open_lesson(lesson, None, now).unwrap();

        let record = engine.record(lesson).unwrap();
        assert_eq!(record.completion_percentage(), 50.0);
        assert_eq!(record.last_validated_time(), 50.0);
    }
}
