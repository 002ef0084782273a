use chrono::Utc;

use course_core::Clock;
use course_core::completion::LessonState;
use course_core::engine::{EngineConfig, ProgressSeed, ProgressionEngine, TickEffects};
use course_core::model::{CourseId, LessonId, LessonProgressRecord, UserId};
use course_storage::repository::{EnrollmentRow, Storage};

use crate::error::PlayerError;
use crate::progress_sync::ProgressSync;

/// One user's viewing session for one course.
///
/// Wires the pure progression engine to the progress store: enrollment is
/// checked on start, completed lessons are restored from persisted rows,
/// per-lesson progress is seeded on open, and every transition's effects are
/// handed to the sync layer fire-and-forget.
pub struct PlayerService {
    clock: Clock,
    user_id: UserId,
    course_id: CourseId,
    storage: Storage,
    engine: ProgressionEngine,
    sync: ProgressSync,
}

impl std::fmt::Debug for PlayerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlayerService")
            .field("user_id", &self.user_id)
            .field("course_id", &self.course_id)
            .finish_non_exhaustive()
    }
}

impl PlayerService {
    /// Start a session with sequential-viewing enforcement on.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::NotEnrolled` when the user has no enrollment,
    /// and `PlayerError::Storage` when the catalog or progress store fails.
    pub async fn start(
        storage: Storage,
        user_id: UserId,
        course_id: CourseId,
        clock: Clock,
    ) -> Result<Self, PlayerError> {
        Self::start_with_config(storage, user_id, course_id, clock, EngineConfig::default()).await
    }

    /// Start a session with an explicit engine configuration. Development
    /// builds pass `enforce_sequential: false` here.
    ///
    /// # Errors
    ///
    /// Same as [`PlayerService::start`].
    pub async fn start_with_config(
        storage: Storage,
        user_id: UserId,
        course_id: CourseId,
        clock: Clock,
        config: EngineConfig,
    ) -> Result<Self, PlayerError> {
        let enrollment = storage
            .enrollments
            .get_enrollment(user_id, course_id)
            .await?
            .ok_or(PlayerError::NotEnrolled { user_id, course_id })?;

        let outline = storage.catalog.course_outline(course_id).await?;
        let mut engine = ProgressionEngine::new(outline, config);

        for row in storage.progress.course_progress(user_id, course_id).await? {
            if row.is_completed {
                engine.restore_completed(row.lesson_id)?;
            }
        }
        if enrollment.completed_at.is_some() {
            engine.latch_course_completion();
        }

        let sync = ProgressSync::new(
            user_id,
            course_id,
            storage.progress.clone(),
            storage.enrollments.clone(),
        );

        Ok(Self {
            clock,
            user_id,
            course_id,
            storage,
            engine,
            sync,
        })
    }

    /// Enroll a user in a course. Re-enrolling keeps the original record.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Storage` if the enrollment cannot be stored.
    pub async fn enroll(
        storage: &Storage,
        user_id: UserId,
        course_id: CourseId,
        clock: Clock,
    ) -> Result<(), PlayerError> {
        storage
            .enrollments
            .enroll(&EnrollmentRow {
                user_id,
                course_id,
                enrolled_at: clock.now(),
                completed_at: None,
            })
            .await?;
        Ok(())
    }

    /// Open a lesson for playback, seeding the engine from the progress store.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Engine` when the lesson is locked or unknown,
    /// and `PlayerError::Storage` when the seed cannot be loaded.
    pub async fn open_lesson(&mut self, lesson_id: LessonId) -> Result<(), PlayerError> {
        let seed = self
            .storage
            .progress
            .get_progress(self.user_id, lesson_id)
            .await?
            .map(|row| ProgressSeed {
                completion_percentage: row.completion_percentage,
                last_validated_time: row.last_validated_time,
                is_completed: row.is_completed,
                updated_at: row.updated_at,
            });
        self.engine.open_lesson(lesson_id, seed, self.clock.now())?;
        Ok(())
    }

    /// Process one playback tick and hand its writes to the sync layer.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Engine` if the lesson was never opened.
    pub fn tick(
        &mut self,
        lesson_id: LessonId,
        current_time: f64,
        duration: f64,
    ) -> Result<TickEffects, PlayerError> {
        let now = self.clock.now();
        let effects = self.engine.tick(lesson_id, current_time, duration, now)?;
        self.sync.dispatch(&effects, now);
        Ok(effects)
    }

    /// Evaluate a seek request against the anti-skip policy.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Engine` if the lesson was never opened.
    pub fn request_seek(
        &self,
        lesson_id: LessonId,
        target: f64,
    ) -> Result<TickEffects, PlayerError> {
        Ok(self.engine.request_seek(lesson_id, target)?)
    }

    /// # Errors
    ///
    /// Returns `PlayerError::Engine` if the lesson was never opened.
    pub fn seek_started(&mut self, lesson_id: LessonId) -> Result<(), PlayerError> {
        Ok(self.engine.seek_started(lesson_id)?)
    }

    /// # Errors
    ///
    /// Returns `PlayerError::Engine` if the lesson was never opened.
    pub fn seek_ended(&mut self, lesson_id: LessonId) -> Result<(), PlayerError> {
        let now = self.clock.now();
        Ok(self.engine.seek_ended(lesson_id, now)?)
    }

    /// The host player's "ended" event.
    ///
    /// # Errors
    ///
    /// Returns `PlayerError::Engine` if the lesson was never opened.
    pub fn playback_ended(&mut self, lesson_id: LessonId) -> Result<TickEffects, PlayerError> {
        let now = self.clock.now();
        let effects = self.engine.playback_ended(lesson_id, now)?;
        self.sync.dispatch(&effects, now);
        Ok(effects)
    }

    /// Lesson switch or player unmount.
    pub fn close_lesson(&mut self, lesson_id: LessonId) {
        self.engine.close_lesson(lesson_id);
    }

    /// Await in-flight store writes. For shutdown and tests.
    pub async fn flush(&self) {
        self.sync.flush().await;
    }

    //
    // ─── READ SIDE ─────────────────────────────────────────────────────────────
    //

    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn record(&self, lesson_id: LessonId) -> Option<&LessonProgressRecord> {
        self.engine.record(lesson_id)
    }

    #[must_use]
    pub fn lesson_state(&self, lesson_id: LessonId) -> LessonState {
        self.engine.lesson_state(lesson_id)
    }

    /// # Errors
    ///
    /// Returns `PlayerError::Engine` for lessons outside the course.
    pub fn lesson_accessible(&self, lesson_id: LessonId) -> Result<bool, PlayerError> {
        self.engine
            .lesson_accessible(lesson_id)
            .map_err(|e| PlayerError::Engine(e.into()))
    }

    #[must_use]
    pub fn exam_accessible(&self) -> bool {
        self.engine.exam_accessible()
    }

    #[must_use]
    pub fn course_completed(&self) -> bool {
        self.engine.course_completed()
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    pub fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }

    #[must_use]
    pub fn now(&self) -> chrono::DateTime<Utc> {
        self.clock.now()
    }
}
