use async_trait::async_trait;
use chrono::{DateTime, Utc};
use course_core::model::{
    CourseId, CourseOutline, CourseOutlineError, Lesson, LessonId, LessonProgressRecord,
    ProgressError, UserId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape for one (user, lesson) progress row.
///
/// Mirrors the domain `LessonProgressRecord` plus the owning user/course, so
/// repositories can serialize without leaking storage concerns into the
/// domain layer. The milestone set is not stored; it is derived from the
/// percentage on rehydration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressRow {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub lesson_id: LessonId,
    pub completion_percentage: f64,
    pub last_validated_time: f64,
    pub is_completed: bool,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRow {
    #[must_use]
    pub fn from_record(
        user_id: UserId,
        course_id: CourseId,
        record: &LessonProgressRecord,
    ) -> Self {
        Self {
            user_id,
            course_id,
            lesson_id: record.lesson_id(),
            completion_percentage: record.completion_percentage(),
            last_validated_time: record.last_validated_time(),
            is_completed: record.is_completed(),
            updated_at: record.updated_at(),
        }
    }

    /// Convert the row back into a domain record.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the stored values fail validation.
    pub fn into_record(self) -> Result<LessonProgressRecord, ProgressError> {
        LessonProgressRecord::from_persisted(
            self.lesson_id,
            self.completion_percentage,
            self.last_validated_time,
            self.is_completed,
            self.updated_at,
        )
    }

    /// Value-wins merge: each field keeps whichever value is further along,
    /// so out-of-order writes from the best-effort sync layer converge on
    /// the same row regardless of arrival order.
    pub fn absorb(&mut self, incoming: &ProgressRow) {
        if incoming.completion_percentage > self.completion_percentage {
            self.completion_percentage = incoming.completion_percentage;
        }
        if incoming.last_validated_time > self.last_validated_time {
            self.last_validated_time = incoming.last_validated_time;
        }
        self.is_completed = self.is_completed || incoming.is_completed;
        if incoming.updated_at > self.updated_at {
            self.updated_at = incoming.updated_at;
        }
    }
}

/// Persisted shape for a course enrollment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrollmentRow {
    pub user_id: UserId,
    pub course_id: CourseId,
    pub enrolled_at: DateTime<Utc>,
    /// Set once, when the course-wide completion fires; never cleared.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Repository contract for the lesson catalog.
#[async_trait]
pub trait LessonCatalogRepository: Send + Sync {
    /// Persist or update a catalog lesson.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the lesson cannot be stored.
    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError>;

    /// Fetch a course's full outline, ordered by `order_index`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` for a course with no lessons, or
    /// `StorageError::Serialization` if the stored rows do not form a valid
    /// outline.
    async fn course_outline(&self, course_id: CourseId) -> Result<CourseOutline, StorageError>;
}

/// Repository contract for per-user lesson progress.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Persist a progress row with value-wins semantics: percentage,
    /// validated time, the completion flag, and the update timestamp each
    /// keep the maximum of the stored and incoming values.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the row cannot be stored.
    async fn upsert_progress(&self, row: &ProgressRow) -> Result<(), StorageError>;

    /// Fetch one (user, lesson) row, or `None` if the lesson was never started.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<ProgressRow>, StorageError>;

    /// Fetch every progress row a user has for a course.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<ProgressRow>, StorageError>;

    /// Flip the durable completion flag for one lesson. Idempotent; creates
    /// no row if the lesson was never started.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if there is no row to flip.
    async fn mark_lesson_completed(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

/// Repository contract for course enrollments.
#[async_trait]
pub trait EnrollmentRepository: Send + Sync {
    /// Persist an enrollment. Re-enrolling keeps the original row.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the enrollment cannot be stored.
    async fn enroll(&self, row: &EnrollmentRow) -> Result<(), StorageError>;

    /// Fetch an enrollment, or `None` if the user never enrolled.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` on backend failure.
    async fn get_enrollment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<EnrollmentRow>, StorageError>;

    /// Record the course-wide completion timestamp. First write wins;
    /// repeats are no-ops.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the user is not enrolled.
    async fn mark_course_completed(
        &self,
        user_id: UserId,
        course_id: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError>;
}

fn outline_error(e: CourseOutlineError) -> StorageError {
    StorageError::Serialization(e.to_string())
}

/// Simple in-memory repository implementation for testing and prototyping.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    lessons: Arc<Mutex<HashMap<LessonId, Lesson>>>,
    progress: Arc<Mutex<HashMap<(UserId, LessonId), ProgressRow>>>,
    enrollments: Arc<Mutex<HashMap<(UserId, CourseId), EnrollmentRow>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LessonCatalogRepository for InMemoryRepository {
    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        let mut guard = self
            .lessons
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard.insert(lesson.id(), lesson.clone());
        Ok(())
    }

    async fn course_outline(&self, course_id: CourseId) -> Result<CourseOutline, StorageError> {
        let guard = self
            .lessons
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let lessons: Vec<Lesson> = guard
            .values()
            .filter(|l| l.course_id() == course_id)
            .cloned()
            .collect();
        if lessons.is_empty() {
            return Err(StorageError::NotFound);
        }
        CourseOutline::new(course_id, lessons).map_err(outline_error)
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn upsert_progress(&self, row: &ProgressRow) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .entry((row.user_id, row.lesson_id))
            .and_modify(|existing| existing.absorb(row))
            .or_insert_with(|| row.clone());
        Ok(())
    }

    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<ProgressRow>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(user_id, lesson_id)).cloned())
    }

    async fn course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<ProgressRow>, StorageError> {
        let guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let mut rows: Vec<ProgressRow> = guard
            .values()
            .filter(|r| r.user_id == user_id && r.course_id == course_id)
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.lesson_id);
        Ok(rows)
    }

    async fn mark_lesson_completed(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .progress
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let row = guard
            .get_mut(&(user_id, lesson_id))
            .ok_or(StorageError::NotFound)?;
        row.is_completed = true;
        if at > row.updated_at {
            row.updated_at = at;
        }
        Ok(())
    }
}

#[async_trait]
impl EnrollmentRepository for InMemoryRepository {
    async fn enroll(&self, row: &EnrollmentRow) -> Result<(), StorageError> {
        let mut guard = self
            .enrollments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        guard
            .entry((row.user_id, row.course_id))
            .or_insert_with(|| row.clone());
        Ok(())
    }

    async fn get_enrollment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<EnrollmentRow>, StorageError> {
        let guard = self
            .enrollments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard.get(&(user_id, course_id)).cloned())
    }

    async fn mark_course_completed(
        &self,
        user_id: UserId,
        course_id: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let mut guard = self
            .enrollments
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        let row = guard
            .get_mut(&(user_id, course_id))
            .ok_or(StorageError::NotFound)?;
        if row.completed_at.is_none() {
            row.completed_at = Some(at);
        }
        Ok(())
    }
}

/// Aggregates the repositories behind trait objects for easy backend swapping.
#[derive(Clone)]
pub struct Storage {
    pub catalog: Arc<dyn LessonCatalogRepository>,
    pub progress: Arc<dyn ProgressRepository>,
    pub enrollments: Arc<dyn EnrollmentRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let catalog: Arc<dyn LessonCatalogRepository> = Arc::new(repo.clone());
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo.clone());
        let enrollments: Arc<dyn EnrollmentRepository> = Arc::new(repo);
        Self {
            catalog,
            progress,
            enrollments,
        }
    }
}
