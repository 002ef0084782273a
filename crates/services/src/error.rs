//! Shared error types for the services crate.

use thiserror::Error;

use course_core::engine::EngineError;
use course_core::model::{CourseId, ProgressError, UserId};
use course_storage::repository::StorageError;
use course_storage::sqlite::SqliteInitError;

/// Errors emitted by `PlayerService`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PlayerError {
    #[error("user {user_id} is not enrolled in course {course_id}")]
    NotEnrolled {
        user_id: UserId,
        course_id: CourseId,
    },
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Progress(#[from] ProgressError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Errors emitted while bootstrapping player services.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BootstrapError {
    #[error(transparent)]
    Sqlite(#[from] SqliteInitError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}
