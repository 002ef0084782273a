use std::collections::BTreeSet;

use thiserror::Error;

use crate::model::{CourseOutline, LessonId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum UnlockError {
    #[error("lesson {0} is not part of this course")]
    UnknownLesson(LessonId),

    #[error("lesson {lesson} is locked until lesson {predecessor} is completed")]
    PredecessorIncomplete {
        lesson: LessonId,
        predecessor: LessonId,
    },
}

/// Whether a lesson is currently accessible.
///
/// Pure function over the outline and the completed-lesson set: the first
/// lesson is always open, every other lesson requires its predecessor to be
/// completed. Recomputed on every access check; no state of its own.
///
/// # Errors
///
/// Returns `UnlockError::UnknownLesson` for ids outside the outline.
pub fn lesson_accessible(
    outline: &CourseOutline,
    completed: &BTreeSet<LessonId>,
    lesson_id: LessonId,
) -> Result<bool, UnlockError> {
    if !outline.contains(lesson_id) {
        return Err(UnlockError::UnknownLesson(lesson_id));
    }
    Ok(match outline.predecessor(lesson_id) {
        None => true,
        Some(previous) => completed.contains(&previous.id()),
    })
}

/// Blocking precondition used before navigating to a lesson.
///
/// # Errors
///
/// Returns `UnlockError::PredecessorIncomplete` when access must be refused,
/// or `UnlockError::UnknownLesson` for ids outside the outline.
pub fn ensure_accessible(
    outline: &CourseOutline,
    completed: &BTreeSet<LessonId>,
    lesson_id: LessonId,
) -> Result<(), UnlockError> {
    if lesson_accessible(outline, completed, lesson_id)? {
        return Ok(());
    }
    let predecessor = outline
        .predecessor(lesson_id)
        .map(|l| l.id())
        .ok_or(UnlockError::UnknownLesson(lesson_id))?;
    Err(UnlockError::PredecessorIncomplete {
        lesson: lesson_id,
        predecessor,
    })
}

/// The final exam opens only when every lesson in the course is completed.
#[must_use]
pub fn exam_accessible(outline: &CourseOutline, completed: &BTreeSet<LessonId>) -> bool {
    outline
        .lessons()
        .iter()
        .all(|lesson| completed.contains(&lesson.id()))
}

// ─── Tests ─────────────────────────────────────────────────────────────────────
