use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::model::{CourseId, LessonId};

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum LessonError {
    #[error("lesson title must not be empty")]
    EmptyTitle,

    #[error("lesson duration must be finite and positive, got {provided}")]
    InvalidDuration { provided: f64 },
}

/// Immutable catalog entry for a single lesson.
///
/// Owned by the course catalog; the engine only reads it. `order_index`
/// is 0-based and defines the sequential-viewing order within a course.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    id: LessonId,
    course_id: CourseId,
    order_index: u32,
    title: String,
    duration_seconds: f64,
    video_url: Url,
}

impl Lesson {
    /// Create a catalog lesson.
    ///
    /// # Errors
    ///
    /// Returns `LessonError::EmptyTitle` for a blank title and
    /// `LessonError::InvalidDuration` for a non-finite or non-positive duration.
    pub fn new(
        id: LessonId,
        course_id: CourseId,
        order_index: u32,
        title: impl Into<String>,
        duration_seconds: f64,
        video_url: Url,
    ) -> Result<Self, LessonError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(LessonError::EmptyTitle);
        }
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(LessonError::InvalidDuration {
                provided: duration_seconds,
            });
        }

        Ok(Self {
            id,
            course_id,
            order_index,
            title,
            duration_seconds,
            video_url,
        })
    }

    #[must_use]
    pub fn id(&self) -> LessonId {
        self.id
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn order_index(&self) -> u32 {
        self.order_index
    }

    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    #[must_use]
    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    #[must_use]
    pub fn video_url(&self) -> &Url {
        &self.video_url
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
#[non_exhaustive]
pub enum CourseOutlineError {
    #[error("a course outline needs at least one lesson")]
    Empty,

    #[error("lesson {lesson} belongs to course {found}, expected {expected}")]
    ForeignLesson {
        lesson: LessonId,
        expected: CourseId,
        found: CourseId,
    },

    #[error("lesson order must be contiguous from 0: expected index {expected}, found {found}")]
    NonContiguousOrder { expected: u32, found: u32 },

    #[error("duplicate lesson id {0} in outline")]
    DuplicateLesson(LessonId),
}

/// The ordered lesson list for one course.
///
/// Lessons are sorted by `order_index` and validated to form a gapless
/// 0-based sequence, which is what the unlock policy indexes into.
#[derive(Debug, Clone, PartialEq)]
pub struct CourseOutline {
    course_id: CourseId,
    lessons: Vec<Lesson>,
}

impl CourseOutline {
    /// Build an outline from catalog lessons.
    ///
    /// # Errors
    ///
    /// Returns `CourseOutlineError` if the list is empty, contains lessons
    /// from another course, duplicates an id, or has gaps in `order_index`.
    pub fn new(course_id: CourseId, mut lessons: Vec<Lesson>) -> Result<Self, CourseOutlineError> {
        if lessons.is_empty() {
            return Err(CourseOutlineError::Empty);
        }

        lessons.sort_by_key(Lesson::order_index);

        let mut seen = std::collections::BTreeSet::new();
        for (position, lesson) in lessons.iter().enumerate() {
            if lesson.course_id() != course_id {
                return Err(CourseOutlineError::ForeignLesson {
                    lesson: lesson.id(),
                    expected: course_id,
                    found: lesson.course_id(),
                });
            }
            if !seen.insert(lesson.id()) {
                return Err(CourseOutlineError::DuplicateLesson(lesson.id()));
            }
            let expected = u32::try_from(position).unwrap_or(u32::MAX);
            if lesson.order_index() != expected {
                return Err(CourseOutlineError::NonContiguousOrder {
                    expected,
                    found: lesson.order_index(),
                });
            }
        }

        Ok(Self { course_id, lessons })
    }

    #[must_use]
    pub fn course_id(&self) -> CourseId {
        self.course_id
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lessons.len()
    }

    /// An outline is never empty; kept for API symmetry.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lessons.is_empty()
    }

    #[must_use]
    pub fn lessons(&self) -> &[Lesson] {
        &self.lessons
    }

    #[must_use]
    pub fn get(&self, position: usize) -> Option<&Lesson> {
        self.lessons.get(position)
    }

    #[must_use]
    pub fn contains(&self, lesson_id: LessonId) -> bool {
        self.position(lesson_id).is_some()
    }

    /// 0-based position of a lesson in the viewing order.
    #[must_use]
    pub fn position(&self, lesson_id: LessonId) -> Option<usize> {
        self.lessons.iter().position(|l| l.id() == lesson_id)
    }

    /// The lesson that must be completed before `lesson_id` becomes accessible.
    ///
    /// Returns `None` for the first lesson and for ids not in the outline.
    #[must_use]
    pub fn predecessor(&self, lesson_id: LessonId) -> Option<&Lesson> {
        match self.position(lesson_id)? {
            0 => None,
            pos => self.lessons.get(pos - 1),
        }
    }

    #[must_use]
    pub fn lesson_ids(&self) -> std::collections::BTreeSet<LessonId> {
        self.lessons.iter().map(Lesson::id).collect()
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn build_lesson(id: u64, course: u64, order: u32) -> Lesson {
        Lesson::new(
            LessonId::new(id),
            CourseId::new(course),
            order,
            format!("Lesson {id}"),
            120.0,
            Url::parse("https://videos.example.com/lesson.mp4").unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn lesson_rejects_empty_title() {
        let err = Lesson::new(
            LessonId::new(1),
            CourseId::new(1),
            0,
            "   ",
            120.0,
            Url::parse("https://videos.example.com/l.mp4").unwrap(),
        )
        .unwrap_err();
        assert!(matches!(err, LessonError::EmptyTitle));
    }

    #[test]
    fn lesson_rejects_invalid_duration() {
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY] {
            let err = Lesson::new(
                LessonId::new(1),
                CourseId::new(1),
                0,
                "Intro",
                bad,
                Url::parse("https://videos.example.com/l.mp4").unwrap(),
            )
            .unwrap_err();
            assert!(matches!(err, LessonError::InvalidDuration { .. }));
        }
    }

    #[test]
    fn outline_sorts_by_order_index() {
        let outline = CourseOutline::new(
            CourseId::new(1),
            vec![
                build_lesson(3, 1, 2),
                build_lesson(1, 1, 0),
                build_lesson(2, 1, 1),
            ],
        )
        .unwrap();

        assert_eq!(outline.len(), 3);
        assert_eq!(outline.get(0).unwrap().id(), LessonId::new(1));
        assert_eq!(outline.position(LessonId::new(3)), Some(2));
    }

    #[test]
    fn outline_rejects_gaps() {
        let err = CourseOutline::new(
            CourseId::new(1),
            vec![build_lesson(1, 1, 0), build_lesson(2, 1, 2)],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CourseOutlineError::NonContiguousOrder { expected: 1, found: 2 }
        ));
    }

    #[test]
    fn outline_rejects_foreign_lessons() {
        let err = CourseOutline::new(
            CourseId::new(1),
            vec![build_lesson(1, 1, 0), build_lesson(2, 7, 1)],
        )
        .unwrap_err();
        assert!(matches!(err, CourseOutlineError::ForeignLesson { .. }));
    }

    #[test]
    fn outline_rejects_duplicates_and_empty() {
        let err = CourseOutline::new(
            CourseId::new(1),
            vec![build_lesson(1, 1, 0), build_lesson(1, 1, 1)],
        )
        .unwrap_err();
        assert!(matches!(err, CourseOutlineError::DuplicateLesson(_)));

        let err = CourseOutline::new(CourseId::new(1), Vec::new()).unwrap_err();
        assert!(matches!(err, CourseOutlineError::Empty));
    }

    #[test]
    fn predecessor_follows_viewing_order() {
        let outline = CourseOutline::new(
            CourseId::new(1),
            vec![
                build_lesson(10, 1, 0),
                build_lesson(20, 1, 1),
                build_lesson(30, 1, 2),
            ],
        )
        .unwrap();

        assert!(outline.predecessor(LessonId::new(10)).is_none());
        assert_eq!(
            outline.predecessor(LessonId::new(20)).unwrap().id(),
            LessonId::new(10)
        );
        assert_eq!(
            outline.predecessor(LessonId::new(30)).unwrap().id(),
            LessonId::new(20)
        );
        assert!(outline.predecessor(LessonId::new(99)).is_none());
    }
}
