mod ids;
mod lesson;
mod progress;

pub use ids::{CourseId, LessonId, ParseIdError, UserId};
pub use lesson::{CourseOutline, CourseOutlineError, Lesson, LessonError};
pub use progress::{LessonProgressRecord, Milestone, ProgressError};
