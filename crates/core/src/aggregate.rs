use std::collections::BTreeSet;

use crate::model::{CourseOutline, LessonId};

/// Fires the course-wide completion side effect exactly once, when the
/// completed-lesson set grows to cover the full lesson set. A boolean latch,
/// not a counter: once fired it never fires again for this session.
#[derive(Debug, Clone)]
pub struct CourseCompletionAggregator {
    lesson_ids: BTreeSet<LessonId>,
    fired: bool,
}

impl CourseCompletionAggregator {
    #[must_use]
    pub fn new(outline: &CourseOutline) -> Self {
        Self {
            lesson_ids: outline.lesson_ids(),
            fired: false,
        }
    }

    /// Check after a lesson completion. Returns true exactly once.
    pub fn check(&mut self, completed: &BTreeSet<LessonId>) -> bool {
        if self.fired {
            return false;
        }
        if self.lesson_ids.iter().all(|id| completed.contains(id)) {
            self.fired = true;
            return true;
        }
        false
    }

    /// Latch without firing, for sessions where the store already shows the
    /// course as completed (reload after the fact).
    pub fn latch(&mut self) {
        self.fired = true;
    }

    #[must_use]
    pub fn has_fired(&self) -> bool {
        self.fired
    }
}

// ─── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CourseId, Lesson};
    use url::Url;

    fn outline(lessons: u64) -> CourseOutline {
        let course = CourseId::new(1);
        let lessons = (0..lessons)
            .map(|i| {
                Lesson::new(
                    LessonId::new(i + 1),
                    course,
                    u32::try_from(i).unwrap(),
                    format!("Lesson {i}"),
                    100.0,
                    Url::parse("https://videos.example.com/l.mp4").unwrap(),
                )
                .unwrap()
            })
            .collect();
        CourseOutline::new(course, lessons).unwrap()
    }

    #[test]
    fn fires_once_when_last_lesson_completes() {
        let outline = outline(3);
        let mut aggregator = CourseCompletionAggregator::new(&outline);
        let mut completed = BTreeSet::new();

        completed.insert(LessonId::new(1));
        assert!(!aggregator.check(&completed));
        completed.insert(LessonId::new(2));
        assert!(!aggregator.check(&completed));
        completed.insert(LessonId::new(3));
        assert!(aggregator.check(&completed));

        // Latched: further checks never fire again.
        assert!(!aggregator.check(&completed));
        assert!(aggregator.has_fired());
    }

    #[test]
    fn completion_order_does_not_matter() {
        let outline = outline(3);

        for order in [[3u64, 1, 2], [2, 3, 1], [1, 3, 2]] {
            let mut aggregator = CourseCompletionAggregator::new(&outline);
            let mut completed = BTreeSet::new();
            let mut fired = 0;
            for id in order {
                completed.insert(LessonId::new(id));
                if aggregator.check(&completed) {
                    fired += 1;
                }
            }
            assert_eq!(fired, 1);
        }
    }

    #[test]
    fn latch_suppresses_refire_after_reload() {
        let outline = outline(2);
        let mut aggregator = CourseCompletionAggregator::new(&outline);
        aggregator.latch();

        let completed: BTreeSet<LessonId> =
            [LessonId::new(1), LessonId::new(2)].into_iter().collect();
        assert!(!aggregator.check(&completed));
    }
}
