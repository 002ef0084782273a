use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tracing::warn;

use course_core::engine::{ProgressWrite, SnapshotKind, TickEffects};
use course_core::model::{CourseId, LessonId, UserId};
use course_storage::repository::{
    EnrollmentRepository, ProgressRepository, ProgressRow, StorageError,
};

/// Best-effort, fire-and-forget persistence of engine effects.
///
/// Playback never blocks on the store: each dispatched batch runs on its own
/// task, failures are logged and the session keeps its in-memory state. A
/// lesson-completion write that fails is remembered as unconfirmed and
/// retried once, on the next checkpoint snapshot for that lesson.
#[derive(Clone)]
pub struct ProgressSync {
    inner: Arc<SyncInner>,
    tasks: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

struct SyncInner {
    user_id: UserId,
    course_id: CourseId,
    progress: Arc<dyn ProgressRepository>,
    enrollments: Arc<dyn EnrollmentRepository>,
    unconfirmed: Mutex<HashSet<LessonId>>,
}

impl ProgressSync {
    #[must_use]
    pub fn new(
        user_id: UserId,
        course_id: CourseId,
        progress: Arc<dyn ProgressRepository>,
        enrollments: Arc<dyn EnrollmentRepository>,
    ) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                user_id,
                course_id,
                progress,
                enrollments,
                unconfirmed: Mutex::new(HashSet::new()),
            }),
            tasks: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Spawn a task applying one transition's writes, in order.
    pub fn dispatch(&self, effects: &TickEffects, now: DateTime<Utc>) {
        if effects.writes.is_empty() {
            return;
        }
        let writes = effects.writes.clone();
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            inner.apply(&writes, now).await;
        });
        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.push(handle);
        }
    }

    /// Await every in-flight write. Used on shutdown and by tests; normal
    /// playback never waits here.
    pub async fn flush(&self) {
        let handles: Vec<JoinHandle<()>> = match self.tasks.lock() {
            Ok(mut tasks) => tasks.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(err) = handle.await {
                warn!(%err, "progress sync task panicked");
            }
        }
    }

    /// Whether any lesson completion is still awaiting its store write.
    #[must_use]
    pub fn has_unconfirmed(&self) -> bool {
        self.inner
            .unconfirmed
            .lock()
            .map(|set| !set.is_empty())
            .unwrap_or(false)
    }
}

impl SyncInner {
    async fn apply(&self, writes: &[ProgressWrite], now: DateTime<Utc>) {
        for write in writes {
            match *write {
                ProgressWrite::Snapshot {
                    lesson_id,
                    percentage,
                    last_validated_time,
                    kind,
                } => {
                    let row = ProgressRow {
                        user_id: self.user_id,
                        course_id: self.course_id,
                        lesson_id,
                        completion_percentage: percentage,
                        last_validated_time,
                        is_completed: false,
                        updated_at: now,
                    };
                    if let Err(err) = self.progress.upsert_progress(&row).await {
                        warn!(%lesson_id, %err, "progress snapshot write failed");
                    }
                    if kind == SnapshotKind::Checkpoint {
                        self.retry_unconfirmed(now).await;
                    }
                }
                ProgressWrite::LessonCompleted { lesson_id } => {
                    if let Err(err) = self.write_completion(lesson_id, now).await {
                        warn!(%lesson_id, %err, "lesson completion write failed");
                        if let Ok(mut set) = self.unconfirmed.lock() {
                            set.insert(lesson_id);
                        }
                    }
                }
                ProgressWrite::CourseCompleted => {
                    if let Err(err) = self
                        .enrollments
                        .mark_course_completed(self.user_id, self.course_id, now)
                        .await
                    {
                        warn!(course_id = %self.course_id, %err, "course completion write failed");
                    }
                }
            }
        }
    }

    /// The dedicated completion write. When the store has no row yet (the
    /// ended event can arrive before any snapshot), fall back to a value-wins
    /// upsert that creates the row with the flag set.
    async fn write_completion(
        &self,
        lesson_id: LessonId,
        now: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        match self
            .progress
            .mark_lesson_completed(self.user_id, lesson_id, now)
            .await
        {
            Err(StorageError::NotFound) => {
                let row = ProgressRow {
                    user_id: self.user_id,
                    course_id: self.course_id,
                    lesson_id,
                    completion_percentage: 0.0,
                    last_validated_time: 0.0,
                    is_completed: true,
                    updated_at: now,
                };
                self.progress.upsert_progress(&row).await
            }
            other => other,
        }
    }

    /// Retry every unconfirmed completion, whatever lesson the triggering
    /// checkpoint belongs to: the user has usually moved on by the time the
    /// next checkpoint fires.
    async fn retry_unconfirmed(&self, now: DateTime<Utc>) {
        let pending: Vec<LessonId> = self
            .unconfirmed
            .lock()
            .map(|mut set| set.drain().collect())
            .unwrap_or_default();
        for lesson_id in pending {
            // Single retry per checkpoint: a repeat failure is logged and dropped.
            if let Err(err) = self.write_completion(lesson_id, now).await {
                warn!(%lesson_id, %err, "lesson completion retry failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use course_core::time::fixed_now;
    use course_storage::repository::{InMemoryRepository, StorageError};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn snapshot(lesson: u64, pct: f64, kind: SnapshotKind) -> TickEffects {
        TickEffects {
            writes: vec![ProgressWrite::Snapshot {
                lesson_id: LessonId::new(lesson),
                percentage: pct,
                last_validated_time: pct * 3.0,
                kind,
            }],
            notices: Vec::new(),
            clamp_to: None,
        }
    }

    fn completed(lesson: u64) -> TickEffects {
        TickEffects {
            writes: vec![ProgressWrite::LessonCompleted {
                lesson_id: LessonId::new(lesson),
            }],
            notices: Vec::new(),
            clamp_to: None,
        }
    }

    /// Fails the first `failures` progress upserts, then delegates.
    struct FlakyProgress {
        delegate: InMemoryRepository,
        failures: AtomicU32,
    }

    #[async_trait]
    impl ProgressRepository for FlakyProgress {
        async fn upsert_progress(&self, row: &ProgressRow) -> Result<(), StorageError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Connection("injected".into()));
            }
            self.delegate.upsert_progress(row).await
        }

        async fn get_progress(
            &self,
            user_id: UserId,
            lesson_id: LessonId,
        ) -> Result<Option<ProgressRow>, StorageError> {
            self.delegate.get_progress(user_id, lesson_id).await
        }

        async fn course_progress(
            &self,
            user_id: UserId,
            course_id: CourseId,
        ) -> Result<Vec<ProgressRow>, StorageError> {
            self.delegate.course_progress(user_id, course_id).await
        }

        async fn mark_lesson_completed(
            &self,
            user_id: UserId,
            lesson_id: LessonId,
            at: chrono::DateTime<Utc>,
        ) -> Result<(), StorageError> {
            self.delegate.mark_lesson_completed(user_id, lesson_id, at).await
        }
    }

    /// Counts dedicated completion writes, delegating everything else.
    struct CountingProgress {
        delegate: InMemoryRepository,
        completed_calls: AtomicU32,
    }

    #[async_trait]
    impl ProgressRepository for CountingProgress {
        async fn upsert_progress(&self, row: &ProgressRow) -> Result<(), StorageError> {
            self.delegate.upsert_progress(row).await
        }

        async fn get_progress(
            &self,
            user_id: UserId,
            lesson_id: LessonId,
        ) -> Result<Option<ProgressRow>, StorageError> {
            self.delegate.get_progress(user_id, lesson_id).await
        }

        async fn course_progress(
            &self,
            user_id: UserId,
            course_id: CourseId,
        ) -> Result<Vec<ProgressRow>, StorageError> {
            self.delegate.course_progress(user_id, course_id).await
        }

        async fn mark_lesson_completed(
            &self,
            user_id: UserId,
            lesson_id: LessonId,
            at: chrono::DateTime<Utc>,
        ) -> Result<(), StorageError> {
            self.completed_calls.fetch_add(1, Ordering::SeqCst);
            self.delegate.mark_lesson_completed(user_id, lesson_id, at).await
        }
    }

    fn sync_over(progress: Arc<dyn ProgressRepository>) -> (ProgressSync, UserId) {
        let user = UserId::random();
        let enrollments: Arc<dyn EnrollmentRepository> = Arc::new(InMemoryRepository::new());
        (
            ProgressSync::new(user, CourseId::new(1), progress, enrollments),
            user,
        )
    }

    #[tokio::test]
    async fn snapshots_reach_the_store() {
        let repo = InMemoryRepository::new();
        let (sync, user) = sync_over(Arc::new(repo.clone()));

        sync.dispatch(&snapshot(1, 30.0, SnapshotKind::Milestone), fixed_now());
        sync.flush().await;

        let row = repo
            .get_progress(user, LessonId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.completion_percentage, 30.0);
    }

    #[tokio::test]
    async fn completion_goes_through_the_dedicated_write() {
        let counting = Arc::new(CountingProgress {
            delegate: InMemoryRepository::new(),
            completed_calls: AtomicU32::new(0),
        });
        let (sync, user) = sync_over(counting.clone());

        sync.dispatch(&snapshot(1, 30.0, SnapshotKind::Milestone), fixed_now());
        sync.dispatch(&completed(1), fixed_now());
        sync.flush().await;

        assert_eq!(counting.completed_calls.load(Ordering::SeqCst), 1);
        let row = counting
            .delegate
            .get_progress(user, LessonId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_completed);
        // The dedicated write flips the flag without touching the snapshot.
        assert_eq!(row.completion_percentage, 30.0);
    }

    #[tokio::test]
    async fn completion_before_any_snapshot_creates_the_row() {
        let counting = Arc::new(CountingProgress {
            delegate: InMemoryRepository::new(),
            completed_calls: AtomicU32::new(0),
        });
        let (sync, user) = sync_over(counting.clone());

        // The ended event arrives before any snapshot for this lesson.
        sync.dispatch(&completed(1), fixed_now());
        sync.flush().await;

        assert_eq!(counting.completed_calls.load(Ordering::SeqCst), 1);
        let row = counting
            .delegate
            .get_progress(user, LessonId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_completed);
    }

    #[tokio::test]
    async fn failed_completion_is_retried_on_next_checkpoint() {
        let flaky = Arc::new(FlakyProgress {
            delegate: InMemoryRepository::new(),
            failures: AtomicU32::new(1),
        });
        let (sync, user) = sync_over(flaky.clone());

        // The completion write fails once and is parked as unconfirmed.
        sync.dispatch(&completed(1), fixed_now());
        sync.flush().await;
        assert!(sync.has_unconfirmed());

        // The next checkpoint snapshot carries the retry.
        sync.dispatch(&snapshot(1, 100.0, SnapshotKind::Checkpoint), fixed_now());
        sync.flush().await;
        assert!(!sync.has_unconfirmed());

        let row = flaky
            .delegate
            .get_progress(user, LessonId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_completed);
    }

    #[tokio::test]
    async fn unconfirmed_completion_retries_on_another_lessons_checkpoint() {
        let flaky = Arc::new(FlakyProgress {
            delegate: InMemoryRepository::new(),
            failures: AtomicU32::new(1),
        });
        let (sync, user) = sync_over(flaky.clone());

        sync.dispatch(&completed(1), fixed_now());
        sync.flush().await;
        assert!(sync.has_unconfirmed());

        // The user moved on: lesson 2's checkpoint still carries the retry.
        sync.dispatch(&snapshot(2, 20.0, SnapshotKind::Checkpoint), fixed_now());
        sync.flush().await;
        assert!(!sync.has_unconfirmed());

        let row = flaky
            .delegate
            .get_progress(user, LessonId::new(1))
            .await
            .unwrap()
            .unwrap();
        assert!(row.is_completed);
    }

    #[tokio::test]
    async fn playback_state_survives_store_failures() {
        // Every write fails; dispatch itself must not error or panic.
        let flaky = Arc::new(FlakyProgress {
            delegate: InMemoryRepository::new(),
            failures: AtomicU32::new(u32::MAX),
        });
        let (sync, _user) = sync_over(flaky);

        sync.dispatch(&snapshot(1, 10.0, SnapshotKind::Milestone), fixed_now());
        sync.dispatch(&completed(1), fixed_now());
        sync.flush().await;
        assert!(sync.has_unconfirmed());
    }
}
