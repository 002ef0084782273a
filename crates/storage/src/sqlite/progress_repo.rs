use chrono::{DateTime, Utc};
use course_core::model::{CourseId, LessonId, UserId};

use super::{
    SqliteRepository,
    mapping::{course_id_to_i64, lesson_id_to_i64, map_progress_row},
};
use crate::repository::{ProgressRepository, ProgressRow, StorageError};

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn upsert_progress(&self, row: &ProgressRow) -> Result<(), StorageError> {
        // Value-wins merge in SQL: every field keeps whichever value is
        // further along, so stale writes arriving out of order cannot
        // regress the row. RFC3339 timestamps compare correctly as TEXT.
        sqlx::query(
            r"
            INSERT INTO lesson_progress (
                user_id, lesson_id, course_id, completion_percentage,
                last_validated_time, is_completed, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(user_id, lesson_id) DO UPDATE SET
                completion_percentage =
                    MAX(completion_percentage, excluded.completion_percentage),
                last_validated_time =
                    MAX(last_validated_time, excluded.last_validated_time),
                is_completed = MAX(is_completed, excluded.is_completed),
                updated_at = MAX(updated_at, excluded.updated_at)
            ",
        )
        .bind(row.user_id.to_string())
        .bind(lesson_id_to_i64(row.lesson_id)?)
        .bind(course_id_to_i64(row.course_id)?)
        .bind(row.completion_percentage)
        .bind(row.last_validated_time)
        .bind(i64::from(row.is_completed))
        .bind(row.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<ProgressRow>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT user_id, lesson_id, course_id, completion_percentage,
                   last_validated_time, is_completed, updated_at
            FROM lesson_progress
            WHERE user_id = ?1 AND lesson_id = ?2
            ",
        )
        .bind(user_id.to_string())
        .bind(lesson_id_to_i64(lesson_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_progress_row).transpose()
    }

    async fn course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<ProgressRow>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT user_id, lesson_id, course_id, completion_percentage,
                   last_validated_time, is_completed, updated_at
            FROM lesson_progress
            WHERE user_id = ?1 AND course_id = ?2
            ORDER BY lesson_id ASC
            ",
        )
        .bind(user_id.to_string())
        .bind(course_id_to_i64(course_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(map_progress_row(row)?);
        }
        Ok(out)
    }

    async fn mark_lesson_completed(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r"
            UPDATE lesson_progress
            SET is_completed = 1,
                updated_at = MAX(updated_at, ?3)
            WHERE user_id = ?1 AND lesson_id = ?2
            ",
        )
        .bind(user_id.to_string())
        .bind(lesson_id_to_i64(lesson_id)?)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound);
        }
        Ok(())
    }
}
