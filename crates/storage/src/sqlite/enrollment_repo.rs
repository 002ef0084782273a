use chrono::{DateTime, Utc};
use course_core::model::{CourseId, UserId};

use super::{
    SqliteRepository,
    mapping::{course_id_to_i64, map_enrollment_row},
};
use crate::repository::{EnrollmentRepository, EnrollmentRow, StorageError};

#[async_trait::async_trait]
impl EnrollmentRepository for SqliteRepository {
    async fn enroll(&self, row: &EnrollmentRow) -> Result<(), StorageError> {
        // Re-enrolling keeps the original row.
        sqlx::query(
            r"
            INSERT INTO enrollments (user_id, course_id, enrolled_at, completed_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id, course_id) DO NOTHING
            ",
        )
        .bind(row.user_id.to_string())
        .bind(course_id_to_i64(row.course_id)?)
        .bind(row.enrolled_at)
        .bind(row.completed_at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn get_enrollment(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Option<EnrollmentRow>, StorageError> {
        let row = sqlx::query(
            r"
            SELECT user_id, course_id, enrolled_at, completed_at
            FROM enrollments
            WHERE user_id = ?1 AND course_id = ?2
            ",
        )
        .bind(user_id.to_string())
        .bind(course_id_to_i64(course_id)?)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        row.as_ref().map(map_enrollment_row).transpose()
    }

    async fn mark_course_completed(
        &self,
        user_id: UserId,
        course_id: CourseId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r"
            UPDATE enrollments
            SET completed_at = ?3
            WHERE user_id = ?1 AND course_id = ?2 AND completed_at IS NULL
            ",
        )
        .bind(user_id.to_string())
        .bind(course_id_to_i64(course_id)?)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Distinguish "never enrolled" from "already completed".
            let enrolled = self.get_enrollment(user_id, course_id).await?;
            if enrolled.is_none() {
                return Err(StorageError::NotFound);
            }
        }
        Ok(())
    }
}
