use course_core::model::{CourseId, CourseOutline, Lesson};

use super::{
    SqliteRepository,
    mapping::{course_id_to_i64, lesson_id_to_i64, map_lesson_row, ser},
};
use crate::repository::{LessonCatalogRepository, StorageError};

#[async_trait::async_trait]
impl LessonCatalogRepository for SqliteRepository {
    async fn upsert_lesson(&self, lesson: &Lesson) -> Result<(), StorageError> {
        sqlx::query(
            r"
            INSERT INTO lessons (id, course_id, order_index, title, duration_seconds, video_url)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                course_id = excluded.course_id,
                order_index = excluded.order_index,
                title = excluded.title,
                duration_seconds = excluded.duration_seconds,
                video_url = excluded.video_url
            ",
        )
        .bind(lesson_id_to_i64(lesson.id())?)
        .bind(course_id_to_i64(lesson.course_id())?)
        .bind(i64::from(lesson.order_index()))
        .bind(lesson.title().to_owned())
        .bind(lesson.duration_seconds())
        .bind(lesson.video_url().as_str().to_owned())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        Ok(())
    }

    async fn course_outline(&self, course_id: CourseId) -> Result<CourseOutline, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT id, course_id, order_index, title, duration_seconds, video_url
            FROM lessons
            WHERE course_id = ?1
            ORDER BY order_index ASC
            ",
        )
        .bind(course_id_to_i64(course_id)?)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Connection(e.to_string()))?;

        if rows.is_empty() {
            return Err(StorageError::NotFound);
        }

        let mut lessons = Vec::with_capacity(rows.len());
        for row in &rows {
            lessons.push(map_lesson_row(row)?);
        }

        CourseOutline::new(course_id, lessons).map_err(ser)
    }
}
