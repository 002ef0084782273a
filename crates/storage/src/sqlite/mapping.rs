use course_core::model::{CourseId, Lesson, LessonId, UserId};
use sqlx::Row;
use url::Url;

use crate::repository::{EnrollmentRow, ProgressRow, StorageError};

pub(crate) fn ser<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Serialization(e.to_string())
}

fn i64_to_u64(field: &'static str, v: i64) -> Result<u64, StorageError> {
    u64::try_from(v).map_err(|_| StorageError::Serialization(format!("{field} sign overflow")))
}

pub(crate) fn course_id_from_i64(v: i64) -> Result<CourseId, StorageError> {
    Ok(CourseId::new(i64_to_u64("course_id", v)?))
}

pub(crate) fn lesson_id_from_i64(v: i64) -> Result<LessonId, StorageError> {
    Ok(LessonId::new(i64_to_u64("lesson_id", v)?))
}

pub(crate) fn course_id_to_i64(id: CourseId) -> Result<i64, StorageError> {
    i64::try_from(id.value()).map_err(|_| StorageError::Serialization("course_id overflow".into()))
}

pub(crate) fn lesson_id_to_i64(id: LessonId) -> Result<i64, StorageError> {
    i64::try_from(id.value()).map_err(|_| StorageError::Serialization("lesson_id overflow".into()))
}

pub(crate) fn user_id_from_str(s: &str) -> Result<UserId, StorageError> {
    s.parse::<UserId>().map_err(ser)
}

pub(crate) fn map_lesson_row(row: &sqlx::sqlite::SqliteRow) -> Result<Lesson, StorageError> {
    let order_index_i64: i64 = row.try_get("order_index").map_err(ser)?;
    let order_index = u32::try_from(order_index_i64).map_err(|_| {
        StorageError::Serialization(format!("invalid order_index: {order_index_i64}"))
    })?;

    let url_str: String = row.try_get("video_url").map_err(ser)?;
    let video_url = Url::parse(&url_str).map_err(ser)?;

    Lesson::new(
        lesson_id_from_i64(row.try_get::<i64, _>("id").map_err(ser)?)?,
        course_id_from_i64(row.try_get::<i64, _>("course_id").map_err(ser)?)?,
        order_index,
        row.try_get::<String, _>("title").map_err(ser)?,
        row.try_get("duration_seconds").map_err(ser)?,
        video_url,
    )
    .map_err(ser)
}

pub(crate) fn map_progress_row(row: &sqlx::sqlite::SqliteRow) -> Result<ProgressRow, StorageError> {
    let user: String = row.try_get("user_id").map_err(ser)?;
    Ok(ProgressRow {
        user_id: user_id_from_str(&user)?,
        course_id: course_id_from_i64(row.try_get::<i64, _>("course_id").map_err(ser)?)?,
        lesson_id: lesson_id_from_i64(row.try_get::<i64, _>("lesson_id").map_err(ser)?)?,
        completion_percentage: row.try_get("completion_percentage").map_err(ser)?,
        last_validated_time: row.try_get("last_validated_time").map_err(ser)?,
        is_completed: row.try_get::<i64, _>("is_completed").map_err(ser)? != 0,
        updated_at: row.try_get("updated_at").map_err(ser)?,
    })
}

pub(crate) fn map_enrollment_row(
    row: &sqlx::sqlite::SqliteRow,
) -> Result<EnrollmentRow, StorageError> {
    let user: String = row.try_get("user_id").map_err(ser)?;
    Ok(EnrollmentRow {
        user_id: user_id_from_str(&user)?,
        course_id: course_id_from_i64(row.try_get::<i64, _>("course_id").map_err(ser)?)?,
        enrolled_at: row.try_get("enrolled_at").map_err(ser)?,
        completed_at: row.try_get("completed_at").map_err(ser)?,
    })
}
