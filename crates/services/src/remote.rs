use std::env;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use course_core::model::{CourseId, LessonId, UserId};
use course_storage::repository::{ProgressRepository, ProgressRow, StorageError};

#[derive(Clone, Debug)]
pub struct RemoteStoreConfig {
    pub base_url: String,
}

impl RemoteStoreConfig {
    #[must_use]
    pub fn from_env() -> Option<Self> {
        let base_url = env::var("COURSE_API_BASE_URL").ok()?;
        if base_url.trim().is_empty() {
            return None;
        }
        Some(Self { base_url })
    }
}

/// `ProgressRepository` backed by the course platform's REST API, for
/// deployments where progress lives behind a service instead of local
/// `SQLite`. Same contract, same value-wins semantics (the server merges).
#[derive(Clone)]
pub struct RemoteProgressStore {
    client: Client,
    base_url: String,
}

impl RemoteProgressStore {
    #[must_use]
    pub fn new(config: RemoteStoreConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_owned(),
        }
    }

    #[must_use]
    pub fn from_env() -> Option<Self> {
        RemoteStoreConfig::from_env().map(Self::new)
    }

    fn progress_url(&self, user_id: UserId, lesson_id: LessonId) -> String {
        format!(
            "{}/users/{user_id}/lessons/{lesson_id}/progress",
            self.base_url
        )
    }
}

fn http(e: reqwest::Error) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn status(code: StatusCode) -> StorageError {
    StorageError::Connection(format!("unexpected status {code}"))
}

#[derive(Debug, Serialize, Deserialize)]
struct ProgressBody {
    course_id: u64,
    completion_percentage: f64,
    last_validated_time: f64,
    is_completed: bool,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CourseProgressEntry {
    lesson_id: u64,
    #[serde(flatten)]
    body: ProgressBody,
}

#[derive(Debug, Serialize)]
struct CompletedBody {
    completed_at: DateTime<Utc>,
}

impl ProgressBody {
    fn from_row(row: &ProgressRow) -> Self {
        Self {
            course_id: row.course_id.value(),
            completion_percentage: row.completion_percentage,
            last_validated_time: row.last_validated_time,
            is_completed: row.is_completed,
            updated_at: row.updated_at,
        }
    }

    fn into_row(self, user_id: UserId, lesson_id: LessonId) -> ProgressRow {
        ProgressRow {
            user_id,
            course_id: CourseId::new(self.course_id),
            lesson_id,
            completion_percentage: self.completion_percentage,
            last_validated_time: self.last_validated_time,
            is_completed: self.is_completed,
            updated_at: self.updated_at,
        }
    }
}

#[async_trait]
impl ProgressRepository for RemoteProgressStore {
    async fn upsert_progress(&self, row: &ProgressRow) -> Result<(), StorageError> {
        let response = self
            .client
            .put(self.progress_url(row.user_id, row.lesson_id))
            .json(&ProgressBody::from_row(row))
            .send()
            .await
            .map_err(http)?;

        if !response.status().is_success() {
            return Err(status(response.status()));
        }
        Ok(())
    }

    async fn get_progress(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
    ) -> Result<Option<ProgressRow>, StorageError> {
        let response = self
            .client
            .get(self.progress_url(user_id, lesson_id))
            .send()
            .await
            .map_err(http)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status(response.status()));
        }

        let body: ProgressBody = response.json().await.map_err(http)?;
        Ok(Some(body.into_row(user_id, lesson_id)))
    }

    async fn course_progress(
        &self,
        user_id: UserId,
        course_id: CourseId,
    ) -> Result<Vec<ProgressRow>, StorageError> {
        let url = format!(
            "{}/users/{user_id}/courses/{course_id}/progress",
            self.base_url
        );
        let response = self.client.get(url).send().await.map_err(http)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(status(response.status()));
        }

        let entries: Vec<CourseProgressEntry> = response.json().await.map_err(http)?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let lesson_id = LessonId::new(entry.lesson_id);
                entry.body.into_row(user_id, lesson_id)
            })
            .collect())
    }

    async fn mark_lesson_completed(
        &self,
        user_id: UserId,
        lesson_id: LessonId,
        at: DateTime<Utc>,
    ) -> Result<(), StorageError> {
        let url = format!(
            "{}/users/{user_id}/lessons/{lesson_id}/completed",
            self.base_url
        );
        let response = self
            .client
            .post(url)
            .json(&CompletedBody { completed_at: at })
            .send()
            .await
            .map_err(http)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound);
        }
        if !response.status().is_success() {
            return Err(status(response.status()));
        }
        Ok(())
    }
}
