use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote task not found")]
    NotFound,
    #[error("remote task is not accessible")]
    Forbidden,
    #[error("remote task is gone")]
    Gone,
    #[error("rate limited by remote service")]
    RateLimited { retry_after_secs: Option<u64> },
    #[error("remote service returned status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to decode remote response: {0}")]
    Decode(String),
}

impl RemoteError {
    pub fn from_status(status: u16, retry_after_secs: Option<u64>) -> Self {
        match status {
            404 => RemoteError::NotFound,
            403 => RemoteError::Forbidden,
            410 => RemoteError::Gone,
            429 => RemoteError::RateLimited { retry_after_secs },
            other => RemoteError::Status(other),
        }
    }

    pub fn http_status(&self) -> Option<u16> {
        match self {
            RemoteError::NotFound => Some(404),
            RemoteError::Forbidden => Some(403),
            RemoteError::Gone => Some(410),
            RemoteError::RateLimited { .. } => Some(429),
            RemoteError::Status(code) => Some(*code),
            RemoteError::Network(_) | RemoteError::Decode(_) => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }

    /// Errors that say the task will never be readable again.
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            RemoteError::NotFound | RemoteError::Forbidden | RemoteError::Gone
        )
    }
}

/// Which fetch path produced a [`RemoteTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteSource {
    Single,
    ActiveBulk,
    CompletedBulk,
}

/// The one internal shape of a remote task, whatever endpoint it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTask {
    pub id: String,
    pub content: String,
    pub completed: bool,
    pub due: Option<String>,
    pub project_id: Option<String>,
    pub is_deleted: bool,
    pub source: RemoteSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemoteProject {
    pub id: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletedPage {
    pub items: Vec<RemoteTask>,
    pub next_cursor: Option<String>,
}

/// Task object as returned by single-task and active-task endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiTask {
    pub id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "is_completed")]
    pub checked: bool,
    #[serde(default)]
    pub is_deleted: bool,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub due: Option<ApiDue>,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiDue {
    #[serde(default)]
    pub date: Option<String>,
}

/// Entry of the completed-items endpoint; carries the task id under
/// `task_id` in older API generations.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletedItem {
    #[serde(default)]
    pub task_id: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub completed_at: Option<String>,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub due: Option<ApiDue>,
}

impl ApiTask {
    pub fn into_remote(self, source: RemoteSource) -> RemoteTask {
        RemoteTask {
            completed: self.checked || self.completed_at.is_some(),
            id: self.id,
            content: self.content,
            due: self.due.and_then(|due| due.date),
            project_id: self.project_id,
            is_deleted: self.is_deleted,
            source,
        }
    }
}

impl CompletedItem {
    /// Items without any identifier are dropped.
    pub fn into_remote(self) -> Option<RemoteTask> {
        let id = self.task_id.or(self.id)?;
        Some(RemoteTask {
            id,
            content: self.content,
            completed: true,
            due: self.due.and_then(|due| due.date),
            project_id: self.project_id,
            is_deleted: false,
            source: RemoteSource::CompletedBulk,
        })
    }
}

/// Client for the remote task service.
#[async_trait]
pub trait RemoteTaskClient: Send + Sync {
    async fn get_task(&self, id: &str) -> Result<RemoteTask, RemoteError>;

    /// Every currently open task, in one logical call.
    async fn get_active_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError>;

    async fn list_projects(&self) -> Result<Vec<RemoteProject>, RemoteError>;

    async fn completed_tasks_page(
        &self,
        project_id: &str,
        cursor: Option<&str>,
    ) -> Result<CompletedPage, RemoteError>;

    /// Maps legacy numeric ids to canonical ids; ids without a mapping are omitted.
    async fn map_legacy_ids(&self, ids: &[String]) -> Result<HashMap<String, String>, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_task_adapter_reads_both_completion_flags() {
        let task: ApiTask = serde_json::from_str(
            r#"{"id":"6X7rM8997g3RQmvh","content":"Buy milk","is_completed":true,"due":{"date":"2026-03-01"}}"#,
        )
        .expect("parse");
        let remote = task.into_remote(RemoteSource::Single);
        assert!(remote.completed);
        assert_eq!(remote.due.as_deref(), Some("2026-03-01"));

        let task: ApiTask =
            serde_json::from_str(r#"{"id":"a1","content":"x","checked":false}"#).expect("parse");
        assert!(!task.into_remote(RemoteSource::ActiveBulk).completed);
    }

    #[test]
    fn completed_item_adapter_prefers_task_id() {
        let item: CompletedItem = serde_json::from_str(
            r#"{"id":"row-1","task_id":"t-9","content":"Done thing","completed_at":"2026-01-01T00:00:00Z"}"#,
        )
        .expect("parse");
        let remote = item.into_remote().expect("id");
        assert_eq!(remote.id, "t-9");
        assert!(remote.completed);
        assert_eq!(remote.source, RemoteSource::CompletedBulk);
    }

    #[test]
    fn status_mapping() {
        assert_eq!(RemoteError::from_status(404, None), RemoteError::NotFound);
        assert!(RemoteError::from_status(429, Some(3)).is_rate_limited());
        assert!(RemoteError::from_status(403, None).is_permanent());
        assert!(!RemoteError::from_status(503, None).is_permanent());
    }
}
