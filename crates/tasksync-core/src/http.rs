use std::collections::HashMap;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::config::RemoteConfig;
use crate::remote::{
    ApiTask, CompletedItem, CompletedPage, RemoteError, RemoteProject, RemoteSource, RemoteTask,
    RemoteTaskClient,
};

const PAGE_LIMIT: usize = 200;
// The completed-by-date endpoint rejects windows longer than three months.
const COMPLETED_WINDOW_DAYS: i64 = 89;

#[derive(Debug, Error)]
pub enum HttpClientError {
    #[error("missing API token in env var {0}")]
    MissingToken(String),
    #[error("failed to build HTTP client: {0}")]
    Build(#[from] reqwest::Error),
}

/// `RemoteTaskClient` over the task service's REST API.
#[derive(Debug, Clone)]
pub struct HttpTaskClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpTaskClient {
    pub fn new(
        base_url: &str,
        token: &str,
        timeout: StdDuration,
    ) -> Result<Self, HttpClientError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            token: token.to_owned(),
        })
    }

    pub fn from_config(config: &RemoteConfig) -> Result<Self, HttpClientError> {
        let token = std::env::var(&config.token_env)
            .ok()
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| HttpClientError::MissingToken(config.token_env.clone()))?;
        Self::new(
            &config.base_url,
            &token,
            StdDuration::from_secs(config.timeout_secs),
        )
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, RemoteError> {
        let response = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .query(query)
            .send()
            .await
            .map_err(|err| RemoteError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.trim().parse::<u64>().ok());
            return Err(RemoteError::from_status(status.as_u16(), retry_after));
        }

        response
            .json::<T>()
            .await
            .map_err(|err| RemoteError::Decode(err.to_string()))
    }
}

#[async_trait]
impl RemoteTaskClient for HttpTaskClient {
    async fn get_task(&self, id: &str) -> Result<RemoteTask, RemoteError> {
        let task: ApiTask = self.get_json(&format!("tasks/{id}"), &[]).await?;
        Ok(task.into_remote(RemoteSource::Single))
    }

    async fn get_active_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        let mut tasks = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![("limit", PAGE_LIMIT.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }
            let page: Paginated<ApiTask> = self.get_json("tasks", &query).await?;
            tasks.extend(
                page.results
                    .into_iter()
                    .map(|task| task.into_remote(RemoteSource::ActiveBulk)),
            );
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tasks)
    }

    async fn list_projects(&self) -> Result<Vec<RemoteProject>, RemoteError> {
        let mut projects = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let mut query = vec![("limit", PAGE_LIMIT.to_string())];
            if let Some(cursor) = &cursor {
                query.push(("cursor", cursor.clone()));
            }
            let page: Paginated<RemoteProject> = self.get_json("projects", &query).await?;
            projects.extend(page.results);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(projects)
    }

    async fn completed_tasks_page(
        &self,
        project_id: &str,
        cursor: Option<&str>,
    ) -> Result<CompletedPage, RemoteError> {
        let until = Utc::now();
        let since = until - Duration::days(COMPLETED_WINDOW_DAYS);
        let mut query = vec![
            ("project_id", project_id.to_owned()),
            ("since", since.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ("until", until.format("%Y-%m-%dT%H:%M:%SZ").to_string()),
            ("limit", PAGE_LIMIT.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_owned()));
        }
        let page: CompletedResponse = self
            .get_json("tasks/completed/by_completion_date", &query)
            .await?;
        Ok(CompletedPage {
            items: page
                .items
                .into_iter()
                .filter_map(CompletedItem::into_remote)
                .collect(),
            next_cursor: page.next_cursor.filter(|next| !next.is_empty()),
        })
    }

    async fn map_legacy_ids(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>, RemoteError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let mappings: Vec<IdMapping> = self
            .get_json(&format!("id_mappings/tasks/{}", ids.join(",")), &[])
            .await?;
        Ok(mappings
            .into_iter()
            .filter(|mapping| !mapping.new_id.is_empty())
            .map(|mapping| (mapping.old_id, mapping.new_id))
            .collect())
    }
}

#[derive(Debug, Deserialize)]
struct Paginated<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CompletedResponse {
    #[serde(default)]
    items: Vec<CompletedItem>,
    #[serde(default)]
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdMapping {
    old_id: String,
    new_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        let client = HttpTaskClient::new(
            "https://api.example.test/api/v1/",
            "token",
            StdDuration::from_secs(5),
        )
        .expect("client");
        assert_eq!(
            client.url("/tasks/abc"),
            "https://api.example.test/api/v1/tasks/abc"
        );
    }

    #[test]
    fn from_config_requires_token() {
        let config = RemoteConfig {
            token_env: "TASKSYNC_TEST_TOKEN_THAT_IS_NOT_SET".to_string(),
            ..RemoteConfig::default()
        };
        let err = HttpTaskClient::from_config(&config).expect_err("missing token");
        assert!(matches!(err, HttpClientError::MissingToken(_)));
    }

    #[test]
    fn paginated_response_tolerates_missing_cursor() {
        let page: Paginated<ApiTask> =
            serde_json::from_str(r#"{"results":[{"id":"a","content":"x"}]}"#).expect("parse");
        assert_eq!(page.results.len(), 1);
        assert!(page.next_cursor.is_none());
    }
}
