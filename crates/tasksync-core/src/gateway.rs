use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;

use crate::config::BackoffConfig;
use crate::remote::{CompletedPage, RemoteError, RemoteProject, RemoteTask, RemoteTaskClient};

/// Every remote call in the engine goes through here: each attempt is
/// counted, and only rate-limit responses are retried (with exponential
/// backoff). Other errors return on the first attempt.
pub struct RemoteGateway {
    client: Arc<dyn RemoteTaskClient>,
    backoff: BackoffConfig,
    total_calls: AtomicU32,
    cycle_calls: AtomicU32,
}

impl RemoteGateway {
    pub fn new(client: Arc<dyn RemoteTaskClient>, backoff: BackoffConfig) -> Self {
        Self {
            client,
            backoff,
            total_calls: AtomicU32::new(0),
            cycle_calls: AtomicU32::new(0),
        }
    }

    /// Resets the per-cycle call counter.
    pub fn begin_cycle(&self) {
        self.cycle_calls.store(0, Ordering::Relaxed);
    }

    pub fn cycle_calls(&self) -> u32 {
        self.cycle_calls.load(Ordering::Relaxed)
    }

    pub fn total_calls(&self) -> u32 {
        self.total_calls.load(Ordering::Relaxed)
    }

    pub async fn get_task(&self, id: &str) -> Result<RemoteTask, RemoteError> {
        self.with_backoff("get_task", || self.client.get_task(id))
            .await
    }

    pub async fn get_active_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.with_backoff("get_active_tasks", || self.client.get_active_tasks())
            .await
    }

    pub async fn list_projects(&self) -> Result<Vec<RemoteProject>, RemoteError> {
        self.with_backoff("list_projects", || self.client.list_projects())
            .await
    }

    pub async fn completed_tasks_page(
        &self,
        project_id: &str,
        cursor: Option<&str>,
    ) -> Result<CompletedPage, RemoteError> {
        self.with_backoff("completed_tasks_page", || {
            self.client.completed_tasks_page(project_id, cursor)
        })
        .await
    }

    pub async fn map_legacy_ids(
        &self,
        ids: &[String],
    ) -> Result<HashMap<String, String>, RemoteError> {
        self.with_backoff("map_legacy_ids", || self.client.map_legacy_ids(ids))
            .await
    }

    /// Single attempt, no retry. Used where a 429 must end the operation
    /// (bulk healing reports it instead of waiting).
    pub async fn get_active_tasks_once(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.count();
        self.client.get_active_tasks().await
    }

    fn count(&self) {
        self.total_calls.fetch_add(1, Ordering::Relaxed);
        self.cycle_calls.fetch_add(1, Ordering::Relaxed);
    }

    async fn with_backoff<T, F, Fut>(&self, op: &str, mut call: F) -> Result<T, RemoteError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut attempt = 0u32;
        loop {
            self.count();
            match call().await {
                Err(RemoteError::RateLimited { retry_after_secs })
                    if attempt < self.backoff.max_retries =>
                {
                    let delay = self.retry_delay(attempt, retry_after_secs);
                    tracing::warn!(
                        op,
                        attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited; backing off"
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                other => return other,
            }
        }
    }

    fn retry_delay(&self, attempt: u32, retry_after_secs: Option<u64>) -> Duration {
        let backoff = self.backoff.delay_for(attempt);
        let server = retry_after_secs
            .map(|secs| Duration::from_secs(secs).min(Duration::from_millis(self.backoff.max_ms)))
            .unwrap_or_default();
        backoff.max(server)
    }
}
