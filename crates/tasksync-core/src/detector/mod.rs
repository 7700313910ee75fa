//! Reconciliation cycle: discovery, per-task comparison and bulk healing.
//!
//! The detector owns no task state. Every mutation goes through the
//! `&mut Journal` handed to each operation; the detector only keeps the
//! transient caches that bound API usage within and across cycles.

pub mod compare;
pub mod discovery;
pub mod heal;
pub mod policy;
pub mod retry;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::activity::{ActivityEvent, ActivityKind, ActivityLog};
use crate::clock::Clock;
use crate::config::TaskSyncConfig;
use crate::document::{DocumentError, DocumentStore};
use crate::gateway::RemoteGateway;
use crate::ids::IdNormalizer;
use crate::instruction::SyncInstruction;
use crate::journal::model::{TombstoneReason, TrackedTask};
use crate::journal::{Journal, JournalError, LoadReport};
use crate::lines::LineClassifier;
use crate::remote::{RemoteError, RemoteTask, RemoteTaskClient};

use policy::SyncPolicy;
use retry::RetryPolicy;

pub use discovery::{DiscoveryReport, LinkedTask, ScanMode};
pub use heal::{HealAbort, HealReport, HealSkip, HealStage};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Document(#[from] DocumentError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error("Bulk fetch of active tasks failed: {0}")]
    BulkFetchFailed(RemoteError),
}

/// What one reconciliation cycle produced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChangeSet {
    pub new_tasks: Vec<TrackedTask>,
    pub modified_tasks: Vec<String>,
    pub instructions: Vec<SyncInstruction>,
    pub discovery: DiscoveryReport,
    pub checked: usize,
    pub api_calls: u32,
}

/// Remote tasks retained from the last bulk fetch.
#[derive(Debug, Clone)]
pub(crate) struct BulkCache {
    pub fetched_at: DateTime<Utc>,
    pub tasks: HashMap<String, RemoteTask>,
}

pub struct ChangeDetector {
    config: TaskSyncConfig,
    policy: SyncPolicy,
    retry: RetryPolicy,
    documents: Arc<dyn DocumentStore>,
    lines: Arc<dyn LineClassifier>,
    gateway: RemoteGateway,
    ids: IdNormalizer,
    activity: Option<ActivityLog>,
    clock: Arc<dyn Clock>,
    bulk_cache: Option<BulkCache>,
    cycle_cache: HashMap<String, RemoteTask>,
    /// Tracked tasks whose line flipped completion during a scan and have
    /// not been compared since.
    local_flips: BTreeSet<String>,
    last_heal_at: Option<DateTime<Utc>>,
}

impl ChangeDetector {
    pub fn new(
        config: TaskSyncConfig,
        documents: Arc<dyn DocumentStore>,
        lines: Arc<dyn LineClassifier>,
        client: Arc<dyn RemoteTaskClient>,
        ids: IdNormalizer,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy: SyncPolicy::from_config(&config.sync),
            retry: RetryPolicy::from_config(&config.discovery),
            gateway: RemoteGateway::new(client, config.backoff.clone()),
            config,
            documents,
            lines,
            ids,
            activity: None,
            clock,
            bulk_cache: None,
            cycle_cache: HashMap::new(),
            local_flips: BTreeSet::new(),
            last_heal_at: None,
        }
    }

    pub fn with_activity_log(mut self, log: ActivityLog) -> Self {
        self.activity = Some(log);
        self
    }

    pub fn config(&self) -> &TaskSyncConfig {
        &self.config
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn gateway(&self) -> &RemoteGateway {
        &self.gateway
    }

    pub fn ids(&self) -> &IdNormalizer {
        &self.ids
    }

    /// Loads `journal` with this detector's id normalizer and gateway, so
    /// legacy keys can be migrated.
    pub async fn load_journal(&mut self, journal: &mut Journal) -> Result<LoadReport, JournalError> {
        journal.load(&mut self.ids, &self.gateway).await
    }

    pub fn should_check_remote_now(&self, journal: &Journal, task: &TrackedTask) -> bool {
        policy::should_check_remote_now(
            task,
            journal.is_task_deleted(&task.remote_id),
            &self.policy,
            self.clock.now(),
        )
    }

    /// Runs one reconciliation cycle.
    ///
    /// Discovery and the retry queue run first and are saved before any
    /// comparison. Per-task failures are logged and skipped; journal write
    /// failures end the cycle.
    pub async fn detect_changes(&mut self, journal: &mut Journal) -> Result<ChangeSet, SyncError> {
        let started = Instant::now();
        let cycle_start = self.clock.now();
        self.gateway.begin_cycle();
        self.cycle_cache.clear();

        let mut changes = ChangeSet::default();
        changes.discovery = self
            .discover_new_tasks(journal, &mut changes.new_tasks, cycle_start)
            .await?;
        changes.discovery.retried = self
            .process_retry_queue(journal, &mut changes.new_tasks)
            .await?;
        journal.flush()?;

        let due = self.due_for_comparison(journal);
        tracing::debug!(due = due.len(), "tasks due for comparison");
        for id in due {
            changes.checked += 1;
            match self.compare_task(journal, &id, &mut changes).await {
                Ok(()) => {
                    self.local_flips.remove(&id);
                }
                Err(SyncError::Journal(err)) => return Err(err.into()),
                Err(err) => {
                    tracing::warn!(task_id = %id, error = %err, "comparison failed; will retry next cycle");
                }
            }
            journal.flush_if_due()?;
        }

        changes.api_calls = self.gateway.cycle_calls();
        journal.record_new_tasks(changes.new_tasks.len());
        journal.record_cycle(changes.api_calls, started.elapsed().as_secs_f64() * 1000.0);
        journal.flush()?;
        if let Err(err) = self.ids.save() {
            tracing::warn!(error = %err, "failed to persist id cache");
        }

        tracing::info!(
            new_tasks = changes.new_tasks.len(),
            modified = changes.modified_tasks.len(),
            instructions = changes.instructions.len(),
            api_calls = changes.api_calls,
            "sync cycle complete"
        );
        Ok(changes)
    }

    /// Tasks whose line flipped go first, whatever their schedule says; then
    /// the policy's picks in priority order.
    fn due_for_comparison(&mut self, journal: &Journal) -> Vec<String> {
        self.local_flips
            .retain(|id| journal.is_tracked(id) && !journal.is_task_deleted(id));
        let mut due: Vec<String> = self.local_flips.iter().cloned().collect();
        due.extend(
            journal
                .tasks_needing_sync(&self.policy, self.clock.now())
                .into_iter()
                .filter(|id| !self.local_flips.contains(id)),
        );
        due
    }

    /// Remote object for `id` without a network call, from the bulk cache
    /// (while fresh) or this cycle's fetches. Returns the time it was read.
    pub(crate) fn cached_remote(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> Option<(RemoteTask, DateTime<Utc>)> {
        if let Some(cache) = &self.bulk_cache {
            if now - cache.fetched_at <= self.config.sync.bulk_cache_ttl() {
                if let Some(task) = cache.tasks.get(id) {
                    return Some((task.clone(), cache.fetched_at));
                }
            }
        }
        self.cycle_cache.get(id).map(|task| (task.clone(), now))
    }

    /// Cached remote object, else one guarded fetch. Tombstoned ids never
    /// reach the network.
    pub(crate) async fn fetch_remote(
        &mut self,
        journal: &Journal,
        id: &str,
    ) -> Result<(RemoteTask, DateTime<Utc>), RemoteError> {
        if journal.is_task_deleted(id) {
            return Err(RemoteError::Gone);
        }
        let now = self.clock.now();
        if let Some(hit) = self.cached_remote(id, now) {
            return Ok(hit);
        }
        let task = self.gateway.get_task(id).await?;
        self.cycle_cache.insert(id.to_string(), task.clone());
        Ok((task, now))
    }

    pub(crate) fn tombstone(
        &self,
        journal: &mut Journal,
        id: &str,
        reason: TombstoneReason,
        last_known_path: Option<String>,
        http_status: Option<u16>,
        note: &str,
    ) {
        tracing::info!(task_id = %id, reason = reason.as_str(), ?http_status, "tombstoning task");
        journal.mark_as_deleted(id, reason, last_known_path, http_status, Some(note.to_string()));
        self.record_activity(
            ActivityKind::TaskTombstoned,
            Some(id),
            json!({"reason": reason.as_str(), "http_status": http_status, "note": note}),
        );
    }

    pub(crate) fn record_activity(
        &self,
        kind: ActivityKind,
        task_id: Option<&str>,
        details: serde_json::Value,
    ) {
        if let Some(log) = &self.activity {
            log.record(ActivityEvent {
                timestamp: self.clock.now(),
                kind,
                task_id: task_id.map(str::to_string),
                details,
            });
        }
    }
}
