#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tasksync_core::clock::ManualClock;
use tasksync_core::config::TaskSyncConfig;
use tasksync_core::detector::ChangeDetector;
use tasksync_core::document::{DocumentStore, MemoryDocumentStore};
use tasksync_core::ids::IdNormalizer;
use tasksync_core::journal::Journal;
use tasksync_core::lines::MarkdownLines;
use tasksync_core::remote::{
    CompletedPage, RemoteError, RemoteProject, RemoteSource, RemoteTask, RemoteTaskClient,
};
use tempfile::TempDir;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub fn start_time() -> DateTime<Utc> {
    "2026-03-02T09:00:00Z".parse().expect("timestamp")
}

pub fn remote_task(id: &str, completed: bool) -> RemoteTask {
    RemoteTask {
        id: id.to_string(),
        content: format!("Task {id}"),
        completed,
        due: None,
        project_id: Some("inbox".to_string()),
        is_deleted: false,
        source: RemoteSource::Single,
    }
}

/// Scripted remote service. Tasks answer single fetches; open tasks make
/// up the active listing and completed ones the per-project history.
#[derive(Default)]
pub struct FakeRemote {
    tasks: Mutex<HashMap<String, RemoteTask>>,
    scripted: Mutex<HashMap<String, VecDeque<RemoteError>>>,
    sticky: Mutex<HashMap<String, RemoteError>>,
    active_error: Mutex<Option<RemoteError>>,
    legacy: Mutex<HashMap<String, String>>,
    get_calls: Mutex<Vec<String>>,
    active_calls: AtomicU32,
    project_calls: AtomicU32,
    completed_calls: AtomicU32,
    mapping_calls: AtomicU32,
}

impl FakeRemote {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn put(&self, task: RemoteTask) {
        lock(&self.tasks).insert(task.id.clone(), task);
    }

    pub fn put_open(&self, id: &str) {
        self.put(remote_task(id, false));
    }

    pub fn put_completed(&self, id: &str) {
        self.put(remote_task(id, true));
    }

    pub fn delete(&self, id: &str) {
        lock(&self.tasks).remove(id);
    }

    /// Fails the next `times` single fetches of `id` with `error`.
    pub fn fail_times(&self, id: &str, error: RemoteError, times: usize) {
        let mut scripted = lock(&self.scripted);
        let queue = scripted.entry(id.to_string()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
    }

    /// Fails every single fetch of `id` until cleared.
    pub fn fail_always(&self, id: &str, error: RemoteError) {
        lock(&self.sticky).insert(id.to_string(), error);
    }

    pub fn clear_failures(&self, id: &str) {
        lock(&self.sticky).remove(id);
        lock(&self.scripted).remove(id);
    }

    pub fn fail_active(&self, error: RemoteError) {
        *lock(&self.active_error) = Some(error);
    }

    pub fn map_legacy(&self, legacy: &str, canonical: &str) {
        lock(&self.legacy).insert(legacy.to_string(), canonical.to_string());
    }

    pub fn get_calls_for(&self, id: &str) -> usize {
        lock(&self.get_calls).iter().filter(|called| *called == id).count()
    }

    pub fn get_calls(&self) -> usize {
        lock(&self.get_calls).len()
    }

    pub fn active_calls(&self) -> u32 {
        self.active_calls.load(Ordering::SeqCst)
    }

    pub fn project_calls(&self) -> u32 {
        self.project_calls.load(Ordering::SeqCst)
    }

    pub fn completed_calls(&self) -> u32 {
        self.completed_calls.load(Ordering::SeqCst)
    }

    pub fn mapping_calls(&self) -> u32 {
        self.mapping_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RemoteTaskClient for FakeRemote {
    async fn get_task(&self, id: &str) -> Result<RemoteTask, RemoteError> {
        lock(&self.get_calls).push(id.to_string());
        if let Some(err) = lock(&self.scripted).get_mut(id).and_then(VecDeque::pop_front) {
            return Err(err);
        }
        if let Some(err) = lock(&self.sticky).get(id) {
            return Err(err.clone());
        }
        lock(&self.tasks)
            .get(id)
            .cloned()
            .ok_or(RemoteError::NotFound)
    }

    async fn get_active_tasks(&self) -> Result<Vec<RemoteTask>, RemoteError> {
        self.active_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = lock(&self.active_error).clone() {
            return Err(err);
        }
        Ok(lock(&self.tasks)
            .values()
            .filter(|task| !task.completed)
            .map(|task| RemoteTask {
                source: RemoteSource::ActiveBulk,
                ..task.clone()
            })
            .collect())
    }

    async fn list_projects(&self) -> Result<Vec<RemoteProject>, RemoteError> {
        self.project_calls.fetch_add(1, Ordering::SeqCst);
        let ids: BTreeSet<String> = lock(&self.tasks)
            .values()
            .filter_map(|task| task.project_id.clone())
            .collect();
        Ok(ids
            .into_iter()
            .map(|id| RemoteProject {
                name: id.clone(),
                id,
            })
            .collect())
    }

    async fn completed_tasks_page(
        &self,
        project_id: &str,
        _cursor: Option<&str>,
    ) -> Result<CompletedPage, RemoteError> {
        self.completed_calls.fetch_add(1, Ordering::SeqCst);
        let items = lock(&self.tasks)
            .values()
            .filter(|task| task.completed && task.project_id.as_deref() == Some(project_id))
            .map(|task| RemoteTask {
                source: RemoteSource::CompletedBulk,
                ..task.clone()
            })
            .collect();
        Ok(CompletedPage {
            items,
            next_cursor: None,
        })
    }

    async fn map_legacy_ids(&self, ids: &[String]) -> Result<HashMap<String, String>, RemoteError> {
        self.mapping_calls.fetch_add(1, Ordering::SeqCst);
        let legacy = lock(&self.legacy);
        Ok(ids
            .iter()
            .filter_map(|id| legacy.get(id).map(|canonical| (id.clone(), canonical.clone())))
            .collect())
    }
}

/// A vault in memory, a state directory on disk, a manual clock and a
/// scripted remote.
pub struct Harness {
    pub dir: TempDir,
    pub clock: Arc<ManualClock>,
    pub docs: Arc<MemoryDocumentStore>,
    pub remote: Arc<FakeRemote>,
    pub config: TaskSyncConfig,
}

impl Harness {
    pub fn new() -> Self {
        let mut config = TaskSyncConfig::default();
        config.backoff.base_ms = 1;
        config.backoff.max_ms = 4;
        config.heal.batch_delay_ms = 0;
        config.heal.max_batch_delay_ms = 0;
        Self {
            dir: TempDir::new().expect("tempdir"),
            clock: Arc::new(ManualClock::new(start_time())),
            docs: Arc::new(MemoryDocumentStore::new()),
            remote: FakeRemote::new(),
            config,
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join(".tasksync")
    }

    pub fn now(&self) -> DateTime<Utc> {
        use tasksync_core::clock::Clock;
        self.clock.now()
    }

    pub fn advance(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }

    /// Writes a document stamped with the current time.
    pub fn write(&self, path: &str, text: &str) {
        self.docs.insert(path, text, self.now());
    }

    pub fn open_journal(&self) -> Journal {
        Journal::open(&self.state_dir(), self.config.journal.clone(), self.clock.clone())
            .expect("open journal")
    }

    pub fn detector(&self) -> ChangeDetector {
        let documents: Arc<dyn DocumentStore> = self.docs.clone();
        ChangeDetector::new(
            self.config.clone(),
            documents,
            Arc::new(MarkdownLines),
            self.remote.clone(),
            IdNormalizer::open(&self.state_dir()),
            self.clock.clone(),
        )
    }

    /// Opened and loaded journal plus a detector sharing this harness.
    pub async fn start(&self) -> (Journal, ChangeDetector) {
        let mut journal = self.open_journal();
        let mut detector = self.detector();
        detector
            .load_journal(&mut journal)
            .await
            .expect("load journal");
        (journal, detector)
    }
}
