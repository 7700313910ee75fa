//! The journal: durable record of every tracked task and every tombstone.
//!
//! A `Journal` is an explicit service. It is opened against a state
//! directory (taking an exclusive lock), loaded once, and then handed by
//! `&mut` reference to whatever needs to mutate it. All mutations go through
//! its methods, which keep the derived category current and schedule the
//! debounced save.

pub mod autosave;
pub mod backup;
pub mod migration;
pub mod model;
pub mod persist;

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::clock::Clock;
use crate::config::JournalConfig;
use crate::detector::policy::{class_of, should_check_remote_now, SyncPolicy};
use crate::gateway::RemoteGateway;
use crate::ids::IdNormalizer;
use crate::instruction::{SyncDirection, SyncInstruction};
use crate::remote::RemoteError;

use autosave::DebouncedWriter;
use backup::{BackupCategory, BackupInfo};
use model::{
    CompletionCategory, JournalData, JournalStats, PendingDiscovery, Tombstone, TombstoneReason,
    TrackedTask, TaskUpdate,
};

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Journal IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Journal at {0} is locked by another process")]
    Locked(PathBuf),
    #[error("Journal failed validation: {0}")]
    Validation(String),
    #[error("Journal at {path} is unreadable and no backup could restore it: {reason}")]
    Unrecoverable { path: PathBuf, reason: String },
    #[error("ID migration would change task count from {before} to {after}; kept the pre-migration journal")]
    MigrationCountMismatch { before: usize, after: usize },
    #[error("ID lookup failed during migration: {0}")]
    Remote(#[from] RemoteError),
    #[error("Backup {path} is not usable: {reason}")]
    InvalidBackup { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "path")]
pub enum LoadSource {
    /// No journal existed; started empty.
    Fresh,
    Primary,
    Backup(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub source: LoadSource,
    pub tasks: usize,
    pub tombstones: usize,
    pub migrated: usize,
    pub repaired_overlaps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JournalSummary {
    pub tasks: usize,
    pub tombstones: usize,
    pub orphaned: usize,
    pub pending_discoveries: usize,
    pub categories: BTreeMap<CompletionCategory, usize>,
    pub tombstone_reasons: BTreeMap<TombstoneReason, usize>,
    pub last_scan_at: Option<DateTime<Utc>>,
    pub last_full_scan_at: Option<DateTime<Utc>>,
    pub last_validation_at: Option<DateTime<Utc>>,
    pub stats: JournalStats,
}

pub struct Journal {
    state_dir: PathBuf,
    path: PathBuf,
    config: JournalConfig,
    clock: Arc<dyn Clock>,
    data: JournalData,
    writer: DebouncedWriter,
    last_routine_backup_at: Option<DateTime<Utc>>,
    loaded: bool,
    _lock: File,
}

impl Journal {
    /// Opens the journal rooted at `state_dir`. Nothing is read until [`load`](Self::load).
    pub fn open(
        state_dir: &Path,
        config: JournalConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, JournalError> {
        let lock = persist::try_lock(state_dir)?
            .ok_or_else(|| JournalError::Locked(state_dir.to_path_buf()))?;
        let last_routine_backup_at =
            backup::latest_backup(state_dir, BackupCategory::Routine)?.map(|info| info.created_at);
        Ok(Self {
            state_dir: state_dir.to_path_buf(),
            path: persist::journal_path(state_dir),
            writer: DebouncedWriter::new(config.debounce()),
            config,
            clock,
            data: JournalData::default(),
            last_routine_backup_at,
            loaded: false,
            _lock: lock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Reads the persisted journal, recovering from backups and migrating
    /// legacy ids as needed. On an unrecoverable file the in-memory state is
    /// left untouched and an error is returned.
    pub async fn load(
        &mut self,
        ids: &mut IdNormalizer,
        gateway: &RemoteGateway,
    ) -> Result<LoadReport, JournalError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == io::ErrorKind::NotFound => None,
            Err(err) => return Err(err.into()),
        };

        let Some(bytes) = bytes else {
            self.data = JournalData::default();
            self.loaded = true;
            self.writer.mark_clean();
            tracing::info!(path = %self.path.display(), "no journal yet; starting empty");
            return Ok(self.report(LoadSource::Fresh, 0, 0));
        };

        let (mut data, source) = match self.assess(&bytes) {
            Ok(data) => {
                if let Err(err) = self.snapshot_bytes(BackupCategory::Load, &bytes) {
                    tracing::warn!(error = %err, "failed to record load backup");
                }
                (data, LoadSource::Primary)
            }
            Err(reason) => {
                tracing::error!(path = %self.path.display(), %reason, "journal is damaged; recovering from backup");
                self.quarantine();
                let (data, from) = self.recover_from_backups(&reason)?;
                (data, LoadSource::Backup(from))
            }
        };

        let repaired = data.repair_overlaps().len();
        if repaired > 0 {
            tracing::warn!(repaired, "removed tombstones that overlapped active tasks");
        }
        data.stats.total_tasks = data.tasks.len();
        self.data = data;
        self.loaded = true;
        self.writer.mark_clean();

        let mut migrated = 0;
        if migration::needs_migration(&self.data) {
            migrated = self.migrate_ids(ids, gateway).await?;
        }

        let needs_write = repaired > 0 || migrated > 0 || matches!(source, LoadSource::Backup(_));
        if needs_write {
            self.save()?;
        }
        tracing::info!(
            tasks = self.data.tasks.len(),
            tombstones = self.data.deleted.len(),
            migrated,
            "journal loaded"
        );
        Ok(self.report(source, migrated, repaired))
    }

    fn report(&self, source: LoadSource, migrated: usize, repaired_overlaps: usize) -> LoadReport {
        LoadReport {
            source,
            tasks: self.data.tasks.len(),
            tombstones: self.data.deleted.len(),
            migrated,
            repaired_overlaps,
        }
    }

    /// Parses persisted bytes and rejects files that parse but look gutted.
    fn assess(&self, bytes: &[u8]) -> Result<JournalData, String> {
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err("journal file is empty".to_string());
        }
        let data: JournalData =
            serde_json::from_slice(bytes).map_err(|err| format!("journal does not parse: {err}"))?;
        if data.tasks.is_empty() {
            if data.stats.total_tasks > 0 {
                return Err(format!(
                    "journal has no tasks but its stats record {}",
                    data.stats.total_tasks
                ));
            }
            if bytes.len() > self.config.non_trivial_bytes
                && data.deleted.is_empty()
                && data.pending_discoveries.is_empty()
            {
                return Err(format!(
                    "journal has no tasks despite being {} bytes",
                    bytes.len()
                ));
            }
        }
        Ok(data)
    }

    /// Newest backup that parses and holds at least one task.
    fn recover_from_backups(&self, reason: &str) -> Result<(JournalData, PathBuf), JournalError> {
        let backups = backup::list_backups(&self.state_dir)?;
        let tried = backups.len();
        for info in backups {
            let data = fs::read(&info.path)
                .map_err(|err| err.to_string())
                .and_then(|bytes| {
                    serde_json::from_slice::<JournalData>(&bytes).map_err(|err| err.to_string())
                });
            match data {
                Ok(data) if !data.tasks.is_empty() => {
                    tracing::warn!(
                        backup = %info.path.display(),
                        tasks = data.tasks.len(),
                        "recovered journal from backup"
                    );
                    return Ok((data, info.path));
                }
                Ok(_) => {
                    tracing::debug!(backup = %info.path.display(), "backup holds no tasks; skipping");
                }
                Err(err) => {
                    tracing::debug!(backup = %info.path.display(), error = %err, "backup unreadable; skipping");
                }
            }
        }
        tracing::error!(
            path = %self.path.display(),
            backups_tried = tried,
            "journal could not be recovered; keeping in-memory state"
        );
        Err(JournalError::Unrecoverable {
            path: self.path.clone(),
            reason: format!("{reason}; {tried} backups tried"),
        })
    }

    /// Keeps a copy of a damaged primary file next to it.
    fn quarantine(&self) {
        let stamp = self.clock.now().format("%Y%m%dT%H%M%S%3fZ");
        let target = self
            .state_dir
            .join(format!("journal.v2.corrupt.{stamp}.json"));
        if let Err(err) = fs::copy(&self.path, &target) {
            tracing::warn!(error = %err, "failed to preserve damaged journal");
        }
    }

    async fn migrate_ids(
        &mut self,
        ids: &mut IdNormalizer,
        gateway: &RemoteGateway,
    ) -> Result<usize, JournalError> {
        let legacy = migration::legacy_keys(&self.data);
        let mapping = ids.canonicalize_many(gateway, &legacy).await?;
        if let Err(err) = ids.save() {
            tracing::warn!(error = %err, "failed to persist id cache");
        }
        if mapping.iter().all(|(legacy, canonical)| legacy == canonical) {
            tracing::debug!(count = legacy.len(), "legacy ids have no mapping yet; nothing to migrate");
            return Ok(0);
        }

        tracing::info!(count = legacy.len(), "migrating legacy task ids");
        self.create_backup(BackupCategory::Migration)?;

        let outcome = match migration::migrate_keys(&self.data, &mapping) {
            Ok(outcome) => outcome,
            Err(mismatch) => {
                tracing::error!(
                    before = mismatch.before,
                    after = mismatch.after,
                    "id migration would lose tasks; keeping pre-migration journal"
                );
                return Err(JournalError::MigrationCountMismatch {
                    before: mismatch.before,
                    after: mismatch.after,
                });
            }
        };

        if outcome.data.tasks.is_empty() && !self.data.tasks.is_empty() {
            let (data, from) = self.recover_from_backups("migration produced an empty journal")?;
            tracing::warn!(backup = %from.display(), "restored journal after empty migration");
            self.data = data;
            return Ok(0);
        }

        self.data = outcome.data;
        Ok(outcome.migrated_tasks + outcome.migrated_tombstones)
    }

    /// Writes the journal now: validate, routine backup, verified atomic write.
    pub fn save(&mut self) -> Result<(), JournalError> {
        self.save_with(|_| Ok(()))
    }

    /// [`save`](Self::save) with a hook that runs between the verified temp
    /// write and the rename over the primary file.
    pub fn save_with<F>(&mut self, before_rename: F) -> Result<(), JournalError>
    where
        F: FnOnce(&Path) -> io::Result<()>,
    {
        if !self.loaded && self.path.exists() {
            return Err(JournalError::Validation(
                "journal was never loaded; refusing to overwrite the file on disk".to_string(),
            ));
        }
        let repaired = self.data.repair_overlaps();
        if !repaired.is_empty() {
            tracing::warn!(ids = ?repaired, "removed tombstones that overlapped active tasks");
        }
        self.data.stats.total_tasks = self.data.tasks.len();
        let bytes = persist::serialize_checked(&self.data).map_err(JournalError::Validation)?;

        self.routine_backup();
        persist::write_verified_with(&self.path, &bytes, before_rename)?;
        self.writer.mark_clean();
        tracing::debug!(tasks = self.data.tasks.len(), "journal saved");
        Ok(())
    }

    /// Copies the current primary file aside before it is replaced, at most
    /// once per configured interval.
    fn routine_backup(&mut self) {
        let now = self.clock.now();
        let throttled = self
            .last_routine_backup_at
            .map(|at| now - at < self.config.routine_backup_min_interval())
            .unwrap_or(false);
        if throttled {
            return;
        }
        let bytes = match fs::read(&self.path) {
            Ok(bytes) if !bytes.is_empty() => bytes,
            _ => return,
        };
        match self.snapshot_bytes(BackupCategory::Routine, &bytes) {
            Ok(_) => self.last_routine_backup_at = Some(now),
            Err(err) => tracing::warn!(error = %err, "routine backup failed"),
        }
    }

    fn snapshot_bytes(&self, category: BackupCategory, bytes: &[u8]) -> io::Result<PathBuf> {
        let path = backup::write_backup(&self.state_dir, category, bytes, self.clock.now())?;
        let removed =
            backup::prune_backups(&self.state_dir, category, self.config.retention_for(category))?;
        if !removed.is_empty() {
            tracing::debug!(category = category.as_str(), removed = removed.len(), "pruned backups");
        }
        Ok(path)
    }

    /// Backs up the in-memory journal under `category`.
    pub fn create_backup(&mut self, category: BackupCategory) -> Result<PathBuf, JournalError> {
        let bytes = persist::serialize_checked(&self.data).map_err(JournalError::Validation)?;
        let path = self.snapshot_bytes(category, &bytes)?;
        if category == BackupCategory::Routine {
            self.last_routine_backup_at = Some(self.clock.now());
        }
        tracing::info!(category = category.as_str(), path = %path.display(), "journal backup created");
        Ok(path)
    }

    pub fn list_backups(&self) -> Result<Vec<BackupInfo>, JournalError> {
        Ok(backup::list_backups(&self.state_dir)?)
    }

    /// Replaces the journal with a backup's contents, after backing up the
    /// current state. Returns the number of tasks restored.
    pub fn restore_from_backup(&mut self, path: &Path) -> Result<usize, JournalError> {
        let bytes = fs::read(path).map_err(|err| JournalError::InvalidBackup {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let mut data: JournalData =
            serde_json::from_slice(&bytes).map_err(|err| JournalError::InvalidBackup {
                path: path.to_path_buf(),
                reason: err.to_string(),
            })?;
        self.create_backup(BackupCategory::PreRestore)?;
        data.repair_overlaps();
        self.data = data;
        self.loaded = true;
        self.save()?;
        tracing::info!(path = %path.display(), tasks = self.data.tasks.len(), "journal restored from backup");
        Ok(self.data.tasks.len())
    }

    /// Empties the journal after backing it up.
    pub fn reset(&mut self) -> Result<PathBuf, JournalError> {
        let backup = self.create_backup(BackupCategory::Reset)?;
        self.data = JournalData::default();
        self.loaded = true;
        self.save()?;
        tracing::warn!(backup = %backup.display(), "journal reset");
        Ok(backup)
    }

    fn touch(&mut self) {
        let now = self.clock.now();
        self.writer.mark_dirty(now);
    }

    /// Saves if the debounce window has passed since the last mutation.
    pub fn flush_if_due(&mut self) -> Result<bool, JournalError> {
        if self.writer.is_due(self.clock.now()) {
            self.save()?;
            return Ok(true);
        }
        Ok(false)
    }

    /// Saves now if anything changed, regardless of debounce or suspension.
    pub fn flush(&mut self) -> Result<bool, JournalError> {
        if self.writer.is_dirty() {
            self.save()?;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn is_dirty(&self) -> bool {
        self.writer.is_dirty()
    }

    pub fn autosave_due_at(&self) -> Option<DateTime<Utc>> {
        self.writer.due_at()
    }

    pub fn suspend_auto_save(&mut self) {
        self.writer.suspend();
    }

    /// Ends a suspension. The caller still owns the final [`flush`](Self::flush).
    pub fn resume_auto_save(&mut self) {
        self.writer.resume();
    }

    pub fn is_auto_save_suspended(&self) -> bool {
        self.writer.is_suspended()
    }

    // Tasks

    /// Starts tracking `task`. Tombstoned ids are refused.
    pub fn add_task(&mut self, mut task: TrackedTask) -> bool {
        if self.data.deleted.contains_key(&task.remote_id) {
            tracing::debug!(task_id = %task.remote_id, "refusing to track tombstoned task");
            return false;
        }
        task.refresh_category();
        self.data.pending_discoveries.remove(&task.remote_id);
        self.data.tasks.insert(task.remote_id.clone(), task);
        self.data.stats.total_tasks = self.data.tasks.len();
        self.touch();
        true
    }

    pub fn update_task(&mut self, id: &str, update: TaskUpdate) -> bool {
        let now = self.clock.now();
        let Some(task) = self.data.tasks.get_mut(id) else {
            return false;
        };
        update.apply(task, now);
        self.touch();
        true
    }

    pub fn remove_task(&mut self, id: &str) -> Option<TrackedTask> {
        let removed = self.data.tasks.remove(id);
        if removed.is_some() {
            self.data.stats.total_tasks = self.data.tasks.len();
            self.touch();
        }
        removed
    }

    /// Tombstones `id`, dropping any active entry. An existing tombstone
    /// keeps its original timestamp.
    pub fn mark_as_deleted(
        &mut self,
        id: &str,
        reason: TombstoneReason,
        last_known_path: Option<String>,
        http_status: Option<u16>,
        note: Option<String>,
    ) {
        let now = self.clock.now();
        let active = self.data.tasks.remove(id);
        self.data.pending_discoveries.remove(id);
        let last_known_path =
            last_known_path.or_else(|| active.as_ref().map(|task| task.location.path.clone()));
        let deleted_at = self
            .data
            .deleted
            .get(id)
            .map(|existing| existing.deleted_at)
            .unwrap_or(now);
        self.data.deleted.insert(
            id.to_string(),
            Tombstone {
                reason,
                deleted_at,
                last_known_path,
                http_status,
                note,
            },
        );
        self.data.stats.total_tasks = self.data.tasks.len();
        self.touch();
    }

    pub fn get_task(&self, id: &str) -> Option<&TrackedTask> {
        self.data.tasks.get(id)
    }

    pub fn tasks(&self) -> impl Iterator<Item = &TrackedTask> {
        self.data.tasks.values()
    }

    pub fn task_count(&self) -> usize {
        self.data.tasks.len()
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.data.tasks.contains_key(id)
    }

    /// Active task whose legacy id is `legacy`.
    pub fn find_by_legacy_id(&self, legacy: &str) -> Option<&TrackedTask> {
        self.data
            .tasks
            .values()
            .find(|task| task.legacy_id.as_deref() == Some(legacy))
    }

    pub fn is_task_deleted(&self, id: &str) -> bool {
        self.data.deleted.contains_key(id)
    }

    pub fn get_deleted_task(&self, id: &str) -> Option<&Tombstone> {
        self.data.deleted.get(id)
    }

    pub fn tombstones(&self) -> impl Iterator<Item = (&String, &Tombstone)> {
        self.data.deleted.iter()
    }

    /// Active or tombstoned.
    pub fn is_known(&self, id: &str) -> bool {
        self.is_tracked(id) || self.is_task_deleted(id)
    }

    /// Ids due for a remote check, most urgent first.
    pub fn tasks_needing_sync(&self, policy: &SyncPolicy, now: DateTime<Utc>) -> Vec<String> {
        let mut due: Vec<(u8, &String)> = self
            .data
            .tasks
            .iter()
            .filter(|(id, task)| {
                should_check_remote_now(task, self.is_task_deleted(id), policy, now)
            })
            .map(|(id, task)| (class_of(task, false).priority(), id))
            .collect();
        due.sort();
        due.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Deletes tombstones older than `older_than`. Returns how many were removed.
    pub fn cleanup_tombstones(&mut self, older_than: Duration) -> usize {
        let cutoff = self.clock.now() - older_than;
        let before = self.data.deleted.len();
        self.data
            .deleted
            .retain(|_, tombstone| tombstone.deleted_at >= cutoff);
        let removed = before - self.data.deleted.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Drops tombstones that shadow active ids. Returns the repaired ids.
    pub fn repair_overlaps(&mut self) -> Vec<String> {
        let repaired = self.data.repair_overlaps();
        if !repaired.is_empty() {
            self.touch();
        }
        repaired
    }

    // Discovery retry queue

    pub fn pending_discoveries(&self) -> &BTreeMap<String, PendingDiscovery> {
        &self.data.pending_discoveries
    }

    pub fn queue_discovery(&mut self, pending: PendingDiscovery) {
        self.data
            .pending_discoveries
            .insert(pending.id.clone(), pending);
        self.touch();
    }

    pub fn drop_discovery(&mut self, id: &str) -> Option<PendingDiscovery> {
        let removed = self.data.pending_discoveries.remove(id);
        if removed.is_some() {
            self.touch();
        }
        removed
    }

    // Scan bookkeeping and statistics

    pub fn last_full_scan_at(&self) -> Option<DateTime<Utc>> {
        self.data.last_full_scan_at
    }

    pub fn last_scan_at(&self) -> Option<DateTime<Utc>> {
        self.data.last_scan_at
    }

    /// Records a completed discovery scan that started at `at`.
    pub fn set_last_scan(&mut self, at: DateTime<Utc>, full: bool) {
        self.data.last_scan_at = Some(at);
        if full {
            self.data.last_full_scan_at = Some(at);
        }
        self.touch();
    }

    pub fn last_validation_at(&self) -> Option<DateTime<Utc>> {
        self.data.last_validation_at
    }

    pub fn set_last_validation(&mut self, at: DateTime<Utc>) {
        self.data.last_validation_at = Some(at);
        self.touch();
    }

    pub fn stats(&self) -> &JournalStats {
        &self.data.stats
    }

    pub fn record_new_tasks(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.data.stats.new_tasks_found += count as u64;
        self.touch();
    }

    pub fn record_cycle(&mut self, api_calls: u32, duration_ms: f64) {
        self.data.stats.api_calls_last_cycle = api_calls;
        self.data.stats.total_api_calls += u64::from(api_calls);
        self.data.stats.record_sync_duration(duration_ms);
        self.touch();
    }

    /// Records the applier's outcome for `instruction`. A successful apply
    /// means both sides now hold the instruction's value.
    pub fn record_operation(
        &mut self,
        instruction: &SyncInstruction,
        succeeded: bool,
        duration_ms: f64,
    ) {
        let now = self.clock.now();
        let stats = &mut self.data.stats;
        stats.operations_attempted += 1;
        if succeeded {
            stats.operations_succeeded += 1;
        } else {
            stats.operations_failed += 1;
        }
        stats.record_sync_duration(duration_ms);

        if succeeded {
            let mut update = TaskUpdate {
                last_sync_operation_at: Some(now),
                ..TaskUpdate::default()
            };
            match instruction.direction {
                SyncDirection::LocalToRemote => {
                    update.remote_completed = Some(instruction.new_completed)
                }
                SyncDirection::RemoteToLocal => {
                    update.local_completed = Some(instruction.new_completed)
                }
            }
            self.update_task(&instruction.task_id, update);
        } else {
            self.touch();
        }
    }

    pub fn category_histogram(&self) -> BTreeMap<CompletionCategory, usize> {
        let mut histogram = BTreeMap::new();
        for task in self.data.tasks.values() {
            *histogram.entry(task.category).or_insert(0) += 1;
        }
        histogram
    }

    pub fn tombstone_breakdown(&self) -> BTreeMap<TombstoneReason, usize> {
        let mut breakdown = BTreeMap::new();
        for tombstone in self.data.deleted.values() {
            *breakdown.entry(tombstone.reason).or_insert(0) += 1;
        }
        breakdown
    }

    pub fn summary(&self) -> JournalSummary {
        JournalSummary {
            tasks: self.data.tasks.len(),
            tombstones: self.data.deleted.len(),
            orphaned: self.data.tasks.values().filter(|t| t.is_orphaned).count(),
            pending_discoveries: self.data.pending_discoveries.len(),
            categories: self.category_histogram(),
            tombstone_reasons: self.tombstone_breakdown(),
            last_scan_at: self.data.last_scan_at,
            last_full_scan_at: self.data.last_full_scan_at,
            last_validation_at: self.data.last_validation_at,
            stats: self.data.stats.clone(),
        }
    }
}
