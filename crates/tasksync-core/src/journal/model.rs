use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::instruction::SyncDirection;

pub const JOURNAL_VERSION: u32 = 2;

/// Samples kept in the rolling sync-duration average.
const DURATION_WINDOW: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionCategory {
    LocalOnlyComplete,
    RemoteOnlyComplete,
    BothOpen,
    BothComplete,
}

impl CompletionCategory {
    pub fn from_states(local_completed: bool, remote_completed: bool) -> Self {
        match (local_completed, remote_completed) {
            (true, true) => CompletionCategory::BothComplete,
            (false, false) => CompletionCategory::BothOpen,
            (true, false) => CompletionCategory::LocalOnlyComplete,
            (false, true) => CompletionCategory::RemoteOnlyComplete,
        }
    }

    pub fn is_mismatch(self) -> bool {
        matches!(
            self,
            CompletionCategory::LocalOnlyComplete | CompletionCategory::RemoteOnlyComplete
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CompletionCategory::LocalOnlyComplete => "local_only_complete",
            CompletionCategory::RemoteOnlyComplete => "remote_only_complete",
            CompletionCategory::BothOpen => "both_open",
            CompletionCategory::BothComplete => "both_complete",
        }
    }
}

/// Where a task lives in the note collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskLocation {
    /// Durable note identifier from front matter; preferred over `path`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_id: Option<String>,
    pub path: String,
    pub line: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedInstruction {
    pub direction: SyncDirection,
    pub new_completed: bool,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedTask {
    pub remote_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legacy_id: Option<String>,
    pub location: TaskLocation,
    pub local_completed: bool,
    pub remote_completed: bool,
    pub category: CompletionCategory,
    #[serde(default)]
    pub local_hash: Option<String>,
    #[serde(default)]
    pub remote_hash: Option<String>,
    pub discovered_at: DateTime<Utc>,
    #[serde(default)]
    pub last_local_check_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_remote_check_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_anchor_validation_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_sync_operation_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_remote_seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_missing_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub local_missing_since: Option<DateTime<Utc>>,
    #[serde(default)]
    pub remote_due: Option<String>,
    #[serde(default)]
    pub is_orphaned: bool,
    #[serde(default)]
    pub orphaned_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub has_achieved_dual_completion: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_instruction: Option<IssuedInstruction>,
}

impl TrackedTask {
    /// Recomputes the derived category and latches dual completion.
    pub fn refresh_category(&mut self) {
        self.category = CompletionCategory::from_states(self.local_completed, self.remote_completed);
        if self.category == CompletionCategory::BothComplete {
            self.has_achieved_dual_completion = true;
        }
    }

    /// Ids this task may be referenced by in documents.
    pub fn known_ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.remote_id.as_str()).chain(self.legacy_id.as_deref())
    }
}

/// Partial update applied through [`super::Journal::update_task`].
/// `Some(None)` on a double option clears the field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskUpdate {
    pub location: Option<TaskLocation>,
    pub legacy_id: Option<String>,
    pub local_completed: Option<bool>,
    pub remote_completed: Option<bool>,
    pub local_hash: Option<String>,
    pub remote_hash: Option<String>,
    pub last_local_check_at: Option<DateTime<Utc>>,
    pub last_remote_check_at: Option<DateTime<Utc>>,
    pub last_anchor_validation_at: Option<DateTime<Utc>>,
    pub last_sync_operation_at: Option<DateTime<Utc>>,
    pub last_remote_seen_at: Option<DateTime<Utc>>,
    pub remote_missing_since: Option<Option<DateTime<Utc>>>,
    pub local_missing_since: Option<Option<DateTime<Utc>>>,
    pub remote_due: Option<Option<String>>,
    /// `Some(true)` orphans at the given time, `Some(false)` clears the flag.
    pub orphaned: Option<bool>,
    pub last_instruction: Option<IssuedInstruction>,
}

impl TaskUpdate {
    pub fn is_empty(&self) -> bool {
        *self == TaskUpdate::default()
    }

    /// Folds `other` on top of `self`; fields set in `other` win.
    pub fn merge(mut self, other: TaskUpdate) -> TaskUpdate {
        macro_rules! take {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field; })*
            };
        }
        take!(
            location,
            legacy_id,
            local_completed,
            remote_completed,
            local_hash,
            remote_hash,
            last_local_check_at,
            last_remote_check_at,
            last_anchor_validation_at,
            last_sync_operation_at,
            last_remote_seen_at,
            remote_missing_since,
            local_missing_since,
            remote_due,
            orphaned,
            last_instruction
        );
        self
    }

    pub fn apply(self, task: &mut TrackedTask, now: DateTime<Utc>) {
        if let Some(location) = self.location {
            task.location = location;
        }
        if let Some(legacy_id) = self.legacy_id {
            task.legacy_id = Some(legacy_id);
        }
        if let Some(value) = self.local_completed {
            task.local_completed = value;
        }
        if let Some(value) = self.remote_completed {
            task.remote_completed = value;
        }
        if let Some(hash) = self.local_hash {
            task.local_hash = Some(hash);
        }
        if let Some(hash) = self.remote_hash {
            task.remote_hash = Some(hash);
        }
        if let Some(at) = self.last_local_check_at {
            task.last_local_check_at = Some(at);
        }
        if let Some(at) = self.last_remote_check_at {
            task.last_remote_check_at = Some(at);
        }
        if let Some(at) = self.last_anchor_validation_at {
            task.last_anchor_validation_at = Some(at);
        }
        if let Some(at) = self.last_sync_operation_at {
            task.last_sync_operation_at = Some(at);
        }
        if let Some(at) = self.last_remote_seen_at {
            task.last_remote_seen_at = Some(at);
        }
        if let Some(value) = self.remote_missing_since {
            task.remote_missing_since = value;
        }
        if let Some(value) = self.local_missing_since {
            task.local_missing_since = value;
        }
        if let Some(value) = self.remote_due {
            task.remote_due = value;
        }
        match self.orphaned {
            Some(true) if !task.is_orphaned => {
                task.is_orphaned = true;
                task.orphaned_at = Some(now);
            }
            Some(false) => {
                task.is_orphaned = false;
                task.orphaned_at = None;
            }
            _ => {}
        }
        if let Some(instruction) = self.last_instruction {
            task.last_instruction = Some(instruction);
        }
        task.refresh_category();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TombstoneReason {
    RemoteDeleted,
    RemoteInaccessible,
    UserRemoved,
}

impl TombstoneReason {
    pub fn as_str(self) -> &'static str {
        match self {
            TombstoneReason::RemoteDeleted => "remote_deleted",
            TombstoneReason::RemoteInaccessible => "remote_inaccessible",
            TombstoneReason::UserRemoved => "user_removed",
        }
    }

    /// Reason implied by a permanent HTTP failure.
    pub fn from_status(status: Option<u16>) -> Self {
        match status {
            Some(403) => TombstoneReason::RemoteInaccessible,
            _ => TombstoneReason::RemoteDeleted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tombstone {
    pub reason: TombstoneReason,
    pub deleted_at: DateTime<Utc>,
    #[serde(default)]
    pub last_known_path: Option<String>,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub note: Option<String>,
}

/// A linked task whose first fetch failed transiently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDiscovery {
    pub id: String,
    pub path: String,
    pub line: usize,
    pub attempts: u32,
    pub next_attempt_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JournalStats {
    pub total_tasks: usize,
    pub new_tasks_found: u64,
    pub operations_attempted: u64,
    pub operations_succeeded: u64,
    pub operations_failed: u64,
    pub average_sync_ms: f64,
    pub sync_samples: u32,
    pub api_calls_last_cycle: u32,
    pub total_api_calls: u64,
}

impl JournalStats {
    pub fn record_sync_duration(&mut self, millis: f64) {
        self.sync_samples = (self.sync_samples + 1).min(DURATION_WINDOW);
        let n = f64::from(self.sync_samples);
        self.average_sync_ms += (millis - self.average_sync_ms) / n;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalData {
    pub version: u32,
    #[serde(default)]
    pub tasks: BTreeMap<String, TrackedTask>,
    #[serde(default)]
    pub deleted: BTreeMap<String, Tombstone>,
    #[serde(default)]
    pub pending_discoveries: BTreeMap<String, PendingDiscovery>,
    #[serde(default)]
    pub last_scan_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_full_scan_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_validation_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: JournalStats,
}

impl Default for JournalData {
    fn default() -> Self {
        Self {
            version: JOURNAL_VERSION,
            tasks: BTreeMap::new(),
            deleted: BTreeMap::new(),
            pending_discoveries: BTreeMap::new(),
            last_scan_at: None,
            last_full_scan_at: None,
            last_validation_at: None,
            stats: JournalStats::default(),
        }
    }
}

impl JournalData {
    /// Drops tombstones (and queued discoveries) for ids that are active.
    /// Returns the ids repaired.
    pub fn repair_overlaps(&mut self) -> Vec<String> {
        let overlapping: Vec<String> = self
            .deleted
            .keys()
            .filter(|id| self.tasks.contains_key(*id))
            .cloned()
            .collect();
        for id in &overlapping {
            self.deleted.remove(id);
        }
        let tasks = &self.tasks;
        let deleted = &self.deleted;
        self.pending_discoveries
            .retain(|id, _| !tasks.contains_key(id) && !deleted.contains_key(id));
        overlapping
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn task(id: &str) -> TrackedTask {
        TrackedTask {
            remote_id: id.to_string(),
            legacy_id: None,
            location: TaskLocation {
                path: "a.md".to_string(),
                ..TaskLocation::default()
            },
            local_completed: false,
            remote_completed: false,
            category: CompletionCategory::BothOpen,
            local_hash: None,
            remote_hash: None,
            discovered_at: Utc::now(),
            last_local_check_at: None,
            last_remote_check_at: None,
            last_anchor_validation_at: None,
            last_sync_operation_at: None,
            last_remote_seen_at: None,
            remote_missing_since: None,
            local_missing_since: None,
            remote_due: None,
            is_orphaned: false,
            orphaned_at: None,
            has_achieved_dual_completion: false,
            last_instruction: None,
        }
    }

    #[test]
    fn update_latches_dual_completion() {
        let mut t = task("a");
        let now = Utc::now();
        TaskUpdate {
            local_completed: Some(true),
            remote_completed: Some(true),
            ..TaskUpdate::default()
        }
        .apply(&mut t, now);
        assert_eq!(t.category, CompletionCategory::BothComplete);
        assert!(t.has_achieved_dual_completion);

        TaskUpdate {
            remote_completed: Some(false),
            ..TaskUpdate::default()
        }
        .apply(&mut t, now);
        assert_eq!(t.category, CompletionCategory::LocalOnlyComplete);
        assert!(t.has_achieved_dual_completion);
    }

    #[test]
    fn orphan_flag_keeps_first_timestamp() {
        let mut t = task("a");
        let first = Utc::now();
        let later = first + chrono::Duration::hours(2);
        TaskUpdate {
            orphaned: Some(true),
            ..TaskUpdate::default()
        }
        .apply(&mut t, first);
        TaskUpdate {
            orphaned: Some(true),
            ..TaskUpdate::default()
        }
        .apply(&mut t, later);
        assert_eq!(t.orphaned_at, Some(first));
        TaskUpdate {
            orphaned: Some(false),
            ..TaskUpdate::default()
        }
        .apply(&mut t, later);
        assert!(!t.is_orphaned);
        assert_eq!(t.orphaned_at, None);
    }

    #[test]
    fn merge_prefers_later_fields() {
        let a = TaskUpdate {
            local_completed: Some(false),
            local_hash: Some("a".to_string()),
            ..TaskUpdate::default()
        };
        let b = TaskUpdate {
            local_completed: Some(true),
            ..TaskUpdate::default()
        };
        let merged = a.merge(b);
        assert_eq!(merged.local_completed, Some(true));
        assert_eq!(merged.local_hash.as_deref(), Some("a"));
    }

    #[test]
    fn repair_overlaps_prefers_active_entry() {
        let mut data = JournalData::default();
        data.tasks.insert("a".to_string(), task("a"));
        data.deleted.insert(
            "a".to_string(),
            Tombstone {
                reason: TombstoneReason::RemoteDeleted,
                deleted_at: Utc::now(),
                last_known_path: None,
                http_status: Some(404),
                note: None,
            },
        );
        assert_eq!(data.repair_overlaps(), vec!["a".to_string()]);
        assert!(data.deleted.is_empty());
        assert_eq!(data.tasks.len(), 1);
    }

    #[test]
    fn rolling_average_tracks_recent_samples() {
        let mut stats = JournalStats::default();
        stats.record_sync_duration(100.0);
        assert_eq!(stats.average_sync_ms, 100.0);
        stats.record_sync_duration(200.0);
        assert_eq!(stats.average_sync_ms, 150.0);
    }
}
