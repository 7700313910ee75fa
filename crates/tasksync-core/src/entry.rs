//! Builds and refreshes journal entries from whatever was observed: a
//! single remote fetch, a bulk fetch, or nothing remote at all.

use chrono::{DateTime, Utc};

use crate::hash::{local_content_hash, remote_content_hash};
use crate::journal::model::{CompletionCategory, TaskLocation, TaskUpdate, TrackedTask};
use crate::locator::LocatedTask;
use crate::remote::{RemoteSource, RemoteTask};

/// A task line as read from a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalObservation {
    pub path: String,
    pub note_id: Option<String>,
    pub line: usize,
    pub anchor: Option<String>,
    pub text: String,
    pub completed: bool,
}

impl LocalObservation {
    pub fn hash(&self) -> String {
        local_content_hash(&self.text)
    }

    pub fn location(&self) -> TaskLocation {
        TaskLocation {
            note_id: self.note_id.clone(),
            path: self.path.clone(),
            line: self.line,
            anchor: self.anchor.clone(),
        }
    }
}

impl From<&LocatedTask> for LocalObservation {
    fn from(located: &LocatedTask) -> Self {
        Self {
            path: located.path.clone(),
            note_id: located.note_id.clone(),
            line: located.line,
            anchor: located.anchor.clone(),
            text: located.text.clone(),
            completed: located.completed(),
        }
    }
}

fn base_entry(id: &str, local: &LocalObservation, legacy_id: Option<String>, now: DateTime<Utc>) -> TrackedTask {
    let mut task = TrackedTask {
        remote_id: id.to_string(),
        legacy_id: legacy_id.filter(|legacy| legacy != id),
        location: local.location(),
        local_completed: local.completed,
        remote_completed: false,
        category: CompletionCategory::BothOpen,
        local_hash: Some(local.hash()),
        remote_hash: None,
        discovered_at: now,
        last_local_check_at: Some(now),
        last_remote_check_at: None,
        last_anchor_validation_at: local.anchor.as_ref().map(|_| now),
        last_sync_operation_at: None,
        last_remote_seen_at: None,
        remote_missing_since: None,
        local_missing_since: None,
        remote_due: None,
        is_orphaned: false,
        orphaned_at: None,
        has_achieved_dual_completion: false,
        last_instruction: None,
    };
    task.refresh_category();
    task
}

/// Entry for a task whose remote object is known. `checked_at` is when
/// that object was read.
pub fn from_remote(
    remote: &RemoteTask,
    local: &LocalObservation,
    legacy_id: Option<String>,
    checked_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> TrackedTask {
    let mut task = base_entry(&remote.id, local, legacy_id, now);
    task.remote_completed = remote.completed;
    task.remote_hash = Some(remote_content_hash(remote));
    task.remote_due = remote.due.clone();
    task.last_remote_check_at = Some(checked_at);
    task.last_remote_seen_at = Some(checked_at);
    task.refresh_category();
    task
}

pub fn from_fetched(
    remote: &RemoteTask,
    local: &LocalObservation,
    legacy_id: Option<String>,
    now: DateTime<Utc>,
) -> TrackedTask {
    from_remote(remote, local, legacy_id, now, now)
}

/// Entry resolved from a bulk map; the remote check time is the bulk fetch's.
pub fn from_bulk(
    remote: &RemoteTask,
    local: &LocalObservation,
    legacy_id: Option<String>,
    fetched_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> TrackedTask {
    debug_assert!(remote.source != RemoteSource::Single);
    from_remote(remote, local, legacy_id, fetched_at, now)
}

/// Entry with no remote knowledge yet. It has never been checked remotely,
/// so the policy will schedule it on the next cycle.
pub fn stub(
    id: &str,
    local: &LocalObservation,
    legacy_id: Option<String>,
    now: DateTime<Utc>,
) -> TrackedTask {
    base_entry(id, local, legacy_id, now)
}

/// Fields to write after a successful remote read.
pub fn refresh_remote(remote: &RemoteTask, checked_at: DateTime<Utc>) -> TaskUpdate {
    TaskUpdate {
        remote_completed: Some(remote.completed),
        remote_hash: Some(remote_content_hash(remote)),
        remote_due: Some(remote.due.clone()),
        last_remote_check_at: Some(checked_at),
        last_remote_seen_at: Some(checked_at),
        remote_missing_since: Some(None),
        ..TaskUpdate::default()
    }
}

/// Fields to write after reading the task's line.
pub fn refresh_local(task: &TrackedTask, local: &LocalObservation, now: DateTime<Utc>) -> TaskUpdate {
    let location = local.location();
    TaskUpdate {
        local_completed: Some(local.completed),
        local_hash: Some(local.hash()),
        last_local_check_at: Some(now),
        local_missing_since: Some(None),
        last_anchor_validation_at: local.anchor.as_ref().map(|_| now),
        location: (location != task.location).then_some(location),
        ..TaskUpdate::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(completed: bool) -> LocalObservation {
        LocalObservation {
            path: "a.md".to_string(),
            note_id: Some("n1".to_string()),
            line: 4,
            anchor: None,
            text: if completed {
                "- [x] Buy milk".to_string()
            } else {
                "- [ ] Buy milk".to_string()
            },
            completed,
        }
    }

    fn remote(completed: bool, source: RemoteSource) -> RemoteTask {
        RemoteTask {
            id: "abc".to_string(),
            content: "Buy milk".to_string(),
            completed,
            due: Some("2026-05-01".to_string()),
            project_id: Some("p1".to_string()),
            is_deleted: false,
            source,
        }
    }

    #[test]
    fn fetched_entry_carries_both_sides() {
        let now = Utc::now();
        let task = from_fetched(&remote(true, RemoteSource::Single), &local(false), None, now);
        assert_eq!(task.category, CompletionCategory::RemoteOnlyComplete);
        assert_eq!(task.last_remote_check_at, Some(now));
        assert_eq!(task.remote_due.as_deref(), Some("2026-05-01"));
        assert_eq!(task.location.note_id.as_deref(), Some("n1"));
    }

    #[test]
    fn bulk_entry_uses_fetch_time() {
        let now = Utc::now();
        let fetched_at = now - chrono::Duration::seconds(30);
        let task = from_bulk(
            &remote(true, RemoteSource::CompletedBulk),
            &local(true),
            Some("123".to_string()),
            fetched_at,
            now,
        );
        assert_eq!(task.last_remote_check_at, Some(fetched_at));
        assert!(task.has_achieved_dual_completion);
        assert_eq!(task.legacy_id.as_deref(), Some("123"));
    }

    #[test]
    fn stub_is_unchecked() {
        let task = stub("abc", &local(true), Some("abc".to_string()), Utc::now());
        assert_eq!(task.last_remote_check_at, None);
        assert_eq!(task.remote_hash, None);
        assert_eq!(task.legacy_id, None);
        assert_eq!(task.category, CompletionCategory::LocalOnlyComplete);
    }

    #[test]
    fn refresh_local_only_moves_location_when_changed() {
        let now = Utc::now();
        let obs = local(false);
        let task = stub("abc", &obs, None, now);
        assert_eq!(refresh_local(&task, &obs, now).location, None);
        let moved = LocalObservation { line: 9, ..obs };
        assert_eq!(refresh_local(&task, &moved, now).location.map(|l| l.line), Some(9));
    }
}
