use chrono::{DateTime, Utc};
use serde_json::json;

use crate::activity::ActivityKind;
use crate::entry::{self, LocalObservation};
use crate::instruction::{SyncDirection, SyncInstruction};
use crate::journal::model::{IssuedInstruction, TaskUpdate, TombstoneReason, TrackedTask};
use crate::journal::Journal;
use crate::locator::TaskLocator;
use crate::remote::RemoteError;

use super::{ChangeDetector, ChangeSet, SyncError};

/// Completion on both sides as the journal last knew it and as just read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observed {
    pub local_before: bool,
    pub remote_before: bool,
    pub local_now: bool,
    pub remote_now: bool,
    /// Both sides have been seen complete at some point.
    pub latched: bool,
}

impl Observed {
    pub fn local_changed(&self) -> bool {
        self.local_now != self.local_before
    }

    pub fn remote_changed(&self) -> bool {
        self.remote_now != self.remote_before
    }
}

/// Direction and value to sync, if the sides disagree.
///
/// The side that changed since the journal's last knowledge is the source.
/// If both or neither changed, the completed side is. Once latched, only
/// completions are synced, and only when a side actually moved.
pub fn decide(observed: Observed) -> Option<(SyncDirection, bool)> {
    if observed.local_now == observed.remote_now {
        return None;
    }
    let local_changed = observed.local_changed();
    let remote_changed = observed.remote_changed();
    let direction = match (local_changed, remote_changed) {
        (true, false) => SyncDirection::LocalToRemote,
        (false, true) => SyncDirection::RemoteToLocal,
        _ if observed.local_now => SyncDirection::LocalToRemote,
        _ => SyncDirection::RemoteToLocal,
    };
    let value = match direction {
        SyncDirection::LocalToRemote => observed.local_now,
        SyncDirection::RemoteToLocal => observed.remote_now,
    };
    if observed.latched && (!value || !(local_changed || remote_changed)) {
        return None;
    }
    Some((direction, value))
}

/// Result of reading the task's line.
enum LocalCheck {
    Found(LocalObservation),
    Missing,
    Unreadable,
}

impl ChangeDetector {
    fn check_local(&self, task: &TrackedTask) -> LocalCheck {
        let locator = TaskLocator::new(
            self.documents.as_ref(),
            self.lines.as_ref(),
            &self.config.vault.note_id_field,
        );
        match locator.locate(task) {
            Ok(Some(found)) => {
                if found.needs_writeback(&task.location) {
                    tracing::debug!(
                        task_id = %task.remote_id,
                        path = %found.path,
                        line = found.line,
                        strategy = ?found.strategy,
                        "task moved; updating location"
                    );
                }
                LocalCheck::Found(LocalObservation::from(&found))
            }
            Ok(None) => LocalCheck::Missing,
            Err(err) => {
                tracing::warn!(task_id = %task.remote_id, error = %err, "could not read task's document");
                LocalCheck::Unreadable
            }
        }
    }

    /// Marks `update` orphaned once `since` is older than the grace period.
    fn orphan_after_grace(
        &self,
        task: &TrackedTask,
        since: DateTime<Utc>,
        now: DateTime<Utc>,
        side: &str,
        update: &mut TaskUpdate,
    ) {
        if task.is_orphaned || now - since < self.config.sync.orphan_grace() {
            return;
        }
        tracing::warn!(task_id = %task.remote_id, side, %since, "task missing past grace period; orphaning");
        update.orphaned = Some(true);
        self.record_activity(
            ActivityKind::TaskOrphaned,
            Some(&task.remote_id),
            json!({"missing_side": side, "missing_since": since}),
        );
    }

    /// Compares one tracked task's two sides and records what changed.
    pub async fn compare_task(
        &mut self,
        journal: &mut Journal,
        id: &str,
        changes: &mut ChangeSet,
    ) -> Result<(), SyncError> {
        if journal.is_task_deleted(id) {
            return Ok(());
        }
        let Some(task) = journal.get_task(id).cloned() else {
            return Ok(());
        };
        let now = self.clock.now();

        let local = match self.check_local(&task) {
            LocalCheck::Found(local) => local,
            LocalCheck::Missing => {
                let since = task.local_missing_since.unwrap_or(now);
                let mut update = TaskUpdate {
                    local_missing_since: Some(Some(since)),
                    last_local_check_at: Some(now),
                    ..TaskUpdate::default()
                };
                self.orphan_after_grace(&task, since, now, "local", &mut update);
                if update.orphaned.is_some() {
                    changes.modified_tasks.push(id.to_string());
                }
                journal.update_task(id, update);
                return Ok(());
            }
            LocalCheck::Unreadable => return Ok(()),
        };
        let mut update = entry::refresh_local(&task, &local, now);
        let mut modified = update.location.is_some() || local.completed != task.local_completed;

        let remote = match self.fetch_remote(journal, id).await {
            Ok((remote, _)) if remote.is_deleted => {
                journal.update_task(id, update);
                self.tombstone(
                    journal,
                    id,
                    TombstoneReason::RemoteDeleted,
                    Some(local.path.clone()),
                    None,
                    "remote reports the task deleted",
                );
                changes.modified_tasks.push(id.to_string());
                return Ok(());
            }
            Ok((remote, checked_at)) => {
                update = update.merge(entry::refresh_remote(&remote, checked_at));
                remote
            }
            Err(RemoteError::NotFound) => {
                // Local completion is recorded only next to a remote reading.
                update.local_completed = None;
                let since = task.remote_missing_since.unwrap_or(now);
                let reference = task
                    .last_remote_seen_at
                    .or(task.remote_missing_since)
                    .unwrap_or(task.discovered_at);
                update.remote_missing_since = Some(Some(since));
                update.last_remote_check_at = Some(now);
                self.orphan_after_grace(&task, reference, now, "remote", &mut update);
                if update.orphaned.is_some() {
                    modified = true;
                }
                if modified {
                    changes.modified_tasks.push(id.to_string());
                }
                journal.update_task(id, update);
                return Ok(());
            }
            Err(err) if err.is_permanent() => {
                journal.update_task(id, update);
                self.tombstone(
                    journal,
                    id,
                    TombstoneReason::from_status(err.http_status()),
                    Some(local.path.clone()),
                    err.http_status(),
                    "remote check failed permanently",
                );
                changes.modified_tasks.push(id.to_string());
                return Ok(());
            }
            Err(err) => {
                // Transient: keep the new location, leave both completions alone.
                update.local_completed = None;
                journal.update_task(id, update);
                if modified {
                    changes.modified_tasks.push(id.to_string());
                }
                return Err(err.into());
            }
        };

        if task.is_orphaned {
            tracing::info!(task_id = %id, "task found on both sides again; clearing orphan flag");
            update.orphaned = Some(false);
            modified = true;
        }
        if remote.completed != task.remote_completed {
            modified = true;
        }

        let observed = Observed {
            local_before: task.local_completed,
            remote_before: task.remote_completed,
            local_now: local.completed,
            remote_now: remote.completed,
            latched: task.has_achieved_dual_completion,
        };
        if let Some((direction, value)) = decide(observed) {
            if let Some(instruction) = self.issue(&task, direction, value, now) {
                update.last_instruction = Some(IssuedInstruction {
                    direction,
                    new_completed: value,
                    issued_at: now,
                });
                changes.instructions.push(instruction);
            }
        } else if observed.local_now != observed.remote_now {
            tracing::debug!(task_id = %id, "mismatch held back by completion finality");
        }

        journal.update_task(id, update);
        if modified {
            changes.modified_tasks.push(id.to_string());
        }
        Ok(())
    }

    /// Builds the instruction unless an identical one went out recently.
    fn issue(
        &self,
        task: &TrackedTask,
        direction: SyncDirection,
        value: bool,
        now: DateTime<Utc>,
    ) -> Option<SyncInstruction> {
        if let Some(last) = &task.last_instruction {
            let same = last.direction == direction && last.new_completed == value;
            if same && now - last.issued_at < self.config.sync.instruction_retry() {
                tracing::debug!(task_id = %task.remote_id, "identical instruction already pending");
                return None;
            }
        }
        let instruction = SyncInstruction::new(direction, &task.remote_id, value, now);
        tracing::info!(
            task_id = %task.remote_id,
            direction = direction.as_str(),
            new_completed = value,
            "emitting sync instruction"
        );
        self.record_activity(
            ActivityKind::InstructionEmitted,
            Some(&task.remote_id),
            json!({
                "instruction_id": instruction.id,
                "direction": direction.as_str(),
                "new_completed": value,
            }),
        );
        Some(instruction)
    }
}
