use std::collections::BTreeMap;

use super::model::JournalData;
use crate::ids::is_legacy_id;

#[derive(Debug, Clone, PartialEq)]
pub struct MigrationOutcome {
    pub data: JournalData,
    pub migrated_tasks: usize,
    pub migrated_tombstones: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountMismatch {
    pub before: usize,
    pub after: usize,
}

/// Legacy-encoded keys across tasks, tombstones and queued discoveries.
pub fn legacy_keys(data: &JournalData) -> Vec<String> {
    let mut keys: Vec<String> = data
        .tasks
        .keys()
        .chain(data.deleted.keys())
        .chain(data.pending_discoveries.keys())
        .filter(|key| is_legacy_id(key))
        .cloned()
        .collect();
    keys.sort();
    keys.dedup();
    keys
}

pub fn needs_migration(data: &JournalData) -> bool {
    data.tasks
        .keys()
        .chain(data.deleted.keys())
        .any(|key| is_legacy_id(key))
}

/// Re-keys every entry through `mapping` (legacy id to canonical id).
/// Keys without a mapping stay as they are. The result must hold exactly as
/// many tasks as the input; otherwise nothing is returned.
pub fn migrate_keys(
    data: &JournalData,
    mapping: &BTreeMap<String, String>,
) -> Result<MigrationOutcome, CountMismatch> {
    let canonical = |key: &str| mapping.get(key).cloned().unwrap_or_else(|| key.to_string());

    let mut migrated = data.clone();
    let mut migrated_tasks = 0;
    migrated.tasks = BTreeMap::new();
    for (key, task) in &data.tasks {
        let new_key = canonical(key.as_str());
        let mut task = task.clone();
        if new_key != *key {
            migrated_tasks += 1;
            task.legacy_id = Some(key.clone());
            task.remote_id = new_key.clone();
        }
        migrated.tasks.insert(new_key, task);
    }

    let mut migrated_tombstones = 0;
    migrated.deleted = BTreeMap::new();
    for (key, tombstone) in &data.deleted {
        let new_key = canonical(key.as_str());
        if new_key != *key {
            migrated_tombstones += 1;
        }
        migrated.deleted.insert(new_key, tombstone.clone());
    }

    migrated.pending_discoveries = data
        .pending_discoveries
        .iter()
        .map(|(key, pending)| {
            let new_key = canonical(key.as_str());
            let mut pending = pending.clone();
            pending.id = new_key.clone();
            (new_key, pending)
        })
        .collect();

    if migrated.tasks.len() != data.tasks.len() {
        return Err(CountMismatch {
            before: data.tasks.len(),
            after: migrated.tasks.len(),
        });
    }

    Ok(MigrationOutcome {
        data: migrated,
        migrated_tasks,
        migrated_tombstones,
    })
}
