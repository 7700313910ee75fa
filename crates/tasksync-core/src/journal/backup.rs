use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::RetentionRule;

const BACKUP_PREFIX: &str = "journal.v2.backup.";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%3fZ";

/// The operation that triggered a backup. Each category is retained independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupCategory {
    Routine,
    Load,
    PreRestore,
    Reset,
    Migration,
    Heal,
    Manual,
}

impl BackupCategory {
    pub const ALL: [BackupCategory; 7] = [
        BackupCategory::Routine,
        BackupCategory::Load,
        BackupCategory::PreRestore,
        BackupCategory::Reset,
        BackupCategory::Migration,
        BackupCategory::Heal,
        BackupCategory::Manual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            BackupCategory::Routine => "routine",
            BackupCategory::Load => "load",
            BackupCategory::PreRestore => "pre_restore",
            BackupCategory::Reset => "reset",
            BackupCategory::Migration => "migration",
            BackupCategory::Heal => "heal",
            BackupCategory::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        BackupCategory::ALL
            .into_iter()
            .find(|category| category.as_str() == value)
    }

    pub fn default_retention(self) -> RetentionRule {
        let (max, auto_cleanup) = match self {
            BackupCategory::Routine => (10, true),
            BackupCategory::Load => (5, true),
            BackupCategory::PreRestore => (5, true),
            BackupCategory::Heal => (5, true),
            BackupCategory::Reset => (20, false),
            BackupCategory::Migration => (20, false),
            BackupCategory::Manual => (50, false),
        };
        RetentionRule { max, auto_cleanup }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupInfo {
    pub path: PathBuf,
    pub category: BackupCategory,
    pub created_at: DateTime<Utc>,
    pub size: u64,
}

pub fn backup_file_name(category: BackupCategory, at: DateTime<Utc>) -> String {
    format!(
        "{BACKUP_PREFIX}{}.{}.json",
        category.as_str(),
        at.format(TIMESTAMP_FORMAT)
    )
}

fn parse_backup_name(name: &str) -> Option<(BackupCategory, DateTime<Utc>)> {
    let rest = name.strip_prefix(BACKUP_PREFIX)?.strip_suffix(".json")?;
    let (category, stamp) = rest.split_once('.')?;
    // A collision suffix (`-1`, `-2`) may follow the timestamp.
    let stamp = stamp.split('-').next()?;
    let category = BackupCategory::parse(category)?;
    let naive = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).ok()?;
    Some((category, naive.and_utc()))
}

/// Writes `bytes` as a new backup and returns its path.
pub fn write_backup(
    dir: &Path,
    category: BackupCategory,
    bytes: &[u8],
    at: DateTime<Utc>,
) -> io::Result<PathBuf> {
    fs::create_dir_all(dir)?;
    let base = backup_file_name(category, at);
    let mut path = dir.join(&base);
    let mut suffix = 1;
    while path.exists() {
        let stem = base.trim_end_matches(".json");
        path = dir.join(format!("{stem}-{suffix}.json"));
        suffix += 1;
    }
    fs::write(&path, bytes)?;
    Ok(path)
}

/// Every backup in `dir`, newest first.
pub fn list_backups(dir: &Path) -> io::Result<Vec<BackupInfo>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().to_string();
        let Some((category, created_at)) = parse_backup_name(&name) else {
            continue;
        };
        let size = entry.metadata().map(|meta| meta.len()).unwrap_or(0);
        backups.push(BackupInfo {
            path: entry.path(),
            category,
            created_at,
            size,
        });
    }
    backups.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.path.cmp(&a.path))
    });
    Ok(backups)
}

pub fn latest_backup(dir: &Path, category: BackupCategory) -> io::Result<Option<BackupInfo>> {
    Ok(list_backups(dir)?
        .into_iter()
        .find(|backup| backup.category == category))
}

/// Deletes the oldest backups of `category` beyond `rule.max`. Categories
/// without auto cleanup are left alone.
pub fn prune_backups(
    dir: &Path,
    category: BackupCategory,
    rule: RetentionRule,
) -> io::Result<Vec<PathBuf>> {
    if !rule.auto_cleanup {
        return Ok(Vec::new());
    }
    let mut removed = Vec::new();
    let of_category = list_backups(dir)?
        .into_iter()
        .filter(|backup| backup.category == category);
    for backup in of_category.skip(rule.max) {
        fs::remove_file(&backup.path)?;
        removed.push(backup.path);
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    #[test]
    fn names_round_trip_through_listing() {
        let temp = TempDir::new().expect("tempdir");
        let at = Utc::now();
        let path = write_backup(temp.path(), BackupCategory::PreRestore, b"{}", at).expect("write");
        let name = path.file_name().expect("name").to_string_lossy().to_string();
        assert!(name.starts_with("journal.v2.backup.pre_restore."));
        let listed = list_backups(temp.path()).expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].category, BackupCategory::PreRestore);
    }

    #[test]
    fn same_instant_backups_do_not_collide() {
        let temp = TempDir::new().expect("tempdir");
        let at = Utc::now();
        let a = write_backup(temp.path(), BackupCategory::Routine, b"1", at).expect("write");
        let b = write_backup(temp.path(), BackupCategory::Routine, b"2", at).expect("write");
        assert_ne!(a, b);
        assert_eq!(list_backups(temp.path()).expect("list").len(), 2);
    }

    #[test]
    fn prune_respects_category_and_auto_cleanup() {
        let temp = TempDir::new().expect("tempdir");
        let start = Utc::now();
        for i in 0..4 {
            write_backup(
                temp.path(),
                BackupCategory::Routine,
                b"r",
                start + Duration::seconds(i),
            )
            .expect("write");
            write_backup(
                temp.path(),
                BackupCategory::Manual,
                b"m",
                start + Duration::seconds(i),
            )
            .expect("write");
        }
        let rule = RetentionRule {
            max: 2,
            auto_cleanup: true,
        };
        let removed = prune_backups(temp.path(), BackupCategory::Routine, rule).expect("prune");
        assert_eq!(removed.len(), 2);
        let manual_rule = RetentionRule {
            max: 1,
            auto_cleanup: false,
        };
        assert!(prune_backups(temp.path(), BackupCategory::Manual, manual_rule)
            .expect("prune")
            .is_empty());

        let remaining = list_backups(temp.path()).expect("list");
        let routine: Vec<_> = remaining
            .iter()
            .filter(|b| b.category == BackupCategory::Routine)
            .collect();
        assert_eq!(routine.len(), 2);
        assert_eq!(routine[0].created_at.timestamp(), (start + Duration::seconds(3)).timestamp());
    }
}
