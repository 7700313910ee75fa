use std::fs;
use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::journal::backup::BackupCategory;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TaskSyncConfig {
    pub vault: VaultConfig,
    pub remote: RemoteConfig,
    pub sync: SyncConfig,
    pub discovery: DiscoveryConfig,
    pub backoff: BackoffConfig,
    pub heal: HealConfig,
    pub journal: JournalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VaultConfig {
    /// Front matter key holding the durable note identifier.
    pub note_id_field: String,
    /// Directory (relative to the vault root) holding the journal, backups and caches.
    pub state_dir: String,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            note_id_field: "uid".to_string(),
            state_dir: ".tasksync".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RemoteConfig {
    pub base_url: String,
    /// Environment variable holding the API token.
    pub token_env: String,
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.todoist.com/api/v1".to_string(),
            token_env: "TASKSYNC_API_TOKEN".to_string(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SyncConfig {
    pub interval_secs: i64,
    pub both_complete_cooldown_secs: i64,
    /// When false, tasks complete on both sides are never checked again.
    pub track_both_complete: bool,
    pub orphan_grace_secs: i64,
    pub orphan_retry_secs: i64,
    pub full_scan_max_age_secs: i64,
    pub min_known_tasks_for_incremental: usize,
    pub bulk_cache_ttl_secs: i64,
    pub instruction_retry_secs: i64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            both_complete_cooldown_secs: 86_400,
            track_both_complete: true,
            orphan_grace_secs: 86_400,
            orphan_retry_secs: 21_600,
            full_scan_max_age_secs: 86_400,
            min_known_tasks_for_incremental: 1,
            bulk_cache_ttl_secs: 300,
            instruction_retry_secs: 600,
        }
    }
}

impl SyncConfig {
    pub fn interval(&self) -> Duration {
        Duration::seconds(self.interval_secs)
    }

    pub fn both_complete_cooldown(&self) -> Duration {
        Duration::seconds(self.both_complete_cooldown_secs)
    }

    pub fn orphan_grace(&self) -> Duration {
        Duration::seconds(self.orphan_grace_secs)
    }

    pub fn orphan_retry(&self) -> Duration {
        Duration::seconds(self.orphan_retry_secs)
    }

    pub fn full_scan_max_age(&self) -> Duration {
        Duration::seconds(self.full_scan_max_age_secs)
    }

    pub fn bulk_cache_ttl(&self) -> Duration {
        Duration::seconds(self.bulk_cache_ttl_secs)
    }

    pub fn instruction_retry(&self) -> Duration {
        Duration::seconds(self.instruction_retry_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub max_attempts: u32,
    pub retry_delay_secs: i64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_secs: 300,
        }
    }
}

impl DiscoveryConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::seconds(self.retry_delay_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackoffConfig {
    pub base_ms: u64,
    pub max_ms: u64,
    pub max_retries: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: 1_000,
            max_ms: 30_000,
            max_retries: 4,
        }
    }
}

impl BackoffConfig {
    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> std::time::Duration {
        let shifted = self.base_ms.checked_shl(attempt).unwrap_or(u64::MAX);
        std::time::Duration::from_millis(shifted.min(self.max_ms))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealConfig {
    pub min_interval_secs: i64,
    pub project_concurrency: usize,
    pub batch_delay_ms: u64,
    pub max_batch_delay_ms: u64,
    pub max_completed_pages: usize,
}

impl Default for HealConfig {
    fn default() -> Self {
        Self {
            min_interval_secs: 300,
            project_concurrency: 3,
            batch_delay_ms: 500,
            max_batch_delay_ms: 8_000,
            max_completed_pages: 10,
        }
    }
}

impl HealConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::seconds(self.min_interval_secs)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetentionRule {
    pub max: usize,
    pub auto_cleanup: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RetentionConfig {
    pub routine: RetentionRule,
    pub load: RetentionRule,
    pub pre_restore: RetentionRule,
    pub reset: RetentionRule,
    pub migration: RetentionRule,
    pub heal: RetentionRule,
    pub manual: RetentionRule,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            routine: BackupCategory::Routine.default_retention(),
            load: BackupCategory::Load.default_retention(),
            pre_restore: BackupCategory::PreRestore.default_retention(),
            reset: BackupCategory::Reset.default_retention(),
            migration: BackupCategory::Migration.default_retention(),
            heal: BackupCategory::Heal.default_retention(),
            manual: BackupCategory::Manual.default_retention(),
        }
    }
}

impl RetentionConfig {
    pub fn rule(&self, category: BackupCategory) -> RetentionRule {
        match category {
            BackupCategory::Routine => self.routine,
            BackupCategory::Load => self.load,
            BackupCategory::PreRestore => self.pre_restore,
            BackupCategory::Reset => self.reset,
            BackupCategory::Migration => self.migration,
            BackupCategory::Heal => self.heal,
            BackupCategory::Manual => self.manual,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct JournalConfig {
    pub debounce_ms: i64,
    pub routine_backup_min_interval_secs: i64,
    /// A journal file larger than this with no tasks and no tombstones is
    /// treated as damaged rather than legitimately empty.
    pub non_trivial_bytes: usize,
    pub retention: RetentionConfig,
}

impl Default for JournalConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 2_000,
            routine_backup_min_interval_secs: 600,
            non_trivial_bytes: 512,
            retention: RetentionConfig::default(),
        }
    }
}

impl JournalConfig {
    pub fn debounce(&self) -> Duration {
        Duration::milliseconds(self.debounce_ms)
    }

    pub fn routine_backup_min_interval(&self) -> Duration {
        Duration::seconds(self.routine_backup_min_interval_secs)
    }

    pub fn retention_for(&self, category: BackupCategory) -> RetentionRule {
        let rule = self.retention.rule(category);
        if category == BackupCategory::Manual {
            // Manual backups are never pruned automatically.
            RetentionRule {
                auto_cleanup: false,
                ..rule
            }
        } else {
            rule
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSource {
    Project,
    Global,
    Default,
}

impl ConfigSource {
    pub fn as_str(self) -> &'static str {
        match self {
            ConfigSource::Project => "project",
            ConfigSource::Global => "global",
            ConfigSource::Default => "default",
        }
    }
}

pub fn config_filename_candidates() -> [&'static str; 2] {
    [".tasksync.toml", ".tasksyncrc"]
}

pub fn config_path(vault_root: &Path) -> PathBuf {
    vault_root.join(".tasksync.toml")
}

pub fn resolve_user_home_dir() -> Option<PathBuf> {
    if let Ok(home) = std::env::var("HOME") {
        let trimmed = home.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    if let Ok(profile) = std::env::var("USERPROFILE") {
        let trimmed = profile.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    None
}

pub fn resolve_tasksync_home_dir() -> Option<PathBuf> {
    if let Ok(value) = std::env::var("TASKSYNC_HOME") {
        let trimmed = value.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    resolve_user_home_dir().map(|home| home.join(".tasksync"))
}

pub fn global_config_path() -> Option<PathBuf> {
    resolve_tasksync_home_dir().map(|home| home.join("config.toml"))
}

pub fn load_config(vault_root: &Path) -> Option<TaskSyncConfig> {
    for name in config_filename_candidates() {
        let path = vault_root.join(name);
        if path.is_file() {
            match read_config_file(&path) {
                Ok(config) => return Some(config),
                Err(err) => {
                    tracing::warn!(path = %path.display(), error = %err, "ignoring unreadable config");
                }
            }
        }
    }
    None
}

pub fn load_global_config() -> Option<TaskSyncConfig> {
    let path = global_config_path()?;
    if !path.is_file() {
        return None;
    }
    read_config_file(&path).ok()
}

pub fn read_config_file(path: &Path) -> Result<TaskSyncConfig, ConfigError> {
    let text = fs::read_to_string(path)?;
    Ok(toml::from_str::<TaskSyncConfig>(&text)?)
}

pub fn resolve_config_with_source(vault_root: &Path) -> (TaskSyncConfig, ConfigSource) {
    if let Some(config) = load_config(vault_root) {
        return (config, ConfigSource::Project);
    }
    if let Some(config) = load_global_config() {
        return (config, ConfigSource::Global);
    }
    (TaskSyncConfig::default(), ConfigSource::Default)
}

pub fn resolve_config(vault_root: &Path) -> TaskSyncConfig {
    resolve_config_with_source(vault_root).0
}

pub fn write_config(vault_root: &Path, config: &TaskSyncConfig) -> Result<PathBuf, ConfigError> {
    let path = config_path(vault_root);
    let body = toml::to_string_pretty(config)?;
    fs::write(&path, body)?;
    Ok(path)
}

pub fn state_dir(vault_root: &Path, config: &TaskSyncConfig) -> PathBuf {
    vault_root.join(&config.vault.state_dir)
}
