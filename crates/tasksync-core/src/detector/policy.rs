use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::config::SyncConfig;
use crate::journal::model::TrackedTask;

/// Where a task stands for the purpose of spending API calls on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncClass {
    Tombstoned,
    Orphaned,
    Mismatch,
    BothComplete,
    BothOpen,
}

impl SyncClass {
    pub fn as_str(self) -> &'static str {
        match self {
            SyncClass::Tombstoned => "tombstoned",
            SyncClass::Orphaned => "orphaned",
            SyncClass::Mismatch => "mismatch",
            SyncClass::BothComplete => "both_complete",
            SyncClass::BothOpen => "both_open",
        }
    }

    /// Lower values are checked first within a cycle.
    pub fn priority(self) -> u8 {
        match self {
            SyncClass::Mismatch => 0,
            SyncClass::BothOpen => 1,
            SyncClass::Orphaned => 2,
            SyncClass::BothComplete => 3,
            SyncClass::Tombstoned => u8::MAX,
        }
    }
}

/// The one place the cost-control ordering is decided.
///
/// Tombstones short-circuit everything. Orphaned tasks sit on their own slow
/// retry schedule even when mismatched, since every check of them is likely
/// a wasted call. Then mismatches, then agreement.
pub fn classify(local: bool, remote: bool, tombstoned: bool, orphaned: bool) -> SyncClass {
    if tombstoned {
        return SyncClass::Tombstoned;
    }
    if orphaned {
        return SyncClass::Orphaned;
    }
    match (local, remote) {
        (true, true) => SyncClass::BothComplete,
        (false, false) => SyncClass::BothOpen,
        _ => SyncClass::Mismatch,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPolicy {
    pub interval: Duration,
    pub both_complete_cooldown: Duration,
    pub track_both_complete: bool,
    pub orphan_retry: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self::from_config(&SyncConfig::default())
    }
}

impl SyncPolicy {
    pub fn from_config(config: &SyncConfig) -> Self {
        Self {
            interval: config.interval(),
            both_complete_cooldown: config.both_complete_cooldown(),
            track_both_complete: config.track_both_complete,
            orphan_retry: config.orphan_retry(),
        }
    }
}

pub fn class_of(task: &TrackedTask, tombstoned: bool) -> SyncClass {
    classify(
        task.local_completed,
        task.remote_completed,
        tombstoned,
        task.is_orphaned,
    )
}

/// Whether `task` has earned a remote call this cycle. Tasks never checked
/// remotely are due at once (unless tombstoned or excluded from tracking).
///
/// A mismatch on a task that was once complete on both sides waits out the
/// both-complete cooldown. Local flips reach it through discovery instead.
pub fn should_check_remote_now(
    task: &TrackedTask,
    tombstoned: bool,
    policy: &SyncPolicy,
    now: DateTime<Utc>,
) -> bool {
    let elapsed = |window: Duration| match task.last_remote_check_at {
        None => true,
        Some(at) => now - at >= window,
    };
    match class_of(task, tombstoned) {
        SyncClass::Tombstoned => false,
        SyncClass::BothComplete if !policy.track_both_complete => false,
        SyncClass::Mismatch if task.has_achieved_dual_completion => {
            elapsed(policy.both_complete_cooldown)
        }
        SyncClass::Mismatch => true,
        SyncClass::BothComplete => elapsed(policy.both_complete_cooldown),
        SyncClass::BothOpen => elapsed(policy.interval),
        SyncClass::Orphaned => elapsed(policy.orphan_retry),
    }
}
