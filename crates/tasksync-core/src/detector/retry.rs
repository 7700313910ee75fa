use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};

use crate::config::DiscoveryConfig;
use crate::journal::model::PendingDiscovery;

/// Bounded retry schedule for linked tasks whose first fetch failed.
/// The queue itself lives in the journal so it survives restarts; this
/// type only decides what goes in, when it is due, and when it is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &DiscoveryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            delay: config.retry_delay(),
        }
    }

    /// Queue entry after the first failed attempt, or `None` if a single
    /// attempt is all the policy allows.
    pub fn first_failure(
        &self,
        id: &str,
        path: &str,
        line: usize,
        error: &str,
        now: DateTime<Utc>,
    ) -> Option<PendingDiscovery> {
        let pending = PendingDiscovery {
            id: id.to_string(),
            path: path.to_string(),
            line,
            attempts: 1,
            next_attempt_at: now + self.delay,
            last_error: Some(error.to_string()),
        };
        (pending.attempts < self.max_attempts).then_some(pending)
    }

    /// Entry after another failed attempt, or `None` once attempts are used up.
    pub fn after_failure(
        &self,
        pending: &PendingDiscovery,
        error: &str,
        now: DateTime<Utc>,
    ) -> Option<PendingDiscovery> {
        let attempts = pending.attempts + 1;
        if attempts >= self.max_attempts {
            return None;
        }
        Some(PendingDiscovery {
            attempts,
            next_attempt_at: now + self.delay,
            last_error: Some(error.to_string()),
            ..pending.clone()
        })
    }

    /// Entries eligible for another attempt, earliest first.
    pub fn due(
        &self,
        queue: &BTreeMap<String, PendingDiscovery>,
        now: DateTime<Utc>,
    ) -> Vec<PendingDiscovery> {
        let mut due: Vec<PendingDiscovery> = queue
            .values()
            .filter(|pending| pending.next_attempt_at <= now)
            .cloned()
            .collect();
        due.sort_by(|a, b| {
            a.next_attempt_at
                .cmp(&b.next_attempt_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy::from_config(&DiscoveryConfig::default())
    }

    #[test]
    fn three_attempts_then_give_up() {
        let now = Utc::now();
        let policy = policy();
        let first = policy
            .first_failure("abc", "a.md", 2, "timeout", now)
            .expect("queued");
        assert_eq!(first.attempts, 1);
        let second = policy
            .after_failure(&first, "timeout", now + Duration::minutes(5))
            .expect("requeued");
        assert_eq!(second.attempts, 2);
        assert!(policy
            .after_failure(&second, "timeout", now + Duration::minutes(10))
            .is_none());
    }

    #[test]
    fn entries_wait_at_least_the_delay() {
        let now = Utc::now();
        let policy = policy();
        let pending = policy
            .first_failure("abc", "a.md", 0, "503", now)
            .expect("queued");
        let queue = BTreeMap::from([(pending.id.clone(), pending)]);
        assert!(policy.due(&queue, now + Duration::minutes(4)).is_empty());
        assert_eq!(policy.due(&queue, now + Duration::minutes(5)).len(), 1);
    }
}
