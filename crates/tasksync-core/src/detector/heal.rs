//! Bulk healing: closes gaps between the ids linked in documents and the
//! ids the journal knows, using bulk fetches instead of one call per task.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use futures::future::join_all;
use serde::Serialize;
use serde_json::json;
use tokio::time::sleep;

use crate::activity::ActivityKind;
use crate::entry;
use crate::journal::backup::BackupCategory;
use crate::journal::model::TombstoneReason;
use crate::journal::Journal;
use crate::remote::{RemoteError, RemoteTask};

use super::discovery::LinkedTask;
use super::{BulkCache, ChangeDetector, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealSkip {
    /// A heal ran less than `heal.min_interval_secs` ago.
    Throttled,
    /// Every linked id is already tracked or tombstoned.
    NoGap,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealStage {
    ActiveBulk,
    Individual,
}

/// Why a heal stopped early. Entries healed before the stop are kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealAbort {
    pub stage: HealStage,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct HealReport {
    pub gap: usize,
    pub healed_count: usize,
    pub failed_count: usize,
    pub tombstoned_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skipped: Option<HealSkip>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<HealAbort>,
    pub api_calls: u32,
}

impl ChangeDetector {
    /// Tracks every linked task the journal is missing.
    ///
    /// Skipped when throttled or when there is no gap, unless `force`.
    /// Auto-save is suspended for the run and every healed entry is saved
    /// as it lands; the journal is flushed on the way out whatever happened.
    pub async fn heal_journal(
        &mut self,
        journal: &mut Journal,
        force: bool,
    ) -> Result<HealReport, SyncError> {
        let now = self.clock.now();
        let calls_before = self.gateway.total_calls();
        let mut report = HealReport::default();

        if !force {
            if let Some(last) = self.last_heal_at {
                if now - last < self.config.heal.min_interval() {
                    tracing::debug!(%last, "heal throttled");
                    report.skipped = Some(HealSkip::Throttled);
                    return Ok(report);
                }
            }
        }
        self.last_heal_at = Some(now);

        let linked = self.linked_by_canonical_id().await?;
        let gap: Vec<(String, LinkedTask)> = linked
            .into_iter()
            .filter(|(id, task)| {
                !journal.is_known(id) && journal.find_by_legacy_id(&task.id).is_none()
            })
            .collect();
        report.gap = gap.len();

        if gap.is_empty() && !force {
            journal.set_last_validation(now);
            journal.flush_if_due()?;
            report.skipped = Some(HealSkip::NoGap);
            report.api_calls = self.gateway.total_calls() - calls_before;
            return Ok(report);
        }

        tracing::info!(gap = gap.len(), force, "healing journal");
        journal.create_backup(BackupCategory::Heal)?;
        journal.suspend_auto_save();
        let outcome = self.heal_gap(journal, gap, &mut report).await;
        if outcome.is_ok() && report.aborted.is_none() {
            journal.set_last_validation(self.clock.now());
        }
        journal.resume_auto_save();
        let flushed = journal.flush();
        outcome?;
        flushed?;

        report.api_calls = self.gateway.total_calls() - calls_before;
        tracing::info!(
            healed = report.healed_count,
            failed = report.failed_count,
            tombstoned = report.tombstoned_count,
            aborted = report.aborted.is_some(),
            api_calls = report.api_calls,
            "heal finished"
        );
        self.record_activity(
            ActivityKind::HealCompleted,
            None,
            json!({
                "gap": report.gap,
                "healed": report.healed_count,
                "failed": report.failed_count,
                "tombstoned": report.tombstoned_count,
                "aborted": report.aborted,
                "api_calls": report.api_calls,
            }),
        );
        Ok(report)
    }

    async fn heal_gap(
        &mut self,
        journal: &mut Journal,
        gap: Vec<(String, LinkedTask)>,
        report: &mut HealReport,
    ) -> Result<(), SyncError> {
        let fetched_at = self.clock.now();
        let active = match self.gateway.get_active_tasks_once().await {
            Ok(active) => active,
            Err(err) if err.is_rate_limited() => {
                tracing::warn!("rate limited on active-task bulk fetch; aborting heal");
                report.aborted = Some(HealAbort {
                    stage: HealStage::ActiveBulk,
                    reason: err.to_string(),
                });
                return Ok(());
            }
            Err(err) => return Err(SyncError::BulkFetchFailed(err)),
        };
        let mut bulk: HashMap<String, RemoteTask> = active
            .into_iter()
            .map(|task| (task.id.clone(), task))
            .collect();

        let missing: HashSet<String> = gap
            .iter()
            .map(|(id, _)| id.clone())
            .filter(|id| !bulk.contains_key(id))
            .collect();
        if !missing.is_empty() {
            for (id, task) in self.fetch_completed_bulk(&missing).await {
                bulk.entry(id).or_insert(task);
            }
        }
        self.bulk_cache = Some(BulkCache {
            fetched_at,
            tasks: bulk,
        });

        for (id, linked) in gap {
            if journal.is_known(&id) {
                continue;
            }
            let now = self.clock.now();
            let legacy_id = Some(linked.id.clone());
            let cached = self
                .bulk_cache
                .as_ref()
                .and_then(|cache| cache.tasks.get(&id))
                .cloned();
            match cached {
                Some(remote) if remote.is_deleted => {
                    self.tombstone(
                        journal,
                        &id,
                        TombstoneReason::RemoteDeleted,
                        Some(linked.local.path.clone()),
                        None,
                        "bulk fetch reports the task deleted",
                    );
                    report.tombstoned_count += 1;
                }
                Some(remote) => {
                    let task = entry::from_bulk(&remote, &linked.local, legacy_id, fetched_at, now);
                    if journal.add_task(task) {
                        report.healed_count += 1;
                    }
                }
                None => match self.gateway.get_task(&id).await {
                    Ok(remote) if remote.is_deleted => {
                        self.tombstone(
                            journal,
                            &id,
                            TombstoneReason::RemoteDeleted,
                            Some(linked.local.path.clone()),
                            None,
                            "remote reports the task deleted",
                        );
                        report.tombstoned_count += 1;
                    }
                    Ok(remote) => {
                        self.cycle_cache.insert(id.clone(), remote.clone());
                        let task = entry::from_fetched(&remote, &linked.local, legacy_id, now);
                        if journal.add_task(task) {
                            report.healed_count += 1;
                        }
                    }
                    Err(err) if err.is_permanent() => {
                        self.tombstone(
                            journal,
                            &id,
                            TombstoneReason::from_status(err.http_status()),
                            Some(linked.local.path.clone()),
                            err.http_status(),
                            "absent from bulk and individual fetches",
                        );
                        report.tombstoned_count += 1;
                    }
                    Err(err) if err.is_rate_limited() => {
                        tracing::warn!(task_id = %id, "rate limited during individual fallback; stopping heal");
                        report.aborted = Some(HealAbort {
                            stage: HealStage::Individual,
                            reason: err.to_string(),
                        });
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(task_id = %id, error = %err, "individual fetch failed during heal");
                        report.failed_count += 1;
                        continue;
                    }
                },
            }
            journal.drop_discovery(&linked.id);
            journal.save()?;
        }
        Ok(())
    }

    /// Completed tasks across all projects, walked in batches of
    /// `project_concurrency`. The pause between batches doubles after a
    /// rate-limited batch and decays back toward the base otherwise.
    /// Stops early once every wanted id has turned up.
    async fn fetch_completed_bulk(&self, wanted: &HashSet<String>) -> HashMap<String, RemoteTask> {
        let mut found = HashMap::new();
        let projects = match self.gateway.list_projects().await {
            Ok(projects) => projects,
            Err(err) => {
                tracing::warn!(error = %err, "project listing failed; skipping completed-task fetch");
                return found;
            }
        };

        let heal = &self.config.heal;
        let base = Duration::from_millis(heal.batch_delay_ms);
        let max = Duration::from_millis(heal.max_batch_delay_ms.max(heal.batch_delay_ms));
        let mut delay = base;
        for (index, batch) in projects.chunks(heal.project_concurrency.max(1)).enumerate() {
            if index > 0 && !delay.is_zero() {
                sleep(delay).await;
            }
            let results =
                join_all(batch.iter().map(|project| self.completed_for_project(&project.id))).await;
            let mut limited = false;
            for (project, result) in batch.iter().zip(results) {
                match result {
                    Ok(tasks) => {
                        for task in tasks {
                            found.entry(task.id.clone()).or_insert(task);
                        }
                    }
                    Err(err) => {
                        limited |= err.is_rate_limited();
                        tracing::warn!(project_id = %project.id, error = %err, "completed-task fetch failed");
                    }
                }
            }
            delay = next_batch_delay(delay, base, max, limited);
            if wanted.iter().all(|id| found.contains_key(id)) {
                break;
            }
        }
        found
    }

    async fn completed_for_project(&self, project_id: &str) -> Result<Vec<RemoteTask>, RemoteError> {
        let mut tasks = Vec::new();
        let mut cursor: Option<String> = None;
        for _ in 0..self.config.heal.max_completed_pages {
            let page = self
                .gateway
                .completed_tasks_page(project_id, cursor.as_deref())
                .await?;
            tasks.extend(page.items);
            match page.next_cursor {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(tasks)
    }
}

/// Smallest pause a rate-limited batch backs off to, even from a zero base.
const MIN_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Pause before the next completed-task batch.
fn next_batch_delay(delay: Duration, base: Duration, max: Duration, limited: bool) -> Duration {
    if limited {
        return (delay.max(MIN_BATCH_DELAY) * 2).min(max);
    }
    let halved = delay / 2;
    if halved < MIN_BATCH_DELAY {
        return base;
    }
    halved.max(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: Duration = Duration::from_millis(8_000);

    #[test]
    fn rate_limit_backs_off_from_a_zero_base() {
        let delay = next_batch_delay(Duration::ZERO, Duration::ZERO, MAX, true);
        assert_eq!(delay, Duration::from_millis(200));
        let delay = next_batch_delay(delay, Duration::ZERO, MAX, true);
        assert_eq!(delay, Duration::from_millis(400));
    }

    #[test]
    fn backoff_is_capped_and_decays_to_the_base() {
        let base = Duration::from_millis(500);
        assert_eq!(next_batch_delay(Duration::from_millis(6_000), base, MAX, true), MAX);
        assert_eq!(
            next_batch_delay(Duration::from_millis(4_000), base, MAX, false),
            Duration::from_millis(2_000)
        );
        assert_eq!(next_batch_delay(Duration::from_millis(600), base, MAX, false), base);
        assert_eq!(
            next_batch_delay(Duration::from_millis(150), Duration::ZERO, MAX, false),
            Duration::ZERO
        );
    }

    #[test]
    fn zero_cap_disables_pauses() {
        assert_eq!(
            next_batch_delay(Duration::ZERO, Duration::ZERO, Duration::ZERO, true),
            Duration::ZERO
        );
    }
}
