use std::collections::{BTreeMap, BTreeSet, HashSet};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::document::{front_matter_field, DocumentHandle};
use crate::entry::{self, LocalObservation};
use crate::journal::model::{PendingDiscovery, TombstoneReason, TrackedTask};
use crate::journal::Journal;
use crate::lines::{find_anchor, linked_ids, LineClassifier};
use crate::remote::RemoteError;

use super::{ChangeDetector, SyncError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanMode {
    /// No scan has completed yet.
    #[default]
    Cold,
    /// Everything is rescanned because the baseline is small or stale.
    Full,
    Incremental,
}

impl ScanMode {
    pub fn is_full(self) -> bool {
        !matches!(self, ScanMode::Incremental)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub mode: ScanMode,
    pub documents_scanned: usize,
    pub read_failures: usize,
    pub candidates: usize,
    /// Tracked tasks whose line changed completion since the journal saw it.
    pub refreshed: usize,
    pub added: usize,
    pub tombstoned: usize,
    pub queued: usize,
    pub retried: usize,
}

/// A task line that links a remote task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkedTask {
    pub id: String,
    pub local: LocalObservation,
}

/// Every linked task in one document. A task line's remote id is the first
/// one linked from its block.
pub fn scan_document(
    classifier: &dyn LineClassifier,
    path: &str,
    text: &str,
    note_id_field: &str,
) -> Vec<LinkedTask> {
    let note_id = front_matter_field(text, note_id_field);
    let lines: Vec<&str> = text.lines().collect();
    let mut found = Vec::new();
    for (index, line) in lines.iter().enumerate() {
        let Some(status) = classifier.task_status(line) else {
            continue;
        };
        let Some(id) = linked_ids(classifier, &lines, index).into_iter().next() else {
            continue;
        };
        found.push(LinkedTask {
            id,
            local: LocalObservation {
                path: path.to_string(),
                note_id: note_id.clone(),
                line: index,
                anchor: find_anchor(line),
                text: line.to_string(),
                completed: status.is_completed(),
            },
        });
    }
    found
}

/// Outcome of trying to turn a linked id into a tracked task.
pub(crate) enum Materialized {
    Added(TrackedTask),
    Tombstoned,
    /// Already tracked or tombstoned under its canonical id.
    Known,
    Failed(RemoteError),
}

impl ChangeDetector {
    pub fn scan_mode(&self, journal: &Journal, now: DateTime<Utc>) -> ScanMode {
        let (Some(_), Some(last_full)) = (journal.last_scan_at(), journal.last_full_scan_at()) else {
            return ScanMode::Cold;
        };
        if journal.task_count() < self.config.sync.min_known_tasks_for_incremental {
            return ScanMode::Full;
        }
        if now - last_full > self.config.sync.full_scan_max_age() {
            return ScanMode::Full;
        }
        ScanMode::Incremental
    }

    /// Documents to read this scan, plus how many vault entries could not
    /// be listed.
    fn documents_to_scan(
        &self,
        journal: &Journal,
        mode: ScanMode,
    ) -> Result<(Vec<DocumentHandle>, usize), SyncError> {
        let listing = self.documents.list_documents()?;
        let mut documents = listing.documents;
        if let (ScanMode::Incremental, Some(since)) = (mode, journal.last_scan_at()) {
            documents.retain(|doc| doc.modified_at >= since);
        }
        Ok((documents, listing.failures))
    }

    /// Reads every document and returns the linked tasks. Documents that
    /// fail to read are logged and counted, not fatal.
    fn collect_linked(&self, documents: &[DocumentHandle]) -> (Vec<LinkedTask>, usize) {
        let field = self.config.vault.note_id_field.as_str();
        let mut linked = Vec::new();
        let mut failures = 0;
        for doc in documents {
            match self.documents.read(&doc.path) {
                Ok(text) => linked.extend(scan_document(self.lines.as_ref(), &doc.path, &text, field)),
                Err(err) => {
                    failures += 1;
                    tracing::warn!(path = %doc.path, error = %err, "failed to read document during scan");
                }
            }
        }
        (linked, failures)
    }

    /// Finds linked tasks the journal does not know and starts tracking them.
    pub async fn discover_new_tasks(
        &mut self,
        journal: &mut Journal,
        new_tasks: &mut Vec<TrackedTask>,
        cycle_start: DateTime<Utc>,
    ) -> Result<DiscoveryReport, SyncError> {
        let mode = self.scan_mode(journal, cycle_start);
        let (documents, list_failures) = self.documents_to_scan(journal, mode)?;
        let (linked, read_failures) = self.collect_linked(&documents);
        let read_failures = read_failures + list_failures;
        let mut report = DiscoveryReport {
            mode,
            documents_scanned: documents.len(),
            read_failures,
            ..DiscoveryReport::default()
        };

        let mut seen = HashSet::new();
        for candidate in linked {
            if !seen.insert(candidate.id.clone()) {
                continue;
            }
            if self.refresh_tracked(journal, &candidate) {
                report.refreshed += 1;
                continue;
            }
            if self.already_known(journal, &candidate.id) {
                continue;
            }
            report.candidates += 1;

            let legacy_id = Some(candidate.id.clone());
            let canonical = match self.ids.canonicalize(&self.gateway, &candidate.id).await {
                Ok(canonical) => canonical,
                Err(err) => {
                    self.queue_first_failure(journal, &candidate, &err, new_tasks, &mut report);
                    continue;
                }
            };
            if canonical != candidate.id && !seen.insert(canonical.clone()) {
                continue;
            }

            match self
                .materialize(journal, &canonical, legacy_id, &candidate.local)
                .await?
            {
                Materialized::Added(task) => {
                    report.added += 1;
                    new_tasks.push(task);
                }
                Materialized::Tombstoned => report.tombstoned += 1,
                Materialized::Known => {}
                Materialized::Failed(err) => {
                    self.queue_first_failure(journal, &candidate, &err, new_tasks, &mut report);
                }
            }
        }

        if read_failures == 0 {
            journal.set_last_scan(cycle_start, mode.is_full());
        } else {
            tracing::warn!(read_failures, "scan incomplete; keeping previous scan timestamp");
        }
        tracing::info!(
            mode = ?mode,
            documents = report.documents_scanned,
            added = report.added,
            queued = report.queued,
            "discovery finished"
        );
        Ok(report)
    }

    /// Flags a tracked task whose line flipped completion so it is compared
    /// this cycle. The journal keeps its previous value until the comparison
    /// sees the flip.
    fn refresh_tracked(&mut self, journal: &Journal, candidate: &LinkedTask) -> bool {
        let tracked = journal
            .get_task(&candidate.id)
            .or_else(|| journal.find_by_legacy_id(&candidate.id));
        let Some(tracked) = tracked else {
            return false;
        };
        if tracked.local_completed == candidate.local.completed {
            return false;
        }
        tracing::debug!(task_id = %tracked.remote_id, completed = candidate.local.completed, "local completion changed");
        self.local_flips.insert(tracked.remote_id.clone());
        true
    }

    fn already_known(&self, journal: &Journal, id: &str) -> bool {
        journal.is_known(id)
            || journal.find_by_legacy_id(id).is_some()
            || journal.pending_discoveries().contains_key(id)
    }

    fn queue_first_failure(
        &self,
        journal: &mut Journal,
        candidate: &LinkedTask,
        err: &RemoteError,
        new_tasks: &mut Vec<TrackedTask>,
        report: &mut DiscoveryReport,
    ) {
        let now = self.clock.now();
        let local = &candidate.local;
        match self
            .retry
            .first_failure(&candidate.id, &local.path, local.line, &err.to_string(), now)
        {
            Some(pending) => {
                tracing::info!(task_id = %candidate.id, error = %err, "fetch failed; queued for retry");
                journal.queue_discovery(pending);
                report.queued += 1;
            }
            None => {
                if let Some(task) = self.track_without_remote(journal, &candidate.id, local, None) {
                    new_tasks.push(task);
                }
            }
        }
    }

    /// Starts tracking a task whose remote state could not be read. The
    /// policy checks it on the next cycle.
    fn track_without_remote(
        &self,
        journal: &mut Journal,
        id: &str,
        local: &LocalObservation,
        legacy_id: Option<String>,
    ) -> Option<TrackedTask> {
        tracing::warn!(task_id = %id, "giving up on initial fetch; tracking without remote state");
        let task = entry::stub(id, local, legacy_id, self.clock.now());
        journal.add_task(task.clone()).then_some(task)
    }

    /// One fetch (or cache hit) for a newly linked `id`.
    pub(crate) async fn materialize(
        &mut self,
        journal: &mut Journal,
        id: &str,
        legacy_id: Option<String>,
        local: &LocalObservation,
    ) -> Result<Materialized, SyncError> {
        if journal.is_known(id) {
            return Ok(Materialized::Known);
        }
        let now = self.clock.now();
        match self.fetch_remote(journal, id).await {
            Ok((remote, _)) if remote.is_deleted => {
                self.tombstone(
                    journal,
                    id,
                    TombstoneReason::RemoteDeleted,
                    Some(local.path.clone()),
                    None,
                    "remote reports the task deleted",
                );
                Ok(Materialized::Tombstoned)
            }
            Ok((remote, checked_at)) => {
                let task = if checked_at == now {
                    entry::from_fetched(&remote, local, legacy_id, now)
                } else {
                    entry::from_bulk(&remote, local, legacy_id, checked_at, now)
                };
                if !journal.add_task(task.clone()) {
                    return Ok(Materialized::Known);
                }
                tracing::info!(task_id = %id, path = %local.path, "tracking new task");
                Ok(Materialized::Added(task))
            }
            Err(err) if err.is_permanent() => {
                self.tombstone(
                    journal,
                    id,
                    TombstoneReason::from_status(err.http_status()),
                    Some(local.path.clone()),
                    err.http_status(),
                    "discovery fetch failed permanently",
                );
                Ok(Materialized::Tombstoned)
            }
            Err(err) => Ok(Materialized::Failed(err)),
        }
    }

    /// Retries queued discoveries that are due. Entries whose line no
    /// longer links the id are dropped; exhausted entries are tracked
    /// without remote state.
    pub async fn process_retry_queue(
        &mut self,
        journal: &mut Journal,
        new_tasks: &mut Vec<TrackedTask>,
    ) -> Result<usize, SyncError> {
        let now = self.clock.now();
        let due = self.retry.due(journal.pending_discoveries(), now);
        let mut processed = 0;
        for pending in due {
            processed += 1;
            if journal.is_known(&pending.id) || journal.find_by_legacy_id(&pending.id).is_some() {
                journal.drop_discovery(&pending.id);
                continue;
            }
            let Some(local) = self.relocate_pending(&pending) else {
                tracing::debug!(task_id = %pending.id, path = %pending.path, "queued task no longer linked; dropping");
                journal.drop_discovery(&pending.id);
                continue;
            };

            let canonical = match self.ids.canonicalize(&self.gateway, &pending.id).await {
                Ok(canonical) => canonical,
                Err(err) => {
                    self.requeue(journal, &pending, &local, None, &err, new_tasks);
                    continue;
                }
            };
            let legacy_id = Some(pending.id.clone());
            match self.materialize(journal, &canonical, legacy_id.clone(), &local).await? {
                Materialized::Added(task) => {
                    journal.drop_discovery(&pending.id);
                    new_tasks.push(task);
                }
                Materialized::Tombstoned | Materialized::Known => {
                    journal.drop_discovery(&pending.id);
                }
                Materialized::Failed(err) => {
                    self.requeue(journal, &pending, &local, Some(&canonical), &err, new_tasks);
                }
            }
        }
        Ok(processed)
    }

    fn requeue(
        &self,
        journal: &mut Journal,
        pending: &PendingDiscovery,
        local: &LocalObservation,
        canonical: Option<&str>,
        err: &RemoteError,
        new_tasks: &mut Vec<TrackedTask>,
    ) {
        let now = self.clock.now();
        match self.retry.after_failure(pending, &err.to_string(), now) {
            Some(next) => {
                tracing::info!(task_id = %pending.id, attempts = next.attempts, error = %err, "retry failed; requeued");
                journal.queue_discovery(PendingDiscovery {
                    line: local.line,
                    path: local.path.clone(),
                    ..next
                });
            }
            None => {
                journal.drop_discovery(&pending.id);
                let id = canonical.unwrap_or(&pending.id);
                if let Some(task) =
                    self.track_without_remote(journal, id, local, Some(pending.id.clone()))
                {
                    new_tasks.push(task);
                }
            }
        }
    }

    /// The queued task's line as it reads now, searching near the recorded
    /// line when the document has shifted.
    fn relocate_pending(&self, pending: &PendingDiscovery) -> Option<LocalObservation> {
        let text = match self.documents.read(&pending.path) {
            Ok(text) => text,
            Err(err) => {
                tracing::debug!(path = %pending.path, error = %err, "queued task's document unreadable");
                return None;
            }
        };
        let field = self.config.vault.note_id_field.as_str();
        scan_document(self.lines.as_ref(), &pending.path, &text, field)
            .into_iter()
            .filter(|linked| linked.id == pending.id)
            .min_by_key(|linked| linked.local.line.abs_diff(pending.line))
            .map(|linked| linked.local)
    }

    /// Every remote id linked from any task line in any document,
    /// deduplicated and canonicalized. Ids whose mapping lookup fails are
    /// kept as written.
    pub async fn scan_all_files_for_task_ids(&mut self) -> Result<BTreeSet<String>, SyncError> {
        Ok(self.linked_by_canonical_id().await?.into_keys().collect())
    }

    /// First linked occurrence of each canonical id across all documents.
    /// `LinkedTask::id` keeps the id as written.
    pub(crate) async fn linked_by_canonical_id(
        &mut self,
    ) -> Result<BTreeMap<String, LinkedTask>, SyncError> {
        let listing = self.documents.list_documents()?;
        let (linked, failures) = self.collect_linked(&listing.documents);
        let failures = failures + listing.failures;
        if failures > 0 {
            tracing::warn!(failures, "some documents could not be read for the id scan");
        }
        let raw: Vec<String> = linked
            .iter()
            .map(|linked| linked.id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let mapped = match self.ids.canonicalize_many(&self.gateway, &raw).await {
            Ok(mapped) => mapped,
            Err(err) => {
                tracing::warn!(error = %err, "id canonicalization failed; using ids as written");
                BTreeMap::new()
            }
        };
        let mut by_id = BTreeMap::new();
        for task in linked {
            let canonical = mapped.get(&task.id).cloned().unwrap_or_else(|| task.id.clone());
            by_id.entry(canonical).or_insert(task);
        }
        Ok(by_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lines::MarkdownLines;
    use pretty_assertions::assert_eq;

    #[test]
    fn scan_reads_links_from_task_blocks() {
        let text = "---\nuid: n-7\n---\n- [ ] Call bank\n    task/abc\n- [x] Done thing task/def ^a1\n- [ ] No link\n  plain note\n";
        let found = scan_document(&MarkdownLines, "daily.md", text, "uid");
        let ids: Vec<&str> = found.iter().map(|linked| linked.id.as_str()).collect();
        assert_eq!(ids, vec!["abc", "def"]);
        assert_eq!(found[0].local.line, 3);
        assert_eq!(found[0].local.note_id.as_deref(), Some("n-7"));
        assert!(found[1].local.completed);
        assert_eq!(found[1].local.anchor.as_deref(), Some("a1"));
    }

    #[test]
    fn nested_task_links_belong_to_the_nested_task() {
        let text = "- [ ] parent\n  - [ ] child task/xyz\n";
        let found = scan_document(&MarkdownLines, "a.md", text, "uid");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].local.line, 1);
    }
}
