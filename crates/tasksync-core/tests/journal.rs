mod support;

use std::fs;
use std::io;

use pretty_assertions::assert_eq;
use tasksync_core::entry::{self, LocalObservation};
use tasksync_core::journal::backup::BackupCategory;
use tasksync_core::journal::model::{JournalData, TrackedTask};
use tasksync_core::journal::{persist, JournalError, LoadSource};

use support::{start_time, Harness};

fn observed(path: &str, line: usize) -> LocalObservation {
    LocalObservation {
        path: path.to_string(),
        note_id: None,
        line,
        anchor: None,
        text: format!("- [ ] Task on line {line}"),
        completed: false,
    }
}

fn tracked(id: &str, line: usize) -> TrackedTask {
    entry::stub(id, &observed("inbox.md", line), None, start_time())
}

fn write_legacy_journal(h: &Harness, keys: &[&str]) {
    let mut data = JournalData::default();
    for (index, key) in keys.iter().enumerate() {
        data.tasks.insert(key.to_string(), tracked(key, index + 1));
    }
    fs::create_dir_all(h.state_dir()).expect("state dir");
    let bytes = serde_json::to_vec_pretty(&data).expect("serialize");
    fs::write(persist::journal_path(&h.state_dir()), bytes).expect("write journal");
}

fn state_files(h: &Harness, prefix: &str) -> Vec<String> {
    fs::read_dir(h.state_dir())
        .expect("read state dir")
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.file_name().to_string_lossy().to_string())
        .filter(|name| name.starts_with(prefix))
        .collect()
}

#[tokio::test]
async fn saved_journal_reloads_from_the_primary_file() {
    let h = Harness::new();
    {
        let (mut journal, _) = h.start().await;
        assert!(journal.add_task(tracked("abc", 1)));
        assert!(journal.add_task(tracked("def", 2)));
        journal.save().expect("save");
    }

    let mut journal = h.open_journal();
    let report = h
        .detector()
        .load_journal(&mut journal)
        .await
        .expect("load");
    assert_eq!(report.source, LoadSource::Primary);
    assert_eq!(report.tasks, 2);
    assert!(journal.is_tracked("abc"));
    assert_eq!(journal.get_task("def").map(|t| t.location.line), Some(2));
}

#[tokio::test]
async fn failed_write_leaves_the_primary_untouched() {
    let h = Harness::new();
    let (mut journal, _) = h.start().await;
    journal.add_task(tracked("abc", 1));
    journal.save().expect("save");
    let before = fs::read(journal.path()).expect("primary");

    journal.add_task(tracked("def", 2));
    let err = journal
        .save_with(|_| Err(io::Error::new(io::ErrorKind::Other, "disk full")))
        .expect_err("hook fails");
    assert!(matches!(err, JournalError::Io(_)));

    assert_eq!(fs::read(journal.path()).expect("primary"), before);
    assert!(state_files(&h, "journal.v2.json.tmp").is_empty());
    assert!(journal.is_dirty());
}

#[tokio::test]
async fn damaged_primary_is_recovered_from_the_newest_backup() {
    let h = Harness::new();
    {
        let (mut journal, _) = h.start().await;
        journal.add_task(tracked("abc", 1));
        journal.add_task(tracked("def", 2));
        journal.save().expect("save");
        journal.create_backup(BackupCategory::Manual).expect("backup");
    }
    fs::write(persist::journal_path(&h.state_dir()), b"{\"version\": 2, \"tasks\": ").expect("corrupt");

    let mut journal = h.open_journal();
    let mut detector = h.detector();
    let report = detector.load_journal(&mut journal).await.expect("load");
    assert!(matches!(report.source, LoadSource::Backup(_)));
    assert_eq!(journal.task_count(), 2);
    assert_eq!(state_files(&h, "journal.v2.corrupt.").len(), 1);

    // The recovered state is written back as the new primary.
    let text = fs::read_to_string(journal.path()).expect("primary");
    let data: JournalData = serde_json::from_str(&text).expect("parses");
    assert_eq!(data.tasks.len(), 2);
}

#[tokio::test]
async fn gutted_journal_is_treated_as_damaged() {
    let h = Harness::new();
    {
        let (mut journal, _) = h.start().await;
        journal.add_task(tracked("abc", 1));
        journal.save().expect("save");
        journal.create_backup(BackupCategory::Manual).expect("backup");
    }
    let mut data = JournalData::default();
    data.stats.total_tasks = 40;
    fs::write(
        persist::journal_path(&h.state_dir()),
        serde_json::to_vec(&data).expect("serialize"),
    )
    .expect("write");

    let (journal, _) = h.start().await;
    assert!(journal.is_tracked("abc"));
}

#[tokio::test]
async fn unrecoverable_journal_keeps_the_in_memory_state() {
    let h = Harness::new();
    let (mut journal, mut detector) = h.start().await;
    journal.add_task(tracked("abc", 1));
    fs::write(journal.path(), b"not json at all").expect("corrupt");

    let err = detector.load_journal(&mut journal).await.expect_err("unrecoverable");
    assert!(matches!(err, JournalError::Unrecoverable { .. }));
    assert!(journal.is_tracked("abc"));
}

#[tokio::test]
async fn legacy_keys_are_migrated_on_load() {
    let h = Harness::new();
    write_legacy_journal(&h, &["111", "222", "333"]);
    h.remote.map_legacy("111", "aaa1");
    h.remote.map_legacy("222", "bbb2");
    h.remote.map_legacy("333", "ccc3");

    let (journal, _) = h.start().await;
    assert_eq!(journal.task_count(), 3);
    let task = journal.get_task("bbb2").expect("migrated");
    assert_eq!(task.legacy_id.as_deref(), Some("222"));
    assert_eq!(task.remote_id, "bbb2");
    assert!(journal.get_task("222").is_none());
    assert_eq!(journal.find_by_legacy_id("333").map(|t| t.remote_id.as_str()), Some("ccc3"));
    assert_eq!(h.remote.mapping_calls(), 1);

    let migration_backups = journal
        .list_backups()
        .expect("backups")
        .into_iter()
        .filter(|info| info.category == BackupCategory::Migration)
        .count();
    assert_eq!(migration_backups, 1);
}

#[tokio::test]
async fn unmapped_legacy_keys_do_not_pile_up_backups() {
    let h = Harness::new();
    write_legacy_journal(&h, &["111"]);

    for _ in 0..4 {
        let (journal, _) = h.start().await;
        assert!(journal.is_tracked("111"));
        let migration_backups = journal
            .list_backups()
            .expect("backups")
            .into_iter()
            .filter(|info| info.category == BackupCategory::Migration)
            .count();
        assert_eq!(migration_backups, 0);
        h.advance(chrono::Duration::minutes(1));
    }
    // The "no mapping" answer is remembered across loads.
    assert_eq!(h.remote.mapping_calls(), 1);
}

#[tokio::test]
async fn migration_that_would_merge_tasks_is_refused() {
    let h = Harness::new();
    write_legacy_journal(&h, &["111", "222", "333"]);
    h.remote.map_legacy("111", "same1");
    h.remote.map_legacy("222", "same1");
    h.remote.map_legacy("333", "ccc3");

    let mut journal = h.open_journal();
    let mut detector = h.detector();
    let err = detector.load_journal(&mut journal).await.expect_err("mismatch");
    assert!(matches!(
        err,
        JournalError::MigrationCountMismatch { before: 3, after: 2 }
    ));
    assert!(journal.is_tracked("111"));
    assert!(journal.is_tracked("222"));
    assert!(!journal.is_tracked("same1"));

    let on_disk: JournalData =
        serde_json::from_slice(&fs::read(journal.path()).expect("primary")).expect("parses");
    assert!(on_disk.tasks.contains_key("111"));
}

#[tokio::test]
async fn reset_and_restore_round_trip_through_backups() {
    let h = Harness::new();
    let (mut journal, _) = h.start().await;
    journal.add_task(tracked("abc", 1));
    journal.save().expect("save");

    let backup = journal.reset().expect("reset");
    assert_eq!(journal.task_count(), 0);

    let restored = journal.restore_from_backup(&backup).expect("restore");
    assert_eq!(restored, 1);
    assert!(journal.is_tracked("abc"));
    assert!(journal
        .list_backups()
        .expect("backups")
        .iter()
        .any(|info| info.category == BackupCategory::PreRestore));
}
