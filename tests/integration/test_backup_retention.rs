//! Backups taken by rebuilds, failure atomicity and retention.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use bugfuse::store::SNAPSHOT_META_FILE;
use bugfuse::{BugId, BugQuery, IndexVersion, SearchError};
use chrono::{TimeDelta, Utc};

use crate::common::{TestContext, abc_reports, memory_source};

fn dir_bytes(dir: &Path) -> BTreeMap<String, Vec<u8>> {
    fs::read_dir(dir)
        .unwrap()
        .map(|entry| {
            let entry = entry.unwrap();
            (
                entry.file_name().to_string_lossy().into_owned(),
                fs::read(entry.path()).unwrap(),
            )
        })
        .collect()
}

#[test]
fn test_rebuild_backs_up_the_replaced_version() {
    let test = TestContext::new(memory_source(abc_reports()));
    test.context.rebuild().unwrap();
    let v1_files = dir_bytes(&test.context.store().live_dir());

    let report = test.context.rebuild().unwrap();
    let snapshot = report.snapshot.expect("second rebuild must back up v1");
    assert_eq!(snapshot.version, IndexVersion(1));

    let mut backed_up = dir_bytes(&snapshot.path);
    assert!(backed_up.remove(SNAPSHOT_META_FILE).is_some());
    assert_eq!(backed_up, v1_files);
}

#[test]
fn test_failed_backup_leaves_live_index_untouched() {
    let test = TestContext::new(memory_source(abc_reports()));
    test.context.rebuild().unwrap();

    // A plain file where the backup directory should be
    let backup_dir = test.context.store().backups().dir().to_path_buf();
    fs::write(&backup_dir, b"not a directory").unwrap();

    let live_dir = test.context.store().live_dir();
    let before = dir_bytes(&live_dir);

    let err = test.context.rebuild().unwrap_err();
    assert!(matches!(err, SearchError::Backup { .. }), "got {err:?}");

    assert_eq!(dir_bytes(&live_dir), before);
    assert_eq!(test.context.store().version(), Some(IndexVersion(1)));
    assert!(!test.context.store().is_rebuilding());
    let leftovers: Vec<String> = fs::read_dir(test.context.store().data_dir())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name != "live")
        .collect();
    assert!(leftovers.is_empty(), "stray directories: {leftovers:?}");

    let response = test
        .context
        .search(&BugQuery::new().with_summary("null pointer parser"), None, Some(1))
        .unwrap();
    assert_eq!(response.version, IndexVersion(1));
    assert_eq!(response.hits[0].bug_id, BugId::from("A"));

    fs::remove_file(&backup_dir).unwrap();
    assert_eq!(test.context.rebuild().unwrap().version, IndexVersion(2));
}

#[test]
fn test_retention_keeps_important_and_monthly_snapshots() {
    let test = TestContext::new(memory_source(abc_reports()));
    for _ in 0..4 {
        test.context.rebuild().unwrap();
    }

    let backups = test.context.store().backups();
    let snapshots = backups.list().unwrap();
    assert_eq!(snapshots.len(), 3);
    assert_eq!(
        snapshots.iter().map(|s| s.version).collect::<Vec<_>>(),
        vec![IndexVersion(1), IndexVersion(2), IndexVersion(3)]
    );

    backups.set_important(&snapshots[0].name, true).unwrap();

    // Nothing has expired yet
    assert!(backups.prune(30, Utc::now()).unwrap().is_empty());

    let much_later = Utc::now() + TimeDelta::days(400);
    let pruned = backups.prune(30, much_later).unwrap();
    assert_eq!(pruned.len(), 1);
    assert_eq!(pruned[0].version, IndexVersion(2));
    assert!(!pruned[0].path.exists());

    let remaining: Vec<IndexVersion> = backups.list().unwrap().iter().map(|s| s.version).collect();
    assert_eq!(remaining, vec![IndexVersion(1), IndexVersion(3)]);
}

#[test]
fn test_unknown_snapshot_name() {
    let test = TestContext::new(memory_source(abc_reports()));
    let result = test.context.store().backups().set_important("no-such-snapshot", true);
    assert!(matches!(result, Err(SearchError::SnapshotNotFound { .. })));
}
