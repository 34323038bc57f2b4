//! Cross-component behavior under failure: mid-apply rollback through the
//! session, and snapshot cache invalidation across sessions.

use repostate::{
    CacheError, ChangeOp, ChangeSet, EngineConfig, OpExecStatus, PlanOutcome, Session,
};
use repostate::cache::SnapshotStore;
use repostate::fingerprint::fingerprint_bytes;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn config(scratch: &Path) -> EngineConfig {
    EngineConfig {
        cache_dir: Some(scratch.join("cache")),
        log_dir: Some(scratch.join("logs")),
        ..EngineConfig::default()
    }
}

#[test]
fn mid_apply_failure_rolls_back_everything() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    fs::write(project.path().join("a.txt"), "alpha").unwrap();
    fs::write(project.path().join("b.txt"), "beta").unwrap();

    let mut session = Session::open(project.path(), config(scratch.path())).unwrap();
    let set = ChangeSet::new(vec![
        ChangeOp::Update {
            path: "a.txt".to_string(),
            expected_base: fingerprint_bytes(b"alpha"),
            new_content: b"alpha v2".to_vec(),
        },
        ChangeOp::Create {
            path: "fresh.txt".to_string(),
            content: b"fresh".to_vec(),
        },
        ChangeOp::Delete {
            path: "b.txt".to_string(),
            expected_base: fingerprint_bytes(b"beta"),
        },
    ]);
    let validated = match session.propose_changes(set) {
        PlanOutcome::Ready(validated) => validated,
        PlanOutcome::Conflicts(report) => panic!("unexpected conflicts: {report:?}"),
    };

    // b.txt changes on disk between planning and apply, so the delete's
    // execution-time base check fails after two ops already applied.
    fs::write(session.root().join("b.txt"), "changed externally").unwrap();

    let result = session.apply_changes(validated, false).unwrap();
    assert!(!result.ok);
    assert_eq!(result.outcomes[0].status, OpExecStatus::RolledBack);
    assert_eq!(result.outcomes[1].status, OpExecStatus::RolledBack);
    assert!(matches!(result.outcomes[2].status, OpExecStatus::Failed(_)));

    // Pre-apply state for every touched path.
    assert_eq!(
        fs::read_to_string(session.root().join("a.txt")).unwrap(),
        "alpha"
    );
    assert!(!session.root().join("fresh.txt").exists());
    assert_eq!(
        fs::read_to_string(session.root().join("b.txt")).unwrap(),
        "changed externally"
    );

    // Session state still matches the pre-apply scan.
    assert!(!session.tree().contains("fresh.txt"));
    assert_eq!(
        session.snapshot().entries["a.txt"].fingerprint,
        fingerprint_bytes(b"alpha")
    );
}

#[test]
fn changed_ignore_patterns_invalidate_the_cache() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    fs::write(project.path().join("a.txt"), "alpha").unwrap();

    let first = Session::open(project.path(), config(scratch.path())).unwrap();
    assert_eq!(first.last_scan_stats().content_reads, 1);
    drop(first);

    // Same cache dir, different pattern set: identity mismatch forces a
    // full rescan instead of partial reuse.
    let mut altered = config(scratch.path());
    altered.ignore.push("dist".to_string());
    let second = Session::open(project.path(), altered).unwrap();
    assert_eq!(second.last_scan_stats().content_reads, 1);
    assert_eq!(second.last_scan_stats().reused, 0);
}

#[test]
fn corrupt_cache_file_forces_full_rescan() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    fs::write(project.path().join("a.txt"), "alpha").unwrap();

    let cfg = config(scratch.path());
    let first = Session::open(project.path(), cfg.clone()).unwrap();
    let root = first.root().to_path_buf();
    drop(first);

    let store = SnapshotStore::new(scratch.path().join("cache"));
    fs::write(store.file_path(&root), "garbage, not json").unwrap();

    let second = Session::open(project.path(), cfg).unwrap();
    assert_eq!(second.last_scan_stats().content_reads, 1);
}

#[test]
fn concurrent_cache_writers_are_detected() {
    let project = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    fs::write(project.path().join("a.txt"), "alpha").unwrap();

    let session = Session::open(project.path(), config(scratch.path())).unwrap();
    let root = session.root().to_path_buf();
    let snapshot = session.snapshot().clone();
    drop(session);

    let cache_dir = scratch.path().join("cache");
    let mut ours = SnapshotStore::new(&cache_dir);
    ours.load(&root, &EngineConfig::default().ignore);

    // Another session saves behind our back.
    let mut theirs = SnapshotStore::new(&cache_dir);
    theirs.load(&root, &EngineConfig::default().ignore);
    theirs.save(&root, &snapshot).unwrap();

    let err = ours.save(&root, &snapshot).unwrap_err();
    assert!(matches!(err, CacheError::ConcurrentModification { .. }));
}
