use dupehound::actions::{
    ActionKind, MutationEngine, MutationError, MutationPolicy, MutationRequest, MutationState,
    TEMP_SUFFIX,
};
use dupehound::cache::HashCache;
use dupehound::duplicates::{CrcEngine, DuplicateStore, GroupKey, NoopObserver, StoreObserver};
use dupehound::scanner::{HashAlgorithm, ScanConfig, ScanEntry, Scanner};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Scan `dir` and return its store plus the key of its only group.
fn single_group(dir: &Path) -> (DuplicateStore, GroupKey) {
    let outcome = Scanner::new(vec![dir.to_path_buf()], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap();
    let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
    let store = CrcEngine::default()
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap()
        .store;
    assert_eq!(store.len(), 1);
    let key = store.groups().next().unwrap().key.clone();
    (store, key)
}

fn xyz() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    for name in ["x.bin", "y.bin", "z.bin"] {
        fs::write(root.join(name), b"three identical copies").unwrap();
    }
    (dir, root)
}

fn request(key: &GroupKey, root: &Path, action: ActionKind, victims: &[&str], survivors: &[&str]) -> MutationRequest {
    MutationRequest {
        group: key.clone(),
        victims: victims.iter().map(|v| root.join(v)).collect(),
        survivors: survivors.iter().map(|s| root.join(s)).collect(),
        action,
        use_trash: false,
    }
}

#[derive(Default)]
struct Recorder {
    members: Vec<PathBuf>,
    groups: Vec<GroupKey>,
}

impl StoreObserver for Recorder {
    fn on_member_removed(&mut self, _key: &GroupKey, entry: &ScanEntry) {
        self.members.push(entry.relative_path());
    }

    fn on_group_removed(&mut self, key: &GroupKey, _remaining: &[ScanEntry]) {
        self.groups.push(key.clone());
    }
}

#[cfg(unix)]
#[test]
fn test_soft_link_two_victims_removes_group() {
    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);
    let mut recorder = Recorder::default();

    let report = MutationEngine::default()
        .execute(
            &mut store,
            &request(&key, &root, ActionKind::SoftLink, &["y.bin", "z.bin"], &["x.bin"]),
            &mut recorder,
        )
        .unwrap();

    assert_eq!(report.state, MutationState::Committed);
    assert!(report.group_removed);
    assert!(store.is_empty());
    assert_eq!(recorder.members, [PathBuf::from("y.bin"), PathBuf::from("z.bin")]);
    assert_eq!(recorder.groups, [key]);

    for name in ["y.bin", "z.bin"] {
        let link = root.join(name);
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read(&link).unwrap(), b"three identical copies");
        let mut temp = link.into_os_string();
        temp.push(".");
        temp.push(TEMP_SUFFIX);
        assert!(!Path::new(&temp).exists());
    }
}

#[test]
fn test_delete_one_victim_keeps_group() {
    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);

    let report = MutationEngine::default()
        .execute(
            &mut store,
            &request(&key, &root, ActionKind::Delete, &["z.bin"], &["x.bin"]),
            &mut NoopObserver,
        )
        .unwrap();

    assert!(report.is_committed());
    assert!(!report.group_removed);
    assert_eq!(store.group(&key).unwrap().len(), 2);
    assert!(!root.join("z.bin").exists());
    assert!(root.join("y.bin").exists());
}

#[test]
fn test_drift_after_scan_blocks_action() {
    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);
    fs::write(root.join("y.bin"), b"edited after the scan, now longer").unwrap();

    let err = MutationEngine::default()
        .execute(
            &mut store,
            &request(&key, &root, ActionKind::Delete, &["z.bin", "y.bin"], &["x.bin"]),
            &mut NoopObserver,
        )
        .unwrap_err();

    assert!(matches!(err, MutationError::FilesystemDrift { ref path, .. } if path.ends_with("y.bin")));
    assert!(root.join("z.bin").exists(), "nothing may be touched");
    assert_eq!(store.group(&key).unwrap().len(), 3);
}

#[test]
fn test_replaced_file_counts_as_drift() {
    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);
    // Same size and content, new inode.
    fs::write(root.join("x.new"), b"three identical copies").unwrap();
    fs::rename(root.join("x.new"), root.join("x.bin")).unwrap();

    let err = MutationEngine::default()
        .execute(
            &mut store,
            &request(&key, &root, ActionKind::Delete, &["y.bin"], &["x.bin"]),
            &mut NoopObserver,
        )
        .unwrap_err();
    assert!(matches!(err, MutationError::FilesystemDrift { .. }));
}

#[cfg(unix)]
#[test]
fn test_metadata_change_counts_as_drift() {
    use std::os::unix::fs::PermissionsExt;

    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);
    // Let the change time move past the kernel's timestamp granularity.
    std::thread::sleep(std::time::Duration::from_millis(50));
    // Size, mtime and content stay the same; only the change time moves.
    fs::set_permissions(root.join("y.bin"), fs::Permissions::from_mode(0o600)).unwrap();

    let err = MutationEngine::default()
        .execute(
            &mut store,
            &request(&key, &root, ActionKind::Delete, &["z.bin", "y.bin"], &["x.bin"]),
            &mut NoopObserver,
        )
        .unwrap_err();

    assert!(matches!(err, MutationError::FilesystemDrift { ref path, .. } if path.ends_with("y.bin")));
    assert!(root.join("y.bin").exists());
    assert!(root.join("z.bin").exists(), "nothing may be touched");
    assert_eq!(store.group(&key).unwrap().len(), 3);
}

#[test]
fn test_hard_link_one_victim_is_invalid_shape() {
    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);
    let err = MutationEngine::default()
        .execute(
            &mut store,
            &request(&key, &root, ActionKind::HardLink, &["y.bin"], &["x.bin"]),
            &mut NoopObserver,
        )
        .unwrap_err();
    assert!(matches!(err, MutationError::InvalidGroupShape { .. }));
    assert!(err.is_shape_violation());
}

#[test]
fn test_link_without_survivor_is_invalid_shape() {
    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);
    for action in [ActionKind::SoftLink, ActionKind::HardLink, ActionKind::Shortcut] {
        let err = MutationEngine::default()
            .execute(
                &mut store,
                &request(&key, &root, action, &["y.bin", "z.bin"], &[]),
                &mut NoopObserver,
            )
            .unwrap_err();
        assert!(matches!(err, MutationError::InvalidGroupShape { .. }), "{action}");
    }
}

#[test]
fn test_delete_everything_needs_policy() {
    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);
    let all = request(&key, &root, ActionKind::Delete, &["x.bin", "y.bin", "z.bin"], &[]);

    let err = MutationEngine::default()
        .execute(&mut store, &all, &mut NoopObserver)
        .unwrap_err();
    assert!(matches!(err, MutationError::InvalidGroupShape { .. }));

    let engine = MutationEngine::new(MutationPolicy {
        allow_delete_all: true,
        ..MutationPolicy::default()
    });
    let report = engine.execute(&mut store, &all, &mut NoopObserver).unwrap();
    assert_eq!(report.processed.len(), 3);
    assert!(store.is_empty());
}

#[test]
fn test_stale_group_after_commit() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().canonicalize().unwrap();
    fs::write(root.join("a"), b"pair").unwrap();
    fs::write(root.join("b"), b"pair").unwrap();
    let (mut store, key) = single_group(&root);

    let delete_b = request(&key, &root, ActionKind::Delete, &["b"], &["a"]);
    let engine = MutationEngine::default();
    assert!(engine.execute(&mut store, &delete_b, &mut NoopObserver).unwrap().group_removed);

    let err = engine
        .execute(&mut store, &delete_b, &mut NoopObserver)
        .unwrap_err();
    assert!(matches!(err, MutationError::StaleSelection { .. }));
}

#[test]
fn test_io_failure_mid_group_commits_processed() {
    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);
    // A leftover temporary name makes the second replacement refuse to start.
    let blocker = root.join(format!("z.bin.{TEMP_SUFFIX}"));
    fs::write(&blocker, b"leftover").unwrap();

    let report = MutationEngine::default()
        .execute(
            &mut store,
            &request(&key, &root, ActionKind::Shortcut, &["y.bin", "z.bin"], &["x.bin"]),
            &mut NoopObserver,
        )
        .unwrap();

    assert_eq!(report.state, MutationState::PartiallyFailed);
    assert_eq!(report.processed, [root.join("y.bin")]);
    assert!(matches!(
        report.error,
        Some(MutationError::IoFailure { operation: "rename", .. })
    ));
    assert!(root.join("y.bin.url").exists());
    assert!(root.join("z.bin").exists());
    // y left the group; x and z remain
    assert_eq!(store.group(&key).unwrap().len(), 2);
}

#[cfg(unix)]
#[test]
fn test_hard_link_then_rescan_reports_linked() {
    let (_dir, root) = xyz();
    let (mut store, key) = single_group(&root);
    MutationEngine::default()
        .execute(
            &mut store,
            &request(&key, &root, ActionKind::HardLink, &["y.bin", "z.bin"], &["x.bin"]),
            &mut NoopObserver,
        )
        .unwrap();

    let outcome = Scanner::new(vec![root.clone()], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap();
    assert_eq!(outcome.candidate_count(), 0);
    assert_eq!(outcome.report.already_linked.len(), 3);
}
