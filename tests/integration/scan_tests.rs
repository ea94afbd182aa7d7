use dupehound::scanner::{ExclusionRule, ScanConfig, ScanError, Scanner};
use dupehound::signal::CancelToken;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &[u8]) -> PathBuf {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(&path, content).unwrap();
    path
}

fn candidate_names(dir: &TempDir, config: ScanConfig) -> Vec<String> {
    let outcome = Scanner::new(vec![dir.path().to_path_buf()], config)
        .unwrap()
        .scan()
        .unwrap();
    let mut names: Vec<String> = outcome
        .buckets
        .values()
        .flatten()
        .map(|e| e.relative_path().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_scan_empty_directory() {
    let dir = TempDir::new().unwrap();
    let outcome = Scanner::new(vec![dir.path().to_path_buf()], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap();
    assert!(outcome.buckets.is_empty());
    assert_eq!(outcome.report.files_seen, 0);
    assert_eq!(outcome.candidate_count(), 0);
}

#[test]
fn test_singleton_sizes_never_candidates() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a.txt", b"1234");
    write(dir.path(), "b.txt", b"abcd");
    write(dir.path(), "c.txt", b"unique length");
    assert_eq!(candidate_names(&dir, ScanConfig::default()), ["a.txt", "b.txt"]);
}

#[test]
fn test_empty_files_ignored() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "e1", b"");
    write(dir.path(), "e2", b"");
    assert!(candidate_names(&dir, ScanConfig::default()).is_empty());
}

#[test]
fn test_hidden_entries_excluded_by_default() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "visible.txt", b"same");
    write(dir.path(), ".hidden.txt", b"same");
    write(dir.path(), ".git/objects/blob", b"same");

    assert!(candidate_names(&dir, ScanConfig::default()).is_empty());
    assert_eq!(
        candidate_names(&dir, ScanConfig::default().with_include_hidden(true)),
        [".git/objects/blob", ".hidden.txt", "visible.txt"]
    );
}

#[test]
fn test_glob_and_regex_exclusions() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "keep/a.dat", b"payload");
    write(dir.path(), "keep/b.dat", b"payload");
    write(dir.path(), "node_modules/c.dat", b"payload");
    write(dir.path(), "keep/d.tmp", b"payload");

    let config = ScanConfig::default()
        .with_exclusion(ExclusionRule::Glob("**/node_modules".to_string()))
        .with_exclusion(ExclusionRule::Regex(r"\.tmp$".to_string()));
    assert_eq!(candidate_names(&dir, config), ["keep/a.dat", "keep/b.dat"]);
}

#[test]
fn test_invalid_exclusion_rejected_before_walk() {
    let dir = TempDir::new().unwrap();
    let config = ScanConfig::default().with_exclusion(ExclusionRule::Regex("(".to_string()));
    let err = Scanner::new(vec![dir.path().to_path_buf()], config).unwrap_err();
    assert!(matches!(err, ScanError::InvalidRegex { .. }));
    assert!(err.is_precondition());
}

#[test]
fn test_size_bounds() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "s1", &[1; 10]);
    write(dir.path(), "s2", &[1; 10]);
    write(dir.path(), "m1", &[1; 100]);
    write(dir.path(), "m2", &[1; 100]);
    write(dir.path(), "l1", &[1; 1000]);
    write(dir.path(), "l2", &[1; 1000]);

    let config = ScanConfig::default()
        .with_min_size(Some(50))
        .with_max_size(Some(500));
    assert_eq!(candidate_names(&dir, config), ["m1", "m2"]);
}

#[cfg(unix)]
#[test]
fn test_symlinks_reported_not_followed() {
    let dir = TempDir::new().unwrap();
    let target = write(dir.path(), "real.txt", b"data");
    write(dir.path(), "other.txt", b"data");
    std::os::unix::fs::symlink(&target, dir.path().join("link.txt")).unwrap();
    std::os::unix::fs::symlink(dir.path(), dir.path().join("loop")).unwrap();

    let outcome = Scanner::new(vec![dir.path().to_path_buf()], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap();
    assert_eq!(outcome.candidate_count(), 2);
    assert_eq!(outcome.report.symlinks_skipped.len(), 2);
}

#[cfg(unix)]
#[test]
fn test_already_linked_files_reported() {
    let dir = TempDir::new().unwrap();
    let original = write(dir.path(), "original.bin", b"linked content");
    fs::hard_link(&original, dir.path().join("alias.bin")).unwrap();
    write(dir.path(), "copy.bin", b"linked content");

    let outcome = Scanner::new(vec![dir.path().to_path_buf()], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap();
    assert_eq!(outcome.report.already_linked.len(), 2);
    assert!(outcome.report.already_linked.iter().all(|(_, n)| *n == 2));
    // copy.bin alone in its size bucket
    assert_eq!(outcome.candidate_count(), 0);
}

#[test]
fn test_overlapping_roots_rejected() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("nested");
    fs::create_dir(&nested).unwrap();

    let err = Scanner::new(vec![dir.path().to_path_buf(), nested], ScanConfig::default())
        .unwrap_err();
    assert!(matches!(err, ScanError::OverlappingRoots { .. }));

    let err = Scanner::new(
        vec![dir.path().to_path_buf(), dir.path().to_path_buf()],
        ScanConfig::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ScanError::OverlappingRoots { .. }));
}

#[test]
fn test_missing_root_and_file_root() {
    let dir = TempDir::new().unwrap();
    let err = Scanner::new(vec![dir.path().join("missing")], ScanConfig::default()).unwrap_err();
    assert!(matches!(err, ScanError::RootNotFound { .. }));

    let file = write(dir.path(), "file.txt", b"x");
    let err = Scanner::new(vec![file], ScanConfig::default()).unwrap_err();
    assert!(matches!(err, ScanError::NotADirectory(_)));

    let err = Scanner::new(Vec::new(), ScanConfig::default()).unwrap_err();
    assert!(matches!(err, ScanError::NoRoots));
}

#[test]
fn test_cancelled_scan_returns_nothing() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a", b"same");
    write(dir.path(), "b", b"same");
    let token = CancelToken::new();
    token.cancel();

    let result = Scanner::new(vec![dir.path().to_path_buf()], ScanConfig::default())
        .unwrap()
        .with_cancel_token(token)
        .scan();
    assert!(matches!(result, Err(ScanError::Cancelled)));
}
