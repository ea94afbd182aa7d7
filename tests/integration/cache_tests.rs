use dupehound::cache::{clear_all, HashCache, ImageCache, CACHE_EXTENSION};
use dupehound::duplicates::CrcEngine;
use dupehound::scanner::{HashAlgorithm, ScanConfig, ScanOutcome, Scanner};
use filetime::FileTime;
use std::fs;
use tempfile::TempDir;

fn tree() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::write(dir.path().join("a.txt"), b"duplicate body").unwrap();
    fs::write(dir.path().join("b.txt"), b"duplicate body").unwrap();
    fs::write(dir.path().join("c.txt"), b"different body").unwrap();
    dir
}

fn scan(dir: &TempDir) -> ScanOutcome {
    Scanner::new(vec![dir.path().to_path_buf()], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap()
}

fn run(outcome: &ScanOutcome, cache_dir: &TempDir) -> dupehound::duplicates::CrcOutcome {
    let mut cache = HashCache::load(cache_dir.path(), HashAlgorithm::Sha1, outcome.device_ids());
    CrcEngine::default()
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap()
}

#[test]
fn test_cache_file_per_device_and_algorithm() {
    let dir = tree();
    let cache_dir = TempDir::new().unwrap();
    let outcome = scan(&dir);
    run(&outcome, &cache_dir);

    for device in outcome.device_ids() {
        let path = HashCache::file_path(cache_dir.path(), HashAlgorithm::Sha1, device);
        assert!(path.exists(), "{}", path.display());
        assert!(path.to_string_lossy().ends_with(CACHE_EXTENSION));
        assert!(!HashCache::file_path(cache_dir.path(), HashAlgorithm::Blake3, device).exists());
    }
}

#[test]
fn test_repeat_scan_hashes_nothing() {
    let dir = tree();
    let cache_dir = TempDir::new().unwrap();
    let outcome = scan(&dir);

    let first = run(&outcome, &cache_dir);
    assert_eq!(first.stats.files_hashed, 3);

    let second = run(&scan(&dir), &cache_dir);
    assert_eq!(second.stats.files_hashed, 0);
    assert_eq!(second.stats.cache_hits, 3);
    assert_eq!(second.store.len(), first.store.len());
}

#[test]
fn test_modified_file_is_rehashed() {
    let dir = tree();
    let cache_dir = TempDir::new().unwrap();
    run(&scan(&dir), &cache_dir);

    let changed = dir.path().join("c.txt");
    fs::write(&changed, b"duplicate body").unwrap();
    filetime::set_file_mtime(&changed, FileTime::from_unix_time(1_000_000, 0)).unwrap();

    let second = run(&scan(&dir), &cache_dir);
    assert_eq!(second.stats.files_hashed, 1);
    assert_eq!(second.stats.cache_hits, 2);
    assert_eq!(second.store.member_count(), 3);
}

#[test]
fn test_corrupt_cache_file_is_ignored() {
    let dir = tree();
    let cache_dir = TempDir::new().unwrap();
    let outcome = scan(&dir);
    for device in outcome.device_ids() {
        fs::write(
            HashCache::file_path(cache_dir.path(), HashAlgorithm::Sha1, device),
            b"not gzip at all",
        )
        .unwrap();
    }

    let result = run(&outcome, &cache_dir);
    assert_eq!(result.stats.files_hashed, 3);
    assert!(result.stats.cache_error.is_none());

    // The rewritten file is readable again.
    let again = run(&outcome, &cache_dir);
    assert_eq!(again.stats.cache_hits, 3);
}

#[test]
fn test_unwritable_cache_dir_reports_error() {
    let dir = tree();
    let blocker = TempDir::new().unwrap();
    let not_a_dir = blocker.path().join("file");
    fs::write(&not_a_dir, b"x").unwrap();

    let outcome = scan(&dir);
    let mut cache = HashCache::load(&not_a_dir, HashAlgorithm::Sha1, outcome.device_ids());
    let result = CrcEngine::default()
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap();
    assert_eq!(result.store.len(), 1);
    assert!(result.stats.cache_error.is_some());
}

#[test]
fn test_clear_all_removes_cache_files() {
    let dir = tree();
    let cache_dir = TempDir::new().unwrap();
    run(&scan(&dir), &cache_dir);
    fs::write(cache_dir.path().join("notes.txt"), b"keep me").unwrap();

    let mut images = ImageCache::load(cache_dir.path());
    images.flush().unwrap();

    let removed = clear_all(cache_dir.path()).unwrap();
    assert!(removed >= 1);
    assert!(cache_dir.path().join("notes.txt").exists());
    assert_eq!(clear_all(cache_dir.path()).unwrap(), 0);
    assert_eq!(clear_all(&cache_dir.path().join("missing")).unwrap(), 0);
}
