use dupehound::cache::HashCache;
use dupehound::duplicates::{CrcConfig, CrcEngine, GroupKey};
use dupehound::progress::{Phase, ProgressCounters};
use dupehound::scanner::{HashAlgorithm, Hasher, ScanConfig, ScanOutcome, Scanner};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

fn write(root: &Path, rel: &str, content: &[u8]) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn scan(dir: &TempDir) -> ScanOutcome {
    Scanner::new(vec![dir.path().to_path_buf()], ScanConfig::default())
        .unwrap()
        .scan()
        .unwrap()
}

#[test]
fn test_same_size_different_content_split() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "x1", b"aaaa");
    write(dir.path(), "x2", b"aaaa");
    write(dir.path(), "x3", b"aaaa");
    write(dir.path(), "y1", b"bbbb");
    write(dir.path(), "y2", b"bbbb");
    write(dir.path(), "z", b"cccc");

    let outcome = scan(&dir);
    let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
    let result = CrcEngine::default()
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap();

    assert_eq!(result.store.len(), 2);
    let sizes: Vec<usize> = result.store.groups().map(|g| g.len()).collect();
    let mut sorted = sizes.clone();
    sorted.sort_unstable();
    assert_eq!(sorted, vec![2, 3]);
    assert_eq!(result.store.total_duplicate_space(), 4 * 2 + 4);
    assert_eq!(result.stats.files_hashed, 6);
}

#[test]
fn test_group_key_is_content_hash() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a", b"hello world");
    write(dir.path(), "b", b"hello world");

    let outcome = scan(&dir);
    let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
    let result = CrcEngine::default()
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap();

    let expected = GroupKey::content(11, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
    assert!(result.store.group(&expected).is_some());
}

#[test]
fn test_every_algorithm_groups_the_same() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "p/a", &[3; 5000]);
    write(dir.path(), "q/b", &[3; 5000]);
    write(dir.path(), "q/c", &[4; 5000]);
    let outcome = scan(&dir);

    for algorithm in [HashAlgorithm::Sha1, HashAlgorithm::Sha256, HashAlgorithm::Blake3] {
        let mut cache = HashCache::in_memory(algorithm);
        let result = CrcEngine::new(CrcConfig::default().with_algorithm(algorithm))
            .run(&outcome.roots, &outcome.buckets, &mut cache)
            .unwrap();
        assert_eq!(result.store.len(), 1, "{algorithm}");
        let group = result.store.groups().next().unwrap();
        assert_eq!(group.key.hash().unwrap().len(), algorithm.hex_len());
    }
}

#[test]
fn test_streaming_and_whole_reads_agree() {
    let dir = TempDir::new().unwrap();
    let data: Vec<u8> = (0..300_000u32).map(|i| (i % 251) as u8).collect();
    write(dir.path(), "a.bin", &data);
    write(dir.path(), "b.bin", &data);
    let outcome = scan(&dir);

    let whole = Hasher::new(HashAlgorithm::Sha1).hash_bytes(&data);
    let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
    let result = CrcEngine::new(
        CrcConfig::default()
            .with_block_size(4096)
            .with_whole_read_threshold(1024),
    )
    .run(&outcome.roots, &outcome.buckets, &mut cache)
    .unwrap();

    let group = result.store.groups().next().unwrap();
    assert_eq!(group.key.hash(), Some(whole.as_str()));
}

#[test]
fn test_result_limit_defers_folders_without_hits() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "hit/a", b"first pair");
    write(dir.path(), "hit/b", b"first pair");
    write(dir.path(), "later/c", b"second pair!");
    write(dir.path(), "later/d", b"second pair!");
    let outcome = scan(&dir);

    // Pre-seed the cache with the first pair so the limit is met before
    // any hashing starts.
    let hasher = Hasher::new(HashAlgorithm::Sha1);
    let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
    for entry in outcome.buckets.values().flatten() {
        if entry.subpath.ends_with("hit") {
            let hash = hasher
                .hash_file(&entry.full_path(&outcome.roots), entry.size)
                .unwrap();
            cache.store(entry.device_id, entry.inode, entry.modified_time_ns, hash);
        }
    }

    let result = CrcEngine::new(CrcConfig::default().with_result_limit(Some(1)))
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap();

    assert_eq!(result.store.len(), 1);
    assert_eq!(result.stats.cache_hits, 2);
    assert_eq!(result.stats.deferred, 2);
    assert_eq!(result.stats.files_hashed, 0);
}

#[test]
fn test_progress_counters_reach_done() {
    let dir = TempDir::new().unwrap();
    write(dir.path(), "a", b"12345");
    write(dir.path(), "b", b"12345");
    let outcome = scan(&dir);

    let counters = Arc::new(ProgressCounters::new());
    let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
    CrcEngine::new(CrcConfig::default().with_progress(Arc::clone(&counters)))
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap();

    let snapshot = counters.snapshot();
    assert_eq!(snapshot.phase, Phase::Done);
    assert_eq!(snapshot.groups_found, 1);
    assert_eq!(snapshot.duplicate_space, 5);
}

#[cfg(unix)]
#[test]
fn test_unreadable_file_counted_not_fatal() {
    use std::os::unix::fs::PermissionsExt;

    let dir = TempDir::new().unwrap();
    write(dir.path(), "a", b"secret");
    write(dir.path(), "b", b"secret");
    write(dir.path(), "c", b"secret");
    let locked = dir.path().join("c");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();
    if fs::File::open(&locked).is_ok() {
        // running as root
        return;
    }

    let outcome = scan(&dir);
    let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
    let result = CrcEngine::default()
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap();
    assert_eq!(result.stats.failures, 1);
    assert_eq!(result.store.member_count(), 2);
}
