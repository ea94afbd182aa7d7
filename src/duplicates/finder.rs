//! Content-hash duplicate finder.
//!
//! # Overview
//!
//! [`CrcEngine::run`] turns the scanner's size buckets into byte-identical
//! duplicate groups:
//!
//! 1. Files whose `(inode, mtime)` is in the [`HashCache`] are resolved
//!    without reading them.
//! 2. The remaining files are put in calculation order (see
//!    [`calculation_order`]) and split by device.
//! 3. A rayon pool with one thread per device, capped at the available
//!    parallelism, hashes each device's list in order. A slow disk only
//!    stalls its own worker.
//! 4. While workers run, the calling thread wakes up every
//!    [`CrcConfig::progress_interval`] and publishes an approximate
//!    "groups found" figure merged from cache hits and the workers'
//!    in-flight results. This merge never touches the final result.
//! 5. After the workers stop, their results are merged, stored in the
//!    cache, the cache is flushed and groups below two members are pruned.
//!
//! Workers never touch the cache; only the calling thread does, before
//! dispatch and after the workers have finished.
//!
//! # Cancellation
//!
//! Workers stop after the current block once the token fires. Everything
//! hashed up to that point is cached and grouped, and the outcome is
//! flagged as interrupted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use super::groups::{DuplicateStore, GroupKey};
use super::EngineError;
use crate::cache::HashCache;
use crate::progress::{Phase, ProgressCounters};
use crate::scanner::hasher::{DEFAULT_BLOCK_SIZE, DEFAULT_WHOLE_READ_THRESHOLD};
use crate::scanner::{FolderKey, HashAlgorithm, HashError, Hasher, ScanEntry, SizeBuckets};
use crate::signal::CancelToken;

/// Default interval between live progress merges.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

/// Configuration of a content-hash run.
#[derive(Clone)]
pub struct CrcConfig {
    /// Digest algorithm.
    pub algorithm: HashAlgorithm,
    /// Streaming block size.
    pub block_size: usize,
    /// Files up to this size are read in one call.
    pub whole_read_threshold: u64,
    /// Stop hashing folders without any hit once this many groups exist.
    pub result_limit: Option<usize>,
    /// Interval between live progress merges.
    pub progress_interval: Duration,
    /// Upper bound on concurrent device workers.
    pub max_workers: usize,
    /// Cancellation token.
    pub cancel: CancelToken,
    /// Counters to publish progress to.
    pub progress: Option<Arc<ProgressCounters>>,
}

impl std::fmt::Debug for CrcConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrcConfig")
            .field("algorithm", &self.algorithm)
            .field("block_size", &self.block_size)
            .field("whole_read_threshold", &self.whole_read_threshold)
            .field("result_limit", &self.result_limit)
            .field("progress_interval", &self.progress_interval)
            .field("max_workers", &self.max_workers)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for CrcConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            whole_read_threshold: DEFAULT_WHOLE_READ_THRESHOLD,
            result_limit: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            max_workers: available_parallelism(),
            cancel: CancelToken::new(),
            progress: None,
        }
    }
}

impl CrcConfig {
    /// Set the digest algorithm.
    #[must_use]
    pub fn with_algorithm(mut self, algorithm: HashAlgorithm) -> Self {
        self.algorithm = algorithm;
        self
    }

    /// Set the streaming block size.
    #[must_use]
    pub fn with_block_size(mut self, size: usize) -> Self {
        self.block_size = size;
        self
    }

    /// Set the whole-file read threshold.
    #[must_use]
    pub fn with_whole_read_threshold(mut self, threshold: u64) -> Self {
        self.whole_read_threshold = threshold;
        self
    }

    /// Set the result limit.
    #[must_use]
    pub fn with_result_limit(mut self, limit: Option<usize>) -> Self {
        self.result_limit = limit;
        self
    }

    /// Set the live progress interval.
    #[must_use]
    pub fn with_progress_interval(mut self, interval: Duration) -> Self {
        self.progress_interval = interval.max(Duration::from_millis(10));
        self
    }

    /// Cap the number of concurrent device workers (minimum 1).
    #[must_use]
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Use `token` for cancellation.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Publish progress to `counters`.
    #[must_use]
    pub fn with_progress(mut self, counters: Arc<ProgressCounters>) -> Self {
        self.progress = Some(counters);
        self
    }
}

fn available_parallelism() -> usize {
    std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get)
}

/// Statistics of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrcStats {
    /// Candidate files handed to the engine.
    pub candidates: usize,
    /// Files resolved from the cache.
    pub cache_hits: usize,
    /// Files actually read and hashed.
    pub files_hashed: usize,
    /// Bytes read while hashing.
    pub bytes_hashed: u64,
    /// Files that could not be read.
    pub failures: usize,
    /// Files skipped because the result limit was reached.
    pub deferred: usize,
    /// Devices that got a worker.
    pub devices: usize,
    /// The run was cancelled; groups are partial.
    pub interrupted: bool,
    /// Set when the cache could not be written back.
    pub cache_error: Option<String>,
}

/// Groups and statistics of one run.
#[derive(Debug, Clone)]
pub struct CrcOutcome {
    /// Resulting duplicate groups.
    pub store: DuplicateStore,
    /// Run statistics.
    pub stats: CrcStats,
}

/// Put candidates in the order they should be hashed.
///
/// Files are ranked by size, largest first. Each folder's largest file is
/// moved to the front section so every folder gets an early sample; the
/// rest follow in size order. Ties are broken by path so the order is
/// deterministic.
#[must_use]
pub fn calculation_order(mut entries: Vec<ScanEntry>) -> Vec<ScanEntry> {
    entries.sort_by(|a, b| b.size.cmp(&a.size).then_with(|| a.cmp(b)));

    let mut seen_folders = HashSet::new();
    let mut leaders = Vec::new();
    let mut rest = Vec::with_capacity(entries.len());
    for entry in entries {
        if seen_folders.insert(entry.folder()) {
            leaders.push(entry);
        } else {
            rest.push(entry);
        }
    }
    leaders.extend(rest);
    leaders
}

/// Content-hash duplicate engine.
#[derive(Debug, Clone, Default)]
pub struct CrcEngine {
    config: CrcConfig,
}

/// One freshly hashed file.
#[derive(Debug, Clone)]
struct Hashed {
    entry: ScanEntry,
    hash: String,
}

/// State shared between the calling thread and the workers.
struct Shared {
    /// One slot per worker; only that worker appends to it.
    slots: Vec<Mutex<Vec<Hashed>>>,
    limit_reached: AtomicBool,
    hit_folders: RwLock<HashSet<FolderKey>>,
    bytes_hashed: AtomicU64,
    failures: AtomicU64,
    deferred: AtomicU64,
}

/// Approximate figures from a live merge.
#[derive(Debug, Default)]
struct Tally {
    groups: usize,
    duplicate_space: u64,
    hit_folders: HashSet<FolderKey>,
}

type ResolvedGroups = HashMap<(u64, String), Vec<ScanEntry>>;

impl CrcEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(config: CrcConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &CrcConfig {
        &self.config
    }

    /// Hash the candidates in `buckets` and group them.
    ///
    /// `roots` is the root list the entries were scanned with. `cache` is
    /// consulted before hashing, extended afterwards and flushed once.
    ///
    /// # Errors
    ///
    /// - [`EngineError::AlgorithmMismatch`] if `cache` was loaded for another
    ///   algorithm
    /// - [`EngineError::ThreadPool`] if the worker pool cannot be created
    ///
    /// Per-file read failures are counted in [`CrcStats::failures`] and do
    /// not fail the run.
    pub fn run(
        &self,
        roots: &[PathBuf],
        buckets: &SizeBuckets,
        cache: &mut HashCache,
    ) -> Result<CrcOutcome, EngineError> {
        if cache.algorithm() != self.config.algorithm {
            return Err(EngineError::AlgorithmMismatch {
                cache: cache.algorithm(),
                engine: self.config.algorithm,
            });
        }

        let started = Instant::now();
        let mut stats = CrcStats::default();

        let mut resolved: ResolvedGroups = HashMap::new();
        let mut misses = Vec::new();
        for (size, members) in buckets {
            for entry in members {
                stats.candidates += 1;
                match cache.lookup(entry.device_id, entry.inode, entry.modified_time_ns) {
                    Some(hash) => {
                        log::trace!("Hash cache hit: {}", entry.relative_path().display());
                        resolved
                            .entry((*size, hash.to_string()))
                            .or_default()
                            .push(entry.clone());
                    }
                    None => misses.push(entry.clone()),
                }
            }
        }
        stats.cache_hits = stats.candidates - misses.len();

        let mut partitions: BTreeMap<u64, Vec<ScanEntry>> = BTreeMap::new();
        for entry in calculation_order(misses) {
            partitions.entry(entry.device_id).or_default().push(entry);
        }
        let partitions: Vec<(u64, Vec<ScanEntry>)> = partitions.into_iter().collect();
        stats.devices = partitions.len();

        let to_hash: usize = partitions.iter().map(|(_, items)| items.len()).sum();
        log::info!(
            "Hashing {} files on {} device(s); {} resolved from cache",
            to_hash,
            partitions.len(),
            stats.cache_hits
        );

        if let Some(ref progress) = self.config.progress {
            progress.begin_phase(Phase::Hashing, to_hash as u64);
        }

        let shared = Shared {
            slots: partitions.iter().map(|_| Mutex::new(Vec::new())).collect(),
            limit_reached: AtomicBool::new(false),
            hit_folders: RwLock::new(HashSet::new()),
            bytes_hashed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            deferred: AtomicU64::new(0),
        };
        self.publish(&resolved, &shared);

        if !partitions.is_empty() {
            self.hash_partitions(roots, &partitions, &resolved, &shared)?;
        }

        // Finalize: fold worker results into the groups and the cache.
        for slot in shared.slots {
            let hashed = slot.into_inner().unwrap_or_else(|e| e.into_inner());
            stats.files_hashed += hashed.len();
            for Hashed { entry, hash } in hashed {
                cache.store(entry.device_id, entry.inode, entry.modified_time_ns, hash.clone());
                resolved.entry((entry.size, hash)).or_default().push(entry);
            }
        }
        stats.bytes_hashed = shared.bytes_hashed.into_inner();
        stats.failures = shared.failures.into_inner() as usize;
        stats.deferred = shared.deferred.into_inner() as usize;
        stats.interrupted = self.config.cancel.is_cancelled();

        if let Err(e) = cache.flush() {
            log::warn!("Failed to write hash cache: {}", e);
            stats.cache_error = Some(e.to_string());
        }

        let store = DuplicateStore::from_groups(
            roots.to_vec(),
            resolved
                .into_iter()
                .map(|((size, hash), members)| (GroupKey::content(size, hash), members)),
        );

        if let Some(ref progress) = self.config.progress {
            progress.set_found(store.len() as u64, store.total_duplicate_space());
            progress.begin_phase(Phase::Done, 0);
        }

        if stats.interrupted {
            log::info!(
                "Hashing interrupted after {} files: {} partial groups",
                stats.files_hashed,
                store.len()
            );
        } else {
            log::info!(
                "Hashing complete in {:.2?}: {} groups, {} files hashed, {} cache hits",
                started.elapsed(),
                store.len(),
                stats.files_hashed,
                stats.cache_hits
            );
        }

        Ok(CrcOutcome { store, stats })
    }

    /// Run one worker per partition and poll for live progress until all
    /// of them have finished.
    fn hash_partitions(
        &self,
        roots: &[PathBuf],
        partitions: &[(u64, Vec<ScanEntry>)],
        resolved: &ResolvedGroups,
        shared: &Shared,
    ) -> Result<(), EngineError> {
        let workers = partitions.len().min(self.config.max_workers).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("dupehound-crc-{i}"))
            .build()?;
        log::debug!("Started hashing pool with {} worker(s)", workers);

        let hasher = Hasher::new(self.config.algorithm)
            .with_block_size(self.config.block_size)
            .with_whole_read_threshold(self.config.whole_read_threshold)
            .with_cancel_token(self.config.cancel.clone());
        let hasher = &hasher;
        let pool = &pool;

        let (done_tx, done_rx) = mpsc::channel::<(u64, usize)>();

        std::thread::scope(|s| {
            s.spawn(move || {
                pool.scope(|scope| {
                    for (slot, (device_id, items)) in partitions.iter().enumerate() {
                        let done_tx = done_tx.clone();
                        scope.spawn(move |_| {
                            let hashed = self.hash_device(roots, items, slot, hasher, shared);
                            let _ = done_tx.send((*device_id, hashed));
                        });
                    }
                });
            });

            loop {
                match done_rx.recv_timeout(self.config.progress_interval) {
                    Ok((device_id, hashed)) => {
                        log::debug!("Device {} finished: {} files hashed", device_id, hashed);
                    }
                    Err(RecvTimeoutError::Timeout) => self.publish(resolved, shared),
                    Err(RecvTimeoutError::Disconnected) => break,
                }
            }
        });

        Ok(())
    }

    /// Hash one device's files in order. Returns the number hashed.
    fn hash_device(
        &self,
        roots: &[PathBuf],
        items: &[ScanEntry],
        slot: usize,
        hasher: &Hasher,
        shared: &Shared,
    ) -> usize {
        let mut hashed = 0;
        for entry in items {
            if self.config.cancel.is_cancelled() {
                log::debug!("Hashing worker {} stopping on cancel", slot);
                break;
            }

            if shared.limit_reached.load(Ordering::Relaxed) {
                let folder = entry.folder();
                let is_hit = shared
                    .hit_folders
                    .read()
                    .unwrap_or_else(|e| e.into_inner())
                    .contains(&folder);
                if !is_hit {
                    log::trace!("Deferring {}", entry.relative_path().display());
                    shared.deferred.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
            }

            let path = entry.full_path(roots);
            if let Some(ref progress) = self.config.progress {
                progress.set_info(&path.to_string_lossy());
            }

            match hasher.hash_file(&path, entry.size) {
                Ok(hash) => {
                    shared.bytes_hashed.fetch_add(entry.size, Ordering::Relaxed);
                    shared.slots[slot]
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .push(Hashed {
                            entry: entry.clone(),
                            hash,
                        });
                    hashed += 1;
                }
                Err(HashError::Cancelled(_)) => break,
                Err(e) => {
                    log::warn!("Failed to hash: {}", e);
                    shared.failures.fetch_add(1, Ordering::Relaxed);
                }
            }

            if let Some(ref progress) = self.config.progress {
                progress.item_done();
            }
        }
        hashed
    }

    /// Read-only merge of cache hits and in-flight results for display and
    /// for the result limit.
    fn publish(&self, resolved: &ResolvedGroups, shared: &Shared) {
        let tally = live_tally(resolved, shared);

        if let Some(ref progress) = self.config.progress {
            progress.set_found(tally.groups as u64, tally.duplicate_space);
        }

        if let Some(limit) = self.config.result_limit {
            if tally.groups >= limit {
                if !shared.limit_reached.swap(true, Ordering::Relaxed) {
                    log::info!(
                        "Result limit of {} groups reached; deferring folders without hits",
                        limit
                    );
                }
                *shared.hit_folders.write().unwrap_or_else(|e| e.into_inner()) =
                    tally.hit_folders;
            }
        }
    }
}

fn live_tally(resolved: &ResolvedGroups, shared: &Shared) -> Tally {
    let mut merged: HashMap<(u64, String), Vec<FolderKey>> = resolved
        .iter()
        .map(|(key, members)| (key.clone(), members.iter().map(ScanEntry::folder).collect()))
        .collect();

    for slot in &shared.slots {
        let hashed = slot.lock().unwrap_or_else(|e| e.into_inner());
        for item in hashed.iter() {
            merged
                .entry((item.entry.size, item.hash.clone()))
                .or_default()
                .push(item.entry.folder());
        }
    }

    let mut tally = Tally::default();
    for ((size, _), folders) in merged {
        if folders.len() < 2 {
            continue;
        }
        tally.groups += 1;
        tally.duplicate_space += size * (folders.len() as u64 - 1);
        tally.hit_folders.extend(folders);
    }
    tally
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scanner::{ScanConfig, Scanner};
    use std::ffi::OsString;
    use std::fs;
    use tempfile::TempDir;

    fn entry(dir: &str, name: &str, size: u64) -> ScanEntry {
        ScanEntry {
            root_index: 0,
            subpath: PathBuf::from(dir),
            file_name: OsString::from(name),
            modified_time_ns: 0,
            changed_time_ns: 0,
            device_id: 1,
            inode: size,
            size,
        }
    }

    fn tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("a")).unwrap();
        fs::create_dir(dir.path().join("b")).unwrap();
        fs::write(dir.path().join("a/one.txt"), b"same content").unwrap();
        fs::write(dir.path().join("b/two.txt"), b"same content").unwrap();
        fs::write(dir.path().join("b/three.txt"), b"other stuff!").unwrap();
        fs::write(dir.path().join("a/big1.bin"), vec![9u8; 4000]).unwrap();
        fs::write(dir.path().join("b/big2.bin"), vec![9u8; 4000]).unwrap();
        dir
    }

    fn scan(dir: &TempDir) -> crate::scanner::ScanOutcome {
        Scanner::new(vec![dir.path().to_path_buf()], ScanConfig::default())
            .unwrap()
            .scan()
            .unwrap()
    }

    #[test]
    fn test_calculation_order_folder_leaders_first() {
        let ordered = calculation_order(vec![
            entry("x", "small", 10),
            entry("x", "big", 100),
            entry("y", "mid", 50),
            entry("y", "tiny", 5),
        ]);
        let names: Vec<_> = ordered
            .iter()
            .map(|e| e.file_name.to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["big", "mid", "small", "tiny"]);
    }

    #[test]
    fn test_calculation_order_empty() {
        assert!(calculation_order(Vec::new()).is_empty());
    }

    #[test]
    fn test_finds_groups() {
        let dir = tree();
        let outcome = scan(&dir);
        let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
        let result = CrcEngine::default()
            .run(&outcome.roots, &outcome.buckets, &mut cache)
            .unwrap();

        assert_eq!(result.store.len(), 2);
        assert_eq!(result.stats.files_hashed, 5);
        assert_eq!(result.stats.cache_hits, 0);
        assert!(!result.stats.interrupted);
        let sizes: Vec<u64> = result.store.groups().map(|g| g.size()).collect();
        assert_eq!(sizes, vec![4000, 12]);
        assert!(result.store.groups().all(|g| g.len() == 2));
    }

    #[test]
    fn test_second_run_uses_cache_only() {
        let dir = tree();
        let cache_dir = TempDir::new().unwrap();
        let outcome = scan(&dir);
        let devices = outcome.device_ids();

        let mut cache = HashCache::load(cache_dir.path(), HashAlgorithm::Sha1, devices.clone());
        let first = CrcEngine::default()
            .run(&outcome.roots, &outcome.buckets, &mut cache)
            .unwrap();

        let mut cache = HashCache::load(cache_dir.path(), HashAlgorithm::Sha1, devices);
        let second = CrcEngine::default()
            .run(&outcome.roots, &outcome.buckets, &mut cache)
            .unwrap();

        assert_eq!(second.stats.files_hashed, 0);
        assert_eq!(second.stats.cache_hits, 5);
        let a: Vec<_> = first.store.groups().cloned().collect();
        let b: Vec<_> = second.store.groups().cloned().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_algorithm_mismatch_rejected() {
        let dir = tree();
        let outcome = scan(&dir);
        let mut cache = HashCache::in_memory(HashAlgorithm::Blake3);
        let result = CrcEngine::default().run(&outcome.roots, &outcome.buckets, &mut cache);
        assert!(matches!(result, Err(EngineError::AlgorithmMismatch { .. })));
    }

    #[test]
    fn test_cancelled_run_is_flagged() {
        let dir = tree();
        let outcome = scan(&dir);
        let token = CancelToken::new();
        token.cancel();
        let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
        let result = CrcEngine::new(CrcConfig::default().with_cancel_token(token))
            .run(&outcome.roots, &outcome.buckets, &mut cache)
            .unwrap();
        assert!(result.stats.interrupted);
        assert_eq!(result.stats.files_hashed, 0);
        assert!(result.store.is_empty());
    }

    #[test]
    fn test_missing_file_counted_as_failure() {
        let dir = tree();
        let outcome = scan(&dir);
        fs::remove_file(dir.path().join("b/three.txt")).unwrap();
        let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
        let result = CrcEngine::default()
            .run(&outcome.roots, &outcome.buckets, &mut cache)
            .unwrap();
        assert_eq!(result.stats.failures, 1);
        assert_eq!(result.store.len(), 2);
    }

    #[test]
    fn test_progress_reports_final_groups() {
        let dir = tree();
        let outcome = scan(&dir);
        let counters = Arc::new(ProgressCounters::new());
        let mut cache = HashCache::in_memory(HashAlgorithm::Sha1);
        CrcEngine::new(CrcConfig::default().with_progress(Arc::clone(&counters)))
            .run(&outcome.roots, &outcome.buckets, &mut cache)
            .unwrap();
        let snap = counters.snapshot();
        assert_eq!(snap.groups_found, 2);
        assert_eq!(snap.duplicate_space, 4012);
        assert_eq!(snap.phase, Phase::Done);
    }

    #[test]
    fn test_single_worker_same_result() {
        let dir = tree();
        let outcome = scan(&dir);
        let mut cache = HashCache::in_memory(HashAlgorithm::Sha256);
        let result = CrcEngine::new(
            CrcConfig::default()
                .with_algorithm(HashAlgorithm::Sha256)
                .with_max_workers(1),
        )
        .run(&outcome.roots, &outcome.buckets, &mut cache)
        .unwrap();
        assert_eq!(result.store.len(), 2);
        assert!(result
            .store
            .groups()
            .all(|g| g.key.hash().map(str::len) == Some(64)));
    }
}
