//! Per-device content hash cache.
//!
//! Each device gets its own file, `hash-<algorithm>-<device>.bin.gz`, so a
//! slow or unplugged disk only affects its own entries and switching the
//! digest algorithm never returns a hash of the wrong kind.
//!
//! The cache is loaded once at the start of a hashing run, consulted and
//! extended in memory, and written back by [`HashCache::flush`], the only
//! persistence point.
//!
//! # Example
//!
//! ```no_run
//! use dupehound::cache::HashCache;
//! use dupehound::scanner::HashAlgorithm;
//! use std::path::Path;
//!
//! let mut cache = HashCache::load(Path::new("/tmp/cache"), HashAlgorithm::Sha1, [42]);
//! if cache.lookup(42, 1001, 1_700_000_000_000_000_000).is_none() {
//!     cache.store(42, 1001, 1_700_000_000_000_000_000, "ab12".to_string());
//! }
//! cache.flush()?;
//! # Ok::<(), dupehound::cache::CacheError>(())
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use super::entry::HashKey;
use super::{read_compressed, write_compressed, CacheResult, CACHE_EXTENSION};
use crate::scanner::HashAlgorithm;

#[derive(Debug, Clone, Default)]
struct DeviceCache {
    entries: HashMap<HashKey, String>,
    dirty: bool,
}

/// In-memory view of the hash caches of a set of devices.
#[derive(Debug, Clone)]
pub struct HashCache {
    dir: Option<PathBuf>,
    algorithm: HashAlgorithm,
    devices: HashMap<u64, DeviceCache>,
}

impl HashCache {
    /// A cache that is never read from or written to disk.
    #[must_use]
    pub fn in_memory(algorithm: HashAlgorithm) -> Self {
        Self {
            dir: None,
            algorithm,
            devices: HashMap::new(),
        }
    }

    /// Load the cache files of `device_ids` from `dir`.
    ///
    /// A missing or unreadable file is treated as an empty cache for that
    /// device; the problem is logged as a warning and loading continues.
    pub fn load<I>(dir: &Path, algorithm: HashAlgorithm, device_ids: I) -> Self
    where
        I: IntoIterator<Item = u64>,
    {
        let mut cache = Self {
            dir: Some(dir.to_path_buf()),
            algorithm,
            devices: HashMap::new(),
        };

        for device_id in device_ids {
            cache.load_device(device_id);
        }

        cache
    }

    /// File holding the cache of `device_id`.
    #[must_use]
    pub fn file_path(dir: &Path, algorithm: HashAlgorithm, device_id: u64) -> PathBuf {
        dir.join(format!(
            "hash-{}-{}.{}",
            algorithm.name(),
            device_id,
            CACHE_EXTENSION
        ))
    }

    /// Digest algorithm the cached hashes were computed with.
    #[must_use]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Cached hash for a file, if its `(inode, mtime)` is known.
    #[must_use]
    pub fn lookup(&self, device_id: u64, inode: u64, mtime_ns: i64) -> Option<&str> {
        self.devices
            .get(&device_id)?
            .entries
            .get(&HashKey { inode, mtime_ns })
            .map(String::as_str)
    }

    /// Read the file of `device_id` unless it is already in memory.
    fn load_device(&mut self, device_id: u64) {
        if self.devices.contains_key(&device_id) {
            return;
        }
        let entries = match &self.dir {
            Some(dir) => {
                let path = Self::file_path(dir, self.algorithm, device_id);
                match read_compressed::<HashMap<HashKey, String>>(&path) {
                    Ok(Some(entries)) => {
                        log::debug!(
                            "Loaded {} cached hashes for device {} from {}",
                            entries.len(),
                            device_id,
                            path.display()
                        );
                        entries
                    }
                    Ok(None) => HashMap::new(),
                    Err(e) => {
                        log::warn!("Ignoring unreadable hash cache: {}", e);
                        HashMap::new()
                    }
                }
            }
            None => HashMap::new(),
        };
        self.devices.insert(
            device_id,
            DeviceCache {
                entries,
                dirty: false,
            },
        );
    }

    /// Remember a freshly computed hash.
    ///
    /// A device that was not passed to [`HashCache::load`] is read from disk
    /// first, so a later flush keeps its persisted entries.
    pub fn store(&mut self, device_id: u64, inode: u64, mtime_ns: i64, hash: String) {
        self.load_device(device_id);
        let device = self.devices.entry(device_id).or_default();
        let key = HashKey { inode, mtime_ns };
        if device.entries.get(&key) != Some(&hash) {
            device.entries.insert(key, hash);
            device.dirty = true;
        }
    }

    /// Total number of cached hashes across loaded devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.values().map(|d| d.entries.len()).sum()
    }

    /// Whether no hashes are cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry of `device_id` whose inode is not in `live`.
    ///
    /// Useful after a scan that covered a whole device. Returns the number of
    /// entries removed.
    pub fn retain_known(&mut self, device_id: u64, live: &HashSet<u64>) -> usize {
        let Some(device) = self.devices.get_mut(&device_id) else {
            return 0;
        };
        let before = device.entries.len();
        device.entries.retain(|key, _| live.contains(&key.inode));
        let removed = before - device.entries.len();
        if removed > 0 {
            device.dirty = true;
        }
        removed
    }

    /// Write every modified device cache back to disk.
    ///
    /// Each file is replaced whole; on error the previous file for that
    /// device is left untouched.
    ///
    /// # Errors
    ///
    /// Returns the first [`super::CacheError`] met. Devices written before
    /// the failure stay written.
    pub fn flush(&mut self) -> CacheResult<()> {
        let Some(dir) = self.dir.clone() else {
            return Ok(());
        };
        for (device_id, device) in &mut self.devices {
            if !device.dirty {
                continue;
            }
            let path = Self::file_path(&dir, self.algorithm, *device_id);
            write_compressed(&path, &device.entries)?;
            device.dirty = false;
            log::debug!(
                "Wrote {} cached hashes for device {} to {}",
                device.entries.len(),
                device_id,
                path.display()
            );
        }
        Ok(())
    }
}
