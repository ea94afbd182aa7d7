//! Cache keys.
//!
//! Every key carries the modification time, so a changed file misses
//! instead of returning a stale value.

use serde::{Deserialize, Serialize};

use crate::scanner::{Rotation, ScanEntry};

/// Key of the per-device content hash cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HashKey {
    /// Inode on the cache's device.
    pub inode: u64,
    /// Modification time in nanoseconds.
    pub mtime_ns: i64,
}

/// Key of image dimension and GPS entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageKey {
    /// Device holding the file.
    pub device_id: u64,
    /// Inode on that device.
    pub inode: u64,
    /// Modification time in nanoseconds.
    pub mtime_ns: i64,
}

impl From<&ScanEntry> for ImageKey {
    fn from(entry: &ScanEntry) -> Self {
        Self {
            device_id: entry.device_id,
            inode: entry.inode,
            mtime_ns: entry.modified_time_ns,
        }
    }
}

/// Key of a perceptual fingerprint.
///
/// Hash size and rotation change the stored vector, so both are part of
/// the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageHashKey {
    /// File identity and mtime.
    pub image: ImageKey,
    /// Hash edge length.
    pub hash_size: u32,
    /// Orientation variant.
    pub rotation: Rotation,
}
