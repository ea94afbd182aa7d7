//! Physical file identity and metadata snapshots.
//!
//! # Overview
//!
//! Two directory entries that share `(device_id, inode)` are the same
//! physical object. The scanner uses [`FileStat`] to decide whether a file is
//! already hard-linked (link count > 1) and to build the identity that the
//! collision pass and the caches key on. The mutation engine re-reads a
//! [`FileStat`] right before touching a file and compares it against the scan
//! snapshot.
//!
//! # Platform Support
//!
//! - **Unix**: device, inode, link count and ctime come from `MetadataExt`
//! - **Other**: the device is reported as 0 and the inode slot holds a
//!   digest of the path, so distinct paths never share an identity; the link
//!   count is 1 and the creation time stands in for the change time

use std::collections::HashMap;
use std::fs::Metadata;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

/// The `(device_id, inode)` pair naming one physical file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileIdentity {
    /// Device the file lives on.
    pub device_id: u64,
    /// Inode number on that device.
    pub inode: u64,
}

/// Metadata subset the engine cares about, read with `symlink_metadata`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    /// Device and inode.
    pub identity: FileIdentity,
    /// Number of hard links.
    pub nlink: u64,
    /// Size in bytes.
    pub size: u64,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_time_ns: i64,
    /// Status change time in nanoseconds since the Unix epoch.
    pub changed_time_ns: i64,
}

impl FileStat {
    /// Build a stat record for `path` from already-fetched metadata.
    #[must_use]
    pub fn from_metadata(path: &Path, metadata: &Metadata) -> Self {
        platform::stat(path, metadata)
    }

    /// Stat a path without following a trailing symlink.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the path cannot be stat'ed.
    pub fn read(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;
        Ok(Self::from_metadata(path, &metadata))
    }

    /// Whether more than one directory entry points at this file.
    #[must_use]
    pub fn is_multiply_linked(&self) -> bool {
        self.nlink > 1
    }
}

#[cfg(unix)]
mod platform {
    use super::{FileIdentity, FileStat};
    use std::fs::Metadata;
    use std::os::unix::fs::MetadataExt;
    use std::path::Path;

    pub(super) fn stat(_path: &Path, metadata: &Metadata) -> FileStat {
        FileStat {
            identity: FileIdentity {
                device_id: metadata.dev(),
                inode: metadata.ino(),
            },
            nlink: metadata.nlink(),
            size: metadata.size(),
            modified_time_ns: metadata.mtime() * 1_000_000_000 + metadata.mtime_nsec(),
            changed_time_ns: metadata.ctime() * 1_000_000_000 + metadata.ctime_nsec(),
        }
    }
}

#[cfg(not(unix))]
mod platform {
    use super::{system_time_ns, FileIdentity, FileStat};
    use std::fs::Metadata;
    use std::path::Path;

    pub(super) fn stat(path: &Path, metadata: &Metadata) -> FileStat {
        let modified = metadata.modified().ok().map_or(0, system_time_ns);
        FileStat {
            identity: FileIdentity {
                device_id: 0,
                inode: path_key(path),
            },
            nlink: 1,
            size: metadata.len(),
            modified_time_ns: modified,
            changed_time_ns: metadata.created().ok().map_or(modified, system_time_ns),
        }
    }

    /// Stable 64-bit key for a path; absolute paths are used as given.
    fn path_key(path: &Path) -> u64 {
        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        let digest = blake3::hash(absolute.as_os_str().as_encoded_bytes());
        let mut key = [0u8; 8];
        key.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(key)
    }
}

/// Convert a `SystemTime` to signed nanoseconds since the Unix epoch.
#[must_use]
pub fn system_time_ns(time: SystemTime) -> i64 {
    match time.duration_since(UNIX_EPOCH) {
        Ok(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        Err(e) => -i64::try_from(e.duration().as_nanos()).unwrap_or(i64::MAX),
    }
}

/// Counts how often each identity was reached during one scan.
///
/// Unlike a "first one wins" hardlink filter, every identity seen more than
/// once is reported so the caller can drop all of its occurrences.
#[derive(Debug, Default)]
pub struct IdentityCounter {
    seen: HashMap<FileIdentity, usize>,
}

impl IdentityCounter {
    /// Create an empty counter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence.
    pub fn record(&mut self, identity: FileIdentity) {
        *self.seen.entry(identity).or_insert(0) += 1;
    }

    /// Whether `identity` was recorded more than once.
    #[must_use]
    pub fn is_ambiguous(&self, identity: &FileIdentity) -> bool {
        self.seen.get(identity).is_some_and(|&n| n > 1)
    }

    /// Number of distinct identities recorded.
    #[must_use]
    pub fn distinct(&self) -> usize {
        self.seen.len()
    }

    /// Whether identities are meaningful on this platform.
    #[must_use]
    pub const fn is_supported() -> bool {
        cfg!(unix)
    }
}
