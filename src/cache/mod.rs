//! Persistent caches for content hashes and image fingerprints.
//!
//! # Architecture
//!
//! * [`hash_cache`]: one file per storage device, mapping
//!   `(inode, mtime)` to a content digest.
//! * [`image_cache`]: a single file holding image dimensions, GPS positions
//!   and perceptual fingerprints.
//! * [`entry`]: the typed keys both caches use.
//!
//! Every cache file is a gzip stream wrapping a bincode payload. Files are
//! rewritten whole: the new content goes to `<name>.tmp` and is renamed over
//! the previous file, so an interrupted write leaves the old cache intact.
//!
//! # Cache Invalidation
//!
//! Keys include the modification time. A file that changed since it was
//! cached simply misses; stale entries are never returned.

pub mod entry;
pub mod hash_cache;
pub mod image_cache;

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use entry::{HashKey, ImageHashKey, ImageKey};
pub use hash_cache::HashCache;
pub use image_cache::{ImageCache, ImageCacheData};

/// Extension of every cache file.
pub const CACHE_EXTENSION: &str = "bin.gz";

/// Errors raised while reading or writing a cache file.
#[derive(Debug, Error)]
pub enum CacheError {
    /// File system error.
    #[error("cache I/O error for {path}: {source}")]
    Io {
        /// Cache file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Payload could not be encoded or decoded.
    #[error("cache encoding error for {path}: {source}")]
    Encoding {
        /// Cache file.
        path: PathBuf,
        /// The bincode error.
        #[source]
        source: bincode::Error,
    },
}

/// Result alias for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Read and decode a compressed cache file.
///
/// Returns `Ok(None)` if the file does not exist.
pub(crate) fn read_compressed<T: DeserializeOwned>(path: &Path) -> CacheResult<Option<T>> {
    let file = match File::open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(CacheError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let decoder = GzDecoder::new(BufReader::new(file));
    bincode::deserialize_from(decoder)
        .map(Some)
        .map_err(|source| CacheError::Encoding {
            path: path.to_path_buf(),
            source,
        })
}

/// Encode `value` and atomically replace `path` with it.
pub(crate) fn write_compressed<T: Serialize>(path: &Path, value: &T) -> CacheResult<()> {
    let io_err = |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let tmp = path.with_extension("tmp");
    {
        let file = File::create(&tmp).map_err(io_err)?;
        let mut encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        bincode::serialize_into(&mut encoder, value).map_err(|source| CacheError::Encoding {
            path: path.to_path_buf(),
            source,
        })?;
        let mut writer = encoder.finish().map_err(io_err)?;
        writer.flush().map_err(io_err)?;
        writer
            .into_inner()
            .map_err(|e| io_err(e.into_error()))?
            .sync_all()
            .map_err(io_err)?;
    }
    fs::rename(&tmp, path).map_err(io_err)
}

/// Delete every cache file in `dir`. Returns how many were removed.
///
/// # Errors
///
/// Returns [`CacheError::Io`] if the directory cannot be listed or a file
/// cannot be removed. A missing directory counts as empty.
pub fn clear_all(dir: &Path) -> CacheResult<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(source) => {
            return Err(CacheError::Io {
                path: dir.to_path_buf(),
                source,
            })
        }
    };

    let mut removed = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        let is_cache = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.ends_with(CACHE_EXTENSION));
        if is_cache {
            fs::remove_file(&path).map_err(|source| CacheError::Io {
                path: path.clone(),
                source,
            })?;
            removed += 1;
        }
    }
    log::info!("Removed {} cache file(s) from {}", removed, dir.display());
    Ok(removed)
}
