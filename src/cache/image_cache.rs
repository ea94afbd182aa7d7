//! Image metadata and fingerprint cache.
//!
//! A single file, `images.bin.gz`, holds three maps: pixel dimensions, EXIF
//! GPS positions (including the fact that a file has none), and perceptual
//! fingerprints keyed by hash size and rotation.
//!
//! Workers only read the loaded cache. New values are collected in
//! per-worker [`ImageCacheData`] deltas and merged on the main thread with
//! [`ImageCache::merge`] before [`ImageCache::flush`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::entry::{ImageHashKey, ImageKey};
use super::{read_compressed, write_compressed, CacheResult, CACHE_EXTENSION};
use crate::scanner::GpsCoord;

/// Serialized content of the image cache.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageCacheData {
    /// Width and height in pixels.
    pub dimensions: HashMap<ImageKey, (u32, u32)>,
    /// GPS position, `None` when the image has no usable EXIF position.
    pub gps: HashMap<ImageKey, Option<GpsCoord>>,
    /// Perceptual fingerprint bit vectors.
    pub hashes: HashMap<ImageHashKey, Vec<u8>>,
}

impl ImageCacheData {
    /// Whether the three maps are all empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty() && self.gps.is_empty() && self.hashes.is_empty()
    }

    /// Total number of entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.dimensions.len() + self.gps.len() + self.hashes.len()
    }
}

/// Loaded image cache.
#[derive(Debug, Default)]
pub struct ImageCache {
    path: Option<PathBuf>,
    data: ImageCacheData,
    dirty: bool,
}

impl ImageCache {
    /// A cache that is never persisted.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load `images.bin.gz` from `dir`.
    ///
    /// A missing or unreadable file yields an empty cache; read failures are
    /// logged as warnings.
    #[must_use]
    pub fn load(dir: &Path) -> Self {
        let path = Self::file_path(dir);
        let data = match read_compressed::<ImageCacheData>(&path) {
            Ok(Some(data)) => {
                log::debug!("Loaded {} image cache entries from {}", data.len(), path.display());
                data
            }
            Ok(None) => ImageCacheData::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable image cache: {}", e);
                ImageCacheData::default()
            }
        };
        Self {
            path: Some(path),
            data,
            dirty: false,
        }
    }

    /// Location of the cache file inside `dir`.
    #[must_use]
    pub fn file_path(dir: &Path) -> PathBuf {
        dir.join(format!("images.{CACHE_EXTENSION}"))
    }

    /// Cached dimensions.
    #[must_use]
    pub fn dimensions(&self, key: &ImageKey) -> Option<(u32, u32)> {
        self.data.dimensions.get(key).copied()
    }

    /// Cached GPS lookup: `Some(None)` means the file is known to have no
    /// position.
    #[must_use]
    pub fn gps(&self, key: &ImageKey) -> Option<Option<GpsCoord>> {
        self.data.gps.get(key).copied()
    }

    /// Cached fingerprint.
    #[must_use]
    pub fn hash(&self, key: &ImageHashKey) -> Option<&[u8]> {
        self.data.hashes.get(key).map(Vec::as_slice)
    }

    /// Number of cached entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Fold a worker delta into the cache.
    pub fn merge(&mut self, delta: ImageCacheData) {
        if delta.is_empty() {
            return;
        }
        self.data.dimensions.extend(delta.dimensions);
        self.data.gps.extend(delta.gps);
        self.data.hashes.extend(delta.hashes);
        self.dirty = true;
    }

    /// Write the cache back if it changed.
    ///
    /// # Errors
    ///
    /// Returns [`super::CacheError`] if the file cannot be written; the
    /// previous file is left in place.
    pub fn flush(&mut self) -> CacheResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if !self.dirty {
            return Ok(());
        }
        write_compressed(path, &self.data)?;
        self.dirty = false;
        log::debug!("Wrote {} image cache entries to {}", self.data.len(), path.display());
        Ok(())
    }
}
