//! Directory scanning, content hashing and perceptual fingerprints.
//!
//! This module provides functionality for:
//! - Walking disjoint scan roots into a size-bucketed candidate pool
//! - Exclusion rules (glob or regular expression, matched on full paths)
//! - Physical identity tracking and already-linked detection
//! - Content hashing with a selectable digest
//! - Perceptual image hashing and EXIF GPS extraction
//!
//! # Architecture
//!
//! - [`walker`]: root validation and traversal ([`Scanner`])
//! - [`identity`]: `(device, inode)` identities and stat snapshots
//! - [`path_utils`]: NFC normalization and overlap checks
//! - [`hasher`]: whole-file and streaming content digests
//! - [`perceptual`]: combined perceptual hash and GPS coordinates
//!
//! # Example
//!
//! ```no_run
//! use dupehound::scanner::{ScanConfig, Scanner};
//! use std::path::PathBuf;
//!
//! let config = ScanConfig::default().with_min_size(Some(1024));
//! let scanner = Scanner::new(vec![PathBuf::from("/data/a"), PathBuf::from("/data/b")], config)?;
//! let outcome = scanner.scan()?;
//! for (size, entries) in &outcome.buckets {
//!     println!("{size} bytes: {} candidates", entries.len());
//! }
//! # Ok::<(), dupehound::scanner::ScanError>(())
//! ```

pub mod hasher;
pub mod identity;
pub mod path_utils;
pub mod perceptual;
pub mod walker;

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;

pub use hasher::{HashAlgorithm, HashError, Hasher};
pub use identity::{FileIdentity, FileStat};
pub use perceptual::{GpsCoord, ImageError, PerceptualHasher, Rotation};
pub use walker::Scanner;

/// One physical file discovered during a scan.
///
/// Entries are immutable once created. The path is split into the index of
/// the scan root, the directory below that root and the file name, so the
/// same root prefix is not repeated for every file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScanEntry {
    /// Index into the scan's root list.
    pub root_index: usize,
    /// Directory of the file, relative to its root.
    pub subpath: PathBuf,
    /// File name.
    pub file_name: OsString,
    /// Modification time in nanoseconds since the Unix epoch.
    pub modified_time_ns: i64,
    /// Status change time in nanoseconds since the Unix epoch.
    pub changed_time_ns: i64,
    /// Device holding the file.
    pub device_id: u64,
    /// Inode on that device.
    pub inode: u64,
    /// Size in bytes.
    pub size: u64,
}

impl ScanEntry {
    /// Build an entry from a stat record and its location.
    #[must_use]
    pub fn from_stat(root_index: usize, subpath: PathBuf, file_name: OsString, stat: &FileStat) -> Self {
        Self {
            root_index,
            subpath,
            file_name,
            modified_time_ns: stat.modified_time_ns,
            changed_time_ns: stat.changed_time_ns,
            device_id: stat.identity.device_id,
            inode: stat.identity.inode,
            size: stat.size,
        }
    }

    /// Physical identity of the file.
    #[must_use]
    pub fn identity(&self) -> FileIdentity {
        FileIdentity {
            device_id: self.device_id,
            inode: self.inode,
        }
    }

    /// Path relative to the root.
    #[must_use]
    pub fn relative_path(&self) -> PathBuf {
        self.subpath.join(&self.file_name)
    }

    /// Absolute path, given the root list the entry was scanned with.
    ///
    /// An out-of-range root index yields the relative path.
    #[must_use]
    pub fn full_path(&self, roots: &[PathBuf]) -> PathBuf {
        match roots.get(self.root_index) {
            Some(root) => root.join(&self.subpath).join(&self.file_name),
            None => self.relative_path(),
        }
    }

    /// Key of the directory holding this file.
    #[must_use]
    pub fn folder(&self) -> FolderKey {
        FolderKey {
            root_index: self.root_index,
            subpath: self.subpath.clone(),
        }
    }
}

/// A directory inside one scan root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FolderKey {
    /// Index of the root.
    pub root_index: usize,
    /// Directory below the root.
    pub subpath: PathBuf,
}

/// Candidate image recorded by the image scan.
///
/// Pixels are not decoded during the scan; only the extension and the raw
/// size are known at this point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageEntry {
    /// Location, identity and size.
    pub entry: ScanEntry,
    /// Lower-cased file extension.
    pub extension: String,
}

/// One exclusion rule, matched against the full candidate path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExclusionRule {
    /// Shell-style glob, e.g. `**/node_modules` or `*.tmp`.
    Glob(String),
    /// Regular expression searched anywhere in the path.
    Regex(String),
}

/// Compiled form of a list of [`ExclusionRule`]s.
#[derive(Debug, Clone)]
pub struct Exclusions {
    globs: GlobSet,
    regexes: Vec<Regex>,
}

impl Exclusions {
    /// Compile the rules.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::InvalidGlob`] or [`ScanError::InvalidRegex`] for
    /// the first malformed rule.
    pub fn compile(rules: &[ExclusionRule]) -> Result<Self, ScanError> {
        let mut builder = GlobSetBuilder::new();
        let mut regexes = Vec::new();
        for rule in rules {
            match rule {
                ExclusionRule::Glob(pattern) => {
                    let glob = Glob::new(pattern).map_err(|source| ScanError::InvalidGlob {
                        pattern: pattern.clone(),
                        source,
                    })?;
                    builder.add(glob);
                }
                ExclusionRule::Regex(pattern) => {
                    let regex = Regex::new(pattern).map_err(|source| ScanError::InvalidRegex {
                        pattern: pattern.clone(),
                        source,
                    })?;
                    regexes.push(regex);
                }
            }
        }
        let globs = builder.build().map_err(|source| ScanError::InvalidGlob {
            pattern: String::from("<set>"),
            source,
        })?;
        Ok(Self { globs, regexes })
    }

    /// Whether `path` matches any rule.
    #[must_use]
    pub fn is_excluded(&self, path: &Path) -> bool {
        if self.globs.is_match(path) {
            return true;
        }
        if self.regexes.is_empty() {
            return false;
        }
        let text = path.to_string_lossy();
        self.regexes.iter().any(|r| r.is_match(&text))
    }
}

/// Extensions the image scan accepts by default.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "bmp", "gif", "tif", "tiff", "webp",
];

/// Filtering policy for a scan.
#[derive(Debug, Clone)]
pub struct ScanConfig {
    /// Descend into and report dot-files.
    pub include_hidden: bool,
    /// Paths to leave out.
    pub exclusions: Vec<ExclusionRule>,
    /// Smallest file size to consider.
    pub min_size: Option<u64>,
    /// Largest file size to consider.
    pub max_size: Option<u64>,
    /// Extensions accepted by [`Scanner::scan_images`], lower case.
    pub image_extensions: Vec<String>,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            include_hidden: false,
            exclusions: Vec::new(),
            min_size: None,
            max_size: None,
            image_extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|e| (*e).to_string())
                .collect(),
        }
    }
}

impl ScanConfig {
    /// Include hidden entries.
    #[must_use]
    pub fn with_include_hidden(mut self, include: bool) -> Self {
        self.include_hidden = include;
        self
    }

    /// Add an exclusion rule.
    #[must_use]
    pub fn with_exclusion(mut self, rule: ExclusionRule) -> Self {
        self.exclusions.push(rule);
        self
    }

    /// Set the minimum size.
    #[must_use]
    pub fn with_min_size(mut self, size: Option<u64>) -> Self {
        self.min_size = size;
        self
    }

    /// Set the maximum size.
    #[must_use]
    pub fn with_max_size(mut self, size: Option<u64>) -> Self {
        self.max_size = size;
        self
    }

    /// Replace the accepted image extensions.
    #[must_use]
    pub fn with_image_extensions(mut self, extensions: Vec<String>) -> Self {
        self.image_extensions = extensions.into_iter().map(|e| e.to_lowercase()).collect();
        self
    }

    pub(crate) fn passes_size_filter(&self, size: u64) -> bool {
        self.min_size.is_none_or(|min| size >= min) && self.max_size.is_none_or(|max| size <= max)
    }
}

/// Non-fatal problem met during traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanIssue {
    /// Path involved, if known.
    pub path: PathBuf,
    /// Error text.
    pub message: String,
}

/// Side information collected during a scan.
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Symbolic links encountered and skipped.
    pub symlinks_skipped: Vec<PathBuf>,
    /// Files left out because their link count is above one, with that count.
    pub already_linked: Vec<(PathBuf, u64)>,
    /// Paths dropped because their identity was reached more than once.
    pub identity_collisions: Vec<PathBuf>,
    /// Entries that could not be read.
    pub issues: Vec<ScanIssue>,
    /// Regular files accepted before bucketing.
    pub files_seen: u64,
    /// Bytes of accepted files.
    pub bytes_seen: u64,
    /// Files dropped because their size bucket had a single member.
    pub singletons_dropped: u64,
}

/// Size-bucketed candidate pool.
pub type SizeBuckets = BTreeMap<u64, Vec<ScanEntry>>;

/// Result of a content scan.
#[derive(Debug, Clone)]
pub struct ScanOutcome {
    /// Validated absolute roots, indexed by [`ScanEntry::root_index`].
    pub roots: Vec<PathBuf>,
    /// Buckets with at least two members.
    pub buckets: SizeBuckets,
    /// Side information.
    pub report: ScanReport,
}

impl ScanOutcome {
    /// Devices represented in the pool.
    #[must_use]
    pub fn device_ids(&self) -> BTreeSet<u64> {
        self.buckets
            .values()
            .flatten()
            .map(|e| e.device_id)
            .collect()
    }

    /// Number of candidate files.
    #[must_use]
    pub fn candidate_count(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }
}

/// Result of an image scan.
#[derive(Debug, Clone)]
pub struct ImageScanOutcome {
    /// Validated absolute roots.
    pub roots: Vec<PathBuf>,
    /// Candidate images in traversal order.
    pub images: Vec<ImageEntry>,
    /// Side information.
    pub report: ScanReport,
}

/// Errors that stop a scan.
///
/// Per-entry I/O problems are not errors; they land in
/// [`ScanReport::issues`].
#[derive(thiserror::Error, Debug)]
pub enum ScanError {
    /// No roots were given.
    #[error("No scan roots given")]
    NoRoots,

    /// A root does not exist or cannot be resolved.
    #[error("Scan root not found: {path}: {source}")]
    RootNotFound {
        /// Root as given.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// A root is not a directory.
    #[error("Not a directory: {0}")]
    NotADirectory(PathBuf),

    /// Two roots are equal or nested.
    #[error("Scan roots overlap: {first} and {second}")]
    OverlappingRoots {
        /// First root.
        first: PathBuf,
        /// Second root.
        second: PathBuf,
    },

    /// Malformed glob.
    #[error("Invalid exclusion glob '{pattern}': {source}")]
    InvalidGlob {
        /// Pattern as given.
        pattern: String,
        /// Parser error.
        #[source]
        source: globset::Error,
    },

    /// Malformed regular expression.
    #[error("Invalid exclusion regex '{pattern}': {source}")]
    InvalidRegex {
        /// Pattern as given.
        pattern: String,
        /// Parser error.
        #[source]
        source: regex::Error,
    },

    /// The scan was cancelled; no partial pool is returned.
    #[error("Scan cancelled")]
    Cancelled,
}

impl ScanError {
    /// Whether this error is a precondition failure detected before
    /// traversal started.
    #[must_use]
    pub fn is_precondition(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}
