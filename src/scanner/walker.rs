//! Root validation and directory traversal.
//!
//! # Overview
//!
//! [`Scanner`] walks every scan root with [`walkdir`], which iterates with an
//! explicit stack of open directories, so deep trees never recurse on the
//! call stack. Symbolic links are recorded and skipped, hidden entries and
//! excluded paths are pruned (whole subtrees for directories), empty files
//! are ignored and files with a link count above one are set aside as
//! "already linked".
//!
//! After traversal, every `(device, inode)` identity reached more than once
//! is dropped entirely, then single-member size buckets are removed.
//!
//! Cancellation is checked at every directory entry. A cancelled scan
//! returns [`ScanError::Cancelled`] and nothing else.
//!
//! # Example
//!
//! ```no_run
//! use dupehound::scanner::{ExclusionRule, ScanConfig, Scanner};
//! use std::path::PathBuf;
//!
//! let config = ScanConfig::default().with_exclusion(ExclusionRule::Glob("**/.git".into()));
//! let scanner = Scanner::new(vec![PathBuf::from("/home/user/Photos")], config)?;
//! let outcome = scanner.scan()?;
//! println!("{} candidate files", outcome.candidate_count());
//! # Ok::<(), dupehound::scanner::ScanError>(())
//! ```

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use walkdir::WalkDir;

use super::identity::{FileStat, IdentityCounter};
use super::path_utils::{find_overlap, is_hidden_name, normalize_pathbuf};
use super::{
    Exclusions, ImageEntry, ImageScanOutcome, ScanConfig, ScanEntry, ScanError, ScanIssue,
    ScanOutcome, ScanReport, SizeBuckets,
};
use crate::progress::{Phase, ProgressCounters};
use crate::signal::CancelToken;

/// How often (in accepted files) the current path is published.
const PATH_REPORT_INTERVAL: u64 = 64;

/// Scanner over a validated set of disjoint roots.
#[derive(Debug)]
pub struct Scanner {
    roots: Vec<PathBuf>,
    config: ScanConfig,
    exclusions: Exclusions,
    cancel: CancelToken,
    progress: Option<Arc<ProgressCounters>>,
}

impl Scanner {
    /// Validate roots and exclusion rules.
    ///
    /// Roots are resolved to absolute canonical paths. Equal or nested roots
    /// are rejected before any traversal happens.
    ///
    /// # Errors
    ///
    /// - [`ScanError::NoRoots`] for an empty list
    /// - [`ScanError::RootNotFound`] / [`ScanError::NotADirectory`] for bad roots
    /// - [`ScanError::OverlappingRoots`] for equal or nested roots
    /// - [`ScanError::InvalidGlob`] / [`ScanError::InvalidRegex`] for bad rules
    pub fn new(roots: Vec<PathBuf>, config: ScanConfig) -> Result<Self, ScanError> {
        let roots = validate_roots(roots)?;
        let exclusions = Exclusions::compile(&config.exclusions)?;
        Ok(Self {
            roots,
            config,
            exclusions,
            cancel: CancelToken::new(),
            progress: None,
        })
    }

    /// Use `token` for cancellation.
    #[must_use]
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    /// Report into `counters` while walking.
    #[must_use]
    pub fn with_progress(mut self, counters: Arc<ProgressCounters>) -> Self {
        self.progress = Some(counters);
        self
    }

    /// The validated roots.
    #[must_use]
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    /// Walk all roots into size buckets for content comparison.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Cancelled`] if the token fires during the walk.
    pub fn scan(&self) -> Result<ScanOutcome, ScanError> {
        let (entries, mut report) = self.walk(|_| true)?;
        let entries = drop_ambiguous_identities(entries, &self.roots, &mut report);

        let mut buckets = SizeBuckets::new();
        for entry in entries {
            buckets.entry(entry.size).or_default().push(entry);
        }
        buckets.retain(|size, members| {
            if members.len() < 2 {
                log::trace!("Dropping singleton size bucket: {} bytes", size);
                report.singletons_dropped += members.len() as u64;
                false
            } else {
                true
            }
        });

        log::info!(
            "Scan complete: {} files seen, {} candidates in {} size buckets",
            report.files_seen,
            buckets.values().map(Vec::len).sum::<usize>(),
            buckets.len()
        );

        Ok(ScanOutcome {
            roots: self.roots.clone(),
            buckets,
            report,
        })
    }

    /// Walk all roots collecting image candidates.
    ///
    /// Only files whose extension is in [`ScanConfig::image_extensions`] are
    /// kept. Size buckets are not pruned since similar images rarely share a
    /// byte size.
    ///
    /// # Errors
    ///
    /// Returns [`ScanError::Cancelled`] if the token fires during the walk.
    pub fn scan_images(&self) -> Result<ImageScanOutcome, ScanError> {
        let extensions = &self.config.image_extensions;
        let (entries, mut report) = self.walk(|name| {
            extension_of(name).is_some_and(|ext| extensions.iter().any(|e| *e == ext))
        })?;
        let entries = drop_ambiguous_identities(entries, &self.roots, &mut report);

        let images: Vec<ImageEntry> = entries
            .into_iter()
            .map(|entry| {
                let extension = extension_of(&entry.file_name).unwrap_or_default();
                ImageEntry { entry, extension }
            })
            .collect();

        log::info!("Image scan complete: {} candidate images", images.len());

        Ok(ImageScanOutcome {
            roots: self.roots.clone(),
            images,
            report,
        })
    }

    /// Traverse every root, returning accepted regular files in walk order.
    fn walk<F>(&self, accept_name: F) -> Result<(Vec<ScanEntry>, ScanReport), ScanError>
    where
        F: Fn(&OsString) -> bool,
    {
        let mut entries = Vec::new();
        let mut report = ScanReport::default();

        if let Some(ref progress) = self.progress {
            progress.begin_phase(Phase::Scanning, 0);
        }

        for (root_index, root) in self.roots.iter().enumerate() {
            log::debug!("Walking root {}: {}", root_index, root.display());

            let walker = WalkDir::new(root)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| {
                    if e.depth() == 0 {
                        return true;
                    }
                    if !self.config.include_hidden && is_hidden_name(e.file_name()) {
                        log::trace!("Skipping hidden entry: {}", e.path().display());
                        return false;
                    }
                    if self.exclusions.is_excluded(e.path()) {
                        log::trace!("Excluded: {}", e.path().display());
                        return false;
                    }
                    true
                });

            for item in walker {
                if self.cancel.is_cancelled() {
                    log::info!("Scan cancelled, discarding {} collected entries", entries.len());
                    return Err(ScanError::Cancelled);
                }

                let dir_entry = match item {
                    Ok(e) => e,
                    Err(e) => {
                        let path = e.path().map_or_else(|| root.clone(), Path::to_path_buf);
                        log::warn!("Skipping unreadable entry {}: {}", path.display(), e);
                        report.issues.push(ScanIssue {
                            path,
                            message: e.to_string(),
                        });
                        continue;
                    }
                };

                let file_type = dir_entry.file_type();
                if file_type.is_symlink() {
                    log::debug!("Skipping symlink: {}", dir_entry.path().display());
                    report.symlinks_skipped.push(dir_entry.path().to_path_buf());
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }

                let name = dir_entry.file_name().to_os_string();
                if !accept_name(&name) {
                    continue;
                }

                let metadata = match dir_entry.metadata() {
                    Ok(m) => m,
                    Err(e) => {
                        log::warn!("Cannot stat {}: {}", dir_entry.path().display(), e);
                        report.issues.push(ScanIssue {
                            path: dir_entry.path().to_path_buf(),
                            message: e.to_string(),
                        });
                        continue;
                    }
                };
                let stat = FileStat::from_metadata(dir_entry.path(), &metadata);

                if stat.size == 0 {
                    log::trace!("Ignoring empty file: {}", dir_entry.path().display());
                    continue;
                }
                if !self.config.passes_size_filter(stat.size) {
                    log::trace!(
                        "Skipping file due to size filter ({}): {}",
                        stat.size,
                        dir_entry.path().display()
                    );
                    continue;
                }
                if stat.is_multiply_linked() {
                    log::debug!(
                        "Already linked ({} links): {}",
                        stat.nlink,
                        dir_entry.path().display()
                    );
                    report
                        .already_linked
                        .push((dir_entry.path().to_path_buf(), stat.nlink));
                    continue;
                }

                let subpath = dir_entry
                    .path()
                    .parent()
                    .and_then(|p| p.strip_prefix(root).ok())
                    .map(Path::to_path_buf)
                    .unwrap_or_default();

                report.files_seen += 1;
                report.bytes_seen += stat.size;
                if let Some(ref progress) = self.progress {
                    progress.add_file(stat.size);
                    if report.files_seen % PATH_REPORT_INTERVAL == 1 {
                        progress.set_current_path(&dir_entry.path().to_string_lossy());
                    }
                }

                entries.push(ScanEntry::from_stat(root_index, subpath, name, &stat));
            }
        }

        Ok((entries, report))
    }
}

/// Resolve, normalize and check roots for overlap.
fn validate_roots(roots: Vec<PathBuf>) -> Result<Vec<PathBuf>, ScanError> {
    if roots.is_empty() {
        return Err(ScanError::NoRoots);
    }

    let mut resolved = Vec::with_capacity(roots.len());
    for root in roots {
        let canonical = std::fs::canonicalize(&root).map_err(|source| ScanError::RootNotFound {
            path: root.clone(),
            source,
        })?;
        if !canonical.is_dir() {
            return Err(ScanError::NotADirectory(root));
        }
        resolved.push(normalize_pathbuf(&canonical));
    }

    if let Some((i, j)) = find_overlap(&resolved) {
        return Err(ScanError::OverlappingRoots {
            first: resolved[i].clone(),
            second: resolved[j].clone(),
        });
    }

    Ok(resolved)
}

/// Remove every entry whose identity occurs more than once.
fn drop_ambiguous_identities(
    entries: Vec<ScanEntry>,
    roots: &[PathBuf],
    report: &mut ScanReport,
) -> Vec<ScanEntry> {
    if !IdentityCounter::is_supported() {
        return entries;
    }

    let mut counter = IdentityCounter::new();
    for entry in &entries {
        counter.record(entry.identity());
    }

    entries
        .into_iter()
        .filter(|entry| {
            if counter.is_ambiguous(&entry.identity()) {
                let path = entry.full_path(roots);
                log::debug!("Identity reached more than once, excluding: {}", path.display());
                report.identity_collisions.push(path);
                false
            } else {
                true
            }
        })
        .collect()
}

fn extension_of(name: &OsString) -> Option<String> {
    Path::new(name)
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
}
