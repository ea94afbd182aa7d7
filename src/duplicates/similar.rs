//! Similar-image finder.
//!
//! # Overview
//!
//! [`ImageEngine::run`] groups images that look alike (perceptual mode) or
//! were taken close to each other (GPS mode).
//!
//! The candidate list is dealt round-robin into one partition per worker
//! thread. Each worker owns its partition, reads the loaded
//! [`ImageCache`] without locking and records new dimensions, positions and
//! fingerprints in its own [`ImageCacheData`] delta. The deltas are merged
//! into the cache on the calling thread once all workers are done.
//!
//! The collected points are then clustered with [`dbscan`]:
//!
//! | Mode | Point | Metric | Radius |
//! |------|-------|--------|--------|
//! | Perceptual | fingerprint bits | Manhattan | `ceil(bits × divergence / 100)` |
//! | GPS | `[lat, lon]` in radians | haversine | `km / 6371.0088` |
//!
//! With rotations enabled an image contributes up to four points. Each
//! image is kept only in the cluster with the most distinct images among
//! those it landed in, so it appears in at most one group. Clusters with at
//! least two images are numbered by largest size, then newest file, then
//! path, which makes the numbering independent of the clustering's own
//! labels.
//!
//! # Cancellation
//!
//! Workers check the token before every file. Clustering is a single call
//! and is not interrupted; the token is checked before and after it, and a
//! cancelled run returns an empty store flagged as interrupted.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use super::cluster::{dbscan, gps_radius, haversine, manhattan, perceptual_radius};
use super::groups::{DuplicateStore, GroupKey};
use super::EngineError;
use crate::cache::{ImageCache, ImageCacheData, ImageHashKey, ImageKey};
use crate::progress::{Phase, ProgressCounters};
use crate::scanner::perceptual::{image_dimensions, read_gps, DEFAULT_HASH_SIZE, MAX_HASH_SIZE};
use crate::scanner::{ImageEntry, PerceptualHasher, Rotation};
use crate::signal::CancelToken;

/// Default divergence, in percent of fingerprint bits.
pub const DEFAULT_DIVERGENCE: f64 = 5.0;

/// Default GPS grouping distance in kilometres.
pub const DEFAULT_GPS_DISTANCE_KM: f64 = 0.1;

/// What "similar" means for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SimilarityMode {
    /// Compare perceptual fingerprints.
    Perceptual {
        /// Hash edge length per algorithm.
        hash_size: u32,
        /// Also fingerprint the 90, 180 and 270 degree rotations.
        all_rotations: bool,
        /// Allowed difference in percent of fingerprint bits.
        divergence: f64,
    },
    /// Compare EXIF GPS positions.
    Gps {
        /// Maximum great-circle distance in kilometres.
        distance_km: f64,
    },
}

impl Default for SimilarityMode {
    fn default() -> Self {
        Self::Perceptual {
            hash_size: DEFAULT_HASH_SIZE,
            all_rotations: false,
            divergence: DEFAULT_DIVERGENCE,
        }
    }
}

impl SimilarityMode {
    fn validate(&self) -> Result<(), EngineError> {
        match *self {
            Self::Perceptual {
                hash_size,
                divergence,
                ..
            } => {
                if !(2..=MAX_HASH_SIZE).contains(&hash_size) {
                    return Err(EngineError::InvalidParameter(format!(
                        "hash size must be between 2 and {MAX_HASH_SIZE}, got {hash_size}"
                    )));
                }
                if !divergence.is_finite() || !(0.0..=100.0).contains(&divergence) {
                    return Err(EngineError::InvalidParameter(format!(
                        "divergence must be between 0 and 100, got {divergence}"
                    )));
                }
            }
            Self::Gps { distance_km } => {
                if !distance_km.is_finite() || distance_km < 0.0 {
                    return Err(EngineError::InvalidParameter(format!(
                        "distance must be a non-negative number of kilometres, got {distance_km}"
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Configuration of an image run.
#[derive(Clone)]
pub struct ImageConfig {
    /// Similarity criterion.
    pub mode: SimilarityMode,
    /// Images narrower or lower than this `(width, height)` are skipped.
    pub min_dimensions: Option<(u32, u32)>,
    /// Images wider or taller than this `(width, height)` are skipped.
    pub max_dimensions: Option<(u32, u32)>,
    /// Worker threads.
    pub threads: usize,
    /// Cancellation token.
    pub cancel: CancelToken,
    /// Counters to publish progress to.
    pub progress: Option<Arc<ProgressCounters>>,
}

impl std::fmt::Debug for ImageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageConfig")
            .field("mode", &self.mode)
            .field("min_dimensions", &self.min_dimensions)
            .field("max_dimensions", &self.max_dimensions)
            .field("threads", &self.threads)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            mode: SimilarityMode::default(),
            min_dimensions: None,
            max_dimensions: None,
            threads: std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get),
            cancel: CancelToken::new(),
            progress: None,
        }
    }
}

impl ImageConfig {
    /// Set the similarity criterion.
    #[must_use]
    pub fn with_mode(mut self, mode: SimilarityMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the minimum `(width, height)`.
    #[must_use]
    pub fn with_min_dimensions(mut self, dims: Option<(u32, u32)>) -> Self {
        self.min_dimensions = dims;
        self
    }

    /// Set the maximum `(width, height)`.
    #[must_use]
    pub fn with_max_dimensions(mut self, dims: Option<(u32, u32)>) -> Self {
        self.max_dimensions = dims;
        self
    }

    /// Set the number of worker threads (minimum 1).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
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

    fn needs_dimensions(&self) -> bool {
        self.min_dimensions.is_some() || self.max_dimensions.is_some()
    }

    fn dimensions_allowed(&self, (width, height): (u32, u32)) -> bool {
        if let Some((min_w, min_h)) = self.min_dimensions {
            if width < min_w || height < min_h {
                return false;
            }
        }
        if let Some((max_w, max_h)) = self.max_dimensions {
            if width > max_w || height > max_h {
                return false;
            }
        }
        true
    }
}

/// Statistics of one image run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageStats {
    /// Candidate images handed to the engine.
    pub images: usize,
    /// Images whose features were collected.
    pub processed: usize,
    /// Dimension, GPS or fingerprint values served from the cache.
    pub cache_hits: usize,
    /// Images that could not be read or decoded.
    pub failures: usize,
    /// Images outside the dimension bounds.
    pub filtered: usize,
    /// Images without a GPS position (GPS mode).
    pub without_gps: usize,
    /// Points handed to clustering.
    pub points: usize,
    /// The run was cancelled; the store is empty.
    pub interrupted: bool,
    /// Set when the cache could not be written back.
    pub cache_error: Option<String>,
}

/// Groups and statistics of one image run.
#[derive(Debug, Clone)]
pub struct ImageOutcome {
    /// Resulting similarity groups.
    pub store: DuplicateStore,
    /// Run statistics.
    pub stats: ImageStats,
}

#[derive(Debug, Clone)]
enum Feature {
    Bits(Vec<u8>),
    Position([f64; 2]),
}

impl Feature {
    fn distance(&self, other: &Self) -> f64 {
        match (self, other) {
            (Self::Bits(a), Self::Bits(b)) => manhattan(a, b),
            (Self::Position(a), Self::Position(b)) => haversine(a, b),
            _ => f64::INFINITY,
        }
    }
}

/// A clustering input: which image, which orientation, what value.
#[derive(Debug, Clone)]
struct Point {
    item: usize,
    rotation: Rotation,
    feature: Feature,
}

#[derive(Debug, Default)]
struct WorkerResult {
    points: Vec<Point>,
    delta: ImageCacheData,
    processed: usize,
    cache_hits: usize,
    failures: usize,
    filtered: usize,
    without_gps: usize,
}

/// Similar-image engine.
#[derive(Debug, Clone, Default)]
pub struct ImageEngine {
    config: ImageConfig,
}

impl ImageEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(config: ImageConfig) -> Self {
        Self { config }
    }

    /// Configuration in use.
    #[must_use]
    pub fn config(&self) -> &ImageConfig {
        &self.config
    }

    /// Collect features for `images`, cluster them and build groups.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidParameter`] for an out-of-range mode setting
    /// - [`EngineError::ThreadPool`] if the worker pool cannot be created
    pub fn run(
        &self,
        roots: &[PathBuf],
        images: &[ImageEntry],
        cache: &mut ImageCache,
    ) -> Result<ImageOutcome, EngineError> {
        self.config.mode.validate()?;
        let started = Instant::now();

        let mut stats = ImageStats {
            images: images.len(),
            ..ImageStats::default()
        };

        let workers = self.config.threads.max(1).min(images.len().max(1));
        let mut partitions: Vec<Vec<usize>> = vec![Vec::new(); workers];
        for index in 0..images.len() {
            partitions[index % workers].push(index);
        }

        if let Some(ref progress) = self.config.progress {
            progress.begin_phase(Phase::Imaging, images.len() as u64);
        }
        log::info!(
            "Collecting image features for {} files with {} worker(s)",
            images.len(),
            workers
        );

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("dupehound-img-{i}"))
            .build()?;

        let snapshot: &ImageCache = cache;
        let results: Vec<WorkerResult> = pool.install(|| {
            partitions
                .par_iter()
                .map(|indices| self.process_partition(roots, images, indices, snapshot))
                .collect()
        });

        let mut points = Vec::new();
        for result in results {
            stats.processed += result.processed;
            stats.cache_hits += result.cache_hits;
            stats.failures += result.failures;
            stats.filtered += result.filtered;
            stats.without_gps += result.without_gps;
            points.extend(result.points);
            cache.merge(result.delta);
        }
        if let Err(e) = cache.flush() {
            log::warn!("Failed to write image cache: {}", e);
            stats.cache_error = Some(e.to_string());
        }

        if self.config.cancel.is_cancelled() {
            log::info!("Image run cancelled before clustering");
            return Ok(self.interrupted(roots, stats));
        }

        points.sort_by(|a, b| a.item.cmp(&b.item).then(a.rotation.cmp(&b.rotation)));
        stats.points = points.len();

        if let Some(ref progress) = self.config.progress {
            progress.begin_phase(Phase::Clustering, points.len() as u64);
        }

        let eps = match self.config.mode {
            SimilarityMode::Perceptual {
                hash_size,
                divergence,
                ..
            } => perceptual_radius(3 * (hash_size as usize).pow(2), divergence),
            SimilarityMode::Gps { distance_km } => gps_radius(distance_km),
        };
        log::debug!("Clustering {} points with radius {}", points.len(), eps);
        let labels = dbscan(&points, eps, 2, |a, b| a.feature.distance(&b.feature));

        if self.config.cancel.is_cancelled() {
            log::info!("Image run cancelled during clustering; discarding clusters");
            return Ok(self.interrupted(roots, stats));
        }

        let clusters = assign_clusters(&points, &labels);
        let store = build_store(roots, images, clusters);

        if let Some(ref progress) = self.config.progress {
            progress.set_found(store.len() as u64, store.total_duplicate_space());
            progress.begin_phase(Phase::Done, 0);
        }
        log::info!(
            "Image run complete in {:.2?}: {} groups from {} images",
            started.elapsed(),
            store.len(),
            images.len()
        );

        Ok(ImageOutcome { store, stats })
    }

    fn interrupted(&self, roots: &[PathBuf], mut stats: ImageStats) -> ImageOutcome {
        stats.interrupted = true;
        if let Some(ref progress) = self.config.progress {
            progress.begin_phase(Phase::Done, 0);
        }
        ImageOutcome {
            store: DuplicateStore::new(roots.to_vec()),
            stats,
        }
    }

    /// Collect the features of one worker's items.
    fn process_partition(
        &self,
        roots: &[PathBuf],
        images: &[ImageEntry],
        indices: &[usize],
        cache: &ImageCache,
    ) -> WorkerResult {
        let mut result = WorkerResult::default();
        let hasher = match self.config.mode {
            SimilarityMode::Perceptual { hash_size, .. } => Some(PerceptualHasher::new(hash_size)),
            SimilarityMode::Gps { .. } => None,
        };

        for &index in indices {
            if self.config.cancel.is_cancelled() {
                break;
            }
            let image = &images[index];
            let path = image.entry.full_path(roots);
            let key = ImageKey::from(&image.entry);
            if let Some(ref progress) = self.config.progress {
                progress.set_info(&path.to_string_lossy());
            }

            let accepted = self.check_dimensions(&path, key, cache, &mut result);
            if accepted {
                let collected = match (&self.config.mode, &hasher) {
                    (
                        SimilarityMode::Perceptual {
                            hash_size,
                            all_rotations,
                            ..
                        },
                        Some(hasher),
                    ) => collect_fingerprints(
                        hasher,
                        &path,
                        index,
                        key,
                        *hash_size,
                        *all_rotations,
                        cache,
                        &mut result,
                    ),
                    _ => collect_position(&path, index, key, cache, &mut result),
                };
                if collected {
                    result.processed += 1;
                } else {
                    result.failures += 1;
                }
            }

            if let Some(ref progress) = self.config.progress {
                progress.item_done();
            }
        }
        result
    }

    /// Apply the dimension bounds. Returns false if the image is skipped.
    fn check_dimensions(
        &self,
        path: &std::path::Path,
        key: ImageKey,
        cache: &ImageCache,
        result: &mut WorkerResult,
    ) -> bool {
        if !self.config.needs_dimensions() {
            return true;
        }
        let dims = match cache.dimensions(&key) {
            Some(dims) => {
                result.cache_hits += 1;
                dims
            }
            None => match image_dimensions(path) {
                Ok(dims) => {
                    result.delta.dimensions.insert(key, dims);
                    dims
                }
                Err(e) => {
                    log::warn!("{}", e);
                    result.failures += 1;
                    return false;
                }
            },
        };
        if self.config.dimensions_allowed(dims) {
            true
        } else {
            log::trace!("Outside dimension bounds {:?}: {}", dims, path.display());
            result.filtered += 1;
            false
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn collect_fingerprints(
    hasher: &PerceptualHasher,
    path: &std::path::Path,
    index: usize,
    key: ImageKey,
    hash_size: u32,
    all_rotations: bool,
    cache: &ImageCache,
    result: &mut WorkerResult,
) -> bool {
    let rotations: &[Rotation] = if all_rotations {
        &Rotation::ALL
    } else {
        &Rotation::ALL[..1]
    };

    let mut decoded = None;
    for &rotation in rotations {
        let hash_key = ImageHashKey {
            image: key,
            hash_size,
            rotation,
        };
        let bits = if let Some(bits) = cache.hash(&hash_key) {
            result.cache_hits += 1;
            bits.to_vec()
        } else {
            if decoded.is_none() {
                match PerceptualHasher::load(path) {
                    Ok(image) => decoded = Some(image),
                    Err(e) => {
                        log::warn!("{}", e);
                        return false;
                    }
                }
            }
            let Some(image) = decoded.as_ref() else {
                return false;
            };
            let bits = hasher.fingerprint(image, rotation);
            result.delta.hashes.insert(hash_key, bits.clone());
            bits
        };
        result.points.push(Point {
            item: index,
            rotation,
            feature: Feature::Bits(bits),
        });
    }
    true
}

fn collect_position(
    path: &std::path::Path,
    index: usize,
    key: ImageKey,
    cache: &ImageCache,
    result: &mut WorkerResult,
) -> bool {
    let position = match cache.gps(&key) {
        Some(position) => {
            result.cache_hits += 1;
            position
        }
        None => match read_gps(path) {
            Ok(position) => {
                result.delta.gps.insert(key, position);
                position
            }
            Err(e) => {
                log::warn!("{}", e);
                return false;
            }
        },
    };
    match position {
        Some(coord) => result.points.push(Point {
            item: index,
            rotation: Rotation::None,
            feature: Feature::Position(coord.to_radians()),
        }),
        None => result.without_gps += 1,
    }
    true
}

/// Keep every image in exactly one cluster and return `label -> items`.
///
/// An image whose points fell into several clusters stays in the one with
/// the most distinct images, the lowest label on a tie.
fn assign_clusters(points: &[Point], labels: &[Option<usize>]) -> BTreeMap<usize, Vec<usize>> {
    let mut cluster_items: HashMap<usize, HashSet<usize>> = HashMap::new();
    let mut item_labels: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (point, label) in points.iter().zip(labels) {
        if let Some(label) = *label {
            cluster_items.entry(label).or_default().insert(point.item);
            item_labels.entry(point.item).or_default().push(label);
        }
    }

    let mut clusters: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (item, mut candidates) in item_labels {
        candidates.sort_unstable();
        candidates.dedup();
        let best = candidates.into_iter().max_by(|a, b| {
            let da = cluster_items.get(a).map_or(0, HashSet::len);
            let db = cluster_items.get(b).map_or(0, HashSet::len);
            da.cmp(&db).then(b.cmp(a))
        });
        if let Some(label) = best {
            clusters.entry(label).or_default().push(item);
        }
    }
    clusters.retain(|_, items| items.len() >= 2);
    clusters
}

/// Number the clusters in a stable order and build the store.
fn build_store(
    roots: &[PathBuf],
    images: &[ImageEntry],
    clusters: BTreeMap<usize, Vec<usize>>,
) -> DuplicateStore {
    let mut groups: Vec<Vec<crate::scanner::ScanEntry>> = clusters
        .into_values()
        .map(|items| {
            let mut members: Vec<_> = items.into_iter().map(|i| images[i].entry.clone()).collect();
            members.sort();
            members
        })
        .collect();

    groups.sort_by(|a, b| {
        let largest = |g: &[crate::scanner::ScanEntry]| g.iter().map(|e| e.size).max().unwrap_or(0);
        let newest = |g: &[crate::scanner::ScanEntry]| {
            g.iter().map(|e| e.modified_time_ns).max().unwrap_or(i64::MIN)
        };
        largest(b)
            .cmp(&largest(a))
            .then_with(|| newest(b).cmp(&newest(a)))
            .then_with(|| a.first().cmp(&b.first()))
    });

    DuplicateStore::from_groups(
        roots.to_vec(),
        groups
            .into_iter()
            .enumerate()
            .map(|(id, members)| (GroupKey::Similar { id }, members)),
    )
}
