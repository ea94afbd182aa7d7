//! Duplicate detection.
//!
//! - [`finder`]: byte-identical groups from content hashes, one worker per
//!   device
//! - [`similar`]: perceptual or GPS similarity groups for images
//! - [`cluster`]: DBSCAN and its metrics
//! - [`groups`]: the shrink-only store both engines produce

pub mod cluster;
pub mod finder;
pub mod groups;
pub mod similar;

use thiserror::Error;

pub use finder::{CrcConfig, CrcEngine, CrcOutcome, CrcStats};
pub use groups::{
    DuplicateGroup, DuplicateStore, GroupKey, NoopObserver, RemovalOutcome, StoreObserver,
};
pub use similar::{ImageConfig, ImageEngine, ImageOutcome, ImageStats, SimilarityMode};

/// Errors that stop an engine run before it produces a store.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The worker pool could not be created.
    #[error("Failed to create worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// The hash cache was loaded for another digest algorithm.
    #[error("Hash cache holds {cache} digests but the engine computes {engine}")]
    AlgorithmMismatch {
        /// Algorithm of the cache.
        cache: crate::scanner::HashAlgorithm,
        /// Algorithm of the engine.
        engine: crate::scanner::HashAlgorithm,
    },

    /// A parameter is out of range.
    #[error("Invalid engine parameter: {0}")]
    InvalidParameter(String),
}
