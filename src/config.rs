//! Engine configuration.
//!
//! Settings are layered with `figment`, later layers overriding earlier
//! ones:
//!
//! 1. built-in defaults ([`Config::default`])
//! 2. `config.toml` in the platform config directory
//! 3. an explicit file given with `--config`
//! 4. environment variables prefixed `DUPEHOUND_` (e.g.
//!    `DUPEHOUND_HASH_ALGORITHM=blake3`)
//!
//! Scan requests (roots, exclusions, size bounds) are command-line only and
//! never read from here.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::actions::{MutationPolicy, ShapeViolationPolicy};
use crate::scanner::hasher::{DEFAULT_BLOCK_SIZE, DEFAULT_WHOLE_READ_THRESHOLD};
use crate::scanner::HashAlgorithm;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "DUPEHOUND_";

/// Name of the configuration file.
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A layer could not be parsed or has a wrong value type.
    #[error("invalid configuration: {0}")]
    Invalid(#[from] Box<figment::Error>),

    /// The explicit config file does not exist.
    #[error("config file not found: {0}")]
    NotFound(PathBuf),

    /// No platform directories (no home directory).
    #[error("cannot determine the platform configuration directory")]
    NoProjectDirs,

    /// Writing the file failed.
    #[error("cannot write {path}: {source}")]
    Write {
        /// Target file.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serializing to TOML failed.
    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Engine tuning and mutation defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Content digest.
    pub hash_algorithm: HashAlgorithm,
    /// Streaming read block size in bytes.
    pub block_size: usize,
    /// Files up to this size are read in one call.
    pub whole_read_threshold: u64,
    /// Progress publication interval.
    pub progress_interval_ms: u64,
    /// Cache directory; the platform cache directory when unset.
    pub cache_dir: Option<PathBuf>,
    /// Read and write the persistent caches.
    pub use_cache: bool,
    /// Stop a mutation batch at the first failing group.
    pub abort_on_error: bool,
    /// Reaction to an invalid group shape in a batch.
    pub shape_violation: ShapeViolationPolicy,
    /// Allow deleting every member of a group.
    pub allow_delete_all: bool,
    /// Delete to the trash rather than permanently.
    pub use_trash: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hash_algorithm: HashAlgorithm::default(),
            block_size: DEFAULT_BLOCK_SIZE,
            whole_read_threshold: DEFAULT_WHOLE_READ_THRESHOLD,
            progress_interval_ms: 250,
            cache_dir: None,
            use_cache: true,
            abort_on_error: false,
            shape_violation: ShapeViolationPolicy::Skip,
            allow_delete_all: false,
            use_trash: true,
        }
    }
}

impl Config {
    /// Load all layers, with `explicit` between the platform file and the
    /// environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NotFound`] if `explicit` does not exist and
    /// [`ConfigError::Invalid`] if any layer is malformed.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Some(path) = Self::default_path() {
            if path.exists() {
                log::debug!("Loading config from {}", path.display());
                figment = figment.merge(Toml::file(path));
            }
        }

        if let Some(path) = explicit {
            if !path.exists() {
                return Err(ConfigError::NotFound(path.to_path_buf()));
            }
            log::debug!("Loading config from {}", path.display());
            figment = figment.merge(Toml::file(path));
        }

        Self::extract(figment.merge(Env::prefixed(ENV_PREFIX)))
    }

    /// Extract a config from an assembled figment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] on malformed input.
    pub fn extract(figment: Figment) -> Result<Self, ConfigError> {
        figment.extract().map_err(|e| ConfigError::Invalid(Box::new(e)))
    }

    /// Write the config as TOML to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Write`] or [`ConfigError::Serialize`].
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).map_err(write_err)?;
        log::info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Platform path of `config.toml`.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        project_dirs().map(|dirs| dirs.config_dir().join(CONFIG_FILE_NAME))
    }

    /// Cache directory: the configured one, else the platform cache directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoProjectDirs`] if neither is available.
    pub fn resolved_cache_dir(&self) -> Result<PathBuf, ConfigError> {
        match &self.cache_dir {
            Some(dir) => Ok(dir.clone()),
            None => project_dirs()
                .map(|dirs| dirs.cache_dir().to_path_buf())
                .ok_or(ConfigError::NoProjectDirs),
        }
    }

    /// Progress interval as a duration.
    #[must_use]
    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    /// Mutation policy derived from this config.
    #[must_use]
    pub fn mutation_policy(&self) -> MutationPolicy {
        MutationPolicy {
            allow_delete_all: self.allow_delete_all,
            abort_on_first_error: self.abort_on_error,
            shape_violation: self.shape_violation,
        }
    }
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("org", "dupehound", "dupehound")
}
