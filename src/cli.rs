//! Command-line interface definitions.
//!
//! # Example
//!
//! ```bash
//! # Exact duplicates across two disjoint roots, exported to CSV
//! dupehound scan ~/Photos /mnt/backup/Photos --csv dupes.csv
//!
//! # Replace every redundant copy with a hard link
//! dupehound scan ~/Music --action hard-link --yes
//!
//! # Similar images, tolerant to rotation
//! dupehound similar ~/Pictures --all-rotations --divergence 8
//!
//! # Images shot within 50 metres of each other
//! dupehound similar ~/Pictures --mode gps --distance-km 0.05
//!
//! # Forget every cached hash and fingerprint
//! dupehound cache clear
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::actions::ActionKind;
use crate::duplicates::similar::{DEFAULT_DIVERGENCE, DEFAULT_GPS_DISTANCE_KM};
use crate::scanner::perceptual::DEFAULT_HASH_SIZE;
use crate::scanner::{ExclusionRule, HashAlgorithm};

/// Find duplicate and similar files, then delete or relink the extras.
#[derive(Debug, Parser)]
#[command(name = "dupehound")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity level (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Print errors as JSON documents on stderr
    #[arg(long, global = true)]
    pub json_errors: bool,

    /// Configuration file layered over the platform config.toml
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Find files with identical content
    Scan(ScanArgs),
    /// Find similar images by appearance or GPS position
    Similar(SimilarArgs),
    /// Manage the persistent caches
    Cache(CacheArgs),
}

/// Options shared by `scan` and `similar`.
#[derive(Debug, Args)]
pub struct SelectionArgs {
    /// Directories to scan; they must not overlap
    #[arg(value_name = "PATH", required = true, num_args = 1..)]
    pub roots: Vec<PathBuf>,

    /// Glob matched against full paths (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "GLOB")]
    pub exclude: Vec<String>,

    /// Regular expression searched in full paths (repeatable)
    #[arg(long = "exclude-regex", value_name = "REGEX")]
    pub exclude_regex: Vec<String>,

    /// Include hidden files and directories
    #[arg(long)]
    pub include_hidden: bool,

    /// Minimum file size (e.g. 1KB, 1MiB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub min_size: Option<u64>,

    /// Maximum file size (e.g. 1GB)
    #[arg(long, value_name = "SIZE", value_parser = parse_size)]
    pub max_size: Option<u64>,

    /// Write the groups to a CSV file
    #[arg(long, value_name = "FILE")]
    pub csv: Option<PathBuf>,

    /// Do not read or write the persistent caches
    #[arg(long)]
    pub no_cache: bool,

    /// Cache directory (overrides the configuration)
    #[arg(long, value_name = "DIR", conflicts_with = "no_cache")]
    pub cache_dir: Option<PathBuf>,

    /// Apply an action to every group, keeping the first member by path
    #[arg(long, value_enum, value_name = "ACTION", requires = "yes")]
    pub action: Option<ActionArg>,

    /// Confirm the action without prompting
    #[arg(short = 'y', long)]
    pub yes: bool,

    /// Delete permanently instead of moving to the trash
    #[arg(long)]
    pub permanent: bool,
}

impl SelectionArgs {
    /// Exclusion rules in command-line order, globs first.
    #[must_use]
    pub fn exclusion_rules(&self) -> Vec<ExclusionRule> {
        self.exclude
            .iter()
            .cloned()
            .map(ExclusionRule::Glob)
            .chain(self.exclude_regex.iter().cloned().map(ExclusionRule::Regex))
            .collect()
    }
}

/// Arguments for the scan subcommand.
#[derive(Debug, Args)]
pub struct ScanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Content digest (overrides the configuration)
    #[arg(long, value_enum, value_name = "ALG")]
    pub algorithm: Option<AlgorithmArg>,

    /// Stop hashing new folders once this many groups are found
    #[arg(long, value_name = "N")]
    pub result_limit: Option<usize>,

    /// Maximum number of device workers
    #[arg(long, value_name = "N")]
    pub max_workers: Option<usize>,
}

/// Arguments for the similar subcommand.
#[derive(Debug, Args)]
pub struct SimilarArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Similarity criterion
    #[arg(long, value_enum, default_value = "perceptual")]
    pub mode: ModeArg,

    /// Perceptual hash edge length
    #[arg(long, value_name = "N", default_value_t = DEFAULT_HASH_SIZE)]
    pub hash_size: u32,

    /// Also match images rotated by 90, 180 or 270 degrees
    #[arg(long)]
    pub all_rotations: bool,

    /// Allowed fingerprint difference in percent
    #[arg(long, value_name = "PERCENT", default_value_t = DEFAULT_DIVERGENCE)]
    pub divergence: f64,

    /// Maximum distance between positions in GPS mode
    #[arg(long, value_name = "KM", default_value_t = DEFAULT_GPS_DISTANCE_KM)]
    pub distance_km: f64,

    /// Skip images smaller than WIDTHxHEIGHT
    #[arg(long, value_name = "WxH", value_parser = parse_dimensions)]
    pub min_dimensions: Option<(u32, u32)>,

    /// Skip images larger than WIDTHxHEIGHT
    #[arg(long, value_name = "WxH", value_parser = parse_dimensions)]
    pub max_dimensions: Option<(u32, u32)>,

    /// Worker threads (default: available cores)
    #[arg(long, value_name = "N")]
    pub threads: Option<usize>,
}

/// Arguments for the cache subcommand.
#[derive(Debug, Args)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheCommand,
}

/// Cache maintenance commands.
#[derive(Debug, Subcommand)]
pub enum CacheCommand {
    /// Delete every cache file
    Clear {
        /// Cache directory (overrides the configuration)
        #[arg(long, value_name = "DIR")]
        cache_dir: Option<PathBuf>,
    },
}

/// Action applied with `--action`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ActionArg {
    /// Delete the extra copies
    Delete,
    /// Replace extra copies with symbolic links
    SoftLink,
    /// Replace extra copies with hard links
    HardLink,
    /// Replace extra copies with .url shortcuts
    Shortcut,
}

impl From<ActionArg> for ActionKind {
    fn from(arg: ActionArg) -> Self {
        match arg {
            ActionArg::Delete => Self::Delete,
            ActionArg::SoftLink => Self::SoftLink,
            ActionArg::HardLink => Self::HardLink,
            ActionArg::Shortcut => Self::Shortcut,
        }
    }
}

/// Digest selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AlgorithmArg {
    /// SHA-1
    Sha1,
    /// SHA-256
    Sha256,
    /// BLAKE3
    Blake3,
}

impl From<AlgorithmArg> for HashAlgorithm {
    fn from(arg: AlgorithmArg) -> Self {
        match arg {
            AlgorithmArg::Sha1 => Self::Sha1,
            AlgorithmArg::Sha256 => Self::Sha256,
            AlgorithmArg::Blake3 => Self::Blake3,
        }
    }
}

/// Similarity criterion selectable on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    /// Perceptual fingerprints
    Perceptual,
    /// EXIF GPS positions
    Gps,
}

/// Parse a human-readable size such as `1024`, `1KB` or `1.5 MiB`.
///
/// Decimal suffixes (`KB`, `MB`) are powers of 1000, binary suffixes
/// (`KiB`, `MiB`) powers of 1024.
///
/// ```
/// use dupehound::cli::parse_size;
///
/// assert_eq!(parse_size("1KB").unwrap(), 1000);
/// assert_eq!(parse_size("1KiB").unwrap(), 1024);
/// ```
///
/// # Errors
///
/// Returns the parser's message for malformed input.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err("Size cannot be empty".to_string());
    }
    trimmed
        .parse::<bytesize::ByteSize>()
        .map(|size| size.as_u64())
        .map_err(|e| format!("Invalid size '{trimmed}': {e}"))
}

/// Parse `WIDTHxHEIGHT`.
///
/// # Errors
///
/// Returns a message if either side is missing or not a number.
pub fn parse_dimensions(s: &str) -> Result<(u32, u32), String> {
    let (w, h) = s
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("Expected WIDTHxHEIGHT, got '{s}'"))?;
    let parse = |v: &str| {
        v.trim()
            .parse::<u32>()
            .map_err(|_| format!("Invalid dimension '{v}' in '{s}'"))
    };
    Ok((parse(w)?, parse(h)?))
}
