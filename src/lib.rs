//! dupehound - duplicate and near-duplicate file finder
//!
//! Walks a set of disjoint directory roots, groups files with identical
//! content (or images that look alike or were shot at the same place) and
//! replaces the redundant copies by deleting them or turning them into
//! links, with every change checked against the file system first.
//!
//! # Modules
//!
//! - [`scanner`]: traversal, identities, content and perceptual hashing
//! - [`cache`]: persistent hash and image caches
//! - [`duplicates`]: the CRC and image engines and the group store
//! - [`actions`]: delete and relink primitives and the mutation engine
//! - [`output`]: CSV export
//! - [`config`], [`logging`], [`signal`], [`progress`], [`error`], [`cli`]:
//!   the binary's plumbing

pub mod actions;
pub mod cache;
pub mod cli;
pub mod config;
pub mod duplicates;
pub mod error;
pub mod logging;
pub mod output;
pub mod progress;
pub mod scanner;
pub mod signal;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use bytesize::ByteSize;

use crate::actions::{MutationEngine, MutationRequest};
use crate::cache::{HashCache, ImageCache};
use crate::cli::{CacheCommand, Cli, Commands, ModeArg, ScanArgs, SelectionArgs, SimilarArgs};
use crate::config::Config;
use crate::duplicates::{
    CrcConfig, CrcEngine, DuplicateStore, ImageConfig, ImageEngine, NoopObserver, SimilarityMode,
};
use crate::error::ExitCode;
use crate::output::CsvOutput;
use crate::progress::{ProgressCounters, ProgressRenderer};
use crate::scanner::{ScanConfig, ScanError, ScanReport, Scanner};
use crate::signal::CancelToken;

/// Run the command described by `cli`. The logger must already be set up.
///
/// # Errors
///
/// Returns an error for invalid configuration or arguments, unusable roots
/// and engine failures. Per-file and per-group failures are not errors;
/// they turn the exit code into [`ExitCode::PartialSuccess`].
pub fn run_app(cli: Cli) -> Result<ExitCode> {
    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    log::debug!("Configuration: {:?}", config);

    match cli.command {
        Commands::Scan(args) => {
            let cancel = signal::install_handler().context("Failed to set up Ctrl+C handling")?;
            run_scan(&args, &config, cancel, cli.quiet)
        }
        Commands::Similar(args) => {
            let cancel = signal::install_handler().context("Failed to set up Ctrl+C handling")?;
            run_similar(&args, &config, cancel, cli.quiet)
        }
        Commands::Cache(args) => match args.command {
            CacheCommand::Clear { cache_dir } => run_cache_clear(cache_dir, &config, cli.quiet),
        },
    }
}

fn scanner_for(
    selection: &SelectionArgs,
    cancel: &CancelToken,
    progress: &Arc<ProgressCounters>,
) -> Result<Scanner> {
    let mut scan_config = ScanConfig::default()
        .with_include_hidden(selection.include_hidden)
        .with_min_size(selection.min_size)
        .with_max_size(selection.max_size);
    for rule in selection.exclusion_rules() {
        scan_config = scan_config.with_exclusion(rule);
    }
    let scanner = Scanner::new(selection.roots.clone(), scan_config)
        .context("Invalid scan request")?
        .with_cancel_token(cancel.clone())
        .with_progress(Arc::clone(progress));
    Ok(scanner)
}

/// Directory for persistent caches, or `None` when caching is off.
fn cache_dir_for(selection: &SelectionArgs, config: &Config) -> Result<Option<PathBuf>> {
    if selection.no_cache || !config.use_cache {
        return Ok(None);
    }
    match &selection.cache_dir {
        Some(dir) => Ok(Some(dir.clone())),
        None => Ok(Some(config.resolved_cache_dir()?)),
    }
}

fn log_scan_report(report: &ScanReport) -> usize {
    for path in &report.symlinks_skipped {
        log::debug!("Skipped symlink: {}", path.display());
    }
    for (path, links) in &report.already_linked {
        log::info!("Already linked ({} links): {}", links, path.display());
    }
    for issue in &report.issues {
        log::warn!("{}: {}", issue.path.display(), issue.message);
    }
    report.issues.len()
}

fn run_scan(args: &ScanArgs, config: &Config, cancel: CancelToken, quiet: bool) -> Result<ExitCode> {
    let selection = &args.selection;
    let progress = Arc::new(ProgressCounters::new());
    let renderer = ProgressRenderer::start(Arc::clone(&progress), config.progress_interval(), quiet);

    let scanner = scanner_for(selection, &cancel, &progress)?;
    let outcome = match scanner.scan() {
        Ok(outcome) => outcome,
        Err(ScanError::Cancelled) => {
            renderer.finish();
            log::warn!("Scan interrupted");
            return Ok(ExitCode::Interrupted);
        }
        Err(e) => return Err(e).context("Scan failed"),
    };
    let scan_failures = log_scan_report(&outcome.report);

    let algorithm = args.algorithm.map_or(config.hash_algorithm, Into::into);
    let mut cache = match cache_dir_for(selection, config)? {
        Some(dir) => HashCache::load(&dir, algorithm, outcome.device_ids()),
        None => HashCache::in_memory(algorithm),
    };

    let mut crc_config = CrcConfig::default()
        .with_algorithm(algorithm)
        .with_block_size(config.block_size)
        .with_whole_read_threshold(config.whole_read_threshold)
        .with_result_limit(args.result_limit)
        .with_progress_interval(config.progress_interval())
        .with_cancel_token(cancel.clone())
        .with_progress(Arc::clone(&progress));
    if let Some(workers) = args.max_workers {
        crc_config = crc_config.with_max_workers(workers);
    }

    let result = CrcEngine::new(crc_config).run(&outcome.roots, &outcome.buckets, &mut cache);
    renderer.finish();
    let crc = result.context("Duplicate search failed")?;

    if !quiet {
        println!(
            "Hashed {} file(s) ({}), {} from cache",
            crc.stats.files_hashed,
            ByteSize(crc.stats.bytes_hashed),
            crc.stats.cache_hits
        );
    }
    if let Some(error) = &crc.stats.cache_error {
        log::warn!("Hash cache not saved: {}", error);
    }

    finish_run(
        crc.store,
        selection,
        config,
        scan_failures + crc.stats.failures,
        crc.stats.interrupted,
        quiet,
    )
}

fn run_similar(
    args: &SimilarArgs,
    config: &Config,
    cancel: CancelToken,
    quiet: bool,
) -> Result<ExitCode> {
    let selection = &args.selection;
    let mode = match args.mode {
        ModeArg::Perceptual => SimilarityMode::Perceptual {
            hash_size: args.hash_size,
            all_rotations: args.all_rotations,
            divergence: args.divergence,
        },
        ModeArg::Gps => SimilarityMode::Gps {
            distance_km: args.distance_km,
        },
    };

    let progress = Arc::new(ProgressCounters::new());
    let renderer = ProgressRenderer::start(Arc::clone(&progress), config.progress_interval(), quiet);

    let scanner = scanner_for(selection, &cancel, &progress)?;
    let outcome = match scanner.scan_images() {
        Ok(outcome) => outcome,
        Err(ScanError::Cancelled) => {
            renderer.finish();
            log::warn!("Scan interrupted");
            return Ok(ExitCode::Interrupted);
        }
        Err(e) => return Err(e).context("Scan failed"),
    };
    let scan_failures = log_scan_report(&outcome.report);

    let mut cache = match cache_dir_for(selection, config)? {
        Some(dir) => ImageCache::load(&dir),
        None => ImageCache::in_memory(),
    };

    let mut image_config = ImageConfig::default()
        .with_mode(mode)
        .with_min_dimensions(args.min_dimensions)
        .with_max_dimensions(args.max_dimensions)
        .with_cancel_token(cancel.clone())
        .with_progress(Arc::clone(&progress));
    if let Some(threads) = args.threads {
        image_config = image_config.with_threads(threads);
    }

    let result = ImageEngine::new(image_config).run(&outcome.roots, &outcome.images, &mut cache);
    renderer.finish();
    let images = result.context("Similar image search failed")?;

    if !quiet {
        println!(
            "Examined {} image(s), {} skipped by size, {} unreadable",
            images.stats.processed, images.stats.filtered, images.stats.failures
        );
        if matches!(mode, SimilarityMode::Gps { .. }) {
            println!("{} image(s) without GPS position", images.stats.without_gps);
        }
    }
    if let Some(error) = &images.stats.cache_error {
        log::warn!("Image cache not saved: {}", error);
    }

    finish_run(
        images.store,
        selection,
        config,
        scan_failures + images.stats.failures,
        images.stats.interrupted,
        quiet,
    )
}

/// Print, export and act on a finished store.
fn finish_run(
    mut store: DuplicateStore,
    selection: &SelectionArgs,
    config: &Config,
    mut failures: usize,
    interrupted: bool,
    quiet: bool,
) -> Result<ExitCode> {
    if !quiet {
        print_store(&store);
    }

    if let Some(path) = &selection.csv {
        CsvOutput::new(&store)
            .write_file(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    let groups_found = store.len();
    if interrupted {
        log::warn!("Search interrupted; no action applied");
        return Ok(ExitCode::Interrupted);
    }

    if let Some(action) = selection.action {
        let use_trash = config.use_trash && !selection.permanent;
        let requests = keep_first_requests(&store, action.into(), use_trash);
        let engine = MutationEngine::new(config.mutation_policy());
        let batch = engine.apply_batch(&mut store, &requests, &mut NoopObserver);

        for result in &batch.results {
            match result {
                Ok(report) => {
                    for warning in &report.warnings {
                        log::warn!("{}", warning);
                    }
                    if let Some(error) = &report.error {
                        log::error!("Group {} partially processed: {}", report.group, error);
                    }
                }
                Err(e) => log::warn!("{}", e),
            }
        }
        if !quiet {
            println!(
                "{} group(s) processed, {} failed, {} not attempted",
                batch.committed(),
                batch.failed(),
                batch.not_attempted
            );
        }
        failures += batch.failed() + batch.not_attempted;
    }

    Ok(ExitCode::for_run(groups_found, failures, false))
}

/// One request per group: keep the first member by path, act on the rest.
fn keep_first_requests(
    store: &DuplicateStore,
    action: actions::ActionKind,
    use_trash: bool,
) -> Vec<MutationRequest> {
    store
        .groups()
        .filter_map(|group| {
            let (first, rest) = group.members.split_first()?;
            Some(MutationRequest {
                group: group.key.clone(),
                victims: rest.iter().map(|m| store.full_path(m)).collect(),
                survivors: vec![store.full_path(first)],
                action,
                use_trash,
            })
        })
        .collect()
}

fn print_store(store: &DuplicateStore) {
    let prefix = store.hash_prefix_len();
    for group in store.groups() {
        let label = match group.key.hash() {
            Some(hash) => hash.get(..prefix).unwrap_or(hash).to_string(),
            None => group.key.to_string(),
        };
        println!(
            "{} {} ({} files)",
            label,
            ByteSize(group.size()),
            group.len()
        );
        for member in &group.members {
            println!("  {}", store.full_path(member).display());
        }
    }
    println!(
        "{} group(s), {} redundant",
        store.len(),
        ByteSize(store.total_duplicate_space())
    );
}

fn run_cache_clear(cache_dir: Option<PathBuf>, config: &Config, quiet: bool) -> Result<ExitCode> {
    let dir = match cache_dir {
        Some(dir) => dir,
        None => config.resolved_cache_dir()?,
    };
    let removed = clear_cache_dir(&dir)?;
    if !quiet {
        println!("Removed {} cache file(s) from {}", removed, dir.display());
    }
    Ok(ExitCode::Success)
}

fn clear_cache_dir(dir: &Path) -> Result<usize> {
    cache::clear_all(dir).with_context(|| format!("Failed to clear cache in {}", dir.display()))
}
