//! Live progress counters and their terminal rendering.
//!
//! The detection engines never call back into the presentation layer while
//! they work. Instead they bump the lock-free counters in
//! [`ProgressCounters`], which the caller polls at its own pace. The
//! [`ProgressRenderer`] is the binary's poller: an indicatif spinner refreshed
//! from a background thread.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};

/// Pipeline stage currently reporting into the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    /// Nothing running yet.
    Idle = 0,
    /// Directory traversal.
    Scanning = 1,
    /// Content hashing.
    Hashing = 2,
    /// Perceptual hashing or GPS extraction.
    Imaging = 3,
    /// Density clustering (not interruptible).
    Clustering = 4,
    /// Run finished.
    Done = 5,
}

impl Phase {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::Scanning,
            2 => Self::Hashing,
            3 => Self::Imaging,
            4 => Self::Clustering,
            5 => Self::Done,
            _ => Self::Idle,
        }
    }

    /// Short label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Idle => "Starting",
            Self::Scanning => "Scanning",
            Self::Hashing => "Hashing",
            Self::Imaging => "Reading images",
            Self::Clustering => "Clustering",
            Self::Done => "Done",
        }
    }
}

/// Counters shared between an engine and whoever displays its progress.
///
/// All numeric fields are atomics; the two strings sit behind mutexes and
/// are only written on a throttle by the engines.
#[derive(Debug)]
pub struct ProgressCounters {
    phase: AtomicU8,
    files_seen: AtomicU64,
    bytes_seen: AtomicU64,
    items_done: AtomicU64,
    items_total: AtomicU64,
    groups_found: AtomicU64,
    duplicate_space: AtomicU64,
    current_path: Mutex<String>,
    info: Mutex<String>,
}

impl Default for ProgressCounters {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressCounters {
    /// Fresh counters, all zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Idle as u8),
            files_seen: AtomicU64::new(0),
            bytes_seen: AtomicU64::new(0),
            items_done: AtomicU64::new(0),
            items_total: AtomicU64::new(0),
            groups_found: AtomicU64::new(0),
            duplicate_space: AtomicU64::new(0),
            current_path: Mutex::new(String::new()),
            info: Mutex::new(String::new()),
        }
    }

    /// Switch phase and reset the per-phase item counters.
    pub fn begin_phase(&self, phase: Phase, total_items: u64) {
        self.phase.store(phase as u8, Ordering::SeqCst);
        self.items_done.store(0, Ordering::Relaxed);
        self.items_total.store(total_items, Ordering::Relaxed);
    }

    /// Record a file discovered by the scanner.
    pub fn add_file(&self, size: u64) {
        self.files_seen.fetch_add(1, Ordering::Relaxed);
        self.bytes_seen.fetch_add(size, Ordering::Relaxed);
    }

    /// Record one processed work item.
    pub fn item_done(&self) {
        self.items_done.fetch_add(1, Ordering::Relaxed);
    }

    /// Publish the approximate group figures from a live merge.
    pub fn set_found(&self, groups: u64, duplicate_space: u64) {
        self.groups_found.store(groups, Ordering::Relaxed);
        self.duplicate_space.store(duplicate_space, Ordering::Relaxed);
    }

    /// Set the path currently being walked.
    pub fn set_current_path(&self, path: &str) {
        let mut guard = self.current_path.lock().unwrap_or_else(|e| e.into_inner());
        guard.clear();
        guard.push_str(path);
    }

    /// Set the per-file-being-processed label.
    pub fn set_info(&self, info: &str) {
        let mut guard = self.info.lock().unwrap_or_else(|e| e.into_inner());
        guard.clear();
        guard.push_str(info);
    }

    /// Copy the current values out for display.
    #[must_use]
    pub fn snapshot(&self) -> ProgressSnapshot {
        ProgressSnapshot {
            phase: Phase::from_u8(self.phase.load(Ordering::SeqCst)),
            files_seen: self.files_seen.load(Ordering::Relaxed),
            bytes_seen: self.bytes_seen.load(Ordering::Relaxed),
            items_done: self.items_done.load(Ordering::Relaxed),
            items_total: self.items_total.load(Ordering::Relaxed),
            groups_found: self.groups_found.load(Ordering::Relaxed),
            duplicate_space: self.duplicate_space.load(Ordering::Relaxed),
            current_path: self
                .current_path
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .clone(),
            info: self.info.lock().unwrap_or_else(|e| e.into_inner()).clone(),
        }
    }
}

/// Point-in-time copy of [`ProgressCounters`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressSnapshot {
    /// Current phase.
    pub phase: Phase,
    /// Files discovered by the scanner.
    pub files_seen: u64,
    /// Bytes discovered by the scanner.
    pub bytes_seen: u64,
    /// Items processed in the current phase.
    pub items_done: u64,
    /// Items scheduled for the current phase.
    pub items_total: u64,
    /// Groups found so far (approximate while hashing).
    pub groups_found: u64,
    /// Space held by redundant copies found so far.
    pub duplicate_space: u64,
    /// Path being walked.
    pub current_path: String,
    /// File being processed.
    pub info: String,
}

impl ProgressSnapshot {
    /// One-line status text.
    #[must_use]
    pub fn message(&self) -> String {
        match self.phase {
            Phase::Scanning => format!(
                "{}: {} files, {} | {}",
                self.phase.label(),
                self.files_seen,
                bytesize::ByteSize(self.bytes_seen),
                truncate_path(&self.current_path, 40)
            ),
            Phase::Hashing | Phase::Imaging => format!(
                "{}: {}/{} | {} groups, {} redundant | {}",
                self.phase.label(),
                self.items_done,
                self.items_total,
                self.groups_found,
                bytesize::ByteSize(self.duplicate_space),
                truncate_path(&self.info, 40)
            ),
            Phase::Idle | Phase::Clustering | Phase::Done => self.phase.label().to_string(),
        }
    }
}

/// Spinner that polls [`ProgressCounters`] from a background thread.
pub struct ProgressRenderer {
    bar: ProgressBar,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressRenderer {
    /// Start polling `counters` every `interval`.
    ///
    /// With `quiet` set the bar is hidden but the thread still runs, so the
    /// caller does not need two code paths.
    #[must_use]
    pub fn start(counters: Arc<ProgressCounters>, interval: Duration, quiet: bool) -> Self {
        let bar = if quiet {
            ProgressBar::hidden()
        } else {
            ProgressBar::new_spinner()
        };
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
        );
        bar.enable_steady_tick(Duration::from_millis(100));

        let stop = Arc::new(AtomicBool::new(false));
        let thread_bar = bar.clone();
        let thread_stop = Arc::clone(&stop);
        let handle = std::thread::spawn(move || {
            while !thread_stop.load(Ordering::SeqCst) {
                thread_bar.set_message(counters.snapshot().message());
                std::thread::sleep(interval);
            }
        });

        Self {
            bar,
            stop,
            handle: Some(handle),
        }
    }

    /// Stop polling and clear the spinner.
    pub fn finish(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        self.bar.finish_and_clear();
    }
}

impl Drop for ProgressRenderer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Truncate a path for display, keeping the file name.
fn truncate_path(path: &str, max_len: usize) -> String {
    if path.chars().count() <= max_len {
        return path.to_string();
    }

    let file_name = std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let name_len = file_name.chars().count();
    if name_len + 4 > max_len {
        let tail: String = file_name.chars().skip(name_len + 3 - max_len).collect();
        return format!("...{tail}");
    }

    format!(".../{file_name}")
}
