//! Cooperative cancellation and Ctrl+C handling.
//!
//! Every long-running component (scanner, CRC engine, image engine, hasher)
//! receives a [`CancelToken`] explicitly. The token wraps a shared
//! `AtomicBool`; cloning it hands out another handle to the same flag.
//!
//! # Usage
//!
//! ```rust,no_run
//! use dupehound::signal::install_handler;
//!
//! let token = install_handler().expect("Failed to install signal handler");
//!
//! // Pass clones of the token to workers
//! let worker_token = token.clone();
//! if worker_token.is_cancelled() {
//!     return;
//! }
//! ```
//!
//! # Exit Codes
//!
//! When Ctrl+C is received the token is cancelled, a short notice is written
//! to stderr and the binary exits with code 130 (128 + SIGINT) once the
//! running phase has wound down.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

/// Exit code for SIGINT (Ctrl+C) interruption.
pub const EXIT_CODE_INTERRUPTED: i32 = 130;

/// Shared cooperative cancellation flag.
///
/// `CancelToken` is `Send + Sync`. Polling is a single atomic load, cheap
/// enough to check per directory entry or per hashed block.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. Every clone observes it.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag so the token can be reused for another run.
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Error type for signal handler installation.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    /// Failed to install the Ctrl+C handler.
    #[error("Failed to install signal handler: {0}")]
    InstallFailed(#[from] ctrlc::Error),
}

static GLOBAL_TOKEN: OnceLock<CancelToken> = OnceLock::new();

/// Install a Ctrl+C handler that cancels the returned token.
///
/// Calling this more than once in a process returns the already-installed
/// token after resetting it, so repeated `run_app` calls (tests) work.
///
/// # Errors
///
/// Never fails in practice: if the hook cannot be registered because another
/// handler owns it, an unhooked token is returned that still supports
/// manual cancellation.
pub fn install_handler() -> Result<CancelToken, SignalError> {
    if let Some(token) = GLOBAL_TOKEN.get() {
        token.reset();
        return Ok(token.clone());
    }

    let token = CancelToken::new();
    let hooked = token.clone();

    match ctrlc::set_handler(move || {
        hooked.cancel();
        let _ = writeln!(std::io::stderr(), "\nInterrupted. Finishing current work...");
        let _ = std::io::stderr().flush();
        log::info!("Cancellation requested by signal");
    }) {
        Ok(()) => {
            let _ = GLOBAL_TOKEN.set(token.clone());
            Ok(token)
        }
        Err(_) => {
            if let Some(existing) = GLOBAL_TOKEN.get() {
                existing.reset();
                Ok(existing.clone())
            } else {
                log::debug!("Ctrl+C handler already registered, using unhooked token");
                let fallback = CancelToken::new();
                let _ = GLOBAL_TOKEN.set(fallback.clone());
                Ok(fallback)
            }
        }
    }
}
