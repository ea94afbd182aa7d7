//! Exit codes and machine-readable error reports for the binary.

use serde::Serialize;

/// Process exit codes.
///
/// - 0: duplicates found and every requested action succeeded
/// - 1: unexpected failure or invalid input
/// - 2: completed, nothing found
/// - 3: completed with per-file or per-group failures
/// - 130: interrupted (Ctrl+C)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ExitCode {
    /// Completed with results.
    Success = 0,
    /// Unexpected failure.
    GeneralError = 1,
    /// Completed, no groups found.
    NoDuplicates = 2,
    /// Completed with some failures.
    PartialSuccess = 3,
    /// Interrupted by the user.
    Interrupted = 130,
}

impl ExitCode {
    /// Numeric exit code.
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    /// Machine-readable code.
    #[must_use]
    pub fn code_prefix(self) -> &'static str {
        match self {
            Self::Success => "DH000",
            Self::GeneralError => "DH001",
            Self::NoDuplicates => "DH002",
            Self::PartialSuccess => "DH003",
            Self::Interrupted => "DH130",
        }
    }

    /// Exit code of a run that found `groups` groups, saw `failures`
    /// failures and may have been `interrupted`.
    #[must_use]
    pub fn for_run(groups: usize, failures: usize, interrupted: bool) -> Self {
        if interrupted {
            Self::Interrupted
        } else if failures > 0 {
            Self::PartialSuccess
        } else if groups == 0 {
            Self::NoDuplicates
        } else {
            Self::Success
        }
    }
}

/// Error document printed with `--json-errors`.
#[derive(Debug, Serialize)]
pub struct StructuredError {
    /// Code such as `DH001`.
    pub code: String,
    /// Numeric exit code.
    pub exit_code: i32,
    /// Error message with its cause chain.
    pub message: String,
    /// Whether the run was interrupted.
    pub interrupted: bool,
}

impl StructuredError {
    /// Build a report for `err`.
    #[must_use]
    pub fn new(err: &anyhow::Error, exit_code: ExitCode) -> Self {
        Self {
            code: exit_code.code_prefix().to_string(),
            exit_code: exit_code.as_i32(),
            message: format!("{err:#}"),
            interrupted: exit_code == ExitCode::Interrupted,
        }
    }
}
