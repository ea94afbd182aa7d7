//! Group mutation engine.
//!
//! # Overview
//!
//! A [`MutationRequest`] names one group, the members to act on (victims)
//! and the members to keep (survivors). [`MutationEngine::execute`] moves it
//! through these states:
//!
//! ```text
//! Requested -> Validated -> Confirmed -> Executed -> Committed
//!                                                 \-> PartiallyFailed
//! ```
//!
//! - **Validated**: every named path is still a member of the group in the
//!   store, otherwise [`MutationError::StaleSelection`].
//! - **Confirmed**: the request has a legal shape for its action
//!   ([`MutationError::InvalidGroupShape`],
//!   [`MutationError::CrossDeviceHardlink`]).
//! - **Gate**: every participant is stat'ed and compared with its scan
//!   record (size, change time, device, inode, link count). Any mismatch
//!   is [`MutationError::FilesystemDrift`] and nothing is touched.
//! - **Executed**: victims are processed in request order. Each victim is
//!   stat'ed again right before it is touched; drift or an I/O failure stops
//!   the group there.
//! - **Committed**: processed victims are removed from the store; a group
//!   left with fewer than two members disappears.
//!
//! Errors before execution leave both the file system and the store
//! untouched. Once execution has started the result is a
//! [`MutationReport`], whose [`MutationReport::error`] is set when the group
//! ended partially processed.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::delete::delete_file;
use super::link::{replace_with_link, LinkError, LinkKind};
use crate::duplicates::{DuplicateStore, GroupKey, StoreObserver};
use crate::scanner::{FileIdentity, FileStat, ScanEntry};

/// What to do with the victims.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    /// Delete (trash or permanent).
    Delete,
    /// Replace with a symbolic link to the first survivor.
    SoftLink,
    /// Replace with a hard link to the first survivor.
    HardLink,
    /// Replace with an Internet Shortcut to the first survivor.
    Shortcut,
}

impl ActionKind {
    fn link_kind(self) -> Option<LinkKind> {
        match self {
            Self::Delete => None,
            Self::SoftLink => Some(LinkKind::Soft),
            Self::HardLink => Some(LinkKind::Hard),
            Self::Shortcut => Some(LinkKind::Shortcut),
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Delete => "delete",
            Self::SoftLink => "soft-link",
            Self::HardLink => "hard-link",
            Self::Shortcut => "shortcut",
        })
    }
}

/// One group mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRequest {
    /// Group to act on.
    pub group: GroupKey,
    /// Members to delete or replace, processed in this order.
    pub victims: Vec<PathBuf>,
    /// Members to keep; the first one is the link target.
    pub survivors: Vec<PathBuf>,
    /// Action kind.
    pub action: ActionKind,
    /// Delete to the trash instead of permanently.
    pub use_trash: bool,
}

/// How a batch reacts to a shape violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShapeViolationPolicy {
    /// Skip the group and continue with the next one.
    #[default]
    Skip,
    /// Stop the batch so the caller can ask the user.
    Stop,
}

/// Caller policy for mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MutationPolicy {
    /// Allow a delete that removes every member of a group.
    pub allow_delete_all: bool,
    /// Stop a batch at the first group that fails.
    pub abort_on_first_error: bool,
    /// Reaction to invalid group shapes in a batch.
    pub shape_violation: ShapeViolationPolicy,
}

/// Stage a mutation reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationState {
    /// Received, not checked yet.
    Requested,
    /// Selection matches the store.
    Validated,
    /// Shape accepted.
    Confirmed,
    /// Victims processed.
    Executed,
    /// All victims processed and removed from the store.
    Committed,
    /// Some victims could not be processed; those that were are committed.
    PartiallyFailed,
}

/// Errors raised by the mutation engine.
///
/// Each one affects a single group only.
#[derive(Debug, Error)]
pub enum MutationError {
    /// The group or some named members are no longer in the store.
    #[error("stale selection for group {group}: {} path(s) not in the group", .missing.len())]
    StaleSelection {
        /// Group of the request.
        group: GroupKey,
        /// Paths that are not members (empty if the group itself is gone).
        missing: Vec<PathBuf>,
    },

    /// Not enough survivors or victims, or overlapping lists.
    #[error("invalid request for group {group}: {reason}")]
    InvalidGroupShape {
        /// Group of the request.
        group: GroupKey,
        /// What is wrong.
        reason: String,
    },

    /// Hard-link participants live on different devices.
    #[error("cannot hard-link across devices: {path} is on device {device}, target on {target_device}")]
    CrossDeviceHardlink {
        /// Offending participant.
        path: PathBuf,
        /// Its device.
        device: u64,
        /// Device of the link target.
        target_device: u64,
    },

    /// A file changed since it was scanned.
    #[error("{path} changed since it was scanned: {reason}")]
    FilesystemDrift {
        /// Changed file.
        path: PathBuf,
        /// What differs.
        reason: String,
    },

    /// A rename, link or delete call failed.
    #[error("{operation} failed for {path}: {message}")]
    IoFailure {
        /// File involved.
        path: PathBuf,
        /// Failed operation.
        operation: &'static str,
        /// Error text, including the OS error.
        message: String,
    },
}

impl MutationError {
    /// Whether this is a shape problem governed by
    /// [`MutationPolicy::shape_violation`].
    #[must_use]
    pub fn is_shape_violation(&self) -> bool {
        matches!(
            self,
            Self::InvalidGroupShape { .. } | Self::CrossDeviceHardlink { .. }
        )
    }
}

/// Outcome of a mutation that reached execution.
#[derive(Debug)]
pub struct MutationReport {
    /// Group of the request.
    pub group: GroupKey,
    /// [`MutationState::Committed`] or [`MutationState::PartiallyFailed`].
    pub state: MutationState,
    /// Victims that were processed and removed from the store.
    pub processed: Vec<PathBuf>,
    /// Links or shortcuts created.
    pub created: Vec<PathBuf>,
    /// Bytes of deleted victims.
    pub bytes_freed: u64,
    /// Whether the group was removed from the store.
    pub group_removed: bool,
    /// Non-fatal problems such as leftover temporary files.
    pub warnings: Vec<String>,
    /// What stopped the group, for a partial failure.
    pub error: Option<MutationError>,
}

impl MutationReport {
    /// Whether every victim was processed.
    #[must_use]
    pub fn is_committed(&self) -> bool {
        self.state == MutationState::Committed
    }
}

/// Results of [`MutationEngine::apply_batch`].
#[derive(Debug, Default)]
pub struct BatchReport {
    /// One result per attempted request, in order.
    pub results: Vec<Result<MutationReport, MutationError>>,
    /// Requests not attempted because the batch stopped.
    pub not_attempted: usize,
}

impl BatchReport {
    /// Number of fully committed groups.
    #[must_use]
    pub fn committed(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r, Ok(report) if report.is_committed()))
            .count()
    }

    /// Number of groups that failed in any way.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.committed()
    }

    /// Whether the batch stopped before the last request.
    #[must_use]
    pub fn stopped_early(&self) -> bool {
        self.not_attempted > 0
    }
}

/// A participant resolved against the store.
struct Participant {
    path: PathBuf,
    entry: ScanEntry,
}

/// Executes group mutations against a [`DuplicateStore`].
#[derive(Debug, Clone, Default)]
pub struct MutationEngine {
    policy: MutationPolicy,
}

impl MutationEngine {
    /// Create an engine with `policy`.
    #[must_use]
    pub fn new(policy: MutationPolicy) -> Self {
        Self { policy }
    }

    /// Policy in use.
    #[must_use]
    pub fn policy(&self) -> &MutationPolicy {
        &self.policy
    }

    /// Run one request.
    ///
    /// # Errors
    ///
    /// Returns an error, with nothing changed, if the request fails
    /// validation, confirmation or the drift gate. Failures during execution
    /// are reported through [`MutationReport::error`].
    pub fn execute(
        &self,
        store: &mut DuplicateStore,
        request: &MutationRequest,
        observer: &mut dyn StoreObserver,
    ) -> Result<MutationReport, MutationError> {
        log::debug!(
            "Mutation {} on group {}: {:?}",
            request.action,
            request.group,
            MutationState::Requested
        );

        let (victims, survivors) = self.validate(store, request)?;
        log::debug!("Group {}: {:?}", request.group, MutationState::Validated);

        self.confirm(request, &victims, &survivors)?;
        log::debug!("Group {}: {:?}", request.group, MutationState::Confirmed);

        for participant in survivors.iter().chain(&victims) {
            check_drift(participant)?;
        }

        let target = survivors.first().map(|s| s.path.clone());
        let mut report = MutationReport {
            group: request.group.clone(),
            state: MutationState::Executed,
            processed: Vec::new(),
            created: Vec::new(),
            bytes_freed: 0,
            group_removed: false,
            warnings: Vec::new(),
            error: None,
        };
        let mut done: Vec<FileIdentity> = Vec::new();

        for victim in &victims {
            // The gate already checked the first victim.
            if !done.is_empty() {
                if let Err(e) = check_drift(victim) {
                    report.error = Some(e);
                    break;
                }
            }

            let result = match (request.action.link_kind(), target.as_deref()) {
                (None, _) => delete_file(&victim.path, request.use_trash)
                    .map(|deleted| {
                        report.bytes_freed += deleted.size;
                    })
                    .map_err(|e| MutationError::IoFailure {
                        path: victim.path.clone(),
                        operation: "delete",
                        message: e.to_string(),
                    }),
                (Some(kind), Some(target)) => replace_with_link(&victim.path, target, kind)
                    .map(|outcome| {
                        report.created.push(outcome.created);
                        report.warnings.extend(outcome.warning);
                    })
                    .map_err(|e| link_failure(&victim.path, e)),
                (Some(_), None) => Err(MutationError::InvalidGroupShape {
                    group: request.group.clone(),
                    reason: "no link target".to_string(),
                }),
            };

            match result {
                Ok(()) => {
                    done.push(victim.entry.identity());
                    report.processed.push(victim.path.clone());
                }
                Err(e) => {
                    log::error!("{}", e);
                    report.error = Some(e);
                    break;
                }
            }
        }

        let removal = store.remove_members(&request.group, &done, observer);
        report.group_removed = removal.group_removed;
        report.state = if report.error.is_none() {
            MutationState::Committed
        } else {
            MutationState::PartiallyFailed
        };
        log::info!(
            "Group {}: {} of {} victim(s) processed ({:?})",
            request.group,
            report.processed.len(),
            victims.len(),
            report.state
        );
        Ok(report)
    }

    /// Run requests in order, applying the batch policy.
    pub fn apply_batch(
        &self,
        store: &mut DuplicateStore,
        requests: &[MutationRequest],
        observer: &mut dyn StoreObserver,
    ) -> BatchReport {
        let mut batch = BatchReport::default();
        for (index, request) in requests.iter().enumerate() {
            let result = self.execute(store, request, observer);
            let stop = match &result {
                Ok(report) => report.error.is_some() && self.policy.abort_on_first_error,
                Err(e) if e.is_shape_violation() => {
                    log::warn!("Skipping group {}: {}", request.group, e);
                    self.policy.shape_violation == ShapeViolationPolicy::Stop
                        || self.policy.abort_on_first_error
                }
                Err(e) => {
                    log::warn!("Group {} not processed: {}", request.group, e);
                    self.policy.abort_on_first_error
                }
            };
            batch.results.push(result);
            if stop {
                batch.not_attempted = requests.len() - index - 1;
                log::info!(
                    "Batch stopped after {} of {} group(s)",
                    index + 1,
                    requests.len()
                );
                break;
            }
        }
        batch
    }

    /// Remove members of `key` whose file no longer matches its scan record.
    ///
    /// Lets a caller shrink a group after [`MutationError::FilesystemDrift`]
    /// and retry. Returns the paths removed.
    pub fn drop_drifted_members(
        &self,
        store: &mut DuplicateStore,
        key: &GroupKey,
        observer: &mut dyn StoreObserver,
    ) -> Vec<PathBuf> {
        let Some(group) = store.group(key) else {
            return Vec::new();
        };
        let drifted: Vec<(PathBuf, FileIdentity)> = group
            .members
            .iter()
            .map(|entry| Participant {
                path: store.full_path(entry),
                entry: entry.clone(),
            })
            .filter(|p| check_drift(p).is_err())
            .map(|p| (p.path, p.entry.identity()))
            .collect();
        let identities: Vec<FileIdentity> = drifted.iter().map(|(_, id)| *id).collect();
        store.remove_members(key, &identities, observer);
        drifted.into_iter().map(|(path, _)| path).collect()
    }

    /// Resolve every named path to its store entry.
    fn validate(
        &self,
        store: &DuplicateStore,
        request: &MutationRequest,
    ) -> Result<(Vec<Participant>, Vec<Participant>), MutationError> {
        if store.group(&request.group).is_none() {
            return Err(MutationError::StaleSelection {
                group: request.group.clone(),
                missing: Vec::new(),
            });
        }

        let mut missing = Vec::new();
        let mut resolve = |paths: &[PathBuf]| -> Vec<Participant> {
            paths
                .iter()
                .filter_map(|path| match store.find_member(&request.group, path) {
                    Some(entry) => Some(Participant {
                        path: path.clone(),
                        entry: entry.clone(),
                    }),
                    None => {
                        missing.push(path.clone());
                        None
                    }
                })
                .collect()
        };
        let victims = resolve(&request.victims);
        let survivors = resolve(&request.survivors);

        if missing.is_empty() {
            Ok((victims, survivors))
        } else {
            Err(MutationError::StaleSelection {
                group: request.group.clone(),
                missing,
            })
        }
    }

    /// Check the request's shape for its action.
    fn confirm(
        &self,
        request: &MutationRequest,
        victims: &[Participant],
        survivors: &[Participant],
    ) -> Result<(), MutationError> {
        let shape = |reason: &str| MutationError::InvalidGroupShape {
            group: request.group.clone(),
            reason: reason.to_string(),
        };

        if victims.is_empty() {
            return Err(shape("no victims selected"));
        }
        let mut seen = HashSet::new();
        for participant in victims.iter().chain(survivors) {
            if !seen.insert(participant.entry.identity()) {
                return Err(shape("a member is listed more than once"));
            }
        }

        match request.action {
            ActionKind::Delete => {
                if survivors.is_empty() && !self.policy.allow_delete_all {
                    return Err(shape("deleting every copy requires allow_delete_all"));
                }
            }
            ActionKind::SoftLink | ActionKind::Shortcut => {
                if survivors.is_empty() {
                    return Err(shape("a survivor is required as link target"));
                }
            }
            ActionKind::HardLink => {
                if survivors.is_empty() {
                    return Err(shape("a survivor is required as link target"));
                }
                if victims.len() < 2 {
                    return Err(shape("hard-linking needs at least two victims"));
                }
                let target_device = survivors[0].entry.device_id;
                if let Some(other) = victims
                    .iter()
                    .chain(survivors)
                    .find(|p| p.entry.device_id != target_device)
                {
                    return Err(MutationError::CrossDeviceHardlink {
                        path: other.path.clone(),
                        device: other.entry.device_id,
                        target_device,
                    });
                }
            }
        }
        Ok(())
    }
}

fn link_failure(path: &Path, error: LinkError) -> MutationError {
    let operation = match error {
        LinkError::TempExists(_) | LinkError::Rename { .. } => "rename",
        LinkError::Create { .. } | LinkError::Unsupported(_) => "link",
    };
    MutationError::IoFailure {
        path: path.to_path_buf(),
        operation,
        message: error.to_string(),
    }
}

/// Compare a participant's live metadata with its scan record.
fn check_drift(participant: &Participant) -> Result<(), MutationError> {
    let drift = |reason: String| MutationError::FilesystemDrift {
        path: participant.path.clone(),
        reason,
    };
    let stat = FileStat::read(&participant.path).map_err(|e| drift(format!("stat failed: {e}")))?;
    let entry = &participant.entry;

    if stat.size != entry.size {
        return Err(drift(format!("size {} != {}", stat.size, entry.size)));
    }
    if stat.changed_time_ns != entry.changed_time_ns {
        return Err(drift("change time differs".to_string()));
    }
    if stat.identity != entry.identity() {
        return Err(drift(format!(
            "identity {:?} != {:?}",
            stat.identity,
            entry.identity()
        )));
    }
    if stat.nlink != 1 {
        return Err(drift(format!("link count is {}", stat.nlink)));
    }
    Ok(())
}
