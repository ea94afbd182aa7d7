//! Actions on duplicate groups.
//!
//! - [`delete`]: trash and permanent deletion primitives
//! - [`link`]: crash-safe replacement of a file by a soft link, hard link
//!   or shortcut
//! - [`mutate`]: the group mutation engine that validates requests against
//!   the store and the live file system before calling the two above
//!
//! ```no_run
//! use dupehound::actions::{ActionKind, MutationEngine, MutationRequest};
//! # use dupehound::duplicates::{DuplicateStore, GroupKey, NoopObserver};
//! # use std::path::PathBuf;
//! # let mut store = DuplicateStore::default();
//!
//! let request = MutationRequest {
//!     group: GroupKey::content(1024, "3f786850e387550fdab836ed7e6dc881de23001b"),
//!     victims: vec![PathBuf::from("/photos/copy.jpg")],
//!     survivors: vec![PathBuf::from("/photos/original.jpg")],
//!     action: ActionKind::SoftLink,
//!     use_trash: true,
//! };
//! let report = MutationEngine::default().execute(&mut store, &request, &mut NoopObserver)?;
//! println!("{} file(s) replaced", report.processed.len());
//! # Ok::<(), dupehound::actions::MutationError>(())
//! ```

pub mod delete;
pub mod link;
pub mod mutate;

pub use delete::{delete_file, delete_to_trash, permanent_delete, DeleteError, DeleteResult};
pub use link::{replace_with_link, LinkError, LinkKind, LinkOutcome, TEMP_SUFFIX};
pub use mutate::{
    ActionKind, BatchReport, MutationEngine, MutationError, MutationPolicy, MutationReport,
    MutationRequest, MutationState, ShapeViolationPolicy,
};
