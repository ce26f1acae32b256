//! Confined filesystem access for the open workspace.
//!
//! [`FsBroker`] is the only component that reads or mutates workspace files on
//! behalf of callers. Deletes go through a [`Trash`] and patches through
//! [`FsBroker::apply_patch`].

mod broker;
mod error;
mod patch;
mod trash;
mod workspace;

pub use broker::{DirEntry, EntryKind, FsBroker, WriteOutcome};
pub use error::{BrokerError, FsErrorCode};
pub use patch::{ChangeOp, ChangedFile, FailedFile, FileWrite, PatchReport, PatchRequest};
pub use trash::{DirectoryTrash, Trash};
pub use workspace::{WorkspaceInfo, WorkspaceProvider, WorkspaceService};
