//! Workspace path confinement.
//!
//! Invariant: every path handed to the filesystem by the broker or the
//! provenance recorder is produced by [`resolve`], so it equals the workspace
//! root or lies beneath it, before and after symlink resolution.

mod confine;
mod error;
mod filename;
mod sanitize;

pub use confine::{
    is_within, normalize_lexically, resolve, ResolveOptions, WorkspaceRoot,
    CASE_INSENSITIVE_PATHS,
};
pub use error::{InvalidFilenameReason, PathGuardError};
pub use filename::{validate_filename, validate_leaf, MAX_FILENAME_LENGTH};
pub use sanitize::{sanitize_message, sanitize_path};
