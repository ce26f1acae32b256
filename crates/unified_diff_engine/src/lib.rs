//! Unified-diff parsing and hunk application.
//!
//! The engine is pure: it never touches the filesystem. Callers resolve and
//! confine both endpoints of every [`FilePatch`] before reading or writing.

mod apply;
mod error;
mod parse;

pub use apply::{apply_hunks, AppliedHunks};
pub use error::PatchConflict;
pub use parse::{parse, FilePatch, FilePatchKind, PatchHunk, DEV_NULL};
