use std::io;

use path_guard::{
    sanitize_message, sanitize_path, InvalidFilenameReason, PathGuardError, WorkspaceRoot,
};
use thiserror::Error;
use unified_diff_engine::PatchConflict;

/// Stable discriminant for [`BrokerError`], for callers that branch on the
/// kind of failure without matching the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FsErrorCode {
    NoWorkspace,
    SecurityViolation,
    InvalidFilename,
    InvalidInput,
    NotFound,
    PermissionDenied,
    IsDirectory,
    NotDirectory,
    AlreadyExists,
    PatchConflict,
    Unknown,
}

/// Broker failures. Every path carried here is workspace-relative or a bare
/// basename; absolute host paths never reach the message.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("no workspace is open")]
    NoWorkspace,

    #[error("path escapes workspace root: {path}")]
    SecurityViolation { path: String },

    #[error("invalid filename '{name}': {reason}")]
    InvalidFilename {
        name: String,
        reason: InvalidFilenameReason,
    },

    #[error("invalid input: {message}")]
    InvalidInput { message: String },

    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    #[error("is a directory: {path}")]
    IsDirectory { path: String },

    #[error("not a directory: {path}")]
    NotDirectory { path: String },

    #[error("already exists: {path}")]
    AlreadyExists { path: String },

    #[error(transparent)]
    PatchConflict(#[from] PatchConflict),

    #[error("failed while {operation} {path}: {message}")]
    Unknown {
        operation: &'static str,
        path: String,
        message: String,
    },
}

impl BrokerError {
    #[must_use]
    pub fn code(&self) -> FsErrorCode {
        match self {
            Self::NoWorkspace => FsErrorCode::NoWorkspace,
            Self::SecurityViolation { .. } => FsErrorCode::SecurityViolation,
            Self::InvalidFilename { .. } => FsErrorCode::InvalidFilename,
            Self::InvalidInput { .. } => FsErrorCode::InvalidInput,
            Self::NotFound { .. } => FsErrorCode::NotFound,
            Self::PermissionDenied { .. } => FsErrorCode::PermissionDenied,
            Self::IsDirectory { .. } => FsErrorCode::IsDirectory,
            Self::NotDirectory { .. } => FsErrorCode::NotDirectory,
            Self::AlreadyExists { .. } => FsErrorCode::AlreadyExists,
            Self::PatchConflict(_) => FsErrorCode::PatchConflict,
            Self::Unknown { .. } => FsErrorCode::Unknown,
        }
    }

    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Maps an OS error raised while operating on `raw_path`.
    #[must_use]
    pub fn from_io(
        operation: &'static str,
        error: io::Error,
        raw_path: &str,
        root: &WorkspaceRoot,
    ) -> Self {
        let path = sanitize_path(raw_path, root);

        #[cfg(unix)]
        {
            match error.raw_os_error() {
                Some(libc::EISDIR) => return Self::IsDirectory { path },
                Some(libc::ENOTDIR) => return Self::NotDirectory { path },
                _ => {}
            }
        }

        match error.kind() {
            io::ErrorKind::NotFound => Self::NotFound { path },
            io::ErrorKind::PermissionDenied => Self::PermissionDenied { path },
            io::ErrorKind::AlreadyExists => Self::AlreadyExists { path },
            io::ErrorKind::InvalidData => Self::InvalidInput {
                message: format!("{path} is not valid UTF-8 text"),
            },
            _ => Self::Unknown {
                operation,
                path,
                message: sanitize_message(&error.to_string(), root),
            },
        }
    }

    /// Maps a confinement or filename failure for `raw_path`.
    #[must_use]
    pub fn from_guard(error: PathGuardError, raw_path: &str, root: &WorkspaceRoot) -> Self {
        match error {
            PathGuardError::EmptyPath => Self::invalid_input("path must not be empty"),
            PathGuardError::SecurityViolation { .. } | PathGuardError::SymlinkLoop { .. } => {
                Self::SecurityViolation {
                    path: sanitize_path(raw_path, root),
                }
            }
            PathGuardError::NotFound { .. } => Self::NotFound {
                path: sanitize_path(raw_path, root),
            },
            PathGuardError::InvalidFilename { name, reason } => {
                Self::InvalidFilename { name, reason }
            }
            PathGuardError::RootNotDirectory { .. } => Self::NotDirectory {
                path: sanitize_path(raw_path, root),
            },
            PathGuardError::Io {
                operation, source, ..
            } => Self::from_io(operation, source, raw_path, root),
        }
    }
}
