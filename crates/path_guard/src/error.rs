use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathGuardError {
    #[error("path must not be empty")]
    EmptyPath,

    #[error("path escapes workspace root: {path}")]
    SecurityViolation { path: String },

    #[error("path not found: {path}")]
    NotFound { path: String },

    #[error("invalid filename '{name}': {reason}")]
    InvalidFilename {
        name: String,
        reason: InvalidFilenameReason,
    },

    #[error("workspace root must be a directory: {path}")]
    RootNotDirectory { path: PathBuf },

    #[error("symlink chain too deep while resolving {path}")]
    SymlinkLoop { path: String },

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PathGuardError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn security(path: impl Into<String>) -> Self {
        Self::SecurityViolation { path: path.into() }
    }

    #[must_use]
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::SecurityViolation { .. } | Self::SymlinkLoop { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidFilenameReason {
    Empty,
    TooLong { length: usize },
    ControlCharacter,
    PathSeparator,
    ReservedCharacter(char),
}

impl fmt::Display for InvalidFilenameReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "name must not be empty"),
            Self::TooLong { length } => {
                write!(f, "name is {length} characters long (max 255)")
            }
            Self::ControlCharacter => write!(f, "name contains a control character"),
            Self::PathSeparator => write!(f, "name contains a path separator"),
            Self::ReservedCharacter(c) => write!(f, "name contains reserved character '{c}'"),
        }
    }
}
