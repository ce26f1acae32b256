use std::path::PathBuf;

use path_guard::PathGuardError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProvenanceError {
    /// Confinement or existence failure for a path handed to the recorder.
    #[error(transparent)]
    Path(#[from] PathGuardError),

    #[error("run '{run_id}' is already active")]
    RunAlreadyActive { run_id: String },

    #[error("tracing is disabled")]
    Disabled,

    #[error("tracing has not been initialized")]
    NotInitialized,

    #[error("I/O error while {operation} at {path}: {source}")]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize {what} for {path}: {source}")]
    JsonSerialize {
        what: &'static str,
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to format current UTC timestamp as RFC3339: {0}")]
    ClockFormat(#[source] time::error::Format),
}

impl ProvenanceError {
    #[must_use]
    pub fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    #[must_use]
    pub fn json_serialize(
        what: &'static str,
        path: impl Into<PathBuf>,
        source: serde_json::Error,
    ) -> Self {
        Self::JsonSerialize {
            what,
            path: path.into(),
            source,
        }
    }

    /// Whether the failure is a workspace escape, which callers must surface.
    #[must_use]
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::Path(error) if error.is_security_violation())
    }
}
