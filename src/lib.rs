//! Workspace shell core.
//!
//! Ties the confined filesystem broker to the provenance recorder for the
//! open workspace, and adds the pieces around them: environment
//! configuration, logging, watcher classification and commit gating.

pub mod commit_gate;
pub mod config;
pub mod logging;
pub mod shell;
pub mod watcher;

pub use commit_gate::{CommitDecision, CommitPolicy};
pub use config::{ConfigError, ShellConfig};
pub use shell::{Shell, ShellError};
pub use watcher::{Classified, WatchEvent, WatchKind};

pub use fs_broker;
pub use path_guard;
pub use provenance_store;
