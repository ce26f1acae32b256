use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use path_guard::{PathGuardError, WorkspaceRoot};

/// The folder the user currently has open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceInfo {
    pub root: WorkspaceRoot,
    pub name: String,
}

impl WorkspaceInfo {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.root.path()
    }
}

/// Supplies the open workspace, or `None` when nothing is open.
pub trait WorkspaceProvider: Send + Sync {
    fn current(&self) -> Option<WorkspaceInfo>;
}

/// Holds the open workspace for the process. Opening canonicalizes the root
/// once; it stays fixed until the next explicit `open` or `close`.
#[derive(Debug, Default)]
pub struct WorkspaceService {
    current: Mutex<Option<WorkspaceInfo>>,
}

impl WorkspaceService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self, path: impl AsRef<Path>) -> Result<WorkspaceInfo, PathGuardError> {
        let root = WorkspaceRoot::new(path)?;
        let info = WorkspaceInfo {
            name: root.name(),
            root,
        };
        tracing::info!(workspace = %info.name, "workspace opened");
        *lock_unpoisoned(&self.current) = Some(info.clone());
        Ok(info)
    }

    pub fn close(&self) -> Option<WorkspaceInfo> {
        let closed = lock_unpoisoned(&self.current).take();
        if let Some(info) = &closed {
            tracing::info!(workspace = %info.name, "workspace closed");
        }
        closed
    }
}

impl WorkspaceProvider for WorkspaceService {
    fn current(&self) -> Option<WorkspaceInfo> {
        lock_unpoisoned(&self.current).clone()
    }
}

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
