use std::cmp::Ordering;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use path_guard::{validate_leaf, ResolveOptions, WorkspaceRoot};

use crate::error::BrokerError;
use crate::trash::Trash;
use crate::workspace::WorkspaceProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    /// Workspace-relative, `/`-separated.
    pub path: String,
    pub kind: EntryKind,
    /// Best effort; `None` for directories or when the entry could not be
    /// inspected.
    pub size: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteOutcome {
    pub path: PathBuf,
    pub created: bool,
}

/// Confined filesystem access for one open workspace.
///
/// Every operation asks the workspace provider for the root, resolves each
/// path argument through `path_guard`, validates any newly introduced name,
/// and only then touches the disk.
#[derive(Clone)]
pub struct FsBroker {
    workspace: Arc<dyn WorkspaceProvider>,
    trash: Arc<dyn Trash>,
}

impl FsBroker {
    pub fn new(workspace: Arc<dyn WorkspaceProvider>, trash: Arc<dyn Trash>) -> Self {
        Self { workspace, trash }
    }

    /// The open workspace root, or [`BrokerError::NoWorkspace`].
    pub fn root(&self) -> Result<WorkspaceRoot, BrokerError> {
        self.workspace
            .current()
            .map(|info| info.root)
            .ok_or(BrokerError::NoWorkspace)
    }

    pub fn resolve(
        &self,
        root: &WorkspaceRoot,
        raw: &str,
        options: ResolveOptions,
    ) -> Result<PathBuf, BrokerError> {
        root.resolve(raw, options)
            .map_err(|error| BrokerError::from_guard(error, raw, root))
    }

    pub fn read_directory(&self, path: &str) -> Result<Vec<DirEntry>, BrokerError> {
        let root = self.root()?;
        let resolved = self.resolve(&root, path, ResolveOptions::EXISTING)?;

        let reader = fs::read_dir(&resolved)
            .map_err(|error| BrokerError::from_io("listing", error, path, &root))?;

        let mut entries = Vec::new();
        for entry in reader {
            let entry =
                entry.map_err(|error| BrokerError::from_io("listing", error, path, &root))?;
            let name = entry.file_name().to_string_lossy().into_owned();

            let (kind, size) = match entry.metadata() {
                Ok(metadata) => {
                    let file_type = metadata.file_type();
                    if file_type.is_symlink() {
                        (EntryKind::Symlink, None)
                    } else if file_type.is_dir() {
                        (EntryKind::Directory, None)
                    } else if file_type.is_file() {
                        (EntryKind::File, Some(metadata.len()))
                    } else {
                        (EntryKind::Other, None)
                    }
                }
                Err(error) => {
                    tracing::debug!(entry = %name, error = %error, "stat failed; omitting size");
                    let kind = match entry.file_type() {
                        Ok(file_type) if file_type.is_dir() => EntryKind::Directory,
                        Ok(file_type) if file_type.is_symlink() => EntryKind::Symlink,
                        _ => EntryKind::File,
                    };
                    (kind, None)
                }
            };

            let entry_path = entry.path();
            entries.push(DirEntry {
                path: root.relative(&entry_path).unwrap_or_else(|| name.clone()),
                name,
                kind,
                size,
            });
        }

        entries.sort_by(compare_entries);
        Ok(entries)
    }

    pub fn read_file(&self, path: &str) -> Result<String, BrokerError> {
        let root = self.root()?;
        let resolved = self.resolve(&root, path, ResolveOptions::EXISTING)?;
        fs::read_to_string(&resolved)
            .map_err(|error| BrokerError::from_io("reading", error, path, &root))
    }

    pub fn read_file_bytes(&self, path: &str) -> Result<Vec<u8>, BrokerError> {
        let root = self.root()?;
        let resolved = self.resolve(&root, path, ResolveOptions::EXISTING)?;
        fs::read(&resolved).map_err(|error| BrokerError::from_io("reading", error, path, &root))
    }

    /// Writes `content`, creating the file and its parent directories when
    /// missing.
    pub fn write_file(
        &self,
        path: &str,
        content: impl AsRef<[u8]>,
    ) -> Result<WriteOutcome, BrokerError> {
        let root = self.root()?;
        let resolved = self.resolve(&root, path, ResolveOptions::ANY)?;
        let created = fs::symlink_metadata(&resolved).is_err();
        if created {
            validate_leaf(&resolved).map_err(|error| BrokerError::from_guard(error, path, &root))?;
            self.prepare_parent(&root, &resolved, path)?;
        }

        fs::write(&resolved, content)
            .map_err(|error| BrokerError::from_io("writing", error, path, &root))?;

        Ok(WriteOutcome {
            path: resolved,
            created,
        })
    }

    /// Creates a new file; fails with `AlreadyExists` when the path is taken.
    pub fn create_file(&self, path: &str, content: impl AsRef<[u8]>) -> Result<PathBuf, BrokerError> {
        let root = self.root()?;
        let resolved = self.resolve(&root, path, ResolveOptions::ANY)?;
        validate_leaf(&resolved).map_err(|error| BrokerError::from_guard(error, path, &root))?;
        self.prepare_parent(&root, &resolved, path)?;

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&resolved)
            .map_err(|error| BrokerError::from_io("creating", error, path, &root))?;
        file.write_all(content.as_ref())
            .map_err(|error| BrokerError::from_io("writing", error, path, &root))?;

        Ok(resolved)
    }

    pub fn create_directory(&self, path: &str) -> Result<PathBuf, BrokerError> {
        let root = self.root()?;
        let resolved = self.resolve(&root, path, ResolveOptions::ANY)?;
        if resolved != root.path() {
            validate_leaf(&resolved)
                .map_err(|error| BrokerError::from_guard(error, path, &root))?;
        }

        fs::create_dir_all(&resolved)
            .map_err(|error| BrokerError::from_io("creating directory", error, path, &root))?;
        Ok(resolved)
    }

    /// Renames `from` to `to`. Both paths are resolved and validated before
    /// anything is moved.
    pub fn rename(&self, from: &str, to: &str) -> Result<(PathBuf, PathBuf), BrokerError> {
        let root = self.root()?;
        let source = self.resolve(&root, from, ResolveOptions::EXISTING)?;
        let destination = self.resolve(&root, to, ResolveOptions::ANY)?;
        validate_leaf(&destination).map_err(|error| BrokerError::from_guard(error, to, &root))?;

        if source == root.path() || destination == root.path() {
            return Err(BrokerError::invalid_input(
                "the workspace root cannot be renamed",
            ));
        }

        if destination != source && fs::symlink_metadata(&destination).is_ok() {
            return Err(BrokerError::AlreadyExists {
                path: root.relative(&destination).unwrap_or_else(|| to.to_string()),
            });
        }

        self.prepare_parent(&root, &destination, to)?;
        fs::rename(&source, &destination)
            .map_err(|error| BrokerError::from_io("renaming", error, from, &root))?;

        Ok((source, destination))
    }

    /// Moves the entry to the trash.
    pub fn delete(&self, path: &str) -> Result<PathBuf, BrokerError> {
        let root = self.root()?;
        let resolved = self.resolve(&root, path, ResolveOptions::EXISTING)?;
        if resolved == root.path() {
            return Err(BrokerError::invalid_input(
                "the workspace root cannot be deleted",
            ));
        }

        self.trash
            .trash(&resolved)
            .map_err(|error| BrokerError::from_io("moving to trash", error, path, &root))?;
        Ok(resolved)
    }

    /// Creates missing parent directories, then re-checks that the parent still
    /// canonicalizes inside the workspace.
    pub(crate) fn prepare_parent(
        &self,
        root: &WorkspaceRoot,
        resolved: &Path,
        raw: &str,
    ) -> Result<(), BrokerError> {
        let Some(parent) = resolved.parent() else {
            return Ok(());
        };

        fs::create_dir_all(parent)
            .map_err(|error| BrokerError::from_io("creating parent directory", error, raw, root))?;
        let canonical_parent = parent
            .canonicalize()
            .map_err(|error| BrokerError::from_io("resolving parent directory", error, raw, root))?;

        if !root.contains(&canonical_parent) {
            return Err(BrokerError::SecurityViolation {
                path: path_guard::sanitize_path(raw, root),
            });
        }

        Ok(())
    }
}

/// Directories first, then case-insensitive by name.
fn compare_entries(left: &DirEntry, right: &DirEntry) -> Ordering {
    let left_is_dir = left.kind == EntryKind::Directory;
    let right_is_dir = right.kind == EntryKind::Directory;

    right_is_dir
        .cmp(&left_is_dir)
        .then_with(|| left.name.to_lowercase().cmp(&right.name.to_lowercase()))
        .then_with(|| left.name.cmp(&right.name))
}
