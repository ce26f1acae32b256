use std::fs;
use std::io;
use std::path::Path;

use path_guard::{validate_leaf, ResolveOptions, WorkspaceRoot};
use similar::{ChangeTag, TextDiff};
use unified_diff_engine::{apply_hunks, parse, FilePatch, FilePatchKind};

use crate::broker::FsBroker;
use crate::error::BrokerError;

/// What to apply: whole-file writes, or unified-diff text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatchRequest {
    Writes(Vec<FileWrite>),
    Diff(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
}

impl FileWrite {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOp {
    Added,
    Modified,
    Deleted,
    Renamed { from: String },
}

/// A file the patch changed. Paths are workspace-relative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangedFile {
    pub path: String,
    pub op: ChangeOp,
}

#[derive(Debug)]
pub struct FailedFile {
    pub label: String,
    pub error: BrokerError,
}

/// Per-file outcome of [`FsBroker::apply_patch`]. Files are applied
/// independently, so `applied` and `failed` can both be non-empty.
#[derive(Debug, Default)]
pub struct PatchReport {
    pub applied: Vec<ChangedFile>,
    pub failed: Vec<FailedFile>,
    pub additions: usize,
    pub deletions: usize,
}

impl PatchReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// `A`/`M`/`D`/`R` lines grouped by kind, each group sorted by path,
    /// followed by any failures.
    #[must_use]
    pub fn summary(&self) -> String {
        let mut added = Vec::new();
        let mut modified = Vec::new();
        let mut deleted = Vec::new();
        let mut renamed = Vec::new();

        for change in &self.applied {
            match &change.op {
                ChangeOp::Added => added.push(format!("A {}", change.path)),
                ChangeOp::Modified => modified.push(format!("M {}", change.path)),
                ChangeOp::Deleted => deleted.push(format!("D {}", change.path)),
                ChangeOp::Renamed { from } => {
                    renamed.push(format!("R {from} -> {}", change.path))
                }
            }
        }

        let mut lines = Vec::new();
        if !self.applied.is_empty() {
            lines.push("Updated the following files:".to_string());
            for mut group in [added, modified, deleted, renamed] {
                group.sort();
                lines.extend(group);
            }
        }

        if !self.failed.is_empty() {
            lines.push("Failed to apply:".to_string());
            lines.extend(
                self.failed
                    .iter()
                    .map(|failure| format!("{}: {}", failure.label, failure.error)),
            );
        }

        lines.push(format!("+{} -{}", self.additions, self.deletions));
        lines.join("\n")
    }

    fn record(&mut self, change: ChangedFile, additions: usize, deletions: usize) {
        self.applied.push(change);
        self.additions += additions;
        self.deletions += deletions;
    }

    fn fail(&mut self, label: impl Into<String>, error: BrokerError) {
        let label = label.into();
        tracing::debug!(file = %label, error = %error, "patch file failed");
        self.failed.push(FailedFile { label, error });
    }
}

struct FileResult {
    change: ChangedFile,
    additions: usize,
    deletions: usize,
}

impl FsBroker {
    /// Applies `request` inside the open workspace.
    ///
    /// Fails outright only when no workspace is open or the request carries
    /// nothing to apply; everything else is reported per file.
    pub fn apply_patch(&self, request: PatchRequest) -> Result<PatchReport, BrokerError> {
        let root = self.root()?;
        let mut report = PatchReport::default();

        match request {
            PatchRequest::Writes(writes) => {
                if writes.is_empty() {
                    return Err(BrokerError::invalid_input("patch contains no file writes"));
                }
                for write in writes {
                    match self.apply_write(&root, &write) {
                        Ok(result) => {
                            report.record(result.change, result.additions, result.deletions)
                        }
                        Err(error) => report.fail(write.path, error),
                    }
                }
            }
            PatchRequest::Diff(text) => {
                let patches = parse(&text);
                if patches.is_empty() {
                    return Err(BrokerError::invalid_input(
                        "diff contains no file patches",
                    ));
                }
                for patch in &patches {
                    match self.apply_file_patch(&root, patch) {
                        Ok(result) => {
                            report.record(result.change, result.additions, result.deletions)
                        }
                        Err(error) => report.fail(patch.label(), error),
                    }
                }
            }
        }

        tracing::debug!(
            applied = report.applied.len(),
            failed = report.failed.len(),
            "patch applied"
        );
        Ok(report)
    }

    fn apply_write(
        &self,
        root: &WorkspaceRoot,
        write: &FileWrite,
    ) -> Result<FileResult, BrokerError> {
        let resolved = self.resolve(root, &write.path, ResolveOptions::ANY)?;
        let previous = match fs::read(&resolved) {
            Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
            Err(error) if error.kind() == io::ErrorKind::NotFound => String::new(),
            Err(error) => {
                return Err(BrokerError::from_io("reading", error, &write.path, root));
            }
        };

        let outcome = self.write_file(&write.path, &write.content)?;
        let (additions, deletions) = line_stats(&previous, &write.content);

        Ok(FileResult {
            change: ChangedFile {
                path: relative_or_raw(root, &outcome.path, &write.path),
                op: if outcome.created {
                    ChangeOp::Added
                } else {
                    ChangeOp::Modified
                },
            },
            additions,
            deletions,
        })
    }

    fn apply_file_patch(
        &self,
        root: &WorkspaceRoot,
        patch: &FilePatch,
    ) -> Result<FileResult, BrokerError> {
        let kind = patch.kind();
        let (old_path, new_path) = match kind {
            FilePatchKind::Add => (None, patch.new_path.as_deref()),
            FilePatchKind::Delete => (patch.old_path.as_deref(), None),
            FilePatchKind::Modify | FilePatchKind::Rename => {
                let path = patch.old_path.as_deref().or(patch.new_path.as_deref());
                (path, patch.new_path.as_deref().or(path))
            }
        };

        // Resolve both endpoints before any I/O.
        let source = old_path
            .map(|raw| {
                self.resolve(root, raw, ResolveOptions::EXISTING)
                    .map(|path| (raw, path))
            })
            .transpose()?;
        let target = new_path
            .map(|raw| {
                self.resolve(root, raw, ResolveOptions::ANY)
                    .map(|path| (raw, path))
            })
            .transpose()?;

        match (kind, source, target) {
            (FilePatchKind::Add, None, Some((raw, target))) => {
                validate_leaf(&target).map_err(|error| BrokerError::from_guard(error, raw, root))?;
                let applied = apply_hunks("", &patch.hunks, patch.label())?;
                self.prepare_parent(root, &target, raw)?;
                write_to(root, &target, raw, &applied.render(true))?;

                Ok(FileResult {
                    change: ChangedFile {
                        path: relative_or_raw(root, &target, raw),
                        op: ChangeOp::Added,
                    },
                    additions: applied.additions,
                    deletions: applied.deletions,
                })
            }
            (FilePatchKind::Delete, Some((raw, source)), None) => {
                let original = read_from(root, &source, raw)?;
                let applied = apply_hunks(&original, &patch.hunks, patch.label())?;
                let path = relative_or_raw(root, &source, raw);
                self.delete(raw)?;

                Ok(FileResult {
                    change: ChangedFile {
                        path,
                        op: ChangeOp::Deleted,
                    },
                    additions: applied.additions,
                    deletions: applied.deletions,
                })
            }
            (FilePatchKind::Modify, Some((raw, source)), Some(_)) => {
                let original = read_from(root, &source, raw)?;
                let applied = apply_hunks(&original, &patch.hunks, patch.label())?;
                write_to(root, &source, raw, &applied.render(false))?;

                Ok(FileResult {
                    change: ChangedFile {
                        path: relative_or_raw(root, &source, raw),
                        op: ChangeOp::Modified,
                    },
                    additions: applied.additions,
                    deletions: applied.deletions,
                })
            }
            (FilePatchKind::Rename, Some((from_raw, source)), Some((to_raw, target))) => {
                validate_leaf(&target)
                    .map_err(|error| BrokerError::from_guard(error, to_raw, root))?;
                if fs::symlink_metadata(&target).is_ok() {
                    return Err(BrokerError::AlreadyExists {
                        path: relative_or_raw(root, &target, to_raw),
                    });
                }

                let original = read_from(root, &source, from_raw)?;
                let applied = apply_hunks(&original, &patch.hunks, patch.label())?;
                self.prepare_parent(root, &target, to_raw)?;
                write_to(root, &target, to_raw, &applied.render(false))?;
                fs::remove_file(&source)
                    .map_err(|error| BrokerError::from_io("removing", error, from_raw, root))?;

                Ok(FileResult {
                    change: ChangedFile {
                        path: relative_or_raw(root, &target, to_raw),
                        op: ChangeOp::Renamed {
                            from: relative_or_raw(root, &source, from_raw),
                        },
                    },
                    additions: applied.additions,
                    deletions: applied.deletions,
                })
            }
            _ => Err(BrokerError::invalid_input(format!(
                "file patch {} is missing a path",
                patch.label()
            ))),
        }
    }
}

fn read_from(root: &WorkspaceRoot, path: &Path, raw: &str) -> Result<String, BrokerError> {
    fs::read_to_string(path).map_err(|error| BrokerError::from_io("reading", error, raw, root))
}

fn write_to(
    root: &WorkspaceRoot,
    path: &Path,
    raw: &str,
    content: &str,
) -> Result<(), BrokerError> {
    fs::write(path, content).map_err(|error| BrokerError::from_io("writing", error, raw, root))
}

fn relative_or_raw(root: &WorkspaceRoot, path: &Path, raw: &str) -> String {
    root.relative(path).unwrap_or_else(|| raw.to_string())
}

/// Added and removed line counts between two versions of a file.
fn line_stats(before: &str, after: &str) -> (usize, usize) {
    let diff = TextDiff::from_lines(before, after);
    diff.iter_all_changes()
        .fold((0, 0), |(additions, deletions), change| match change.tag() {
            ChangeTag::Insert => (additions + 1, deletions),
            ChangeTag::Delete => (additions, deletions + 1),
            ChangeTag::Equal => (additions, deletions),
        })
}
