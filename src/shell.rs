//! Composition root for one process: the open workspace, the broker over it,
//! and the provenance recorder for it.
//!
//! Broker operations made through [`Shell`] record provenance after the
//! primary action succeeds. Recording failures are logged and dropped; they
//! never fail the operation that triggered them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fs_broker::{
    BrokerError, ChangeOp, DirectoryTrash, FsBroker, PatchReport, PatchRequest, WorkspaceInfo,
    WorkspaceService,
};
use path_guard::{PathGuardError, ResolveOptions};
use provenance_store::{content_hash, Actor, FileOp, ProvenanceError, ProvenanceService};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::commit_gate::{self, CommitDecision, CommitPolicy};
use crate::config::ShellConfig;
use crate::watcher::{self, Classified, WatchEvent};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("no workspace is open")]
    NoWorkspace,

    #[error("failed to open workspace: {0}")]
    Open(#[from] PathGuardError),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Provenance(#[from] ProvenanceError),
}

pub struct Shell {
    config: ShellConfig,
    workspace: Arc<WorkspaceService>,
    broker: FsBroker,
    provenance: Option<ProvenanceService>,
}

impl Shell {
    pub fn new(config: ShellConfig) -> Self {
        let workspace = Arc::new(WorkspaceService::new());
        let trash = Arc::new(DirectoryTrash::new(config.trash_dir.clone()));
        let broker = FsBroker::new(workspace.clone(), trash);
        Self {
            config,
            workspace,
            broker,
            provenance: None,
        }
    }

    #[must_use]
    pub fn config(&self) -> &ShellConfig {
        &self.config
    }

    #[must_use]
    pub fn broker(&self) -> &FsBroker {
        &self.broker
    }

    /// Opens `path` as the workspace and initializes tracing for it. A tracing
    /// store that cannot be loaded leaves the workspace open with recording off.
    pub fn open_workspace(&mut self, path: impl AsRef<Path>) -> Result<WorkspaceInfo, ShellError> {
        let info = self.workspace.open(path)?;

        let mut provenance = ProvenanceService::new(info.root.clone(), self.config.trace_config());
        if let Err(error) = provenance.initialize() {
            tracing::warn!(
                workspace = %info.name,
                error = %error,
                "provenance tracing unavailable for this workspace"
            );
        }
        self.provenance = Some(provenance);
        Ok(info)
    }

    pub fn close_workspace(&mut self) -> Option<WorkspaceInfo> {
        self.provenance = None;
        self.workspace.close()
    }

    #[must_use]
    pub fn provenance(&self) -> Option<&ProvenanceService> {
        self.provenance.as_ref()
    }

    pub fn provenance_mut(&mut self) -> Result<&mut ProvenanceService, ShellError> {
        self.provenance.as_mut().ok_or(ShellError::NoWorkspace)
    }

    pub fn write_file(
        &mut self,
        path: &str,
        content: &[u8],
        actor: Actor,
    ) -> Result<PathBuf, ShellError> {
        let before = self.hash_before(path);
        let outcome = self.broker.write_file(path, content)?;
        let op = if outcome.created {
            FileOp::Added
        } else {
            FileOp::Modified
        };
        let after = Some(content_hash(content));
        self.record("write", |service| {
            service.record_file_change(path, op, actor, before, after)
        });
        Ok(outcome.path)
    }

    pub fn create_file(
        &mut self,
        path: &str,
        content: &[u8],
        actor: Actor,
    ) -> Result<PathBuf, ShellError> {
        let created = self.broker.create_file(path, content)?;
        let after = Some(content_hash(content));
        self.record("create", |service| {
            service.record_file_change(path, FileOp::Added, actor, None, after)
        });
        Ok(created)
    }

    pub fn create_directory(&mut self, path: &str) -> Result<PathBuf, ShellError> {
        Ok(self.broker.create_directory(path)?)
    }

    /// Moves the entry to the trash. Only files are recorded.
    pub fn delete(&mut self, path: &str, actor: Actor) -> Result<PathBuf, ShellError> {
        let before = self.hash_before(path);
        let was_dir = self.is_directory(path);
        let removed = self.broker.delete(path)?;
        if !was_dir {
            self.record("delete", |service| {
                service.record_file_change(path, FileOp::Deleted, actor, before, None)
            });
        }
        Ok(removed)
    }

    pub fn rename(&mut self, from: &str, to: &str, actor: Actor) -> Result<PathBuf, ShellError> {
        let (_, destination) = self.broker.rename(from, to)?;
        self.record("rename", |service| service.record_file_rename(from, to, actor));
        Ok(destination)
    }

    /// Applies the patch and records every file it changed.
    pub fn apply_patch(
        &mut self,
        request: PatchRequest,
        actor: Actor,
    ) -> Result<PatchReport, ShellError> {
        let report = self.broker.apply_patch(request)?;
        for changed in &report.applied {
            let path = changed.path.as_str();
            match &changed.op {
                ChangeOp::Renamed { from } => {
                    self.record("patch rename", |service| {
                        service.record_file_rename(from, path, actor)
                    });
                }
                op => {
                    let op = match op {
                        ChangeOp::Added => FileOp::Added,
                        ChangeOp::Deleted => FileOp::Deleted,
                        _ => FileOp::Modified,
                    };
                    self.record("patch", |service| {
                        service.record_file_change(path, op, actor, None, None)
                    });
                }
            }
        }
        Ok(report)
    }

    /// Records a batch of watcher notifications as changes made outside the
    /// broker. Returns how many events were written.
    pub fn handle_watch_events(&mut self, events: Vec<WatchEvent>) -> usize {
        let mut recorded = 0;
        for classified in watcher::coalesce(events) {
            let event = match classified {
                Classified::Change { path, op } => self.record("watch", |service| {
                    service.record_file_change(&path, op, Actor::Human, None, None)
                }),
                Classified::Rename { from, to } => self.record("watch rename", |service| {
                    service.record_file_rename(&from, &to, Actor::Human)
                }),
            };
            if matches!(event, Some(Some(_))) {
                recorded += 1;
            }
        }
        recorded
    }

    /// Decides whether a commit may proceed. An armed override is consumed
    /// only when the policy would otherwise block.
    pub fn check_commit(&mut self, policy: CommitPolicy) -> Result<CommitDecision, ShellError> {
        let service = self.provenance_mut()?;
        let parity = service.get_parity();
        let granted = if commit_gate::requires_override(&parity, policy) {
            service.consume_commit_override()
        } else {
            None
        };

        let decision = commit_gate::evaluate(&parity, policy, granted.as_ref());
        if let CommitDecision::Block { drift_files } = &decision {
            let mut meta = Map::new();
            meta.insert("driftFiles".to_string(), json!(drift_files));
            self.record("commit blocked", |service| {
                service.record_commit_blocked(meta)
            });
        }
        Ok(decision)
    }

    pub fn commit_succeeded(&mut self, meta: Map<String, Value>) {
        self.record("commit succeeded", |service| {
            service.record_commit_succeeded(meta)
        });
    }

    fn record<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut ProvenanceService) -> Result<T, ProvenanceError>,
    ) -> Option<T> {
        let service = self.provenance.as_mut()?;
        match f(service) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(operation, error = %error, "failed to record provenance");
                None
            }
        }
    }

    fn hash_before(&self, path: &str) -> Option<String> {
        let service = self.provenance.as_ref()?;
        if !service.is_enabled() || !service.is_initialized() {
            return None;
        }
        self.broker
            .read_file_bytes(path)
            .ok()
            .map(|bytes| content_hash(&bytes))
    }

    fn is_directory(&self, path: &str) -> bool {
        self.broker
            .root()
            .and_then(|root| self.broker.resolve(&root, path, ResolveOptions::EXISTING))
            .map(|resolved| resolved.is_dir())
            .unwrap_or(false)
    }
}
