use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

use path_guard::{ResolveOptions, WorkspaceRoot};
use serde::Serialize;
use serde_json::{json, Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ProvenanceError;
use crate::hash::hash_file;
use crate::ignore::IgnoreMatcher;
use crate::index::{
    apply_event_to_index, FileTrace, ParitySnapshot, ProvenanceIndex, RunRecord, RunStatus,
};
use crate::ledger::{Ledger, RotationPolicy};
use crate::paths::{storage_root, DEFAULT_STORAGE_DIR, INDEX_FILE_NAME};
use crate::schema::{Actor, DocRef, EventType, FileChange, FileChangeEvent, FileOp, RunRef};

/// Storage and rotation settings for one workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceConfig {
    pub enabled: bool,
    /// Workspace-relative ledger directory.
    pub storage_dir: String,
    pub rotation: RotationPolicy,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage_dir: DEFAULT_STORAGE_DIR.to_string(),
            rotation: RotationPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceStatus {
    pub enabled: bool,
    pub initialized: bool,
    pub active_run: Option<RunRecord>,
    pub parity: ParitySnapshot,
}

/// A one-shot permission to commit despite untracked drift.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitOverride {
    pub reason: String,
    pub actor: Actor,
    pub timestamp: String,
}

pub type ListenerId = u64;

type StatusListener = Box<dyn Fn(&TraceStatus) + Send>;

/// Records file changes against agent runs for one workspace.
///
/// Every mutation appends to the ledger first, then folds the same event into
/// the in-memory index and persists it, so the index on disk is always a
/// replay of the ledger.
pub struct ProvenanceService {
    root: WorkspaceRoot,
    ledger: Ledger,
    index_path: PathBuf,
    index: ProvenanceIndex,
    ignore: IgnoreMatcher,
    enabled: bool,
    initialized: bool,
    active_run: Option<RunRef>,
    pending_override: Option<CommitOverride>,
    listeners: Vec<(ListenerId, StatusListener)>,
    next_listener_id: ListenerId,
}

impl std::fmt::Debug for ProvenanceService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvenanceService")
            .field("root", &self.root)
            .field("ledger", &self.ledger)
            .field("enabled", &self.enabled)
            .field("initialized", &self.initialized)
            .field("active_run", &self.active_run)
            .field("listeners", &self.listeners.len())
            .finish_non_exhaustive()
    }
}

impl ProvenanceService {
    #[must_use]
    pub fn new(root: WorkspaceRoot, config: TraceConfig) -> Self {
        let storage = storage_root(root.path(), &config.storage_dir);
        Self {
            ignore: IgnoreMatcher::new(root.path(), &config.storage_dir),
            index_path: storage.join(INDEX_FILE_NAME),
            ledger: Ledger::new(storage, config.rotation),
            root,
            index: ProvenanceIndex::default(),
            enabled: config.enabled,
            initialized: false,
            active_run: None,
            pending_override: None,
            listeners: Vec::new(),
            next_listener_id: 0,
        }
    }

    #[must_use]
    pub fn root(&self) -> &WorkspaceRoot {
        &self.root
    }

    #[must_use]
    pub fn storage_dir(&self) -> &Path {
        self.ledger.dir()
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Loads the persisted index, rebuilding it from the ledger when it is
    /// missing, unusable, or was saved at a different ledger position. A run
    /// left running by a previous session becomes the active run again.
    pub fn initialize(&mut self) -> Result<(), ProvenanceError> {
        match ProvenanceIndex::load(&self.index_path) {
            Some(index) if index.ledger_watermark == self.ledger.watermark() => self.index = index,
            Some(_) => {
                tracing::warn!(
                    path = %self.index_path.display(),
                    "provenance index is out of step with the ledger; rebuilding"
                );
                self.rebuild_index_from_ledger()?;
            }
            None => {
                tracing::info!(path = %self.index_path.display(), "rebuilding provenance index");
                self.rebuild_index_from_ledger()?;
            }
        }

        self.active_run = self.index.running_run().map(RunRecord::run_ref);
        self.initialized = true;
        self.notify();
        Ok(())
    }

    /// Disabling while a run is active aborts the run first.
    pub fn set_enabled(&mut self, enabled: bool) -> Result<(), ProvenanceError> {
        if enabled == self.enabled {
            return Ok(());
        }

        if !enabled {
            self.abort_active_run()?;
        }
        self.enabled = enabled;
        tracing::info!(enabled, "provenance tracing toggled");
        self.notify();
        Ok(())
    }

    /// Starts a run. Each input must exist inside the workspace; its content
    /// hash is stamped into the RUN_STARTED event.
    pub fn start_run(
        &mut self,
        feature_id: &str,
        task_id: &str,
        inputs: &[&str],
    ) -> Result<RunRecord, ProvenanceError> {
        if let Some(active) = &self.active_run {
            return Err(ProvenanceError::RunAlreadyActive {
                run_id: active.run_id.clone(),
            });
        }
        self.ensure_recording()?;

        let mut docs = Vec::with_capacity(inputs.len());
        for input in inputs {
            let resolved = self.root.resolve(input, ResolveOptions::EXISTING)?;
            let hash = hash_file(&resolved)
                .map_err(|source| ProvenanceError::io("hashing run input", &resolved, source))?;
            docs.push(DocRef {
                path: self.relative(&resolved),
                hash,
            });
        }

        let run = RunRef {
            run_id: Uuid::new_v4().to_string(),
            feature_id: feature_id.to_string(),
            task_id: task_id.to_string(),
        };
        let mut meta = Map::new();
        meta.insert("inputs".to_string(), json!(&docs));

        let started_at = now_rfc3339()?;
        let event = FileChangeEvent::new(started_at.clone(), EventType::RunStarted, Actor::System)
            .with_run(Some(run.clone()))
            .with_meta(meta);
        self.record_event(event)?;
        self.active_run = Some(run.clone());
        tracing::info!(run_id = %run.run_id, feature = feature_id, task = task_id, "run started");
        self.notify();

        Ok(RunRecord {
            run_id: run.run_id,
            feature_id: run.feature_id,
            task_id: run.task_id,
            started_at,
            stopped_at: None,
            status: RunStatus::Running,
            inputs: docs,
        })
    }

    pub fn stop_run(&mut self) -> Result<Option<RunRecord>, ProvenanceError> {
        self.finish_run(EventType::RunStopped)
    }

    pub fn abort_active_run(&mut self) -> Result<Option<RunRecord>, ProvenanceError> {
        self.finish_run(EventType::RunAborted)
    }

    /// Records one observed change. Returns the appended event, or `None` when
    /// tracing is off, the path is ignored, or it names a directory.
    pub fn record_file_change(
        &mut self,
        path: &str,
        op: FileOp,
        actor: Actor,
        hash_before: Option<String>,
        hash_after: Option<String>,
    ) -> Result<Option<FileChangeEvent>, ProvenanceError> {
        if !self.enabled || !self.initialized {
            return Ok(None);
        }

        let options = if op == FileOp::Deleted {
            ResolveOptions::ANY
        } else {
            ResolveOptions::EXISTING
        };
        let resolved = self.root.resolve(path, options)?;
        let relative = self.relative(&resolved);
        let is_dir = resolved.is_dir();
        if relative.is_empty() || (is_dir && op != FileOp::Deleted) {
            return Ok(None);
        }
        if self.ignore.is_ignored(&relative, is_dir) {
            tracing::trace!(path = %relative, "ignored file change");
            return Ok(None);
        }

        let hash_after = match (op, hash_after) {
            (FileOp::Deleted, _) => None,
            (_, Some(hash)) => Some(hash),
            (_, None) => self.hash_or_warn(&resolved),
        };

        let change = FileChange {
            path: relative,
            op,
            previous_path: None,
            hash_before,
            hash_after,
        };
        self.record_change(change, op, actor).map(Some)
    }

    /// Records a rename as one FILE_RENAMED event carrying `previousPath`.
    pub fn record_file_rename(
        &mut self,
        from: &str,
        to: &str,
        actor: Actor,
    ) -> Result<Option<FileChangeEvent>, ProvenanceError> {
        if !self.enabled || !self.initialized {
            return Ok(None);
        }

        let previous = self.root.resolve(from, ResolveOptions::ANY)?;
        let resolved = self.root.resolve(to, ResolveOptions::EXISTING)?;
        let previous = self.relative(&previous);
        let relative = self.relative(&resolved);
        let is_dir = resolved.is_dir();
        if relative.is_empty() || is_dir {
            return Ok(None);
        }
        if self.ignore.is_ignored(&relative, false) && self.ignore.is_ignored(&previous, false) {
            return Ok(None);
        }

        let change = FileChange {
            path: relative,
            op: FileOp::Renamed,
            previous_path: Some(previous),
            hash_before: None,
            hash_after: self.hash_or_warn(&resolved),
        };
        self.record_change(change, FileOp::Renamed, actor).map(Some)
    }

    pub fn record_commit_blocked(
        &mut self,
        meta: Map<String, Value>,
    ) -> Result<(), ProvenanceError> {
        self.record_commit_event(EventType::CommitBlocked, meta)
    }

    pub fn record_commit_succeeded(
        &mut self,
        meta: Map<String, Value>,
    ) -> Result<(), ProvenanceError> {
        self.record_commit_event(EventType::CommitSucceeded, meta)
    }

    /// Records COMMIT_OVERRIDDEN and arms a one-shot override for the next
    /// commit check.
    pub fn override_untracked(
        &mut self,
        reason: &str,
        actor: Actor,
    ) -> Result<CommitOverride, ProvenanceError> {
        let granted = CommitOverride {
            reason: reason.to_string(),
            actor,
            timestamp: now_rfc3339()?,
        };

        if self.enabled && self.initialized {
            let mut meta = Map::new();
            meta.insert("reason".to_string(), Value::String(granted.reason.clone()));
            let event = FileChangeEvent::new(
                granted.timestamp.clone(),
                EventType::CommitOverridden,
                actor,
            )
            .with_run(self.active_run.clone())
            .with_meta(meta);
            self.record_event(event)?;
        }

        self.pending_override = Some(granted.clone());
        self.notify();
        Ok(granted)
    }

    /// Hands out the armed override at most once.
    pub fn consume_commit_override(&mut self) -> Option<CommitOverride> {
        self.pending_override.take()
    }

    /// Replays every ledger segment from an empty index and persists the
    /// result. Ledger problems are skipped; a failing index write is returned.
    pub fn rebuild_index_from_ledger(&mut self) -> Result<(), ProvenanceError> {
        let events = self.ledger.read_all();
        let mut index = ProvenanceIndex::from_events(&events);
        index.ledger_watermark = self.ledger.watermark();
        index.save(&self.index_path)?;
        tracing::debug!(events = events.len(), "provenance index rebuilt");

        self.index = index;
        if self.initialized {
            self.notify();
        }
        Ok(())
    }

    #[must_use]
    pub fn get_parity(&self) -> ParitySnapshot {
        self.index.latest_parity_snapshot.clone()
    }

    pub fn get_file_trace(&self, path: &str) -> Result<FileTrace, ProvenanceError> {
        let resolved = self.root.resolve(path, ResolveOptions::ANY)?;
        Ok(self.index.file_trace(&self.relative(&resolved)))
    }

    #[must_use]
    pub fn get_status(&self) -> TraceStatus {
        TraceStatus {
            enabled: self.enabled,
            initialized: self.initialized,
            active_run: self.active_run(),
            parity: self.get_parity(),
        }
    }

    #[must_use]
    pub fn active_run(&self) -> Option<RunRecord> {
        let run = self.active_run.as_ref()?;
        self.index.runs_by_id.get(&run.run_id).cloned()
    }

    #[must_use]
    pub fn index(&self) -> ProvenanceIndex {
        self.index.clone()
    }

    /// Registers a listener called with the status after every mutation.
    pub fn add_status_listener(
        &mut self,
        listener: impl Fn(&TraceStatus) + Send + 'static,
    ) -> ListenerId {
        let id = self.next_listener_id;
        self.next_listener_id += 1;
        self.listeners.push((id, Box::new(listener)));
        id
    }

    pub fn remove_status_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(listener_id, _)| *listener_id != id);
        self.listeners.len() != before
    }

    fn finish_run(&mut self, event_type: EventType) -> Result<Option<RunRecord>, ProvenanceError> {
        let Some(run) = self.active_run.clone() else {
            return Ok(None);
        };

        let event = FileChangeEvent::new(now_rfc3339()?, event_type, Actor::System)
            .with_run(Some(run.clone()));
        self.record_event(event)?;
        self.active_run = None;
        tracing::info!(run_id = %run.run_id, outcome = ?event_type, "run finished");
        self.notify();

        Ok(self.index.runs_by_id.get(&run.run_id).cloned())
    }

    fn record_change(
        &mut self,
        change: FileChange,
        op: FileOp,
        actor: Actor,
    ) -> Result<FileChangeEvent, ProvenanceError> {
        let event_type = if self.active_run.is_some() {
            EventType::for_op(op)
        } else {
            EventType::UntrackedChangeDetected
        };

        let event = FileChangeEvent::new(now_rfc3339()?, event_type, actor)
            .with_run(self.active_run.clone())
            .with_file(change);
        self.record_event(event.clone())?;
        self.notify();
        Ok(event)
    }

    fn record_commit_event(
        &mut self,
        event_type: EventType,
        meta: Map<String, Value>,
    ) -> Result<(), ProvenanceError> {
        if !self.enabled || !self.initialized {
            return Ok(());
        }

        let event = FileChangeEvent::new(now_rfc3339()?, event_type, Actor::System)
            .with_run(self.active_run.clone())
            .with_meta(meta);
        self.record_event(event)?;
        self.notify();
        Ok(())
    }

    /// Ledger append, then index fold and persist.
    fn record_event(&mut self, event: FileChangeEvent) -> Result<(), ProvenanceError> {
        let watermark = self.ledger.append(&event)?;
        self.index = apply_event_to_index(std::mem::take(&mut self.index), &event);
        self.index.ledger_watermark = watermark;
        self.index.save(&self.index_path)
    }

    fn ensure_recording(&self) -> Result<(), ProvenanceError> {
        if !self.enabled {
            return Err(ProvenanceError::Disabled);
        }
        if !self.initialized {
            return Err(ProvenanceError::NotInitialized);
        }
        Ok(())
    }

    fn hash_or_warn(&self, path: &Path) -> Option<String> {
        match hash_file(path) {
            Ok(hash) => Some(hash),
            Err(error) => {
                tracing::warn!(path = %self.relative(path), error = %error, "failed to hash file");
                None
            }
        }
    }

    fn relative(&self, resolved: &Path) -> String {
        self.root
            .relative(resolved)
            .unwrap_or_else(|| resolved.to_string_lossy().into_owned())
    }

    fn notify(&self) {
        if self.listeners.is_empty() {
            return;
        }

        let status = self.get_status();
        for (id, listener) in &self.listeners {
            if catch_unwind(AssertUnwindSafe(|| listener(&status))).is_err() {
                tracing::warn!(listener = id, "status listener panicked");
            }
        }
    }
}

fn now_rfc3339() -> Result<String, ProvenanceError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(ProvenanceError::ClockFormat)
}
