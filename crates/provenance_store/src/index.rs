use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ProvenanceError;
use crate::ledger::LedgerWatermark;
use crate::schema::{DocRef, EventType, FileChangeEvent, FileOp, RunRef};

pub const INDEX_SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Stopped,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRecord {
    pub run_id: String,
    pub feature_id: String,
    pub task_id: String,
    pub started_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopped_at: Option<String>,
    pub status: RunStatus,
    #[serde(default)]
    pub inputs: Vec<DocRef>,
}

impl RunRecord {
    #[must_use]
    pub fn run_ref(&self) -> RunRef {
        RunRef {
            run_id: self.run_id.clone(),
            feature_id: self.feature_id.clone(),
            task_id: self.task_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParitySnapshot {
    pub tracked_file_changes: u64,
    pub untracked_file_changes: u64,
    pub tracked_ratio: f64,
    pub drift_files: Vec<String>,
    pub stale_docs: Vec<String>,
    pub updated_at: Option<String>,
}

impl Default for ParitySnapshot {
    fn default() -> Self {
        Self {
            tracked_file_changes: 0,
            untracked_file_changes: 0,
            tracked_ratio: 1.0,
            drift_files: Vec::new(),
            stale_docs: Vec::new(),
            updated_at: None,
        }
    }
}

impl ParitySnapshot {
    fn recompute_ratio(&mut self) {
        let total = self.tracked_file_changes + self.untracked_file_changes;
        self.tracked_ratio = if total == 0 {
            1.0
        } else {
            self.tracked_file_changes as f64 / total as f64
        };
    }
}

/// Materialized view over the ledger. Always reproducible by replaying every
/// segment through [`apply_event_to_index`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceIndex {
    pub schema_version: u32,
    pub runs_by_id: BTreeMap<String, RunRecord>,
    /// Path to run ids, most recent first.
    pub file_to_runs: BTreeMap<String, Vec<String>>,
    /// `featureId/taskId` to paths in first-touched order.
    pub task_to_files: BTreeMap<String, Vec<String>>,
    pub latest_parity_snapshot: ParitySnapshot,
    /// The ledger position this index reflects.
    #[serde(default)]
    pub ledger_watermark: LedgerWatermark,
}

impl Default for ProvenanceIndex {
    fn default() -> Self {
        Self {
            schema_version: INDEX_SCHEMA_VERSION,
            runs_by_id: BTreeMap::new(),
            file_to_runs: BTreeMap::new(),
            task_to_files: BTreeMap::new(),
            latest_parity_snapshot: ParitySnapshot::default(),
            ledger_watermark: LedgerWatermark::default(),
        }
    }
}

/// Runs that touched one file, most recent first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileTrace {
    pub path: String,
    pub runs: Vec<RunRecord>,
}

impl ProvenanceIndex {
    /// Folds `events` into an empty index.
    #[must_use]
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a FileChangeEvent>) -> Self {
        events
            .into_iter()
            .fold(Self::default(), |index, event| apply_event_to_index(index, event))
    }

    #[must_use]
    pub fn running_run(&self) -> Option<&RunRecord> {
        self.runs_by_id
            .values()
            .filter(|run| run.status == RunStatus::Running)
            .max_by(|left, right| left.started_at.cmp(&right.started_at))
    }

    #[must_use]
    pub fn file_trace(&self, path: &str) -> FileTrace {
        let runs = self
            .file_to_runs
            .get(path)
            .map(|run_ids| {
                run_ids
                    .iter()
                    .filter_map(|run_id| self.runs_by_id.get(run_id).cloned())
                    .collect()
            })
            .unwrap_or_default();

        FileTrace {
            path: path.to_string(),
            runs,
        }
    }

    /// Loads a persisted index. Returns `None` when the file is missing,
    /// unreadable, of another schema version, or references runs it does not
    /// contain; the caller rebuilds from the ledger in that case.
    #[must_use]
    pub fn load(path: &Path) -> Option<Self> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(path = %path.display(), error = %error, "failed to read index");
                }
                return None;
            }
        };

        let mut index = match serde_json::from_str::<Self>(&text) {
            Ok(index) => index,
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "discarding malformed index");
                return None;
            }
        };

        if index.schema_version != INDEX_SCHEMA_VERSION {
            tracing::warn!(
                found = index.schema_version,
                expected = INDEX_SCHEMA_VERSION,
                "discarding index with unsupported schema version"
            );
            return None;
        }

        let dangling = index
            .file_to_runs
            .values()
            .flatten()
            .any(|run_id| !index.runs_by_id.contains_key(run_id));
        if dangling {
            tracing::warn!(path = %path.display(), "discarding inconsistent index");
            return None;
        }

        index.latest_parity_snapshot.recompute_ratio();
        Some(index)
    }

    /// Writes the index through a temporary file and a rename, so readers
    /// never observe a partial document.
    pub fn save(&self, path: &Path) -> Result<(), ProvenanceError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|source| ProvenanceError::io("creating index directory", parent, source))?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|source| ProvenanceError::json_serialize("index", path, source))?;
        let temp = path.with_extension("json.tmp");
        fs::write(&temp, json)
            .map_err(|source| ProvenanceError::io("writing temporary index", &temp, source))?;
        fs::rename(&temp, path)
            .map_err(|source| ProvenanceError::io("replacing index", path, source))
    }
}

/// Folds one event into `index`. Pure: the result depends only on the inputs.
#[must_use]
pub fn apply_event_to_index(mut index: ProvenanceIndex, event: &FileChangeEvent) -> ProvenanceIndex {
    match event.event_type {
        EventType::RunStarted => {
            if let Some(run) = &event.run {
                index.runs_by_id.insert(
                    run.run_id.clone(),
                    RunRecord {
                        run_id: run.run_id.clone(),
                        feature_id: run.feature_id.clone(),
                        task_id: run.task_id.clone(),
                        started_at: event.timestamp.clone(),
                        stopped_at: None,
                        status: RunStatus::Running,
                        inputs: event.inputs(),
                    },
                );
            }
        }
        EventType::RunStopped | EventType::RunAborted => {
            if let Some(run) = &event.run {
                let status = if event.event_type == EventType::RunStopped {
                    RunStatus::Stopped
                } else {
                    RunStatus::Aborted
                };
                let record = index
                    .runs_by_id
                    .entry(run.run_id.clone())
                    .or_insert_with(|| RunRecord {
                        run_id: run.run_id.clone(),
                        feature_id: run.feature_id.clone(),
                        task_id: run.task_id.clone(),
                        started_at: event.timestamp.clone(),
                        stopped_at: None,
                        status,
                        inputs: Vec::new(),
                    });
                record.status = status;
                record.stopped_at = Some(event.timestamp.clone());
            }
        }
        event_type if event_type.is_file_event() => fold_file_event(&mut index, event),
        _ => {}
    }

    index.latest_parity_snapshot.updated_at = Some(event.timestamp.clone());
    index.latest_parity_snapshot.recompute_ratio();
    index
}

fn fold_file_event(index: &mut ProvenanceIndex, event: &FileChangeEvent) {
    let tracked_run = event
        .run
        .as_ref()
        .filter(|_| event.event_type != EventType::UntrackedChangeDetected);

    for file in &event.files {
        match tracked_run {
            Some(run) => {
                index.latest_parity_snapshot.tracked_file_changes += 1;

                let runs = index.file_to_runs.entry(file.path.clone()).or_default();
                runs.retain(|run_id| run_id != &run.run_id);
                runs.insert(0, run.run_id.clone());

                let files = index.task_to_files.entry(run.task_key()).or_default();
                push_unique(files, &file.path);
            }
            None => {
                index.latest_parity_snapshot.untracked_file_changes += 1;
                push_unique(&mut index.latest_parity_snapshot.drift_files, &file.path);
            }
        }

        if let Some(previous) = &file.previous_path {
            update_staleness(index, previous, None);
        }
        let hash = match file.op {
            FileOp::Deleted => None,
            _ => file.hash_after.as_deref(),
        };
        update_staleness(index, &file.path, hash);
    }
}

/// A run input is stale once its latest recorded content differs from the
/// hash stamped at run start, or it is gone. `hash == None` means deleted.
fn update_staleness(index: &mut ProvenanceIndex, path: &str, hash: Option<&str>) {
    let mut stamped = index
        .runs_by_id
        .values()
        .flat_map(|run| run.inputs.iter())
        .filter(|input| input.path == path)
        .peekable();
    if stamped.peek().is_none() {
        return;
    }

    let stale = match hash {
        Some(hash) => stamped.any(|input| input.hash != hash),
        None => true,
    };

    let stale_docs = &mut index.latest_parity_snapshot.stale_docs;
    if stale {
        push_unique(stale_docs, path);
    } else {
        stale_docs.retain(|doc| doc != path);
    }
}

fn push_unique(list: &mut Vec<String>, value: &str) {
    if !list.iter().any(|existing| existing == value) {
        list.push(value.to_string());
    }
}
