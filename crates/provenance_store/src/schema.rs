use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EVENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    RunStarted,
    RunStopped,
    RunAborted,
    FileModified,
    FileAdded,
    FileDeleted,
    FileRenamed,
    UntrackedChangeDetected,
    CommitOverridden,
    CommitBlocked,
    CommitSucceeded,
}

impl EventType {
    /// The tracked event type for a file operation.
    #[must_use]
    pub fn for_op(op: FileOp) -> Self {
        match op {
            FileOp::Modified => Self::FileModified,
            FileOp::Added => Self::FileAdded,
            FileOp::Deleted => Self::FileDeleted,
            FileOp::Renamed => Self::FileRenamed,
        }
    }

    #[must_use]
    pub fn is_file_event(self) -> bool {
        matches!(
            self,
            Self::FileModified
                | Self::FileAdded
                | Self::FileDeleted
                | Self::FileRenamed
                | Self::UntrackedChangeDetected
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    Agent,
    Human,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOp {
    Modified,
    Added,
    Deleted,
    Renamed,
}

impl std::str::FromStr for FileOp {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "modified" => Ok(Self::Modified),
            "added" => Ok(Self::Added),
            "deleted" => Ok(Self::Deleted),
            "renamed" => Ok(Self::Renamed),
            other => Err(format!(
                "unknown file op '{other}'; expected modified, added, deleted or renamed"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRef {
    pub run_id: String,
    pub feature_id: String,
    pub task_id: String,
}

impl RunRef {
    /// Key used by `taskToFiles`.
    #[must_use]
    pub fn task_key(&self) -> String {
        format!("{}/{}", self.feature_id, self.task_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileChange {
    /// Workspace-relative, `/`-separated.
    pub path: String,
    pub op: FileOp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash_after: Option<String>,
}

/// A run input document stamped with its content hash at run start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocRef {
    pub path: String,
    pub hash: String,
}

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub version: u32,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub actor: Actor,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<RunRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileChange>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub meta: Map<String, Value>,
}

impl FileChangeEvent {
    #[must_use]
    pub fn new(timestamp: impl Into<String>, event_type: EventType, actor: Actor) -> Self {
        Self {
            version: EVENT_VERSION,
            timestamp: timestamp.into(),
            event_type,
            actor,
            run: None,
            files: Vec::new(),
            meta: Map::new(),
        }
    }

    #[must_use]
    pub fn with_run(mut self, run: Option<RunRef>) -> Self {
        self.run = run;
        self
    }

    #[must_use]
    pub fn with_file(mut self, file: FileChange) -> Self {
        self.files.push(file);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, meta: Map<String, Value>) -> Self {
        self.meta = meta;
        self
    }

    /// Input documents carried by a RUN_STARTED event. Entries that do not
    /// parse are dropped.
    #[must_use]
    pub fn inputs(&self) -> Vec<DocRef> {
        self.meta
            .get("inputs")
            .and_then(Value::as_array)
            .map(|inputs| {
                inputs
                    .iter()
                    .filter_map(|input| serde_json::from_value(input.clone()).ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}
