use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use crate::error::ProvenanceError;
use crate::paths::{archive_file_name, is_ledger_segment, LEDGER_FILE_NAME};
use crate::schema::FileChangeEvent;

pub const DEFAULT_MAX_BYTES: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_LINES: usize = 50_000;

/// When the active ledger is archived. Either ceiling triggers independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_lines: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_BYTES,
            max_lines: DEFAULT_MAX_LINES,
        }
    }
}

/// Where the active segment ends: its line count and the timestamp of its
/// newest event. The index stores the watermark it was folded up to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerWatermark {
    pub active_lines: usize,
    pub last_event_at: Option<String>,
}

/// Append-only JSON Lines log: the active `trace.jsonl` plus rotated archives
/// in the same directory. Assumes a single writer.
#[derive(Debug)]
pub struct Ledger {
    dir: PathBuf,
    policy: RotationPolicy,
    line_count: Option<usize>,
}

impl Ledger {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>, policy: RotationPolicy) -> Self {
        Self {
            dir: dir.into(),
            policy,
            line_count: None,
        }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn path(&self) -> PathBuf {
        self.dir.join(LEDGER_FILE_NAME)
    }

    #[must_use]
    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }

    /// Appends one event as a single line, rotating first when a ceiling has
    /// been reached. Returns the watermark after the append.
    pub fn append(
        &mut self,
        event: &FileChangeEvent,
    ) -> Result<LedgerWatermark, ProvenanceError> {
        let path = self.path();
        fs::create_dir_all(&self.dir).map_err(|source| {
            ProvenanceError::io("creating ledger directory", &self.dir, source)
        })?;
        self.rotate_if_needed();

        let mut line = serde_json::to_string(event)
            .map_err(|source| ProvenanceError::json_serialize("ledger event", &path, source))?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| ProvenanceError::io("opening ledger for append", &path, source))?;
        file.write_all(line.as_bytes())
            .map_err(|source| ProvenanceError::io("appending to ledger", &path, source))?;

        let active_lines = match self.line_count.as_mut() {
            Some(count) => {
                *count += 1;
                *count
            }
            None => count_lines(&path).unwrap_or(0),
        };
        Ok(LedgerWatermark {
            active_lines,
            last_event_at: Some(event.timestamp.clone()),
        })
    }

    /// Reads the watermark of the active segment from disk.
    #[must_use]
    pub fn watermark(&self) -> LedgerWatermark {
        let path = self.path();
        let last_event_at = read_segment(&path)
            .ok()
            .and_then(|events| events.last().map(|event| event.timestamp.clone()));
        LedgerWatermark {
            active_lines: count_lines(&path).unwrap_or(0),
            last_event_at,
        }
    }

    /// Archives the active ledger when it has reached a ceiling. Returns the
    /// archive path. Failures are logged and leave the active ledger in place.
    pub fn rotate_if_needed(&mut self) -> Option<PathBuf> {
        let path = self.path();
        let size = match fs::metadata(&path) {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                self.line_count = Some(0);
                return None;
            }
        };

        let lines = match self.line_count {
            Some(count) => count,
            None => match count_lines(&path) {
                Ok(count) => {
                    self.line_count = Some(count);
                    count
                }
                Err(error) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %error,
                        "failed to count ledger lines"
                    );
                    0
                }
            },
        };

        if size < self.policy.max_bytes && lines < self.policy.max_lines {
            return None;
        }

        let archive = self.free_archive_path(OffsetDateTime::now_utc());
        match fs::rename(&path, &archive) {
            Ok(()) => {
                tracing::info!(
                    archive = %archive.display(),
                    bytes = size,
                    lines,
                    "rotated provenance ledger"
                );
                self.line_count = Some(0);
                Some(archive)
            }
            Err(error) => {
                tracing::warn!(path = %path.display(), error = %error, "ledger rotation failed");
                None
            }
        }
    }

    /// Every segment, archives first, in filename order.
    #[must_use]
    pub fn segments(&self) -> Vec<PathBuf> {
        let reader = match fs::read_dir(&self.dir) {
            Ok(reader) => reader,
            Err(error) => {
                if error.kind() != std::io::ErrorKind::NotFound {
                    tracing::warn!(
                        dir = %self.dir.display(),
                        error = %error,
                        "failed to list ledger segments"
                    );
                }
                return Vec::new();
            }
        };

        let mut segments = reader
            .filter_map(Result::ok)
            .filter(|entry| is_ledger_segment(&entry.file_name().to_string_lossy()))
            .map(|entry| entry.path())
            .collect::<Vec<_>>();
        segments.sort();
        segments
    }

    /// Every event across all segments. Unreadable segments and malformed
    /// lines are skipped.
    #[must_use]
    pub fn read_all(&self) -> Vec<FileChangeEvent> {
        let mut events = Vec::new();
        for segment in self.segments() {
            match read_segment(&segment) {
                Ok(mut parsed) => events.append(&mut parsed),
                Err(error) => {
                    tracing::warn!(error = %error, "skipping unreadable ledger segment");
                }
            }
        }
        events
    }

    fn free_archive_path(&self, now: OffsetDateTime) -> PathBuf {
        let mut at = now;
        loop {
            let candidate = self.dir.join(archive_file_name(at));
            if fs::symlink_metadata(&candidate).is_err() {
                return candidate;
            }
            at += Duration::milliseconds(1);
        }
    }
}

/// Parses one segment, skipping lines that are not valid events. A read error
/// part way through keeps the events parsed so far.
pub fn read_segment(path: &Path) -> Result<Vec<FileChangeEvent>, ProvenanceError> {
    let file = File::open(path)
        .map_err(|source| ProvenanceError::io("opening ledger segment", path, source))?;
    let reader = BufReader::new(file);

    let mut events = Vec::new();
    for (line_index, line_result) in reader.split(b'\n').enumerate() {
        let line_number = line_index + 1;
        let line = match line_result {
            Ok(line) => line,
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_number,
                    error = %error,
                    "stopped reading ledger segment"
                );
                break;
            }
        };

        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }

        match serde_json::from_slice::<FileChangeEvent>(&line) {
            Ok(event) => events.push(event),
            Err(error) => {
                tracing::warn!(
                    path = %path.display(),
                    line = line_number,
                    error = %error,
                    "skipping malformed ledger line"
                );
            }
        }
    }

    Ok(events)
}

fn count_lines(path: &Path) -> std::io::Result<usize> {
    let reader = BufReader::new(File::open(path)?);
    let mut count = 0;
    for line in reader.split(b'\n') {
        line?;
        count += 1;
    }
    Ok(count)
}
