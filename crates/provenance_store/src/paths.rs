use std::path::{Path, PathBuf};

use time::OffsetDateTime;

/// Storage directory relative to the workspace root.
pub const DEFAULT_STORAGE_DIR: &str = ".sdd/trace";
pub const LEDGER_FILE_NAME: &str = "trace.jsonl";
pub const INDEX_FILE_NAME: &str = "index.json";

const SEGMENT_PREFIX: &str = "trace";
const SEGMENT_EXTENSION: &str = ".jsonl";

#[must_use]
pub fn storage_root(workspace: &Path, storage_dir: &str) -> PathBuf {
    storage_dir
        .split(['/', '\\'])
        .filter(|part| !part.is_empty())
        .fold(workspace.to_path_buf(), |path, part| path.join(part))
}

/// Archive name for a ledger rotated at `at`:
/// `trace-YYYY-MM-DDTHH-MM-SS-mmmZ.jsonl`. Names sort in rotation order and
/// all sort before the active `trace.jsonl`.
#[must_use]
pub fn archive_file_name(at: OffsetDateTime) -> String {
    format!(
        "{SEGMENT_PREFIX}-{:04}-{:02}-{:02}T{:02}-{:02}-{:02}-{:03}Z{SEGMENT_EXTENSION}",
        at.year(),
        u8::from(at.month()),
        at.day(),
        at.hour(),
        at.minute(),
        at.second(),
        at.millisecond()
    )
}

/// Whether `name` is the active ledger or a rotated archive.
#[must_use]
pub fn is_ledger_segment(name: &str) -> bool {
    name == LEDGER_FILE_NAME
        || (name.starts_with(&format!("{SEGMENT_PREFIX}-")) && name.ends_with(SEGMENT_EXTENSION))
}
