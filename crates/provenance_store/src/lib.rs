//! Provenance tracing: an append-only JSON Lines ledger of file-change events,
//! a rebuildable index attributing changes to runs, and the service that
//! records into both.

mod error;
mod hash;
mod ignore;
mod index;
mod ledger;
mod paths;
mod schema;
mod service;

pub use error::ProvenanceError;
pub use hash::{content_hash, hash_file};
pub use ignore::IgnoreMatcher;
pub use index::{
    apply_event_to_index, FileTrace, ParitySnapshot, ProvenanceIndex, RunRecord, RunStatus,
    INDEX_SCHEMA_VERSION,
};
pub use ledger::{
    read_segment, Ledger, LedgerWatermark, RotationPolicy, DEFAULT_MAX_BYTES, DEFAULT_MAX_LINES,
};
pub use paths::{
    archive_file_name, is_ledger_segment, storage_root, DEFAULT_STORAGE_DIR, INDEX_FILE_NAME,
    LEDGER_FILE_NAME,
};
pub use schema::{
    Actor, DocRef, EventType, FileChange, FileChangeEvent, FileOp, RunRef, EVENT_VERSION,
};
pub use service::{CommitOverride, ListenerId, ProvenanceService, TraceConfig, TraceStatus};
