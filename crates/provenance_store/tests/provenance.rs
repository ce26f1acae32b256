use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use assert_matches::assert_matches;
use path_guard::WorkspaceRoot;
use pretty_assertions::assert_eq;
use provenance_store::{
    Actor, EventType, FileOp, ProvenanceError, ProvenanceService, RotationPolicy, RunStatus,
    TraceConfig, INDEX_FILE_NAME, LEDGER_FILE_NAME,
};
use serde_json::Map;
use tempfile::TempDir;

struct Workspace {
    _dir: TempDir,
    root: PathBuf,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir should be created");
        let root = dir.path().join("ws");
        fs::create_dir_all(root.join("src")).expect("workspace should be created");
        let root = root.canonicalize().expect("canonical root");
        Self { _dir: dir, root }
    }

    fn write(&self, relative: &str, content: &str) {
        let path = self.root.join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent should be created");
        }
        fs::write(path, content).expect("file should be written");
    }

    fn storage(&self) -> PathBuf {
        self.root.join(".sdd").join("trace")
    }

    fn ledger_lines(&self) -> usize {
        fs::read_to_string(self.storage().join(LEDGER_FILE_NAME))
            .map(|text| text.lines().count())
            .unwrap_or(0)
    }

    fn service(&self) -> ProvenanceService {
        self.service_with(TraceConfig::default())
    }

    fn service_with(&self, config: TraceConfig) -> ProvenanceService {
        let root = WorkspaceRoot::new(&self.root).expect("workspace root");
        let mut service = ProvenanceService::new(root, config);
        service.initialize().expect("initialize should succeed");
        service
    }
}

fn record(service: &mut ProvenanceService, path: &str, op: FileOp) {
    service
        .record_file_change(path, op, Actor::Agent, None, None)
        .expect("record should succeed")
        .expect("change should be recorded");
}

#[test]
fn rebuild_reproduces_the_incremental_index() {
    let ws = Workspace::new();
    ws.write("docs/plan.md", "plan v1");
    let mut service = ws.service();

    service
        .start_run("feat", "t1", &["docs/plan.md"])
        .expect("start run");
    ws.write("src/a.rs", "fn a() {}");
    record(&mut service, "src/a.rs", FileOp::Added);
    ws.write("docs/plan.md", "plan v2");
    record(&mut service, "docs/plan.md", FileOp::Modified);
    service.stop_run().expect("stop run");

    ws.write("src/b.rs", "fn b() {}");
    record(&mut service, "src/b.rs", FileOp::Added);

    service.start_run("feat", "t2", &[]).expect("start second run");
    fs::remove_file(ws.root.join("src/a.rs")).expect("remove");
    record(&mut service, "src/a.rs", FileOp::Deleted);
    service.abort_active_run().expect("abort");

    let incremental = service.index();
    service.rebuild_index_from_ledger().expect("rebuild");
    let rebuilt = service.index();

    assert_eq!(rebuilt.latest_parity_snapshot, incremental.latest_parity_snapshot);
    assert_eq!(rebuilt.file_to_runs, incremental.file_to_runs);
    assert_eq!(rebuilt.task_to_files, incremental.task_to_files);
    assert_eq!(rebuilt, incremental);

    let parity = &rebuilt.latest_parity_snapshot;
    assert_eq!(parity.tracked_file_changes, 3);
    assert_eq!(parity.untracked_file_changes, 1);
    assert_eq!(parity.drift_files, vec!["src/b.rs"]);
    assert_eq!(parity.stale_docs, vec!["docs/plan.md"]);
    assert_eq!(rebuilt.task_to_files["feat/t1"], vec!["src/a.rs", "docs/plan.md"]);
    assert_eq!(rebuilt.file_to_runs["src/a.rs"].len(), 2);
}

#[test]
fn a_fresh_service_rebuilds_a_missing_or_corrupt_index() {
    let ws = Workspace::new();
    let mut service = ws.service();
    service.start_run("feat", "t1", &[]).expect("start run");
    ws.write("src/a.rs", "x");
    record(&mut service, "src/a.rs", FileOp::Added);
    service.stop_run().expect("stop");
    let expected = service.index();
    drop(service);

    fs::remove_file(ws.storage().join(INDEX_FILE_NAME)).expect("remove index");
    assert_eq!(ws.service().index(), expected);

    fs::write(ws.storage().join(INDEX_FILE_NAME), "{\"schemaVersion\": 1").expect("corrupt");
    assert_eq!(ws.service().index(), expected);
}

#[test]
fn an_index_saved_behind_the_ledger_is_rebuilt_on_open() {
    let ws = Workspace::new();
    let index_path = ws.storage().join(INDEX_FILE_NAME);

    let mut service = ws.service();
    ws.write("src/a.txt", "a");
    record(&mut service, "src/a.txt", FileOp::Modified);
    let behind = fs::read(&index_path).expect("read index");
    ws.write("src/b.txt", "b");
    record(&mut service, "src/b.txt", FileOp::Modified);
    let current = service.index();
    drop(service);

    fs::write(&index_path, behind).expect("restore older index");
    let reopened = ws.service();

    let parity = reopened.get_parity();
    assert_eq!(parity.untracked_file_changes, 2);
    assert_eq!(parity.drift_files, vec!["src/a.txt", "src/b.txt"]);
    assert_eq!(reopened.index(), current);
}

#[test]
fn an_index_in_step_with_the_ledger_is_loaded_as_is() {
    let ws = Workspace::new();
    let mut service = ws.service();
    ws.write("src/a.txt", "a");
    record(&mut service, "src/a.txt", FileOp::Added);
    let saved = service.index();
    drop(service);

    assert_eq!(saved.ledger_watermark.active_lines, 1);
    assert_eq!(ws.service().index(), saved);
}

#[test]
fn tracked_ratio_is_half_after_one_of_each() {
    let ws = Workspace::new();
    let mut service = ws.service();
    assert_eq!(service.get_parity().tracked_ratio, 1.0);

    service.start_run("feat", "t1", &[]).expect("start run");
    ws.write("src/tracked.rs", "t");
    record(&mut service, "src/tracked.rs", FileOp::Added);
    service.stop_run().expect("stop");

    ws.write("src/untracked.rs", "u");
    record(&mut service, "src/untracked.rs", FileOp::Added);

    let parity = service.get_parity();
    assert_eq!(parity.tracked_file_changes, 1);
    assert_eq!(parity.untracked_file_changes, 1);
    assert_eq!(parity.tracked_ratio, 0.5);
}

#[test]
fn starting_a_second_run_changes_nothing() {
    let ws = Workspace::new();
    let mut service = ws.service();
    let first = service.start_run("feat", "t1", &[]).expect("start run");
    assert_eq!(first.status, RunStatus::Running);

    let lines = ws.ledger_lines();
    let index = service.index();

    let error = service.start_run("feat", "t2", &[]).expect_err("second run");
    assert_matches!(error, ProvenanceError::RunAlreadyActive { ref run_id } if run_id == &first.run_id);
    assert_eq!(ws.ledger_lines(), lines);
    assert_eq!(service.index(), index);
    assert_eq!(service.active_run().map(|run| run.run_id), Some(first.run_id));
}

#[test]
fn recording_is_a_no_op_until_initialized_or_when_disabled() {
    let ws = Workspace::new();
    ws.write("src/a.rs", "x");

    let root = WorkspaceRoot::new(&ws.root).expect("root");
    let mut service = ProvenanceService::new(root, TraceConfig::default());
    let recorded = service
        .record_file_change("src/a.rs", FileOp::Modified, Actor::Human, None, None)
        .expect("record");
    assert!(recorded.is_none());
    assert!(!ws.storage().join(LEDGER_FILE_NAME).exists());

    service.initialize().expect("initialize");
    service.set_enabled(false).expect("disable");
    let recorded = service
        .record_file_change("src/a.rs", FileOp::Modified, Actor::Human, None, None)
        .expect("record");
    assert!(recorded.is_none());
    assert_matches!(
        service.start_run("feat", "t1", &[]),
        Err(ProvenanceError::Disabled)
    );
}

#[test]
fn disabling_aborts_the_active_run() {
    let ws = Workspace::new();
    let mut service = ws.service();
    let run = service.start_run("feat", "t1", &[]).expect("start run");

    service.set_enabled(false).expect("disable");

    assert!(service.active_run().is_none());
    assert_eq!(service.index().runs_by_id[&run.run_id].status, RunStatus::Aborted);
    assert!(!service.get_status().enabled);
}

#[test]
fn stop_and_abort_without_a_run_are_no_ops() {
    let ws = Workspace::new();
    let mut service = ws.service();

    assert_eq!(service.stop_run().expect("stop"), None);
    assert_eq!(service.abort_active_run().expect("abort"), None);
    assert_eq!(ws.ledger_lines(), 0);
}

#[test]
fn events_carry_hashes_and_run_attribution() {
    let ws = Workspace::new();
    let mut service = ws.service();
    ws.write("src/a.rs", "abc");

    let untracked = service
        .record_file_change("src/a.rs", FileOp::Modified, Actor::Human, None, None)
        .expect("record")
        .expect("recorded");
    assert_eq!(untracked.event_type, EventType::UntrackedChangeDetected);
    assert!(untracked.run.is_none());
    assert_eq!(
        untracked.files[0].hash_after.as_deref(),
        Some("ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")
    );

    let run = service.start_run("feat", "t1", &[]).expect("start");
    fs::remove_file(ws.root.join("src/a.rs")).expect("remove");
    let deleted = service
        .record_file_change("src/a.rs", FileOp::Deleted, Actor::Agent, Some("h".into()), None)
        .expect("record")
        .expect("recorded");
    assert_eq!(deleted.event_type, EventType::FileDeleted);
    assert_eq!(deleted.run.map(|run| run.run_id), Some(run.run_id));
    assert_eq!(deleted.files[0].hash_before.as_deref(), Some("h"));
    assert_eq!(deleted.files[0].hash_after, None);
}

#[test]
fn renames_record_the_previous_path() {
    let ws = Workspace::new();
    let mut service = ws.service();
    ws.write("src/new.rs", "x");

    service.start_run("feat", "t1", &[]).expect("start");
    let event = service
        .record_file_rename("src/old.rs", "src/new.rs", Actor::Agent)
        .expect("record")
        .expect("recorded");

    assert_eq!(event.event_type, EventType::FileRenamed);
    assert_eq!(event.files[0].path, "src/new.rs");
    assert_eq!(event.files[0].previous_path.as_deref(), Some("src/old.rs"));
}

#[test]
fn paths_outside_the_workspace_are_security_errors() {
    let ws = Workspace::new();
    let mut service = ws.service();

    let error = service
        .record_file_change("../../etc/passwd", FileOp::Modified, Actor::Agent, None, None)
        .expect_err("escape");
    assert!(error.is_security_violation(), "{error}");

    let error = service.get_file_trace("/etc/passwd").expect_err("escape");
    assert!(error.is_security_violation(), "{error}");

    let error = service
        .start_run("feat", "t1", &["../outside.md"])
        .expect_err("escape");
    assert!(error.is_security_violation(), "{error}");
    assert_eq!(ws.ledger_lines(), 0);
}

#[test]
fn ignored_paths_and_directories_are_skipped() {
    let ws = Workspace::new();
    ws.write(".gitignore", "*.log\n");
    ws.write("build.log", "noise");
    ws.write(".git/HEAD", "ref");
    ws.write("src/a.rs", "x");
    let mut service = ws.service();

    for path in ["build.log", ".git/HEAD", "src"] {
        let recorded = service
            .record_file_change(path, FileOp::Modified, Actor::Human, None, None)
            .expect("record");
        assert!(recorded.is_none(), "{path} should be skipped");
    }

    ws.write(".gitignore", "*.log\nsrc/\n");
    let recorded = service
        .record_file_change("src/a.rs", FileOp::Modified, Actor::Human, None, None)
        .expect("record");
    assert!(recorded.is_none(), "updated .gitignore should apply");

    ws.write(".gitignore", "");
    ws.write("build.log", "more noise");
    let recorded = service
        .record_file_change("build.log", FileOp::Modified, Actor::Human, None, None)
        .expect("record");
    assert!(recorded.is_some(), "cleared .gitignore should apply");
}

#[test]
fn malformed_ledger_lines_are_skipped_on_rebuild() {
    let ws = Workspace::new();
    let mut service = ws.service();
    ws.write("src/a.rs", "x");
    record(&mut service, "src/a.rs", FileOp::Modified);
    record(&mut service, "src/a.rs", FileOp::Modified);

    let ledger = ws.storage().join(LEDGER_FILE_NAME);
    let text = fs::read_to_string(&ledger).expect("read ledger");
    let mut lines = text.lines().map(str::to_string).collect::<Vec<_>>();
    lines.insert(1, "{\"version\": 1, \"type\": \"FILE_ADDED\"".to_string());
    lines.insert(0, "not json at all".to_string());
    fs::write(&ledger, lines.join("\n") + "\n").expect("write ledger");

    service.rebuild_index_from_ledger().expect("rebuild");
    assert_eq!(service.get_parity().untracked_file_changes, 2);
}

#[test]
fn rotation_keeps_every_event_replayable() {
    let ws = Workspace::new();
    let config = TraceConfig {
        rotation: RotationPolicy {
            max_bytes: u64::MAX,
            max_lines: 3,
        },
        ..TraceConfig::default()
    };
    let mut service = ws.service_with(config);
    ws.write("src/a.rs", "x");
    for _ in 0..8 {
        record(&mut service, "src/a.rs", FileOp::Modified);
    }

    let segments = fs::read_dir(ws.storage())
        .expect("storage")
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().ends_with(".jsonl"))
        .count();
    assert_eq!(segments, 3);

    service.rebuild_index_from_ledger().expect("rebuild");
    assert_eq!(service.get_parity().untracked_file_changes, 8);
}

#[test]
fn override_is_consumed_exactly_once() {
    let ws = Workspace::new();
    let mut service = ws.service();

    let granted = service
        .override_untracked("hotfix", Actor::Human)
        .expect("override");
    assert_eq!(granted.reason, "hotfix");

    assert_eq!(service.consume_commit_override(), Some(granted));
    assert_eq!(service.consume_commit_override(), None);

    let text = fs::read_to_string(ws.storage().join(LEDGER_FILE_NAME)).expect("ledger");
    assert!(text.contains("COMMIT_OVERRIDDEN"), "{text}");
    assert!(text.contains("hotfix"), "{text}");
}

#[test]
fn commit_outcomes_are_recorded() {
    let ws = Workspace::new();
    let mut service = ws.service();

    let mut meta = Map::new();
    meta.insert("driftFiles".to_string(), serde_json::json!(["src/a.rs"]));
    service.record_commit_blocked(meta).expect("blocked");
    service.record_commit_succeeded(Map::new()).expect("succeeded");

    let text = fs::read_to_string(ws.storage().join(LEDGER_FILE_NAME)).expect("ledger");
    let types = text
        .lines()
        .map(|line| serde_json::from_str::<serde_json::Value>(line).expect("json")["type"].clone())
        .collect::<Vec<_>>();
    assert_eq!(types, vec!["COMMIT_BLOCKED", "COMMIT_SUCCEEDED"]);
}

#[test]
fn file_trace_lists_runs_most_recent_first() {
    let ws = Workspace::new();
    let mut service = ws.service();
    ws.write("src/a.rs", "x");

    let first = service.start_run("feat", "t1", &[]).expect("start");
    record(&mut service, "src/a.rs", FileOp::Modified);
    service.stop_run().expect("stop");
    let second = service.start_run("feat", "t2", &[]).expect("start");
    record(&mut service, "src/a.rs", FileOp::Modified);

    let trace = service.get_file_trace("src/a.rs").expect("trace");
    let ids = trace.runs.iter().map(|run| run.run_id.clone()).collect::<Vec<_>>();
    assert_eq!(ids, vec![second.run_id, first.run_id]);
}

#[test]
fn a_running_run_survives_a_restart() {
    let ws = Workspace::new();
    let run = {
        let mut service = ws.service();
        service.start_run("feat", "t1", &[]).expect("start")
    };

    let service = ws.service();
    assert_eq!(service.active_run().map(|active| active.run_id), Some(run.run_id));
}

#[test]
fn a_panicking_listener_does_not_affect_the_others() {
    let ws = Workspace::new();
    let mut service = ws.service();
    let calls = Arc::new(AtomicUsize::new(0));

    service.add_status_listener(|_| panic!("listener failure"));
    let counter = Arc::clone(&calls);
    let id = service.add_status_listener(move |status| {
        assert!(status.initialized);
        counter.fetch_add(1, Ordering::SeqCst);
    });

    service.start_run("feat", "t1", &[]).expect("start");
    service.stop_run().expect("stop");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    assert!(service.remove_status_listener(id));
    assert!(!service.remove_status_listener(id));
    service.start_run("feat", "t2", &[]).expect("start");
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
