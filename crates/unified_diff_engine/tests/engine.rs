use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use unified_diff_engine::{apply_hunks, parse, FilePatchKind, PatchConflict, DEV_NULL};

#[test]
fn valid_patch_parse_and_apply() {
    let diff = "diff --git a/hello.txt b/hello.txt\n--- a/hello.txt\n+++ b/hello.txt\n@@ -1,2 +1,2 @@\n-hello\n+hello there\n world\n";

    let patches = parse(diff);
    assert_eq!(patches.len(), 1);
    let patch = &patches[0];
    assert_eq!(patch.old_path.as_deref(), Some("hello.txt"));
    assert_eq!(patch.new_path.as_deref(), Some("hello.txt"));
    assert_eq!(patch.kind(), FilePatchKind::Modify);

    let applied = apply_hunks("hello\nworld\n", &patch.hunks, patch.label()).expect("applies");
    assert_eq!(applied.render(false), "hello there\nworld\n");
    assert_eq!((applied.additions, applied.deletions), (1, 1));
}

#[test]
fn context_mismatch_reports_label_and_line() {
    let diff = "--- a/context.txt\n+++ b/context.txt\n@@ -2,1 +2,1 @@\n-missing\n+present\n";
    let patches = parse(diff);

    let error = apply_hunks("a\nb\n", &patches[0].hunks, patches[0].label())
        .expect_err("apply should fail");
    assert_matches!(
        &error,
        PatchConflict { line: 2, found: Some(found), .. } if found == "b"
    );
    assert!(error.to_string().contains("context.txt"), "{error}");
    assert!(error.to_string().contains("line 2"), "{error}");
}

#[test]
fn context_line_mismatch_is_detected_too() {
    let diff = "--- a/f\n+++ b/f\n@@ -1,2 +1,2 @@\n one\n-two\n+deux\n";
    let patches = parse(diff);

    let error = apply_hunks("uno\ntwo\n", &patches[0].hunks, "f").expect_err("conflict");
    assert_eq!(error.line, 1);
    assert_eq!(error.expected, "one");
}

#[test]
fn multi_file_diff_splits_per_file() {
    let diff = concat!(
        "diff --git a/src/lib.rs b/src/lib.rs\n",
        "index 83db48f..bf269f4 100644\n",
        "--- a/src/lib.rs\n",
        "+++ b/src/lib.rs\n",
        "@@ -1 +1 @@\n",
        "-old\n",
        "+new\n",
        "diff --git a/added.txt b/added.txt\n",
        "new file mode 100644\n",
        "--- /dev/null\n",
        "+++ b/added.txt\n",
        "@@ -0,0 +1,2 @@\n",
        "+first\n",
        "+second\n",
        "diff --git a/gone.txt b/gone.txt\n",
        "deleted file mode 100644\n",
        "--- a/gone.txt\n",
        "+++ /dev/null\n",
        "@@ -1 +0,0 @@\n",
        "-bye\n",
    );

    let patches = parse(diff);
    let kinds = patches.iter().map(|patch| patch.kind()).collect::<Vec<_>>();
    assert_eq!(
        kinds,
        vec![FilePatchKind::Modify, FilePatchKind::Add, FilePatchKind::Delete]
    );
    assert_eq!(patches[1].old_path.as_deref(), Some(DEV_NULL));
    assert_eq!(patches[1].label(), "added.txt");
    assert_eq!(patches[2].label(), "gone.txt");

    let added = apply_hunks("", &patches[1].hunks, patches[1].label()).expect("add");
    assert_eq!(added.render(true), "first\nsecond\n");

    let deleted = apply_hunks("bye\n", &patches[2].hunks, patches[2].label()).expect("delete");
    assert_eq!(deleted.render(false), "");
}

#[test]
fn plain_diffs_without_git_headers_are_split_on_old_header() {
    let diff = "--- a/one\n+++ b/one\n@@ -1 +1 @@\n-1\n+one\n--- a/two\n+++ b/two\n@@ -1 +1 @@\n-2\n+two\n";
    let patches = parse(diff);
    assert_eq!(patches.len(), 2);
    assert_eq!(patches[0].label(), "one");
    assert_eq!(patches[1].label(), "two");
}

#[test]
fn deletion_of_a_line_that_looks_like_a_header_stays_in_the_hunk() {
    let diff = "--- a/notes.md\n+++ b/notes.md\n@@ -1,2 +1,1 @@\n--- a/fake\n keep\n";
    let patches = parse(diff);
    assert_eq!(patches.len(), 1);
    assert_eq!(patches[0].hunks[0].lines, vec!["--- a/fake", " keep"]);

    let applied = apply_hunks("-- a/fake\nkeep\n", &patches[0].hunks, "notes.md").expect("apply");
    assert_eq!(applied.render(false), "keep\n");
}

#[test]
fn quoted_paths_and_renames() {
    let diff = "diff --git \"a/old name.txt\" \"b/new name.txt\"\n--- \"a/old name.txt\"\n+++ \"b/new name.txt\"\n@@ -1 +1 @@\n-x\n+y\n";
    let patches = parse(diff);
    assert_eq!(patches[0].old_path.as_deref(), Some("old name.txt"));
    assert_eq!(patches[0].new_path.as_deref(), Some("new name.txt"));
    assert_eq!(patches[0].kind(), FilePatchKind::Rename);
}

#[test]
fn update_keeps_missing_trailing_newline() {
    let diff = "--- a/f\n+++ b/f\n@@ -1 +1,2 @@\n-no newline at end\n\\ No newline at end of file\n+first line\n+second line\n\\ No newline at end of file\n";
    let patches = parse(diff);

    let applied =
        apply_hunks("no newline at end", &patches[0].hunks, "f").expect("apply");
    assert_eq!(applied.render(false), "first line\nsecond line");
}

#[test]
fn multiple_hunks_track_line_offsets() {
    let original = (1..=10).map(|n| format!("line{n}\n")).collect::<String>();
    let diff = concat!(
        "--- a/f\n+++ b/f\n",
        "@@ -2,2 +2,3 @@\n line2\n+inserted\n line3\n",
        "@@ -8,2 +9,1 @@\n-line8\n line9\n",
    );
    let patches = parse(diff);
    assert_eq!(patches[0].hunks.len(), 2);

    let applied = apply_hunks(&original, &patches[0].hunks, "f").expect("apply");
    let rendered = applied.render(false);
    assert!(rendered.starts_with("line1\nline2\ninserted\nline3\n"), "{rendered}");
    assert!(rendered.contains("line7\nline9\nline10\n"), "{rendered}");
    assert!(!rendered.contains("line8"));
}

#[test]
fn empty_input_yields_no_patches() {
    assert!(parse("").is_empty());
    assert!(parse("just some commit message\n").is_empty());
}
