use crate::error::PatchConflict;
use crate::parse::PatchHunk;

/// Result of applying every hunk of one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedHunks {
    pub lines: Vec<String>,
    pub additions: usize,
    pub deletions: usize,
    pub had_trailing_newline: bool,
}

impl AppliedHunks {
    /// Serializes the patched lines. A trailing newline is kept when the
    /// original had one or the file is a pure addition; no lines means an empty
    /// string.
    #[must_use]
    pub fn render(&self, pure_addition: bool) -> String {
        if self.lines.is_empty() {
            return String::new();
        }

        let mut content = self.lines.join("\n");
        if self.had_trailing_newline || pure_addition {
            content.push('\n');
        }
        content
    }
}

/// Applies `hunks` to `original` in order.
///
/// Each hunk starts at `old_start - 1` shifted by the net line delta of the
/// hunks before it. Context and deletion lines must match exactly; the first
/// mismatch fails the whole file with its 1-based line number.
pub fn apply_hunks(
    original: &str,
    hunks: &[PatchHunk],
    label: &str,
) -> Result<AppliedHunks, PatchConflict> {
    let had_trailing_newline = original.ends_with('\n');
    let mut lines: Vec<String> = if original.is_empty() {
        Vec::new()
    } else {
        original.split('\n').map(str::to_string).collect()
    };
    if had_trailing_newline {
        lines.pop();
    }

    let mut offset: isize = 0;
    let mut additions = 0;
    let mut deletions = 0;

    for hunk in hunks {
        let start = (hunk.old_start as isize - 1 + offset).max(0);
        let mut index = start as usize;

        for line in &hunk.lines {
            let (marker, text) = split_marker(line);
            match marker {
                Some('\\') => {}
                Some('+') => {
                    if index > lines.len() {
                        return Err(PatchConflict::new(label, index + 1, text, None));
                    }
                    lines.insert(index, text.to_string());
                    index += 1;
                    additions += 1;
                    offset += 1;
                }
                Some('-') => {
                    expect_line(&lines, index, text, label)?;
                    lines.remove(index);
                    deletions += 1;
                    offset -= 1;
                }
                _ => {
                    expect_line(&lines, index, text, label)?;
                    index += 1;
                }
            }
        }
    }

    Ok(AppliedHunks {
        lines,
        additions,
        deletions,
        had_trailing_newline,
    })
}

fn split_marker(line: &str) -> (Option<char>, &str) {
    let mut chars = line.chars();
    match chars.next() {
        Some(marker @ (' ' | '+' | '-' | '\\')) => (Some(marker), chars.as_str()),
        Some(_) => (None, line),
        None => (None, ""),
    }
}

fn expect_line(
    lines: &[String],
    index: usize,
    expected: &str,
    label: &str,
) -> Result<(), PatchConflict> {
    match lines.get(index) {
        Some(found) if found == expected => Ok(()),
        found => Err(PatchConflict::new(
            label,
            index + 1,
            expected,
            found.map(String::as_str),
        )),
    }
}
