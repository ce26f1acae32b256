use std::sync::OnceLock;

use regex::Regex;

pub const DEV_NULL: &str = "/dev/null";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilePatch {
    pub old_path: Option<String>,
    pub new_path: Option<String>,
    pub hunks: Vec<PatchHunk>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePatchKind {
    Add,
    Delete,
    Rename,
    Modify,
}

impl FilePatch {
    #[must_use]
    pub fn kind(&self) -> FilePatchKind {
        match (self.old_path.as_deref(), self.new_path.as_deref()) {
            (Some(DEV_NULL), _) | (None, Some(_)) => FilePatchKind::Add,
            (_, Some(DEV_NULL)) => FilePatchKind::Delete,
            (Some(old), Some(new)) if old != new => FilePatchKind::Rename,
            _ => FilePatchKind::Modify,
        }
    }

    /// The path a reader would name this file by: the new path, unless the file
    /// is being deleted.
    #[must_use]
    pub fn label(&self) -> &str {
        match (self.old_path.as_deref(), self.new_path.as_deref()) {
            (_, Some(new)) if new != DEV_NULL => new,
            (Some(old), _) => old,
            _ => "<unknown>",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchHunk {
    pub old_start: usize,
    pub old_lines: usize,
    pub new_start: usize,
    pub new_lines: usize,
    pub lines: Vec<String>,
}

/// Lines of the current hunk body still expected on the old and new side.
#[derive(Debug, Clone, Copy, Default)]
struct Remaining {
    old: usize,
    new: usize,
}

impl Remaining {
    fn is_done(self) -> bool {
        self.old == 0 && self.new == 0
    }

    fn consume(&mut self, marker: u8) {
        match marker {
            b'-' => self.old = self.old.saturating_sub(1),
            b'+' => self.new = self.new.saturating_sub(1),
            _ => {
                self.old = self.old.saturating_sub(1);
                self.new = self.new.saturating_sub(1);
            }
        }
    }
}

fn hunk_header_regex() -> &'static Regex {
    static CACHED: OnceLock<Regex> = OnceLock::new();
    CACHED.get_or_init(|| {
        Regex::new(r"^@@ -(\d+)(,(\d+))? \+(\d+)(,(\d+))? @@")
            .expect("hunk header regex must compile")
    })
}

/// Splits unified-diff text into per-file patches.
///
/// Parsing is lenient: lines outside any recognised header or hunk body
/// (`index`, mode lines, commit preambles) are ignored.
#[must_use]
pub fn parse(diff_text: &str) -> Vec<FilePatch> {
    let mut patches = Vec::new();
    let mut current: Option<FilePatch> = None;
    let mut saw_old_header = false;
    let mut remaining = Remaining::default();

    for line in diff_text.split('\n') {
        if let Some(hunk) = current.as_mut().and_then(|patch| patch.hunks.last_mut()) {
            if line.starts_with('\\') {
                hunk.lines.push(line.to_string());
                continue;
            }

            if !remaining.is_done() {
                match line.as_bytes().first().copied() {
                    Some(marker @ (b' ' | b'-' | b'+')) => {
                        remaining.consume(marker);
                        hunk.lines.push(line.to_string());
                        continue;
                    }
                    None => {
                        remaining.consume(b' ');
                        hunk.lines.push(" ".to_string());
                        continue;
                    }
                    _ => {}
                }
            }
        }

        if let Some(rest) = line.strip_prefix("diff --git ") {
            patches.extend(current.take());
            saw_old_header = false;
            let (old_path, new_path) = parse_git_header_paths(rest);
            current = Some(FilePatch {
                old_path,
                new_path,
                hunks: Vec::new(),
            });
        } else if let Some(rest) = line.strip_prefix("--- ") {
            let starts_new_file = match &current {
                None => true,
                Some(patch) => saw_old_header || !patch.hunks.is_empty(),
            };
            if starts_new_file {
                patches.extend(current.take());
                current = Some(FilePatch::default());
            }
            saw_old_header = true;
            if let Some(patch) = current.as_mut() {
                patch.old_path = Some(parse_header_path(rest));
            }
        } else if let Some(rest) = line.strip_prefix("+++ ") {
            let patch = current.get_or_insert_with(FilePatch::default);
            patch.new_path = Some(parse_header_path(rest));
        } else if let Some(hunk) = parse_hunk_header(line) {
            remaining = Remaining {
                old: hunk.old_lines,
                new: hunk.new_lines,
            };
            current
                .get_or_insert_with(FilePatch::default)
                .hunks
                .push(hunk);
        }
    }

    patches.extend(current);
    patches
}

fn parse_hunk_header(line: &str) -> Option<PatchHunk> {
    let captures = hunk_header_regex().captures(line)?;
    let number = |index: usize, default: usize| {
        captures
            .get(index)
            .and_then(|value| value.as_str().parse::<usize>().ok())
            .unwrap_or(default)
    };

    Some(PatchHunk {
        old_start: number(1, 0),
        old_lines: number(3, 1),
        new_start: number(4, 0),
        new_lines: number(6, 1),
        lines: Vec::new(),
    })
}

fn parse_git_header_paths(rest: &str) -> (Option<String>, Option<String>) {
    let (old, remainder) = take_path_token(rest);
    let (new, _) = take_path_token(remainder.trim_start());
    (
        old.map(|path| strip_side_prefix(&path)),
        new.map(|path| strip_side_prefix(&path)),
    )
}

fn parse_header_path(rest: &str) -> String {
    let (path, _) = take_path_token(rest);
    strip_side_prefix(&path.unwrap_or_default())
}

/// Reads one path token: a C-style quoted string, or everything up to the first
/// whitespace.
fn take_path_token(input: &str) -> (Option<String>, &str) {
    if let Some(quoted) = input.strip_prefix('"') {
        return unquote(quoted);
    }

    let end = input
        .find(char::is_whitespace)
        .unwrap_or(input.len());
    if end == 0 {
        return (None, input);
    }
    (Some(input[..end].to_string()), &input[end..])
}

fn unquote(input: &str) -> (Option<String>, &str) {
    let mut bytes = Vec::new();
    let mut chars = input.char_indices();

    while let Some((index, c)) = chars.next() {
        match c {
            '"' => {
                let rest = &input[index + 1..];
                return (Some(String::from_utf8_lossy(&bytes).into_owned()), rest);
            }
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                match escaped {
                    'n' => bytes.push(b'\n'),
                    't' => bytes.push(b'\t'),
                    'r' => bytes.push(b'\r'),
                    '0'..='7' => {
                        let mut value = escaped.to_digit(8).unwrap_or(0);
                        for _ in 0..2 {
                            match chars.clone().next() {
                                Some((_, digit @ '0'..='7')) => {
                                    value = value * 8 + digit.to_digit(8).unwrap_or(0);
                                    chars.next();
                                }
                                _ => break,
                            }
                        }
                        bytes.push((value & 0xff) as u8);
                    }
                    other => {
                        let mut buffer = [0u8; 4];
                        bytes.extend_from_slice(other.encode_utf8(&mut buffer).as_bytes());
                    }
                }
            }
            other => {
                let mut buffer = [0u8; 4];
                bytes.extend_from_slice(other.encode_utf8(&mut buffer).as_bytes());
            }
        }
    }

    // Unterminated quote: take what was read.
    (Some(String::from_utf8_lossy(&bytes).into_owned()), "")
}

fn strip_side_prefix(path: &str) -> String {
    path.strip_prefix("a/")
        .or_else(|| path.strip_prefix("b/"))
        .unwrap_or(path)
        .to_string()
}
