use thiserror::Error;

/// A context or deletion line that does not match the file at the expected
/// position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("patch conflict in {label} at line {line}: expected {expected:?}, found {}", describe_found(.found))]
pub struct PatchConflict {
    pub label: String,
    /// 1-based line number in the file as it stood when the mismatch was found.
    pub line: usize,
    pub expected: String,
    pub found: Option<String>,
}

impl PatchConflict {
    #[must_use]
    pub fn new(label: &str, line: usize, expected: &str, found: Option<&str>) -> Self {
        Self {
            label: label.to_string(),
            line,
            expected: expected.to_string(),
            found: found.map(str::to_string),
        }
    }
}

fn describe_found(found: &Option<String>) -> String {
    match found {
        Some(line) => format!("{line:?}"),
        None => "end of file".to_string(),
    }
}
