use std::path::{Path, MAIN_SEPARATOR};

use crate::confine::WorkspaceRoot;

/// Rewrites `raw` into a form safe to show in UI and logs: workspace-relative
/// when inside the root, the bare basename otherwise. Relative input is
/// returned unchanged.
#[must_use]
pub fn sanitize_path(raw: &str, root: &WorkspaceRoot) -> String {
    let path = Path::new(raw);
    if !path.is_absolute() {
        return raw.to_string();
    }

    match root.relative(path) {
        Some(relative) if relative.is_empty() => ".".to_string(),
        Some(relative) => relative,
        None => path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<path>".to_string()),
    }
}

/// Strips absolute workspace-root prefixes from free-form text such as OS error
/// messages.
#[must_use]
pub fn sanitize_message(message: &str, root: &WorkspaceRoot) -> String {
    let mut spellings = root
        .spellings()
        .iter()
        .map(|path| path.display().to_string())
        .filter(|spelling| spelling.len() > 1)
        .collect::<Vec<_>>();
    spellings.sort_by_key(|spelling| std::cmp::Reverse(spelling.len()));
    spellings.dedup();

    let mut sanitized = message.to_string();
    for spelling in &spellings {
        sanitized = sanitized.replace(&format!("{spelling}{MAIN_SEPARATOR}"), "");
        sanitized = sanitized.replace(spelling.as_str(), ".");
    }
    sanitized
}
