use std::path::Path;

use crate::error::{InvalidFilenameReason, PathGuardError};

pub const MAX_FILENAME_LENGTH: usize = 255;

/// Validates a single path segment. Confinement is a separate check; both are
/// required before a new name is introduced on disk.
pub fn validate_filename(name: &str) -> Result<(), PathGuardError> {
    filename_problem(name).map_or(Ok(()), |reason| {
        Err(PathGuardError::InvalidFilename {
            name: name.to_string(),
            reason,
        })
    })
}

/// Validates the final segment of an already-resolved path.
pub fn validate_leaf(path: &Path) -> Result<(), PathGuardError> {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    validate_filename(&name)
}

fn filename_problem(name: &str) -> Option<InvalidFilenameReason> {
    if name.is_empty() {
        return Some(InvalidFilenameReason::Empty);
    }

    let length = name.chars().count();
    if length > MAX_FILENAME_LENGTH {
        return Some(InvalidFilenameReason::TooLong { length });
    }

    for c in name.chars() {
        match c {
            '\u{0}'..='\u{1f}' => return Some(InvalidFilenameReason::ControlCharacter),
            '/' | '\\' => return Some(InvalidFilenameReason::PathSeparator),
            ':' if cfg!(windows) => return Some(InvalidFilenameReason::ReservedCharacter(':')),
            _ => {}
        }
    }

    None
}
