use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use crate::error::PathGuardError;
use crate::filename::validate_filename;

/// Whether path comparisons fold case on this platform.
pub const CASE_INSENSITIVE_PATHS: bool = cfg!(any(windows, target_os = "macos"));

const MAX_SYMLINK_HOPS: usize = 40;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveOptions {
    pub require_existing: bool,
}

impl ResolveOptions {
    pub const EXISTING: Self = Self {
        require_existing: true,
    };
    pub const ANY: Self = Self {
        require_existing: false,
    };
}

/// A workspace directory, canonicalized once when the workspace is opened.
///
/// Both the lexical form the caller opened and the canonical (symlink-free) form
/// are kept: raw absolute paths may be spelled against either one, but every
/// resolved path is expressed under the canonical form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceRoot {
    lexical: PathBuf,
    canonical: PathBuf,
}

impl WorkspaceRoot {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, PathGuardError> {
        let path = path.as_ref();
        let absolute = std::path::absolute(path)
            .map_err(|source| PathGuardError::io("resolving workspace root", path, source))?;
        let canonical = path
            .canonicalize()
            .map_err(|source| PathGuardError::io("resolving workspace root", path, source))?;

        if !canonical.is_dir() {
            return Err(PathGuardError::RootNotDirectory { path: canonical });
        }

        Ok(Self {
            lexical: normalize_lexically(&absolute),
            canonical,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.canonical
    }

    /// Display name of the workspace (its final directory component).
    #[must_use]
    pub fn name(&self) -> String {
        self.canonical
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.canonical.display().to_string())
    }

    pub fn resolve(&self, raw: &str, options: ResolveOptions) -> Result<PathBuf, PathGuardError> {
        resolve(raw, self, options)
    }

    /// Returns the `/`-separated path of `path` relative to the root, or `None`
    /// when it lies outside. The root itself maps to the empty string.
    #[must_use]
    pub fn relative(&self, path: &Path) -> Option<String> {
        let rest = strip_root(path, &self.canonical).or_else(|| strip_root(path, &self.lexical))?;
        Some(rest.join("/"))
    }

    #[must_use]
    pub fn contains(&self, path: &Path) -> bool {
        strip_root(path, &self.canonical).is_some()
    }

    pub(crate) fn spellings(&self) -> [&Path; 2] {
        [&self.canonical, &self.lexical]
    }

    fn rebase_lexical(&self, normalized: &Path) -> Option<PathBuf> {
        if let Some(rest) = strip_root(normalized, &self.canonical) {
            return Some(join_all(self.canonical.clone(), &rest));
        }

        strip_root(normalized, &self.lexical).map(|rest| join_all(self.canonical.clone(), &rest))
    }
}

/// Resolves `raw` against `root` and proves the result stays inside it.
///
/// The lexical check runs before any filesystem access. The second pass follows
/// symlinks along the existing-ancestor chain, so a link inside the workspace
/// cannot be used to reach (or later create) a file outside it. The returned
/// path has canonical ancestors and keeps the leaf as named, so operating on a
/// symlink acts on the link itself.
pub fn resolve(
    raw: &str,
    root: &WorkspaceRoot,
    options: ResolveOptions,
) -> Result<PathBuf, PathGuardError> {
    if raw.trim().is_empty() {
        return Err(PathGuardError::EmptyPath);
    }

    let raw_path = Path::new(raw);
    let candidate = if raw_path.is_absolute() {
        raw_path.to_path_buf()
    } else {
        root.canonical.join(raw_path)
    };

    let normalized = normalize_lexically(&candidate);
    let anchored = root
        .rebase_lexical(&normalized)
        .ok_or_else(|| PathGuardError::security(raw))?;

    let real = real_location(&anchored, raw).map_err(|error| name_error(root, &anchored, error))?;
    if !root.contains(&real) {
        tracing::debug!(path = raw, "rejected path resolving outside workspace via symlink");
        return Err(PathGuardError::security(raw));
    }

    if options.require_existing && !anchored.exists() {
        return Err(PathGuardError::NotFound {
            path: raw.to_string(),
        });
    }

    if paths_equal(&real, &root.canonical) {
        return Ok(root.canonical.clone());
    }

    let resolved = match (anchored.parent(), anchored.file_name()) {
        (Some(parent), Some(name)) => real_location(parent, raw)
            .map_err(|error| name_error(root, &anchored, error))?
            .join(name),
        _ => real,
    };

    if !root.contains(&resolved) {
        return Err(PathGuardError::security(raw));
    }

    Ok(resolved)
}

/// Collapses `.`, `..` and redundant separators without touching the disk.
/// `..` above the filesystem root is clamped to the root.
#[must_use]
pub fn normalize_lexically(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => match normalized.components().next_back() {
                Some(Component::Normal(_)) => {
                    normalized.pop();
                }
                Some(Component::RootDir) | Some(Component::Prefix(_)) => {}
                _ => normalized.push(".."),
            },
            other => normalized.push(other.as_os_str()),
        }
    }
    normalized
}

/// True when `path` equals `root` or lies beneath it, component-wise.
#[must_use]
pub fn is_within(path: &Path, root: &Path) -> bool {
    strip_root(path, root).is_some()
}

fn strip_root(path: &Path, root: &Path) -> Option<Vec<String>> {
    let mut components = path.components();
    for root_component in root.components() {
        match components.next() {
            Some(component) if components_equal(component, root_component) => {}
            _ => return None,
        }
    }

    Some(
        components
            .map(|component| component.as_os_str().to_string_lossy().into_owned())
            .collect(),
    )
}

fn components_equal(left: Component<'_>, right: Component<'_>) -> bool {
    if CASE_INSENSITIVE_PATHS {
        left.as_os_str().to_string_lossy().to_lowercase()
            == right.as_os_str().to_string_lossy().to_lowercase()
    } else {
        left == right
    }
}

fn paths_equal(left: &Path, right: &Path) -> bool {
    is_within(left, right) && is_within(right, left)
}

fn join_all(mut base: PathBuf, parts: &[String]) -> PathBuf {
    for part in parts {
        base.push(part);
    }
    base
}

/// Where `path` would live on disk once every existing symlink along it is
/// followed: the canonical nearest existing ancestor plus the missing suffix.
/// Dangling links are followed through their target.
fn real_location(path: &Path, raw: &str) -> Result<PathBuf, PathGuardError> {
    let mut current = path.to_path_buf();

    for _ in 0..MAX_SYMLINK_HOPS {
        let mut suffix: Vec<OsString> = Vec::new();
        let mut probe = current.as_path();

        let next = loop {
            match fs::symlink_metadata(probe) {
                Ok(metadata) => match probe.canonicalize() {
                    Ok(real) => return Ok(join_suffix(real, &suffix)),
                    Err(source)
                        if source.kind() == ErrorKind::NotFound
                            && metadata.file_type().is_symlink() =>
                    {
                        let target = fs::read_link(probe)
                            .map_err(|source| PathGuardError::io("reading symlink", probe, source))?;
                        let base = probe.parent().unwrap_or(probe);
                        break join_suffix(normalize_lexically(&base.join(target)), &suffix);
                    }
                    Err(source) => {
                        return Err(PathGuardError::io("canonicalizing path", probe, source));
                    }
                },
                Err(source) if source.kind() == ErrorKind::NotFound => {
                    let (Some(parent), Some(name)) = (probe.parent(), probe.file_name()) else {
                        return Err(PathGuardError::io("inspecting path", probe, source));
                    };
                    suffix.push(name.to_os_string());
                    probe = parent;
                }
                Err(source) => {
                    return Err(PathGuardError::io("inspecting path", probe, source));
                }
            }
        };

        current = next;
    }

    Err(PathGuardError::SymlinkLoop {
        path: raw.to_string(),
    })
}

/// The OS refuses to inspect some names outright (overlong segments, NUL
/// bytes). Report those as invalid names rather than raw I/O failures.
fn name_error(root: &WorkspaceRoot, anchored: &Path, error: PathGuardError) -> PathGuardError {
    if !matches!(error, PathGuardError::Io { .. }) {
        return error;
    }

    strip_root(anchored, &root.canonical)
        .unwrap_or_default()
        .iter()
        .find_map(|segment| validate_filename(segment).err())
        .unwrap_or(error)
}

fn join_suffix(mut base: PathBuf, suffix: &[OsString]) -> PathBuf {
    for part in suffix.iter().rev() {
        base.push(part);
    }
    base
}
