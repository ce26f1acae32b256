use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ignore::gitignore::{Gitignore, GitignoreBuilder};

const GITIGNORE_FILE_NAME: &str = ".gitignore";
const VCS_DIR: &str = ".git";

/// Identifies one on-disk version of `.gitignore`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Stamp {
    modified: Option<SystemTime>,
    len: u64,
}

#[derive(Debug)]
struct Cached {
    stamp: Stamp,
    matcher: Gitignore,
}

/// Decides which workspace paths the recorder skips: the VCS metadata
/// directory, the ledger's own storage directory, and anything the workspace
/// `.gitignore` excludes.
///
/// The parsed `.gitignore` is cached and rebuilt whenever its modification
/// time or size changes.
#[derive(Debug)]
pub struct IgnoreMatcher {
    root: PathBuf,
    default_dirs: Vec<String>,
    cached: Option<Cached>,
}

impl IgnoreMatcher {
    /// `storage_dir` is the workspace-relative ledger directory; its first
    /// component is ignored wholesale.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>, storage_dir: &str) -> Self {
        let mut default_dirs = vec![VCS_DIR.to_string()];
        if let Some(first) = storage_dir.split(['/', '\\']).find(|part| !part.is_empty()) {
            if first != VCS_DIR {
                default_dirs.push(first.to_string());
            }
        }

        Self {
            root: root.into(),
            default_dirs,
            cached: None,
        }
    }

    #[must_use]
    pub fn default_dirs(&self) -> &[String] {
        &self.default_dirs
    }

    /// `relative` is a `/`-separated workspace-relative path.
    pub fn is_ignored(&mut self, relative: &str, is_dir: bool) -> bool {
        let Some(first) = relative.split('/').find(|part| !part.is_empty()) else {
            return false;
        };
        if self.default_dirs.iter().any(|dir| dir == first) {
            return true;
        }

        let absolute = relative
            .split('/')
            .filter(|part| !part.is_empty())
            .fold(self.root.clone(), |path, part| path.join(part));

        match self.matcher() {
            Some(matcher) => matcher
                .matched_path_or_any_parents(&absolute, is_dir)
                .is_ignore(),
            None => false,
        }
    }

    fn matcher(&mut self) -> Option<&Gitignore> {
        let path = self.root.join(GITIGNORE_FILE_NAME);
        let stamp = match fs::metadata(&path) {
            Ok(metadata) => Stamp {
                modified: metadata.modified().ok(),
                len: metadata.len(),
            },
            Err(_) => {
                self.cached = None;
                return None;
            }
        };

        let stale = self
            .cached
            .as_ref()
            .map_or(true, |cached| cached.stamp != stamp);
        if stale {
            self.cached = Some(Cached {
                stamp,
                matcher: build_matcher(&self.root, &path),
            });
        }

        self.cached.as_ref().map(|cached| &cached.matcher)
    }
}

fn build_matcher(root: &Path, gitignore: &Path) -> Gitignore {
    let mut builder = GitignoreBuilder::new(root);
    if let Some(error) = builder.add(gitignore) {
        tracing::warn!(error = %error, "failed to read .gitignore; using defaults");
        return Gitignore::empty();
    }

    match builder.build() {
        Ok(matcher) => {
            tracing::debug!(patterns = matcher.num_ignores(), "loaded .gitignore");
            matcher
        }
        Err(error) => {
            tracing::warn!(error = %error, "failed to parse .gitignore; using defaults");
            Gitignore::empty()
        }
    }
}
