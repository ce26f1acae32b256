use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use uuid::Uuid;

/// Where deleted entries go. Deletion through the broker is never permanent.
pub trait Trash: Send + Sync {
    /// Moves `path` (file, directory or symlink) out of the way and returns its
    /// new location.
    fn trash(&self, path: &Path) -> io::Result<PathBuf>;
}

/// Moves entries into a plain directory, suffixing names that are already
/// taken. The directory should live outside the workspace.
#[derive(Debug, Clone)]
pub struct DirectoryTrash {
    dir: PathBuf,
}

impl DirectoryTrash {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn destination_for(&self, path: &Path) -> PathBuf {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "entry".to_string());

        let candidate = self.dir.join(&name);
        if fs::symlink_metadata(&candidate).is_err() {
            return candidate;
        }

        let suffix = Uuid::new_v4().simple().to_string();
        self.dir.join(format!("{name}.{}", &suffix[..8]))
    }
}

impl Trash for DirectoryTrash {
    fn trash(&self, path: &Path) -> io::Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let destination = self.destination_for(path);

        match fs::rename(path, &destination) {
            Ok(()) => {}
            #[cfg(unix)]
            Err(error) if error.raw_os_error() == Some(libc::EXDEV) => {
                copy_recursively(path, &destination)?;
                remove_recursively(path)?;
            }
            Err(error) => return Err(error),
        }

        tracing::debug!(trashed = %destination.display(), "moved entry to trash");
        Ok(destination)
    }
}

#[cfg(unix)]
fn copy_recursively(source: &Path, destination: &Path) -> io::Result<()> {
    let metadata = fs::symlink_metadata(source)?;
    if metadata.file_type().is_symlink() {
        std::os::unix::fs::symlink(fs::read_link(source)?, destination)
    } else if metadata.is_dir() {
        fs::create_dir_all(destination)?;
        for entry in fs::read_dir(source)? {
            let entry = entry?;
            copy_recursively(&entry.path(), &destination.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(source, destination).map(|_| ())
    }
}

#[cfg(unix)]
fn remove_recursively(path: &Path) -> io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}
