//! Directory tree helpers
//!
//! All walks are iterative (walkdir keeps its own stack), lazy, and do not
//! follow symlinks, so a deep or hostile tree cannot blow the call stack or
//! lead us outside the starting directory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// Lazily list every entry below `root` (files and directories) accepted by
/// `filter`. Unreadable entries are skipped.
pub fn files_recursively<F>(root: &Path, filter: F) -> impl Iterator<Item = PathBuf>
where
    F: Fn(&Path) -> bool,
{
    WalkDir::new(root)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.into_path())
        .filter(move |p| filter(p))
}

pub fn count_files_recursively<F>(root: &Path, filter: F) -> usize
where
    F: Fn(&Path) -> bool,
{
    files_recursively(root, filter).count()
}

/// Delete a file, or a directory and everything in it.
///
/// Children are removed before their parents. A missing path is not an error.
pub fn delete_file_or_directory(path: &Path) -> io::Result<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    if !metadata.is_dir() {
        return fs::remove_file(path);
    }

    for entry in WalkDir::new(path).contents_first(true) {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_dir() {
            fs::remove_dir(entry.path())?;
        } else {
            fs::remove_file(entry.path())?;
        }
    }
    Ok(())
}

/// Remove everything inside `dir`, keeping `dir` itself.
///
/// Best effort: failures are logged and the rest of the directory is still
/// cleared.
pub fn empty_directory(dir: &Path) {
    let children = match fs::read_dir(dir) {
        Ok(children) => children,
        Err(e) => {
            warn!("Cannot list {}: {}", dir.display(), e);
            return;
        }
    };

    for child in children.filter_map(|c| c.ok()) {
        let path = child.path();
        if let Err(e) = delete_file_or_directory(&path) {
            warn!("Failed to delete {}: {}", path.display(), e);
        }
    }
}
