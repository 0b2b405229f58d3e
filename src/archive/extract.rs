//! Package extraction.
//!
//! Every entry's output path is resolved to its canonical absolute form and
//! must stay inside the canonical target directory. An entry that escapes
//! aborts the whole extraction with `PathTraversal`; entries written before
//! the offending one are left in place.
//!
//! Entry data is streamed with the short-read-tolerant copy loop. If an entry
//! fails mid-copy its partially written file is removed.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{ArchiveError, Result};
use crate::source::{ArchiveSource, FileSource};

use super::entry::copy_entry;
use super::open_zip;

/// Extraction statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExtractStats {
    pub files: usize,
    pub directories: usize,
    pub bytes: u64,
}

/// Extract every entry of `source` into `target_dir`.
///
/// The target directory is created if it does not exist.
pub fn extract(source: &dyn ArchiveSource, target_dir: &Path) -> Result<ExtractStats> {
    fs::create_dir_all(target_dir)?;
    let root = fs::canonicalize(target_dir)?;

    let archive_name = source.display_name();
    let mut archive = open_zip(source)?;
    let mut stats = ExtractStats::default();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ArchiveError::unreadable(&archive_name, e))?;
        let entry_name = file.name().to_string();
        let out_path = resolve_within(&root, &entry_name)?;

        if file.is_dir() {
            fs::create_dir_all(&out_path)?;
            stats.directories += 1;
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let declared = file.size();
        stats.bytes += write_entry_file(&mut file, &entry_name, declared, &out_path)?;
        stats.files += 1;
    }

    info!(
        "Extracted {} ({} files, {} bytes) to {}",
        archive_name,
        stats.files,
        stats.bytes,
        root.display()
    );
    Ok(stats)
}

/// Extract a package file from disk
pub fn extract_file(archive_path: &Path, target_dir: &Path) -> Result<ExtractStats> {
    extract(&FileSource::new(archive_path), target_dir)
}

/// Resolve an archive entry name against a canonical root directory.
///
/// `..` and `.` are resolved, then symlinks along the deepest existing
/// ancestor are followed. The result must be `root` or a descendant of it.
/// Backslashes count as separators.
pub fn resolve_within(root: &Path, entry_name: &str) -> Result<PathBuf> {
    let normalized = entry_name.replace('\\', "/");
    let lexical = normalize_lexically(&root.join(&normalized));

    let traversal = |resolved: PathBuf| ArchiveError::PathTraversal {
        entry: entry_name.to_string(),
        resolved,
    };

    // Walk up to the deepest ancestor that exists, canonicalize it, and put
    // the missing tail back on.
    let mut existing = lexical.as_path();
    let mut tail = Vec::new();
    let resolved = loop {
        match fs::canonicalize(existing) {
            Ok(mut canonical) => {
                canonical.extend(tail.iter().rev());
                break canonical;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // A dangling symlink cannot be resolved; writing through it
                // could land anywhere.
                if fs::symlink_metadata(existing).is_ok() {
                    return Err(traversal(existing.to_path_buf()));
                }
                match (existing.file_name(), existing.parent()) {
                    (Some(name), Some(parent)) => {
                        tail.push(name.to_os_string());
                        existing = parent;
                    }
                    _ => break lexical.clone(),
                }
            }
            Err(e) => return Err(e.into()),
        }
    };

    if !resolved.starts_with(root) {
        warn!(
            "Refusing archive entry '{}': resolves to {}",
            entry_name,
            resolved.display()
        );
        return Err(traversal(resolved));
    }
    Ok(resolved)
}

/// Resolve `.` and `..` without touching the filesystem
fn normalize_lexically(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Stream one entry to `path`, removing the file again if the copy fails.
pub(crate) fn write_entry_file<R: Read + ?Sized>(
    reader: &mut R,
    entry_name: &str,
    declared: u64,
    path: &Path,
) -> Result<u64> {
    let file = File::create(path)?;
    let mut out = BufWriter::new(file);

    let copied = copy_entry(reader, entry_name, declared, &mut out)
        .and_then(|n| out.flush().map(|_| n).map_err(ArchiveError::from));

    match copied {
        Ok(n) => {
            debug!("Wrote {} ({} bytes)", path.display(), n);
            Ok(n)
        }
        Err(e) => {
            drop(out);
            if let Err(rm) = fs::remove_file(path) {
                warn!("Failed to remove partial file {}: {}", path.display(), rm);
            }
            Err(e)
        }
    }
}
