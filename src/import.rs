//! Bringing book and shelf files into the local library.
//!
//! A copy that fails halfway leaves a truncated package that would later be
//! mistaken for a damaged book, so partial copies are always deleted.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use tracing::{error, info, warn};

use crate::archive::{ArchiveValidator, CheckMode};
use crate::error::{ArchiveError, Result};
use crate::names::is_shelf_file;
use crate::source::{ArchiveSource, FileSource};

/// Copy a stream to `dest`, creating parent directories.
///
/// Returns the number of bytes copied. On failure the partial file is removed.
pub fn copy_stream_to_file<R: Read + ?Sized>(reader: &mut R, dest: &Path) -> Result<u64> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut out = BufWriter::new(File::create(dest)?);
    let copied = io::copy(reader, &mut out).and_then(|n| out.flush().map(|_| n));

    match copied {
        Ok(n) => Ok(n),
        Err(e) => {
            drop(out);
            error!("Copy to {} failed: {}", dest.display(), e);
            if let Err(rm) = fs::remove_file(dest) {
                warn!("Failed to remove partial file {}: {}", dest.display(), rm);
            }
            Err(e.into())
        }
    }
}

/// Copy a book or shelf from `source` to `dest` and make sure it is usable.
///
/// Shelf manifests (by `dest` name) are checked with `shelf_check`; anything
/// else must pass a strict book package validation. A copy that fails its
/// check is deleted and reported as `ContentInvalid` (or whatever the
/// validator found).
pub fn import_book_or_shelf<F>(
    source: &dyn ArchiveSource,
    dest: &Path,
    validator: &ArchiveValidator,
    shelf_check: F,
) -> Result<u64>
where
    F: FnOnce(&Path) -> bool,
{
    let mut reader = source
        .open()
        .map_err(|e| ArchiveError::unreadable(&source.display_name(), e))?;
    let copied = copy_stream_to_file(&mut reader, dest)?;

    let dest_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    let verdict = if is_shelf_file(&dest_name) {
        if shelf_check(dest) {
            Ok(())
        } else {
            Err(ArchiveError::ContentInvalid {
                root_markup: 0,
                stylesheets: 0,
            })
        }
    } else {
        validator
            .check(&FileSource::new(dest), CheckMode::BloomPub, None)
            .map(|_| ())
    };

    if let Err(e) = verdict {
        warn!("Imported {} is not usable: {}", dest.display(), e);
        fs::remove_file(dest)?;
        return Err(e);
    }

    info!("Imported {} ({} bytes)", dest.display(), copied);
    Ok(copied)
}
