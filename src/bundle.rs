//! `.bloombundle` packaging.
//!
//! A bundle is a plain GNU tar of book packages and shelf manifests, used to
//! move a whole library in one file. Older readers only recognize the legacy
//! `.bloomd` extension, so a `.bloompub` book is stored as `<stem>.bloomd`
//! inside the bundle. Only the entry name changes; files on disk are never
//! renamed.
//!
//! Two inputs that end up with the same entry name would shadow each other
//! when the bundle is unpacked, so a bundle with a name collision is rejected
//! before anything is written.

use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::archive::extract::write_entry_file;
use crate::archive::resolve_within;
use crate::error::{ArchiveError, Result};
use crate::names::{is_bundle_member, legacy_bundle_name};

/// A local file and the name it carries inside the bundle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    pub path: PathBuf,
    pub name: String,
}

impl BundleEntry {
    /// `None` for paths without a file name
    pub fn for_file(path: &Path) -> Option<Self> {
        let file_name = path.file_name()?.to_string_lossy();
        Some(Self {
            path: path.to_path_buf(),
            name: legacy_bundle_name(&file_name),
        })
    }

    /// Entry name differs from the file name on disk
    pub fn is_renamed(&self) -> bool {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy() != self.name.as_str())
            .unwrap_or(false)
    }
}

/// Bundle statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BundleStats {
    pub entries: usize,
    /// Entries stored under the legacy extension
    pub renamed: usize,
    /// Inputs rejected by the filter
    pub skipped: usize,
    pub bytes: u64,
}

/// Filter `files` and work out their entry names, in the order given.
///
/// Fails with `BundleCollision` if two files map to the same entry name.
pub fn plan_bundle<F>(files: &[PathBuf], include: F) -> Result<Vec<BundleEntry>>
where
    F: Fn(&Path) -> bool,
{
    let mut seen = HashSet::new();
    let mut entries = Vec::new();

    for path in files.iter().filter(|p| include(p.as_path())) {
        let Some(entry) = BundleEntry::for_file(path) else {
            continue;
        };
        if !seen.insert(entry.name.clone()) {
            return Err(ArchiveError::BundleCollision { name: entry.name });
        }
        entries.push(entry);
    }

    Ok(entries)
}

/// Write the files accepted by `include` into a bundle at `destination`.
///
/// The bundle is written to a temporary file next to the destination and
/// moved into place once complete, so a failure leaves no partial bundle.
pub fn build_bundle<F>(files: &[PathBuf], destination: &Path, include: F) -> Result<BundleStats>
where
    F: Fn(&Path) -> bool,
{
    let entries = plan_bundle(files, include)?;
    let mut stats = BundleStats {
        skipped: files.len() - entries.len(),
        ..BundleStats::default()
    };

    let parent = destination
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    fs::create_dir_all(parent)?;

    let temp = NamedTempFile::new_in(parent)?;
    let mut builder = tar::Builder::new(BufWriter::new(temp));

    for entry in &entries {
        // GNU headers: names over 100 bytes go out as long-name records.
        builder.append_path_with_name(&entry.path, &entry.name)?;
        stats.entries += 1;
        stats.bytes += fs::metadata(&entry.path)?.len();
        if entry.is_renamed() {
            stats.renamed += 1;
        }
        debug!("Bundled {} as {}", entry.path.display(), entry.name);
    }

    let temp = builder
        .into_inner()?
        .into_inner()
        .map_err(|e| ArchiveError::Io(e.into_error()))?;
    temp.persist(destination).map_err(|e| ArchiveError::Io(e.error))?;

    info!(
        "Wrote bundle {} ({} entries, {} renamed)",
        destination.display(),
        stats.entries,
        stats.renamed
    );
    Ok(stats)
}

/// Bundle every book and shelf file directly inside `books_dir`.
///
/// Files are taken in file-name order so the same library always produces
/// the same bundle.
pub fn make_bloom_bundle(books_dir: &Path, destination: &Path) -> Result<BundleStats> {
    let mut files = Vec::new();
    for entry in WalkDir::new(books_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| ArchiveError::Io(e.into()))?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    build_bundle(&files, destination, |path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_bundle_member)
    })
}

/// Unpack a bundle into `target_dir`, returning the files written.
///
/// Entry names get the same path-traversal check as package extraction.
/// Entries other than regular files and directories are skipped.
pub fn unpack_bundle(bundle: &Path, target_dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(target_dir)?;
    let root = fs::canonicalize(target_dir)?;

    let bundle_name = bundle.display().to_string();
    let file = File::open(bundle).map_err(|e| ArchiveError::unreadable(&bundle_name, e))?;
    let mut archive = tar::Archive::new(BufReader::new(file));

    let mut written = Vec::new();
    let entries = archive
        .entries()
        .map_err(|e| ArchiveError::unreadable(&bundle_name, e))?;
    for entry in entries {
        let mut entry = entry.map_err(|e| ArchiveError::unreadable(&bundle_name, e))?;
        let name = entry
            .path()
            .map_err(|e| ArchiveError::unreadable(&bundle_name, e))?
            .to_string_lossy()
            .to_string();
        let out_path = resolve_within(&root, &name)?;

        let entry_type = entry.header().entry_type();
        if entry_type.is_dir() {
            fs::create_dir_all(&out_path)?;
            continue;
        }
        if !entry_type.is_file() {
            debug!("Skipping non-file bundle entry {}", name);
            continue;
        }

        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let declared = entry.size();
        write_entry_file(&mut entry, &name, declared, &out_path)?;
        written.push(out_path);
    }

    info!("Unpacked {} files from {}", written.len(), bundle_name);
    Ok(written)
}
