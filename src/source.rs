//! Readable archive sources.
//!
//! The core never cares where bytes come from. A source has a stable identity
//! (absolute path or URI string, used as the verdict cache key), a
//! last-modified timestamp in milliseconds (0 when unknown), and can be
//! opened any number of times for a fresh seekable stream.

use std::fs::File;
use std::io::{self, BufReader, Cursor, Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Seekable byte stream handed out by a source
pub trait ReadSeek: Read + Seek {}

impl<T: Read + Seek> ReadSeek for T {}

/// Something a package can be read from.
pub trait ArchiveSource {
    /// Cache key: absolute path or URI string
    fn identity(&self) -> String;

    /// Human readable name for log messages
    fn display_name(&self) -> String;

    /// Milliseconds since the Unix epoch, or 0 if unknown.
    fn last_modified(&self) -> i64;

    fn size_hint(&self) -> Option<u64> {
        None
    }

    /// Open a fresh stream positioned at the start of the archive.
    fn open(&self) -> io::Result<Box<dyn ReadSeek>>;
}

/// A package file on the local filesystem
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ArchiveSource for FileSource {
    fn identity(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn display_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.identity())
    }

    fn last_modified(&self) -> i64 {
        file_modified_millis(&self.path)
    }

    fn size_hint(&self) -> Option<u64> {
        std::fs::metadata(&self.path).ok().map(|m| m.len())
    }

    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        let file = File::open(&self.path)?;
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Package bytes already fetched by a collaborator (e.g. from a content URI).
#[derive(Debug, Clone)]
pub struct MemorySource {
    identity: String,
    name: String,
    modified: i64,
    data: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(identity: impl Into<String>, modified: i64, data: impl Into<Arc<[u8]>>) -> Self {
        let identity = identity.into();
        let name = crate::names::file_name_from_path(&identity).to_string();
        Self {
            identity,
            name,
            modified,
            data: data.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl ArchiveSource for MemorySource {
    fn identity(&self) -> String {
        self.identity.clone()
    }

    fn display_name(&self) -> String {
        self.name.clone()
    }

    fn last_modified(&self) -> i64 {
        self.modified
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.data.len() as u64)
    }

    fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
        Ok(Box::new(Cursor::new(Arc::clone(&self.data))))
    }
}

/// Modification time of a file in milliseconds; 0 if anything goes wrong.
pub fn file_modified_millis(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
