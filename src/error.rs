//! Error types for package validation, extraction, and bundling.

use std::path::PathBuf;

/// Coarse classification of an [`ArchiveError`], for diagnostics and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    SourceUnreadable,
    EntryCorrupt,
    ContentInvalid,
    PathTraversal,
    BundleCollision,
    Io,
    Cache,
}

/// Errors raised by the archive core
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// The archive could not be opened or its entries enumerated.
    #[error("Cannot read archive {source_name}: {reason}")]
    SourceUnreadable { source_name: String, reason: String },

    /// An entry's declared size could not be satisfied by its data stream.
    /// This means the archive is truncated or damaged.
    #[error("Entry '{entry}' is corrupt: expected {expected} bytes, read {actual}")]
    EntryCorrupt {
        entry: String,
        expected: u64,
        actual: u64,
    },

    /// Structurally sound, but not a book package.
    #[error(
        "Not a valid book package: {root_markup} root-level html file(s), {stylesheets} css file(s)"
    )]
    ContentInvalid {
        root_markup: usize,
        stylesheets: usize,
    },

    /// An entry would be written outside the extraction directory.
    #[error("Archive entry '{entry}' resolves outside the target directory: {}", .resolved.display())]
    PathTraversal { entry: String, resolved: PathBuf },

    /// Two bundle inputs map to the same entry name.
    #[error("Two files would be stored as '{name}' in the bundle")]
    BundleCollision { name: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Verdict cache backend failure
    #[error("Validation cache error: {0}")]
    Cache(String),
}

impl ArchiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ArchiveError::SourceUnreadable { .. } => ErrorKind::SourceUnreadable,
            ArchiveError::EntryCorrupt { .. } => ErrorKind::EntryCorrupt,
            ArchiveError::ContentInvalid { .. } => ErrorKind::ContentInvalid,
            ArchiveError::PathTraversal { .. } => ErrorKind::PathTraversal,
            ArchiveError::BundleCollision { .. } => ErrorKind::BundleCollision,
            ArchiveError::Io(_) => ErrorKind::Io,
            ArchiveError::Cache(_) => ErrorKind::Cache,
        }
    }

    pub(crate) fn unreadable(source_name: &str, reason: impl std::fmt::Display) -> Self {
        ArchiveError::SourceUnreadable {
            source_name: source_name.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl From<rusqlite::Error> for ArchiveError {
    fn from(err: rusqlite::Error) -> Self {
        ArchiveError::Cache(err.to_string())
    }
}

pub type Result<T, E = ArchiveError> = std::result::Result<T, E>;
