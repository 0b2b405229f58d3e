//! BloomPub archive handling.
//!
//! Packages are zip containers, read with the zip crate:
//! - `entry`: short-read-tolerant entry reading and copying
//! - `validate`: integrity scan and content classification, backed by the
//!   verdict cache
//! - `extract`: full extraction with a path-traversal gate

pub mod entry;
pub mod extract;
pub mod validate;

pub use entry::{copy_entry, read_entry, read_named_entry, ArchiveEntry, EntryBytes};
pub use extract::{extract, resolve_within, ExtractStats};
pub use validate::{ArchiveValidator, CheckMode, ContentProbe, ScanSummary};

use zip::ZipArchive;

use crate::error::{ArchiveError, Result};
use crate::source::{ArchiveSource, ReadSeek};

/// Open a source as a zip archive.
///
/// Both a failed open and an unparseable central directory are reported as
/// `SourceUnreadable`.
pub(crate) fn open_zip(source: &dyn ArchiveSource) -> Result<ZipArchive<Box<dyn ReadSeek>>> {
    let name = source.display_name();
    let reader = source
        .open()
        .map_err(|e| ArchiveError::unreadable(&name, e))?;
    ZipArchive::new(reader).map_err(|e| ArchiveError::unreadable(&name, e))
}
