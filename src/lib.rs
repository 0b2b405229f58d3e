//! bloompack - BloomPub package integrity and bundling
//!
//! Decides whether a byte stream is a well-formed BloomPub book package,
//! extracts packages without letting entries escape the target directory,
//! remembers validation verdicts so unchanged files are not rescanned, and
//! packs a library of books and shelves into a `.bloombundle`.

pub mod archive;
pub mod bundle;
pub mod cache;
pub mod config;
pub mod error;
pub mod fs_tree;
pub mod import;
pub mod names;
pub mod source;

pub use archive::{ArchiveValidator, CheckMode, ContentProbe, ScanSummary};
pub use cache::ValidationCache;
pub use error::{ArchiveError, ErrorKind};
pub use source::{ArchiveSource, FileSource, MemorySource};
