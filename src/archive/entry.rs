//! Short-read-tolerant entry reading.
//!
//! The size a zip directory declares for an entry is not always delivered by
//! a single `read` call, even when the buffer is large enough. Everything here
//! loops over partial reads until the declared size is reached or the stream
//! ends. A count that does not match the declared size means the archive is
//! truncated or damaged and is reported as [`ArchiveError::EntryCorrupt`],
//! never as a plain I/O error.

use std::io::{self, Read, Write};

use tracing::{debug, error};
use zip::result::ZipError;

use crate::error::{ArchiveError, Result};
use crate::source::ArchiveSource;

use super::open_zip;

/// Copy buffer size for streamed entries
pub const BUFFER_SIZE: usize = 8192;

/// Largest buffer handed to the first read of an in-memory entry
pub const INITIAL_READ_WINDOW: usize = 64 * 1024;

/// Directory information for one archive entry, used in diagnostics.
#[derive(Debug, Clone)]
pub struct ArchiveEntry {
    /// Path within the archive, as stored
    pub name: String,
    /// Declared uncompressed size
    pub size: u64,
    pub compressed_size: u64,
    /// Storage method (STORED, DEFLATED, ...)
    pub method: String,
    pub is_dir: bool,
}

impl ArchiveEntry {
    pub fn new(
        name: &str,
        size: u64,
        compressed_size: u64,
        method: zip::CompressionMethod,
        is_dir: bool,
    ) -> Self {
        let method = match method {
            zip::CompressionMethod::Stored => "STORED".to_string(),
            zip::CompressionMethod::Deflated => "DEFLATED".to_string(),
            other => format!("UNKNOWN ({other:?})"),
        };
        Self {
            name: name.to_string(),
            size,
            compressed_size,
            method,
            is_dir,
        }
    }

    /// Log everything we know about an entry that failed its size check.
    pub(crate) fn log_mismatch(&self, archive_name: &str, err: &ArchiveError) {
        if let ArchiveError::EntryCorrupt { actual, .. } = err {
            error!(
                "Unzip size read {} != size expected {} for {} in {}, compressed size = {}, storage method = {}",
                actual, self.size, self.name, archive_name, self.compressed_size, self.method
            );
        }
    }
}

/// Bytes of one entry held in memory
#[derive(Debug, Clone)]
pub struct EntryBytes {
    pub data: Vec<u8>,
    /// The whole entry arrived from one `read` call
    pub single_read: bool,
}

fn corrupt(entry: &str, expected: u64, actual: u64) -> ArchiveError {
    ArchiveError::EntryCorrupt {
        entry: entry.to_string(),
        expected,
        actual,
    }
}

/// Decoder failures (bad checksum, truncated deflate stream) are corruption,
/// anything else is an ordinary I/O error.
fn classify(err: io::Error, entry: &str, expected: u64, actual: u64) -> ArchiveError {
    match err.kind() {
        io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => {
            debug!("Read of '{}' failed after {} bytes: {}", entry, actual, err);
            corrupt(entry, expected, actual)
        }
        _ => ArchiveError::Io(err),
    }
}

/// After the declared size is satisfied the entry must be exhausted.
///
/// Hitting end-of-entry also makes the zip decoder verify its checksum.
fn ensure_exhausted<R: Read + ?Sized>(reader: &mut R, entry: &str, declared: u64) -> Result<()> {
    let mut probe = [0u8; 1];
    loop {
        match reader.read(&mut probe) {
            Ok(0) => return Ok(()),
            Ok(n) => return Err(corrupt(entry, declared, declared + n as u64)),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify(e, entry, declared, declared)),
        }
    }
}

/// Read exactly `declared` bytes of an entry into memory.
///
/// The declared size comes from the archive and is not trusted for
/// allocation: the buffer starts at [`INITIAL_READ_WINDOW`] and only grows
/// once the bytes already asked for have arrived. An entry larger than the
/// first window therefore never counts as a single read.
///
/// Does not close or rewind the stream.
pub fn read_entry<R: Read + ?Sized>(
    reader: &mut R,
    entry: &str,
    declared: u64,
) -> Result<EntryBytes> {
    let len = usize::try_from(declared).map_err(|_| {
        ArchiveError::Io(io::Error::new(
            io::ErrorKind::OutOfMemory,
            format!("entry '{entry}' is too large to hold in memory ({declared} bytes)"),
        ))
    })?;

    let mut data = Vec::with_capacity(len.min(INITIAL_READ_WINDOW));
    let mut filled = 0usize;
    let mut reads = 0usize;
    while filled < len {
        if data.len() == filled {
            let window = (len - filled).min(filled.max(INITIAL_READ_WINDOW));
            data.resize(filled + window, 0);
        }
        match reader.read(&mut data[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                reads += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify(e, entry, declared, filled as u64)),
        }
    }
    data.truncate(filled);

    if filled != len {
        return Err(corrupt(entry, declared, filled as u64));
    }
    ensure_exhausted(reader, entry, declared)?;

    Ok(EntryBytes {
        data,
        single_read: reads <= 1,
    })
}

/// Stream an entry into `writer`, returning the number of bytes copied.
///
/// Fails with `EntryCorrupt` when the stream ends short of `declared` or runs
/// past it.
pub fn copy_entry<R, W>(reader: &mut R, entry: &str, declared: u64, writer: &mut W) -> Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buffer = [0u8; BUFFER_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(classify(e, entry, declared, total)),
        };
        total += n as u64;
        if total > declared {
            return Err(corrupt(entry, declared, total));
        }
        writer.write_all(&buffer[..n])?;
    }

    if total != declared {
        return Err(corrupt(entry, declared, total));
    }
    Ok(total)
}

/// Read one named entry out of a package.
///
/// Returns `Ok(None)` when the archive has no entry with exactly that name.
pub fn read_named_entry(source: &dyn ArchiveSource, entry_name: &str) -> Result<Option<Vec<u8>>> {
    let mut archive = open_zip(source)?;
    let mut entry = match archive.by_name(entry_name) {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(ArchiveError::unreadable(&source.display_name(), e)),
    };

    let declared = entry.size();
    let bytes = read_entry(&mut entry, entry_name, declared)?;
    Ok(Some(bytes.data))
}
