//! Package validation.
//!
//! A scan walks every entry of the archive, reads it in full, and checks that
//! the bytes delivered match the size the zip directory declares. Along the
//! way it counts root-level html files and css files, which is how a book
//! package is told apart from any other zip.
//!
//! Scanning a large package is slow, so a positive verdict is remembered in
//! the [`ValidationCache`] against the archive's last-modified timestamp. A
//! cache hit returns valid without opening the archive and ignores the check
//! mode and probe: an unchanged file is assumed to still pass whichever check
//! passed it the first time.

use std::io::{self, Read};

use encoding_rs::Encoding;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::ValidationCache;
use crate::error::{ArchiveError, ErrorKind, Result};
use crate::names::is_root_level;
use crate::source::ArchiveSource;

use super::entry::{copy_entry, read_entry, ArchiveEntry};
use super::open_zip;

/// How strict a validation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckMode {
    /// Opens as a zip and every entry reads back at its declared size
    #[default]
    Zip,
    /// Zip check plus exactly one root-level html file and at least one css file
    BloomPub,
}

/// Request for the text of one entry, filled in during a scan.
///
/// Saves opening the archive a second time when the caller needs both a
/// verdict and, say, the package's `meta.json`.
#[derive(Debug, Clone)]
pub struct ContentProbe {
    entry_name: String,
    encoding: &'static Encoding,
    content: Option<String>,
}

impl ContentProbe {
    /// Matching is case-insensitive on both sides: `entry_name` and every
    /// archive entry name are lowercased before comparing, so `META.json`
    /// finds `meta.json` and the other way round.
    pub fn new(entry_name: &str, encoding: &'static Encoding) -> Self {
        Self {
            entry_name: entry_name.to_lowercase(),
            encoding,
            content: None,
        }
    }

    pub fn utf8(entry_name: &str) -> Self {
        Self::new(entry_name, encoding_rs::UTF_8)
    }

    pub fn entry_name(&self) -> &str {
        &self.entry_name
    }

    pub fn encoding(&self) -> &'static Encoding {
        self.encoding
    }

    /// Decoded text, if the entry was seen and read in one pass
    pub fn content(&self) -> Option<&str> {
        self.content.as_deref()
    }

    pub fn take_content(&mut self) -> Option<String> {
        self.content.take()
    }

    fn matches(&self, lowered_name: &str) -> bool {
        self.entry_name == lowered_name
    }

    fn capture(&mut self, bytes: &[u8]) {
        let (text, had_errors) = self.encoding.decode_without_bom_handling(bytes);
        if had_errors {
            debug!(
                "'{}' is not clean {}; malformed sequences replaced",
                self.entry_name,
                self.encoding.name()
            );
        }
        self.content = Some(text.into_owned());
    }
}

/// What a successful validation found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScanSummary {
    /// Non-directory entries read
    pub entries: usize,
    /// `.htm`/`.html` entries at the archive root
    pub root_markup: usize,
    /// `.css` entries at any depth
    pub stylesheets: usize,
    /// Verdict came from the cache; no scan took place
    pub from_cache: bool,
}

impl ScanSummary {
    fn cached() -> Self {
        Self {
            from_cache: true,
            ..Self::default()
        }
    }

    fn is_book_package(&self) -> bool {
        self.root_markup == 1 && self.stylesheets > 0
    }
}

/// Validates packages, consulting the verdict cache when it has one
#[derive(Clone, Default)]
pub struct ArchiveValidator {
    cache: Option<ValidationCache>,
}

impl ArchiveValidator {
    pub fn new(cache: ValidationCache) -> Self {
        Self { cache: Some(cache) }
    }

    /// Validator that always performs a full scan
    pub fn without_cache() -> Self {
        Self { cache: None }
    }

    pub fn cache(&self) -> Option<&ValidationCache> {
        self.cache.as_ref()
    }

    /// Boolean verdict. The reason for a negative result is logged.
    pub fn validate(
        &self,
        source: &dyn ArchiveSource,
        mode: CheckMode,
        probe: Option<&mut ContentProbe>,
    ) -> bool {
        match self.check(source, mode, probe) {
            Ok(_) => true,
            Err(e) => {
                match e.kind() {
                    ErrorKind::ContentInvalid => info!("{}: {}", source.display_name(), e),
                    _ => warn!("{} failed validation: {}", source.display_name(), e),
                }
                false
            }
        }
    }

    /// Validate and report why a package was rejected.
    pub fn check(
        &self,
        source: &dyn ArchiveSource,
        mode: CheckMode,
        probe: Option<&mut ContentProbe>,
    ) -> Result<ScanSummary> {
        let key = source.identity();
        // Captured before the scan: if the file changes while we read it, the
        // recorded verdict will not match the next timestamp.
        let modified = source.last_modified();

        if let Some(cache) = &self.cache {
            if cache.is_known_valid(&key, modified) {
                debug!("{} unchanged since last validation, skipping scan", key);
                return Ok(ScanSummary::cached());
            }
        }

        let summary = scan(source, mode, probe)?;

        if let Some(cache) = &self.cache {
            cache.record_valid(&key, modified);
        }
        Ok(summary)
    }
}

/// Read the probed entry and keep its text.
///
/// Text that needed reassembly from several reads is not trusted and the
/// probe stays empty. The entry is still checked against its declared size.
fn fill_probe<R: Read + ?Sized>(
    reader: &mut R,
    entry: &str,
    declared: u64,
    probe: &mut ContentProbe,
) -> Result<()> {
    let bytes = read_entry(reader, entry, declared)?;
    if bytes.single_read {
        probe.capture(&bytes.data);
    } else {
        debug!("'{}' arrived in pieces, not capturing its text", entry);
    }
    Ok(())
}

/// Full scan, no cache involvement
fn scan(
    source: &dyn ArchiveSource,
    mode: CheckMode,
    mut probe: Option<&mut ContentProbe>,
) -> Result<ScanSummary> {
    let archive_name = source.display_name();
    let mut archive = open_zip(source)?;
    let mut summary = ScanSummary::default();

    for i in 0..archive.len() {
        let mut file = archive
            .by_index(i)
            .map_err(|e| ArchiveError::unreadable(&archive_name, e))?;
        if file.is_dir() {
            continue;
        }

        let entry = ArchiveEntry::new(
            file.name(),
            file.size(),
            file.compressed_size(),
            file.compression(),
            false,
        );
        let lowered = entry.name.to_lowercase();

        // Only root-level html counts: activities may carry their own pages.
        if (lowered.ends_with(".htm") || lowered.ends_with(".html")) && is_root_level(&lowered) {
            summary.root_markup += 1;
        } else if lowered.ends_with(".css") {
            summary.stylesheets += 1;
        }

        let read = match probe.as_deref_mut().filter(|p| p.matches(&lowered)) {
            Some(wanted) => fill_probe(&mut file, &entry.name, entry.size, wanted),
            None => copy_entry(&mut file, &entry.name, entry.size, &mut io::sink()).map(|_| ()),
        };
        read.inspect_err(|e| entry.log_mismatch(&archive_name, e))?;

        summary.entries += 1;
    }

    if mode == CheckMode::BloomPub && !summary.is_book_package() {
        return Err(ArchiveError::ContentInvalid {
            root_markup: summary.root_markup,
            stylesheets: summary.stylesheets,
        });
    }

    debug!(
        "{}: {} entries, {} root html, {} css",
        archive_name, summary.entries, summary.root_markup, summary.stylesheets
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::{build_zip, sample_book, Deflated, Stored};
    use crate::cache::VerdictStore;
    use crate::source::{FileSource, MemorySource, ReadSeek};
    use std::io::{Cursor, Seek, SeekFrom};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Counts how often the archive is actually opened.
    struct CountingSource {
        inner: MemorySource,
        opens: AtomicUsize,
    }

    impl CountingSource {
        fn new(identity: &str, modified: i64, data: Vec<u8>) -> Self {
            Self {
                inner: MemorySource::new(identity, modified, data),
                opens: AtomicUsize::new(0),
            }
        }

        fn opens(&self) -> usize {
            self.opens.load(Ordering::SeqCst)
        }
    }

    impl ArchiveSource for CountingSource {
        fn identity(&self) -> String {
            self.inner.identity()
        }

        fn display_name(&self) -> String {
            self.inner.display_name()
        }

        fn last_modified(&self) -> i64 {
            self.inner.last_modified()
        }

        fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.open()
        }
    }

    /// Hands out at most 7 bytes per read, like a slow content provider.
    struct Choppy(Cursor<Vec<u8>>);

    impl Read for Choppy {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(7);
            self.0.read(&mut buf[..n])
        }
    }

    impl Seek for Choppy {
        fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
            self.0.seek(pos)
        }
    }

    struct ChoppySource(MemorySource);

    impl ArchiveSource for ChoppySource {
        fn identity(&self) -> String {
            self.0.identity()
        }

        fn display_name(&self) -> String {
            self.0.display_name()
        }

        fn last_modified(&self) -> i64 {
            self.0.last_modified()
        }

        fn open(&self) -> io::Result<Box<dyn ReadSeek>> {
            let mut data = Vec::new();
            self.0.open()?.read_to_end(&mut data)?;
            Ok(Box::new(Choppy(Cursor::new(data))))
        }
    }

    /// Store that is never reachable
    struct OfflineStore;

    impl VerdictStore for OfflineStore {
        fn get(&self, _key: &str) -> Result<Option<i64>> {
            Err(ArchiveError::Cache("store offline".to_string()))
        }

        fn put(&self, _key: &str, _modified: i64) -> Result<()> {
            Err(ArchiveError::Cache("store offline".to_string()))
        }
    }

    /// Overwrite the uncompressed size the central directory declares for `name`.
    fn set_declared_size(zip: &mut [u8], name: &str, size: u32) {
        let pos = (0..zip.len() - 46)
            .find(|&i| {
                let name_len = u16::from_le_bytes([zip[i + 28], zip[i + 29]]) as usize;
                zip[i..i + 4] == [0x50, 0x4b, 0x01, 0x02]
                    && zip.get(i + 46..i + 46 + name_len) == Some(name.as_bytes())
            })
            .unwrap();
        zip[pos + 24..pos + 28].copy_from_slice(&size.to_le_bytes());
    }

    fn no_css_book() -> Vec<u8> {
        build_zip(&[
            ("Story.htm", b"<html></html>".as_slice(), Deflated),
            ("meta.json", b"{}".as_slice(), Stored),
        ])
    }

    #[test]
    fn test_valid_book_package() {
        let source = MemorySource::new("/books/Story.bloompub", 1000, sample_book());
        let summary = ArchiveValidator::without_cache()
            .check(&source, CheckMode::BloomPub, None)
            .unwrap();
        assert_eq!(summary.root_markup, 1);
        assert_eq!(summary.stylesheets, 1);
        assert_eq!(summary.entries, 4);
        assert!(!summary.from_cache);
    }

    #[test]
    fn test_missing_css_is_not_a_book() {
        let source = MemorySource::new("/books/NoCss.bloompub", 1000, no_css_book());
        let validator = ArchiveValidator::without_cache();

        let err = validator.check(&source, CheckMode::BloomPub, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ContentInvalid);
        assert!(!validator.validate(&source, CheckMode::BloomPub, None));

        // Still a perfectly good zip
        assert!(validator.validate(&source, CheckMode::Zip, None));
    }

    #[test]
    fn test_only_root_level_html_counts() {
        let zip = build_zip(&[
            ("Story.HTML", b"<html></html>".as_slice(), Deflated),
            ("activities/game/index.html", b"<html></html>".as_slice(), Deflated),
            ("activities/game/game.css", b"p {}".as_slice(), Deflated),
        ]);
        let source = MemorySource::new("/books/Activity.bloompub", 1, zip);
        let summary = ArchiveValidator::without_cache()
            .check(&source, CheckMode::BloomPub, None)
            .unwrap();
        assert_eq!(summary.root_markup, 1);
        assert_eq!(summary.stylesheets, 1);
    }

    #[test]
    fn test_two_root_html_files_rejected() {
        let zip = build_zip(&[
            ("a.htm", b"<html></html>".as_slice(), Stored),
            ("b.html", b"<html></html>".as_slice(), Stored),
            ("basePage.css", b"p {}".as_slice(), Stored),
        ]);
        let source = MemorySource::new("/books/Two.bloompub", 1, zip);
        let err = ArchiveValidator::without_cache()
            .check(&source, CheckMode::BloomPub, None)
            .unwrap_err();
        match err {
            ArchiveError::ContentInvalid { root_markup, stylesheets } => {
                assert_eq!(root_markup, 2);
                assert_eq!(stylesheets, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_not_a_zip_is_unreadable() {
        let source = MemorySource::new("/books/junk.bloompub", 1, b"PK but not really".to_vec());
        let err = ArchiveValidator::without_cache()
            .check(&source, CheckMode::Zip, None)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SourceUnreadable);
    }

    #[test]
    fn test_damaged_entry_is_corrupt() {
        let mut zip = build_zip(&[
            ("Story.htm", b"<html>ONCE-UPON-A-TIME</html>".as_slice(), Stored),
            ("basePage.css", b"p {}".as_slice(), Stored),
        ]);
        let marker = b"ONCE-UPON-A-TIME";
        let pos = zip.windows(marker.len()).position(|w| w == marker).unwrap();
        zip[pos] ^= 0xFF;

        let cache = ValidationCache::in_memory();
        let validator = ArchiveValidator::new(cache.clone());
        let source = MemorySource::new("/books/Damaged.bloompub", 1000, zip);

        let err = validator.check(&source, CheckMode::Zip, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryCorrupt);
        assert!(!cache.is_known_valid("/books/Damaged.bloompub", 1000));
    }

    #[test]
    fn test_unchanged_file_skips_scan() {
        let validator = ArchiveValidator::new(ValidationCache::in_memory());
        let source = CountingSource::new("/books/Story.bloompub", 1000, sample_book());

        assert!(validator.validate(&source, CheckMode::BloomPub, None));
        assert_eq!(source.opens(), 1);

        let summary = validator.check(&source, CheckMode::BloomPub, None).unwrap();
        assert!(summary.from_cache);
        assert!(validator.validate(&source, CheckMode::BloomPub, None));
        assert_eq!(source.opens(), 1);
    }

    #[test]
    fn test_changed_timestamp_forces_rescan() {
        let validator = ArchiveValidator::new(ValidationCache::in_memory());
        let original = CountingSource::new("/books/Story.bloompub", 1000, sample_book());
        assert!(validator.validate(&original, CheckMode::BloomPub, None));

        // Same identity, new timestamp, and the content is no longer a book.
        let replaced = CountingSource::new("/books/Story.bloompub", 2000, no_css_book());
        assert!(!validator.validate(&replaced, CheckMode::BloomPub, None));
        assert_eq!(replaced.opens(), 1);
    }

    #[test]
    fn test_unknown_timestamp_always_rescans() {
        let validator = ArchiveValidator::new(ValidationCache::in_memory());
        let source = CountingSource::new("content://books/Story.bloompub", 0, sample_book());

        assert!(validator.validate(&source, CheckMode::BloomPub, None));
        assert!(validator.validate(&source, CheckMode::BloomPub, None));
        assert_eq!(source.opens(), 2);
    }

    #[test]
    fn test_failed_validation_not_cached() {
        let cache = ValidationCache::in_memory();
        let validator = ArchiveValidator::new(cache.clone());
        let source = CountingSource::new("/books/NoCss.bloompub", 1000, no_css_book());

        assert!(!validator.validate(&source, CheckMode::BloomPub, None));
        assert!(!validator.validate(&source, CheckMode::BloomPub, None));
        assert_eq!(source.opens(), 2);
        assert!(!cache.is_known_valid("/books/NoCss.bloompub", 1000));
    }

    #[test]
    fn test_probe_captures_meta_json() {
        let source = MemorySource::new("/books/Story.bloompub", 1000, sample_book());
        let mut probe = ContentProbe::utf8("META.json");

        assert!(ArchiveValidator::without_cache().validate(
            &source,
            CheckMode::BloomPub,
            Some(&mut probe)
        ));
        assert_eq!(probe.content(), Some("{\"title\":\"Story\"}"));
        assert_eq!(probe.take_content().as_deref(), Some("{\"title\":\"Story\"}"));
        assert!(probe.content().is_none());
    }

    #[test]
    fn test_probe_uses_declared_encoding() {
        let zip = build_zip(&[("note.txt", [b'c', b'a', b'f', 0xE9].as_slice(), Stored)]);
        let source = MemorySource::new("/books/Note.zip", 1, zip);
        let mut probe = ContentProbe::new("note.txt", encoding_rs::WINDOWS_1252);

        ArchiveValidator::without_cache()
            .check(&source, CheckMode::Zip, Some(&mut probe))
            .unwrap();
        assert_eq!(probe.content(), Some("café"));
    }

    #[test]
    fn test_probe_for_absent_entry_stays_empty() {
        let source = MemorySource::new("/books/Story.bloompub", 1000, sample_book());
        let mut probe = ContentProbe::utf8("thumbnail.png");
        ArchiveValidator::without_cache()
            .check(&source, CheckMode::BloomPub, Some(&mut probe))
            .unwrap();
        assert!(probe.content().is_none());
    }

    #[test]
    fn test_cache_hit_ignores_probe() {
        let validator = ArchiveValidator::new(ValidationCache::in_memory());
        let source = MemorySource::new("/books/Story.bloompub", 1000, sample_book());
        assert!(validator.validate(&source, CheckMode::BloomPub, None));

        let mut probe = ContentProbe::utf8("meta.json");
        assert!(validator.validate(&source, CheckMode::BloomPub, Some(&mut probe)));
        assert!(probe.content().is_none());
    }

    #[test]
    fn test_file_source_end_to_end() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Story.bloompub");
        std::fs::write(&path, sample_book()).unwrap();

        let cache = ValidationCache::in_memory();
        let validator = ArchiveValidator::new(cache.clone());
        let source = FileSource::new(&path);
        assert!(validator.validate(&source, CheckMode::BloomPub, None));
        assert!(cache.is_known_valid(&source.identity(), source.last_modified()));
    }

    #[test]
    fn test_split_read_text_not_captured() {
        let text = b"{\"title\":\"A story told in several parts\"}";
        let mut reader = Choppy(Cursor::new(text.to_vec()));
        let mut probe = ContentProbe::utf8("meta.json");

        fill_probe(&mut reader, "meta.json", text.len() as u64, &mut probe).unwrap();
        assert!(probe.content().is_none());

        let mut reader = Cursor::new(text.to_vec());
        fill_probe(&mut reader, "meta.json", text.len() as u64, &mut probe).unwrap();
        assert_eq!(probe.content(), Some("{\"title\":\"A story told in several parts\"}"));
    }

    #[test]
    fn test_slow_source_valid_without_text() {
        let zip = build_zip(&[
            ("Story.htm", b"<html></html>".as_slice(), Stored),
            ("basePage.css", b"p {}".as_slice(), Stored),
            ("meta.json", b"{\"title\":\"A story told in several parts\"}".as_slice(), Stored),
        ]);
        let source = ChoppySource(MemorySource::new("content://books/Story.bloompub", 0, zip));
        let mut probe = ContentProbe::utf8("meta.json");

        let summary = ArchiveValidator::without_cache()
            .check(&source, CheckMode::BloomPub, Some(&mut probe))
            .unwrap();
        assert_eq!(summary.entries, 3);
        assert!(probe.content().is_none());
    }

    #[test]
    fn test_inflated_declared_size_is_corrupt() {
        let mut zip = sample_book();
        set_declared_size(&mut zip, "meta.json", 3 << 30);
        let source = MemorySource::new("/books/Inflated.bloompub", 1000, zip);
        let mut probe = ContentProbe::utf8("meta.json");

        let err = ArchiveValidator::without_cache()
            .check(&source, CheckMode::Zip, Some(&mut probe))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::EntryCorrupt);
        assert!(probe.content().is_none());
    }

    #[test]
    fn test_offline_cache_does_not_break_validation() {
        let validator = ArchiveValidator::new(ValidationCache::new(OfflineStore));
        let source = CountingSource::new("/books/Story.bloompub", 1000, sample_book());

        assert!(validator.validate(&source, CheckMode::BloomPub, None));
        let summary = validator.check(&source, CheckMode::BloomPub, None).unwrap();
        assert!(!summary.from_cache);
        assert_eq!(source.opens(), 2);
    }

    #[test]
    fn test_mixed_case_entry_name_matches() {
        let zip = build_zip(&[("Meta.JSON", b"{}".as_slice(), Stored)]);
        let source = MemorySource::new("/books/Mixed.zip", 1, zip);
        let mut probe = ContentProbe::utf8("meta.json");
        assert_eq!(probe.entry_name(), "meta.json");

        ArchiveValidator::without_cache()
            .check(&source, CheckMode::Zip, Some(&mut probe))
            .unwrap();
        assert_eq!(probe.content(), Some("{}"));
    }
}
