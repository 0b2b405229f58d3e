//! Book, shelf, and bundle file naming
//!
//! BloomPub packages carry either the current `.bloompub` extension or the
//! legacy `.bloomd` one. Some transfer mechanisms append `.enc` to the name.
//! Bundles written for older readers must only contain `.bloomd` names.

/// Book package extensions, current first.
pub const BOOK_FILE_EXTENSIONS: [&str; 2] = [".bloompub", ".bloomd"];
/// Current book package extension
pub const BOOK_FILE_EXTENSION: &str = ".bloompub";
/// Extension older readers expect inside a bundle
pub const LEGACY_BOOK_FILE_EXTENSION: &str = ".bloomd";
pub const BOOKSHELF_FILE_EXTENSION: &str = ".bloomshelf";
pub const BLOOM_BUNDLE_FILE_EXTENSION: &str = ".bloombundle";
/// Suffix some file transfer apps leave on book and bundle files
pub const ENCODED_FILE_EXTENSION: &str = ".enc";

/// True if the name carries a book package extension.
///
/// With `include_encoded`, `Story.bloompub.enc` also counts.
pub fn is_bloom_pub_file(file_name: &str, include_encoded: bool) -> bool {
    BOOK_FILE_EXTENSIONS.iter().any(|ext| {
        file_name.ends_with(ext)
            || (include_encoded && file_name.ends_with(&format!("{ext}{ENCODED_FILE_EXTENSION}")))
    })
}

pub fn is_shelf_file(file_name: &str) -> bool {
    file_name.ends_with(BOOKSHELF_FILE_EXTENSION)
}

/// Default bundle filter: book packages and shelf manifests
pub fn is_bundle_member(file_name: &str) -> bool {
    is_bloom_pub_file(file_name, false) || is_shelf_file(file_name)
}

/// Remove a trailing book extension, if any.
///
/// Only the suffix is removed: `A.bloompub.notes.bloompub` becomes
/// `A.bloompub.notes`, the inner `.bloompub` stays.
pub fn strip_book_file_extension(file_name: &str) -> &str {
    BOOK_FILE_EXTENSIONS
        .iter()
        .find_map(|ext| file_name.strip_suffix(ext))
        .unwrap_or(file_name)
}

/// `Story.bloompub.enc` -> `Story.bloompub`. Other names pass through.
pub fn ensure_no_encoded_extension(file_name: &str) -> &str {
    if is_bloom_pub_file(file_name, true) {
        if let Some(stripped) = file_name.strip_suffix(ENCODED_FILE_EXTENSION) {
            return stripped;
        }
    }
    file_name
}

/// Name a file should carry inside a bundle.
///
/// Current-extension packages get the legacy extension; everything before
/// the final `.` is preserved. Shelf files and `.bloomd` books are unchanged.
pub fn legacy_bundle_name(file_name: &str) -> String {
    if !file_name.ends_with(BOOK_FILE_EXTENSION) {
        return file_name.to_string();
    }
    let stem = file_name
        .rfind('.')
        .map(|idx| &file_name[..idx])
        .unwrap_or(file_name);
    format!("{stem}{LEGACY_BOOK_FILE_EXTENSION}")
}

/// Last component of a path or document id.
///
/// Files on an SD card root can show up as `1234-ABCD:book.bloompub`, so a
/// colon also acts as a separator.
pub fn file_name_from_path(path: &str) -> &str {
    path.rfind(['/', ':'])
        .map(|idx| &path[idx + 1..])
        .unwrap_or(path)
}

/// True for names that live directly at the archive root
pub fn is_root_level(entry_name: &str) -> bool {
    !entry_name.contains('/')
}
