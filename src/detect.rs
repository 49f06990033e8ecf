//! Content-type identification for filesystem paths.
//!
//! Layered the cheap way: magic bytes first, file extension second.
//! Identifiers use the `family/subtype` shape throughout; a handful of
//! pseudo-types mirror what desktop tooling expects for directories and
//! empty files.

use std::fs;
use std::io::Read;
use std::path::Path;

/// Reported for zero-length files before the opener normalizes them.
pub const ZERO_SIZE_TYPE: &str = "application/x-zerosize";
/// Alternate zero-length spelling some tools use.
pub const EMPTY_TYPE: &str = "inode/x-empty";
pub const DIRECTORY_TYPE: &str = "inode/directory";
pub const PLAIN_TEXT_TYPE: &str = "text/plain";
/// The give-up type; also the one content type the opener refuses.
pub const UNKNOWN_TYPE: &str = "application/octet-stream";

/// Bytes of the file head consulted for magic-number sniffing.
const SNIFF_LEN: usize = 8192;

/// Detected content type for `path`.
///
/// Directories report `inode/directory` and empty files
/// `application/x-zerosize`; anything unidentifiable falls back to
/// `application/octet-stream`.
pub fn content_type_for_path(path: &Path) -> String {
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(_) => return UNKNOWN_TYPE.to_string(),
    };
    if metadata.is_dir() {
        return DIRECTORY_TYPE.to_string();
    }
    if metadata.len() == 0 {
        return ZERO_SIZE_TYPE.to_string();
    }
    if let Some(sniffed) = sniff(path) {
        return sniffed;
    }
    mime_guess::from_path(path)
        .first_raw()
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_TYPE.to_string())
}

fn sniff(path: &Path) -> Option<String> {
    let mut file = fs::File::open(path).ok()?;
    let mut head = [0u8; SNIFF_LEN];
    let len = file.read(&mut head).ok()?;
    let kind = infer::get(&head[..len])?;
    Some(kind.mime_type().to_string())
}

/// The `family` segment of a `family/subtype` identifier.
pub fn family(content_type: &str) -> &str {
    content_type.split('/').next().unwrap_or(content_type)
}

/// Disk images can coincidentally start with the interpreter marker and
/// must not be classified as scripts.
pub fn is_disk_image(content_type: &str) -> bool {
    content_type.contains("disk-image") || content_type.contains("iso9660")
}
