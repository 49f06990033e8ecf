//! Decides whether a path is directly runnable and, with the user's
//! consent, makes it so.

use std::fs;
use std::io::Read;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::detect;
use crate::ui::Confirmer;

/// Content types treated as native or portable binary images.
const BINARY_FORMAT_TYPES: &[&str] = &[
    "application/x-executable",
    "application/x-pie-executable",
    "application/vnd.appimage",
    "application/x-mach-binary",
];

const INTERPRETER_MARKER: [u8; 2] = *b"#!";

/// True iff an execute permission bit is set on `path`.
pub fn is_runnable(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(metadata) => metadata.permissions().mode() & 0o111 != 0,
        Err(_) => false,
    }
}

/// True iff `path` starts with the interpreter marker.
///
/// One level of symlink is resolved first. Directories are never scripts,
/// and neither are disk images, which may coincidentally start with the
/// same two bytes. Read errors count as "not a script".
pub fn has_shebang(path: &Path) -> bool {
    let target = match resolve_symlink(path) {
        Some(target) => target,
        None => return false,
    };
    if target.is_dir() {
        return false;
    }
    let mut file = match fs::File::open(&target) {
        Ok(file) => file,
        Err(err) => {
            debug!("cannot read {}: {}", target.display(), err);
            return false;
        }
    };
    let mut head = [0u8; 2];
    match file.read(&mut head) {
        Ok(2) if head == INTERPRETER_MARKER => {}
        _ => return false,
    }
    if detect::is_disk_image(&detect::content_type_for_path(&target)) {
        debug!(
            "{} starts with the interpreter marker but is a disk image",
            target.display()
        );
        return false;
    }
    true
}

fn resolve_symlink(path: &Path) -> Option<PathBuf> {
    let metadata = fs::symlink_metadata(path).ok()?;
    if !metadata.file_type().is_symlink() {
        return Some(path.to_path_buf());
    }
    let target = fs::read_link(path).ok()?;
    if target.is_absolute() {
        Some(target)
    } else {
        Some(path.parent()?.join(target))
    }
}

/// True iff the detected content type is a recognized binary format.
pub fn is_binary_format(path: &Path) -> bool {
    let content_type = detect::content_type_for_path(path);
    BINARY_FORMAT_TYPES.contains(&content_type.as_str())
}

pub fn is_runnable_or_recognized(path: &Path) -> bool {
    has_shebang(path) || is_binary_format(path)
}

/// Set the execute bits on `path`, but only with the user's consent.
///
/// Already-runnable paths succeed immediately without a prompt. Returns
/// false on refusal or when the permission change fails.
pub fn request_make_runnable(path: &Path, confirmer: &dyn Confirmer) -> bool {
    if is_runnable(path) {
        return true;
    }
    let question = format!(
        "The file is not executable:\n{}\n\nMake it executable?\nYou should only do this if you trust this file.",
        path.display()
    );
    if !confirmer.confirm(&question) {
        return false;
    }
    let metadata = match fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(err) => {
            warn!("cannot stat {}: {}", path.display(), err);
            return false;
        }
    };
    let mut permissions = metadata.permissions();
    permissions.set_mode(permissions.mode() | 0o111);
    match fs::set_permissions(path, permissions) {
        Ok(()) => true,
        Err(err) => {
            warn!("cannot make {} executable: {}", path.display(), err);
            false
        }
    }
}
