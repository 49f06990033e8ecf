//! Path-attached metadata in the `user.` extended-attribute namespace.
//!
//! Two attributes matter to this tool: `open-with` remembers which
//! application the user picked for a specific file, and `can-open` caches
//! the content types an application bundle declares. Attribute support
//! varies by filesystem (live images in particular tend to lack it), so
//! every failure collapses to `None`/`false` and callers fall back to the
//! slower declaration files.

use std::path::Path;

const NAMESPACE: &str = "user.";

fn namespaced(attribute: &str) -> String {
    format!("{NAMESPACE}{attribute}")
}

/// Read a string attribute. `None` when unset, unreadable, or not UTF-8.
pub fn get_string(path: &Path, attribute: &str) -> Option<String> {
    let raw = xattr::get(path, namespaced(attribute)).ok().flatten()?;
    let value = String::from_utf8(raw).ok()?;
    Some(value.trim().to_string())
}

pub fn set_string(path: &Path, attribute: &str, value: &str) -> bool {
    xattr::set(path, namespaced(attribute), value.as_bytes()).is_ok()
}

pub fn get_int(path: &Path, attribute: &str) -> Option<i64> {
    get_string(path, attribute)?.parse().ok()
}

pub fn set_int(path: &Path, attribute: &str, value: i64) -> bool {
    set_string(path, attribute, &value.to_string())
}

pub fn remove(path: &Path, attribute: &str) -> bool {
    xattr::remove(path, namespaced(attribute)).is_ok()
}

/// Whether the filesystem holding `probe_path` supports extended
/// attributes at all. Checked once at startup so the attribute fast paths
/// can be skipped wholesale on filesystems without them.
pub fn supported(probe_path: &Path) -> bool {
    set_int(probe_path, "attr-probe", 1)
}
