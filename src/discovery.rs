//! Filesystem discovery of installable application bundles.
//!
//! Walks a prioritized list of well-known directories and feeds every
//! bundle-suffixed entry to the registry. Descent is pruned at directories
//! with no bundle-suffixed direct child, which keeps full-filesystem scans
//! tractable at the cost of missing deeply nested loose executables.

use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Result;
use log::{debug, warn};

use crate::bundle::BundleKind;
use crate::registry::Registry;

/// Directory names never descended into.
const DENYLIST: &[&str] = &["Autostart"];

/// Colon-separated override of the discovery roots.
pub const APP_DIRS_ENV: &str = "LAUNCHKIT_APP_DIRS";

/// The fixed, deduplicated list of directories worth scanning: user-scoped
/// bin-style locations first, then the system-wide conventions, then the
/// legacy XDG application directories.
pub fn well_known_roots() -> Vec<PathBuf> {
    if let Some(raw) = env::var_os(APP_DIRS_ENV) {
        return env::split_paths(&raw).collect();
    }
    let mut roots = Vec::new();
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join("Applications"));
        roots.push(home.join("bin"));
        roots.push(home.join(".bin"));
    }
    roots.extend(
        [
            "/Applications",
            "/System",
            "/Library",
            "/usr/local/GNUstep/Local/Applications",
            "/usr/local/GNUstep/System/Applications",
            "/usr/GNUstep/Local/Applications",
            "/usr/GNUstep/System/Applications",
        ]
        .iter()
        .map(PathBuf::from),
    );
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join(".local/share/applications"));
    }
    roots.push(PathBuf::from("/usr/local/share/applications"));
    roots.push(PathBuf::from("/usr/share/applications"));
    dedup(roots)
}

fn dedup(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = BTreeSet::new();
    roots
        .into_iter()
        .filter(|root| seen.insert(root.clone()))
        .collect()
}

/// Walk `roots` and register every bundle found.
///
/// An explicit worklist bounds the stack depth, and a visited set of
/// canonical paths breaks symlink cycles. A directory containing zero
/// bundle-suffixed entries is skipped entirely, descent included.
pub fn discover(roots: &[PathBuf], registry: &mut Registry) -> Result<()> {
    let started = Instant::now();
    let mut visited: BTreeSet<PathBuf> = BTreeSet::new();
    let mut worklist: Vec<PathBuf> = roots.iter().rev().cloned().collect();

    while let Some(directory) = worklist.pop() {
        let canonical = match fs::canonicalize(&directory) {
            Ok(canonical) => canonical,
            Err(_) => continue,
        };
        if !visited.insert(canonical) {
            continue;
        }
        let entries = match sorted_entries(&directory) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("skipping {}: {}", directory.display(), err);
                continue;
            }
        };
        if !entries.iter().any(|entry| BundleKind::of(entry).is_bundle()) {
            continue;
        }
        for entry in entries {
            let name = entry.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if DENYLIST.contains(&name) {
                continue;
            }
            if BundleKind::of(&entry).is_bundle() {
                if let Err(err) = registry.handle(&entry) {
                    warn!("cannot index {}: {}", entry.display(), err);
                }
            } else if entry.is_dir() {
                worklist.push(entry);
            }
        }
    }

    debug!("application discovery took {:?}", started.elapsed());
    Ok(())
}

fn sorted_entries(directory: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();
    Ok(entries)
}
