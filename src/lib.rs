use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub mod attr;
pub mod bundle;
pub mod detect;
pub mod diagnose;
pub mod discovery;
pub mod executable;
pub mod launcher;
pub mod opener;
pub mod registry;
pub mod supervise;
pub mod ui;

pub use bundle::{BundleKind, Resolution, ResolvedTarget};
pub use registry::Registry;
pub use supervise::{LaunchEnv, Outcome, SUPERVISION_WINDOW};

/// Override for the registry storage root.
pub const DATA_DIR_ENV: &str = "LAUNCHKIT_DATA_DIR";
const DATA_DIR_NAME: &str = "launchkit";

/// The directory holding the registry document: `LAUNCHKIT_DATA_DIR` when
/// set and non-empty, the per-user data directory otherwise.
pub fn data_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os(DATA_DIR_ENV) {
        if !dir.is_empty() {
            return Ok(PathBuf::from(dir));
        }
    }
    let base = dirs::data_dir().context("cannot determine the user data directory")?;
    Ok(base.join(DATA_DIR_NAME))
}

/// Absolute path of `name` on the `$PATH`, or `None` when no executable
/// file by that name is found.
pub fn find_on_path(name: &str) -> Option<PathBuf> {
    let paths = env::var_os("PATH")?;
    for dir in env::split_paths(&paths) {
        let candidate = dir.join(name);
        if candidate.is_file() && executable::is_runnable(&candidate) {
            return Some(candidate);
        }
    }
    None
}
