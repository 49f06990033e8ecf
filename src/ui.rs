//! Seams to the desktop services this tool talks to but does not
//! implement: interactive confirmation, the "choose an application"
//! dialog, window enumeration and activation, launch notifications, and
//! the package index consulted by diagnostics. Each is a trait with a
//! default implementation that works in a plain terminal session.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use log::debug;

use crate::find_on_path;

pub trait Confirmer {
    fn confirm(&self, question: &str) -> bool;
}

/// y/N prompt on the controlling terminal.
pub struct TerminalConfirmer;

impl Confirmer for TerminalConfirmer {
    fn confirm(&self, question: &str) -> bool {
        eprint!("{question} [y/N] ");
        let _ = io::stderr().flush();
        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return false;
        }
        matches!(line.trim(), "y" | "Y" | "yes")
    }
}

/// What the user picked in the selection dialog, plus the two remember
/// flags the dialog offers.
#[derive(Clone, Debug)]
pub struct Selection {
    pub application: PathBuf,
    /// Remember this pick for exactly this file (`open-with` attribute).
    pub remember_for_file: bool,
    /// Remember this pick as the default for the whole content type.
    pub remember_for_type: bool,
}

pub trait AppChooser {
    /// Present `candidates` (already ordered) for `subject` of
    /// `content_type`. `None` means the user cancelled.
    fn choose(&self, subject: &str, content_type: &str, candidates: &[PathBuf])
        -> Option<Selection>;
}

/// Fallback chooser for sessions without the graphical dialog: picks the
/// first candidate deterministically and remembers nothing. An empty
/// candidate list reads as a cancellation.
pub struct FirstCandidateChooser;

impl AppChooser for FirstCandidateChooser {
    fn choose(
        &self,
        _subject: &str,
        _content_type: &str,
        candidates: &[PathBuf],
    ) -> Option<Selection> {
        candidates.first().map(|application| Selection {
            application: application.clone(),
            remember_for_file: false,
            remember_for_type: false,
        })
    }
}

/// Handle to a window owned by a running application instance.
#[derive(Clone, Copy, Debug)]
pub struct WindowRef {
    pub id: u64,
    /// Pid of the window's backing process, for the ownership check.
    pub pid: u32,
}

pub trait WindowSystem {
    /// Windows whose backing process was launched from `bundle`.
    fn windows_for_bundle(&self, bundle: &Path) -> Vec<WindowRef>;
    fn activate(&self, window: &WindowRef) -> bool;
}

/// Stand-in for sessions without a window-system connection; every bundle
/// appears to have no windows, so launches always spawn.
pub struct NoWindowSystem;

impl WindowSystem for NoWindowSystem {
    fn windows_for_bundle(&self, _bundle: &Path) -> Vec<WindowRef> {
        Vec::new()
    }

    fn activate(&self, _window: &WindowRef) -> bool {
        false
    }
}

pub trait Notifier {
    /// Fire and forget: an application with this display name is starting.
    fn launching(&self, display_name: &str);
    /// The launch attempt is over, one way or the other.
    fn finished(&self);
}

pub struct NoNotifier;

impl Notifier for NoNotifier {
    fn launching(&self, _display_name: &str) {}
    fn finished(&self) {}
}

pub trait PackageIndex {
    /// A command the user can run to update the package owning `path`.
    fn update_command_for(&self, path: &Path) -> Option<String>;
}

/// Queries the `pkg` database when the binary is available.
pub struct PkgDatabase;

impl PackageIndex for PkgDatabase {
    fn update_command_for(&self, path: &Path) -> Option<String> {
        let pkg = find_on_path("pkg")?;
        let output = Command::new(pkg).arg("which").arg(path).output().ok()?;
        if !output.status.success() {
            return None;
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        let package = stdout
            .lines()
            .find_map(|line| line.rsplit_once("was installed by package "))
            .map(|(_, package)| package.trim())?;
        // Versions are dash-joined onto the package name.
        let name = package
            .rsplit_once('-')
            .map(|(name, _version)| name)
            .unwrap_or(package);
        if name.is_empty() {
            return None;
        }
        debug!("{} belongs to package {}", path.display(), name);
        Some(format!("sudo pkg install {name}"))
    }
}

/// Inert package index for tests and systems without `pkg`.
pub struct NoPackageIndex;

impl PackageIndex for NoPackageIndex {
    fn update_command_for(&self, _path: &Path) -> Option<String> {
        None
    }
}
