//! The resolve-and-run pipeline behind the `launch` verb.
//!
//! Resolution strategies run in a fixed order: the literal path, the
//! `$PATH`, then the registry by suffix-stripped name. Exhausting the list
//! is terminal for the invocation; there is no fallback past it.

use std::path::Path;

use anyhow::{bail, Result};
use log::{debug, info, warn};

use crate::bundle::{self, BundleKind, Resolution, ResolvedTarget};
use crate::diagnose;
use crate::executable;
use crate::find_on_path;
use crate::registry::Registry;
use crate::supervise::{self, LaunchEnv, Outcome};
use crate::ui::{AppChooser, Confirmer, Notifier, PackageIndex, WindowSystem};

/// Application names that always get a fresh instance, even when windows
/// from a previous one are still open.
const ALWAYS_MULTI_INSTANCE: &[&str] = &["Menu"];

/// The external services both pipelines need, threaded explicitly instead
/// of living in globals.
pub struct Collaborators<'a> {
    pub confirmer: &'a dyn Confirmer,
    pub chooser: &'a dyn AppChooser,
    pub windows: &'a dyn WindowSystem,
    pub notifier: &'a dyn Notifier,
    pub packages: &'a dyn PackageIndex,
}

/// Resolve `target` and run it under supervision. Returns the exit code
/// this tool should terminate with.
pub fn launch(
    registry: &mut Registry,
    collaborators: &Collaborators,
    target: &str,
    args: &[String],
) -> Result<i32> {
    let trimmed = target.trim_end_matches('/');
    let requested = if trimmed.is_empty() { target } else { trimmed };
    debug!("launch request for '{requested}'");

    let resolved = match resolve_target(registry, collaborators, requested)? {
        Some(resolved) => resolved,
        None => {
            eprintln!("The application '{requested}' can't be launched because it can't be found.");
            return Ok(1);
        }
    };

    // Descriptor argument templates splice the caller's arguments in;
    // everything else just appends them.
    let args = if resolved.base_args.is_empty() {
        args.to_vec()
    } else {
        bundle::substitute_placeholders(&resolved.base_args, args)
    };

    let launch_env = LaunchEnv {
        executable: resolved.program.clone(),
        bundle: bundle::bundle_root(&resolved.source),
    };
    debug!("environment overlay: {launch_env:?}");

    // Singleton-window short circuit: only for argument-less launches of a
    // bundle that is not marked always-multi-instance.
    if args.is_empty() && !ALWAYS_MULTI_INSTANCE.contains(&requested) {
        if let Some(bundle_path) = launch_env.bundle.as_deref() {
            if activate_existing(collaborators.windows, bundle_path) {
                info!("activated existing windows instead of launching a new instance");
                return Ok(0);
            }
        }
    }

    let display_name = display_name(&resolved, requested);
    if launch_env.bundle.is_some() {
        collaborators.notifier.launching(&display_name);
    }

    let outcome = supervise::run(&resolved.program, &args, &launch_env, || {
        // The launch took: remember the bundle so future lookups by name
        // succeed without a rescan.
        if let Some(bundle_path) = launch_env.bundle.as_deref() {
            if let Err(err) = registry.handle(bundle_path) {
                warn!("cannot record {}: {}", bundle_path.display(), err);
            }
        }
    })?;

    match outcome {
        Outcome::EarlyFailure { code, stderr } => {
            let text = if stderr.trim().is_empty() {
                format!("{display_name} exited unexpectedly\nwith exit code {code}")
            } else {
                stderr
            };
            eprintln!("{}", diagnose::classify(&text, collaborators.packages));
            collaborators.notifier.finished();
            Ok(code)
        }
        Outcome::Completed { code } => Ok(code),
    }
}

/// The ordered resolution strategies.
fn resolve_target(
    registry: &mut Registry,
    collaborators: &Collaborators,
    requested: &str,
) -> Result<Option<ResolvedTarget>> {
    // First: the request is a path to a bundle or executable.
    match bundle::resolve(Path::new(requested))? {
        Resolution::Target(target) => return Ok(Some(target)),
        Resolution::NeedsExecBit(path) => {
            // Recognized executable content without the bit is
            // user-recoverable, but refusal aborts the whole launch.
            if executable::request_make_runnable(&path, collaborators.confirmer) {
                return Ok(Some(ResolvedTarget::plain(path)));
            }
            bail!("'{}' was not made executable", path.display());
        }
        Resolution::NotFound => {}
    }

    // Second: a bare command name on the $PATH.
    if let Some(found) = find_on_path(requested) {
        debug!("found {} on the $PATH", found.display());
        return Ok(Some(ResolvedTarget::plain(found)));
    }

    // Third: a known application whose suffix-stripped name ends with the
    // request. Entries that vanished since they were recorded are pruned
    // here rather than surfaced.
    for candidate in registry.list()? {
        let stripped = bundle::strip_bundle_suffix(&candidate.to_string_lossy());
        if !stripped.ends_with(requested) {
            continue;
        }
        if !candidate.exists() {
            registry.handle(&candidate)?;
            continue;
        }
        debug!("selected {} from the registry", candidate.display());
        match bundle::resolve(&candidate)? {
            Resolution::Target(target) => return Ok(Some(target)),
            _ => continue,
        }
    }

    Ok(None)
}

/// What notifications and synthesized failure messages call the launch:
/// the descriptor's `Name` when there is one, the suffix-stripped file
/// name otherwise.
fn display_name(resolved: &ResolvedTarget, requested: &str) -> String {
    if BundleKind::of(&resolved.source) == BundleKind::LauncherDescriptor {
        if let Ok(entry) = bundle::DesktopEntry::parse(&resolved.source) {
            if let Some(name) = entry.name {
                return name;
            }
        }
    }
    let file_name = resolved
        .source
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or(requested);
    bundle::strip_bundle_suffix(file_name)
}

/// Activate the first existing window for `bundle_path` owned by the
/// current user. Another user's windows are never focused.
fn activate_existing(windows: &dyn WindowSystem, bundle_path: &Path) -> bool {
    let uid = supervise::current_uid();
    for window in windows.windows_for_bundle(bundle_path) {
        if supervise::process_owner_uid(window.pid) != Some(uid) {
            debug!("skipping window {} owned by another user", window.id);
            continue;
        }
        if windows.activate(&window) {
            return true;
        }
    }
    false
}
