//! The resolve-by-content-type pipeline behind the `open` verb.
//!
//! Precedence is strict: the per-file override attribute, then the
//! per-type default, then the capability scan (exact type first, type
//! family as fallback), then the chooser. Whatever wins is handed to the
//! `launch` pipeline with the document as its argument.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::{debug, warn};

use crate::attr;
use crate::bundle::BundleKind;
use crate::detect;
use crate::executable;
use crate::launcher::{self, Collaborators};
use crate::registry::Registry;
use crate::ui::Selection;

/// Per-file override attribute naming the application to open with.
const OPEN_WITH_ATTRIBUTE: &str = "open-with";

/// The application that owns folders, regardless of what else claims
/// `inode/*` types.
const FILE_MANAGER: &str = "Filer";

/// Content types with no useful opener; refused outright instead of
/// guessed at.
const REFUSED_TYPES: &[&str] = &[detect::UNKNOWN_TYPE];

/// Families that must never fall back to a family-wide match.
const NO_FAMILY_FALLBACK: &[&str] = &["x-scheme-handler"];

/// Resolve the application for `target` and run it. Returns the exit code
/// this tool should terminate with.
pub fn open(
    registry: &mut Registry,
    collaborators: &Collaborators,
    target: &str,
    args: &[String],
    chooser_requested: bool,
) -> Result<i32> {
    let path = Path::new(target);
    let url_like = is_url_like(target);

    if !path.exists() && !url_like {
        match fs::read_link(path) {
            Ok(link_target) => eprintln!(
                "The symlink '{}' can't be opened because the target '{}' can't be found.",
                target,
                link_target.display()
            ),
            Err(_) => eprintln!("'{target}' can't be opened because it can't be found."),
        }
        return Ok(1);
    }

    // A directly runnable target is a launch request, not a document.
    if !url_like && !chooser_requested && !path.is_dir() && BundleKind::of(path) == BundleKind::Plain
    {
        if executable::is_runnable(path) {
            debug!("{target} is executable; launching it instead of opening it");
            return launcher::launch(registry, collaborators, target, args);
        }
        if executable::is_runnable_or_recognized(path) {
            if executable::request_make_runnable(path, collaborators.confirmer) {
                return launcher::launch(registry, collaborators, target, args);
            }
            return Ok(1);
        }
    }

    let mut subject = target.to_string();
    let mut app_to_launch: Option<String> = None;

    // Per-file override, honored only while the named application is still
    // registered; anything else would let a stray attribute run arbitrary
    // commands.
    if !url_like {
        if let Some(open_with) = attr::get_string(path, OPEN_WITH_ATTRIBUTE) {
            if !open_with.is_empty() && registry.exists(Path::new(&open_with))? {
                debug!("honoring the open-with override {open_with}");
                app_to_launch = Some(open_with);
            }
        }
    }

    if app_to_launch.is_none() {
        // Legacy URI forms normalize to plain paths before typing.
        if let Some(rest) = subject.strip_prefix("file://") {
            subject = percent_decode(rest);
        }
        if subject.starts_with("computer://") && subject.ends_with(".mount") {
            let mount = subject
                .trim_start_matches("computer://")
                .trim_end_matches(".mount");
            subject = format!("/media{mount}");
            app_to_launch = Some(FILE_MANAGER.to_string());
        }
    }

    let mut content_type = String::new();
    let mut removal_candidates: Vec<PathBuf> = Vec::new();

    if app_to_launch.is_none() {
        let subject_path = PathBuf::from(&subject);
        if is_url_like(&subject) {
            let scheme = subject.split(":/").next().unwrap_or("").trim_end_matches(':');
            content_type = format!("x-scheme-handler/{scheme}");
        } else {
            // Descriptors are programs, never documents.
            if BundleKind::of(&subject_path) == BundleKind::LauncherDescriptor {
                debug!("{subject} is a launcher descriptor; launching it");
                return launcher::launch(registry, collaborators, &subject, args);
            }
            content_type = detect::content_type_for_path(&subject_path);
            if content_type == detect::ZERO_SIZE_TYPE || content_type == detect::EMPTY_TYPE {
                // Empty files open like empty text files.
                content_type = detect::PLAIN_TEXT_TYPE.to_string();
            }
            if detect::family(&content_type) == "inode" {
                // Folders belong to the file manager, not whatever
                // application last claimed directory types.
                app_to_launch = Some(FILE_MANAGER.to_string());
            } else if REFUSED_TYPES.contains(&content_type.as_str()) {
                eprintln!("Cannot open {subject} of type '{content_type}'.");
                return Ok(1);
            }
        }
        debug!("'{subject}' has content type {content_type}");
    }

    if app_to_launch.is_none() {
        if let Some(default) = registry.default_for_type(&content_type)? {
            debug!("using the default application for {content_type}");
            app_to_launch = Some(default.to_string_lossy().into_owned());
        }
    }

    if app_to_launch.is_none() {
        let (exact, family) = candidates_for(registry, &content_type, &mut removal_candidates)?;
        let mut candidates = exact;
        if candidates.is_empty() && !NO_FAMILY_FALLBACK.contains(&detect::family(&content_type)) {
            debug!("no exact candidates; falling back to the {} family", detect::family(&content_type));
            candidates = family;
        }

        let display_subject = display_subject(&subject);
        if chooser_requested || candidates.len() != 1 {
            match collaborators
                .chooser
                .choose(&display_subject, &content_type, &candidates)
            {
                Some(selection) => {
                    apply_selection(registry, &subject, url_like, &content_type, &selection);
                    app_to_launch = Some(selection.application.to_string_lossy().into_owned());
                }
                None if candidates.is_empty() => {
                    eprintln!(
                        "Found no application that can open '{display_subject}' of type '{content_type}'."
                    );
                    garbage_collect(registry, &removal_candidates);
                    return Ok(1);
                }
                None => {
                    garbage_collect(registry, &removal_candidates);
                    return Ok(0);
                }
            }
        } else {
            app_to_launch = Some(candidates[0].to_string_lossy().into_owned());
        }
    }

    garbage_collect(registry, &removal_candidates);

    let application = match app_to_launch {
        Some(application) => application,
        // Unreachable by construction; every branch above either assigns
        // or returns.
        None => {
            eprintln!("'{target}' can't be opened.");
            return Ok(1);
        }
    };
    debug!("opening '{subject}' with {application}");
    launcher::launch(registry, collaborators, &application, &[subject])
}

fn is_url_like(target: &str) -> bool {
    target.contains(":/")
}

/// Scan the registry's capability associations. Returns exact-type and
/// family matches separately, both in registry order.
fn candidates_for(
    registry: &mut Registry,
    content_type: &str,
    removal_candidates: &mut Vec<PathBuf>,
) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
    let mut exact = Vec::new();
    let mut family = Vec::new();
    for application in registry.list()? {
        let claimed = match registry.content_types_for(&application) {
            Some(claimed) => claimed,
            None => {
                // Capability unreadable; queue for the self-healing pass.
                if !removal_candidates.contains(&application) {
                    removal_candidates.push(application);
                }
                continue;
            }
        };
        for claim in &claimed {
            if claim == content_type && !exact.contains(&application) {
                exact.push(application.clone());
            }
            if detect::family(claim) == detect::family(content_type)
                && !family.contains(&application)
            {
                family.push(application.clone());
            }
        }
    }
    Ok((exact, family))
}

/// Persist the chooser's remember flags: the per-file attribute and the
/// per-type default record.
fn apply_selection(
    registry: &mut Registry,
    subject: &str,
    url_like: bool,
    content_type: &str,
    selection: &Selection,
) {
    if selection.remember_for_file && !url_like {
        let value = selection.application.to_string_lossy();
        if !attr::set_string(Path::new(subject), OPEN_WITH_ATTRIBUTE, &value) {
            warn!("cannot set the open-with attribute on {subject}");
        }
    }
    if selection.remember_for_type {
        if let Err(err) = registry.set_default_for_type(content_type, &selection.application) {
            warn!("cannot record the default for {content_type}: {err}");
        }
    }
}

fn garbage_collect(registry: &mut Registry, removal_candidates: &[PathBuf]) {
    for candidate in removal_candidates {
        if let Err(err) = registry.handle(candidate) {
            warn!("cannot reconcile {}: {}", candidate.display(), err);
        }
    }
}

/// What dialogs and messages call the subject: the scheme for URLs, the
/// file name for paths.
fn display_subject(subject: &str) -> String {
    if is_url_like(subject) {
        let scheme = subject.split(":/").next().unwrap_or("").trim_end_matches(':');
        format!("{scheme}://")
    } else {
        Path::new(subject)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| subject.to_string())
    }
}

/// Minimal %XX decoding for legacy `file://` URIs.
fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = &input[i + 1..i + 3];
            if let Ok(byte) = u8::from_str_radix(hex, 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}
