//! Translation of early-failure stderr into actionable messages.
//!
//! Tried in order, first match wins; anything unrecognized is shown
//! verbatim, elided to a usable length. Classification is best effort by
//! design: a wrong guess here only costs the user a generic message.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;

use crate::ui::PackageIndex;

const KERNEL_TOO_OLD_MARKER: &str = "FATAL: kernel too old";
const SANDBOX_MARKER: &str = "SUID sandbox helper binary was found, but is not configured correctly";

/// Lines kept from each end of an unclassified message.
const ELIDE_KEEP_LINES: usize = 10;

fn linker_version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"ld-elf\.so\.1: (\S+): version (\S+) required by (\S+) not found")
            .expect("static pattern")
    })
}

fn missing_module_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"ModuleNotFoundError: No module named '([^']+)'").expect("static pattern")
    })
}

/// Turn raw child stderr into the message shown to the user.
pub fn classify(stderr_text: &str, packages: &dyn PackageIndex) -> String {
    if stderr_text.contains(KERNEL_TOO_OLD_MARKER) {
        return "The Linux compatibility layer reports an older kernel version than what is required to run this application.\n\nPlease run\nsudo sysctl compat.linux.osrelease=5.0.0\nand try again.".to_string();
    }

    if let Some(captures) = linker_version_pattern().captures(stderr_text) {
        let library = &captures[1];
        let version = &captures[2];
        let short = Path::new(library)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or(library);
        let mut message =
            format!("This application requires at least version {version} of {short} to run.");
        match packages.update_command_for(Path::new(library)) {
            Some(command) => {
                message.push_str(&format!("\n\nPlease update it with\n{command}\nand try again."));
            }
            None => message.push_str("\n\nPlease update it and try again."),
        }
        return message;
    }

    if stderr_text.contains(SANDBOX_MARKER) {
        return "This application's sandbox is not usable on this system.\n\nTry launching it with the --no-sandbox argument.".to_string();
    }

    if let Some(captures) = missing_module_pattern().captures(stderr_text) {
        return format!(
            "This application requires the Python module {} to run.\n\nPlease install it and try again.",
            &captures[1]
        );
    }

    elide(stderr_text)
}

/// Keep the first and last `ELIDE_KEEP_LINES` lines with a `...` marker in
/// between, so the message stays readable for very chatty failures.
fn elide(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= ELIDE_KEEP_LINES * 2 {
        return text.trim_end().to_string();
    }
    let mut kept: Vec<&str> = Vec::with_capacity(ELIDE_KEEP_LINES * 2 + 1);
    kept.extend(&lines[..ELIDE_KEEP_LINES]);
    kept.push("...");
    kept.extend(&lines[lines.len() - ELIDE_KEEP_LINES..]);
    kept.join("\n")
}
