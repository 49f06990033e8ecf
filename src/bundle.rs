//! Bundle classification and resolution.
//!
//! Everything that decides "what do we actually execute for this path"
//! lives here: the bundle-kind taxonomy, the fixed entry-point rules, the
//! minimal launcher-descriptor parser (`Exec`, `MimeType`, `Name` only),
//! and the placeholder substitution that splices caller arguments into a
//! descriptor's argument template.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::debug;

use crate::executable;
use crate::find_on_path;

const DIRECTORY_BUNDLE_SUFFIXES: &[&str] = &[".app", ".AppDir"];
const PORTABLE_IMAGE_SUFFIXES: &[&str] = &[".AppImage", ".appimage"];
pub const LAUNCHER_DESCRIPTOR_SUFFIX: &str = ".desktop";

/// Every recognized bundle suffix, for name filters and identity
/// stripping.
pub const BUNDLE_SUFFIXES: &[&str] = &[".app", ".AppDir", ".desktop", ".AppImage", ".appimage"];

/// Entry-point name inside an `.AppDir` bundle.
const APPDIR_ENTRY_POINT: &str = "AppRun";

/// Helper program substituted for portable images that cannot be executed
/// directly on this platform.
const PORTABLE_IMAGE_HELPER: &str = "runappimage";

/// How a path packages its application, decided once by suffix and
/// consumed by pattern matching everywhere else.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BundleKind {
    Plain,
    DirectoryBundle,
    PortableImage,
    LauncherDescriptor,
}

impl BundleKind {
    pub fn of(path: &Path) -> Self {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if DIRECTORY_BUNDLE_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            BundleKind::DirectoryBundle
        } else if PORTABLE_IMAGE_SUFFIXES.iter().any(|s| name.ends_with(s)) {
            BundleKind::PortableImage
        } else if name.ends_with(LAUNCHER_DESCRIPTOR_SUFFIX) {
            BundleKind::LauncherDescriptor
        } else {
            BundleKind::Plain
        }
    }

    pub fn is_bundle(self) -> bool {
        !matches!(self, BundleKind::Plain)
    }
}

/// A resolved launchable: the concrete program, the argument template from
/// a descriptor (empty otherwise), and the bundle-or-executable path the
/// resolution started from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub program: PathBuf,
    pub base_args: Vec<String>,
    pub source: PathBuf,
}

impl ResolvedTarget {
    pub fn plain(path: PathBuf) -> Self {
        ResolvedTarget {
            program: path.clone(),
            base_args: Vec::new(),
            source: path,
        }
    }
}

/// Outcome of resolving one candidate path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Target(ResolvedTarget),
    /// Recognized executable content without the execute bit; the caller
    /// decides whether to offer the consent prompt.
    NeedsExecBit(PathBuf),
    NotFound,
}

/// Resolve `path` to a launchable program, if it denotes one.
///
/// Nonexistent paths are `NotFound` so the caller can fall through to its
/// next strategy. A descriptor whose program cannot be found on the
/// `$PATH` is a hard error, surfaced to the user rather than retried.
pub fn resolve(path: &Path) -> Result<Resolution> {
    if !path.exists() {
        return Ok(Resolution::NotFound);
    }
    match BundleKind::of(path) {
        BundleKind::DirectoryBundle => {
            let entry = directory_bundle_entry_point(path);
            if executable::is_runnable(&entry) {
                debug!(
                    "{} resolves to entry point {}",
                    path.display(),
                    entry.display()
                );
                Ok(Resolution::Target(ResolvedTarget {
                    program: entry,
                    base_args: Vec::new(),
                    source: path.to_path_buf(),
                }))
            } else {
                Ok(Resolution::NotFound)
            }
        }
        BundleKind::PortableImage => Ok(Resolution::Target(portable_image_target(path))),
        BundleKind::LauncherDescriptor => Ok(Resolution::Target(descriptor_target(path)?)),
        BundleKind::Plain => {
            if path.is_dir() {
                return Ok(Resolution::NotFound);
            }
            if executable::is_runnable(path) {
                Ok(Resolution::Target(ResolvedTarget::plain(path.to_path_buf())))
            } else if executable::is_runnable_or_recognized(path) {
                Ok(Resolution::NeedsExecBit(path.to_path_buf()))
            } else {
                Ok(Resolution::NotFound)
            }
        }
    }
}

/// `<bundle>/AppRun` for `.AppDir`, `<bundle>/<name-without-suffix>` for
/// `.app`. These are the only two entry-point rules; nothing is ever
/// inferred another way.
fn directory_bundle_entry_point(bundle: &Path) -> PathBuf {
    let name = bundle.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if name.ends_with(".AppDir") {
        return bundle.join(APPDIR_ENTRY_POINT);
    }
    // The bundle may be reached through a symlink; the inner executable is
    // named after the resolved bundle directory.
    let resolved = fs::canonicalize(bundle).unwrap_or_else(|_| bundle.to_path_buf());
    let resolved_name = resolved.file_name().and_then(|n| n.to_str()).unwrap_or(name);
    bundle.join(strip_bundle_suffix(resolved_name))
}

/// Portable images are launchable unconditionally: they may be
/// self-mounting and deliberately skip the execute-bit gate. When the
/// image itself cannot be executed, the helper wrapper stands in.
fn portable_image_target(image: &Path) -> ResolvedTarget {
    if !executable::is_runnable(image) {
        if let Some(helper) = find_on_path(PORTABLE_IMAGE_HELPER) {
            debug!(
                "{} is not executable; wrapping with {}",
                image.display(),
                helper.display()
            );
            return ResolvedTarget {
                program: helper,
                base_args: vec![image.to_string_lossy().into_owned()],
                source: image.to_path_buf(),
            };
        }
    }
    ResolvedTarget {
        program: image.to_path_buf(),
        base_args: Vec::new(),
        source: image.to_path_buf(),
    }
}

fn descriptor_target(descriptor: &Path) -> Result<ResolvedTarget> {
    let entry = DesktopEntry::parse(descriptor)?;
    let exec = match entry.exec {
        Some(exec) => exec,
        None => bail!("{} has no Exec line", descriptor.display()),
    };
    let mut tokens = split_command(&exec);
    if tokens.is_empty() {
        bail!("{} has an empty Exec line", descriptor.display());
    }
    let program_token = tokens.remove(0);
    let program = if program_token.contains('/') {
        PathBuf::from(&program_token)
    } else {
        find_on_path(&program_token).with_context(|| {
            format!(
                "program '{}' from {} was not found on the $PATH",
                program_token,
                descriptor.display()
            )
        })?
    };
    Ok(ResolvedTarget {
        program,
        base_args: tokens,
        source: descriptor.to_path_buf(),
    })
}

/// Substitute descriptor placeholders with the caller's arguments:
/// `%f`/`%u` become the first caller argument, `%F`/`%U` the whole list,
/// and every other token passes through literally. Each placeholder is
/// substituted independently, in order of appearance, from the same
/// caller argument list.
pub fn substitute_placeholders(base_args: &[String], caller_args: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for token in base_args {
        match token.as_str() {
            "%f" | "%u" => {
                if let Some(first) = caller_args.first() {
                    out.push(first.clone());
                }
            }
            "%F" | "%U" => out.extend(caller_args.iter().cloned()),
            _ => out.push(token.clone()),
        }
    }
    out
}

/// Remove recognized bundle suffixes from the end of `name`,
/// case-insensitively, until none remains. Identity comparison only,
/// never a filesystem operation.
pub fn strip_bundle_suffix(name: &str) -> String {
    let mut out = name;
    loop {
        let lower = out.to_ascii_lowercase();
        let matched = BUNDLE_SUFFIXES
            .iter()
            .find(|suffix| lower.ends_with(&suffix.to_ascii_lowercase()));
        match matched {
            Some(suffix) => out = &out[..out.len() - suffix.len()],
            None => return out.to_string(),
        }
    }
}

/// Canonical root of the most-nested bundle enclosing `path`: the
/// surrounding `.app`/`.AppDir` directory for programs inside one, the
/// file itself for portable images and descriptors, `None` for anything
/// not bundled.
pub fn bundle_root(path: &Path) -> Option<PathBuf> {
    for ancestor in path.ancestors() {
        match BundleKind::of(ancestor) {
            BundleKind::DirectoryBundle => {
                return Some(fs::canonicalize(ancestor).unwrap_or_else(|_| ancestor.to_path_buf()));
            }
            BundleKind::PortableImage | BundleKind::LauncherDescriptor if ancestor == path => {
                return Some(fs::canonicalize(ancestor).unwrap_or_else(|_| ancestor.to_path_buf()));
            }
            _ => {}
        }
    }
    None
}

/// The minimal slice of a launcher descriptor this tool consumes.
#[derive(Clone, Debug, Default)]
pub struct DesktopEntry {
    pub exec: Option<String>,
    pub mime_types: Vec<String>,
    pub name: Option<String>,
}

impl DesktopEntry {
    pub fn parse(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Self::parse_str(&text))
    }

    /// First occurrence of each key inside `[Desktop Entry]` wins. This is
    /// deliberately not a full desktop-entry parser.
    pub fn parse_str(text: &str) -> Self {
        let mut entry = DesktopEntry::default();
        let mut in_desktop_entry = true;
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[') {
                in_desktop_entry = section.strip_suffix(']').map(str::trim) == Some("Desktop Entry");
                continue;
            }
            if !in_desktop_entry {
                continue;
            }
            let (key, value) = match line.split_once('=') {
                Some(pair) => pair,
                None => continue,
            };
            match (key.trim(), value.trim()) {
                ("Exec", value) if entry.exec.is_none() => {
                    // `;` starts an inline comment in an Exec line.
                    let value = value.split(';').next().unwrap_or("").trim();
                    if !value.is_empty() {
                        entry.exec = Some(value.to_string());
                    }
                }
                ("MimeType", value) if entry.mime_types.is_empty() => {
                    entry.mime_types = split_content_types(value);
                }
                ("Name", value) if entry.name.is_none() && !value.is_empty() => {
                    entry.name = Some(value.to_string());
                }
                _ => {}
            }
        }
        entry
    }
}

/// Split a `;`-separated content-type list, dropping whitespace-only
/// segments (the grammar treats everything after the list as comment).
pub fn split_content_types(raw: &str) -> Vec<String> {
    raw.split(';')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

/// Split a command line into tokens with conventional shell quoting:
/// whitespace separates, single quotes are literal, double quotes honor
/// backslash escapes, a bare backslash escapes the next character.
pub fn split_command(line: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum Quote {
        None,
        Single,
        Double,
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut quote = Quote::None;
    let mut chars = line.chars();
    while let Some(c) = chars.next() {
        match quote {
            Quote::Single => {
                if c == '\'' {
                    quote = Quote::None;
                } else {
                    current.push(c);
                }
            }
            Quote::Double => match c {
                '"' => quote = Quote::None,
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                    }
                }
                _ => current.push(c),
            },
            Quote::None => match c {
                c if c.is_whitespace() => {
                    if in_token {
                        tokens.push(std::mem::take(&mut current));
                        in_token = false;
                    }
                }
                '\'' => {
                    quote = Quote::Single;
                    in_token = true;
                }
                '"' => {
                    quote = Quote::Double;
                    in_token = true;
                }
                '\\' => {
                    if let Some(next) = chars.next() {
                        current.push(next);
                        in_token = true;
                    }
                }
                _ => {
                    current.push(c);
                    in_token = true;
                }
            },
        }
    }
    if in_token {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::TempDir;

    fn write_executable(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }

    #[test]
    fn kinds_classify_by_suffix() {
        assert_eq!(BundleKind::of(Path::new("/a/Foo.app")), BundleKind::DirectoryBundle);
        assert_eq!(BundleKind::of(Path::new("/a/Foo.AppDir")), BundleKind::DirectoryBundle);
        assert_eq!(BundleKind::of(Path::new("/a/Foo.AppImage")), BundleKind::PortableImage);
        assert_eq!(BundleKind::of(Path::new("/a/foo.appimage")), BundleKind::PortableImage);
        assert_eq!(
            BundleKind::of(Path::new("/a/foo.desktop")),
            BundleKind::LauncherDescriptor
        );
        assert_eq!(BundleKind::of(Path::new("/bin/ls")), BundleKind::Plain);
    }

    #[test]
    fn strip_bundle_suffix_is_idempotent() {
        for name in ["Foo.app", "Foo.AppDir", "Foo.desktop", "Foo.AppImage", "Foo.appimage", "Foo.app.app", "Foo"] {
            let once = strip_bundle_suffix(name);
            let twice = strip_bundle_suffix(&once);
            assert_eq!(once, twice, "stripping {name} twice changed the result");
        }
        assert_eq!(strip_bundle_suffix("Foo.APP"), "Foo");
        assert_eq!(strip_bundle_suffix("LibreOffice.app"), "LibreOffice");
        assert_eq!(strip_bundle_suffix("plain-name"), "plain-name");
    }

    #[test]
    fn app_bundle_entry_point_is_the_inner_name() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("Editor.app");
        fs::create_dir(&bundle).unwrap();
        write_executable(&bundle.join("Editor"), "#!/bin/sh\n");

        match resolve(&bundle).unwrap() {
            Resolution::Target(target) => {
                assert_eq!(target.program, bundle.join("Editor"));
                assert_eq!(target.source, bundle);
                assert!(target.base_args.is_empty());
            }
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn appdir_entry_point_is_apprun() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("Editor.AppDir");
        fs::create_dir(&bundle).unwrap();
        write_executable(&bundle.join("AppRun"), "#!/bin/sh\n");

        match resolve(&bundle).unwrap() {
            Resolution::Target(target) => assert_eq!(target.program, bundle.join("AppRun")),
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn bundle_without_runnable_entry_point_is_not_found() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("Editor.app");
        fs::create_dir(&bundle).unwrap();
        fs::write(bundle.join("Editor"), "#!/bin/sh\n").unwrap();
        assert_eq!(resolve(&bundle).unwrap(), Resolution::NotFound);
    }

    #[test]
    fn symlinked_app_bundle_uses_the_target_name() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("Editor.app");
        fs::create_dir(&bundle).unwrap();
        write_executable(&bundle.join("Editor"), "#!/bin/sh\n");
        let link = temp.path().join("Current.app");
        std::os::unix::fs::symlink(&bundle, &link).unwrap();

        match resolve(&link).unwrap() {
            Resolution::Target(target) => {
                assert_eq!(target.program, link.join("Editor"));
            }
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn portable_images_resolve_unconditionally() {
        let temp = TempDir::new().unwrap();
        let image = temp.path().join("Tool.AppImage");
        write_executable(&image, "binary");
        match resolve(&image).unwrap() {
            Resolution::Target(target) => {
                assert_eq!(target.program, image);
                assert_eq!(target.source, image);
            }
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn plain_script_without_the_bit_needs_consent() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("tool");
        fs::write(&script, "#!/bin/sh\n").unwrap();
        assert_eq!(
            resolve(&script).unwrap(),
            Resolution::NeedsExecBit(script.clone())
        );
    }

    #[test]
    fn missing_paths_are_not_found() {
        assert_eq!(
            resolve(Path::new("/no/such/thing")).unwrap(),
            Resolution::NotFound
        );
    }

    #[test]
    fn descriptor_resolves_its_exec_program() {
        let temp = TempDir::new().unwrap();
        let descriptor = temp.path().join("editor.desktop");
        fs::write(
            &descriptor,
            "[Desktop Entry]\nName=Editor\nExec=/bin/echo --flag %f\n",
        )
        .unwrap();
        match resolve(&descriptor).unwrap() {
            Resolution::Target(target) => {
                assert_eq!(target.program, PathBuf::from("/bin/echo"));
                assert_eq!(target.base_args, vec!["--flag", "%f"]);
                assert_eq!(target.source, descriptor);
            }
            other => panic!("unexpected resolution {other:?}"),
        }
    }

    #[test]
    fn descriptor_with_unresolvable_program_fails_loudly() {
        let temp = TempDir::new().unwrap();
        let descriptor = temp.path().join("broken.desktop");
        fs::write(
            &descriptor,
            "[Desktop Entry]\nExec=launchkit-no-such-program-anywhere %f\n",
        )
        .unwrap();
        assert!(resolve(&descriptor).is_err());
    }

    #[test]
    fn desktop_entry_parses_the_minimal_keys() {
        let entry = DesktopEntry::parse_str(
            "# comment\n[Desktop Entry]\nName=Shot Cutter\nExec=shotcut %F ; edit videos\nMimeType=video/mp4;video/x-matroska;\n[Other Section]\nExec=ignored\n",
        );
        assert_eq!(entry.name.as_deref(), Some("Shot Cutter"));
        assert_eq!(entry.exec.as_deref(), Some("shotcut %F"));
        assert_eq!(entry.mime_types, vec!["video/mp4", "video/x-matroska"]);
    }

    #[test]
    fn content_type_lists_drop_blank_segments() {
        assert_eq!(
            split_content_types("text/plain; text/html ;;\n"),
            vec!["text/plain", "text/html"]
        );
        assert!(split_content_types("  ;; ").is_empty());
    }

    #[test]
    fn split_command_honors_shell_quoting() {
        assert_eq!(split_command("prog a b"), vec!["prog", "a", "b"]);
        assert_eq!(
            split_command("prog \"a b\" 'c d'"),
            vec!["prog", "a b", "c d"]
        );
        assert_eq!(split_command("prog a\\ b"), vec!["prog", "a b"]);
        assert_eq!(split_command("prog \"a \\\" b\""), vec!["prog", "a \" b"]);
        assert_eq!(split_command("  "), Vec::<String>::new());
        assert_eq!(split_command("prog ''"), vec!["prog", ""]);
    }

    #[test]
    fn placeholders_substitute_independently() {
        let base = vec!["%f".to_string(), "%U".to_string()];
        let args = vec!["a.txt".to_string(), "b.txt".to_string()];
        assert_eq!(
            substitute_placeholders(&base, &args),
            vec!["a.txt", "a.txt", "b.txt"]
        );

        let base = vec!["--open".to_string(), "%u".to_string()];
        assert_eq!(
            substitute_placeholders(&base, &args),
            vec!["--open", "a.txt"]
        );

        // No caller arguments: single-file placeholders vanish.
        assert_eq!(
            substitute_placeholders(&base, &[]),
            vec!["--open"]
        );
    }

    #[test]
    fn bundle_root_finds_the_enclosing_bundle() {
        let temp = TempDir::new().unwrap();
        let bundle = temp.path().join("Editor.app");
        fs::create_dir(&bundle).unwrap();
        write_executable(&bundle.join("Editor"), "#!/bin/sh\n");
        assert_eq!(
            bundle_root(&bundle.join("Editor")),
            Some(fs::canonicalize(&bundle).unwrap())
        );

        let image = temp.path().join("Tool.AppImage");
        write_executable(&image, "binary");
        assert_eq!(bundle_root(&image), Some(fs::canonicalize(&image).unwrap()));

        write_executable(&temp.path().join("plain"), "#!/bin/sh\n");
        assert_eq!(bundle_root(&temp.path().join("plain")), None);
    }
}
