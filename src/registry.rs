//! Persistent index of known applications and their claimed content
//! types.
//!
//! The registry is deliberately a reconciliation model, not a notified
//! one: bundles get uninstalled between runs of this short-lived tool, so
//! every read re-verifies that its targets still exist and prunes the ones
//! that do not. Concurrent invocations may race on the backing file; a
//! lost prune is harmless because pruning is idempotent.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::attr;
use crate::bundle::{split_content_types, BundleKind, DesktopEntry};
use crate::data_dir;

const REGISTRY_FILE: &str = "registry.json";
// Reject documents written by an incompatible revision rather than guess
// at their shape.
const SCHEMA_VERSION: &str = "launchkit_registry_v1";

/// Cached capability attribute on an application path.
const CAN_OPEN_ATTRIBUTE: &str = "can-open";
/// Capability declaration file inside an `.app` bundle.
const CAN_OPEN_FILE: &str = "Resources/can-open";

#[derive(Debug, Serialize, Deserialize)]
struct RegistryDoc {
    schema_version: String,
    #[serde(default)]
    entries: BTreeMap<PathBuf, Entry>,
    #[serde(default)]
    defaults: BTreeMap<String, PathBuf>,
}

impl RegistryDoc {
    fn empty() -> Self {
        RegistryDoc {
            schema_version: SCHEMA_VERSION.to_string(),
            entries: BTreeMap::new(),
            defaults: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Entry {
    #[serde(default)]
    content_types: Vec<String>,
}

/// The durable application index, keyed by canonical path.
pub struct Registry {
    root: PathBuf,
    doc: RegistryDoc,
    attrs_supported: bool,
}

impl Registry {
    /// Open the registry at its configured storage root.
    pub fn open() -> Result<Self> {
        Self::open_at(data_dir()?)
    }

    /// Open a registry rooted at an explicit directory (tests and tools).
    pub fn open_at(root: PathBuf) -> Result<Self> {
        fs::create_dir_all(&root)
            .with_context(|| format!("creating registry root {}", root.display()))?;
        let doc = load_doc(&root.join(REGISTRY_FILE))?;
        let attrs_supported = attr::supported(&root);
        if !attrs_supported {
            debug!("extended attributes unsupported under {}; using declaration files", root.display());
        }
        Ok(Registry {
            root,
            doc,
            attrs_supported,
        })
    }

    pub fn storage_root(&self) -> &Path {
        &self.root
    }

    /// Record `path` as a known application. Idempotent for paths already
    /// known under their canonical form; refuses paths inside the
    /// registry's own storage.
    pub fn upsert(&mut self, path: &Path) -> Result<bool> {
        let canonical = match fs::canonicalize(path) {
            Ok(canonical) => canonical,
            Err(err) => {
                debug!("not recording {}: {}", path.display(), err);
                return Ok(false);
            }
        };
        let root = fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone());
        if canonical.starts_with(&root) {
            debug!(
                "not recording {}: inside the registry storage",
                canonical.display()
            );
            return Ok(false);
        }
        if self.doc.entries.contains_key(&canonical) {
            return Ok(false);
        }
        let content_types = self.content_types_for(&canonical).unwrap_or_default();
        self.doc
            .entries
            .insert(canonical, Entry { content_types });
        self.save()?;
        Ok(true)
    }

    /// Delete every record whose canonical target equals `path`.
    pub fn remove(&mut self, path: &Path) -> Result<bool> {
        let canonical = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        let before = self.doc.entries.len() + self.doc.defaults.len();
        self.doc
            .entries
            .retain(|recorded, _| *recorded != canonical && recorded != path);
        self.doc
            .defaults
            .retain(|_, target| *target != canonical && target != path);
        if self.doc.entries.len() + self.doc.defaults.len() == before {
            return Ok(false);
        }
        debug!("removed {} from the registry", path.display());
        self.save()?;
        Ok(true)
    }

    /// The single mutating entry point for discovery and post-launch
    /// bookkeeping: record the path if it exists, drop it otherwise.
    pub fn handle(&mut self, path: &Path) -> Result<()> {
        if path.exists() {
            self.upsert(path)?;
        } else {
            self.remove(path)?;
        }
        Ok(())
    }

    /// All live entries, each re-verified on this read. Dead entries are
    /// pruned as a side effect. Launcher descriptors sort after everything
    /// else; both groups are lexicographic.
    pub fn list(&mut self) -> Result<Vec<PathBuf>> {
        self.prune()?;
        let mut live: Vec<PathBuf> = self.doc.entries.keys().cloned().collect();
        live.sort_by(|a, b| {
            let a_descriptor = BundleKind::of(a) == BundleKind::LauncherDescriptor;
            let b_descriptor = BundleKind::of(b) == BundleKind::LauncherDescriptor;
            a_descriptor.cmp(&b_descriptor).then_with(|| a.cmp(b))
        });
        Ok(live)
    }

    /// True iff a live entry's target equals `path` exactly.
    pub fn exists(&mut self, path: &Path) -> Result<bool> {
        self.prune()?;
        Ok(self.doc.entries.contains_key(path))
    }

    /// Declared content types for an application, or `None` when the
    /// application (or its metadata) cannot be read at all.
    ///
    /// The `can-open` attribute is the fast path; the bundle's declaration
    /// file is the fallback, cached back into the attribute when the
    /// filesystem supports it.
    pub fn content_types_for(&self, path: &Path) -> Option<Vec<String>> {
        if !path.exists() {
            return None;
        }
        if self.attrs_supported {
            if let Some(raw) = attr::get_string(path, CAN_OPEN_ATTRIBUTE) {
                return Some(split_content_types(&raw));
            }
        }
        // The inline record holds the declaration read at registration
        // time; trust it before re-parsing bundle metadata.
        if let Some(entry) = self.doc.entries.get(path) {
            if !entry.content_types.is_empty() {
                return Some(entry.content_types.clone());
            }
        }
        let declared = declared_content_types(path)?;
        if self.attrs_supported && !declared.is_empty() {
            attr::set_string(path, CAN_OPEN_ATTRIBUTE, &declared.join(";"));
        }
        Some(declared)
    }

    /// The per-type default application, pruned lazily when its target is
    /// gone.
    pub fn default_for_type(&mut self, content_type: &str) -> Result<Option<PathBuf>> {
        let target = match self.doc.defaults.get(content_type) {
            Some(target) => target.clone(),
            None => return Ok(None),
        };
        if target.exists() {
            return Ok(Some(target));
        }
        self.doc.defaults.remove(content_type);
        self.save()?;
        Ok(None)
    }

    pub fn set_default_for_type(&mut self, content_type: &str, path: &Path) -> Result<()> {
        self.doc
            .defaults
            .insert(content_type.to_string(), path.to_path_buf());
        self.save()
    }

    pub fn clear_default_for_type(&mut self, content_type: &str) -> Result<()> {
        if self.doc.defaults.remove(content_type).is_some() {
            self.save()?;
        }
        Ok(())
    }

    /// Drop every record. Administrative and test operation.
    pub fn clear(&mut self) -> Result<()> {
        self.doc.entries.clear();
        self.doc.defaults.clear();
        self.save()
    }

    fn prune(&mut self) -> Result<()> {
        let before = self.doc.entries.len();
        self.doc.entries.retain(|path, _| path.exists());
        if self.doc.entries.len() != before {
            debug!(
                "pruned {} stale registry entries",
                before - self.doc.entries.len()
            );
            self.save()?;
        }
        Ok(())
    }

    /// Atomic rewrite: a torn write can never corrupt the document, only
    /// lose the latest change.
    fn save(&self) -> Result<()> {
        let mut file = NamedTempFile::new_in(&self.root)
            .with_context(|| format!("creating temp file in {}", self.root.display()))?;
        serde_json::to_writer_pretty(&mut file, &self.doc).context("encoding the registry")?;
        file.write_all(b"\n").context("encoding the registry")?;
        file.persist(self.root.join(REGISTRY_FILE))
            .context("replacing the registry document")?;
        Ok(())
    }
}

fn load_doc(path: &Path) -> Result<RegistryDoc> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return Ok(RegistryDoc::empty()),
    };
    let doc: RegistryDoc = match serde_json::from_str(&text) {
        Ok(doc) => doc,
        Err(err) => {
            // A torn or foreign file is not worth dying over; start over.
            warn!("unreadable registry document {}: {}", path.display(), err);
            return Ok(RegistryDoc::empty());
        }
    };
    if doc.schema_version != SCHEMA_VERSION {
        bail!(
            "registry document {} has schema '{}', expected '{}'",
            path.display(),
            doc.schema_version,
            SCHEMA_VERSION
        );
    }
    Ok(doc)
}

fn declared_content_types(path: &Path) -> Option<Vec<String>> {
    match BundleKind::of(path) {
        BundleKind::DirectoryBundle => {
            let declaration = path.join(CAN_OPEN_FILE);
            if !declaration.is_file() {
                return Some(Vec::new());
            }
            fs::read_to_string(&declaration)
                .ok()
                .map(|raw| split_content_types(&raw))
        }
        BundleKind::LauncherDescriptor => DesktopEntry::parse(path).ok().map(|entry| entry.mime_types),
        _ => Some(Vec::new()),
    }
}
