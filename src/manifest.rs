//! Extension manifests and the installed-extension record.
//!
//! Extensions are installed in `{config_dir}/extensions/{id}/`, each
//! directory holding a `manifest.json` plus the entry-point files it names.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::extension::ProcessKind;

pub type ExtensionId = String;

/// Extension manifest as declared in `manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtensionManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    /// Minimum clusterdeck version required to run this extension.
    #[serde(rename = "minAppVersion", default)]
    pub min_app_version: String,
    /// Entry point for the main process, relative to the extension dir.
    #[serde(default)]
    pub main: Option<String>,
    /// Entry point for renderer processes, relative to the extension dir.
    #[serde(default)]
    pub renderer: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
}

impl ExtensionManifest {
    /// The entry point for the given process kind, if the extension ships
    /// one. Extensions without an entry point for this kind never produce a
    /// runtime instance here.
    pub fn entry_point(&self, kind: ProcessKind) -> Option<&str> {
        match kind {
            ProcessKind::Main => self.main.as_deref(),
            ProcessKind::Renderer => self.renderer.as_deref(),
        }
    }
}

/// The canonical registry record for one installed extension. Replicated
/// between processes as part of the registry's whole-map snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledExtension {
    pub id: ExtensionId,
    pub manifest_path: PathBuf,
    pub manifest: ExtensionManifest,
    /// Ships with the application itself, vs. user-installed.
    pub is_bundled: bool,
    pub is_enabled: bool,
    pub is_compatible: bool,
    /// Newer version discovered by the update checker, if any. Decorative:
    /// changing it never re-triggers instantiation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_update: Option<String>,
}

/// Validate a parsed manifest for required fields and sanity.
pub fn validate_manifest(manifest: &ExtensionManifest, dir_name: &str) -> Result<(), String> {
    if manifest.id.is_empty() {
        return Err("id is empty".into());
    }
    if manifest.id != dir_name {
        return Err(format!(
            "id \"{}\" does not match directory name \"{}\"",
            manifest.id, dir_name
        ));
    }
    if manifest.name.is_empty() {
        return Err("name is empty".into());
    }
    if manifest.version.is_empty() {
        return Err("version is empty".into());
    }
    // Entry points must not escape the extension directory
    for entry in [&manifest.main, &manifest.renderer].into_iter().flatten() {
        if is_path_escape(entry) {
            return Err(format!("entry point \"{entry}\" attempts path traversal"));
        }
    }
    Ok(())
}

/// Returns true if a relative path attempts to escape its root via `..`,
/// absolute components, or other shenanigans.
pub(crate) fn is_path_escape(relative: &str) -> bool {
    let path = Path::new(relative);

    if path.is_absolute() {
        return true;
    }

    for component in path.components() {
        match component {
            Component::ParentDir => return true,
            Component::RootDir | Component::Prefix(_) => return true,
            _ => {}
        }
    }

    false
}
