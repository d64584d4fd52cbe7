//! Filesystem discovery of installed extensions, plus hot reload.
//!
//! Scans an extensions directory (`{dir}/{id}/manifest.json` per extension)
//! and reports what is installed. Invalid manifests are logged and skipped,
//! never fatal. The watcher reports which extension ids changed on disk so
//! the main process can rescan and resync the registry.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use semver::Version;

use crate::manifest::{ExtensionId, ExtensionManifest, InstalledExtension, validate_manifest};

/// An extension runs only if the host app satisfies its `minAppVersion`.
/// An empty requirement always passes; an unparseable one never does.
fn is_compatible(manifest: &ExtensionManifest, app_version: &Version) -> bool {
    if manifest.min_app_version.is_empty() {
        return true;
    }
    match Version::parse(&manifest.min_app_version) {
        Ok(min) => min <= *app_version,
        Err(_) => {
            tracing::warn!(
                extension = %manifest.id,
                min_app_version = %manifest.min_app_version,
                "unparseable minAppVersion, treating extension as incompatible"
            );
            false
        }
    }
}

/// Scan `dir` and return every valid installed extension.
///
/// Each immediate subdirectory is one extension; hidden directories and
/// directories with a missing, malformed, or invalid `manifest.json` are
/// skipped with a warning.
pub fn scan_extensions(
    dir: &Path,
    app_version: &Version,
    is_bundled: bool,
) -> Vec<InstalledExtension> {
    if !dir.exists() {
        return Vec::new();
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(e) => e,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), "failed to read extensions dir: {err}");
            return Vec::new();
        }
    };

    let mut installed = Vec::new();

    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }

        let dir_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        if dir_name.starts_with('.') {
            continue;
        }

        let manifest_path = path.join("manifest.json");
        let manifest_data = match std::fs::read_to_string(&manifest_path) {
            Ok(d) => d,
            Err(err) => {
                tracing::warn!("{dir_name}: failed to read manifest.json: {err}");
                continue;
            }
        };

        let manifest: ExtensionManifest = match serde_json::from_str(&manifest_data) {
            Ok(m) => m,
            Err(err) => {
                tracing::warn!("{dir_name}: invalid manifest.json: {err}");
                continue;
            }
        };

        if let Err(err) = validate_manifest(&manifest, &dir_name) {
            tracing::warn!("{dir_name}: manifest validation failed: {err}");
            continue;
        }

        let compatible = is_compatible(&manifest, app_version);
        installed.push(InstalledExtension {
            id: manifest.id.clone(),
            manifest_path,
            manifest,
            is_bundled,
            is_enabled: is_bundled,
            is_compatible: compatible,
            available_update: None,
        });
    }

    installed
}

/// Live watch on an extensions directory. Dropping it stops the watcher
/// thread.
pub struct ExtensionsWatcher {
    _debouncer: notify_debouncer_mini::Debouncer<notify::RecommendedWatcher>,
}

/// Watch `dir` for changes and invoke `on_change` with the ids of the
/// extensions whose files changed, debounced to one batch per burst.
pub fn watch_extensions(
    dir: PathBuf,
    on_change: impl Fn(Vec<ExtensionId>) + Send + 'static,
) -> anyhow::Result<ExtensionsWatcher> {
    use notify_debouncer_mini::{DebouncedEventKind, new_debouncer};

    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create extensions dir {}", dir.display()))?;

    let (tx, rx) = std::sync::mpsc::channel();
    let mut debouncer =
        new_debouncer(Duration::from_millis(500), tx).context("failed to create watcher")?;
    debouncer
        .watcher()
        .watch(&dir, notify::RecursiveMode::Recursive)
        .with_context(|| format!("failed to watch {}", dir.display()))?;

    std::thread::spawn(move || {
        loop {
            match rx.recv() {
                Ok(Ok(events)) => {
                    // Changed extension id = first path component under dir
                    let mut changed_ids: Vec<ExtensionId> = Vec::new();
                    for event in &events {
                        if event.kind != DebouncedEventKind::Any {
                            continue;
                        }
                        if let Ok(relative) = event.path.strip_prefix(&dir) {
                            if let Some(first) = relative.components().next() {
                                let id = first.as_os_str().to_string_lossy().to_string();
                                if !id.starts_with('.') && !changed_ids.contains(&id) {
                                    changed_ids.push(id);
                                }
                            }
                        }
                    }

                    if !changed_ids.is_empty() {
                        tracing::debug!(?changed_ids, "extension files changed");
                        on_change(changed_ids);
                    }
                }
                Ok(Err(errs)) => {
                    tracing::warn!("extension watcher errors: {errs:?}");
                }
                Err(_) => break, // Debouncer dropped
            }
        }
    });

    Ok(ExtensionsWatcher {
        _debouncer: debouncer,
    })
}
