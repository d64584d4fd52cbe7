//! The canonical, replicated registry of installed extensions.
//!
//! A [`SyncedStore`] whose model is the full `{id → InstalledExtension}`
//! map. The main process owns presence (discovery adds and removes ids);
//! any process may toggle `is_enabled` on an existing id. Every change
//! replicates the whole map; receivers reconcile it as a set.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::bus::{ChannelPrefixes, MessageBus};
use crate::error::StoreError;
use crate::manifest::{ExtensionId, InstalledExtension};
use crate::snapshot::{Migration, SnapshotStorage};
use crate::store::{StoreModel, StoreParams, SyncedStore, decode, encode};

pub const REGISTRY_CONFIG_NAME: &str = "clusterdeck-extensions.json";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtensionsModel {
    #[serde(default)]
    pub extensions: BTreeMap<ExtensionId, InstalledExtension>,
}

impl StoreModel for ExtensionsModel {
    fn to_snapshot(&self) -> Result<Value, StoreError> {
        encode(self)
    }

    /// Set-reconciliation against the incoming map: ids absent remotely are
    /// removed (that is how a renderer learns an extension was uninstalled),
    /// new ids are added, and an id present in both is only replaced when
    /// its value actually differs.
    fn apply_snapshot(&mut self, snapshot: &Value) -> Result<(), StoreError> {
        let incoming: ExtensionsModel = decode(snapshot)?;

        self.extensions
            .retain(|id, _| incoming.extensions.contains_key(id));

        for (id, ext) in incoming.extensions {
            match self.extensions.get(&id) {
                Some(existing) if *existing == ext => {}
                _ => {
                    self.extensions.insert(id, ext);
                }
            }
        }
        Ok(())
    }
}

/// Early builds stored the extension map as the top-level state value;
/// version 1 nests it under `extensions`.
fn registry_migrations() -> Vec<Migration> {
    vec![Migration::new(1, |state| match state {
        Value::Null => Ok(json!({ "extensions": {} })),
        Value::Object(map) if !map.contains_key("extensions") => Ok(json!({ "extensions": map })),
        other => Ok(other),
    })]
}

pub struct ExtensionRegistry {
    store: Arc<SyncedStore<ExtensionsModel>>,
}

impl ExtensionRegistry {
    pub fn new(
        directory: impl Into<PathBuf>,
        prefixes: ChannelPrefixes,
        storage: Arc<dyn SnapshotStorage>,
        bus: Arc<dyn MessageBus>,
    ) -> Self {
        let store = SyncedStore::new(
            StoreParams {
                config_name: REGISTRY_CONFIG_NAME.into(),
                directory: directory.into(),
                prefixes,
                suspend_sync_on_apply: false,
                migrations: registry_migrations(),
            },
            storage,
            bus,
        );
        Self { store }
    }

    pub fn load(&self) -> Result<(), StoreError> {
        self.store.load()
    }

    pub fn snapshot(&self) -> BTreeMap<ExtensionId, InstalledExtension> {
        self.store.with(|m| m.extensions.clone())
    }

    pub fn get(&self, id: &str) -> Option<InstalledExtension> {
        self.store.with(|m| m.extensions.get(id).cloned())
    }

    /// Extensions that may produce a runtime instance in some process.
    pub fn enabled_extensions(&self) -> Vec<InstalledExtension> {
        self.store.with(|m| {
            m.extensions
                .values()
                .filter(|e| e.is_enabled && e.is_compatible)
                .cloned()
                .collect()
        })
    }

    pub fn user_extensions(&self) -> Vec<InstalledExtension> {
        self.store.with(|m| {
            m.extensions
                .values()
                .filter(|e| !e.is_bundled)
                .cloned()
                .collect()
        })
    }

    /// Default-enablement policy: bundled extensions are always on; a
    /// user-installed extension is off until explicitly enabled.
    pub fn is_enabled(&self, id: &str, is_bundled: bool) -> bool {
        is_bundled
            || self
                .store
                .with(|m| m.extensions.get(id).is_some_and(|e| e.is_enabled))
    }

    /// Toggle `is_enabled` on an existing id. Returns false for unknown
    /// ids. A redundant toggle schedules nothing.
    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let current = self
            .store
            .with(|m| m.extensions.get(id).map(|e| e.is_enabled));
        match current {
            None => false,
            Some(state) if state == enabled => true,
            Some(_) => {
                self.store.mutate(|m| {
                    if let Some(ext) = m.extensions.get_mut(id) {
                        ext.is_enabled = enabled;
                    }
                });
                true
            }
        }
    }

    /// Record the update checker's verdict on the canonical entry. Flows
    /// through normal replication; the entry's identity and enablement are
    /// untouched, so no receiver re-enters the instantiation path.
    pub fn set_available_update(&self, id: &str, version: Option<String>) {
        let current = self
            .store
            .with(|m| m.extensions.get(id).map(|e| e.available_update.clone()));
        match current {
            None => {}
            Some(existing) if existing == version => {}
            Some(_) => {
                self.store.mutate(|m| {
                    if let Some(ext) = m.extensions.get_mut(id) {
                        ext.available_update = version;
                    }
                });
            }
        }
    }

    /// Replace presence with the discovery scan's result, preserving each
    /// surviving extension's enablement and update verdict, and applying
    /// the default-enablement policy to new arrivals. Main process only.
    pub fn sync_discovered(&self, discovered: Vec<InstalledExtension>) {
        let next: BTreeMap<ExtensionId, InstalledExtension> = self.store.with(|m| {
            discovered
                .into_iter()
                .map(|mut ext| {
                    match m.extensions.get(&ext.id) {
                        Some(existing) => {
                            ext.is_enabled = existing.is_enabled;
                            ext.available_update = existing.available_update.clone();
                        }
                        None => {
                            ext.is_enabled = ext.is_bundled;
                        }
                    }
                    (ext.id.clone(), ext)
                })
                .collect()
        });

        if self.store.with(|m| m.extensions == next) {
            return;
        }
        self.store.mutate(|m| m.extensions = next);
    }

    /// Callback on the tick after every registry change, local or inbound.
    pub fn on_change(&self, f: impl Fn() + Send + Sync + 'static) {
        self.store.on_change(f);
    }

    /// Flush pending persistence/broadcast/notifications now.
    pub fn flush(&self) {
        self.store.tick();
    }

    pub fn has_pending(&self) -> bool {
        self.store.has_pending()
    }

    pub fn version(&self) -> u64 {
        self.store.version()
    }

    pub fn path(&self) -> PathBuf {
        self.store.path()
    }
}
