//! Reconciles runtime extension instances against the registry.
//!
//! Each process runs one loader. Whenever the registry changes, the loader
//! makes a full pass over it: every enabled, compatible extension without an
//! instance in this process gets one, and every instance whose extension is
//! gone, disabled, or incompatible is torn down. Activation is
//! fire-and-forget: the instance is registered first, then its `enable`
//! runs as a spawned task.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::app_log::AppLog;
use crate::error::ActivationError;
use crate::extension::{ExtensionInstance, ModuleResolver, ProcessKind};
use crate::manifest::{ExtensionId, InstalledExtension};
use crate::registry::ExtensionRegistry;
use crate::update_check::UpdateChecker;

/// An activation still in flight. `settled` resolves once `enable` has
/// finished, whether it succeeded or failed.
pub struct LoadingExtension {
    pub id: ExtensionId,
    pub is_bundled: bool,
    settled: oneshot::Receiver<()>,
}

pub struct ExtensionLoader {
    registry: Arc<ExtensionRegistry>,
    resolver: Arc<dyn ModuleResolver>,
    kind: ProcessKind,
    log: Arc<AppLog>,
    update_checker: Option<Arc<UpdateChecker>>,
    instances: DashMap<ExtensionId, Arc<ExtensionInstance>>,
    /// Guards instance-name uniqueness within this process.
    instances_by_name: DashMap<String, ExtensionId>,
    /// Names known to yield no instance in this process (no entry point for
    /// this process kind). Later passes skip them without re-resolving; the
    /// set only empties on process restart.
    non_instances_by_name: Mutex<HashSet<String>>,
    loading: Mutex<Vec<LoadingExtension>>,
    /// Last activation error per extension, for diagnostics and the UI.
    failures: DashMap<ExtensionId, String>,
}

impl ExtensionLoader {
    pub fn new(
        registry: Arc<ExtensionRegistry>,
        resolver: Arc<dyn ModuleResolver>,
        kind: ProcessKind,
        log: Arc<AppLog>,
        update_checker: Option<Arc<UpdateChecker>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            resolver,
            kind,
            log,
            update_checker,
            instances: DashMap::new(),
            instances_by_name: DashMap::new(),
            non_instances_by_name: Mutex::new(HashSet::new()),
            loading: Mutex::new(Vec::new()),
            failures: DashMap::new(),
        })
    }

    /// Subscribe to registry changes and run the initial pass.
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.registry.on_change(move || {
            if let Some(loader) = weak.upgrade() {
                loader.reconcile();
            }
        });
        self.reconcile();
    }

    /// One full pass: tear down instances the registry no longer wants, then
    /// activate everything enabled and compatible that has no instance yet.
    /// A failing extension never aborts the pass.
    pub fn reconcile(&self) {
        let desired = self.registry.snapshot();

        let to_remove: Vec<ExtensionId> = self
            .instances
            .iter()
            .filter(|entry| {
                desired
                    .get(entry.key())
                    .is_none_or(|ext| !(ext.is_enabled && ext.is_compatible))
            })
            .map(|entry| entry.key().clone())
            .collect();
        for id in to_remove {
            self.remove_instance(&id);
        }

        for ext in desired.values() {
            if !(ext.is_enabled && ext.is_compatible) {
                continue;
            }
            if self.instances.contains_key(&ext.id) {
                continue;
            }
            if let Err(e) = self.activate(ext) {
                self.failures.insert(ext.id.clone(), e.to_string());
                self.log
                    .error("loader", format!("failed to activate {}: {e}", ext.id));
            }
        }
    }

    /// Register an instance for `ext` and spawn its `enable`.
    ///
    /// Registration happens before `enable` runs so that a second pass
    /// cannot instantiate the same id again while activation is in flight.
    fn activate(&self, ext: &InstalledExtension) -> Result<(), ActivationError> {
        let name = ext.manifest.name.clone();

        if self.non_instances_by_name.lock().contains(&name) {
            return Ok(());
        }

        let Some(constructor) = self
            .resolver
            .resolve_entry_point(&ext.manifest_path, self.kind)
        else {
            tracing::debug!(
                extension = %ext.id,
                kind = self.kind.as_str(),
                "no entry point for this process"
            );
            self.non_instances_by_name.lock().insert(name);
            return Ok(());
        };

        if self.instances_by_name.contains_key(&name) {
            return Err(ActivationError::DuplicateName(name));
        }

        let extension = constructor.construct(ext)?;
        let instance = ExtensionInstance::new(ext.id.clone(), name.clone(), ext.is_bundled, extension);

        self.instances.insert(ext.id.clone(), Arc::clone(&instance));
        self.instances_by_name.insert(name, ext.id.clone());
        self.failures.remove(&ext.id);

        let (settled_tx, settled_rx) = oneshot::channel();
        self.loading.lock().push(LoadingExtension {
            id: ext.id.clone(),
            is_bundled: ext.is_bundled,
            settled: settled_rx,
        });

        let log = Arc::clone(&self.log);
        let task_instance = Arc::clone(&instance);
        tokio::spawn(async move {
            match task_instance.run_enable().await {
                Ok(()) => {
                    log.info("loader", format!("extension {} enabled", task_instance.id));
                }
                Err(e) => {
                    log.error(
                        "loader",
                        format!("extension {} failed to enable: {e}", task_instance.id),
                    );
                }
            }
            let _ = settled_tx.send(());
        });

        if let Some(checker) = &self.update_checker {
            if !ext.is_bundled {
                self.spawn_update_check(Arc::clone(checker), ext);
            }
        }

        Ok(())
    }

    /// The verdict lands on the registry entry as `available_update`, which
    /// replicates like any other change and, because the id already has an
    /// instance, instantiates nothing on the next pass.
    fn spawn_update_check(&self, checker: Arc<UpdateChecker>, ext: &InstalledExtension) {
        let registry = Arc::clone(&self.registry);
        let log = Arc::clone(&self.log);
        let manifest = ext.manifest.clone();
        let id = ext.id.clone();
        tokio::spawn(async move {
            if let Some(version) = checker.check(&manifest).await {
                log.info("loader", format!("update {version} available for {id}"));
                registry.set_available_update(&id, Some(version));
            }
        });
    }

    /// Tear down one instance: drop it from the maps, spawn the extension's
    /// `disable`, release its contributions, and notify removal observers
    /// exactly once.
    fn remove_instance(&self, id: &ExtensionId) {
        let Some((_, instance)) = self.instances.remove(id) else {
            return;
        };
        self.instances_by_name.remove(&instance.name);

        let extension = instance.extension();
        tokio::spawn(async move {
            extension.disable().await;
        });

        instance.teardown();
        self.log
            .info("loader", format!("extension {id} removed"));
    }

    /// Block startup until every bundled extension's `enable` has settled.
    /// User extensions keep loading in the background.
    pub async fn wait_for_bundled(&self) {
        let bundled: Vec<LoadingExtension> = {
            let mut loading = self.loading.lock();
            let (bundled, rest) = loading.drain(..).partition(|l| l.is_bundled);
            *loading = rest;
            bundled
        };

        join_all(bundled.into_iter().map(|l| async move {
            let _ = l.settled.await;
        }))
        .await;
    }

    pub fn get_instance(&self, id: &str) -> Option<Arc<ExtensionInstance>> {
        self.instances.get(id).map(|e| Arc::clone(e.value()))
    }

    pub fn instance_ids(&self) -> Vec<ExtensionId> {
        self.instances.iter().map(|e| e.key().clone()).collect()
    }

    pub fn last_activation_error(&self, id: &str) -> Option<String> {
        self.failures.get(id).map(|e| e.value().clone())
    }
}
