//! Replicated reactive store.
//!
//! A [`SyncedStore`] owns an in-memory model, keeps it durable as a full
//! JSON snapshot on disk, and mirrors it to the same logical store running
//! in the peer process over a [`ChannelPair`]. Mutations are synchronous;
//! their side effects (persist, broadcast, change notifications) run on the
//! next scheduling tick, never reentrantly inside the call that triggered
//! them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::Notify;

use crate::bus::{ChannelPair, ChannelPrefixes, MessageBus, Subscription};
use crate::error::StoreError;
use crate::snapshot::{Migration, SnapshotFile, SnapshotStorage, run_migrations};

/// Per-store replication state.
///
/// While `Suspended`, the next tick skips persistence and broadcast so that
/// applying an inbound snapshot cannot echo a broadcast back to its sender.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Active,
    Suspended,
}

/// A store model that can round-trip through a full JSON snapshot.
///
/// `apply_snapshot(to_snapshot(m))` must leave the model behaviorally
/// equivalent to `m`.
pub trait StoreModel: Send + Sync + 'static {
    fn to_snapshot(&self) -> Result<Value, StoreError>;
    fn apply_snapshot(&mut self, snapshot: &Value) -> Result<(), StoreError>;
}

/// Serialize a serde model into a snapshot value.
pub fn encode<T: Serialize>(model: &T) -> Result<Value, StoreError> {
    serde_json::to_value(model).map_err(|e| StoreError::Encode {
        message: e.to_string(),
    })
}

/// Decode a snapshot value into a serde model. Malformed snapshots are
/// `SyncApply` errors, which callers log and drop.
pub fn decode<T: DeserializeOwned>(snapshot: &Value) -> Result<T, StoreError> {
    serde_json::from_value(snapshot.clone()).map_err(|e| StoreError::SyncApply {
        message: e.to_string(),
    })
}

/// Static configuration for one [`SyncedStore`].
pub struct StoreParams {
    /// File name inside `directory`, e.g. `"clusterdeck-extensions.json"`.
    pub config_name: String,
    /// The user-data directory this store's file lives in.
    pub directory: PathBuf,
    /// Direction prefixes for this process (main or renderer).
    pub prefixes: ChannelPrefixes,
    /// Whether applying an inbound snapshot suspends sync until the next
    /// tick. Stores whose apply path triggers further mutations need this to
    /// avoid echoing the snapshot back; for the rest the peer's equality
    /// check already breaks the loop.
    pub suspend_sync_on_apply: bool,
    pub migrations: Vec<Migration>,
}

impl StoreParams {
    pub fn path(&self) -> PathBuf {
        self.directory.join(&self.config_name)
    }
}

/// See module docs.
pub struct SyncedStore<M: StoreModel> {
    params: StoreParams,
    storage: Arc<dyn SnapshotStorage>,
    bus: Arc<dyn MessageBus>,
    channels: ChannelPair,
    model: RwLock<M>,
    /// Bumped on every observable mutation, local or applied.
    version: AtomicU64,
    dirty: AtomicBool,
    sync_state: Mutex<SyncState>,
    /// Migration version persisted back into the snapshot file.
    file_version: Mutex<u32>,
    notify: Arc<Notify>,
    observers: Mutex<Vec<Box<dyn Fn() + Send + Sync>>>,
    subscription: Mutex<Option<Subscription>>,
}

impl<M: StoreModel + Default> SyncedStore<M> {
    pub fn new(
        params: StoreParams,
        storage: Arc<dyn SnapshotStorage>,
        bus: Arc<dyn MessageBus>,
    ) -> Arc<Self> {
        let channels = ChannelPair::for_path(params.prefixes, &params.path());
        Arc::new(Self {
            params,
            storage,
            bus,
            channels,
            model: RwLock::new(M::default()),
            version: AtomicU64::new(0),
            dirty: AtomicBool::new(false),
            sync_state: Mutex::new(SyncState::Active),
            file_version: Mutex::new(0),
            notify: Arc::new(Notify::new()),
            observers: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        })
    }

    /// Read the snapshot file, run migrations, populate the model, and begin
    /// syncing with the peer process.
    ///
    /// A missing file seeds a default model and writes it out. A corrupt
    /// file is logged and falls back to the default model so application
    /// startup is never blocked by it. A failing migration aborts this
    /// store's load only.
    pub fn load(self: &Arc<Self>) -> Result<(), StoreError> {
        let path = self.params.path();
        let name = &self.params.config_name;
        tracing::info!(store = %name, path = %path.display(), "loading store");

        let latest = self
            .params
            .migrations
            .iter()
            .map(|m| m.version)
            .max()
            .unwrap_or(0);

        let mut fresh = true;
        match self.storage.read(&path) {
            Ok(Some(raw)) => {
                fresh = false;
                match serde_json::from_value::<SnapshotFile>(raw) {
                    Ok(file) => {
                        let migrated = run_migrations(file, &self.params.migrations)?;
                        *self.file_version.lock() = migrated.version;
                        if let Err(e) = self.model.write().apply_snapshot(&migrated.state) {
                            tracing::warn!(store = %name, error = %e, "stored snapshot rejected, using defaults");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(
                            store = %name,
                            error = %StoreError::ConfigLoad { path: path.clone(), message: e.to_string() },
                            "using defaults"
                        );
                        *self.file_version.lock() = latest;
                    }
                }
            }
            Ok(None) => {
                *self.file_version.lock() = latest;
            }
            Err(e) => {
                tracing::warn!(store = %name, error = %e, "using defaults");
                *self.file_version.lock() = latest;
            }
        }

        if fresh {
            match self.model.read().to_snapshot() {
                Ok(snapshot) => {
                    if let Err(e) = self.persist(&snapshot) {
                        tracing::warn!(store = %name, error = %e, "failed to write initial snapshot");
                    }
                }
                Err(e) => {
                    tracing::warn!(store = %name, error = %e, "failed to encode initial snapshot");
                }
            }
        }

        self.start_sync();
        tracing::info!(store = %name, "store loaded");
        Ok(())
    }
}

impl<M: StoreModel> SyncedStore<M> {
    /// Apply `f` to the model. The resulting persist, broadcast, and change
    /// notifications run on the next tick.
    pub fn mutate<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let out = f(&mut self.model.write());
        self.version.fetch_add(1, Ordering::SeqCst);
        self.schedule();
        out
    }

    /// Read the model without mutating it.
    pub fn with<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.model.read())
    }

    /// Register a callback invoked on the tick after every observable
    /// mutation, local or inbound.
    pub fn on_change(&self, f: impl Fn() + Send + Sync + 'static) {
        self.observers.lock().push(Box::new(f));
    }

    /// Monotonic count of observable mutations; test and diagnostics hook.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    pub fn sync_state(&self) -> SyncState {
        *self.sync_state.lock()
    }

    pub fn has_pending(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> PathBuf {
        self.params.path()
    }

    /// One scheduling tick: drains the pending flag, restores a suspended
    /// store to `Active`, persists and broadcasts the current snapshot
    /// (unless this tick was suspended), then notifies change observers.
    ///
    /// Normally driven by the background pump; exposed so embedders and
    /// tests can flush deterministically.
    pub fn tick(&self) {
        if !self.dirty.swap(false, Ordering::SeqCst) {
            return;
        }

        let was_suspended = {
            let mut state = self.sync_state.lock();
            let suspended = *state == SyncState::Suspended;
            *state = SyncState::Active;
            suspended
        };

        if !was_suspended {
            let snapshot = self.model.read().to_snapshot();
            match snapshot {
                Ok(snapshot) => {
                    if let Err(e) = self.persist(&snapshot) {
                        tracing::error!(store = %self.params.config_name, error = %e, "persist failed");
                    }
                    self.bus.send(&self.channels.send, snapshot);
                }
                Err(e) => {
                    tracing::error!(store = %self.params.config_name, error = %e, "snapshot failed");
                }
            }
        }

        for observer in self.observers.lock().iter() {
            observer();
        }
    }

    fn schedule(&self) {
        self.dirty.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    fn persist(&self, snapshot: &Value) -> Result<(), StoreError> {
        let file = SnapshotFile {
            version: *self.file_version.lock(),
            state: snapshot.clone(),
        };
        let raw = serde_json::to_value(&file).map_err(|e| StoreError::Encode {
            message: e.to_string(),
        })?;
        self.storage.write(&self.params.path(), &raw)
    }

    /// Handle one snapshot from the peer. Snapshots equal to the current
    /// model are dropped; that is what stops replication feedback loops for
    /// stores that don't suspend.
    fn on_receive(&self, snapshot: Value) {
        let current = match self.model.read().to_snapshot() {
            Ok(v) => v,
            Err(e) => {
                tracing::error!(store = %self.params.config_name, error = %e, "snapshot failed");
                return;
            }
        };
        if current == snapshot {
            return;
        }

        if self.params.suspend_sync_on_apply {
            *self.sync_state.lock() = SyncState::Suspended;
        }

        match self.model.write().apply_snapshot(&snapshot) {
            Ok(()) => {
                self.version.fetch_add(1, Ordering::SeqCst);
                self.schedule();
            }
            Err(e) => {
                // Model unchanged; don't leave the store suspended.
                *self.sync_state.lock() = SyncState::Active;
                tracing::warn!(store = %self.params.config_name, error = %e, "inbound snapshot dropped");
            }
        }
    }

    fn start_sync(self: &Arc<Self>) {
        let weak: Weak<Self> = Arc::downgrade(self);
        let subscription = self.bus.listen(
            &self.channels.receive,
            Arc::new(move |payload| {
                if let Some(store) = weak.upgrade() {
                    store.on_receive(payload);
                }
            }),
        );
        *self.subscription.lock() = Some(subscription);

        // Pump deferred ticks on the runtime when one is present; otherwise
        // the embedder (or test) drives `tick()` itself.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let weak = Arc::downgrade(self);
            let notify = Arc::clone(&self.notify);
            handle.spawn(async move {
                loop {
                    notify.notified().await;
                    let Some(store) = weak.upgrade() else { break };
                    store.tick();
                }
            });
        }
    }
}
