//! Cross-process state replication and extension runtime for clusterdeck.
//!
//! Two building blocks:
//!
//! - [`store::SyncedStore`]: a reactive store that persists its full state
//!   as one JSON snapshot and mirrors it between the main and renderer
//!   processes over a [`bus::MessageBus`].
//! - [`loader::ExtensionLoader`]: per-process reconciliation of runtime
//!   extension instances against the replicated
//!   [`registry::ExtensionRegistry`].
//!
//! The host application supplies the transport (a [`bus::MessageBus`]
//! implementation) and the code loading seam (an
//! [`extension::ModuleResolver`]); everything else lives here.

pub mod app_log;
pub mod bus;
pub mod discovery;
pub mod error;
pub mod extension;
pub mod loader;
pub mod logging;
pub mod manifest;
pub mod registry;
pub mod snapshot;
pub mod store;
pub mod update_check;

pub use app_log::{AppLog, LogEntry};
pub use bus::{ChannelPair, ChannelPrefixes, InMemoryBus, MessageBus, Subscription};
pub use discovery::{ExtensionsWatcher, scan_extensions, watch_extensions};
pub use error::{ActivationError, StoreError};
pub use extension::{
    Disposer, Extension, ExtensionConstructor, ExtensionInstance, ModuleResolver, ProcessKind,
};
pub use loader::{ExtensionLoader, LoadingExtension};
pub use manifest::{ExtensionId, ExtensionManifest, InstalledExtension, validate_manifest};
pub use registry::{ExtensionRegistry, ExtensionsModel, REGISTRY_CONFIG_NAME};
pub use snapshot::{DiskStorage, Migration, SnapshotFile, SnapshotStorage, user_data_dir};
pub use store::{StoreModel, StoreParams, SyncState, SyncedStore};
pub use update_check::{RemoteIndexSource, UpdateChecker, VersionSource};
