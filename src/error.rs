//! Error types for the store and extension subsystems.

use std::path::PathBuf;

/// Errors raised while loading, persisting, or syncing a store.
///
/// `ConfigLoad` and `SyncApply` are recoverable by design: the store logs
/// them and keeps (or falls back to) its current model. `Migration` aborts
/// the load of that store only.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("failed to load snapshot {path}: {message}")]
    ConfigLoad { path: PathBuf, message: String },

    #[error("migration to version {version} failed: {message}")]
    Migration { version: u32, message: String },

    #[error("inbound snapshot rejected: {message}")]
    SyncApply { message: String },

    #[error("snapshot serialization failed: {message}")]
    Encode { message: String },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while activating a single extension. Fatal to that
/// extension's activation only, never to the process.
#[derive(thiserror::Error, Debug)]
pub enum ActivationError {
    #[error("extension name \"{0}\" is already taken by a live instance")]
    DuplicateName(String),

    #[error("failed to construct \"{name}\": {message}")]
    Construct { name: String, message: String },

    #[error("enable failed for \"{name}\": {message}")]
    Enable { name: String, message: String },
}
