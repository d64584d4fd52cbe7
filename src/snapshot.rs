//! On-disk snapshot persistence and load-time migrations.
//!
//! Each store owns exactly one JSON file holding its full state; there are
//! no partial writes. Writes are atomic (temp file + rename) so a crash
//! leaves either the old snapshot or the new one, never a torn file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreError;

/// Get the config directory using the platform-appropriate location.
///
/// - macOS: `~/Library/Application Support/clusterdeck/`
/// - Linux: `~/.config/clusterdeck/` (or `$XDG_CONFIG_HOME`)
/// - Windows: `%APPDATA%/clusterdeck/`
///
/// Falls back to `~/.clusterdeck/` if the platform dir is unavailable.
pub fn user_data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("clusterdeck"))
        .unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".clusterdeck")
        })
}

/// Persistence adapter: reads and writes one store's full snapshot file.
pub trait SnapshotStorage: Send + Sync {
    /// Read the snapshot at `path`. `Ok(None)` means the file doesn't exist
    /// yet; a file that exists but can't be parsed is a `ConfigLoad` error.
    fn read(&self, path: &Path) -> Result<Option<Value>, StoreError>;

    /// Overwrite the snapshot at `path`. Last writer wins.
    fn write(&self, path: &Path, snapshot: &Value) -> Result<(), StoreError>;
}

/// Default [`SnapshotStorage`] backed by the filesystem.
pub struct DiskStorage;

impl SnapshotStorage for DiskStorage {
    fn read(&self, path: &Path) -> Result<Option<Value>, StoreError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let value = serde_json::from_str(&content).map_err(|e| StoreError::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Ok(Some(value))
    }

    fn write(&self, path: &Path, snapshot: &Value) -> Result<(), StoreError> {
        let io_err = |e: std::io::Error| StoreError::Io {
            path: path.to_path_buf(),
            source: e,
        };

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }

        let json = serde_json::to_string_pretty(snapshot).map_err(|e| StoreError::Encode {
            message: e.to_string(),
        })?;

        let temp = path.with_extension(format!("tmp.{}", std::process::id()));
        std::fs::write(&temp, &json).map_err(io_err)?;

        // Owner read/write only; snapshots can hold cluster credentials.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }

        std::fs::rename(&temp, path).map_err(|e| {
            let _ = std::fs::remove_file(&temp);
            io_err(e)
        })?;

        Ok(())
    }
}

/// The on-disk shape of every store file: the migration version plus the
/// store's state as one JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotFile {
    pub version: u32,
    pub state: Value,
}

impl SnapshotFile {
    pub fn empty() -> Self {
        Self {
            version: 0,
            state: Value::Null,
        }
    }
}

/// A single versioned migration: rewrites the raw state value of any
/// snapshot whose version is below `version`.
pub struct Migration {
    pub version: u32,
    pub run: Box<dyn Fn(Value) -> Result<Value, String> + Send + Sync>,
}

impl Migration {
    pub fn new(
        version: u32,
        run: impl Fn(Value) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            version,
            run: Box::new(run),
        }
    }
}

/// Apply all migrations whose target version exceeds the snapshot's version,
/// in ascending order. Re-running against an already-migrated snapshot is a
/// no-op, which is what makes migrations idempotent across restarts.
pub fn run_migrations(
    mut file: SnapshotFile,
    migrations: &[Migration],
) -> Result<SnapshotFile, StoreError> {
    let mut ordered: Vec<&Migration> = migrations.iter().collect();
    ordered.sort_by_key(|m| m.version);

    for migration in ordered {
        if migration.version <= file.version {
            continue;
        }
        file.state = (migration.run)(file.state).map_err(|message| StoreError::Migration {
            version: migration.version,
            message,
        })?;
        file.version = migration.version;
    }

    Ok(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn read_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let result = DiskStorage.read(&dir.path().join("absent.json")).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        let snapshot = json!({"version": 2, "state": {"theme": "dark"}});

        DiskStorage.write(&path, &snapshot).unwrap();
        let read = DiskStorage.read(&path).unwrap().unwrap();
        assert_eq!(read, snapshot);
    }

    #[test]
    fn write_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("deep").join("store.json");
        DiskStorage.write(&path, &json!({"ok": true})).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn corrupt_file_is_config_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");
        std::fs::write(&path, "{not json").unwrap();

        let err = DiskStorage.read(&path).unwrap_err();
        assert!(matches!(err, StoreError::ConfigLoad { .. }));
    }

    #[test]
    fn overwrite_replaces_whole_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.json");

        DiskStorage.write(&path, &json!({"a": 1, "b": 2})).unwrap();
        DiskStorage.write(&path, &json!({"a": 3})).unwrap();

        let read = DiskStorage.read(&path).unwrap().unwrap();
        assert_eq!(read, json!({"a": 3}));
    }

    #[test]
    fn migrations_run_in_ascending_order() {
        let migrations = vec![
            Migration::new(2, |state| {
                let mut s = state;
                s["second"] = json!(s["first"].as_i64().unwrap() + 1);
                Ok(s)
            }),
            Migration::new(1, |_| Ok(json!({"first": 1}))),
        ];

        let out = run_migrations(SnapshotFile::empty(), &migrations).unwrap();
        assert_eq!(out.version, 2);
        assert_eq!(out.state, json!({"first": 1, "second": 2}));
    }

    #[test]
    fn migrations_already_applied_are_skipped() {
        let ran = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let ran_clone = std::sync::Arc::clone(&ran);
        let migrations = vec![Migration::new(1, move |state| {
            ran_clone.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(state)
        })];

        let file = SnapshotFile {
            version: 1,
            state: json!({}),
        };
        let out = run_migrations(file, &migrations).unwrap();
        assert_eq!(out.version, 1);
        assert_eq!(ran.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[test]
    fn failing_migration_reports_target_version() {
        let migrations = vec![
            Migration::new(1, |state| Ok(state)),
            Migration::new(2, |_| Err("bad shape".into())),
        ];

        let err = run_migrations(SnapshotFile::empty(), &migrations).unwrap_err();
        match err {
            StoreError::Migration { version, message } => {
                assert_eq!(version, 2);
                assert_eq!(message, "bad shape");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
