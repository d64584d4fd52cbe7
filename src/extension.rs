//! Extension runtime objects and the collaborator seams around them.
//!
//! The core never loads code itself: a [`ModuleResolver`] turns a manifest
//! path plus process kind into a constructor (or `None` when the extension
//! has no entry point for that kind), and the constructor yields the
//! [`Extension`] whose `enable`/`disable` the reconciler drives.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::ActivationError;
use crate::manifest::{ExtensionId, InstalledExtension};

/// Which side of the process split this code runs on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcessKind {
    Main,
    Renderer,
}

impl ProcessKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ProcessKind::Main => "main",
            ProcessKind::Renderer => "renderer",
        }
    }
}

/// Callback that releases one resource an extension registered while
/// enabled (a page, a menu item, a status bar entry).
pub type Disposer = Box<dyn FnOnce() + Send>;

/// The behavior an extension contributes to this process.
#[async_trait]
pub trait Extension: Send + Sync {
    /// Activate the extension. Returns the disposers for everything it
    /// registered; they run when the instance is torn down.
    async fn enable(&self) -> Result<Vec<Disposer>, ActivationError>;

    async fn disable(&self);
}

/// Produces the runtime [`Extension`] for one installed extension.
pub trait ExtensionConstructor: Send + Sync {
    fn construct(
        &self,
        installed: &InstalledExtension,
    ) -> Result<Arc<dyn Extension>, ActivationError>;
}

/// Resolves an extension's process-specific entry point to a constructor.
/// `None` means the extension ships no entry point for this process kind.
pub trait ModuleResolver: Send + Sync {
    fn resolve_entry_point(
        &self,
        manifest_path: &Path,
        kind: ProcessKind,
    ) -> Option<Arc<dyn ExtensionConstructor>>;
}

/// A live extension instance, bound 1:1 to one registry id.
///
/// Local to the process that created it; never replicated. The instance set
/// is owned by the reconciler, which is also the only caller of
/// [`teardown`](Self::teardown).
pub struct ExtensionInstance {
    pub id: ExtensionId,
    /// Copied from the manifest at construction; unique among live
    /// instances in this process.
    pub name: String,
    pub is_bundled: bool,
    extension: Arc<dyn Extension>,
    disposers: Mutex<Vec<Disposer>>,
    removed_observers: Mutex<Vec<Box<dyn FnOnce() + Send>>>,
    removed: AtomicBool,
}

impl ExtensionInstance {
    pub fn new(
        id: ExtensionId,
        name: String,
        is_bundled: bool,
        extension: Arc<dyn Extension>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            name,
            is_bundled,
            extension,
            disposers: Mutex::new(Vec::new()),
            removed_observers: Mutex::new(Vec::new()),
            removed: AtomicBool::new(false),
        })
    }

    /// Register a callback invoked exactly once when this instance is torn
    /// down. Contribution registries use this to drop what the extension
    /// added.
    pub fn on_removed(&self, f: impl FnOnce() + Send + 'static) {
        if self.removed.load(Ordering::SeqCst) {
            f();
            return;
        }
        self.removed_observers.lock().push(Box::new(f));
    }

    pub fn is_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    pub(crate) fn extension(&self) -> Arc<dyn Extension> {
        Arc::clone(&self.extension)
    }

    /// Run the extension's `enable` and retain its disposers. If the
    /// instance was removed while `enable` was in flight, the result is
    /// discarded: the documented race of fire-and-forget activation.
    pub(crate) async fn run_enable(&self) -> Result<(), ActivationError> {
        let disposers = self.extension.enable().await?;
        if self.removed.load(Ordering::SeqCst) {
            return Ok(());
        }
        self.disposers.lock().extend(disposers);
        Ok(())
    }

    /// Drop every registered resource and fire removal observers. Invoked
    /// exactly once by the reconciler; later calls are no-ops.
    pub(crate) fn teardown(&self) {
        if self.removed.swap(true, Ordering::SeqCst) {
            return;
        }
        let disposers: Vec<Disposer> = std::mem::take(&mut *self.disposers.lock());
        for disposer in disposers {
            disposer();
        }
        let observers = std::mem::take(&mut *self.removed_observers.lock());
        for observer in observers {
            observer();
        }
    }
}
