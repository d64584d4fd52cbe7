//! Message-channel contract between the main and renderer processes.
//!
//! The concrete transport (Tauri events, Electron IPC, a socket) lives
//! outside this crate. Stores only need `send` / `listen` on named channels,
//! assumed ordered and at-least-once per direction, with no cross-channel
//! ordering. `InMemoryBus` is the in-process implementation used by tests
//! and by single-process setups.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use serde_json::Value;

/// Handler invoked for every payload delivered on a channel.
pub type ChannelHandler = Arc<dyn Fn(Value) + Send + Sync>;

/// Point-to-point message transport between two named endpoints.
pub trait MessageBus: Send + Sync {
    fn send(&self, channel: &str, payload: Value);

    /// Register a handler for a channel. The listener stays active until the
    /// returned [`Subscription`] is dropped.
    fn listen(&self, channel: &str, handler: ChannelHandler) -> Subscription;
}

/// Guard that removes a channel listener when dropped.
pub struct Subscription(Option<Box<dyn FnOnce() + Send>>);

impl Subscription {
    pub fn new(unlisten: impl FnOnce() + Send + 'static) -> Self {
        Self(Some(Box::new(unlisten)))
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(unlisten) = self.0.take() {
            unlisten();
        }
    }
}

/// Per-process direction prefixes for store sync channels.
///
/// A store sends on its peer's prefix and listens on its own, so the main
/// and renderer sides of the same logical store end up with mirrored
/// channel ids: main's send id equals the renderer's receive id and vice
/// versa.
#[derive(Clone, Copy, Debug)]
pub struct ChannelPrefixes {
    pub local: &'static str,
    pub remote: &'static str,
}

impl ChannelPrefixes {
    pub const MAIN: Self = Self {
        local: "store-sync-main",
        remote: "store-sync-renderer",
    };

    pub const RENDERER: Self = Self {
        local: "store-sync-renderer",
        remote: "store-sync-main",
    };
}

/// The two channel ids used to replicate one store between two processes.
///
/// Ids are derived from the store's config file path so independent stores
/// never collide.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelPair {
    pub send: String,
    pub receive: String,
}

impl ChannelPair {
    pub fn for_path(prefixes: ChannelPrefixes, path: &Path) -> Self {
        Self {
            send: format!("{}:{}", prefixes.remote, path.display()),
            receive: format!("{}:{}", prefixes.local, path.display()),
        }
    }
}

/// Synchronous in-process bus: `send` delivers to all current listeners
/// before returning.
#[derive(Default)]
pub struct InMemoryBus {
    next_id: AtomicU64,
    listeners: Arc<DashMap<String, Vec<(u64, ChannelHandler)>>>,
}

impl InMemoryBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

impl MessageBus for InMemoryBus {
    fn send(&self, channel: &str, payload: Value) {
        // Clone handlers out so delivery doesn't hold the map entry; a
        // handler may itself listen or send.
        let handlers: Vec<ChannelHandler> = self
            .listeners
            .get(channel)
            .map(|entry| entry.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(payload.clone());
        }
    }

    fn listen(&self, channel: &str, handler: ChannelHandler) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners
            .entry(channel.to_string())
            .or_default()
            .push((id, handler));

        let listeners = Arc::clone(&self.listeners);
        let channel = channel.to_string();
        Subscription::new(move || {
            if let Some(mut entry) = listeners.get_mut(&channel) {
                entry.retain(|(listener_id, _)| *listener_id != id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn channel_pair_ids_mirror_between_processes() {
        let path = PathBuf::from("/data/clusterdeck-extensions.json");
        let main = ChannelPair::for_path(ChannelPrefixes::MAIN, &path);
        let renderer = ChannelPair::for_path(ChannelPrefixes::RENDERER, &path);

        assert_eq!(main.send, renderer.receive);
        assert_eq!(main.receive, renderer.send);
        assert_ne!(main.send, main.receive);
    }

    #[test]
    fn channel_pair_ids_differ_per_path() {
        let a = ChannelPair::for_path(ChannelPrefixes::MAIN, Path::new("/data/a.json"));
        let b = ChannelPair::for_path(ChannelPrefixes::MAIN, Path::new("/data/b.json"));
        assert_ne!(a.send, b.send);
        assert_ne!(a.receive, b.receive);
    }

    #[test]
    fn send_reaches_only_matching_channel() {
        let bus = InMemoryBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        let _sub = bus.listen(
            "chan-a",
            Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.send("chan-a", Value::from(1));
        bus.send("chan-b", Value::from(2));

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropping_subscription_unlistens() {
        let bus = InMemoryBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        let sub = bus.listen(
            "chan",
            Arc::new(move |_| {
                hits_clone.fetch_add(1, Ordering::SeqCst);
            }),
        );

        bus.send("chan", Value::Null);
        drop(sub);
        bus.send("chan", Value::Null);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn multiple_listeners_all_receive() {
        let bus = InMemoryBus::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        let h2 = Arc::clone(&hits);
        let _s1 = bus.listen("chan", Arc::new(move |_| { h1.fetch_add(1, Ordering::SeqCst); }));
        let _s2 = bus.listen("chan", Arc::new(move |_| { h2.fetch_add(1, Ordering::SeqCst); }));

        bus.send("chan", Value::Null);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }
}
