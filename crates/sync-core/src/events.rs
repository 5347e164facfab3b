//! Event infrastructure for sync-core.
//!
//! Provides `SyncEvent` for cache mutations and remote updates, and `EventBus`
//! for in-process subscriptions. Wrap the bus in `Arc` to subscribe.

use crate::content::Content;
use crate::key::DocumentKey;
use crate::store::DocumentVersion;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use web_time::{SystemTime, UNIX_EPOCH};

/// Why a remote update was fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateReason {
    /// A save was rejected as stale and the provider refreshed.
    Conflict,
    /// Explicit refresh (visibility change, Save & Sync).
    Manual,
    RemoteUpdate,
}

/// Fresh content fetched from the version store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteUpdate {
    #[serde(flatten)]
    pub key: DocumentKey,
    pub version: DocumentVersion,
    pub content: Content,
    pub reason: UpdateReason,
}

/// Sync events emitted by the provider and cache.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SyncEvent {
    /// A load populated (or refreshed) a cache entry.
    DocumentCached {
        #[serde(flatten)]
        key: DocumentKey,
        version: DocumentVersion,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// The version store acknowledged a save.
    DocumentSaved {
        #[serde(flatten)]
        key: DocumentKey,
        version: DocumentVersion,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// Emitted for every remote refresh, including the conflict path.
    RemoteUpdate(RemoteUpdate),
}

impl SyncEvent {
    pub fn key(&self) -> &DocumentKey {
        match self {
            SyncEvent::DocumentCached { key, .. } | SyncEvent::DocumentSaved { key, .. } => key,
            SyncEvent::RemoteUpdate(update) => &update.key,
        }
    }
}

/// Current wall-clock time in milliseconds since Unix epoch.
pub(crate) fn now_ms() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as f64)
        .unwrap_or_default()
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or let it go out of scope) to unsubscribe.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(SyncEvent) + Send + Sync>;

/// Event bus for publishing sync events to subscribers.
///
/// Thread-safe for use in multi-threaded Tokio runtime.
#[derive(Default)]
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // try_write: Drop may run during unwinding while emit holds a read lock.
        if let Ok(mut guard) = self.callbacks.try_write() {
            guard.retain(|(i, _)| *i != id);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: SyncEvent) {
        // Clone the callback list so a callback may subscribe without deadlock.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::CanonicalTree;

    fn cached(panel: &str) -> SyncEvent {
        SyncEvent::DocumentCached {
            key: DocumentKey::new("note", panel),
            version: 1,
            timestamp: 1000.0,
        }
    }

    #[test]
    fn test_subscribe_and_emit() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        let _sub = bus.subscribe(move |_event| {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(cached("main"));

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_on_drop() {
        let bus = Arc::new(EventBus::new());
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);

        {
            let _sub = bus.subscribe(move |_event| {
                count_clone.fetch_add(1, Ordering::Relaxed);
            });
            bus.emit(cached("main"));
            assert_eq!(count.load(Ordering::Relaxed), 1);
        }

        bus.emit(cached("branch"));
        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_partial_unsubscribe() {
        let bus = Arc::new(EventBus::new());
        let count1 = Arc::new(AtomicUsize::new(0));
        let count2 = Arc::new(AtomicUsize::new(0));

        let count1_clone = Arc::clone(&count1);
        let count2_clone = Arc::clone(&count2);

        let sub1 = bus.subscribe(move |_| {
            count1_clone.fetch_add(1, Ordering::Relaxed);
        });
        let _sub2 = bus.subscribe(move |_| {
            count2_clone.fetch_add(1, Ordering::Relaxed);
        });

        bus.emit(cached("main"));
        drop(sub1);
        bus.emit(cached("main"));

        assert_eq!(count1.load(Ordering::Relaxed), 1);
        assert_eq!(count2.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_callback_may_subscribe_during_emit() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = Arc::clone(&bus);
        let held = Arc::new(RwLock::new(Vec::new()));
        let held_clone = Arc::clone(&held);

        let _sub = bus.subscribe(move |_| {
            let sub = inner_bus.subscribe(|_| {});
            held_clone.write().unwrap().push(sub);
        });

        bus.emit(cached("main"));
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_remote_update_serialization() {
        let event = SyncEvent::RemoteUpdate(RemoteUpdate {
            key: DocumentKey::new("n1", "p1"),
            version: 5,
            content: Content::Tree(CanonicalTree::empty()),
            reason: UpdateReason::RemoteUpdate,
        });

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "remoteUpdate");
        assert_eq!(json["noteId"], "n1");
        assert_eq!(json["panelId"], "p1");
        assert_eq!(json["version"], 5);
        assert_eq!(json["reason"], "remote-update");
        assert_eq!(json["content"]["kind"], "tree");
    }

    #[test]
    fn test_cached_event_serialization() {
        let json = serde_json::to_string(&cached("main")).unwrap();
        assert!(json.contains("\"type\":\"documentCached\""));
        assert!(json.contains("\"panelId\":\"main\""));
        assert!(json.contains("\"timestamp\":"));
    }
}
