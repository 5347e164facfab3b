//! Local document cache.
//!
//! One cache per process. Each `DocumentKey` moves through
//! `Unloaded -> Loading -> Cached -> (Saving) -> Cached | Conflicted -> Cached`.
//!
//! Loads are single-flight: the first caller installs a shared future in the
//! key's slot and every later caller awaits a clone of it. The slot owns the
//! future, so a caller that stops waiting never tears down the load for
//! anyone else.

use crate::content::CanonicalTree;
use crate::events::{now_ms, EventBus, SyncEvent};
use crate::key::DocumentKey;
use crate::store::{DocumentVersion, StoreError, StoredDocument};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tracing::{debug, warn};
use web_time::Instant;

/// A cached document.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub key: DocumentKey,
    pub content: CanonicalTree,
    pub version: DocumentVersion,
    pub last_access: Instant,
}

impl CacheEntry {
    pub fn new(key: DocumentKey, content: CanonicalTree, version: DocumentVersion) -> Self {
        Self {
            key,
            content,
            version,
            last_access: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentState {
    Unloaded,
    Loading,
    Cached,
    Saving,
    Conflicted,
}

/// Tentative cache state for a save in flight.
///
/// `optimistic` is what the cache shows while the save is outstanding;
/// `previous` is what it reverts to if the store rejects the save.
#[derive(Debug, Clone)]
pub struct OptimisticSave {
    pub previous: Option<CacheEntry>,
    pub optimistic: CacheEntry,
}

impl OptimisticSave {
    /// Version the save is based on (0 if the key was never loaded).
    pub fn base_version(&self) -> DocumentVersion {
        self.previous.as_ref().map_or(0, |entry| entry.version)
    }
}

pub type LoadFuture = Shared<BoxFuture<'static, Result<CacheEntry, StoreError>>>;

/// Result of asking the cache for a document.
pub enum CacheLookup {
    Hit(CacheEntry),
    /// A load is in flight; await this to share its result.
    InFlight(LoadFuture),
}

enum Slot {
    Loading(LoadFuture),
    Cached(CacheEntry),
    Saving(OptimisticSave),
    Conflicted(Option<CacheEntry>),
}

impl Slot {
    fn state(&self) -> DocumentState {
        match self {
            Slot::Loading(_) => DocumentState::Loading,
            Slot::Cached(_) => DocumentState::Cached,
            Slot::Saving(_) => DocumentState::Saving,
            Slot::Conflicted(_) => DocumentState::Conflicted,
        }
    }

    fn entry_mut(&mut self) -> Option<&mut CacheEntry> {
        match self {
            Slot::Cached(entry) => Some(entry),
            Slot::Saving(save) => Some(&mut save.optimistic),
            Slot::Conflicted(entry) => entry.as_mut(),
            Slot::Loading(_) => None,
        }
    }
}

pub struct DocumentCache {
    slots: Mutex<HashMap<DocumentKey, Slot>>,
    events: Arc<EventBus>,
}

impl DocumentCache {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            events,
        }
    }

    fn slots(&self) -> std::sync::MutexGuard<'_, HashMap<DocumentKey, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return the cached entry, join an in-flight load, or start one with `fetch`.
    ///
    /// `fetch` is only called when no entry is cached and no load is in flight.
    pub fn load_with<F>(self: &Arc<Self>, key: &DocumentKey, fetch: F) -> CacheLookup
    where
        F: FnOnce() -> BoxFuture<'static, crate::store::Result<StoredDocument>>,
    {
        let mut slots = self.slots();
        if let Some(slot) = slots.get_mut(key) {
            if let Slot::Loading(future) = slot {
                debug!("Joining in-flight load for {}", key);
                return CacheLookup::InFlight(future.clone());
            }
            if let Some(entry) = slot.entry_mut() {
                entry.last_access = Instant::now();
                return CacheLookup::Hit(entry.clone());
            }
        }

        debug!("Loading {} from version store", key);
        let cache = Arc::downgrade(self);
        let owned_key = key.clone();
        let request = fetch();
        let future = async move {
            let result = request.await;
            Self::complete_load(&cache, &owned_key, result)
        }
        .boxed()
        .shared();

        slots.insert(key.clone(), Slot::Loading(future.clone()));
        CacheLookup::InFlight(future)
    }

    fn complete_load(
        cache: &Weak<Self>,
        key: &DocumentKey,
        result: crate::store::Result<StoredDocument>,
    ) -> Result<CacheEntry, StoreError> {
        let doc = match result {
            Ok(doc) => doc,
            Err(StoreError::NotFound(_)) => {
                debug!("{} has never been saved, starting empty", key);
                StoredDocument::empty()
            }
            Err(e) => {
                warn!("Load failed for {}: {}", key, e);
                if let Some(cache) = cache.upgrade() {
                    let mut slots = cache.slots();
                    if matches!(slots.get(key), Some(Slot::Loading(_))) {
                        slots.remove(key);
                    }
                }
                return Err(e);
            }
        };

        let entry = CacheEntry::new(key.clone(), doc.content, doc.version);
        let Some(cache) = cache.upgrade() else {
            return Ok(entry);
        };

        let mut slots = cache.slots();
        let entry = match slots.get_mut(key) {
            // Evicted mid-load: hand the result to the waiters without caching it.
            None => return Ok(entry),
            Some(slot) => {
                // Something newer may have landed while the load was in flight.
                let newer = slot
                    .entry_mut()
                    .filter(|existing| existing.version >= entry.version)
                    .cloned();
                match newer {
                    Some(existing) => existing,
                    None => {
                        *slot = Slot::Cached(entry.clone());
                        entry
                    }
                }
            }
        };
        drop(slots);

        cache.events.emit(SyncEvent::DocumentCached {
            key: key.clone(),
            version: entry.version,
            timestamp: now_ms(),
        });
        Ok(entry)
    }

    /// Replace the entry with content fetched from the version store.
    pub fn store_remote(&self, key: &DocumentKey, doc: StoredDocument) -> CacheEntry {
        let entry = CacheEntry::new(key.clone(), doc.content, doc.version);
        self.slots().insert(key.clone(), Slot::Cached(entry.clone()));
        self.events.emit(SyncEvent::DocumentCached {
            key: key.clone(),
            version: entry.version,
            timestamp: now_ms(),
        });
        entry
    }

    /// Show `content` at the next version before the store has acknowledged it.
    pub fn apply_optimistic(&self, key: &DocumentKey, content: &CanonicalTree) -> OptimisticSave {
        let mut slots = self.slots();
        let previous = slots.get_mut(key).and_then(Slot::entry_mut).cloned();
        let base_version = previous.as_ref().map_or(0, |entry| entry.version);
        let save = OptimisticSave {
            previous,
            optimistic: CacheEntry::new(key.clone(), content.clone(), base_version + 1),
        };
        slots.insert(key.clone(), Slot::Saving(save.clone()));
        save
    }

    /// Settle an optimistic save at the version the store assigned.
    pub fn commit_save(&self, save: &OptimisticSave, version: DocumentVersion) -> CacheEntry {
        let key = &save.optimistic.key;
        let mut committed = save.optimistic.clone();
        committed.version = version;
        committed.last_access = Instant::now();

        let mut slots = self.slots();
        match slots.get_mut(key) {
            Some(Slot::Cached(existing)) if existing.version > version => existing.clone(),
            _ => {
                slots.insert(key.clone(), Slot::Cached(committed.clone()));
                committed
            }
        }
    }

    /// Revert an optimistic save to its pre-save state.
    ///
    /// A rejected save leaves the key `Conflicted` until a remote refresh
    /// lands; any other failure returns it to `Cached` (or `Unloaded`).
    pub fn rollback(&self, save: &OptimisticSave, conflicted: bool) {
        let key = &save.optimistic.key;
        let mut slots = self.slots();
        match (&save.previous, conflicted) {
            (previous, true) => {
                slots.insert(key.clone(), Slot::Conflicted(previous.clone()));
            }
            (Some(previous), false) => {
                slots.insert(key.clone(), Slot::Cached(previous.clone()));
            }
            (None, false) => {
                slots.remove(key);
            }
        }
    }

    /// Cached entry, without I/O.
    pub fn get(&self, key: &DocumentKey) -> Option<CacheEntry> {
        let mut slots = self.slots();
        let entry = slots.get_mut(key).and_then(Slot::entry_mut)?;
        entry.last_access = Instant::now();
        Some(entry.clone())
    }

    pub fn version(&self, key: &DocumentKey) -> Option<DocumentVersion> {
        self.slots()
            .get_mut(key)
            .and_then(Slot::entry_mut)
            .map(|entry| entry.version)
    }

    pub fn state(&self, key: &DocumentKey) -> DocumentState {
        self.slots()
            .get(key)
            .map_or(DocumentState::Unloaded, Slot::state)
    }

    /// Drop a key. An in-flight load still completes for its waiters.
    pub fn evict(&self, key: &DocumentKey) -> bool {
        self.slots().remove(key).is_some()
    }

    /// Drop settled entries not accessed within `older_than`. Returns how many.
    pub fn evict_idle(&self, older_than: Duration) -> usize {
        let mut slots = self.slots();
        let before = slots.len();
        slots.retain(|_, slot| match slot {
            Slot::Loading(_) | Slot::Saving(_) => true,
            Slot::Cached(entry) | Slot::Conflicted(Some(entry)) => {
                entry.last_access.elapsed() < older_than
            }
            Slot::Conflicted(None) => false,
        });
        before - slots.len()
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
