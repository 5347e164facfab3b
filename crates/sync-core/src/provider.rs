//! Sync provider: the local cache orchestrated against a version store.
//!
//! All cross-process ordering comes from the store's `baseVersion` check.
//! Within one process the provider serializes saves and refreshes per key,
//! so the optimistic cache state of one save is never interleaved with
//! another.

use crate::cache::{CacheEntry, CacheLookup, DocumentCache, DocumentState};
use crate::content::{CanonicalTree, Content};
use crate::error::{Result, SyncError};
use crate::events::{now_ms, EventBus, RemoteUpdate, Subscription, SyncEvent, UpdateReason};
use crate::key::DocumentKey;
use crate::store::{DocumentVersion, StoreError, StoredDocument, VersionStore};
use futures::FutureExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Result of a save that reached the version store.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveOutcome {
    Saved { version: DocumentVersion },
    /// The store rejected the save as stale. `update` is the authoritative
    /// content fetched afterwards (also emitted as a `RemoteUpdate` event).
    Conflict {
        latest_version: DocumentVersion,
        update: RemoteUpdate,
    },
}

pub struct SyncProvider<S: VersionStore + ?Sized> {
    store: Arc<S>,
    cache: Arc<DocumentCache>,
    events: Arc<EventBus>,
    key_locks: Mutex<HashMap<DocumentKey, Arc<tokio::sync::Mutex<()>>>>,
    last_refresh: Mutex<HashMap<DocumentKey, Instant>>,
}

impl<S: VersionStore + ?Sized + 'static> SyncProvider<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_events(store, Arc::new(EventBus::new()))
    }

    pub fn with_events(store: Arc<S>, events: Arc<EventBus>) -> Self {
        Self {
            store,
            cache: Arc::new(DocumentCache::new(Arc::clone(&events))),
            events,
            key_locks: Mutex::new(HashMap::new()),
            last_refresh: Mutex::new(HashMap::new()),
        }
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn subscribe(&self, callback: impl Fn(SyncEvent) + Send + Sync + 'static) -> Subscription {
        self.events.subscribe(callback)
    }

    pub fn cache(&self) -> &Arc<DocumentCache> {
        &self.cache
    }

    fn key_lock(&self, key: &DocumentKey) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(key.clone()).or_default())
    }

    /// Load a document, answering from the cache when possible.
    ///
    /// Concurrent calls for the same key share one store load. A key that was
    /// never saved loads as an empty document at version 0.
    pub async fn load_document(&self, key: &DocumentKey) -> Result<CacheEntry> {
        match self.lookup(key) {
            CacheLookup::Hit(entry) => Ok(entry),
            CacheLookup::InFlight(load) => Ok(load.await?),
        }
    }

    /// Like [`load_document`](Self::load_document), but stops waiting when
    /// `cancel` fires. The shared load keeps running for other callers.
    pub async fn load_document_cancellable(
        &self,
        key: &DocumentKey,
        cancel: &CancellationToken,
    ) -> Result<CacheEntry> {
        let load = match self.lookup(key) {
            CacheLookup::Hit(entry) => return Ok(entry),
            CacheLookup::InFlight(load) => load,
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("Stopped waiting for load of {}", key);
                Err(SyncError::Cancelled)
            }
            result = load => Ok(result?),
        }
    }

    fn lookup(&self, key: &DocumentKey) -> CacheLookup {
        let store = Arc::clone(&self.store);
        let owned_key = key.clone();
        self.cache
            .load_with(key, move || async move { store.load(&owned_key).await }.boxed())
    }

    /// Save `content` against the cached version.
    ///
    /// The cache shows the new content immediately. Once issued, the save runs
    /// to completion on its own task even if the caller stops waiting, so the
    /// cache always settles to the store's decision.
    pub async fn save_document(
        self: &Arc<Self>,
        key: &DocumentKey,
        content: &CanonicalTree,
    ) -> Result<SaveOutcome> {
        let this = Arc::clone(self);
        let key = key.clone();
        let content = content.clone();
        let task = tokio::spawn(async move { this.save_locked(key, content).await });
        match task.await {
            Ok(result) => result,
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(_) => Err(SyncError::Cancelled),
        }
    }

    async fn save_locked(&self, key: DocumentKey, content: CanonicalTree) -> Result<SaveOutcome> {
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        if self.cache.state(&key) == DocumentState::Loading {
            self.load_document(&key).await?;
        }

        let save = self.cache.apply_optimistic(&key, &content);
        let base_version = save.base_version();
        debug!("Saving {} (base {})", key, base_version);

        match self.store.save(&key, &content, base_version).await {
            Ok(version) => {
                self.cache.commit_save(&save, version);
                debug!("Saved {} as version {}", key, version);
                self.events.emit(SyncEvent::DocumentSaved {
                    key: key.clone(),
                    version,
                    timestamp: now_ms(),
                });
                Ok(SaveOutcome::Saved { version })
            }
            Err(StoreError::StaleWrite { latest_version, .. }) => {
                info!(
                    "Save of {} rejected: base {} behind latest {}",
                    key, base_version, latest_version
                );
                self.cache.rollback(&save, true);
                let update = self.refresh_unlocked(&key, UpdateReason::Conflict).await?;
                Ok(SaveOutcome::Conflict {
                    latest_version,
                    update,
                })
            }
            Err(e) => {
                error!("Save of {} failed: {}", key, e);
                self.cache.rollback(&save, false);
                Err(e.into())
            }
        }
    }

    /// Fetch the store's current content, bypassing the cache.
    ///
    /// Always emits a `RemoteUpdate` event, even when the version has not
    /// moved; subscribers decide whether it matters.
    pub async fn refresh_document_from_remote(
        &self,
        key: &DocumentKey,
        reason: UpdateReason,
    ) -> Result<RemoteUpdate> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;
        self.refresh_unlocked(key, reason).await
    }

    /// Refresh unless another refresh or save for `key` is running, or the last
    /// refresh was less than `min_interval` ago.
    pub async fn refresh_if_idle(
        &self,
        key: &DocumentKey,
        reason: UpdateReason,
        min_interval: Duration,
    ) -> Result<Option<RemoteUpdate>> {
        if let Some(last) = self.last_refresh(key) {
            if last.elapsed() < min_interval {
                debug!("Skipping refresh of {}: refreshed {:?} ago", key, last.elapsed());
                return Ok(None);
            }
        }
        let lock = self.key_lock(key);
        let Ok(_guard) = lock.try_lock() else {
            debug!("Skipping refresh of {}: busy", key);
            return Ok(None);
        };
        self.refresh_unlocked(key, reason).await.map(Some)
    }

    fn last_refresh(&self, key: &DocumentKey) -> Option<Instant> {
        let last = self.last_refresh.lock().unwrap_or_else(|e| e.into_inner());
        last.get(key).copied()
    }

    async fn refresh_unlocked(&self, key: &DocumentKey, reason: UpdateReason) -> Result<RemoteUpdate> {
        let doc = match self.store.load(key).await {
            Ok(doc) => doc,
            Err(StoreError::NotFound(_)) => StoredDocument::empty(),
            Err(e) => return Err(e.into()),
        };
        self.last_refresh
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.clone(), Instant::now());

        let entry = self.cache.store_remote(key, doc);
        debug!("Refreshed {} at version {} ({:?})", key, entry.version, reason);
        let update = RemoteUpdate {
            key: key.clone(),
            version: entry.version,
            content: Content::Tree(entry.content),
            reason,
        };
        self.events.emit(SyncEvent::RemoteUpdate(update.clone()));
        Ok(update)
    }

    /// Cached content, without I/O.
    pub fn get_document(&self, key: &DocumentKey) -> Option<CanonicalTree> {
        self.cache.get(key).map(|entry| entry.content)
    }

    /// Cached version, without I/O.
    pub fn get_document_version(&self, key: &DocumentKey) -> Option<DocumentVersion> {
        self.cache.version(key)
    }

    pub fn document_state(&self, key: &DocumentKey) -> DocumentState {
        self.cache.state(key)
    }

    pub fn evict(&self, key: &DocumentKey) -> bool {
        self.last_refresh
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        {
            // A lock still held by a running save stays so later work on the
            // key keeps queueing behind it.
            let mut locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner());
            if locks.get(key).is_some_and(|lock| Arc::strong_count(lock) == 1) {
                locks.remove(key);
            }
        }
        self.cache.evict(key)
    }

    #[cfg(test)]
    fn tracked_keys(&self) -> (usize, usize) {
        let locks = self.key_locks.lock().unwrap_or_else(|e| e.into_inner()).len();
        let refreshes = self.last_refresh.lock().unwrap_or_else(|e| e.into_inner()).len();
        (locks, refreshes)
    }
}
