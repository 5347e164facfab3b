//! SyncEngine: the explicit context object a host constructs once and hands to
//! whatever owns an edit surface.
//!
//! `SyncEngine` owns the provider (cache + version store), the durability
//! backstop and the configuration. Each open panel gets a `PanelSession`
//! that wires one edit surface to the engine:
//!
//! 1. `open_panel` loads the document, fills the surface and recovers any
//!    backstop record left by an ungraceful shutdown
//! 2. `on_surface_changed` writes the backstop and (re)schedules autosave
//! 3. `save` / `flush_autosave` save through the provider; a stale save comes
//!    back as a conflict `RemoteUpdate`
//! 4. `process_events` feeds remote updates through the reconciliation
//!    controller, which applies them or holds them behind a notice
//! 5. `save_and_sync` / `discard_and_sync` / `dismiss` resolve the notice

use crate::backstop::{BackstopRecord, DurabilityBackstop, FileBackstop, MemoryBackstop};
use crate::config::SyncConfig;
use crate::content::{canonicalize, CanonicalTree, Content};
use crate::debounce::Debounce;
use crate::error::{Result, SyncError};
use crate::events::{RemoteUpdate, Subscription, SyncEvent, UpdateReason};
use crate::guard::UnsavedChangeGuard;
use crate::key::DocumentKey;
use crate::provider::{SaveOutcome, SyncProvider};
use crate::reconcile::{ControllerEvent, Effect, PendingRemoteUpdate, Reconciler, SyncNotice};
use crate::store::{DocumentVersion, HttpVersionStore, VersionStore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// The rich-text editor a panel session drives.
pub trait EditSurface: Send {
    /// Current content, usually markup.
    fn content(&self) -> Content;

    /// Replace the content programmatically.
    fn set_content(&mut self, content: &CanonicalTree);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Ready,
    Disposed,
}

pub struct SyncEngine {
    provider: Arc<SyncProvider<dyn VersionStore>>,
    backstop: Arc<dyn DurabilityBackstop>,
    config: SyncConfig,
    subscriptions: Mutex<HashMap<u64, Subscription>>,
    next_session: AtomicU64,
    disposed: AtomicBool,
}

impl SyncEngine {
    pub fn new(
        store: Arc<dyn VersionStore>,
        backstop: Arc<dyn DurabilityBackstop>,
        config: SyncConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            provider: Arc::new(SyncProvider::new(store)),
            backstop,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            next_session: AtomicU64::new(0),
            disposed: AtomicBool::new(false),
        })
    }

    /// Build an engine against the HTTP sync server named in `config`.
    pub fn connect(config: SyncConfig) -> Result<Arc<Self>> {
        let store = Arc::new(HttpVersionStore::new(config.store_url.clone()));
        let backstop: Arc<dyn DurabilityBackstop> = match &config.backstop_dir {
            Some(dir) => Arc::new(FileBackstop::new(dir)?),
            None => Arc::new(MemoryBackstop::new()),
        };
        info!("Sync engine using store at {}", config.store_url);
        Ok(Self::new(store, backstop, config))
    }

    pub fn provider(&self) -> &Arc<SyncProvider<dyn VersionStore>> {
        &self.provider
    }

    pub fn backstop(&self) -> &Arc<dyn DurabilityBackstop> {
        &self.backstop
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        if self.disposed.load(Ordering::SeqCst) {
            EngineState::Disposed
        } else {
            EngineState::Ready
        }
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.state() {
            EngineState::Ready => Ok(()),
            EngineState::Disposed => Err(SyncError::Disposed),
        }
    }

    /// Stop delivering events to every session and refuse further work.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }
        let subscriptions: Vec<_> = self
            .subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain()
            .collect();
        info!("Sync engine disposed ({} sessions)", subscriptions.len());
    }

    fn release_session(&self, id: u64) {
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&id);
    }

    /// Load `key` into `surface` and start tracking it.
    pub async fn open_panel<E: EditSurface>(
        self: &Arc<Self>,
        key: DocumentKey,
        surface: E,
    ) -> Result<PanelSession<E>> {
        self.ensure_ready()?;

        let (tx, rx) = mpsc::unbounded_channel();
        let filter_key = key.clone();
        let subscription = self.provider.subscribe(move |event| {
            if let SyncEvent::RemoteUpdate(update) = event {
                if update.key == filter_key {
                    let _ = tx.send(update);
                }
            }
        });
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        self.subscriptions
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(id, subscription);

        let mut session = PanelSession {
            id,
            key,
            engine: Arc::clone(self),
            surface,
            guard: UnsavedChangeGuard::new(),
            reconciler: Reconciler::new(),
            autosave: Debounce::new(self.config.autosave_quiet_period()),
            updates: rx,
        };

        let entry = self.provider.load_document(&session.key).await?;
        session.show(&entry.content);
        session.guard.record_saved(entry.content, entry.version);
        session.recover_backstop(entry.version);
        debug!("Opened panel {} at version {}", session.key, entry.version);
        Ok(session)
    }
}

/// One edit surface bound to one document.
pub struct PanelSession<E: EditSurface> {
    id: u64,
    key: DocumentKey,
    engine: Arc<SyncEngine>,
    surface: E,
    guard: UnsavedChangeGuard,
    reconciler: Reconciler,
    autosave: Debounce,
    updates: mpsc::UnboundedReceiver<RemoteUpdate>,
}

impl<E: EditSurface> PanelSession<E> {
    pub fn key(&self) -> &DocumentKey {
        &self.key
    }

    pub fn surface(&self) -> &E {
        &self.surface
    }

    /// Direct access for the host. Call [`on_surface_changed`](Self::on_surface_changed)
    /// after user edits.
    pub fn surface_mut(&mut self) -> &mut E {
        &mut self.surface
    }

    pub fn notice(&self) -> &SyncNotice {
        self.reconciler.notice()
    }

    pub fn pending(&self) -> Option<&PendingRemoteUpdate> {
        self.reconciler.pending()
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.guard.has_unsaved_changes(&self.surface.content())
    }

    /// Version of the last saved or loaded content.
    pub fn saved_version(&self) -> DocumentVersion {
        self.guard.snapshot().map_or(0, |snapshot| snapshot.version)
    }

    pub fn saved_content(&self) -> Option<&CanonicalTree> {
        self.guard.snapshot().map(|snapshot| &snapshot.content)
    }

    pub fn autosave_deadline(&self) -> Option<Instant> {
        self.autosave.deadline()
    }

    /// The edit surface reported a change.
    ///
    /// Content equal to the last saved snapshot is ignored, which also covers
    /// the surface echoing back a programmatic apply.
    pub fn on_surface_changed(&mut self) {
        let content = self.surface.content();
        if !self.guard.has_unsaved_changes(&content) {
            return;
        }
        match canonicalize(&content) {
            Ok(tree) => self.write_backstop(tree),
            Err(e) => warn!("Not backing up {}: {}", self.key, e),
        }
        self.autosave.schedule();
    }

    /// Save the edit surface now.
    pub async fn save(&mut self) -> Result<SaveOutcome> {
        self.engine.ensure_ready()?;
        self.autosave.cancel();

        let content = canonicalize(&self.surface.content())?;
        self.write_backstop(content.clone());

        let outcome = self
            .engine
            .provider
            .save_document(&self.key, &content)
            .await?;
        match &outcome {
            SaveOutcome::Saved { version } => {
                self.record_saved(content, *version);
                self.handle(ControllerEvent::Saved { version: *version });
            }
            SaveOutcome::Conflict { latest_version, .. } => {
                info!("Save of {} conflicted with version {}", self.key, latest_version);
            }
        }
        self.process_events();
        Ok(outcome)
    }

    /// Save if the autosave quiet period has elapsed.
    pub async fn flush_autosave(&mut self) -> Result<Option<SaveOutcome>> {
        if !self.autosave.take_due() {
            return Ok(None);
        }
        self.save().await.map(Some)
    }

    /// Wait for the autosave deadline (if any) and save.
    pub async fn run_autosave(&mut self) -> Result<Option<SaveOutcome>> {
        self.autosave.wait().await;
        self.flush_autosave().await
    }

    /// Feed queued remote updates through the controller. Returns how many.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(update) = self.updates.try_recv() {
            self.handle(ControllerEvent::Remote(update));
            handled += 1;
        }
        handled
    }

    /// Save the user's edit as the new baseline, then re-fetch.
    ///
    /// On a network failure the notice switches to `SaveFailed`; the edit and
    /// the pending update are left untouched.
    pub async fn save_and_sync(&mut self) -> Result<()> {
        self.engine.ensure_ready()?;
        self.handle(ControllerEvent::SaveAndSyncRequested);

        let content = match canonicalize(&self.surface.content()) {
            Ok(content) => content,
            Err(e) => {
                self.handle(ControllerEvent::SaveFailed {
                    message: e.to_string(),
                });
                return Err(e.into());
            }
        };
        self.write_backstop(content.clone());

        match self.engine.provider.save_document(&self.key, &content).await {
            Ok(SaveOutcome::Saved { version }) => {
                self.record_saved(content, version);
                self.handle(ControllerEvent::SaveAndSyncSaved { version });
                self.engine
                    .provider
                    .refresh_document_from_remote(&self.key, UpdateReason::Manual)
                    .await?;
                self.process_events();
                Ok(())
            }
            Ok(SaveOutcome::Conflict { latest_version, .. }) => {
                info!(
                    "Save & Sync of {} conflicted with version {}",
                    self.key, latest_version
                );
                self.process_events();
                Ok(())
            }
            Err(e) => {
                warn!("Save & Sync of {} failed: {}", self.key, e);
                self.handle(ControllerEvent::SaveFailed {
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Throw away local edits and show the remote content.
    ///
    /// Without a pending update the document is refreshed first.
    pub async fn discard_and_sync(&mut self) -> Result<()> {
        self.engine.ensure_ready()?;
        if self.reconciler.pending().is_none() {
            self.engine
                .provider
                .refresh_document_from_remote(&self.key, UpdateReason::Manual)
                .await?;
            self.process_events();
        }
        self.handle(ControllerEvent::DiscardRequested);
        Ok(())
    }

    /// Hide the notice. The pending update is kept.
    pub fn dismiss(&mut self) {
        self.handle(ControllerEvent::Dismissed);
    }

    /// Refresh when the panel comes back to the foreground.
    ///
    /// Throttled per key; returns whether a refresh ran.
    pub async fn on_visibility_change(&mut self, visible: bool) -> Result<bool> {
        if !visible {
            return Ok(false);
        }
        self.engine.ensure_ready()?;
        let interval = self.engine.config.visibility_refresh_interval();
        let refreshed = self
            .engine
            .provider
            .refresh_if_idle(&self.key, UpdateReason::Manual, interval)
            .await?;
        self.process_events();
        Ok(refreshed.is_some())
    }

    fn handle(&mut self, event: ControllerEvent) {
        let unsaved = self.has_unsaved_changes();
        for effect in self.reconciler.handle(event, unsaved) {
            match effect {
                Effect::Apply { content, version } => self.apply(content, version),
                Effect::CancelAutosave => self.autosave.cancel(),
            }
        }
    }

    /// Put store content on the surface and record it as saved.
    fn apply(&mut self, content: CanonicalTree, version: DocumentVersion) {
        self.show(&content);
        self.record_saved(content, version);
        self.autosave.cancel();
    }

    /// Set the surface unless it already shows `content`.
    fn show(&mut self, content: &CanonicalTree) {
        let unchanged = canonicalize(&self.surface.content())
            .is_ok_and(|current| current.to_bytes() == content.to_bytes());
        if !unchanged {
            self.surface.set_content(content);
        }
    }

    fn record_saved(&mut self, content: CanonicalTree, version: DocumentVersion) {
        self.guard.record_saved(content, version);
        self.remove_backstop();
    }

    fn recover_backstop(&mut self, loaded_version: DocumentVersion) {
        let record = match self.engine.backstop.read(&self.key) {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                warn!("Ignoring unreadable backstop for {}: {}", self.key, e);
                return;
            }
        };

        let Some(loaded) = self.saved_content().cloned() else {
            return;
        };
        if loaded.to_bytes() == record.content.to_bytes() {
            self.remove_backstop();
            return;
        }

        info!("Restoring unsaved edit for {} from backstop", self.key);
        self.surface.set_content(&record.content);
        if record.version < loaded_version {
            // The store moved on since the draft was taken: hold the store
            // content behind a notice instead of saving over it.
            info!(
                "Backstop for {} is based on version {} but the store has {}",
                self.key, record.version, loaded_version
            );
            self.handle(ControllerEvent::Remote(RemoteUpdate {
                key: self.key.clone(),
                version: loaded_version,
                content: Content::Tree(loaded),
                reason: UpdateReason::RemoteUpdate,
            }));
        } else {
            self.autosave.schedule();
        }
    }

    fn write_backstop(&self, content: CanonicalTree) {
        let record = BackstopRecord::new(&self.key, content, self.saved_version());
        if let Err(e) = self.engine.backstop.write(&record) {
            warn!("Backstop write failed for {}: {}", self.key, e);
        }
    }

    fn remove_backstop(&self) {
        if let Err(e) = self.engine.backstop.remove(&self.key) {
            warn!("Backstop remove failed for {}: {}", self.key, e);
        }
    }
}

impl<E: EditSurface> Drop for PanelSession<E> {
    fn drop(&mut self) {
        self.engine.release_session(self.id);
    }
}
