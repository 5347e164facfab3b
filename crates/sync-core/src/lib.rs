//! sync-core: offline-first document sync for note panels.
//!
//! This crate provides:
//! - Content canonicalization (markup or tree in, one comparable tree out)
//! - The version store contract, with in-memory and HTTP implementations
//! - A per-process document cache with single-flight loads
//! - The sync provider (load, save with conflict detection, remote refresh)
//! - Unsaved-change tracking and the reconciliation controller
//! - A local durability backstop for crash recovery
//! - `SyncEngine` / `PanelSession`, which wire all of it to an edit surface

pub mod backstop;
pub mod cache;
pub mod config;
pub mod content;
pub mod debounce;
pub mod engine;
pub mod error;
pub mod events;
pub mod guard;
pub mod key;
pub mod protocol;
pub mod provider;
pub mod reconcile;
pub mod store;

pub use backstop::{BackstopError, BackstopRecord, DurabilityBackstop, FileBackstop, MemoryBackstop};
pub use cache::{CacheEntry, DocumentCache, DocumentState};
pub use config::SyncConfig;
pub use content::{canonicalize, hash, render_markup, CanonicalTree, Content, ContentError, ContentHash};
pub use engine::{EditSurface, EngineState, PanelSession, SyncEngine};
pub use error::SyncError;
pub use events::{EventBus, RemoteUpdate, Subscription, SyncEvent, UpdateReason};
pub use guard::{LastSavedSnapshot, UnsavedChangeGuard};
pub use key::DocumentKey;
pub use provider::{SaveOutcome, SyncProvider};
pub use reconcile::{PendingRemoteUpdate, SyncNotice};
pub use store::{
    DocumentVersion, HttpVersionStore, MemoryVersionStore, StoreError, StoredDocument, VersionStore,
};
