//! Version store contract.
//!
//! The version store is the only shared mutable resource: every client process
//! keeps its own cache and reaches other clients' writes only through
//! [`VersionStore::load`] and [`VersionStore::save`].
//!
//! Implementations:
//! - `MemoryVersionStore` - For testing (call counters, fault injection)
//! - `HttpVersionStore` - Talks to `sync-server` over HTTP

mod http;
mod memory;

pub use http::HttpVersionStore;
pub use memory::MemoryVersionStore;

use crate::content::CanonicalTree;
use crate::key::DocumentKey;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Strictly increasing per key; 0 means "never saved".
pub type DocumentVersion = u64;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("no document stored for {0}")]
    NotFound(DocumentKey),

    #[error("stale document save: baseVersion {base_version} behind latest {latest_version}")]
    StaleWrite {
        base_version: DocumentVersion,
        latest_version: DocumentVersion,
    },

    #[error("network failure: {0}")]
    Network(String),

    #[error("invalid response from version store: {0}")]
    InvalidResponse(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// A document as held by the version store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub content: CanonicalTree,
    pub version: DocumentVersion,
}

impl StoredDocument {
    /// What a key that was never saved looks like.
    pub fn empty() -> Self {
        Self {
            content: CanonicalTree::empty(),
            version: 0,
        }
    }
}

/// Authoritative document storage with optimistic concurrency.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Load the current content and version, or `StoreError::NotFound`.
    async fn load(&self, key: &DocumentKey) -> Result<StoredDocument>;

    /// Save `content` if `base_version` is the current version.
    ///
    /// Returns the version now stored, or `StoreError::StaleWrite` carrying the
    /// store's true latest version.
    async fn save(
        &self,
        key: &DocumentKey,
        content: &CanonicalTree,
        base_version: DocumentVersion,
    ) -> Result<DocumentVersion>;
}

/// Outcome of checking a save against the currently stored document.
#[derive(Debug, Clone, PartialEq)]
pub enum SaveDecision {
    /// Content is byte-identical to what is stored; nothing to write.
    Unchanged(DocumentVersion),
    /// Store this document.
    Write(StoredDocument),
}

impl SaveDecision {
    pub fn version(&self) -> DocumentVersion {
        match self {
            SaveDecision::Unchanged(version) => *version,
            SaveDecision::Write(doc) => doc.version,
        }
    }
}

/// Apply the optimistic concurrency rules shared by every store:
/// accept iff `base_version` equals the current version (0 when nothing is
/// stored), and bump the version only when the content actually changes.
pub fn decide_save(
    current: Option<&StoredDocument>,
    content: &CanonicalTree,
    base_version: DocumentVersion,
) -> Result<SaveDecision> {
    let latest_version = current.map_or(0, |doc| doc.version);
    if base_version != latest_version {
        return Err(StoreError::StaleWrite {
            base_version,
            latest_version,
        });
    }

    match current {
        Some(doc) if doc.content.to_bytes() == content.to_bytes() => {
            Ok(SaveDecision::Unchanged(doc.version))
        }
        _ => Ok(SaveDecision::Write(StoredDocument {
            content: content.clone(),
            version: latest_version + 1,
        })),
    }
}
