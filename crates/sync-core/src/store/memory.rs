//! In-memory version store for testing.

use super::{decide_save, DocumentVersion, Result, SaveDecision, StoreError, StoredDocument, VersionStore};
use crate::content::CanonicalTree;
use crate::key::DocumentKey;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;
use std::time::Duration;

/// In-memory version store shared by simulated clients.
///
/// Counts calls and can be told to fail the next load or save with a network
/// error, so tests can drive every branch of the sync path.
#[derive(Default)]
pub struct MemoryVersionStore {
    documents: RwLock<HashMap<DocumentKey, StoredDocument>>,
    load_calls: AtomicUsize,
    save_calls: AtomicUsize,
    fail_next_load: AtomicBool,
    fail_next_save: AtomicBool,
    load_delay: Option<Duration>,
}

impl MemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every load (use with a paused tokio clock to hold loads in flight).
    pub fn with_load_delay(mut self, delay: Duration) -> Self {
        self.load_delay = Some(delay);
        self
    }

    /// Seed a document directly, bypassing version checks.
    pub fn insert(&self, key: &DocumentKey, content: CanonicalTree, version: DocumentVersion) {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        documents.insert(key.clone(), StoredDocument { content, version });
    }

    /// Current stored state, without counting as a load.
    pub fn peek(&self, key: &DocumentKey) -> Option<StoredDocument> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents.get(key).cloned()
    }

    pub fn load_calls(&self) -> usize {
        self.load_calls.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_load(&self) {
        self.fail_next_load.store(true, Ordering::SeqCst);
    }

    pub fn fail_next_save(&self) {
        self.fail_next_save.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl VersionStore for MemoryVersionStore {
    async fn load(&self, key: &DocumentKey) -> Result<StoredDocument> {
        self.load_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.load_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_next_load.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Network("simulated load failure".into()));
        }
        self.peek(key).ok_or_else(|| StoreError::NotFound(key.clone()))
    }

    async fn save(
        &self,
        key: &DocumentKey,
        content: &CanonicalTree,
        base_version: DocumentVersion,
    ) -> Result<DocumentVersion> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_next_save.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Network("simulated save failure".into()));
        }

        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        let decision = decide_save(documents.get(key), content, base_version)?;
        let version = decision.version();
        if let SaveDecision::Write(doc) = decision {
            documents.insert(key.clone(), doc);
        }
        Ok(version)
    }
}
