//! Persistent document storage
//!
//! Documents live in memory behind an `RwLock` and are snapshotted to
//! `<data-dir>/documents.json` after every write that changed something.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sync_core::store::{decide_save, SaveDecision};
use sync_core::{CanonicalTree, DocumentKey, DocumentVersion, StoreError, StoredDocument};
use thiserror::Error;

/// A stored document as persisted on disk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub note_id: String,
    pub panel_id: String,
    pub content: CanonicalTree,
    pub version: DocumentVersion,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct DocumentFile {
    documents: Vec<DocumentRecord>,
}

#[derive(Debug, Error)]
pub enum WriteError {
    /// The save broke the version rules; nothing changed.
    #[error(transparent)]
    Rejected(#[from] StoreError),

    /// The save was valid but could not be written to disk; nothing changed.
    #[error("failed to persist documents: {0:#}")]
    Persist(anyhow::Error),
}

/// Authoritative document storage
pub struct DocumentStore {
    data_dir: PathBuf,
    documents: RwLock<HashMap<DocumentKey, DocumentRecord>>,
}

impl DocumentStore {
    /// Open the store in `data_dir`, loading any persisted documents
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("Failed to create data directory: {:?}", data_dir))?;

        let store = Self {
            data_dir: data_dir.to_path_buf(),
            documents: RwLock::new(HashMap::new()),
        };
        store.load_documents()?;
        Ok(store)
    }

    fn documents_path(&self) -> PathBuf {
        self.data_dir.join("documents.json")
    }

    fn load_documents(&self) -> Result<()> {
        let path = self.documents_path();
        if !path.exists() {
            return Ok(());
        }
        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {:?}", path))?;
        let file: DocumentFile =
            serde_json::from_str(&content).with_context(|| format!("Failed to parse {:?}", path))?;

        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        for record in file.documents {
            let key = DocumentKey::new(&record.note_id, &record.panel_id);
            documents.insert(key, record);
        }
        tracing::info!("Loaded {} documents", documents.len());
        Ok(())
    }

    fn save_documents(&self, documents: &HashMap<DocumentKey, DocumentRecord>) -> Result<()> {
        let mut records: Vec<_> = documents.values().cloned().collect();
        records.sort_by(|a, b| (&a.note_id, &a.panel_id).cmp(&(&b.note_id, &b.panel_id)));
        let content = serde_json::to_string_pretty(&DocumentFile { documents: records })?;

        let path = self.documents_path();
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, content)
            .with_context(|| format!("Failed to write {:?}", temp_path))?;
        std::fs::rename(&temp_path, &path)
            .with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    }

    /// Current content and version, if the key was ever saved
    pub fn load(&self, key: &DocumentKey) -> Option<StoredDocument> {
        let documents = self.documents.read().unwrap_or_else(|e| e.into_inner());
        documents.get(key).map(|record| StoredDocument {
            content: record.content.clone(),
            version: record.version,
        })
    }

    /// Save under optimistic concurrency; returns the version now stored
    pub fn save(
        &self,
        key: &DocumentKey,
        content: &CanonicalTree,
        base_version: DocumentVersion,
    ) -> std::result::Result<DocumentVersion, WriteError> {
        let mut documents = self.documents.write().unwrap_or_else(|e| e.into_inner());
        let current = documents.get(key).map(|record| StoredDocument {
            content: record.content.clone(),
            version: record.version,
        });

        let doc = match decide_save(current.as_ref(), content, base_version)? {
            SaveDecision::Unchanged(version) => return Ok(version),
            SaveDecision::Write(doc) => doc,
        };

        let record = DocumentRecord {
            note_id: key.note_id().to_string(),
            panel_id: key.panel_id().to_string(),
            content: doc.content,
            version: doc.version,
            updated_at: Utc::now(),
        };
        let previous = documents.insert(key.clone(), record);

        if let Err(e) = self.save_documents(&documents) {
            match previous {
                Some(previous) => documents.insert(key.clone(), previous),
                None => documents.remove(key),
            };
            return Err(WriteError::Persist(e));
        }
        Ok(doc.version)
    }

    pub fn len(&self) -> usize {
        self.documents.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
