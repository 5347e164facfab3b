//! Local durability backstop.
//!
//! A synchronous write-through of the edit surface taken before every save
//! attempt, consulted only to recover edits after an ungraceful shutdown.
//! It is never treated as fresher than the version store.

use crate::content::CanonicalTree;
use crate::events::now_ms;
use crate::key::DocumentKey;
use crate::store::DocumentVersion;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum BackstopError {
    #[error("backstop I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("corrupt backstop record at {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, BackstopError>;

/// Persisted shape of one backstop entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackstopRecord {
    pub content: CanonicalTree,
    /// Milliseconds since Unix epoch.
    pub timestamp: u64,
    pub note_id: String,
    pub panel_id: String,
    /// Version the edit was based on.
    pub version: DocumentVersion,
}

impl BackstopRecord {
    pub fn new(key: &DocumentKey, content: CanonicalTree, version: DocumentVersion) -> Self {
        Self {
            content,
            timestamp: now_ms() as u64,
            note_id: key.note_id().to_string(),
            panel_id: key.panel_id().to_string(),
            version,
        }
    }

    pub fn key(&self) -> DocumentKey {
        DocumentKey::new(&self.note_id, &self.panel_id)
    }
}

/// Synchronous local persistence keyed by `noteId:panelId`.
pub trait DurabilityBackstop: Send + Sync {
    fn write(&self, record: &BackstopRecord) -> Result<()>;
    fn read(&self, key: &DocumentKey) -> Result<Option<BackstopRecord>>;
    fn remove(&self, key: &DocumentKey) -> Result<()>;
}

/// Backstop held in memory, for tests and hosts without local storage.
#[derive(Debug, Default)]
pub struct MemoryBackstop {
    records: RwLock<HashMap<String, BackstopRecord>>,
}

impl MemoryBackstop {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DurabilityBackstop for MemoryBackstop {
    fn write(&self, record: &BackstopRecord) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.insert(record.key().storage_key(), record.clone());
        Ok(())
    }

    fn read(&self, key: &DocumentKey) -> Result<Option<BackstopRecord>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.get(&key.storage_key()).cloned())
    }

    fn remove(&self, key: &DocumentKey) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.remove(&key.storage_key());
        Ok(())
    }
}

/// One JSON file per key in a directory.
///
/// File names are the hex encoding of the storage key, so any note or panel
/// id maps to a safe name.
pub struct FileBackstop {
    dir: PathBuf,
}

impl FileBackstop {
    /// Use `dir`, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| BackstopError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &DocumentKey) -> PathBuf {
        self.dir
            .join(format!("{}.json", hex::encode(key.storage_key())))
    }

    fn random_hex() -> String {
        let bytes: [u8; 8] = rand::rng().random();
        hex::encode(bytes)
    }

    /// Write to a temp file then rename over the target.
    fn atomic_write(path: &Path, bytes: &[u8]) -> io::Result<()> {
        let temp_path = path.with_extension(format!("{}.tmp", Self::random_hex()));

        if let Err(e) = fs::write(&temp_path, bytes) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        if let Err(e) = fs::rename(&temp_path, path) {
            let _ = fs::remove_file(&temp_path);
            return Err(e);
        }

        Ok(())
    }
}

impl DurabilityBackstop for FileBackstop {
    fn write(&self, record: &BackstopRecord) -> Result<()> {
        let path = self.record_path(&record.key());
        let bytes = serde_json::to_vec(record).map_err(|source| BackstopError::Corrupt {
            path: path.clone(),
            source,
        })?;
        Self::atomic_write(&path, &bytes).map_err(|source| BackstopError::Io {
            path: path.clone(),
            source,
        })?;
        debug!("Backstop wrote {} (version {})", record.key(), record.version);
        Ok(())
    }

    fn read(&self, key: &DocumentKey) -> Result<Option<BackstopRecord>> {
        let path = self.record_path(key);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(BackstopError::Io { path, source }),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| BackstopError::Corrupt { path, source })
    }

    fn remove(&self, key: &DocumentKey) -> Result<()> {
        let path = self.record_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(BackstopError::Io { path, source }),
        }
    }
}
