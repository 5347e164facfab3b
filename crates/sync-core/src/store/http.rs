//! HTTP client for the `sync-server` version store.

use super::{DocumentVersion, Result, StoreError, StoredDocument, VersionStore};
use crate::content::{canonicalize, CanonicalTree, Content};
use crate::key::DocumentKey;
use crate::protocol::{ConflictResponse, LoadResponse, SaveRequest, SaveResponse};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

/// Version store reached over HTTP.
pub struct HttpVersionStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVersionStore {
    /// Create a client for the server at `base_url` (e.g. `http://127.0.0.1:3030`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    fn document_url(&self, key: &DocumentKey) -> String {
        format!(
            "{}/documents/{}/{}",
            self.base_url,
            urlencoding::encode(key.note_id()),
            urlencoding::encode(key.panel_id())
        )
    }
}

fn network(e: reqwest::Error) -> StoreError {
    StoreError::Network(e.to_string())
}

fn invalid(e: impl std::fmt::Display) -> StoreError {
    StoreError::InvalidResponse(e.to_string())
}

#[async_trait]
impl VersionStore for HttpVersionStore {
    async fn load(&self, key: &DocumentKey) -> Result<StoredDocument> {
        let url = self.document_url(key);
        debug!("GET {}", url);
        let response = self.client.get(&url).send().await.map_err(network)?;

        match response.status() {
            StatusCode::OK => {
                let body: LoadResponse = response.json().await.map_err(invalid)?;
                let content = canonicalize(&body.content).map_err(invalid)?;
                Ok(StoredDocument {
                    content,
                    version: body.version,
                })
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(key.clone())),
            status => Err(StoreError::Network(format!("unexpected status {status} loading {key}"))),
        }
    }

    async fn save(
        &self,
        key: &DocumentKey,
        content: &CanonicalTree,
        base_version: DocumentVersion,
    ) -> Result<DocumentVersion> {
        let request = SaveRequest {
            note_id: key.note_id().to_string(),
            panel_id: key.panel_id().to_string(),
            content: Content::Tree(content.clone()),
            base_version,
        };
        let url = format!("{}/documents", self.base_url);
        debug!("POST {} for {} (base {})", url, key, base_version);
        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(network)?;

        match response.status() {
            StatusCode::CREATED | StatusCode::OK => {
                let body: SaveResponse = response.json().await.map_err(invalid)?;
                Ok(body.version)
            }
            StatusCode::CONFLICT => {
                let body: ConflictResponse = response.json().await.map_err(invalid)?;
                Err(StoreError::StaleWrite {
                    base_version,
                    latest_version: body.latest_version,
                })
            }
            status => Err(StoreError::Network(format!("unexpected status {status} saving {key}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_url_encodes_key_parts() {
        let store = HttpVersionStore::new("http://localhost:3030/");
        let key = DocumentKey::new("note 1", "branch/2");
        assert_eq!(
            store.document_url(&key),
            "http://localhost:3030/documents/note%201/branch%2F2"
        );
    }
}
