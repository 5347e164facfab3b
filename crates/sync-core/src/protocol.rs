//! HTTP wire format shared by the version store server and its client.
//!
//! - `POST /documents` with [`SaveRequest`] → `201` [`SaveResponse`] or
//!   `409` [`ConflictResponse`]
//! - `GET /documents/{noteId}/{panelId}` → `200` [`LoadResponse`] or `404`

use crate::content::Content;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveRequest {
    pub note_id: String,
    pub panel_id: String,
    pub content: Content,
    pub base_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveResponse {
    pub version: u64,
}

/// Body of a `409`. `latest_version` lets the client take the conflict path
/// without another read.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictResponse {
    pub error: String,
    pub latest_version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadResponse {
    pub content: Content,
    pub version: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::CanonicalTree;

    #[test]
    fn test_save_request_field_names() {
        let req = SaveRequest {
            note_id: "n".into(),
            panel_id: "p".into(),
            content: Content::Tree(CanonicalTree::empty()),
            base_version: 3,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["noteId"], "n");
        assert_eq!(json["panelId"], "p");
        assert_eq!(json["baseVersion"], 3);
        assert_eq!(json["content"]["kind"], "tree");
    }

    #[test]
    fn test_conflict_response_field_names() {
        let json = r#"{"error":"stale document save: baseVersion 1 behind latest 2","latestVersion":2}"#;
        let conflict: ConflictResponse = serde_json::from_str(json).unwrap();
        assert_eq!(conflict.latest_version, 2);
    }
}
