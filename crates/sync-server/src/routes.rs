//! HTTP handlers for the version store
//!
//! - `POST /documents` saves under optimistic concurrency
//! - `GET /documents/{noteId}/{panelId}` loads
//! - `GET /health` for liveness checks

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use sync_core::protocol::{ConflictResponse, ErrorResponse, LoadResponse, SaveRequest, SaveResponse};
use sync_core::{canonicalize, Content, DocumentKey, StoreError};

use crate::storage::WriteError;
use crate::AppState;

fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
        .into_response()
}

/// Handler for `POST /documents`
pub async fn save(State(state): State<Arc<AppState>>, Json(request): Json<SaveRequest>) -> Response {
    if request.note_id.is_empty() || request.panel_id.is_empty() {
        return error(StatusCode::BAD_REQUEST, "noteId and panelId are required");
    }
    let key = DocumentKey::new(request.note_id, request.panel_id);

    let content = match canonicalize(&request.content) {
        Ok(content) => content,
        Err(e) => {
            tracing::warn!("Rejecting save of {}: {}", key, e);
            return error(StatusCode::BAD_REQUEST, format!("invalid content: {}", e));
        }
    };

    match state.store.save(&key, &content, request.base_version) {
        Ok(version) => {
            tracing::debug!("Saved {} at version {}", key, version);
            (StatusCode::CREATED, Json(SaveResponse { version })).into_response()
        }
        Err(WriteError::Rejected(StoreError::StaleWrite {
            base_version,
            latest_version,
        })) => {
            let e = StoreError::StaleWrite {
                base_version,
                latest_version,
            };
            tracing::info!("Conflict on {}: {}", key, e);
            (
                StatusCode::CONFLICT,
                Json(ConflictResponse {
                    error: e.to_string(),
                    latest_version,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Save of {} failed: {}", key, e);
            error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Handler for `GET /documents/{note_id}/{panel_id}`
pub async fn load(
    State(state): State<Arc<AppState>>,
    Path((note_id, panel_id)): Path<(String, String)>,
) -> Response {
    let key = DocumentKey::new(note_id, panel_id);
    match state.store.load(&key) {
        Some(doc) => Json(LoadResponse {
            content: Content::Tree(doc.content),
            version: doc.version,
        })
        .into_response(),
        None => error(StatusCode::NOT_FOUND, format!("no document stored for {}", key)),
    }
}

/// Handler for `GET /health`
pub async fn health() -> &'static str {
    "ok"
}
