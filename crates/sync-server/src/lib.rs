//! Authoritative version store for panel documents, served over HTTP.
//!
//! Provides:
//! - `POST /documents` (`201 { version }` or `409 { error, latestVersion }`)
//! - `GET /documents/{noteId}/{panelId}` (`200 { content, version }` or `404`)
//! - `GET /health`

pub mod config;
pub mod routes;
pub mod storage;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::storage::DocumentStore;

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    pub store: DocumentStore,
}

/// Build the router with all routes and layers
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/documents", post(routes::save))
        .route("/documents/{note_id}/{panel_id}", get(routes::load))
        .route("/health", get(routes::health))
        .layer(DefaultBodyLimit::max(state.config.max_document_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
