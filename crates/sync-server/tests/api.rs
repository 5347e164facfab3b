//! Request-level tests for the version store routes.

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use sync_server::config::ServerConfig;
use sync_server::storage::DocumentStore;
use sync_server::{router, AppState};
use tempfile::TempDir;
use tower::ServiceExt;

fn test_app() -> (TempDir, Router) {
    let temp_dir = TempDir::new().unwrap();
    let store = DocumentStore::open(temp_dir.path()).unwrap();
    let state = Arc::new(AppState {
        config: ServerConfig::default(),
        store,
    });
    (temp_dir, router(state))
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, body)
}

fn post_save(note_id: &str, panel_id: &str, markup: &str, base_version: u64) -> Request<Body> {
    let body = json!({
        "noteId": note_id,
        "panelId": panel_id,
        "content": { "kind": "markup", "value": markup },
        "baseVersion": base_version,
    });
    Request::builder()
        .method("POST")
        .uri("/documents")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn get_load(note_id: &str, panel_id: &str) -> Request<Body> {
    Request::builder()
        .uri(format!("/documents/{}/{}", note_id, panel_id))
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_first_save_returns_version_one() {
    let (_temp_dir, app) = test_app();
    let (status, body) = send(&app, post_save("n", "main", "<p>hello</p>", 0)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"], 1);
}

#[tokio::test]
async fn test_load_returns_saved_tree() {
    let (_temp_dir, app) = test_app();
    send(&app, post_save("n", "main", "<p>hello</p>", 0)).await;

    let (status, body) = send(&app, get_load("n", "main")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["version"], 1);
    assert_eq!(body["content"]["kind"], "tree");
}

#[tokio::test]
async fn test_load_missing_is_404() {
    let (_temp_dir, app) = test_app();
    let (status, body) = send(&app, get_load("n", "nothing")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_stale_save_is_409_with_latest_version() {
    let (_temp_dir, app) = test_app();
    send(&app, post_save("n", "main", "<p>one</p>", 0)).await;
    send(&app, post_save("n", "main", "<p>two</p>", 1)).await;

    let (status, body) = send(&app, post_save("n", "main", "<p>late</p>", 1)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["latestVersion"], 2);
    assert!(body["error"].as_str().unwrap().contains("stale"));

    let (_, loaded) = send(&app, get_load("n", "main")).await;
    assert_eq!(loaded["version"], 2);
}

#[tokio::test]
async fn test_identical_save_keeps_version() {
    let (_temp_dir, app) = test_app();
    send(&app, post_save("n", "main", "<p>same</p>", 0)).await;

    let (status, body) = send(&app, post_save("n", "main", "same", 1)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"], 1);
}

#[tokio::test]
async fn test_missing_ids_are_rejected() {
    let (_temp_dir, app) = test_app();
    let (status, body) = send(&app, post_save("", "main", "<p>x</p>", 0)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_malformed_body_is_rejected() {
    let (_temp_dir, app) = test_app();
    let request = Request::builder()
        .method("POST")
        .uri("/documents")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"noteId":"n"}"#))
        .unwrap();
    let (status, _) = send(&app, request).await;
    assert!(status.is_client_error());
}

#[tokio::test]
async fn test_tree_outside_schema_is_rejected() {
    let (_temp_dir, app) = test_app();
    let body = json!({
        "noteId": "n",
        "panelId": "main",
        "content": { "kind": "tree", "value": {
            "type": "doc",
            "content": [{ "type": "widget", "content": [{ "type": "text", "text": "x" }] }]
        }},
        "baseVersion": 0,
    });
    let request = Request::builder()
        .method("POST")
        .uri("/documents")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("widget"));

    let (status, _) = send(&app, get_load("n", "main")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_panels_are_versioned_independently() {
    let (_temp_dir, app) = test_app();
    send(&app, post_save("n", "main", "<p>a</p>", 0)).await;
    send(&app, post_save("n", "main", "<p>b</p>", 1)).await;

    let (status, body) = send(&app, post_save("n", "branch", "<p>c</p>", 0)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["version"], 1);
}

#[tokio::test]
async fn test_health() {
    let (_temp_dir, app) = test_app();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, Value::String("ok".into()));
}
