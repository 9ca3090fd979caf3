use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tower::ServiceExt;

use pricesync_api::engine::{EventHandler, SyncCommand};
use pricesync_api::router::build_router;
use pricesync_api::routes::webhook::SIGNATURE_HEADER;
use pricesync_api::state::AppState;
use pricesync_core::signing::compute_signature;

pub const SECRET: &str = "test-webhook-secret";

/// Handler that forwards every command to a channel.
pub struct RecordingHandler {
    tx: mpsc::UnboundedSender<SyncCommand>,
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, command: SyncCommand) {
        let _ = self.tx.send(command);
    }
}

/// Build the full application router with all middleware layers and a
/// recording handler.
///
/// A `secret` of `None` disables signature verification.
pub fn build_test_app(secret: Option<&str>) -> (Router, mpsc::UnboundedReceiver<SyncCommand>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let state = AppState::new(
        secret.map(str::to_string),
        "EUR",
        Arc::new(RecordingHandler { tx }),
    );
    (build_router(state, Duration::from_secs(30)), rx)
}

/// Wait briefly for the next dispatched command.
#[allow(dead_code)]
pub async fn next_command(rx: &mut mpsc::UnboundedReceiver<SyncCommand>) -> Option<SyncCommand> {
    tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .ok()
        .flatten()
}

/// Assert that nothing was dispatched.
#[allow(dead_code)]
pub async fn assert_no_command(rx: &mut mpsc::UnboundedReceiver<SyncCommand>) {
    let received = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
    assert!(
        !matches!(received, Ok(Some(_))),
        "expected no dispatched command, got {received:?}"
    );
}

/// Send a GET request.
pub async fn get(app: Router, uri: &str) -> Response {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

/// POST a raw body with an optional signature header.
#[allow(dead_code)]
pub async fn post_raw(app: Router, uri: &str, body: &str, signature: Option<&str>) -> Response {
    let mut builder = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(signature) = signature {
        builder = builder.header(SIGNATURE_HEADER, signature);
    }
    app.oneshot(builder.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap()
}

/// POST a body signed with [`SECRET`].
#[allow(dead_code)]
pub async fn post_signed(app: Router, uri: &str, body: &str) -> Response {
    let signature = compute_signature(SECRET, body.as_bytes());
    post_raw(app, uri, body, Some(&signature)).await
}

/// Read the response body as JSON.
pub async fn body_json(response: Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
