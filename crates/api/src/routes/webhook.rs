//! Signed inbound event endpoints.
//!
//! Both endpoints verify the HMAC signature over the raw body before
//! parsing, acknowledge with `200 {"status":"accepted"}`, and only then
//! run the resulting command on a spawned task. The sender delivers at
//! least once and expects the acknowledgement before any downstream work.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};

use pricesync_core::error::CoreError;
use pricesync_core::signing::verify_signature;

use crate::engine::events::{parse_catalog_event, parse_market_event};
use crate::engine::SyncCommand;
use crate::error::AppResult;
use crate::state::AppState;

/// Header carrying `HMAC-SHA256(secret, rawBody)` as hex, optionally
/// prefixed with `sha256=`.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// POST /webhooks/market
async fn market_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    verify(&state, &headers, &body)?;
    let command = parse_market_event(&body, &state.currency).inspect_err(|e| {
        tracing::warn!(error = %e, "Rejected market event");
    })?;
    Ok(accept(&state, command))
}

/// POST /webhooks/catalog
async fn catalog_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Json<Value>> {
    verify(&state, &headers, &body)?;
    let command = parse_catalog_event(&body).inspect_err(|e| {
        tracing::warn!(error = %e, "Rejected catalog event");
    })?;
    Ok(accept(&state, command))
}

fn verify(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<(), CoreError> {
    let Some(secret) = state.webhook_secret.as_deref() else {
        return Ok(());
    };
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Inbound event without signature header");
            CoreError::Unauthorized("missing signature".into())
        })?;
    if !verify_signature(secret, body, signature) {
        tracing::warn!("Inbound event with invalid signature");
        return Err(CoreError::Unauthorized("invalid signature".into()));
    }
    Ok(())
}

/// Hand the command to the handler without waiting for it.
fn accept(state: &AppState, command: Option<SyncCommand>) -> Json<Value> {
    if let Some(command) = command {
        tracing::info!(event = command.kind(), sku = %command.sku(), "Event accepted");
        let handler = state.handler.clone();
        tokio::spawn(async move {
            handler.handle(command).await;
        });
    }
    Json(json!({ "status": "accepted" }))
}

/// Mount the inbound event routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/webhooks/market", post(market_event))
        .route("/webhooks/catalog", post(catalog_event))
}
