pub mod health;
pub mod webhook;

use axum::Router;

use crate::state::AppState;

/// Build the full route tree.
///
/// ```text
/// GET  /health             liveness
/// POST /webhooks/market    market feed push (price_change, out_of_stock)
/// POST /webhooks/catalog   downstream catalog hook (product_created, product_deleted)
/// ```
pub fn app_routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(webhook::router())
}
