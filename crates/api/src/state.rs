use std::sync::Arc;

use crate::engine::EventHandler;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Shared HMAC secret for inbound events; `None` accepts unsigned requests.
    pub webhook_secret: Option<Arc<str>>,
    /// Currency pushed prices must carry.
    pub currency: Arc<str>,
    /// Executes accepted events after the response has been sent.
    pub handler: Arc<dyn EventHandler>,
}

impl AppState {
    pub fn new(
        webhook_secret: Option<String>,
        currency: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        Self {
            webhook_secret: webhook_secret.map(Arc::from),
            currency: Arc::from(currency.into()),
            handler,
        }
    }
}
