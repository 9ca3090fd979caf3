use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use pricesync_core::error::CoreError;

/// Error type for HTTP handlers.
///
/// Renders every failure as `{ "error": ..., "code": ... }` with the
/// status its [`CoreError`] kind maps to.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let AppError::Core(core) = &self;
        let (status, code, message) = match core {
            CoreError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
            CoreError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            CoreError::Config(msg) => {
                tracing::error!(error = %msg, "Configuration error while handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
