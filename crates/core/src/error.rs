/// Domain-level errors raised by the pure components (diffing, pricing
/// configuration, payload validation).
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}
