use crate::transport::TransportError;

/// Error returned by [`ApiClient`](crate::api::ApiClient) calls.
///
/// Transient failures (transport errors, 429, 5xx) have already been
/// retried when they surface here; permanent ones (other 4xx) never are.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No HTTP status was received.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The remote answered with a non-2xx status.
    #[error("HTTP {status} from {url}: {body}")]
    Status {
        status: u16,
        url: String,
        body: String,
    },

    /// The body could not be decoded into the expected shape.
    #[error("Failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Whether the error class is retried by the client.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => is_retryable_status(*status),
            Self::Decode { .. } => false,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Status { status: 404, .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// 429 and every 5xx are retried; other statuses are final.
pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}
