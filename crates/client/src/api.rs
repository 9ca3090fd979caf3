//! Generic JSON API client with bounded retry and exponential backoff.
//!
//! Retry policy, applied uniformly to every call:
//!
//! - transport failure (including timeout), HTTP 429, HTTP >= 500 ⇒ retry
//!   up to [`RetryPolicy::max_retries`] times, waiting
//!   `base_delay * 2^n` before retry `n` (2 s, 4 s, 8 s by default);
//! - any other non-2xx ⇒ fail immediately;
//! - 2xx ⇒ success; 204 or an empty body decodes to JSON `null`.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::clock::Clock;
use crate::error::ApiError;
use crate::transport::{ApiRequest, Auth, Method, Transport};

/// Upper bound on a single backoff delay.
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Retry budget and backoff base.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry `retry` (1-based): `base_delay * 2^retry`, capped.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

/// JSON API client bound to one base URL and credential set.
#[derive(Clone)]
pub struct ApiClient {
    base_url: String,
    auth: Option<Auth>,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
}

impl ApiClient {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth: None,
            transport,
            clock,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Perform a request and return the decoded JSON body.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<Value, ApiError> {
        let request = ApiRequest {
            method,
            url: format!("{}/{}", self.base_url, path.trim_start_matches('/')),
            query: query
                .iter()
                .map(|(k, v)| ((*k).to_string(), v.clone()))
                .collect(),
            body: body.cloned(),
            auth: self.auth.clone(),
        };

        let mut retry = 0u32;
        loop {
            let err = match self.transport.send(&request).await {
                Ok(response) if response.is_success() => {
                    return decode_body(&request.url, response.status, &response.body);
                }
                Ok(response) => ApiError::Status {
                    status: response.status,
                    url: request.url.clone(),
                    body: response.body,
                },
                Err(e) => ApiError::Transport(e),
            };

            let retryable = err.is_transient();
            if !retryable || retry >= self.policy.max_retries {
                if retryable {
                    tracing::error!(
                        method = %request.method,
                        url = %request.url,
                        attempts = retry + 1,
                        error = %err,
                        "Remote call failed after all retries"
                    );
                }
                return Err(err);
            }

            retry += 1;
            let delay = self.policy.delay_for(retry);
            tracing::warn!(
                method = %request.method,
                url = %request.url,
                attempt = retry,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Remote call failed, retrying"
            );
            self.clock.sleep(delay).await;
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, ApiError> {
        let value = self.request(Method::GET, path, query, None).await?;
        from_value(path, value)
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        let value = self.request(Method::POST, path, &[], Some(body)).await?;
        from_value(path, value)
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T, ApiError> {
        let value = self.request(Method::PUT, path, &[], Some(body)).await?;
        from_value(path, value)
    }

    pub async fn delete(&self, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        self.request(Method::DELETE, path, &[], body).await
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("auth", &self.auth)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn decode_body(url: &str, status: u16, body: &str) -> Result<Value, ApiError> {
    if status == 204 || body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|source| ApiError::Decode {
        url: url.to_string(),
        source,
    })
}

fn from_value<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, ApiError> {
    serde_json::from_value(value).map_err(|source| ApiError::Decode {
        url: path.to_string(),
        source,
    })
}
