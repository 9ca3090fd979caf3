//! Delivery of price-swing alerts.
//!
//! [`AlertSink`] is the seam the reconciler raises alerts through. Sinks
//! report failures to the caller, which logs them; a failed alert never
//! blocks or cancels the price update that triggered it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use pricesync_client::Clock;
use pricesync_core::alert::PriceAlert;

/// Retry delays for webhook alerts (1 s, 2 s, 4 s).
const RETRY_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// HTTP request timeout for a single webhook attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

const DEFAULT_SMTP_PORT: u16 = 587;
const DEFAULT_FROM_ADDRESS: &str = "pricesync@localhost";

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Alert webhook returned HTTP {0}")]
    HttpStatus(u16),

    #[error("SMTP transport error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    #[error("Email address parse error: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Email build error: {0}")]
    Build(String),

    #[error("Alert configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Sink trait
// ---------------------------------------------------------------------------

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn send(&self, alert: &PriceAlert) -> Result<(), AlertError>;
}

/// Writes alerts to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn send(&self, alert: &PriceAlert) -> Result<(), AlertError> {
        tracing::warn!(
            sku = %alert.sku,
            variation_id = alert.variation_id,
            size = %alert.size_key,
            direction = %alert.direction,
            old_price = alert.old_price,
            new_price = alert.new_price,
            pct_change = alert.pct_change,
            margin_source = %alert.breakdown.margin_source,
            "Price swing alert"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Webhook
// ---------------------------------------------------------------------------

/// POSTs the alert as JSON, retrying with backoff.
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
    clock: Arc<dyn Clock>,
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, clock: Arc<dyn Clock>) -> Result<Self, AlertError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            clock,
        })
    }

    async fn try_send(&self, payload: &serde_json::Value) -> Result<(), AlertError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(AlertError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn send(&self, alert: &PriceAlert) -> Result<(), AlertError> {
        let payload = serde_json::json!({
            "type": "price_alert",
            "summary": alert.summary(),
            "alert": alert,
        });

        for (attempt, delay) in RETRY_DELAYS.iter().enumerate() {
            match self.try_send(&payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url = %self.url,
                        error = %e,
                        "Alert webhook attempt failed, retrying"
                    );
                    self.clock.sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        self.try_send(&payload).await.inspect_err(|e| {
            tracing::error!(url = %self.url, error = %e, "Alert webhook failed after all retries");
        })
    }
}

impl std::fmt::Debug for WebhookAlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookAlertSink")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Email
// ---------------------------------------------------------------------------

/// SMTP settings for email alerts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub from_address: String,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
}

impl EmailConfig {
    /// Config for `smtp_host` with the default port and sender.
    pub fn new(smtp_host: impl Into<String>) -> Self {
        Self {
            smtp_host: smtp_host.into(),
            smtp_port: DEFAULT_SMTP_PORT,
            from_address: DEFAULT_FROM_ADDRESS.to_string(),
            smtp_user: None,
            smtp_password: None,
        }
    }
}

/// Sends a plain-text email per alert.
#[derive(Debug, Clone)]
pub struct EmailAlertSink {
    config: EmailConfig,
    to: String,
}

impl EmailAlertSink {
    pub fn new(config: EmailConfig, to: impl Into<String>) -> Self {
        Self {
            config,
            to: to.into(),
        }
    }

    fn message(&self, alert: &PriceAlert) -> Result<lettre::Message, AlertError> {
        use lettre::message::header::ContentType;

        let breakdown = &alert.breakdown;
        let body = format!(
            "SKU: {}\nVariation: {} (size {})\nDirection: {}\nOld price: {:.2}\nNew price: {:.2}\n\
             Change: {:.1}% (threshold {:.1}%)\n\nMarket price: {:.2}\nMargin: {}% ({})\n\
             Raw price: {:.2}\nFloor applied: {}\n",
            alert.sku,
            alert.variation_id,
            alert.size_key,
            alert.direction,
            alert.old_price,
            alert.new_price,
            alert.pct_change,
            alert.threshold_pct,
            breakdown.market_price,
            breakdown.margin_pct,
            breakdown.margin_source,
            breakdown.raw_price,
            breakdown.floor_applied,
        );

        lettre::Message::builder()
            .from(self.config.from_address.parse()?)
            .to(self.to.parse()?)
            .subject(format!("[pricesync] {}", alert.summary()))
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| AlertError::Build(e.to_string()))
    }
}

#[async_trait]
impl AlertSink for EmailAlertSink {
    async fn send(&self, alert: &PriceAlert) -> Result<(), AlertError> {
        use lettre::{
            transport::smtp::authentication::Credentials, AsyncSmtpTransport, AsyncTransport,
            Tokio1Executor,
        };

        let email = self.message(alert)?;

        let mut transport_builder =
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.config.smtp_host)?
                .port(self.config.smtp_port);
        if let (Some(user), Some(pass)) = (&self.config.smtp_user, &self.config.smtp_password) {
            transport_builder =
                transport_builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }

        transport_builder.build().send(email).await?;
        tracing::info!(to = %self.to, sku = %alert.sku, "Alert email sent");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Destination
// ---------------------------------------------------------------------------

/// Where alerts go, derived from the configured destination string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlertDestination {
    Log,
    Webhook(String),
    Email(String),
}

impl AlertDestination {
    /// `http(s)://` means webhook, anything else non-empty is an email address.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim).filter(|s| !s.is_empty()) {
            None => Self::Log,
            Some(url) if url.starts_with("http://") || url.starts_with("https://") => {
                Self::Webhook(url.to_string())
            }
            Some(address) => Self::Email(address.to_string()),
        }
    }

    /// Build the sink for this destination.
    pub fn into_sink(
        self,
        email: Option<EmailConfig>,
        clock: Arc<dyn Clock>,
    ) -> Result<Arc<dyn AlertSink>, AlertError> {
        Ok(match self {
            Self::Log => Arc::new(LogAlertSink),
            Self::Webhook(url) => Arc::new(WebhookAlertSink::new(url, clock)?),
            Self::Email(to) => {
                let config = email.ok_or_else(|| {
                    AlertError::Config("SMTP_HOST must be set for email alerts".into())
                })?;
                Arc::new(EmailAlertSink::new(config, to))
            }
        })
    }
}
