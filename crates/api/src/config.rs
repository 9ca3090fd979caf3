use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use pricesync_core::error::CoreError;
use pricesync_core::pricing::{MarginConfig, MarginTier, RoundingMode};
use pricesync_sync::{AlertDestination, EmailConfig};

/// REST prefix appended to the store's shop root.
const STORE_API_PREFIX: &str = "/wp-json/wc/v3";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{name}={value:?} is invalid: {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Margin(#[from] CoreError),
}

/// Feed-source credentials and market.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub api_key: String,
    pub base_url: String,
    pub market: String,
    /// Currency pushed prices must carry to be applied.
    pub currency: String,
}

/// Downstream store REST credentials.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Full REST base, including the API prefix.
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
}

#[derive(Debug, Clone, Default)]
pub struct WebhookConfig {
    pub callback_url: Option<String>,
    /// `None` disables signature verification.
    pub secret: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// `None` disables anomaly alerts.
    pub threshold_pct: Option<f64>,
    pub destination: AlertDestination,
    pub email: Option<EmailConfig>,
}

/// Knobs shared by the server and the CLI.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub batch_size: usize,
    pub state_dir: PathBuf,
    pub http_timeout: Duration,
    pub max_retries: u32,
    pub pacing: Duration,
    /// `None` disables the in-server reconciliation loop.
    pub reconcile_interval: Option<Duration>,
}

/// HTTP ingress bind settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
}

/// Everything the process needs, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub feed: FeedConfig,
    pub store: StoreConfig,
    pub webhook: WebhookConfig,
    pub margin: MarginConfig,
    pub alerts: AlertConfig,
    pub runtime: RuntimeConfig,
    pub server: ServerConfig,
}

impl AppConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                   | Default                  |
    /// |---------------------------|--------------------------|
    /// | `FEED_API_KEY`            | required                 |
    /// | `FEED_BASE_URL`           | `https://api.kicks.dev`  |
    /// | `FEED_MARKET`             | `DE`                     |
    /// | `FEED_CURRENCY`           | `EUR`                    |
    /// | `WEBHOOK_CALLBACK_URL`    | none                     |
    /// | `WEBHOOK_SECRET`          | none (verification off)  |
    /// | `STORE_BASE_URL`          | required                 |
    /// | `STORE_CONSUMER_KEY`      | required                 |
    /// | `STORE_CONSUMER_SECRET`   | required                 |
    /// | `MARGIN_FLAT_PCT`         | `25`                     |
    /// | `MARGIN_TIERS`            | `[]`                     |
    /// | `MARGIN_FLOOR_PRICE`      | `0`                      |
    /// | `MARGIN_ROUNDING`         | `whole`                  |
    /// | `ALERT_THRESHOLD_PCT`     | `0` (off)                |
    /// | `ALERT_DESTINATION`       | none (log only)          |
    /// | `SMTP_HOST`               | none                     |
    /// | `SMTP_PORT`               | `587`                    |
    /// | `SMTP_FROM`               | `pricesync@localhost`    |
    /// | `SMTP_USER`               | none                     |
    /// | `SMTP_PASSWORD`           | none                     |
    /// | `BATCH_SIZE`              | `100`                    |
    /// | `STATE_DIR`               | `./state`                |
    /// | `HTTP_TIMEOUT_SECS`       | `30`                     |
    /// | `HTTP_MAX_RETRIES`        | `3`                      |
    /// | `REQUEST_PACING_MS`       | `200`                    |
    /// | `RECONCILE_INTERVAL_SECS` | `0` (off)                |
    /// | `HOST`                    | `0.0.0.0`                |
    /// | `PORT`                    | `3000`                   |
    /// | `REQUEST_TIMEOUT_SECS`    | `30`                     |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`, which returns the raw value of a
    /// variable. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        let feed = FeedConfig {
            api_key: env.required("FEED_API_KEY")?,
            base_url: env.or("FEED_BASE_URL", "https://api.kicks.dev"),
            market: env.or("FEED_MARKET", "DE").to_ascii_uppercase(),
            currency: env.or("FEED_CURRENCY", "EUR").to_ascii_uppercase(),
        };

        let store = StoreConfig {
            base_url: store_api_base(&env.required("STORE_BASE_URL")?),
            consumer_key: env.required("STORE_CONSUMER_KEY")?,
            consumer_secret: env.required("STORE_CONSUMER_SECRET")?,
        };

        let webhook = WebhookConfig {
            callback_url: env.get("WEBHOOK_CALLBACK_URL"),
            secret: env.get("WEBHOOK_SECRET"),
        };

        let margin = MarginConfig::new(
            env.parse("MARGIN_FLAT_PCT", 25.0)?,
            parse_tiers(env.get("MARGIN_TIERS"))?,
            env.parse("MARGIN_FLOOR_PRICE", 0.0)?,
            env.parse("MARGIN_ROUNDING", RoundingMode::Whole)?,
        )?;

        let threshold: f64 = env.parse("ALERT_THRESHOLD_PCT", 0.0)?;
        let alerts = AlertConfig {
            threshold_pct: (threshold > 0.0).then_some(threshold),
            destination: AlertDestination::parse(env.get("ALERT_DESTINATION").as_deref()),
            email: match env.get("SMTP_HOST") {
                Some(host) => {
                    let mut email = EmailConfig::new(host);
                    email.smtp_port = env.parse("SMTP_PORT", email.smtp_port)?;
                    if let Some(from) = env.get("SMTP_FROM") {
                        email.from_address = from;
                    }
                    email.smtp_user = env.get("SMTP_USER");
                    email.smtp_password = env.get("SMTP_PASSWORD");
                    Some(email)
                }
                None => None,
            },
        };

        let interval_secs: u64 = env.parse("RECONCILE_INTERVAL_SECS", 0)?;
        let runtime = RuntimeConfig {
            batch_size: env.parse::<usize>("BATCH_SIZE", 100)?.clamp(1, 100),
            state_dir: PathBuf::from(env.or("STATE_DIR", "./state")),
            http_timeout: Duration::from_secs(env.parse("HTTP_TIMEOUT_SECS", 30)?),
            max_retries: env.parse("HTTP_MAX_RETRIES", 3)?,
            pacing: Duration::from_millis(env.parse("REQUEST_PACING_MS", 200)?),
            reconcile_interval: (interval_secs > 0).then(|| Duration::from_secs(interval_secs)),
        };

        let server = ServerConfig {
            host: env.or("HOST", "0.0.0.0"),
            port: env.parse("PORT", 3000)?,
            request_timeout_secs: env.parse("REQUEST_TIMEOUT_SECS", 30)?,
        };

        Ok(Self {
            feed,
            store,
            webhook,
            margin,
            alerts,
            runtime,
            server,
        })
    }
}

/// Typed access to the lookup closure.
struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or_else(|| default.to_string())
    }

    fn required(&self, name: &'static str) -> Result<String, ConfigError> {
        self.get(name).ok_or(ConfigError::Missing(name))
    }

    fn parse<T>(&self, name: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(name) {
            None => Ok(default),
            Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
                name,
                reason: e.to_string(),
                value,
            }),
        }
    }
}

fn parse_tiers(raw: Option<String>) -> Result<Vec<MarginTier>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
        name: "MARGIN_TIERS",
        reason: e.to_string(),
        value: raw,
    })
}

fn store_api_base(shop_root: &str) -> String {
    let root = shop_root.trim_end_matches('/');
    if root.ends_with(STORE_API_PREFIX) {
        root.to_string()
    } else {
        format!("{root}{STORE_API_PREFIX}")
    }
}
