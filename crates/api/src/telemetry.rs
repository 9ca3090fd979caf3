use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str =
    "pricesync_api=info,pricesync_sync=info,pricesync_client=info,tower_http=info";

/// Verbose variant of [`DEFAULT_FILTER`].
pub const VERBOSE_FILTER: &str =
    "pricesync_api=debug,pricesync_sync=debug,pricesync_client=debug,tower_http=debug";

/// Install the global subscriber. `RUST_LOG` wins over `default_filter`.
pub fn init(default_filter: &str) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
