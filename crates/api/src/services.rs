//! Wiring of the production collaborators from [`AppConfig`].

use std::sync::Arc;

use pricesync_client::{
    ApiClient, Auth, CatalogStore, Clock, FeedClient, MarketFeed, Pacer, ReqwestTransport,
    RetryPolicy, StoreClient, TokioClock, Transport, TransportError,
};
use pricesync_core::pricing::MarginCalculator;
use pricesync_sync::alerts::AlertError;
use pricesync_sync::{
    PriceReconciler, ReconcilerSettings, Reconciliation, SnapshotStore, TrackingRegistry,
};

use crate::config::AppConfig;
use crate::engine::SyncDispatcher;

/// Failures while assembling the service graph. Fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to build HTTP client: {0}")]
    Transport(#[from] TransportError),

    #[error("Failed to configure alerts: {0}")]
    Alerts(#[from] AlertError),
}

/// Every long-lived component, built once per process.
pub struct Services {
    pub registry: Arc<TrackingRegistry>,
    pub reconciler: PriceReconciler,
    pub reconciliation: Arc<Reconciliation>,
}

impl Services {
    pub fn build(config: &AppConfig) -> Result<Self, StartupError> {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let transport: Arc<dyn Transport> =
            Arc::new(ReqwestTransport::new(config.runtime.http_timeout)?);
        let retry = RetryPolicy {
            max_retries: config.runtime.max_retries,
            ..RetryPolicy::default()
        };

        let feed_api = ApiClient::new(&config.feed.base_url, transport.clone(), clock.clone())
            .with_auth(Auth::Bearer(config.feed.api_key.clone()))
            .with_retry_policy(retry);
        let feed: Arc<dyn MarketFeed> =
            Arc::new(FeedClient::new(feed_api, config.feed.market.clone()));

        let store_api = ApiClient::new(&config.store.base_url, transport, clock.clone())
            .with_auth(Auth::Basic {
                username: config.store.consumer_key.clone(),
                password: config.store.consumer_secret.clone(),
            })
            .with_retry_policy(retry);
        let store: Arc<dyn CatalogStore> = Arc::new(StoreClient::new(store_api));

        let pacer = Pacer::new(config.runtime.pacing, clock.clone());
        let registry = Arc::new(
            TrackingRegistry::in_dir(
                &config.runtime.state_dir,
                feed.clone(),
                store.clone(),
                pacer.clone(),
            )
            .with_callback_url(config.webhook.callback_url.clone()),
        );

        let alerts = config
            .alerts
            .destination
            .clone()
            .into_sink(config.alerts.email.clone(), clock)?;
        let reconciler = PriceReconciler::new(
            store,
            MarginCalculator::new(config.margin.clone()),
            alerts,
            ReconcilerSettings {
                batch_size: config.runtime.batch_size,
                alert_threshold_pct: config.alerts.threshold_pct,
                dry_run: false,
            },
        );

        let reconciliation = Arc::new(Reconciliation::new(
            feed,
            registry.clone(),
            reconciler.clone(),
            SnapshotStore::in_dir(&config.runtime.state_dir),
            pacer,
        ));

        tracing::info!(
            feed = %config.feed.base_url,
            market = %config.feed.market,
            store = %config.store.base_url,
            state_dir = %config.runtime.state_dir.display(),
            alerts = ?config.alerts.destination,
            "Services configured"
        );

        Ok(Self {
            registry,
            reconciler,
            reconciliation,
        })
    }

    /// Event handler for the ingress routes.
    pub fn dispatcher(&self) -> SyncDispatcher {
        SyncDispatcher::new(self.reconciler.clone(), self.registry.clone())
    }
}
