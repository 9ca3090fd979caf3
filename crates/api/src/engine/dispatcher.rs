//! Executes ingress commands against the reconciler and the registry.

use std::sync::Arc;

use async_trait::async_trait;

use pricesync_sync::{PriceReconciler, TrackingRegistry, UpdateOutcome};

use super::{EventHandler, SyncCommand};

/// Production [`EventHandler`].
///
/// Price and stock events go to the [`PriceReconciler`]; catalog events
/// go to the [`TrackingRegistry`]. Every outcome is logged, nothing is
/// returned to the caller.
pub struct SyncDispatcher {
    reconciler: PriceReconciler,
    registry: Arc<TrackingRegistry>,
}

impl SyncDispatcher {
    pub fn new(reconciler: PriceReconciler, registry: Arc<TrackingRegistry>) -> Self {
        Self {
            reconciler,
            registry,
        }
    }

    /// Run one command to completion.
    pub async fn dispatch(&self, command: SyncCommand) {
        let kind = command.kind();
        match command {
            SyncCommand::PriceChange { sku, variants } => {
                if variants.is_empty() {
                    tracing::info!(sku = %sku, "Price change carried no usable variants");
                    return;
                }
                let outcome = self.reconciler.update_prices(&sku, &variants).await;
                log_outcome(kind, &sku, outcome);
            }
            SyncCommand::OutOfStock { sku, variants } => {
                let outcome = if variants.is_empty() {
                    self.reconciler.zero_stock(&sku).await
                } else {
                    self.reconciler.update_prices(&sku, &variants).await
                };
                log_outcome(kind, &sku, outcome);
            }
            SyncCommand::ProductCreated { sku } => {
                match self.registry.register_single(&sku).await {
                    Ok(added) => tracing::info!(sku = %sku, added, "Catalog product registered"),
                    Err(e) => tracing::error!(sku = %sku, error = %e, "Failed to register product"),
                }
            }
            SyncCommand::ProductDeleted { sku } => {
                match self.registry.unregister_single(&sku).await {
                    Ok(removed) => {
                        tracing::info!(sku = %sku, removed, "Catalog product unregistered")
                    }
                    Err(e) => {
                        tracing::error!(sku = %sku, error = %e, "Failed to unregister product")
                    }
                }
            }
        }
    }
}

fn log_outcome(kind: &str, sku: &str, outcome: UpdateOutcome) {
    if outcome.errors > 0 {
        tracing::warn!(
            event = kind,
            sku,
            updated = outcome.updated,
            errors = outcome.errors,
            "Event processed with errors"
        );
    } else {
        tracing::info!(
            event = kind,
            sku,
            updated = outcome.updated,
            skipped = outcome.skipped,
            alerts = outcome.alerts,
            "Event processed"
        );
    }
}

#[async_trait]
impl EventHandler for SyncDispatcher {
    async fn handle(&self, command: SyncCommand) {
        self.dispatch(command).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use pricesync_client::testing::{RecordingClock, ScriptedTransport};
    use pricesync_client::{ApiClient, FeedClient, Pacer, StoreClient};
    use pricesync_core::pricing::{MarginCalculator, MarginConfig};
    use pricesync_sync::alerts::LogAlertSink;
    use pricesync_sync::{MarketVariant, ReconcilerSettings};
    use serde_json::json;

    struct Harness {
        dispatcher: SyncDispatcher,
        store: Arc<ScriptedTransport>,
        feed: Arc<ScriptedTransport>,
        _dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let clock = Arc::new(RecordingClock::default());
        let store = Arc::new(ScriptedTransport::default());
        let feed = Arc::new(ScriptedTransport::default());
        let dir = tempfile::tempdir().unwrap();

        let store_client = Arc::new(StoreClient::new(ApiClient::new(
            "https://shop.example/wp-json/wc/v3",
            store.clone(),
            clock.clone(),
        )));
        let feed_client = Arc::new(FeedClient::new(
            ApiClient::new("https://feed.example", feed.clone(), clock.clone()),
            "DE",
        ));
        let pacer = Pacer::new(Duration::from_millis(200), clock);

        let reconciler = PriceReconciler::new(
            store_client.clone(),
            MarginCalculator::new(MarginConfig::flat(25.0).unwrap()),
            Arc::new(LogAlertSink),
            ReconcilerSettings::default(),
        );
        let registry = Arc::new(
            TrackingRegistry::in_dir(dir.path(), feed_client, store_client, pacer)
                .with_callback_url(Some("https://sync.example/webhooks/market".into())),
        );

        Harness {
            dispatcher: SyncDispatcher::new(reconciler, registry),
            store,
            feed,
            _dir: dir,
        }
    }

    fn script_product(store: &ScriptedTransport) {
        store.push_json(200, json!([{ "id": 12, "sku": "DD1391-100", "name": "Dunk" }]));
        store.push_json(
            200,
            json!([
                {
                    "id": 101, "sku": "DD1391-100-42", "regular_price": "100.00",
                    "stock_quantity": 3, "stock_status": "instock",
                    "attributes": [{ "name": "Size", "option": "42" }]
                },
                {
                    "id": 102, "sku": "DD1391-100-43", "regular_price": "100.00",
                    "stock_quantity": 1, "stock_status": "instock",
                    "attributes": [{ "name": "Size", "option": "43" }]
                }
            ]),
        );
    }

    // -- Price and stock -----------------------------------------------------

    #[tokio::test]
    async fn price_change_patches_matched_sizes() {
        let h = harness();
        script_product(&h.store);
        h.store
            .push_json(200, json!({ "update": [{ "id": 101, "regular_price": "150.00" }] }));

        h.dispatcher
            .dispatch(SyncCommand::PriceChange {
                sku: "DD1391-100".into(),
                variants: vec![MarketVariant::priced("42", 120.0)],
            })
            .await;

        let requests = h.store.requests();
        assert_eq!(requests.len(), 3);
        assert!(requests[2].url.ends_with("products/12/variations/batch"));
        let body = requests[2].body.clone().unwrap();
        assert_eq!(body["update"].as_array().unwrap().len(), 1);
        assert_eq!(body["update"][0]["id"], 101);
        assert_eq!(body["update"][0]["regular_price"], "150.00");
    }

    #[tokio::test]
    async fn empty_price_change_makes_no_calls() {
        let h = harness();
        h.dispatcher
            .dispatch(SyncCommand::PriceChange {
                sku: "DD1391-100".into(),
                variants: Vec::new(),
            })
            .await;
        assert_eq!(h.store.call_count(), 0);
    }

    #[tokio::test]
    async fn out_of_stock_without_sizes_zeroes_every_variation() {
        let h = harness();
        script_product(&h.store);
        h.store.push_json(200, json!({ "update": [{ "id": 101 }, { "id": 102 }] }));

        h.dispatcher
            .dispatch(SyncCommand::OutOfStock {
                sku: "DD1391-100".into(),
                variants: Vec::new(),
            })
            .await;

        let body = h.store.requests()[2].body.clone().unwrap();
        let update = body["update"].as_array().unwrap();
        assert_eq!(update.len(), 2);
        assert!(update.iter().all(|p| p["stock_quantity"] == 0));
        assert!(update.iter().all(|p| p.get("regular_price").is_none()));
    }

    // -- Catalog -------------------------------------------------------------

    #[tokio::test]
    async fn deleting_untracked_product_is_a_no_op() {
        let h = harness();
        h.dispatcher
            .dispatch(SyncCommand::ProductDeleted {
                sku: "FQ8080-133".into(),
            })
            .await;
        assert_eq!(h.feed.call_count(), 0);
    }

    #[tokio::test]
    async fn creating_product_unknown_to_feed_is_not_tracked() {
        let h = harness();
        h.feed.push_json(404, json!({ "message": "not found" }));

        h.dispatcher
            .dispatch(SyncCommand::ProductCreated {
                sku: "FQ8080-133".into(),
            })
            .await;

        assert_eq!(h.feed.call_count(), 1);
        let registry = h.dispatcher.registry.load().await.unwrap();
        assert!(registry.skus.is_empty());
    }
}
