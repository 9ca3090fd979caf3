//! In-memory fakes for the feed, store and alert seams.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use pricesync_client::store::{
    BatchItemError, BatchOutcome, CatalogStore, StockStatus, StoreProduct, StoreVariation,
    VariationAttribute, VariationPatch,
};
use pricesync_client::testing::RecordingClock;
use pricesync_client::{ApiError, MarketFeed, Pacer, TransportError};
use pricesync_core::alert::PriceAlert;
use pricesync_core::snapshot::{EntitySnapshot, VariantSnapshot};
use pricesync_core::types::Sku;

use crate::alerts::{AlertError, AlertSink};

pub fn server_error(path: &str) -> ApiError {
    ApiError::Status {
        status: 500,
        url: path.to_string(),
        body: "boom".into(),
    }
}

/// Pacer over a recording clock with a 200 ms interval.
pub fn recording_pacer() -> (Pacer, Arc<RecordingClock>) {
    let clock = Arc::new(RecordingClock::default());
    (Pacer::new(Duration::from_millis(200), clock.clone()), clock)
}

/// Feed entity with a source id of `src-<sku>`.
pub fn feed_product(sku: &str, sizes: &[(&str, f64, i64)]) -> EntitySnapshot {
    let mut entity = sizes.iter().fold(EntitySnapshot::new(sku), |e, (size, price, qty)| {
        e.with_variant(VariantSnapshot::new(size, *price, *qty))
    });
    entity.display_name = format!("Product {sku}");
    entity.brand_name = "Nike".into();
    entity.source_id = Some(format!("src-{sku}"));
    entity
}

pub fn variation(id: u64, sku: &str, size: Option<&str>, price: &str, qty: i64) -> StoreVariation {
    StoreVariation {
        id,
        sku: sku.to_string(),
        regular_price: Some(price.to_string()),
        stock_quantity: Some(qty),
        stock_status: Some(if qty > 0 { "instock" } else { "outofstock" }.into()),
        attributes: size
            .map(|s| {
                vec![VariationAttribute {
                    name: "Size".into(),
                    option: Some(s.to_string()),
                }]
            })
            .unwrap_or_default(),
    }
}

// ---------------------------------------------------------------------------
// FakeFeed
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeFeed {
    products: Mutex<BTreeMap<Sku, EntitySnapshot>>,
    failing: Mutex<HashSet<Sku>>,
    subscriptions: Mutex<BTreeMap<String, BTreeSet<String>>>,
    fail_subscriptions: AtomicBool,
    created: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakeFeed {
    pub fn put(&self, entity: EntitySnapshot) {
        self.products
            .lock()
            .unwrap()
            .insert(entity.id.clone(), entity);
    }

    pub fn delist(&self, sku: &str) {
        self.products.lock().unwrap().remove(sku);
    }

    /// Make every fetch of `sku` fail as if retries were exhausted.
    pub fn fail_fetch(&self, sku: &str) {
        self.failing.lock().unwrap().insert(sku.to_string());
    }

    pub fn fail_subscriptions(&self, fail: bool) {
        self.fail_subscriptions.store(fail, Ordering::SeqCst);
    }

    pub fn subscription(&self, id: &str) -> Option<BTreeSet<String>> {
        self.subscriptions.lock().unwrap().get(id).cloned()
    }

    pub fn subscriptions_created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn check_subscriptions(&self, path: &str) -> Result<(), ApiError> {
        if self.fail_subscriptions.load(Ordering::SeqCst) {
            return Err(server_error(path));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketFeed for FakeFeed {
    async fn fetch_product(&self, sku: &str) -> Result<Option<EntitySnapshot>, ApiError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(sku) {
            return Err(TransportError::Timeout.into());
        }
        Ok(self.products.lock().unwrap().get(sku).cloned())
    }

    async fn create_subscription(
        &self,
        _callback_url: &str,
        product_ids: &[String],
    ) -> Result<String, ApiError> {
        self.check_subscriptions("v3/webhooks")?;
        let id = format!("sub-{}", self.created.fetch_add(1, Ordering::SeqCst) + 1);
        self.subscriptions
            .lock()
            .unwrap()
            .insert(id.clone(), product_ids.iter().cloned().collect());
        Ok(id)
    }

    async fn add_to_subscription(
        &self,
        subscription_id: &str,
        product_ids: &[String],
    ) -> Result<(), ApiError> {
        self.check_subscriptions("v3/webhooks/products")?;
        let mut subscriptions = self.subscriptions.lock().unwrap();
        let Some(ids) = subscriptions.get_mut(subscription_id) else {
            return Err(ApiError::Status {
                status: 404,
                url: subscription_id.to_string(),
                body: String::new(),
            });
        };
        ids.extend(product_ids.iter().cloned());
        Ok(())
    }

    async fn remove_from_subscription(
        &self,
        subscription_id: &str,
        product_ids: &[String],
    ) -> Result<(), ApiError> {
        self.check_subscriptions("v3/webhooks/products")?;
        if let Some(ids) = self.subscriptions.lock().unwrap().get_mut(subscription_id) {
            for id in product_ids {
                ids.remove(id);
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// FakeStore
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeStore {
    products: Mutex<BTreeMap<Sku, (u64, Vec<StoreVariation>)>>,
    rejected: Mutex<HashSet<u64>>,
    batches: Mutex<Vec<(u64, Vec<VariationPatch>)>>,
    fail_listing: AtomicBool,
    fail_batches: AtomicBool,
}

impl FakeStore {
    pub fn add_product(&self, sku: &str, product_id: u64, variations: Vec<StoreVariation>) {
        self.products
            .lock()
            .unwrap()
            .insert(sku.to_string(), (product_id, variations));
    }

    pub fn remove_product(&self, sku: &str) {
        self.products.lock().unwrap().remove(sku);
    }

    /// Make batch items for `variation_id` fail with an item-level error.
    pub fn reject(&self, variation_id: u64) {
        self.rejected.lock().unwrap().insert(variation_id);
    }

    pub fn fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub fn batches(&self) -> Vec<(u64, Vec<VariationPatch>)> {
        self.batches.lock().unwrap().clone()
    }

    pub fn variation(&self, sku: &str, variation_id: u64) -> Option<StoreVariation> {
        self.products
            .lock()
            .unwrap()
            .get(sku)
            .and_then(|(_, vs)| vs.iter().find(|v| v.id == variation_id).cloned())
    }
}

#[async_trait]
impl CatalogStore for FakeStore {
    async fn list_skus(&self) -> Result<Vec<Sku>, ApiError> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(server_error("products"));
        }
        Ok(self.products.lock().unwrap().keys().cloned().collect())
    }

    async fn find_product(&self, sku: &str) -> Result<Option<StoreProduct>, ApiError> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .get(sku)
            .map(|(id, _)| StoreProduct {
                id: *id,
                sku: sku.to_string(),
                name: String::new(),
            }))
    }

    async fn list_variations(&self, product_id: u64) -> Result<Vec<StoreVariation>, ApiError> {
        Ok(self
            .products
            .lock()
            .unwrap()
            .values()
            .find(|(id, _)| *id == product_id)
            .map(|(_, vs)| vs.clone())
            .unwrap_or_default())
    }

    async fn batch_update_variations(
        &self,
        product_id: u64,
        patches: &[VariationPatch],
    ) -> Result<BatchOutcome, ApiError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(server_error("variations/batch"));
        }
        self.batches
            .lock()
            .unwrap()
            .push((product_id, patches.to_vec()));

        let rejected = self.rejected.lock().unwrap().clone();
        let mut products = self.products.lock().unwrap();
        let variations = products
            .values_mut()
            .find(|(id, _)| *id == product_id)
            .map(|(_, vs)| vs);

        let mut outcome = BatchOutcome::default();
        let Some(variations) = variations else {
            return Ok(outcome);
        };
        for patch in patches {
            let target = variations.iter_mut().find(|v| v.id == patch.id);
            match target {
                Some(v) if !rejected.contains(&patch.id) => {
                    if let Some(price) = &patch.regular_price {
                        v.regular_price = Some(price.clone());
                    }
                    if let Some(qty) = patch.stock_quantity {
                        v.stock_quantity = Some(qty);
                    }
                    if let Some(status) = patch.stock_status {
                        v.stock_status = Some(
                            match status {
                                StockStatus::InStock => "instock",
                                StockStatus::OutOfStock => "outofstock",
                            }
                            .into(),
                        );
                    }
                    outcome.updated.push(patch.id);
                }
                _ => outcome.failed.push(BatchItemError {
                    id: Some(patch.id),
                    code: "woocommerce_rest_invalid_id".into(),
                    message: "Invalid ID.".into(),
                }),
            }
        }
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// RecordingSink
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<PriceAlert>>,
}

impl RecordingSink {
    pub fn alerts(&self) -> Vec<PriceAlert> {
        self.alerts.lock().unwrap().clone()
    }
}

#[async_trait]
impl AlertSink for RecordingSink {
    async fn send(&self, alert: &PriceAlert) -> Result<(), AlertError> {
        self.alerts.lock().unwrap().push(alert.clone());
        Ok(())
    }
}
