//! Idempotent price and stock updater.
//!
//! For one entity, [`PriceReconciler::update_prices`] walks
//! `Fetching -> Matching -> Calculating -> (Skipping | Queuing) -> Batching`:
//! it loads the downstream variations, matches each to a market variant by
//! size, computes the selling price, skips variations already within one
//! cent of it, raises anomaly alerts, and sends the remaining patches in
//! batch-limited chunks. Every per-item failure is counted, never thrown.
//!
//! Alerts are delivered on background tasks so a slow or dead alert
//! destination never holds up the batch; [`PriceReconciler::flush_alerts`]
//! waits for deliveries still in flight.

use std::collections::HashMap;
use std::ops::AddAssign;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use serde::Serialize;
use tokio_util::task::TaskTracker;

use pricesync_client::store::{StoreVariation, MAX_BATCH_SIZE};
use pricesync_client::{CatalogStore, VariationPatch};
use pricesync_core::alert::{detect_swing, PriceAlert};
use pricesync_core::pricing::MarginCalculator;
use pricesync_core::snapshot::{normalize_size_key, EntitySnapshot};
use pricesync_core::types::{round2, to_cents};

use crate::alerts::AlertSink;

/// Trailing size in a composite variation SKU, e.g. `DD1391-100-42.5`.
static SKU_SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)[-_ ](?:eu[-_ ]?)?(\d{2}(?:[.,]\d{1,2})?)$").expect("valid regex")
});

/// Market data for one size of an entity.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketVariant {
    pub size_key: String,
    /// Market price; `None` leaves the selling price untouched.
    pub price: Option<f64>,
    /// Available units; `None` leaves stock untouched.
    pub quantity: Option<i64>,
}

impl MarketVariant {
    pub fn priced(size_key: impl AsRef<str>, price: f64) -> Self {
        Self {
            size_key: normalize_size_key(size_key.as_ref()),
            price: Some(price),
            quantity: None,
        }
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    /// Price and quantity for every variant of a feed entity.
    pub fn from_entity(entity: &EntitySnapshot) -> Vec<Self> {
        entity
            .variants
            .iter()
            .map(|v| Self {
                size_key: normalize_size_key(&v.size_key),
                price: Some(v.price).filter(|p| *p > 0.0),
                quantity: Some(v.available_quantity),
            })
            .collect()
    }
}

/// Counters for one or more entity updates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateOutcome {
    pub updated: usize,
    pub skipped: usize,
    pub errors: usize,
    pub alerts: usize,
}

impl AddAssign for UpdateOutcome {
    fn add_assign(&mut self, rhs: Self) {
        self.updated += rhs.updated;
        self.skipped += rhs.skipped;
        self.errors += rhs.errors;
        self.alerts += rhs.alerts;
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReconcilerSettings {
    /// Items per batch call, clamped to `1..=MAX_BATCH_SIZE`.
    pub batch_size: usize,
    /// Swing percentage that raises an alert; `None` disables alerts.
    pub alert_threshold_pct: Option<f64>,
    /// Compute and log everything, send nothing.
    pub dry_run: bool,
}

impl Default for ReconcilerSettings {
    fn default() -> Self {
        Self {
            batch_size: MAX_BATCH_SIZE,
            alert_threshold_pct: None,
            dry_run: false,
        }
    }
}

// ---------------------------------------------------------------------------
// PriceReconciler
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PriceReconciler {
    store: Arc<dyn CatalogStore>,
    calculator: MarginCalculator,
    alerts: Arc<dyn AlertSink>,
    alert_tasks: TaskTracker,
    settings: ReconcilerSettings,
}

impl PriceReconciler {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        calculator: MarginCalculator,
        alerts: Arc<dyn AlertSink>,
        mut settings: ReconcilerSettings,
    ) -> Self {
        settings.batch_size = settings.batch_size.clamp(1, MAX_BATCH_SIZE);
        settings.alert_threshold_pct = settings.alert_threshold_pct.filter(|t| *t > 0.0);
        Self {
            store,
            calculator,
            alerts,
            alert_tasks: TaskTracker::new(),
            settings,
        }
    }

    /// Wait for every alert delivery started so far.
    ///
    /// Not meant to be called from two places at once: the tracker is
    /// closed for the wait and reopened afterwards.
    pub async fn flush_alerts(&self) {
        self.alert_tasks.close();
        self.alert_tasks.wait().await;
        self.alert_tasks.reopen();
    }

    /// A copy that never writes downstream.
    pub fn as_dry_run(&self) -> Self {
        let mut reconciler = self.clone();
        reconciler.settings.dry_run = true;
        reconciler
    }

    pub fn settings(&self) -> &ReconcilerSettings {
        &self.settings
    }

    pub fn calculator(&self) -> &MarginCalculator {
        &self.calculator
    }

    /// Bring one entity's downstream prices and stock in line with
    /// `variants`.
    ///
    /// An entity missing downstream, or whose variations cannot be
    /// fetched, counts as one error with nothing sent.
    pub async fn update_prices(&self, sku: &str, variants: &[MarketVariant]) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();

        let Some((product_id, variations)) = self.fetch(sku).await else {
            outcome.errors = 1;
            return outcome;
        };

        let by_size: HashMap<&str, &MarketVariant> = variants
            .iter()
            .map(|v| (v.size_key.as_str(), v))
            .collect();

        let mut queue = Vec::new();
        for variation in &variations {
            let Some((size, market)) = match_variation(variation, sku, &by_size) else {
                tracing::debug!(
                    sku,
                    variation_id = variation.id,
                    variation_sku = %variation.sku,
                    "No market data for variation, skipping"
                );
                outcome.skipped += 1;
                continue;
            };
            match self.plan(sku, variation, &size, market, &mut outcome).await {
                Some(patch) => queue.push(patch),
                None => outcome.skipped += 1,
            }
        }

        self.send(sku, product_id, &queue, &mut outcome).await;

        tracing::info!(
            sku,
            updated = outcome.updated,
            skipped = outcome.skipped,
            errors = outcome.errors,
            alerts = outcome.alerts,
            dry_run = self.settings.dry_run,
            "Entity reconciled"
        );
        outcome
    }

    /// Mark every downstream variation of `sku` as out of stock.
    pub async fn zero_stock(&self, sku: &str) -> UpdateOutcome {
        let mut outcome = UpdateOutcome::default();

        let Some((product_id, variations)) = self.fetch(sku).await else {
            outcome.errors = 1;
            return outcome;
        };

        let queue: Vec<VariationPatch> = variations
            .iter()
            .filter(|v| v.stock_quantity != Some(0) || v.stock_status.as_deref() != Some("outofstock"))
            .map(|v| VariationPatch::new(v.id).with_stock(0))
            .collect();
        outcome.skipped = variations.len() - queue.len();

        self.send(sku, product_id, &queue, &mut outcome).await;
        tracing::info!(
            sku,
            updated = outcome.updated,
            skipped = outcome.skipped,
            errors = outcome.errors,
            "Entity stock zeroed"
        );
        outcome
    }

    async fn fetch(&self, sku: &str) -> Option<(u64, Vec<StoreVariation>)> {
        let product = match self.store.find_product(sku).await {
            Ok(Some(product)) => product,
            Ok(None) => {
                tracing::warn!(sku, "Entity not found in downstream store");
                return None;
            }
            Err(e) => {
                tracing::error!(sku, error = %e, "Failed to look up downstream entity");
                return None;
            }
        };
        match self.store.list_variations(product.id).await {
            Ok(variations) => Some((product.id, variations)),
            Err(e) => {
                tracing::error!(sku, product_id = product.id, error = %e, "Failed to list variations");
                None
            }
        }
    }

    /// Decide what, if anything, to send for one matched variation.
    async fn plan(
        &self,
        sku: &str,
        variation: &StoreVariation,
        size: &str,
        market: &MarketVariant,
        outcome: &mut UpdateOutcome,
    ) -> Option<VariationPatch> {
        let mut patch = VariationPatch::new(variation.id);

        if let Some(market_price) = market.price.filter(|p| *p > 0.0) {
            let breakdown = self.calculator.calculate_with_breakdown(market_price);
            let current = variation.current_price();
            let target = breakdown.final_price;

            // Compared in cents: f64 differences near 1000 fall just short of 0.01.
            if to_cents(current) != to_cents(target) {
                if let Some(swing) =
                    detect_swing(current, target, self.settings.alert_threshold_pct)
                {
                    let alert = PriceAlert {
                        sku: sku.to_string(),
                        variation_id: variation.id,
                        size_key: size.to_string(),
                        direction: swing.direction,
                        old_price: current,
                        new_price: target,
                        pct_change: (swing.pct_change * 10.0).round() / 10.0,
                        threshold_pct: self.settings.alert_threshold_pct.unwrap_or_default(),
                        breakdown: breakdown.clone(),
                    };
                    outcome.alerts += 1;
                    self.raise(alert);
                }
                tracing::debug!(
                    sku,
                    size,
                    current,
                    market_price,
                    margin_source = %breakdown.margin_source,
                    target,
                    "Price change queued"
                );
                patch = patch.with_price(round2(target));
            }
        }

        if let Some(quantity) = market.quantity.map(|q| q.max(0)) {
            if variation.stock_quantity != Some(quantity) {
                patch = patch.with_stock(quantity);
            }
        }

        (!patch.is_empty()).then_some(patch)
    }

    fn raise(&self, alert: PriceAlert) {
        if self.settings.dry_run {
            tracing::warn!(summary = %alert.summary(), "Price swing alert (dry run, not sent)");
            return;
        }
        let sink = Arc::clone(&self.alerts);
        self.alert_tasks.spawn(async move {
            if let Err(e) = sink.send(&alert).await {
                tracing::error!(sku = %alert.sku, error = %e, "Failed to deliver price alert");
            }
        });
    }

    async fn send(
        &self,
        sku: &str,
        product_id: u64,
        queue: &[VariationPatch],
        outcome: &mut UpdateOutcome,
    ) {
        for chunk in queue.chunks(self.settings.batch_size) {
            if self.settings.dry_run {
                tracing::info!(sku, product_id, items = chunk.len(), "Dry run: batch not sent");
                outcome.updated += chunk.len();
                continue;
            }
            match self.store.batch_update_variations(product_id, chunk).await {
                Ok(batch) => {
                    for failure in &batch.failed {
                        tracing::warn!(
                            sku,
                            variation_id = ?failure.id,
                            code = %failure.code,
                            message = %failure.message,
                            "Variation update rejected"
                        );
                    }
                    let unreported = chunk
                        .len()
                        .saturating_sub(batch.updated.len() + batch.failed.len());
                    outcome.updated += batch.updated.len();
                    outcome.errors += batch.failed.len() + unreported;
                }
                Err(e) => {
                    tracing::error!(sku, product_id, items = chunk.len(), error = %e, "Batch update failed");
                    outcome.errors += chunk.len();
                }
            }
        }
    }
}

impl std::fmt::Debug for PriceReconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceReconciler")
            .field("calculator", &self.calculator)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Market data for a variation: matched by its size attribute first, then
/// by the size suffix of its SKU.
fn match_variation<'a>(
    variation: &StoreVariation,
    parent_sku: &str,
    by_size: &HashMap<&str, &'a MarketVariant>,
) -> Option<(String, &'a MarketVariant)> {
    variation
        .size_attribute()
        .map(normalize_size_key)
        .into_iter()
        .chain(size_from_sku(&variation.sku, parent_sku))
        .find_map(|size| by_size.get(size.as_str()).map(|market| (size, *market)))
}

fn size_from_sku(variation_sku: &str, parent_sku: &str) -> Option<String> {
    let sku = variation_sku.trim();
    if sku.is_empty() || sku.eq_ignore_ascii_case(parent_sku) {
        return None;
    }
    SKU_SIZE_RE
        .captures(sku)
        .and_then(|caps| caps.get(1))
        .map(|m| normalize_size_key(m.as_str()))
}
