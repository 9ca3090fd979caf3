//! Poll-path reconciliation: registry sync, feed fetch, diff, update, commit.
//!
//! The baseline and registry files are loaded before any remote call so a
//! malformed file aborts the run cleanly. The new baseline is written once,
//! after every entity has been processed, and only for complete runs.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use pricesync_client::{MarketFeed, Pacer};
use pricesync_core::diff::{diff, DiffAction, DiffOptions, TaggedEntity};
use pricesync_core::snapshot::{EntitySnapshot, FeedBaseline};
use pricesync_core::types::Sku;

use crate::error::SyncError;
use crate::reconciler::{MarketVariant, PriceReconciler, UpdateOutcome};
use crate::registry::{SyncReport, TrackingRegistry};
use crate::snapshot_store::SnapshotStore;

/// Switches for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Compute everything, write nothing (downstream or local).
    pub dry_run: bool,
    /// Reconcile this SKU only.
    pub sku: Option<Sku>,
    /// Reconcile at most this many SKUs.
    pub limit: Option<usize>,
    /// Price-only pass: leave the tracking registry alone.
    pub skip_registry: bool,
    /// Treat every fetched entity as new.
    pub force_full: bool,
}

impl RunOptions {
    /// Whether the run covers only part of the tracked set.
    pub fn is_partial(&self) -> bool {
        self.sku.is_some() || self.limit.is_some()
    }
}

/// Everything a run did, reported as counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub registry: Option<SyncReport>,
    pub registry_error: Option<String>,
    pub checked: usize,
    pub added: usize,
    pub updated: usize,
    pub removed: usize,
    pub unchanged: usize,
    pub skipped_without_id: usize,
    pub missing_at_source: usize,
    pub fetch_errors: usize,
    pub variations: UpdateOutcome,
    pub baseline_committed: bool,
}

impl RunSummary {
    /// Total errored items: failed fetches plus failed variation updates.
    pub fn error_count(&self) -> usize {
        self.fetch_errors + self.variations.errors
    }

    /// One-line human summary for logs and the CLI.
    pub fn line(&self) -> String {
        let created = self.registry.as_ref().map_or(0, |r| r.added.len());
        format!(
            "checked={} created={} new={} updated={} removed={} unchanged={} \
             variations_updated={} variations_skipped={} errors={} alerts={} baseline={}",
            self.checked,
            created,
            self.added,
            self.updated,
            self.removed,
            self.unchanged,
            self.variations.updated,
            self.variations.skipped,
            self.error_count(),
            self.variations.alerts,
            if self.baseline_committed { "saved" } else { "kept" },
        )
    }
}

// ---------------------------------------------------------------------------
// Reconciliation
// ---------------------------------------------------------------------------

/// The components one run drives.
pub struct Reconciliation {
    feed: Arc<dyn MarketFeed>,
    registry: Arc<TrackingRegistry>,
    reconciler: PriceReconciler,
    snapshots: SnapshotStore,
    pacer: Pacer,
}

impl Reconciliation {
    pub fn new(
        feed: Arc<dyn MarketFeed>,
        registry: Arc<TrackingRegistry>,
        reconciler: PriceReconciler,
        snapshots: SnapshotStore,
        pacer: Pacer,
    ) -> Self {
        Self {
            feed,
            registry,
            reconciler,
            snapshots,
            pacer,
        }
    }

    /// Execute one run.
    ///
    /// Returns `Err` only for fatal errors (malformed state, unreadable or
    /// unwritable state files, malformed feed data); everything else is
    /// counted in the summary.
    pub async fn run(&self, options: &RunOptions) -> Result<RunSummary, SyncError> {
        let baseline = self.snapshots.load().await?;
        let registry_state = self.registry.load().await?;
        let mut summary = RunSummary::default();

        tracing::info!(
            dry_run = options.dry_run,
            sku = ?options.sku,
            limit = ?options.limit,
            skip_registry = options.skip_registry,
            force_full = options.force_full,
            baseline = baseline.as_ref().map_or(0, FeedBaseline::len),
            "Reconciliation started"
        );

        // -- Registry ------------------------------------------------------
        let mut tracked = registry_state.tracked();
        let sync_registry = !options.skip_registry && options.sku.is_none() && !options.dry_run;
        if sync_registry {
            match self.registry.sync().await {
                Ok(report) => {
                    tracked = self.registry.tracked_skus().await?;
                    summary.registry = Some(report);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::error!(error = %e, "Registry sync failed, using persisted SKU set");
                    summary.registry_error = Some(e.to_string());
                }
            }
        }

        // -- Selection -----------------------------------------------------
        let mut selected: Vec<Sku> = match &options.sku {
            Some(sku) => vec![sku.clone()],
            None => {
                tracked.sort();
                tracked
            }
        };
        if let Some(limit) = options.limit {
            selected.truncate(limit);
        }
        let selected_set: BTreeSet<Sku> = selected.iter().cloned().collect();

        // -- Fetch ---------------------------------------------------------
        let mut current: Vec<EntitySnapshot> = Vec::with_capacity(selected.len());
        let mut carried: BTreeSet<Sku> = BTreeSet::new();
        for (i, sku) in selected.iter().enumerate() {
            if i > 0 {
                self.pacer.pause().await;
            }
            summary.checked += 1;
            match self.feed.fetch_product(sku).await {
                Ok(Some(entity)) => current.push(entity),
                Ok(None) => {
                    tracing::warn!(sku = %sku, "Tracked SKU not found at feed source");
                    summary.missing_at_source += 1;
                }
                Err(e) => {
                    tracing::error!(sku = %sku, error = %e, "Feed fetch failed");
                    summary.fetch_errors += 1;
                    carried.insert(sku.clone());
                }
            }
        }

        // Failed fetches carry their baseline entry forward untouched, so
        // they are neither removed now nor treated as new later.
        if let Some(previous) = &baseline {
            current.extend(
                carried
                    .iter()
                    .filter_map(|sku| previous.get(sku).cloned()),
            );
        }

        // -- Diff ----------------------------------------------------------
        let scoped = baseline.as_ref().map(|b| b.restricted_to(&selected_set));
        let result = diff(
            &current,
            scoped.as_ref(),
            DiffOptions {
                force_full: options.force_full,
            },
        )?;
        summary.added = result.added.len();
        summary.updated = result.updated.len();
        summary.removed = result.removed.len();
        summary.unchanged = result.unchanged_count;
        summary.skipped_without_id = result.skipped_without_id;

        // -- Update --------------------------------------------------------
        let reconciler = if options.dry_run {
            self.reconciler.as_dry_run()
        } else {
            self.reconciler.clone()
        };
        let mut failed: BTreeSet<Sku> = BTreeSet::new();
        for tagged in result.changed() {
            let entity = &tagged.entity;
            let outcome = match tagged.action {
                DiffAction::New | DiffAction::Updated => {
                    reconciler
                        .update_prices(&entity.id, &MarketVariant::from_entity(entity))
                        .await
                }
                DiffAction::Removed => reconciler.zero_stock(&entity.id).await,
            };
            if outcome.errors > 0 {
                failed.insert(entity.id.clone());
            }
            summary.variations += outcome;
        }
        reconciler.flush_alerts().await;

        // -- Commit --------------------------------------------------------
        if options.dry_run || options.is_partial() {
            tracing::info!("Partial or dry run, baseline left unchanged");
        } else {
            let next = next_baseline(baseline.as_ref(), &current, &result.removed, &failed);
            self.snapshots.replace(next).await?;
            summary.baseline_committed = true;
        }

        tracing::info!(summary = %summary.line(), "Reconciliation finished");
        Ok(summary)
    }
}

/// The baseline to commit after a run.
///
/// Every fetched entity is included except those whose update hit errors,
/// which keep their previous entry (or stay absent if new) so the next run
/// retries them. Removed entities stay only if zeroing them failed.
fn next_baseline(
    previous: Option<&FeedBaseline>,
    current: &[EntitySnapshot],
    removed: &[TaggedEntity],
    failed: &BTreeSet<Sku>,
) -> FeedBaseline {
    let previous_entry = |id: &str| previous.and_then(|b| b.get(id)).cloned();

    let mut entities: BTreeMap<Sku, EntitySnapshot> = BTreeMap::new();
    for entity in current.iter().filter(|e| e.has_stable_id()) {
        let kept = if failed.contains(&entity.id) {
            previous_entry(&entity.id)
        } else {
            Some(entity.clone())
        };
        if let Some(kept) = kept {
            entities.insert(kept.id.clone(), kept);
        }
    }
    for tagged in removed.iter().filter(|t| failed.contains(&t.entity.id)) {
        if let Some(kept) = previous_entry(&tagged.entity.id) {
            entities.insert(kept.id.clone(), kept);
        }
    }

    FeedBaseline {
        entities,
        saved_at: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconciler::ReconcilerSettings;
    use crate::testing::{feed_product, recording_pacer, variation, FakeFeed, FakeStore, RecordingSink};
    use pricesync_core::pricing::{MarginCalculator, MarginConfig};

    struct Fixture {
        _dir: tempfile::TempDir,
        feed: Arc<FakeFeed>,
        store: Arc<FakeStore>,
        snapshots: SnapshotStore,
        registry: Arc<TrackingRegistry>,
        run: Reconciliation,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let feed = Arc::new(FakeFeed::default());
        let store = Arc::new(FakeStore::default());
        let (pacer, _) = recording_pacer();
        let registry = Arc::new(
            TrackingRegistry::in_dir(dir.path(), feed.clone(), store.clone(), pacer.clone())
                .with_callback_url(Some("https://shop.example/hook".into())),
        );
        let reconciler = PriceReconciler::new(
            store.clone(),
            MarginCalculator::new(MarginConfig::flat(25.0).unwrap()),
            Arc::new(RecordingSink::default()),
            ReconcilerSettings::default(),
        );
        let snapshots = SnapshotStore::in_dir(dir.path());
        let run = Reconciliation::new(
            feed.clone(),
            registry.clone(),
            reconciler,
            snapshots.clone(),
            pacer,
        );
        Fixture {
            _dir: dir,
            feed,
            store,
            snapshots,
            registry,
            run,
        }
    }

    /// A SKU present in both feed and store, with sizes 42 and 43.
    fn list(fx: &Fixture, sku: &str, product_id: u64, price: f64) {
        fx.feed
            .put(feed_product(sku, &[("42", price, 2), ("43", price, 1)]));
        fx.store.add_product(
            sku,
            product_id,
            vec![
                variation(product_id * 10, &format!("{sku}-42"), Some("42"), "", 0),
                variation(product_id * 10 + 1, &format!("{sku}-43"), Some("43"), "", 0),
            ],
        );
    }

    // -- Full runs ---------------------------------------------------------

    #[tokio::test]
    async fn first_run_registers_updates_and_commits() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        list(&fx, "B", 2, 120.0);

        let summary = fx.run.run(&RunOptions::default()).await.unwrap();
        assert_eq!(summary.registry.as_ref().unwrap().added, vec!["A", "B"]);
        assert_eq!(summary.checked, 2);
        assert_eq!(summary.added, 2);
        assert_eq!(summary.variations.updated, 4);
        assert_eq!(summary.error_count(), 0);
        assert!(summary.baseline_committed);

        let v = fx.store.variation("A", 10).unwrap();
        assert_eq!(v.regular_price.as_deref(), Some("100.00"));
        assert_eq!(v.stock_quantity, Some(2));

        let baseline = fx.snapshots.load().await.unwrap().unwrap();
        assert_eq!(baseline.len(), 2);
    }

    #[tokio::test]
    async fn unchanged_second_run_sends_nothing() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        fx.run.run(&RunOptions::default()).await.unwrap();
        let batches = fx.store.batches().len();

        let summary = fx.run.run(&RunOptions::default()).await.unwrap();
        assert_eq!(summary.unchanged, 1);
        assert_eq!(summary.variations.updated, 0);
        assert_eq!(fx.store.batches().len(), batches);
    }

    #[tokio::test]
    async fn delisted_entity_is_zeroed_and_dropped() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        list(&fx, "B", 2, 80.0);
        fx.run.run(&RunOptions::default()).await.unwrap();

        fx.feed.delist("B");
        let summary = fx.run.run(&RunOptions::default()).await.unwrap();
        assert_eq!(summary.missing_at_source, 1);
        assert_eq!(summary.removed, 1);
        assert_eq!(fx.store.variation("B", 20).unwrap().stock_quantity, Some(0));

        let baseline = fx.snapshots.load().await.unwrap().unwrap();
        assert!(baseline.get("B").is_none());
        assert!(baseline.get("A").is_some());
    }

    #[tokio::test]
    async fn fetch_failure_carries_baseline_forward() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        fx.run.run(&RunOptions::default()).await.unwrap();
        let before = fx.snapshots.load().await.unwrap().unwrap();

        fx.feed.fail_fetch("A");
        let summary = fx.run.run(&RunOptions::default()).await.unwrap();
        assert_eq!(summary.fetch_errors, 1);
        assert_eq!(summary.removed, 0);
        assert_eq!(summary.unchanged, 1);

        let after = fx.snapshots.load().await.unwrap().unwrap();
        assert_eq!(after.get("A"), before.get("A"));
    }

    #[tokio::test]
    async fn failed_updates_are_retried_next_run() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        fx.store.reject(10);

        let summary = fx.run.run(&RunOptions::default()).await.unwrap();
        assert_eq!(summary.variations.errors, 1);
        let baseline = fx.snapshots.load().await.unwrap().unwrap();
        assert!(baseline.get("A").is_none());

        // Still new next time, so the rejected variation is retried.
        let summary = fx.run.run(&RunOptions::default()).await.unwrap();
        assert_eq!(summary.added, 1);
    }

    #[tokio::test]
    async fn registry_failure_falls_back_to_persisted_set() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        fx.registry.sync().await.unwrap();
        fx.store.fail_listing(true);

        let summary = fx.run.run(&RunOptions::default()).await.unwrap();
        assert!(summary.registry_error.is_some());
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.variations.updated, 2);
    }

    // -- Partial and dry runs ----------------------------------------------

    #[tokio::test]
    async fn single_sku_run_never_commits() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        list(&fx, "B", 2, 80.0);

        let options = RunOptions {
            sku: Some("B".into()),
            ..RunOptions::default()
        };
        let summary = fx.run.run(&options).await.unwrap();
        assert!(summary.registry.is_none());
        assert_eq!(summary.checked, 1);
        assert_eq!(summary.added, 1);
        assert!(!summary.baseline_committed);
        assert!(fx.snapshots.load().await.unwrap().is_none());
        assert_eq!(fx.feed.fetch_count(), 1);
    }

    #[tokio::test]
    async fn limit_truncates_sorted_selection() {
        let fx = fixture();
        for (i, sku) in ["C", "A", "B"].iter().enumerate() {
            list(&fx, sku, i as u64 + 1, 80.0);
        }
        let options = RunOptions {
            limit: Some(2),
            ..RunOptions::default()
        };
        let summary = fx.run.run(&options).await.unwrap();
        assert_eq!(summary.checked, 2);
        assert_eq!(fx.store.variation("C", 10).unwrap().regular_price.as_deref(), Some(""));
        assert!(!summary.baseline_committed);
    }

    #[tokio::test]
    async fn dry_run_writes_nothing() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        fx.registry.sync().await.unwrap();
        let registry_before = fx.registry.load().await.unwrap();

        let options = RunOptions {
            dry_run: true,
            ..RunOptions::default()
        };
        let summary = fx.run.run(&options).await.unwrap();
        assert_eq!(summary.variations.updated, 2);
        assert!(fx.store.batches().is_empty());
        assert!(fx.snapshots.load().await.unwrap().is_none());
        assert_eq!(fx.registry.load().await.unwrap(), registry_before);
    }

    #[tokio::test]
    async fn force_full_reprocesses_everything() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        fx.run.run(&RunOptions::default()).await.unwrap();

        let options = RunOptions {
            force_full: true,
            ..RunOptions::default()
        };
        let summary = fx.run.run(&options).await.unwrap();
        assert_eq!(summary.added, 1);
        assert_eq!(summary.unchanged, 0);
        // Downstream already matches, so the update is skipped per variation.
        assert_eq!(summary.variations.updated, 0);
        assert_eq!(summary.variations.skipped, 2);
    }

    // -- Fatal errors ------------------------------------------------------

    #[tokio::test]
    async fn malformed_baseline_aborts_before_remote_calls() {
        let fx = fixture();
        list(&fx, "A", 1, 80.0);
        tokio::fs::write(fx.snapshots.path(), "not json").await.unwrap();

        let err = fx.run.run(&RunOptions::default()).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(fx.feed.fetch_count(), 0);
        assert!(fx.store.batches().is_empty());
    }

    #[test]
    fn summary_line_mentions_counts() {
        let summary = RunSummary {
            checked: 3,
            updated: 1,
            ..RunSummary::default()
        };
        let line = summary.line();
        assert!(line.contains("checked=3"));
        assert!(line.contains("updated=1"));
        assert!(line.contains("baseline=kept"));
    }
}
