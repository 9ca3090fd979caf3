//! Tracking registry: which SKUs are subscribed to push notifications.
//!
//! The downstream store's SKU list is authoritative. [`TrackingRegistry::sync`]
//! diffs it against the persisted registry, resolves new SKUs to the feed's
//! internal ids, and grows or shrinks the single shared push subscription.
//! The registry file is read, modified and replaced as a whole under an
//! async mutex, so a push-triggered registration and a scheduled sync in
//! the same process never race on subscription creation.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use pricesync_client::{CatalogStore, MarketFeed, Pacer};
use pricesync_core::types::{Sku, Timestamp};

use crate::error::{StateError, SyncError};
use crate::persist;

pub const REGISTRY_FILE: &str = "registry.json";

// ---------------------------------------------------------------------------
// Persisted layout
// ---------------------------------------------------------------------------

/// Metadata kept per tracked SKU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedSku {
    /// The feed's internal product id.
    #[serde(default)]
    pub product_id: Option<String>,
    pub added_at: Timestamp,
}

/// On-disk registry: `{ skus: {..}, webhook_id, last_sync }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryState {
    #[serde(default)]
    pub skus: BTreeMap<Sku, TrackedSku>,
    #[serde(default)]
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub last_sync: Option<Timestamp>,
}

impl RegistryState {
    pub fn tracked(&self) -> Vec<Sku> {
        self.skus.keys().cloned().collect()
    }
}

/// Outcome of one [`TrackingRegistry::sync`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    /// SKUs newly registered with the subscription.
    pub added: Vec<Sku>,
    /// SKUs dropped from the subscription.
    pub removed: Vec<Sku>,
    pub unchanged: usize,
    /// New SKUs the feed could not resolve; retried next sync.
    pub unresolved: Vec<Sku>,
    /// Subscription steps that failed and were left for the next sync.
    pub failed_steps: usize,
}

// ---------------------------------------------------------------------------
// TrackingRegistry
// ---------------------------------------------------------------------------

pub struct TrackingRegistry {
    path: PathBuf,
    feed: Arc<dyn MarketFeed>,
    store: Arc<dyn CatalogStore>,
    pacer: Pacer,
    callback_url: Option<String>,
    lock: Mutex<()>,
}

impl TrackingRegistry {
    pub fn new(
        path: impl Into<PathBuf>,
        feed: Arc<dyn MarketFeed>,
        store: Arc<dyn CatalogStore>,
        pacer: Pacer,
    ) -> Self {
        Self {
            path: path.into(),
            feed,
            store,
            pacer,
            callback_url: None,
            lock: Mutex::new(()),
        }
    }

    /// Registry backed by `<dir>/registry.json`.
    pub fn in_dir(
        dir: impl AsRef<Path>,
        feed: Arc<dyn MarketFeed>,
        store: Arc<dyn CatalogStore>,
        pacer: Pacer,
    ) -> Self {
        Self::new(dir.as_ref().join(REGISTRY_FILE), feed, store, pacer)
    }

    /// Public URL the feed should push to; needed to create a subscription.
    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url.filter(|u| !u.trim().is_empty());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current persisted state (empty before the first sync).
    pub async fn load(&self) -> Result<RegistryState, StateError> {
        Ok(persist::read_json(&self.path).await?.unwrap_or_default())
    }

    pub async fn tracked_skus(&self) -> Result<Vec<Sku>, StateError> {
        Ok(self.load().await?.tracked())
    }

    /// Reconcile the registry with the store's SKU list.
    ///
    /// Fails only when the inventory cannot be listed or the registry file
    /// cannot be read or written; subscription call failures are counted
    /// in [`SyncReport::failed_steps`] and leave the affected SKUs as they
    /// were.
    pub async fn sync(&self) -> Result<SyncReport, SyncError> {
        let _guard = self.lock.lock().await;

        let mut state = self.load().await?;
        let current: BTreeSet<Sku> = self.store.list_skus().await?.into_iter().collect();
        let registered: BTreeSet<Sku> = state.skus.keys().cloned().collect();

        let mut report = SyncReport {
            unchanged: current.intersection(&registered).count(),
            ..SyncReport::default()
        };
        let to_add: Vec<&Sku> = current.difference(&registered).collect();
        let to_remove: Vec<&Sku> = registered.difference(&current).collect();

        // -- Added ---------------------------------------------------------
        let mut resolved: Vec<(Sku, String)> = Vec::with_capacity(to_add.len());
        for (i, sku) in to_add.iter().enumerate() {
            if i > 0 {
                self.pacer.pause().await;
            }
            match self.feed.lookup_product_id(sku).await {
                Ok(Some(product_id)) => resolved.push(((*sku).clone(), product_id)),
                Ok(None) => {
                    tracing::warn!(sku = %sku, "SKU not found at feed source, skipping");
                    report.unresolved.push((*sku).clone());
                }
                Err(e) => {
                    tracing::warn!(sku = %sku, error = %e, "Feed lookup failed, skipping");
                    report.unresolved.push((*sku).clone());
                }
            }
        }

        if !resolved.is_empty() {
            let ids: Vec<String> = resolved.iter().map(|(_, id)| id.clone()).collect();
            match self.subscribe(&mut state, &ids).await {
                Ok(()) => {
                    let now = Utc::now();
                    for (sku, product_id) in resolved {
                        report.added.push(sku.clone());
                        state.skus.insert(
                            sku,
                            TrackedSku {
                                product_id: Some(product_id),
                                added_at: now,
                            },
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(count = ids.len(), error = %e, "Failed to subscribe new SKUs");
                    report.failed_steps += 1;
                }
            }
        }

        // -- Removed -------------------------------------------------------
        if !to_remove.is_empty() {
            let ids: Vec<String> = to_remove
                .iter()
                .filter_map(|sku| state.skus.get(*sku).and_then(|t| t.product_id.clone()))
                .collect();
            match self.unsubscribe(&state, &ids).await {
                Ok(()) => {
                    for sku in to_remove {
                        state.skus.remove(sku);
                        report.removed.push(sku.clone());
                    }
                }
                Err(e) => {
                    tracing::error!(count = ids.len(), error = %e, "Failed to unsubscribe SKUs");
                    report.failed_steps += 1;
                }
            }
        }

        state.last_sync = Some(Utc::now());
        persist::write_json_atomic(&self.path, &state).await?;

        tracing::info!(
            added = report.added.len(),
            removed = report.removed.len(),
            unchanged = report.unchanged,
            unresolved = report.unresolved.len(),
            failed_steps = report.failed_steps,
            "Tracking registry synced"
        );
        Ok(report)
    }

    /// Track one SKU immediately. Returns `false` when it was already
    /// tracked or the feed does not know it.
    pub async fn register_single(&self, sku: &str) -> Result<bool, SyncError> {
        let _guard = self.lock.lock().await;

        let mut state = self.load().await?;
        if state.skus.contains_key(sku) {
            tracing::debug!(sku, "SKU already tracked");
            return Ok(false);
        }
        let Some(product_id) = self.feed.lookup_product_id(sku).await? else {
            tracing::warn!(sku, "SKU not found at feed source, not tracking");
            return Ok(false);
        };

        self.subscribe(&mut state, std::slice::from_ref(&product_id))
            .await?;
        state.skus.insert(
            sku.to_string(),
            TrackedSku {
                product_id: Some(product_id),
                added_at: Utc::now(),
            },
        );
        persist::write_json_atomic(&self.path, &state).await?;
        tracing::info!(sku, "SKU registered");
        Ok(true)
    }

    /// Stop tracking one SKU. Returns `false` when it was not tracked.
    pub async fn unregister_single(&self, sku: &str) -> Result<bool, SyncError> {
        let _guard = self.lock.lock().await;

        let mut state = self.load().await?;
        let Some(entry) = state.skus.get(sku) else {
            tracing::debug!(sku, "SKU not tracked");
            return Ok(false);
        };

        let ids: Vec<String> = entry.product_id.iter().cloned().collect();
        self.unsubscribe(&state, &ids).await?;
        state.skus.remove(sku);
        persist::write_json_atomic(&self.path, &state).await?;
        tracing::info!(sku, "SKU unregistered");
        Ok(true)
    }

    /// Append to the shared subscription, creating it on first use.
    async fn subscribe(
        &self,
        state: &mut RegistryState,
        product_ids: &[String],
    ) -> Result<(), SyncError> {
        match &state.webhook_id {
            Some(subscription_id) => {
                self.feed
                    .add_to_subscription(subscription_id, product_ids)
                    .await?;
            }
            None => {
                let callback_url = self.callback_url.as_deref().ok_or_else(|| {
                    SyncError::Config(
                        "a push callback URL is required to create a subscription".into(),
                    )
                })?;
                let subscription_id = self
                    .feed
                    .create_subscription(callback_url, product_ids)
                    .await?;
                state.webhook_id = Some(subscription_id);
            }
        }
        Ok(())
    }

    async fn unsubscribe(&self, state: &RegistryState, product_ids: &[String]) -> Result<(), SyncError> {
        if let (Some(subscription_id), false) = (&state.webhook_id, product_ids.is_empty()) {
            self.feed
                .remove_from_subscription(subscription_id, product_ids)
                .await?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for TrackingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingRegistry")
            .field("path", &self.path)
            .field("callback_url", &self.callback_url)
            .finish_non_exhaustive()
    }
}
