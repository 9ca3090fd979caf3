//! Feed-source adapter: read-only product lookups plus push-subscription
//! management.
//!
//! [`MarketFeed`] is the seam the registry and reconciliation run depend
//! on; [`FeedClient`] implements it over the feed's HTTP API.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use pricesync_core::snapshot::{EntitySnapshot, VariantSnapshot};
use pricesync_core::wire::opt_string_or_number;

use crate::api::ApiClient;
use crate::error::ApiError;
use crate::transport::Method;

/// Read access to market data and push-subscription management.
#[async_trait]
pub trait MarketFeed: Send + Sync {
    /// Current snapshot of one entity; `None` when the source does not know it.
    async fn fetch_product(&self, sku: &str) -> Result<Option<EntitySnapshot>, ApiError>;

    /// Resolve a SKU to the source's internal product id.
    async fn lookup_product_id(&self, sku: &str) -> Result<Option<String>, ApiError> {
        Ok(self
            .fetch_product(sku)
            .await?
            .and_then(|entity| entity.source_id))
    }

    /// Create a push subscription seeded with `product_ids`; returns its id.
    async fn create_subscription(
        &self,
        callback_url: &str,
        product_ids: &[String],
    ) -> Result<String, ApiError>;

    async fn add_to_subscription(
        &self,
        subscription_id: &str,
        product_ids: &[String],
    ) -> Result<(), ApiError>;

    async fn remove_from_subscription(
        &self,
        subscription_id: &str,
        product_ids: &[String],
    ) -> Result<(), ApiError>;
}

/// Push events a subscription is created for.
pub const SUBSCRIBED_EVENTS: [&str; 2] = ["price_change", "out_of_stock"];

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: T,
}

/// Product as returned by the feed's product endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedProduct {
    pub id: String,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub brand: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub variants: Vec<FeedVariant>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FeedVariant {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub size_eu: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub size: Option<String>,
    #[serde(default)]
    pub lowest_ask: Option<f64>,
    #[serde(default)]
    pub total_asks: Option<i64>,
}

impl FeedProduct {
    /// Convert to a snapshot keyed by the SKU that was asked for. Variants
    /// without a size or a positive ask are dropped; the lowest ask is the
    /// comparison price.
    pub fn into_snapshot(self, requested_sku: &str) -> EntitySnapshot {
        let variants = self
            .variants
            .into_iter()
            .filter_map(|v| {
                let size = v.size_eu.or(v.size).filter(|s| !s.trim().is_empty())?;
                let price = v.lowest_ask.filter(|p| *p > 0.0)?;
                Some(VariantSnapshot::new(size, price, v.total_asks.unwrap_or(1).max(0)))
            })
            .collect();

        if !self.sku.trim().is_empty() && self.sku != requested_sku {
            tracing::debug!(
                requested_sku,
                feed_sku = %self.sku,
                "Feed echoed a different SKU spelling"
            );
        }

        EntitySnapshot {
            id: requested_sku.to_string(),
            display_name: self.title,
            brand_name: self.brand,
            primary_image_url: self.image.filter(|url| !url.is_empty()),
            variants,
            source_id: Some(self.id),
            fetched_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Subscription {
    #[serde(deserialize_with = "required_id")]
    id: String,
}

fn required_id<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    opt_string_or_number(deserializer)?.ok_or_else(|| serde::de::Error::custom("missing id"))
}

// ---------------------------------------------------------------------------
// FeedClient
// ---------------------------------------------------------------------------

/// [`MarketFeed`] over the feed HTTP API.
#[derive(Debug, Clone)]
pub struct FeedClient {
    api: ApiClient,
    market: String,
}

impl FeedClient {
    /// `api` must carry the feed credentials; `market` is the region code.
    pub fn new(api: ApiClient, market: impl Into<String>) -> Self {
        Self {
            api,
            market: market.into(),
        }
    }

    pub fn market(&self) -> &str {
        &self.market
    }
}

#[async_trait]
impl MarketFeed for FeedClient {
    async fn fetch_product(&self, sku: &str) -> Result<Option<EntitySnapshot>, ApiError> {
        let query = [
            ("market", self.market.clone()),
            ("display[variants]", "true".to_string()),
        ];
        let path = format!("v3/stockx/products/{sku}");
        match self.api.get::<Envelope<FeedProduct>>(&path, &query).await {
            Ok(envelope) => Ok(Some(envelope.data.into_snapshot(sku))),
            Err(e) if e.is_not_found() => {
                tracing::debug!(sku, "Product not found at feed source");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn create_subscription(
        &self,
        callback_url: &str,
        product_ids: &[String],
    ) -> Result<String, ApiError> {
        let body = json!({
            "callback_url": callback_url,
            "events": SUBSCRIBED_EVENTS,
            "market": self.market,
            "product_ids": product_ids,
        });
        let created: Envelope<Subscription> = self.api.post("v3/webhooks", &body).await?;
        tracing::info!(
            subscription_id = %created.data.id,
            products = product_ids.len(),
            "Push subscription created"
        );
        Ok(created.data.id)
    }

    async fn add_to_subscription(
        &self,
        subscription_id: &str,
        product_ids: &[String],
    ) -> Result<(), ApiError> {
        let body = json!({ "product_ids": product_ids });
        self.api
            .request(
                Method::POST,
                &format!("v3/webhooks/{subscription_id}/products"),
                &[],
                Some(&body),
            )
            .await?;
        Ok(())
    }

    async fn remove_from_subscription(
        &self,
        subscription_id: &str,
        product_ids: &[String],
    ) -> Result<(), ApiError> {
        let body = json!({ "product_ids": product_ids });
        self.api
            .delete(
                &format!("v3/webhooks/{subscription_id}/products"),
                Some(&body),
            )
            .await?;
        Ok(())
    }
}
