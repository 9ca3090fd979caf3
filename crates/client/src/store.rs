//! Downstream commerce store adapter.
//!
//! The store is consumed as a product listing, a per-product variation
//! listing, and a `{create, update}` batch upsert endpoint whose response
//! reports success or `{ error: { code, message } }` per item.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use pricesync_core::types::Sku;
use pricesync_core::wire::{format_price, opt_string_or_number, parse_price};

use crate::api::ApiClient;
use crate::error::ApiError;

/// Hard limit on items per batch upsert call.
pub const MAX_BATCH_SIZE: usize = 100;

/// Page size used for paged listings.
const PAGE_SIZE: usize = 100;

/// Catalog operations the reconciler and registry depend on.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Every non-empty parent SKU in the store (authoritative inventory).
    async fn list_skus(&self) -> Result<Vec<Sku>, ApiError>;

    async fn find_product(&self, sku: &str) -> Result<Option<StoreProduct>, ApiError>;

    async fn list_variations(&self, product_id: u64) -> Result<Vec<StoreVariation>, ApiError>;

    /// Send at most [`MAX_BATCH_SIZE`] variation updates in one call.
    async fn batch_update_variations(
        &self,
        product_id: u64,
        patches: &[VariationPatch],
    ) -> Result<BatchOutcome, ApiError>;
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoreProduct {
    pub id: u64,
    #[serde(default)]
    pub sku: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct VariationAttribute {
    #[serde(default)]
    pub name: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub option: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StoreVariation {
    pub id: u64,
    #[serde(default)]
    pub sku: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub regular_price: Option<String>,
    #[serde(default)]
    pub stock_quantity: Option<i64>,
    #[serde(default)]
    pub stock_status: Option<String>,
    #[serde(default)]
    pub attributes: Vec<VariationAttribute>,
}

impl StoreVariation {
    /// Current selling price; 0 when unset or unparseable.
    pub fn current_price(&self) -> f64 {
        self.regular_price
            .as_deref()
            .and_then(parse_price)
            .unwrap_or(0.0)
    }

    /// The option of the first attribute whose name mentions "size".
    pub fn size_attribute(&self) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.name.to_ascii_lowercase().contains("size"))
            .and_then(|a| a.option.as_deref())
            .filter(|o| !o.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StockStatus {
    InStock,
    OutOfStock,
}

/// Partial update for one variation; unset fields are left untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VariationPatch {
    pub id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub regular_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub manage_stock: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_quantity: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stock_status: Option<StockStatus>,
}

impl VariationPatch {
    pub fn new(id: u64) -> Self {
        Self {
            id,
            regular_price: None,
            manage_stock: None,
            stock_quantity: None,
            stock_status: None,
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.regular_price = Some(format_price(price));
        self
    }

    pub fn with_stock(mut self, quantity: i64) -> Self {
        let quantity = quantity.max(0);
        self.manage_stock = Some(true);
        self.stock_quantity = Some(quantity);
        self.stock_status = Some(if quantity > 0 {
            StockStatus::InStock
        } else {
            StockStatus::OutOfStock
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.regular_price.is_none() && self.stock_quantity.is_none()
    }
}

/// Per-item failure reported inside a successful batch response.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchItemError {
    pub id: Option<u64>,
    pub code: String,
    pub message: String,
}

/// Item-level results of one batch call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchOutcome {
    pub created: Vec<u64>,
    pub updated: Vec<u64>,
    pub failed: Vec<BatchItemError>,
}

impl BatchOutcome {
    /// Split a batch response into successes and item errors.
    pub fn from_response(response: &Value) -> Self {
        let mut outcome = Self::default();
        for (key, successes) in [("create", &mut outcome.created), ("update", &mut outcome.updated)]
        {
            let items = response.get(key).and_then(Value::as_array);
            for item in items.into_iter().flatten() {
                let id = item.get("id").and_then(Value::as_u64).filter(|id| *id > 0);
                match item.get("error") {
                    Some(error) if !error.is_null() => outcome.failed.push(BatchItemError {
                        id,
                        code: error
                            .get("code")
                            .and_then(Value::as_str)
                            .unwrap_or("unknown")
                            .to_string(),
                        message: error
                            .get("message")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_string(),
                    }),
                    _ => successes.extend(id),
                }
            }
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// StoreClient
// ---------------------------------------------------------------------------

/// [`CatalogStore`] over a WooCommerce-style REST API.
#[derive(Debug, Clone)]
pub struct StoreClient {
    api: ApiClient,
}

impl StoreClient {
    /// `api` must be rooted at the REST namespace (e.g. `.../wp-json/wc/v3`)
    /// and carry the consumer credentials.
    pub fn new(api: ApiClient) -> Self {
        Self { api }
    }

    async fn get_page<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        page: usize,
        extra: &[(&str, String)],
    ) -> Result<Vec<T>, ApiError> {
        let mut query = vec![
            ("per_page", PAGE_SIZE.to_string()),
            ("page", page.to_string()),
        ];
        query.extend(extra.iter().cloned());
        self.api.get(path, &query).await
    }
}

#[derive(Debug, Deserialize)]
struct SkuRow {
    #[serde(default)]
    sku: String,
}

#[async_trait]
impl CatalogStore for StoreClient {
    async fn list_skus(&self) -> Result<Vec<Sku>, ApiError> {
        let mut skus = Vec::new();
        let mut page = 1;
        loop {
            let rows: Vec<SkuRow> = self
                .get_page("products", page, &[("_fields", "id,sku".to_string())])
                .await?;
            let fetched = rows.len();
            skus.extend(
                rows.into_iter()
                    .map(|r| r.sku.trim().to_string())
                    .filter(|s| !s.is_empty()),
            );
            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        skus.sort();
        skus.dedup();
        tracing::debug!(count = skus.len(), "Listed store SKUs");
        Ok(skus)
    }

    async fn find_product(&self, sku: &str) -> Result<Option<StoreProduct>, ApiError> {
        let products: Vec<StoreProduct> =
            self.api.get("products", &[("sku", sku.to_string())]).await?;
        Ok(products.into_iter().next())
    }

    async fn list_variations(&self, product_id: u64) -> Result<Vec<StoreVariation>, ApiError> {
        let path = format!("products/{product_id}/variations");
        let mut variations = Vec::new();
        let mut page = 1;
        loop {
            let batch: Vec<StoreVariation> = self.get_page(&path, page, &[]).await?;
            let fetched = batch.len();
            variations.extend(batch);
            if fetched < PAGE_SIZE {
                break;
            }
            page += 1;
        }
        Ok(variations)
    }

    async fn batch_update_variations(
        &self,
        product_id: u64,
        patches: &[VariationPatch],
    ) -> Result<BatchOutcome, ApiError> {
        let body = json!({ "update": patches });
        let response: Value = self
            .api
            .post(&format!("products/{product_id}/variations/batch"), &body)
            .await?;
        Ok(BatchOutcome::from_response(&response))
    }
}
