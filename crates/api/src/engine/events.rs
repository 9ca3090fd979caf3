//! Inbound event payloads and their translation into [`SyncCommand`]s.

use serde::Deserialize;
use serde_json::Value;

use pricesync_core::error::CoreError;
use pricesync_core::snapshot::normalize_size_key;
use pricesync_core::types::Sku;
use pricesync_core::wire::{opt_string_or_number, parse_price};
use pricesync_sync::MarketVariant;

use super::SyncCommand;

/// Push notification from the market feed.
#[derive(Debug, Deserialize)]
pub struct MarketEvent {
    pub event: String,
    #[serde(default)]
    pub product: Option<EventProduct>,
    #[serde(default)]
    pub variants: Vec<EventVariant>,
    #[serde(default)]
    pub timestamp: Option<Value>,
}

#[derive(Debug, Deserialize)]
pub struct EventProduct {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub sku: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EventVariant {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub size_eu: Option<String>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub lowest_ask: Option<String>,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Downstream catalog hook.
#[derive(Debug, Deserialize)]
pub struct CatalogEvent {
    pub event: String,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub sku: Option<String>,
}

/// Parse a market push body.
///
/// Unknown event types yield `Ok(None)`. A body that is not a JSON event,
/// or an event without a product SKU, is a validation error.
pub fn parse_market_event(body: &[u8], currency: &str) -> Result<Option<SyncCommand>, CoreError> {
    let event: MarketEvent = serde_json::from_slice(body)
        .map_err(|e| CoreError::Validation(format!("malformed event payload: {e}")))?;

    let kind = event.event.as_str();
    if kind != "price_change" && kind != "out_of_stock" {
        tracing::info!(event = kind, "Ignoring unsupported market event");
        return Ok(None);
    }

    let sku = event
        .product
        .as_ref()
        .and_then(|p| p.sku.as_deref())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::Validation("product.sku is required".into()))?
        .to_string();

    let command = if kind == "price_change" {
        SyncCommand::PriceChange {
            variants: priced_variants(&sku, &event.variants, currency),
            sku,
        }
    } else {
        let variants = event
            .variants
            .iter()
            .filter_map(|v| v.size_eu.as_deref())
            .map(|size| MarketVariant {
                size_key: normalize_size_key(size),
                price: None,
                quantity: Some(0),
            })
            .collect();
        SyncCommand::OutOfStock { sku, variants }
    };
    Ok(Some(command))
}

/// Sizes with a positive ask in the expected currency.
fn priced_variants(sku: &str, variants: &[EventVariant], currency: &str) -> Vec<MarketVariant> {
    variants
        .iter()
        .filter_map(|v| {
            let size = v.size_eu.as_deref()?;
            if let Some(actual) = v.currency.as_deref() {
                if !actual.eq_ignore_ascii_case(currency) {
                    tracing::warn!(
                        sku,
                        size,
                        currency = actual,
                        expected = currency,
                        "Skipping variant priced in unexpected currency"
                    );
                    return None;
                }
            }
            let price = v
                .lowest_ask
                .as_deref()
                .and_then(parse_price)
                .filter(|p| *p > 0.0)?;
            Some(MarketVariant::priced(size, price))
        })
        .collect()
}

/// Parse a catalog hook body. Unknown event types yield `Ok(None)`.
pub fn parse_catalog_event(body: &[u8]) -> Result<Option<SyncCommand>, CoreError> {
    let event: CatalogEvent = serde_json::from_slice(body)
        .map_err(|e| CoreError::Validation(format!("malformed event payload: {e}")))?;

    let build: fn(Sku) -> SyncCommand = match event.event.as_str() {
        "product_created" => |sku| SyncCommand::ProductCreated { sku },
        "product_deleted" => |sku| SyncCommand::ProductDeleted { sku },
        other => {
            tracing::info!(event = other, "Ignoring unsupported catalog event");
            return Ok(None);
        }
    };

    let sku = event
        .sku
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| CoreError::Validation("sku is required".into()))?;
    Ok(Some(build(sku)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn market(body: &str) -> Result<Option<SyncCommand>, CoreError> {
        parse_market_event(body.as_bytes(), "EUR")
    }

    // -- Market events -------------------------------------------------------

    #[test]
    fn price_change_keeps_positive_asks_in_currency() {
        let command = market(
            r#"{
                "event": "price_change",
                "product": {"sku": "DD1391-100", "id": "abc"},
                "variants": [
                    {"size_eu": "42", "lowest_ask": 120, "currency": "EUR"},
                    {"size_eu": "42.5", "lowest_ask": "135.50", "currency": "eur"},
                    {"size_eu": "43", "lowest_ask": 0, "currency": "EUR"},
                    {"size_eu": "44", "lowest_ask": 140, "currency": "USD"},
                    {"lowest_ask": 150, "currency": "EUR"}
                ],
                "timestamp": "2024-05-01T12:00:00Z"
            }"#,
        )
        .unwrap()
        .unwrap();

        assert_eq!(
            command,
            SyncCommand::PriceChange {
                sku: "DD1391-100".into(),
                variants: vec![
                    MarketVariant::priced("42", 120.0),
                    MarketVariant::priced("42.5", 135.5),
                ],
            }
        );
    }

    #[test]
    fn out_of_stock_lists_sizes() {
        let command = market(
            r#"{"event":"out_of_stock","product":{"sku":"DD1391-100"},"variants":[{"size_eu":"42"}]}"#,
        )
        .unwrap()
        .unwrap();
        let SyncCommand::OutOfStock { sku, variants } = command else {
            panic!("expected an out_of_stock command");
        };
        assert_eq!(sku, "DD1391-100");
        assert_eq!(variants.len(), 1);
        assert_eq!(variants[0].price, None);
        assert_eq!(variants[0].quantity, Some(0));
    }

    #[test]
    fn out_of_stock_without_variants_covers_entity() {
        let command = market(r#"{"event":"out_of_stock","product":{"sku":"DD1391-100"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            command,
            SyncCommand::OutOfStock {
                sku: "DD1391-100".into(),
                variants: Vec::new(),
            }
        );
    }

    #[test]
    fn unknown_market_event_is_ignored() {
        assert_matches!(market(r#"{"event":"listing_created","product":{"sku":"X"}}"#), Ok(None));
    }

    #[test]
    fn missing_sku_is_rejected() {
        assert_matches!(
            market(r#"{"event":"price_change","product":{"id":"abc"}}"#),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            market(r#"{"event":"price_change","product":{"sku":"  "}}"#),
            Err(CoreError::Validation(_))
        );
        assert_matches!(market("not json"), Err(CoreError::Validation(_)));
    }

    // -- Catalog events ------------------------------------------------------

    #[test]
    fn catalog_events() {
        let created = parse_catalog_event(br#"{"event":"product_created","sku":"FQ8080-133"}"#);
        assert_matches!(created, Ok(Some(SyncCommand::ProductCreated { sku })) if sku == "FQ8080-133");

        let deleted = parse_catalog_event(br#"{"event":"product_deleted","sku":"FQ8080-133"}"#);
        assert_matches!(deleted, Ok(Some(SyncCommand::ProductDeleted { .. })));

        assert_matches!(parse_catalog_event(br#"{"event":"product_updated","sku":"X"}"#), Ok(None));
        assert_matches!(
            parse_catalog_event(br#"{"event":"product_created"}"#),
            Err(CoreError::Validation(_))
        );
    }
}
