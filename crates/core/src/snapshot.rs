//! Feed snapshot types: entities, their size variants, and the baseline
//! collection that the diff engine compares against.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::types::{Sku, Timestamp};

/// One size of an entity as observed at the feed source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSnapshot {
    /// Normalized size key (EU sizing), see [`normalize_size_key`].
    pub size_key: String,
    /// Market price (lowest ask) in the configured currency.
    pub price: f64,
    /// Units available at the source.
    #[serde(default)]
    pub available_quantity: i64,
}

impl VariantSnapshot {
    pub fn new(size_key: impl AsRef<str>, price: f64, available_quantity: i64) -> Self {
        Self {
            size_key: normalize_size_key(size_key.as_ref()),
            price,
            available_quantity,
        }
    }
}

/// A catalog entity as observed at the feed source.
///
/// Only `display_name`, `brand_name`, `primary_image_url` and the variant
/// tuples are significant for change detection. `source_id` and
/// `fetched_at` are carried for bookkeeping and never hashed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    /// Stable external SKU / style code. Empty means "no stable id".
    #[serde(default)]
    pub id: Sku,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub brand_name: String,
    #[serde(default)]
    pub primary_image_url: Option<String>,
    #[serde(default)]
    pub variants: Vec<VariantSnapshot>,
    /// The feed source's internal product identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<String>,
    /// When this snapshot was fetched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetched_at: Option<Timestamp>,
}

impl EntitySnapshot {
    /// Create an entity with only an id; the remaining fields are empty.
    pub fn new(id: impl Into<Sku>) -> Self {
        Self {
            id: id.into(),
            display_name: String::new(),
            brand_name: String::new(),
            primary_image_url: None,
            variants: Vec::new(),
            source_id: None,
            fetched_at: None,
        }
    }

    pub fn with_variant(mut self, variant: VariantSnapshot) -> Self {
        self.variants.push(variant);
        self
    }

    /// Whether this entity carries a usable identifier.
    pub fn has_stable_id(&self) -> bool {
        !self.id.trim().is_empty()
    }

    /// Copy of this entity with every variant's quantity forced to zero.
    ///
    /// Used for delisted entities so downstream reflects them as out of
    /// stock rather than deleting them.
    pub fn with_zeroed_stock(&self) -> Self {
        let mut zeroed = self.clone();
        for variant in &mut zeroed.variants {
            variant.available_quantity = 0;
        }
        zeroed
    }

    /// Variants in canonical order (size key, then price, then quantity).
    pub fn sorted_variants(&self) -> Vec<&VariantSnapshot> {
        let mut variants: Vec<&VariantSnapshot> = self.variants.iter().collect();
        variants.sort_by(|a, b| {
            a.size_key
                .cmp(&b.size_key)
                .then(a.price.total_cmp(&b.price))
                .then(a.available_quantity.cmp(&b.available_quantity))
        });
        variants
    }
}

/// Normalize a raw size label into a canonical key.
///
/// `"EU 42,5"`, `"42.5"` and `" 42.5 "` all map to `"42.5"`; `"42.0"`
/// maps to `"42"`.
pub fn normalize_size_key(raw: &str) -> String {
    let mut key = raw.trim();
    if let Some(rest) = key
        .get(..2)
        .filter(|prefix| prefix.eq_ignore_ascii_case("eu"))
        .and_then(|_| key.get(2..))
    {
        key = rest.trim_start();
    }
    let key = key.replace(',', ".");
    match key.strip_suffix(".0") {
        Some(stripped) if !stripped.is_empty() => stripped.to_string(),
        _ => key,
    }
}

// ---------------------------------------------------------------------------
// FeedBaseline
// ---------------------------------------------------------------------------

/// The last fully reconciled feed snapshot, keyed by entity id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedBaseline {
    pub entities: BTreeMap<Sku, EntitySnapshot>,
    #[serde(default)]
    pub saved_at: Option<Timestamp>,
}

impl FeedBaseline {
    /// Build a baseline from entities; entities without a stable id are dropped.
    pub fn from_entities(entities: impl IntoIterator<Item = EntitySnapshot>) -> Self {
        let entities = entities
            .into_iter()
            .filter(EntitySnapshot::has_stable_id)
            .map(|e| (e.id.clone(), e))
            .collect();
        Self {
            entities,
            saved_at: None,
        }
    }

    pub fn get(&self, id: &str) -> Option<&EntitySnapshot> {
        self.entities.get(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// A copy holding only the entities whose id is in `ids`.
    pub fn restricted_to(&self, ids: &BTreeSet<Sku>) -> Self {
        Self {
            entities: self
                .entities
                .iter()
                .filter(|(id, _)| ids.contains(*id))
                .map(|(id, e)| (id.clone(), e.clone()))
                .collect(),
            saved_at: self.saved_at,
        }
    }

    pub fn to_vec(&self) -> Vec<EntitySnapshot> {
        self.entities.values().cloned().collect()
    }
}
