//! Content signatures for change detection.
//!
//! A signature is the SHA-256 hex digest of the significant subset of an
//! [`EntitySnapshot`]: name, brand, image URL and the variant tuples
//! `(size_key, price_cents, quantity)` in canonical order. Volatile
//! fields (`source_id`, `fetched_at`) never participate.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::snapshot::EntitySnapshot;
use crate::types::to_cents;

/// Deterministic content hash of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Signature(String);

impl Signature {
    /// Compute the signature of an entity.
    pub fn of(entity: &EntitySnapshot) -> Self {
        let variants: Vec<serde_json::Value> = entity
            .sorted_variants()
            .into_iter()
            .map(|v| serde_json::json!([v.size_key, to_cents(v.price), v.available_quantity]))
            .collect();

        let canonical = serde_json::json!({
            "name": entity.display_name.trim(),
            "brand": entity.brand_name.trim(),
            "image": entity.primary_image_url.as_deref().unwrap_or("").trim(),
            "variants": variants,
        });

        Self(sha256_hex(canonical.to_string().as_bytes()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Signature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}
