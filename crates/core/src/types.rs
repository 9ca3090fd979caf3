//! Shared primitive types and money helpers.
//!
//! Prices travel through the system as `f64` euros but every comparison
//! and rounding step is done on integer cents so results are
//! deterministic regardless of floating-point representation.

use chrono::{DateTime, Utc};

/// UTC timestamp used for persisted state.
pub type Timestamp = DateTime<Utc>;

/// Stable external identifier of an entity (SKU / style code).
pub type Sku = String;

/// Convert a price to integer cents, rounding half away from zero.
pub fn to_cents(price: f64) -> i64 {
    (price * 100.0).round() as i64
}

/// Convert integer cents back to a price.
pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Round a price to two decimal places.
pub fn round2(price: f64) -> f64 {
    from_cents(to_cents(price))
}
