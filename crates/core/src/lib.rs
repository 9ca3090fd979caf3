//! Pure domain logic for catalog price synchronisation.
//!
//! Nothing in this crate performs I/O:
//!
//! - [`snapshot`]: feed entities, size variants, and the saved baseline.
//! - [`signature`]: order-independent content hashes.
//! - [`diff`]: new / updated / removed classification.
//! - [`pricing`]: margin tiers, floor, and rounding.
//! - [`alert`]: anomaly detection for large price swings.
//! - [`signing`]: HMAC verification of push notifications.
//! - [`wire`]: serde helpers for loosely typed remote payloads.

pub mod alert;
pub mod diff;
pub mod error;
pub mod pricing;
pub mod signature;
pub mod signing;
pub mod snapshot;
pub mod types;
pub mod wire;

pub use diff::{diff, DiffAction, DiffOptions, DiffResult, TaggedEntity};
pub use error::CoreError;
pub use pricing::{MarginCalculator, MarginConfig, MarginTier, PriceBreakdown, RoundingMode};
pub use signature::Signature;
pub use snapshot::{EntitySnapshot, FeedBaseline, VariantSnapshot};
