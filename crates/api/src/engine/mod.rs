//! Work triggered by inbound events.
//!
//! Routes translate payloads into [`SyncCommand`]s and hand them to an
//! [`EventHandler`] after acknowledging the request.

pub mod dispatcher;
pub mod events;

use async_trait::async_trait;

use pricesync_core::types::Sku;
use pricesync_sync::MarketVariant;

pub use dispatcher::SyncDispatcher;

/// One unit of downstream work derived from an inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncCommand {
    /// Re-price the listed sizes of an entity.
    PriceChange { sku: Sku, variants: Vec<MarketVariant> },
    /// Zero stock for the listed sizes, or for the whole entity when empty.
    OutOfStock { sku: Sku, variants: Vec<MarketVariant> },
    /// A product appeared in the downstream catalog.
    ProductCreated { sku: Sku },
    /// A product was removed from the downstream catalog.
    ProductDeleted { sku: Sku },
}

impl SyncCommand {
    pub fn sku(&self) -> &str {
        match self {
            Self::PriceChange { sku, .. }
            | Self::OutOfStock { sku, .. }
            | Self::ProductCreated { sku }
            | Self::ProductDeleted { sku } => sku,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::PriceChange { .. } => "price_change",
            Self::OutOfStock { .. } => "out_of_stock",
            Self::ProductCreated { .. } => "product_created",
            Self::ProductDeleted { .. } => "product_deleted",
        }
    }
}

/// Executes commands. Failures are logged by the implementation; the
/// sender has already acknowledged the event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, command: SyncCommand);
}
