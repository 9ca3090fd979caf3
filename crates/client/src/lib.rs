//! Outbound HTTP clients for the feed source and the commerce store.
//!
//! Every remote call goes through [`api::ApiClient`], which owns the retry
//! policy; the feed and store adapters only shape requests and responses.

pub mod api;
pub mod clock;
pub mod error;
pub mod feed;
pub mod store;
pub mod transport;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use api::{ApiClient, RetryPolicy};
pub use clock::{Clock, Pacer, TokioClock};
pub use error::ApiError;
pub use feed::{FeedClient, MarketFeed};
pub use store::{
    BatchItemError, BatchOutcome, CatalogStore, StoreClient, StoreProduct, StoreVariation,
    VariationPatch,
};
pub use transport::{Auth, ReqwestTransport, Transport, TransportError};
