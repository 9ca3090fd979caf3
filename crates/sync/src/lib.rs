//! Stateful synchronisation: snapshot store, tracking registry, price
//! reconciler, alert delivery, and the poll-path reconciliation run.

pub mod alerts;
pub mod error;
pub mod persist;
pub mod reconciler;
pub mod registry;
pub mod run;
pub mod snapshot_store;

#[cfg(test)]
pub(crate) mod testing;

pub use alerts::{AlertDestination, AlertSink, EmailConfig};
pub use error::{StateError, SyncError};
pub use reconciler::{MarketVariant, PriceReconciler, ReconcilerSettings, UpdateOutcome};
pub use registry::{SyncReport, TrackingRegistry};
pub use run::{Reconciliation, RunOptions, RunSummary};
pub use snapshot_store::SnapshotStore;
