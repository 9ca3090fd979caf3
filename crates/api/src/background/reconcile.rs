//! Periodic poll-path reconciliation.
//!
//! Runs a full [`Reconciliation`] on a fixed interval as a safety net for
//! missed push events. A run that fails fatally is logged and retried on
//! the next tick.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use pricesync_sync::{Reconciliation, RunOptions};

/// Run the reconciliation loop until `cancel` is triggered.
///
/// The first run starts one full `period` after startup.
pub async fn run(reconciliation: Arc<Reconciliation>, period: Duration, cancel: CancellationToken) {
    tracing::info!(interval_secs = period.as_secs(), "Reconciliation job started");

    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at(start, period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconciliation job stopping");
                break;
            }
            _ = interval.tick() => {
                match reconciliation.run(&RunOptions::default()).await {
                    Ok(summary) => {
                        tracing::info!(summary = %summary.line(), "Scheduled reconciliation finished");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Scheduled reconciliation failed");
                    }
                }
            }
        }
    }
}
