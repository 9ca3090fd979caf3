//! Time seam for backoff delays and request pacing.
//!
//! Every wait in the client goes through a [`Clock`] so retry schedules
//! and pacing can be asserted without real sleeps.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

/// Source of delays.
#[async_trait]
pub trait Clock: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Production clock backed by `tokio::time::sleep`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Default minimum gap between sequential calls to rate-limited APIs.
pub const DEFAULT_PACING: Duration = Duration::from_millis(200);

/// Fixed inter-call delay for sequential remote loops.
///
/// Loops call [`Pacer::pause`] between consecutive calls, never before
/// the first one.
#[derive(Clone)]
pub struct Pacer {
    min_interval: Duration,
    clock: Arc<dyn Clock>,
}

impl Pacer {
    pub fn new(min_interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            min_interval,
            clock,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait out the pacing interval (no-op when the interval is zero).
    pub async fn pause(&self) {
        if !self.min_interval.is_zero() {
            self.clock.sleep(self.min_interval).await;
        }
    }
}

impl std::fmt::Debug for Pacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pacer")
            .field("min_interval", &self.min_interval)
            .finish_non_exhaustive()
    }
}
