//! Durable home of the [`FeedBaseline`].
//!
//! The baseline is only ever replaced as a whole, after a reconciliation
//! run completes; nothing patches it in place.

use std::path::{Path, PathBuf};

use chrono::Utc;
use pricesync_core::snapshot::FeedBaseline;

use crate::error::StateError;
use crate::persist;

pub const BASELINE_FILE: &str = "baseline.json";

#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store backed by `<dir>/baseline.json`.
    pub fn in_dir(dir: impl AsRef<Path>) -> Self {
        Self::new(dir.as_ref().join(BASELINE_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The last committed baseline; `None` before the first run.
    pub async fn load(&self) -> Result<Option<FeedBaseline>, StateError> {
        persist::read_json(&self.path).await
    }

    /// Atomically replace the stored baseline, stamping `saved_at`.
    pub async fn replace(&self, mut baseline: FeedBaseline) -> Result<FeedBaseline, StateError> {
        baseline.saved_at = Some(Utc::now());
        persist::write_json_atomic(&self.path, &baseline).await?;
        tracing::info!(
            entities = baseline.len(),
            path = %self.path.display(),
            "Baseline replaced"
        );
        Ok(baseline)
    }
}
