//! One-shot poll reconciliation: sync the tracking registry, diff the feed
//! against the last baseline and push price and stock changes downstream.
//!
//! Exits zero once the run completes, even when individual items failed;
//! non-zero only on a fatal or configuration error.

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use pricesync_api::config::AppConfig;
use pricesync_api::services::Services;
use pricesync_api::telemetry;
use pricesync_sync::{RunOptions, RunSummary};

#[derive(Parser, Debug)]
#[command(
    name = "reconcile",
    about = "Reconcile downstream prices and stock with the market feed"
)]
struct Cli {
    /// Compute and log every change without writing anything.
    #[arg(long)]
    dry_run: bool,

    /// Debug-level logging (ignored when RUST_LOG is set).
    #[arg(short, long)]
    verbose: bool,

    /// Reconcile a single SKU.
    #[arg(long)]
    sku: Option<String>,

    /// Reconcile at most this many tracked SKUs.
    #[arg(long)]
    limit: Option<usize>,

    /// Leave the tracking registry untouched.
    #[arg(long)]
    skip_registry: bool,

    /// Treat every fetched entity as new, ignoring the baseline.
    #[arg(long)]
    force_full: bool,
}

impl Cli {
    fn options(&self) -> RunOptions {
        RunOptions {
            dry_run: self.dry_run,
            sku: self
                .sku
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            limit: self.limit,
            skip_registry: self.skip_registry,
            force_full: self.force_full,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    telemetry::init(if cli.verbose {
        telemetry::VERBOSE_FILTER
    } else {
        telemetry::DEFAULT_FILTER
    });

    match run(&cli).await {
        Ok(summary) => {
            println!("{}", summary.line());
            if summary.error_count() > 0 {
                tracing::warn!(errors = summary.error_count(), "Run completed with item errors");
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = ?e, "Reconciliation aborted");
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<RunSummary> {
    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Services::build(&config).context("failed to build services")?;

    let options = cli.options();
    tracing::info!(?options, "Starting reconciliation");
    services
        .reconciliation
        .run(&options)
        .await
        .context("reconciliation failed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_run_options() {
        let cli = Cli::parse_from([
            "reconcile",
            "--dry-run",
            "--sku",
            " DD1391-100 ",
            "--limit",
            "5",
            "--skip-registry",
            "--force-full",
            "-v",
        ]);
        assert!(cli.verbose);
        assert_eq!(
            cli.options(),
            RunOptions {
                dry_run: true,
                sku: Some("DD1391-100".into()),
                limit: Some(5),
                skip_registry: true,
                force_full: true,
            }
        );
    }

    #[test]
    fn defaults_run_everything() {
        let cli = Cli::parse_from(["reconcile"]);
        assert_eq!(cli.options(), RunOptions::default());
    }
}
