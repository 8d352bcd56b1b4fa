//! Refilter command - re-derive versions from stored snapshots.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::build_tracker;
use crate::config::Config;
use crate::tracker::LoggingListener;

/// Arguments for the refilter command.
#[derive(clap::Args)]
#[command(
    about = "Re-extract versions from the stored snapshots",
    long_about = "Apply the current declarations to the latest stored\n\
        snapshot of each document and record the result as a new version\n\
        when the extracted text changed. Nothing is fetched; use this\n\
        after changing a declaration's selectors or filters.",
    after_help = "EXAMPLES:\n    \
        termwatch refilter           Refilter all declared services\n    \
        termwatch refilter acme      Refilter only acme"
)]
pub struct Args {
    /// Service ids to refilter (all declared services when omitted)
    pub services: Vec<String>,
}

/// Executes the refilter command.
pub fn run(args: Args, config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    runtime.block_on(async {
        let mut tracker = build_tracker(&config)?;
        tracker.attach(Arc::new(LoggingListener));
        tracker.init()?;
        tracker.refilter_and_record(&args.services).await?;
        Ok(())
    })
}
