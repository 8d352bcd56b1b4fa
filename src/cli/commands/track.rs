//! Track command - fetch and record every declared document.

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::cli::build_tracker;
use crate::config::Config;
use crate::tracker::LoggingListener;

/// Arguments for the track command.
#[derive(clap::Args)]
#[command(
    about = "Fetch the declared documents and record changed ones",
    long_about = "Fetch every declared document of the given services,\n\
        record changed pages as snapshots, extract the legal text, and\n\
        record changed text as versions. With no service ids, tracks\n\
        every declared service.",
    after_help = "EXAMPLES:\n    \
        termwatch track              Track all declared services\n    \
        termwatch track acme beta    Track only acme and beta"
)]
pub struct Args {
    /// Service ids to track (all declared services when omitted)
    pub services: Vec<String>,
}

/// Executes the track command.
pub fn run(args: Args, config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    runtime.block_on(async {
        let mut tracker = build_tracker(&config)?;
        tracker.attach(Arc::new(LoggingListener));
        tracker.init()?;
        tracker.track_changes(&args.services).await?;
        Ok(())
    })
}
