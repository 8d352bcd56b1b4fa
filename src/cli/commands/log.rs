//! Log command - show the record history of one document.

use anyhow::{Context, Result};
use colored::Colorize;

use crate::config::Config;
use crate::history::History;

/// Arguments for the log command.
#[derive(clap::Args)]
#[command(
    about = "Show the recorded history of one document",
    long_about = "Lists the version commits recorded for a document,\n\
        newest first. Use --snapshots to list the raw snapshot history\n\
        instead.",
    after_help = "EXAMPLES:\n    \
        termwatch log acme \"Terms of Service\"\n    \
        termwatch log acme \"Terms of Service\" --snapshots"
)]
pub struct Args {
    /// Service id
    pub service: String,

    /// Document type, e.g. "Terms of Service"
    pub document_type: String,

    /// Show the snapshot history instead of the version history
    #[arg(long)]
    pub snapshots: bool,
}

/// Executes the log command.
pub fn run(args: Args, config: Config) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    runtime.block_on(async {
        let history = History::open(&config.history)?;
        let recorder = if args.snapshots {
            history.snapshots()
        } else {
            history.versions()
        };

        let entries = recorder.log(&args.service, &args.document_type).await?;

        if entries.is_empty() {
            println!(
                "No {} recorded for {} {}",
                if args.snapshots { "snapshots" } else { "versions" },
                args.service,
                args.document_type
            );
            return Ok(());
        }

        for entry in entries {
            let first_line = entry.message.lines().next().unwrap_or("");
            println!(
                "{}  {}  {}",
                entry.hash[..8.min(entry.hash.len())].yellow(),
                entry
                    .date
                    .format("%Y-%m-%d %H:%M:%S")
                    .to_string()
                    .dimmed(),
                first_line
            );
        }

        Ok(())
    })
}
