use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use termwatch::cli::commands;
use termwatch::config::{Config, DEFAULT_CONFIG_FILE};

/// The main CLI command line interface.
#[derive(Parser)]
#[command(name = "termwatch")]
#[command(version)]
#[command(about = "Track the evolution of online services' legal documents")]
#[command(long_about = "Termwatch periodically captures Terms of Service, Privacy\n\
    Policies and similar documents, archiving the raw pages and the\n\
    extracted legal text in two git repositories. Every observed change\n\
    is a commit, so document history stays queryable forever.")]
#[command(after_help = "EXAMPLES:\n    \
    termwatch track                     Track all declared services\n    \
    termwatch track acme                Track a single service\n    \
    termwatch refilter                  Re-extract versions from snapshots\n    \
    termwatch services                  List declared services\n    \
    termwatch log acme \"Terms of Service\"   Show a document's history\n\n\
    For more information about a command, run 'termwatch <command> --help'.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Enable verbose output for debugging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Fetch the declared documents and record changed ones
    Track(commands::track::Args),

    /// Re-extract versions from the stored snapshots
    Refilter(commands::refilter::Args),

    /// List declared services and their tracked documents
    Services(commands::services::Args),

    /// Show the recorded history of one document
    Log(commands::log::Args),
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "termwatch=debug"
    } else {
        "termwatch=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let config = Config::load_from_path(&cli.config)?;

    match cli.command {
        Commands::Track(args) => commands::track::run(args, config),
        Commands::Refilter(args) => commands::refilter::run(args, config),
        Commands::Services(args) => commands::services::run(args, config),
        Commands::Log(args) => commands::log::run(args, config),
    }
}
