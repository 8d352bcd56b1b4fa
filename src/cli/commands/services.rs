//! Services command - list the declared services and their documents.

use anyhow::Result;
use colored::Colorize;

use crate::config::Config;
use crate::declarations::load_service_declarations;

/// Arguments for the services command.
#[derive(clap::Args)]
#[command(
    about = "List declared services and their tracked documents",
    long_about = "Reads the declarations directory and prints each\n\
        service with the documents tracked for it and their fetch\n\
        locations."
)]
pub struct Args {}

/// Executes the services command.
pub fn run(_args: Args, config: Config) -> Result<()> {
    let services = load_service_declarations(&config.declarations_path)?;

    if services.is_empty() {
        println!(
            "No service declarations found in {}",
            config.declarations_path.display()
        );
        return Ok(());
    }

    for service in services.values() {
        println!(
            "{} {}",
            service.id.bold(),
            format!("({})", service.name).dimmed()
        );
        for (document_type, declaration) in &service.documents {
            println!(
                "  {}  {}",
                document_type.cyan(),
                declaration.location.dimmed()
            );
        }
    }

    Ok(())
}
