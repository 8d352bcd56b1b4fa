//! Command-line interface.
//!
//! Each submodule under `commands` implements a single CLI command with
//! its argument parsing and execution logic.

use anyhow::Result;
use std::sync::Arc;

use crate::config::Config;
use crate::fetcher::HttpFetcher;
use crate::history::History;
use crate::tracker::Tracker;

pub mod commands;

/// Builds an engine from the loaded configuration, with the HTTP
/// fetcher wired in.
pub(crate) fn build_tracker(config: &Config) -> Result<Tracker> {
    let history = History::open(&config.history)?;
    let fetcher = Arc::new(HttpFetcher::new()?);
    Ok(Tracker::new(
        config.declarations_path.clone(),
        history,
        fetcher,
    ))
}
