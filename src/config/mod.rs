//! Configuration management.
//!
//! Handles loading and saving the tracker configuration from a
//! project-local `termwatch.toml`. The configuration names the service
//! declarations directory, the two archive working directories, and the
//! publication settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "termwatch.toml";

/// Tracker configuration settings.
///
/// Resolved once at startup and treated as immutable for the rest of the
/// run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Directory holding one JSON declaration file per tracked service.
    pub declarations_path: PathBuf,

    /// Archive repositories and publication settings.
    pub history: HistoryConfig,
}

/// Settings for the two archive repositories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryConfig {
    /// Working directory of the snapshots repository.
    pub snapshots_path: PathBuf,

    /// Working directory of the versions repository.
    pub versions_path: PathBuf,

    /// Whether `publish` pushes the repositories to their remotes.
    /// When false, publishing is a no-op.
    pub publish: bool,

    /// Base URL prepended to snapshot ids in version commit messages
    /// when publication is enabled. Typically points at the snapshots
    /// repository's commit view, e.g.
    /// `https://github.com/acme/snapshots/commit/`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snapshots_base_url: Option<String>,

    /// Author name used for archive commits.
    #[serde(default = "default_author_name")]
    pub author_name: String,

    /// Author email used for archive commits.
    #[serde(default = "default_author_email")]
    pub author_email: String,
}

fn default_author_name() -> String {
    "Termwatch Bot".to_string()
}

fn default_author_email() -> String {
    "bot@termwatch.local".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            declarations_path: PathBuf::from("./declarations"),
            history: HistoryConfig::default(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            snapshots_path: PathBuf::from("./data/snapshots"),
            versions_path: PathBuf::from("./data/versions"),
            publish: false,
            snapshots_base_url: None,
            author_name: default_author_name(),
            author_email: default_author_email(),
        }
    }
}

impl Config {
    /// Loads configuration from the default `termwatch.toml` in the
    /// working directory.
    ///
    /// Returns default configuration if the file does not exist.
    pub fn load() -> Result<Self> {
        Self::load_from_path(Path::new(DEFAULT_CONFIG_FILE))
    }

    /// Loads configuration from a specific path.
    ///
    /// Returns default configuration if the file does not exist or is
    /// empty.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Saves configuration to a specific path.
    ///
    /// Creates parent directories if they do not exist.
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).with_context(|| {
                    format!("Failed to create config directory: {}", parent.display())
                })?;
            }
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }
}
