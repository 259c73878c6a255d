//! Optional settings file.
//!
//! `procswarm.toml` supplies defaults for any command-line option. Flags and
//! `PROCSWARM_*` environment variables always take precedence over it.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Contents of `procswarm.toml`. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Terminal title.
    pub title: Option<String>,
    /// Path to the Procfile.
    pub procfile: Option<String>,
    /// Comma-separated names of the processes to run.
    pub processes: Option<String>,
    /// Working directory for every process.
    pub root: Option<String>,
    /// Port given to the first process.
    pub port: Option<u16>,
    /// Port increment between consecutive processes.
    pub port_step: Option<u16>,
    /// Seconds to wait after interrupting before killing.
    pub timeout: Option<u64>,
    /// Hide the process name column.
    pub no_prefix: Option<bool>,
    /// Show elapsed time on each line.
    pub print_timestamps: Option<bool>,
    /// Accepted for compatibility; the highest exit code is always reported.
    #[allow(dead_code)]
    pub exit_with_highest: Option<bool>,
    /// Run until every process succeeded instead of stopping at the first exit.
    pub as_job_runner: Option<bool>,
}

/// Loads and parses the settings file at `path`.
pub fn load_config(path: &Path) -> Result<Config> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config: Config = toml::from_str(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(config)
}
