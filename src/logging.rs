//! Diagnostic logging via `tracing`.
//!
//! Logs go to stderr so they never mix with the merged process output on
//! stdout. Level priority:
//! 1. `--log-level`
//! 2. `PROCSWARM_LOG` (e.g. "info", "debug")
//! 3. `warn`

use clap::ValueEnum;
use tracing::Level;

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => Level::ERROR,
            LogLevel::Warn => Level::WARN,
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Trace => Level::TRACE,
        }
    }
}

/// Installs the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>) {
    let level = resolve_level(cli_level, std::env::var("PROCSWARM_LOG").ok().as_deref());
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn resolve_level(cli_level: Option<LogLevel>, env_level: Option<&str>) -> Level {
    cli_level
        .map(Level::from)
        .or_else(|| env_level.and_then(parse_level_str))
        .unwrap_or(Level::WARN)
}

fn parse_level_str(s: &str) -> Option<Level> {
    match s.trim().to_lowercase().as_str() {
        "error" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" => Some(Level::TRACE),
        _ => None,
    }
}
