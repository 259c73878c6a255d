//! Typed errors raised before any process is launched.
//!
//! Per-process failures never show up here: those travel as completion
//! events and exit codes. Everything in this module is fatal for the run.

use std::path::PathBuf;

use thiserror::Error;

/// The process list could not be parsed.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("line {line}: expected `name: command`, got {content:?}")]
    MalformedLine { line: usize, content: String },

    #[error("line {line}: process name {name:?} is already defined")]
    DuplicateName { line: usize, name: String },

    #[error("no processes defined in the process list")]
    Empty,
}

/// The run configuration does not describe anything runnable.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read process list {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no processes match the filter {filter:?}")]
    NoProcessesSelected { filter: String },
}
