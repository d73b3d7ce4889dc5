//! Errors raised by the engine and its configuration layer.

use std::io;

use thiserror::Error;

/// Errors that can occur while configuring or running a simulation.
#[derive(Debug, Error)]
pub enum Error {
    /// A defensive check on the shared state failed. This indicates a
    /// synchronization bug and aborts the run.
    #[error(
        "invariant violated: {what} (active readers: {active_readers}, waiting writers: {waiting_writers}, value: {value})"
    )]
    InvariantViolation {
        /// The check that failed.
        what: &'static str,
        /// Active readers observed when the check failed.
        active_readers: usize,
        /// Waiting writers observed when the check failed.
        waiting_writers: usize,
        /// Shared value observed when the check failed.
        value: u64,
    },

    /// Invalid simulation parameters, rejected before any driver starts.
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// Reading a configuration file or writing an export failed.
    #[error(transparent)]
    Io(#[from] io::Error),

    /// Writing the CSV export failed.
    #[error(transparent)]
    Csv(#[from] csv::Error),

    /// A driver thread panicked.
    #[error("driver thread `{0}` panicked")]
    DriverPanicked(String),
}

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;
