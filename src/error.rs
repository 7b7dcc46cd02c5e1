//! Error types for anonode-rs.
//!
//! This module defines the [`enum@Error`] enum covering every failure category
//! in the library, and the crate-wide [`Result`] alias.
//!
//! # Error Categories
//!
//! ```text
//!   Error
//!   ├── Io          ◄── File and socket I/O failures
//!   ├── Config      ◄── Invalid configuration file or CLI arguments
//!   ├── Compile     ◄── Structurally invalid Configuration (missing executable)
//!   ├── Validation  ◄── Invalid input data
//!   ├── Process     ◄── Spawn failure or unexpected service exit
//!   └── Probe       ◄── Timeout or connection failure during a connectivity test
//! ```
//!
//! Propagation policy: component-local errors are converted to these typed
//! variants at each module boundary. Advisory configuration problems are NOT
//! errors; they are [`ValidationIssue`](crate::config::ValidationIssue) values
//! returned from [`Config::validate`](crate::config::Config::validate).
//! Probe failures are recorded inside a
//! [`ConnectivityReport`](crate::connectivity::ConnectivityReport) rather than
//! raised; the [`Probe`](Error::Probe) variant exists for transport-level use.

use thiserror::Error;

/// Errors that can occur during anonode-rs operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error during file or socket operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    ///
    /// Invalid configuration file contents or unusable CLI arguments. Not
    /// recoverable without user intervention.
    #[error("configuration error: {0}")]
    Config(String),

    /// Invocation compile error.
    ///
    /// Reserved for structurally invalid configurations only, such as a
    /// missing executable path for the requested service. Never raised for
    /// merely unusual flag combinations.
    #[error("invocation compile error: {0}")]
    Compile(String),

    /// Input validation error.
    #[error("validation error: {0}")]
    Validation(String),

    /// Process lifecycle error.
    ///
    /// Spawn failure, termination failure, or a restart that could not
    /// complete. Surfaced per service; never fatal to the supervisor itself.
    #[error("process error: {0}")]
    Process(String),

    /// Connectivity probe error.
    #[error("probe error: {0}")]
    Probe(String),
}

/// Result type alias for anonode-rs operations.
pub type Result<T> = std::result::Result<T, Error>;
