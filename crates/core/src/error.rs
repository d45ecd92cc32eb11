//! Error types for the harness
//!
//! Every failure a scenario can hit is one of the variants below. The
//! classification matters more than the message: invariant violations are
//! correctness bugs in the system under test, `ResourceUnavailable` is an
//! environment limitation that skips a scenario, and `Timeout` and
//! `Cancelled` must stay distinguishable so callers can tell "gave up" from
//! "got cut short".
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for harness operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the harness
#[derive(Debug, Error)]
pub enum Error {
    /// Observed outcome differs from the oracle's prediction, or a background
    /// task recorded a failure. Always fatal, never retried.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// A log pattern (or other awaited event) did not appear in time
    #[error("Timed out after {after:?} waiting for {what}")]
    Timeout {
        /// What was being waited for
        what: String,
        /// How long the wait lasted
        after: Duration,
    },

    /// An in-flight wait was cancelled from outside
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// No log file could be located, or the candidate failed the sentinel check
    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),

    /// The store or the cluster-management interface raised an error
    #[error("Transport failure: {0}")]
    Transport(String),

    /// I/O error (log files, /proc, config files)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A log pattern failed to compile
    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    /// Configuration could not be read or is invalid
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Build an invariant violation from anything displayable
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// Build a transport failure from anything displayable
    pub fn transport(msg: impl std::fmt::Display) -> Self {
        Error::Transport(msg.to_string())
    }

    /// Build a resource-unavailable condition
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Error::ResourceUnavailable(msg.into())
    }

    /// True when the dependent scenario should be skipped rather than failed
    pub fn is_skip(&self) -> bool {
        matches!(self, Error::ResourceUnavailable(_))
    }

    /// True for a timeout (as opposed to a cancellation)
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout { .. })
    }

    /// True for an external cancellation (as opposed to a timeout)
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }

    /// True when the error signals a correctness bug in the system under test
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Error::InvariantViolation(_))
    }
}
