//! Error types for testbed

use std::time::Duration;
use thiserror::Error;

/// Result type alias using testbed Error
pub type Result<T> = std::result::Result<T, Error>;

/// testbed error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(
        "{label}: {} soft assertion(s) failed:\n  - {}",
        .failures.len(),
        .failures.join("\n  - ")
    )]
    SoftAssertions { label: String, failures: Vec<String> },
}

/// A poll ran out of time before its check reported ready.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "timed out waiting for {} after {attempts} attempt(s) in {}ms (timeout {}ms)",
    .description.as_deref().unwrap_or("condition"),
    .elapsed.as_millis(),
    .timeout.as_millis()
)]
pub struct PollTimeoutError {
    pub description: Option<String>,
    pub attempts: u32,
    pub elapsed: Duration,
    pub timeout: Duration,
}

/// Failure modes of a poll.
///
/// `Check` carries the caller's own error unchanged: a check that fails is
/// never retried, only one that reports "not ready yet".
#[derive(Error, Debug)]
pub enum PollError<E> {
    #[error(transparent)]
    Timeout(PollTimeoutError),

    #[error("poll cancelled after {attempts} attempt(s) in {}ms", .elapsed.as_millis())]
    Cancelled { attempts: u32, elapsed: Duration },

    #[error("check failed: {0}")]
    Check(#[source] E),
}

impl<E> PollError<E> {
    /// Number of attempts made, when the poll ended on its own clock.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            PollError::Timeout(t) => Some(t.attempts),
            PollError::Cancelled { attempts, .. } => Some(*attempts),
            PollError::Check(_) => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, PollError::Timeout(_))
    }

    /// Unwrap the caller's error, if that is what ended the poll.
    pub fn into_check(self) -> Option<E> {
        match self {
            PollError::Check(e) => Some(e),
            _ => None,
        }
    }
}
