//! Soft assertions
//!
//! Collects failures instead of stopping at the first one, then reports
//! them together.

use std::fmt::{Debug, Display};
use tracing::warn;

use crate::error::{Error, Result};

/// Aggregates assertion failures for a single test or validation pass
#[derive(Debug, Clone, Default)]
pub struct SoftAssertions {
    label: String,
    failures: Vec<String>,
}

impl SoftAssertions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            failures: Vec::new(),
        }
    }

    /// Record `message` when `condition` does not hold
    pub fn check(&mut self, condition: bool, message: impl Into<String>) -> bool {
        if !condition {
            self.fail(message);
        }
        condition
    }

    /// Record a failure when `actual != expected`
    pub fn eq<T>(&mut self, what: &str, actual: T, expected: T) -> bool
    where
        T: PartialEq + Debug,
    {
        let ok = actual == expected;
        if !ok {
            self.fail(format!("{}: expected {:?}, got {:?}", what, expected, actual));
        }
        ok
    }

    /// Record the error of a failed result and hand back its value, if any.
    ///
    /// Timed-out polls land here when a caller wants them reported
    /// alongside other soft failures rather than aborting the test.
    pub fn capture<T, E: Display>(&mut self, result: std::result::Result<T, E>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(e) => {
                self.fail(e.to_string());
                None
            }
        }
    }

    pub fn fail(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!("[{}] soft assertion failed: {}", self.label, message);
        self.failures.push(message);
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Fail with every recorded message, or succeed if there were none
    pub fn finish(self) -> Result<()> {
        if self.failures.is_empty() {
            Ok(())
        } else {
            Err(Error::SoftAssertions {
                label: self.label,
                failures: self.failures,
            })
        }
    }
}
