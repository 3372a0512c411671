//! Error types for E2E testing

use std::time::Duration;
use testbed_common::{PollError, PollTimeoutError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Server failed to start: {0}")]
    ServerStartup(String),

    #[error("Server health check failed: {0}")]
    ServerHealthCheck(PollTimeoutError),

    #[error(
        "Playwright not found. Install with: npm i -D @playwright/test && npx playwright install"
    )]
    PlaywrightNotFound,

    #[error("Playwright error: {0}")]
    Playwright(String),

    #[error("Test spec parse error: {0}")]
    SpecParse(String),

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("{method} {url} returned {status}, expected {expected}: {body}")]
    UnexpectedStatus {
        method: String,
        url: String,
        status: u16,
        expected: u16,
        body: String,
    },

    #[error("Response validation failed: {0}")]
    Validation(String),

    #[error("Mock error: {0}")]
    Mock(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error(transparent)]
    Timeout(#[from] PollTimeoutError),

    #[error("Cancelled after {attempts} attempt(s) in {}ms", .elapsed.as_millis())]
    Cancelled { attempts: u32, elapsed: Duration },

    #[error(transparent)]
    Common(#[from] testbed_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
}

impl From<PollError<E2eError>> for E2eError {
    fn from(err: PollError<E2eError>) -> Self {
        match err {
            PollError::Timeout(t) => E2eError::Timeout(t),
            PollError::Cancelled { attempts, elapsed } => E2eError::Cancelled { attempts, elapsed },
            PollError::Check(e) => e,
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
