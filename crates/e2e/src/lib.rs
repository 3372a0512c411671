//! Testbed end-to-end helpers
//!
//! Everything here waits through [`testbed_common::Poller`] instead of fixed
//! sleeps:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   testbed-e2e                               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ApiClient ── UsersApi / PostsApi / AuthApi                 │
//! │    ├── wait_for_status(endpoint, status, poll)              │
//! │    └── ResponseValidator (soft, aggregated failures)        │
//! │  MockBackend (wiremock)    MockRoute (page.route)           │
//! │  files::wait_for_download(dir, pattern, poll)               │
//! ├─────────────────────────────────────────────────────────────┤
//! │  TestRunner                                                 │
//! │    ├── ServerHandle::spawn() -> health polled               │
//! │    ├── TestSpec (YAML) -> one Playwright script per test    │
//! │    │     └── pollUntil / waitForPageReady / stable actions  │
//! │    └── TestSuiteResult -> test-results.json                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod api;
pub mod endpoints;
pub mod error;
pub mod files;
pub mod logging;
pub mod mock;
pub mod playwright;
pub mod runner;
pub mod server;
pub mod spec;
pub mod validate;

pub use api::{ApiClient, ApiConfig, ApiResponse, RequestOptions};
pub use endpoints::{AuthApi, PostsApi, UsersApi};
pub use error::{E2eError, E2eResult};
pub use mock::{MockBackend, MockRoute};
pub use runner::{RunnerConfig, TestResult, TestRunner, TestSuiteResult};
pub use server::{ServerConfig, ServerHandle};
pub use spec::{TestSpec, TestStep};
pub use validate::ResponseValidator;
