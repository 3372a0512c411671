//! testbed Common Library
//!
//! The polling primitive that waits in end-to-end tests are built on, plus
//! shared error types, soft assertions and test data.

pub mod builders;
pub mod error;
pub mod poll;
pub mod soft;
pub mod types;

// Re-export commonly used types
pub use builders::{CommentBuilder, PostBuilder, UserBuilder};
pub use error::{Error, PollError, PollTimeoutError, Result};
pub use poll::{poll, poll_until, PollConfig, PollOutcome, Poller, Readiness};
pub use soft::SoftAssertions;
pub use types::*;

/// testbed version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
