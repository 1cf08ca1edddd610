//! # AppVilla Common
//!
//! Shared plumbing for the AppVilla offline agent crates.
//!
//! ## Features
//!
//! - Logging configuration and setup
//! - Backoff policy used when the host reschedules failed background syncs

pub mod logging;
pub mod retry;

pub use logging::{init_logging, LogConfig, LogFormat};
pub use retry::RetryConfig;
