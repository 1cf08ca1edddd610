//! Contracts the worker consumes from its hosting environment.
//!
//! The cache store lives in [`crate::cache`]; everything else the worker
//! talks to is declared here.

use async_trait::async_trait;
use url::Url;

use crate::error::SwResult;
use crate::push::{Notification, NotificationOptions};
use crate::request::{Request, Response};

/// Network access.
///
/// An `Err` means the call threw (no connectivity, reset, DNS failure).
/// HTTP error statuses are ordinary `Ok` responses.
#[async_trait]
pub trait NetworkFetch: Send + Sync {
    async fn fetch(&self, request: &Request) -> SwResult<Response>;
}

/// Lifecycle signals sent back to the host.
#[async_trait]
pub trait WorkerHost: Send + Sync {
    /// Activate this worker without waiting for existing clients to close.
    async fn skip_waiting(&self) -> SwResult<()>;

    /// Route every open client through this worker now.
    async fn claim_clients(&self) -> SwResult<()>;
}

/// Resends one action that failed while offline.
///
/// Implemented by the application layer, which owns the persistent queue.
#[async_trait]
pub trait DeferredReplay: Send + Sync {
    async fn replay(&self) -> SwResult<()>;
}

/// Notification and window platform.
#[async_trait]
pub trait NotificationPlatform: Send + Sync {
    async fn show_notification(&self, title: &str, options: &NotificationOptions) -> SwResult<()>;

    async fn close_notification(&self, notification: &Notification) -> SwResult<()>;

    /// Open a window on `url`, or focus one already showing it.
    async fn open_window(&self, url: &Url) -> SwResult<()>;
}
