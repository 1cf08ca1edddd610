//! Console stand-ins for the browser side of the worker contract.

use std::io::Write;
use std::sync::Mutex;

use appvilla_sw::{
    Notification, NotificationOptions, NetworkFetch, NotificationPlatform, Request, Response,
    ServiceWorkerError, SwResult, WorkerHost,
};
use async_trait::async_trait;
use serde_json::json;
use tracing::info;
use url::Url;

/// Logs lifecycle signals; a single worker has no other clients to hand over.
pub struct CliHost;

#[async_trait]
impl WorkerHost for CliHost {
    async fn skip_waiting(&self) -> SwResult<()> {
        info!("Host: skip waiting");
        Ok(())
    }

    async fn claim_clients(&self) -> SwResult<()> {
        info!("Host: clients claimed");
        Ok(())
    }
}

/// Prints notification actions as JSON lines.
pub struct ConsolePlatform {
    out: Mutex<Box<dyn Write + Send>>,
}

impl ConsolePlatform {
    pub fn new(out: impl Write + Send + 'static) -> Self {
        Self {
            out: Mutex::new(Box::new(out)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }

    fn emit(&self, value: serde_json::Value) -> SwResult<()> {
        let mut out = self
            .out
            .lock()
            .map_err(|_| ServiceWorkerError::platform("console writer poisoned"))?;
        writeln!(out, "{value}")
            .and_then(|()| out.flush())
            .map_err(|e| ServiceWorkerError::platform(format!("writing to console: {e}")))
    }
}

#[async_trait]
impl NotificationPlatform for ConsolePlatform {
    async fn show_notification(&self, title: &str, options: &NotificationOptions) -> SwResult<()> {
        self.emit(json!({ "action": "show", "title": title, "options": options }))
    }

    async fn close_notification(&self, notification: &Notification) -> SwResult<()> {
        self.emit(json!({ "action": "close", "tag": notification.options.tag }))
    }

    async fn open_window(&self, url: &Url) -> SwResult<()> {
        self.emit(json!({ "action": "open", "url": url.as_str() }))
    }
}

/// Network that always throws, for `--offline`.
pub struct Disconnected;

#[async_trait]
impl NetworkFetch for Disconnected {
    async fn fetch(&self, request: &Request) -> SwResult<Response> {
        Err(ServiceWorkerError::network(format!(
            "offline: {} {}",
            request.method, request.url
        )))
    }
}
