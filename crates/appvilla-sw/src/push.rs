//! Push Notification Relay.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::WorkerConfig;
use crate::error::{ServiceWorkerError, SwResult};
use crate::host::NotificationPlatform;

/// Data a push server may send. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    pub title: Option<String>,
    pub body: Option<String>,
    pub url: Option<String>,
    /// Accepted for wire compatibility; rendering always uses the configured grouping tag.
    pub tag: Option<String>,
}

impl PushPayload {
    /// Decode a push message body.
    ///
    /// The body must be a JSON object. Fields are read one at a time, so a
    /// field of the wrong type is treated as absent without losing the rest.
    pub fn decode(data: &[u8]) -> SwResult<Self> {
        let value: Value = serde_json::from_slice(data)
            .map_err(|e| ServiceWorkerError::PushDecode(e.to_string()))?;
        let fields = match value {
            Value::Object(fields) => fields,
            other => {
                return Err(ServiceWorkerError::PushDecode(format!(
                    "expected a JSON object, got {other}"
                )))
            }
        };

        let text = |key: &str| {
            let field = fields.get(key)?;
            let text = field.as_str();
            if text.is_none() {
                debug!(field = key, value = %field, "Ignoring non-string push field");
            }
            text.map(str::to_string)
        };

        Ok(Self {
            title: text("title"),
            body: text("body"),
            url: text("url"),
            tag: text("tag"),
        })
    }
}

/// Per-notification data read back on click.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationData {
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationOptions {
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub vibrate: Vec<u32>,
    pub tag: String,
    pub data: NotificationData,
}

/// A rendered notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub options: NotificationOptions,
}

/// Renders pushes as notifications and routes clicks.
pub struct PushRelay {
    config: Arc<WorkerConfig>,
    platform: Arc<dyn NotificationPlatform>,
}

/// `Some(value)` unless the value is missing or empty.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl PushRelay {
    pub fn new(config: Arc<WorkerConfig>, platform: Arc<dyn NotificationPlatform>) -> Self {
        Self { config, platform }
    }

    /// Build the notification for a push message without showing it.
    ///
    /// Missing or undecodable data falls back to defaults field by field.
    pub fn render(&self, data: Option<&[u8]>) -> Notification {
        let payload = match data {
            None => PushPayload::default(),
            Some(bytes) => PushPayload::decode(bytes).unwrap_or_else(|e| {
                warn!(error = %e, "Using default notification content");
                PushPayload::default()
            }),
        };

        let defaults = &self.config.notifications;
        Notification {
            title: present(payload.title).unwrap_or_else(|| defaults.title.clone()),
            options: NotificationOptions {
                body: present(payload.body).unwrap_or_else(|| defaults.body.clone()),
                icon: defaults.icon.clone(),
                badge: defaults.badge.clone(),
                vibrate: defaults.vibrate.clone(),
                tag: defaults.tag.clone(),
                data: NotificationData {
                    url: present(payload.url).unwrap_or_else(|| defaults.url.clone()),
                },
            },
        }
    }

    /// Handle a push event: render and show the notification.
    pub async fn receive(&self, data: Option<&[u8]>) -> SwResult<Notification> {
        info!(has_data = data.is_some(), "Push received");
        let notification = self.render(data);
        self.platform
            .show_notification(&notification.title, &notification.options)
            .await?;
        debug!(title = %notification.title, tag = %notification.options.tag, "Notification shown");
        Ok(notification)
    }

    /// Handle a notification click: close it, then open its target.
    pub async fn click(&self, notification: &Notification) -> SwResult<Url> {
        info!(title = %notification.title, "Notification clicked");
        self.platform.close_notification(notification).await?;

        let target = present(Some(notification.options.data.url.clone()))
            .unwrap_or_else(|| self.config.notifications.url.clone());
        let url = self.config.resolve(&target)?;
        self.platform.open_window(&url).await?;
        Ok(url)
    }
}
