//! Deferred Action Relay.
//!
//! ```text
//! page (offline) ── push ──▶ DeferredQueue
//!                                  │
//! host ── sync(tag) ──▶ DeferredActionRelay ──▶ DeferredReplay (e.g. QueueReplay)
//!   ▲                                               │
//!   └──────── failed: reschedule with backoff ◀─────┘
//! ```
//!
//! The relay only matches the tag and reports the replay's outcome. Queue
//! iteration, persistence and rescheduling belong to its collaborators.

use std::sync::Arc;
use std::time::{Duration, Instant};

use appvilla_common::RetryConfig;
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::error::{ServiceWorkerError, SwResult};
use crate::host::{DeferredReplay, NetworkFetch};
use crate::request::Request;

// ==================== Relay ====================

/// Outcome of a delivered sync signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Tag not recognised; nothing was replayed.
    Ignored,
    /// The replay succeeded.
    Replayed,
}

/// Replays deferred work when connectivity returns.
pub struct DeferredActionRelay {
    tag: String,
    replay: Arc<dyn DeferredReplay>,
}

impl DeferredActionRelay {
    pub fn new(tag: impl Into<String>, replay: Arc<dyn DeferredReplay>) -> Self {
        Self {
            tag: tag.into(),
            replay,
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Handle a sync signal.
    ///
    /// A failed replay is logged and returned as [`ServiceWorkerError::RelayFailure`]
    /// so the host knows to fire the signal again later.
    pub async fn handle(&self, tag: &str) -> SwResult<SyncOutcome> {
        info!(tag, "Background sync event fired");
        if tag != self.tag {
            debug!(tag, expected = %self.tag, "Ignoring unrecognised sync tag");
            return Ok(SyncOutcome::Ignored);
        }

        match self.replay.replay().await {
            Ok(()) => {
                info!(tag, "Sync successful");
                Ok(SyncOutcome::Replayed)
            }
            Err(e) => {
                error!(tag, error = %e, "Sync failed");
                Err(ServiceWorkerError::RelayFailure(e.to_string()))
            }
        }
    }
}

// ==================== Deferred Queue ====================

/// A mutating request that failed while offline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredAction {
    pub id: String,
    pub method: String,
    /// Absolute URL, or a path relative to the worker origin.
    pub url: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<Bytes>,
    /// When the page queued the action (ms since epoch).
    #[serde(default)]
    pub queued_at_ms: u64,
}

impl DeferredAction {
    /// Build the request that resends this action.
    pub fn to_request(&self, origin: &Url) -> SwResult<Request> {
        let method = Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|e| {
                ServiceWorkerError::RelayFailure(format!("bad method {}: {e}", self.method))
            })?;
        let url = origin
            .join(&self.url)
            .map_err(|e| ServiceWorkerError::RelayFailure(format!("bad url {}: {e}", self.url)))?;

        let mut request = Request::new(method, url);
        request.headers = self.headers.clone();
        request.body = self.body.clone();
        Ok(request)
    }
}

/// Persistent queue of deferred actions, owned by the application layer.
#[async_trait]
pub trait DeferredQueue: Send + Sync {
    /// Append an action.
    async fn push(&self, action: DeferredAction) -> SwResult<()>;

    /// Oldest action, if any.
    async fn peek(&self) -> SwResult<Option<DeferredAction>>;

    /// Remove an action once it has been delivered.
    async fn remove(&self, id: &str) -> SwResult<()>;
}

/// [`DeferredReplay`] that resends the oldest queued action.
///
/// The action leaves the queue only after a 2xx response.
pub struct QueueReplay {
    queue: Arc<dyn DeferredQueue>,
    network: Arc<dyn NetworkFetch>,
    origin: Url,
}

impl QueueReplay {
    pub fn new(queue: Arc<dyn DeferredQueue>, network: Arc<dyn NetworkFetch>, origin: Url) -> Self {
        Self {
            queue,
            network,
            origin,
        }
    }
}

#[async_trait]
impl DeferredReplay for QueueReplay {
    async fn replay(&self) -> SwResult<()> {
        let Some(action) = self.queue.peek().await? else {
            debug!("Deferred queue is empty");
            return Ok(());
        };

        let request = action.to_request(&self.origin)?;
        info!(
            id = %action.id,
            method = %request.method,
            url = %request.url,
            "Replaying deferred action"
        );
        let response = self.network.fetch(&request).await?;
        if !response.is_success() {
            return Err(ServiceWorkerError::UnexpectedStatus {
                url: request.url.to_string(),
                status: response.status,
            });
        }

        self.queue.remove(&action.id).await?;
        debug!(id = %action.id, status = response.status, "Deferred action delivered");
        Ok(())
    }
}

// ==================== Sync Registry ====================

/// A pending sync registration, as the host tracks it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRegistration {
    pub tag: String,
    /// Attempts made so far.
    pub attempts: u32,
    /// Earliest time the next attempt may fire.
    pub due_at: Instant,
}

/// What happened to one registration during [`SyncRegistry::fire_due`].
#[derive(Debug, Clone, PartialEq)]
pub enum SyncReport {
    Completed { tag: String, attempts: u32 },
    Rescheduled { tag: String, attempts: u32, delay: Duration },
    GaveUp { tag: String, attempts: u32, error: ServiceWorkerError },
}

/// Host-side bookkeeping of sync registrations, with backoff on failure.
#[derive(Debug)]
pub struct SyncRegistry {
    retry: RetryConfig,
    pending: Vec<SyncRegistration>,
}

impl SyncRegistry {
    pub fn new(retry: RetryConfig) -> Self {
        Self {
            retry,
            pending: Vec::new(),
        }
    }

    /// Register a tag, due immediately. Registering a pending tag again is a no-op.
    pub fn register(&mut self, tag: impl Into<String>, now: Instant) {
        let tag = tag.into();
        if self.pending.iter().any(|r| r.tag == tag) {
            return;
        }
        debug!(tag = %tag, "Sync registered");
        self.pending.push(SyncRegistration {
            tag,
            attempts: 0,
            due_at: now,
        });
    }

    pub fn pending(&self) -> &[SyncRegistration] {
        &self.pending
    }

    /// Earliest due time among pending registrations.
    pub fn next_due(&self) -> Option<Instant> {
        self.pending.iter().map(|r| r.due_at).min()
    }

    /// Deliver every registration due at `now` to the relay.
    pub async fn fire_due(&mut self, relay: &DeferredActionRelay, now: Instant) -> Vec<SyncReport> {
        let (due, waiting): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|r| r.due_at <= now);
        self.pending = waiting;

        let mut reports = Vec::with_capacity(due.len());
        for mut registration in due {
            registration.attempts += 1;
            match relay.handle(&registration.tag).await {
                Ok(_) => reports.push(SyncReport::Completed {
                    tag: registration.tag,
                    attempts: registration.attempts,
                }),
                Err(e) if self.retry.exhausted(registration.attempts) => {
                    warn!(
                        tag = %registration.tag,
                        attempts = registration.attempts,
                        "Giving up on sync"
                    );
                    reports.push(SyncReport::GaveUp {
                        tag: registration.tag,
                        attempts: registration.attempts,
                        error: e,
                    });
                }
                Err(_) => {
                    let delay = self.retry.delay_for_attempt(registration.attempts + 1);
                    debug!(tag = %registration.tag, ?delay, "Sync rescheduled");
                    registration.due_at = now + delay;
                    reports.push(SyncReport::Rescheduled {
                        tag: registration.tag.clone(),
                        attempts: registration.attempts,
                        delay,
                    });
                    self.pending.push(registration);
                }
            }
        }
        reports
    }
}

impl Default for SyncRegistry {
    fn default() -> Self {
        Self::new(RetryConfig::default())
    }
}
