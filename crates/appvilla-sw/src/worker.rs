//! Worker event surface.
//!
//! [`ServiceWorker`] owns one instance of each component and routes host
//! events to them. Every dispatched event holds a keep-alive guard until its
//! handler settles.

use std::sync::Arc;

use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::{debug, info_span, warn, Instrument};
use url::Url;

use crate::cache::CacheStore;
use crate::config::WorkerConfig;
use crate::error::SwResult;
use crate::fetch::{FetchInterceptor, FetchOutcome};
use crate::host::{DeferredReplay, NetworkFetch, NotificationPlatform, WorkerHost};
use crate::keepalive::KeepAlive;
use crate::lifecycle::{ActivationReport, InstallReport, LifecycleController, LifecycleState};
use crate::push::{Notification, PushRelay};
use crate::request::Request;
use crate::sync::{DeferredActionRelay, SyncOutcome};

/// Everything the worker consumes from its environment.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn CacheStore>,
    pub network: Arc<dyn NetworkFetch>,
    pub host: Arc<dyn WorkerHost>,
    pub replay: Arc<dyn DeferredReplay>,
    pub notifications: Arc<dyn NotificationPlatform>,
}

/// An event delivered by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(Request),
    Sync { tag: String },
    Push { data: Option<Bytes> },
    NotificationClick(Notification),
}

impl WorkerEvent {
    /// Event name as the host's event loop knows it.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Activate => "activate",
            Self::Fetch(_) => "fetch",
            Self::Sync { .. } => "sync",
            Self::Push { .. } => "push",
            Self::NotificationClick(_) => "notificationclick",
        }
    }
}

/// What handling an event produced.
#[derive(Debug, Clone, PartialEq)]
pub enum EventOutcome {
    Installed(InstallReport),
    Activated(ActivationReport),
    Fetched(FetchOutcome),
    Synced(SyncOutcome),
    NotificationShown(Notification),
    WindowOpened(Url),
}

/// One worker instance bound to one cache generation.
pub struct ServiceWorker {
    config: Arc<WorkerConfig>,
    network: Arc<dyn NetworkFetch>,
    lifecycle: LifecycleController,
    interceptor: FetchInterceptor,
    relay: DeferredActionRelay,
    push: PushRelay,
    keep_alive: KeepAlive,
}

impl ServiceWorker {
    /// Validate `config` and wire the components.
    pub fn new(config: WorkerConfig, collaborators: Collaborators) -> SwResult<Self> {
        config.validate()?;
        let config = Arc::new(config);
        let Collaborators {
            store,
            network,
            host,
            replay,
            notifications,
        } = collaborators;

        let offline_key = config.offline_key()?;
        Ok(Self {
            lifecycle: LifecycleController::new(
                Arc::clone(&config),
                Arc::clone(&store),
                Arc::clone(&network),
                host,
            ),
            interceptor: FetchInterceptor::new(store, Arc::clone(&network), offline_key),
            relay: DeferredActionRelay::new(config.sync_tag.clone(), replay),
            push: PushRelay::new(Arc::clone(&config), notifications),
            keep_alive: KeepAlive::new(),
            network,
            config,
        })
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub async fn state(&self) -> LifecycleState {
        self.lifecycle.state().await
    }

    pub fn keep_alive(&self) -> &KeepAlive {
        &self.keep_alive
    }

    pub fn lifecycle(&self) -> &LifecycleController {
        &self.lifecycle
    }

    pub fn interceptor(&self) -> &FetchInterceptor {
        &self.interceptor
    }

    pub fn relay(&self) -> &DeferredActionRelay {
        &self.relay
    }

    pub fn push(&self) -> &PushRelay {
        &self.push
    }

    /// Handle one event to completion.
    pub async fn dispatch(&self, event: WorkerEvent) -> SwResult<EventOutcome> {
        let name = event.name();
        let span = info_span!("sw_event", event = name, generation = %self.config.cache_name);
        let _guard = self.keep_alive.hold(name);

        let outcome = self.route(event).instrument(span.clone()).await;
        if let Err(e) = &outcome {
            span.in_scope(|| warn!(category = e.category(), error = %e, "Event handler failed"));
        }
        outcome
    }

    /// Handle one event on the runtime, keeping the worker alive until it settles.
    pub fn dispatch_detached(
        self: &Arc<Self>,
        event: WorkerEvent,
    ) -> JoinHandle<SwResult<EventOutcome>> {
        let worker = Arc::clone(self);
        self.keep_alive
            .spawn(event.name(), async move { worker.dispatch(event).await })
    }

    async fn route(&self, event: WorkerEvent) -> SwResult<EventOutcome> {
        match event {
            WorkerEvent::Install => self.lifecycle.install().await.map(EventOutcome::Installed),
            WorkerEvent::Activate => self.lifecycle.activate().await.map(EventOutcome::Activated),
            WorkerEvent::Fetch(request) => self.fetch(&request).await.map(EventOutcome::Fetched),
            WorkerEvent::Sync { tag } => self.relay.handle(&tag).await.map(EventOutcome::Synced),
            WorkerEvent::Push { data } => self
                .push
                .receive(data.as_deref())
                .await
                .map(EventOutcome::NotificationShown),
            WorkerEvent::NotificationClick(notification) => self
                .push
                .click(&notification)
                .await
                .map(EventOutcome::WindowOpened),
        }
    }

    async fn fetch(&self, request: &Request) -> SwResult<FetchOutcome> {
        let state = self.lifecycle.state().await;
        if !state.controls_fetches() {
            debug!(%state, url = %request.url, "Worker not controlling, bypassing cache");
            return self.network.fetch(request).await.map(FetchOutcome::Passthrough);
        }
        self.interceptor.handle(request).await
    }
}
