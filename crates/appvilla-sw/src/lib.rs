//! # AppVilla Offline Agent
//!
//! Background agent that keeps the AppVilla storefront usable offline.
//!
//! ## Features
//!
//! - **Lifecycle**: prime a versioned cache generation on install, delete stale
//!   generations on activate
//! - **Fetch Interception**: cache first, then network, then an offline page
//! - **Background Sync**: replay deferred actions when connectivity returns
//! - **Push**: render push messages as notifications and route clicks
//!
//! ## Architecture
//!
//! ```text
//! host event loop
//!     │
//!     └── ServiceWorker::dispatch(WorkerEvent)   (holds a KeepAliveGuard)
//!             ├── install / activate ──▶ LifecycleController ──▶ CacheStore, NetworkFetch, WorkerHost
//!             ├── fetch ───────────────▶ FetchInterceptor ────▶ CacheStore, NetworkFetch
//!             ├── sync ────────────────▶ DeferredActionRelay ─▶ DeferredReplay
//!             └── push / click ────────▶ PushRelay ───────────▶ NotificationPlatform
//! ```
//!
//! Every collaborator is a trait object injected through [`Collaborators`];
//! [`testing`] provides in-memory versions of each.

pub mod cache;
pub mod config;
pub mod error;
pub mod fetch;
pub mod host;
pub mod keepalive;
pub mod lifecycle;
pub mod push;
pub mod request;
pub mod sync;
pub mod testing;
pub mod worker;

pub use cache::{CacheStore, MemoryCacheStore};
pub use config::{NotificationDefaults, WorkerConfig};
pub use error::{ServiceWorkerError, SwResult};
pub use fetch::{FetchInterceptor, FetchOutcome};
pub use host::{DeferredReplay, NetworkFetch, NotificationPlatform, WorkerHost};
pub use keepalive::{KeepAlive, KeepAliveGuard};
pub use lifecycle::{ActivationReport, InstallReport, LifecycleController, LifecycleState};
pub use push::{Notification, NotificationData, NotificationOptions, PushPayload, PushRelay};
pub use request::{Request, RequestKey, Response};
pub use sync::{
    DeferredAction, DeferredActionRelay, DeferredQueue, QueueReplay, SyncOutcome, SyncRegistry,
    SyncReport,
};
pub use worker::{Collaborators, EventOutcome, ServiceWorker, WorkerEvent};
