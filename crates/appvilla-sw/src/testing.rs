//! In-memory collaborators for exercising a worker without a browser.
//!
//! Used by this crate's tests and by hosts that want a scripted network.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use http::Method;
use url::Url;

use crate::cache::{CacheStore, MemoryCacheStore};
use crate::error::{ServiceWorkerError, SwResult};
use crate::host::{DeferredReplay, NetworkFetch, NotificationPlatform, WorkerHost};
use crate::push::{Notification, NotificationOptions};
use crate::request::{Request, RequestKey, Response};
use crate::sync::{DeferredAction, DeferredQueue};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ==================== Network ====================

/// Scripted network. Unrouted requests get a 404.
#[derive(Debug, Default)]
pub struct StaticNetwork {
    routes: Mutex<HashMap<RequestKey, Response>>,
    failing: Mutex<HashSet<String>>,
    offline: AtomicBool,
    calls: Mutex<Vec<String>>,
}

impl StaticNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer GET `url` with `response`.
    pub fn route(&self, url: Url, response: Response) {
        self.route_method(Method::GET, url, response);
    }

    pub fn route_method(&self, method: Method, url: Url, response: Response) {
        lock(&self.routes).insert(RequestKey::new(&method, &url), response);
    }

    /// Make every request throw, as if connectivity were lost.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make requests to one URL throw.
    pub fn fail(&self, url: &Url) {
        lock(&self.failing).insert(url.to_string());
    }

    /// Requests seen so far, as `"METHOD url"`.
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl NetworkFetch for StaticNetwork {
    async fn fetch(&self, request: &Request) -> SwResult<Response> {
        let key = request.key();
        lock(&self.calls).push(key.to_string());

        if self.offline.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::network("offline"));
        }
        if lock(&self.failing).contains(&key.url) {
            return Err(ServiceWorkerError::network(format!("connection reset: {}", key.url)));
        }
        Ok(lock(&self.routes)
            .get(&key)
            .cloned()
            .unwrap_or_else(|| Response::new(404, "")))
    }
}

// ==================== Host ====================

/// Counts lifecycle signals.
#[derive(Debug, Default)]
pub struct RecordingHost {
    skip_waiting: AtomicUsize,
    claims: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_waiting_calls(&self) -> usize {
        self.skip_waiting.load(Ordering::SeqCst)
    }

    pub fn claim_calls(&self) -> usize {
        self.claims.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WorkerHost for RecordingHost {
    async fn skip_waiting(&self) -> SwResult<()> {
        self.skip_waiting.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn claim_clients(&self) -> SwResult<()> {
        self.claims.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ==================== Notifications ====================

/// Records shown and closed notifications and opened windows.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    shown: Mutex<Vec<Notification>>,
    closed: Mutex<Vec<Notification>>,
    opened: Mutex<Vec<Url>>,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shown(&self) -> Vec<Notification> {
        lock(&self.shown).clone()
    }

    pub fn closed(&self) -> Vec<Notification> {
        lock(&self.closed).clone()
    }

    pub fn opened(&self) -> Vec<Url> {
        lock(&self.opened).clone()
    }
}

#[async_trait]
impl NotificationPlatform for RecordingPlatform {
    async fn show_notification(&self, title: &str, options: &NotificationOptions) -> SwResult<()> {
        lock(&self.shown).push(Notification {
            title: title.to_string(),
            options: options.clone(),
        });
        Ok(())
    }

    async fn close_notification(&self, notification: &Notification) -> SwResult<()> {
        lock(&self.closed).push(notification.clone());
        Ok(())
    }

    async fn open_window(&self, url: &Url) -> SwResult<()> {
        lock(&self.opened).push(url.clone());
        Ok(())
    }
}

// ==================== Deferred Work ====================

/// Counts replays; fails them while `failing` is set.
#[derive(Debug, Default)]
pub struct CountingReplay {
    calls: AtomicUsize,
    failing: AtomicBool,
}

impl CountingReplay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        let replay = Self::default();
        replay.set_failing(true);
        replay
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeferredReplay for CountingReplay {
    async fn replay(&self) -> SwResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::network("order endpoint unreachable"));
        }
        Ok(())
    }
}

/// FIFO [`DeferredQueue`] held in memory.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    actions: tokio::sync::Mutex<VecDeque<DeferredAction>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of the queued actions, oldest first.
    pub async fn ids(&self) -> Vec<String> {
        self.actions.lock().await.iter().map(|a| a.id.clone()).collect()
    }
}

#[async_trait]
impl DeferredQueue for MemoryQueue {
    async fn push(&self, action: DeferredAction) -> SwResult<()> {
        self.actions.lock().await.push_back(action);
        Ok(())
    }

    async fn peek(&self) -> SwResult<Option<DeferredAction>> {
        Ok(self.actions.lock().await.front().cloned())
    }

    async fn remove(&self, id: &str) -> SwResult<()> {
        self.actions.lock().await.retain(|a| a.id != id);
        Ok(())
    }
}

// ==================== Cache ====================

/// [`MemoryCacheStore`] whose deletes fail for chosen generations, and whose
/// lookups can be made to fail.
#[derive(Debug, Default)]
pub struct FlakyCacheStore {
    inner: MemoryCacheStore,
    undeletable: HashSet<String>,
    failing_lookups: AtomicBool,
}

impl FlakyCacheStore {
    pub fn new<I, S>(undeletable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: MemoryCacheStore::new(),
            undeletable: undeletable.into_iter().map(Into::into).collect(),
            failing_lookups: AtomicBool::new(false),
        }
    }

    pub fn set_failing_lookups(&self, failing: bool) {
        self.failing_lookups.store(failing, Ordering::SeqCst);
    }

    fn check_lookup(&self) -> SwResult<()> {
        if self.failing_lookups.load(Ordering::SeqCst) {
            return Err(ServiceWorkerError::cache("storage backend unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl CacheStore for FlakyCacheStore {
    async fn open(&self, name: &str) -> SwResult<()> {
        self.inner.open(name).await
    }

    async fn put_all(&self, name: &str, entries: Vec<(RequestKey, Response)>) -> SwResult<()> {
        self.inner.put_all(name, entries).await
    }

    async fn match_request(&self, key: &RequestKey) -> SwResult<Option<Response>> {
        self.check_lookup()?;
        self.inner.match_request(key).await
    }

    async fn match_in(&self, name: &str, key: &RequestKey) -> SwResult<Option<Response>> {
        self.check_lookup()?;
        self.inner.match_in(name, key).await
    }

    async fn keys(&self) -> SwResult<Vec<String>> {
        self.inner.keys().await
    }

    async fn delete(&self, name: &str) -> SwResult<bool> {
        if self.undeletable.contains(name) {
            return Err(ServiceWorkerError::cache(format!("{name} is locked")));
        }
        self.inner.delete(name).await
    }
}
