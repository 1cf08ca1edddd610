//! Worker lifetime extension.
//!
//! The host may reclaim an idle worker at any time. Work started on behalf of
//! an event holds a [`KeepAliveGuard`]; the host waits for
//! [`KeepAlive::until_idle`] before tearing the worker down.

use std::future::Future;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::trace;

/// Counter of in-flight event work.
#[derive(Debug, Clone, Default)]
pub struct KeepAlive {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    pending: AtomicUsize,
    idle: Notify,
}

impl KeepAlive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Extend the worker's lifetime until the returned guard is dropped.
    pub fn hold(&self, label: &'static str) -> KeepAliveGuard {
        let pending = self.inner.pending.fetch_add(1, Ordering::SeqCst) + 1;
        trace!(label, pending, "Lifetime extended");
        KeepAliveGuard {
            inner: Arc::clone(&self.inner),
            label,
        }
    }

    /// Number of outstanding guards.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn is_idle(&self) -> bool {
        self.pending() == 0
    }

    /// Await `future` while holding a guard.
    pub async fn wait_until<F: Future>(&self, label: &'static str, future: F) -> F::Output {
        let _guard = self.hold(label);
        future.await
    }

    /// Spawn `future` on the runtime with a guard that lives as long as the task.
    pub fn spawn<F>(&self, label: &'static str, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.hold(label);
        tokio::spawn(async move {
            let _guard = guard;
            future.await
        })
    }

    /// Resolve once no guard is outstanding.
    pub async fn until_idle(&self) {
        loop {
            let mut notified = pin!(self.inner.idle.notified());
            // Register before checking so a release in between is not missed.
            notified.as_mut().enable();
            if self.is_idle() {
                return;
            }
            notified.await;
        }
    }
}

/// Keeps the worker alive while in scope.
#[must_use = "the worker may be reclaimed as soon as the guard is dropped"]
#[derive(Debug)]
pub struct KeepAliveGuard {
    inner: Arc<Inner>,
    label: &'static str,
}

impl KeepAliveGuard {
    pub fn label(&self) -> &'static str {
        self.label
    }
}

impl Drop for KeepAliveGuard {
    fn drop(&mut self) {
        let previous = self.inner.pending.fetch_sub(1, Ordering::SeqCst);
        trace!(label = self.label, pending = previous - 1, "Lifetime extension released");
        if previous == 1 {
            self.inner.idle.notify_waiters();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::oneshot;

    #[test]
    fn test_guard_counts() {
        let keep_alive = KeepAlive::new();
        assert!(keep_alive.is_idle());

        let a = keep_alive.hold("a");
        let b = keep_alive.hold("b");
        assert_eq!(keep_alive.pending(), 2);
        assert_eq!(a.label(), "a");

        drop(a);
        assert_eq!(keep_alive.pending(), 1);
        drop(b);
        assert!(keep_alive.is_idle());
    }

    #[tokio::test]
    async fn test_until_idle_returns_immediately_when_idle() {
        let keep_alive = KeepAlive::new();
        tokio::time::timeout(Duration::from_secs(1), keep_alive.until_idle())
            .await
            .expect("idle worker should not block");
    }

    #[tokio::test]
    async fn test_wait_until_holds_guard_for_future() {
        let keep_alive = KeepAlive::new();
        let observed = keep_alive
            .wait_until("pending-count", {
                let keep_alive = keep_alive.clone();
                async move { keep_alive.pending() }
            })
            .await;

        assert_eq!(observed, 1);
        assert!(keep_alive.is_idle());
    }

    #[tokio::test]
    async fn test_until_idle_waits_for_spawned_work() {
        let keep_alive = KeepAlive::new();
        let (release_tx, release_rx) = oneshot::channel::<()>();

        let handle = keep_alive.spawn("push", async move {
            let _ = release_rx.await;
            7
        });
        assert_eq!(keep_alive.pending(), 1);

        let waiter = {
            let keep_alive = keep_alive.clone();
            tokio::spawn(async move { keep_alive.until_idle().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        release_tx.send(()).unwrap();
        assert_eq!(handle.await.unwrap(), 7);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake once work completes")
            .unwrap();
        assert!(keep_alive.is_idle());
    }
}
