//! Deferred action queue persisted as a JSON file.

use std::path::{Path, PathBuf};

use appvilla_sw::{DeferredAction, DeferredQueue, SwResult};
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

/// [`DeferredQueue`] backed by a JSON array on disk, oldest action first.
pub struct FileQueue {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every queued action. A missing file is an empty queue.
    pub async fn actions(&self) -> SwResult<Vec<DeferredAction>> {
        let _held = self.lock.lock().await;
        self.read().await
    }

    async fn read(&self) -> SwResult<Vec<DeferredAction>> {
        match tokio::fs::read(&self.path).await {
            Ok(json) => Ok(serde_json::from_slice(&json)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, actions: &[DeferredAction]) -> SwResult<()> {
        let json = serde_json::to_vec_pretty(actions)?;
        tokio::fs::write(&self.path, json).await?;
        debug!(path = %self.path.display(), queued = actions.len(), "Queue saved");
        Ok(())
    }
}

#[async_trait]
impl DeferredQueue for FileQueue {
    async fn push(&self, action: DeferredAction) -> SwResult<()> {
        let _held = self.lock.lock().await;
        let mut actions = self.read().await?;
        actions.push(action);
        self.write(&actions).await
    }

    async fn peek(&self) -> SwResult<Option<DeferredAction>> {
        let _held = self.lock.lock().await;
        Ok(self.read().await?.into_iter().next())
    }

    async fn remove(&self, id: &str) -> SwResult<()> {
        let _held = self.lock.lock().await;
        let mut actions = self.read().await?;
        let before = actions.len();
        actions.retain(|action| action.id != id);
        if actions.len() != before {
            self.write(&actions).await?;
        }
        Ok(())
    }
}
