//! Durable storage boundary
//!
//! Persisted application state must not be loaded until the backing store is
//! mounted and synced. [`StorageGate`] runs that step once and tells the
//! application through [`PeerHooks::on_storage_ready`].

use crate::hooks::PeerHooks;
use crate::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Backing store that needs a mount/sync step before use
#[async_trait]
pub trait DurableStorage: Send + Sync {
    async fn mount_and_sync(&self) -> Result<()>;
}

/// Local directory store
pub struct DirectoryStorage {
    root: PathBuf,
}

impl DirectoryStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[async_trait]
impl DurableStorage for DirectoryStorage {
    async fn mount_and_sync(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            Error::Storage(format!("Failed to create {}: {}", self.root.display(), e))
        })?;

        let metadata = tokio::fs::metadata(&self.root).await?;
        if !metadata.is_dir() {
            return Err(Error::Storage(format!(
                "{} is not a directory",
                self.root.display()
            )));
        }

        Ok(())
    }
}

/// Runs the mount/sync step and records that it completed
///
/// ```
/// use peerlink_webrtc::hooks::{ChannelHooks, HookEvent};
/// use peerlink_webrtc::storage::{DirectoryStorage, StorageGate};
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let dir = tempfile::tempdir().unwrap();
/// let gate = StorageGate::new(Arc::new(DirectoryStorage::new(dir.path().join("state"))));
/// let (hooks, mut events) = ChannelHooks::new();
///
/// gate.sync_then(&hooks).await.unwrap();
/// assert!(gate.is_synced());
/// assert_eq!(events.recv().await, Some(HookEvent::StorageReady));
/// # });
/// ```
pub struct StorageGate {
    storage: Arc<dyn DurableStorage>,
    synced: AtomicBool,
}

impl StorageGate {
    pub fn new(storage: Arc<dyn DurableStorage>) -> Self {
        Self {
            storage,
            synced: AtomicBool::new(false),
        }
    }

    /// Mount and sync, then fire `on_storage_ready`
    ///
    /// On failure the hook is not called and the gate stays closed.
    pub async fn sync_then(&self, hooks: &dyn PeerHooks) -> Result<()> {
        if let Err(e) = self.storage.mount_and_sync().await {
            error!("Storage mount/sync failed: {}", e);
            return Err(e);
        }

        self.synced.store(true, Ordering::SeqCst);
        info!("Storage mounted and synced");
        hooks.on_storage_ready().await;
        Ok(())
    }

    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hooks::{ChannelHooks, HookEvent};

    struct Broken;

    #[async_trait]
    impl DurableStorage for Broken {
        async fn mount_and_sync(&self) -> Result<()> {
            Err(Error::Storage("disk on fire".to_string()))
        }
    }

    #[tokio::test]
    async fn test_directory_storage_creates_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("state").join("peers");
        let gate = StorageGate::new(Arc::new(DirectoryStorage::new(&root)));
        let (hooks, mut rx) = ChannelHooks::new();

        assert!(!gate.is_synced());
        gate.sync_then(&hooks).await.unwrap();

        assert!(gate.is_synced());
        assert!(root.is_dir());
        assert_eq!(rx.try_recv().unwrap(), HookEvent::StorageReady);
    }

    #[tokio::test]
    async fn test_file_in_the_way_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("occupied");
        std::fs::write(&path, b"x").unwrap();

        let storage = DirectoryStorage::new(&path);
        assert!(storage.mount_and_sync().await.is_err());
    }

    #[tokio::test]
    async fn test_failed_sync_skips_hook() {
        let gate = StorageGate::new(Arc::new(Broken));
        let (hooks, mut rx) = ChannelHooks::new();

        let err = gate.sync_then(&hooks).await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        assert!(!gate.is_synced());
        assert!(rx.try_recv().is_err());
    }
}
