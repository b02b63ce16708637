//! Temporary asset tracking and removal.
//!
//! Every request owns one `CleanupCoordinator`. Clones share the same asset
//! list, so the stream bridge and the request handler can both call `run`;
//! the list is drained on the first call and later calls are no-ops.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Local};
use parking_lot::Mutex;

/// A file materialized for a single request that must be removed afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemporaryAsset {
    path: PathBuf,
    created_at: DateTime<Local>,
}

impl TemporaryAsset {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            created_at: Local::now(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[derive(Debug, Default)]
struct CleanupInner {
    assets: Mutex<Vec<TemporaryAsset>>,
}

/// RAII fallback for automatic temp file cleanup.
/// Anything still registered when the last clone drops is removed synchronously,
/// which covers panics and futures dropped before `run` was reached.
impl Drop for CleanupInner {
    fn drop(&mut self) {
        for asset in self.assets.get_mut().drain(..) {
            if std::fs::remove_file(&asset.path).is_ok() {
                log::debug!(
                    "[CLEANUP] Removed {} on drop",
                    asset.path.display()
                );
            }
        }
    }
}

/// Removes every registered temporary asset exactly once.
#[derive(Debug, Clone, Default)]
pub struct CleanupCoordinator {
    inner: Arc<CleanupInner>,
}

impl CleanupCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track an asset for removal.
    pub fn register(&self, asset: TemporaryAsset) {
        log::debug!("[CLEANUP] Tracking {}", asset.path.display());
        self.inner.assets.lock().push(asset);
    }

    /// Number of assets still awaiting removal.
    pub fn pending(&self) -> usize {
        self.inner.assets.lock().len()
    }

    /// Remove all tracked assets. Returns how many files were actually deleted.
    ///
    /// Failures are logged and swallowed; they never replace the request outcome.
    pub async fn run(&self) -> usize {
        let assets = std::mem::take(&mut *self.inner.assets.lock());
        let mut removed = 0;

        for asset in assets {
            match tokio::fs::remove_file(&asset.path).await {
                Ok(()) => {
                    removed += 1;
                    log::debug!(
                        "[CLEANUP] Removed {} (age {}ms)",
                        asset.path.display(),
                        (Local::now() - asset.created_at).num_milliseconds()
                    );
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    log::debug!("[CLEANUP] {} already gone", asset.path.display());
                },
                Err(e) => {
                    log::warn!(
                        "[CLEANUP] Failed to remove {}: {}",
                        asset.path.display(),
                        e
                    );
                },
            }
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, b"bg").unwrap();
        path
    }

    #[tokio::test]
    async fn test_run_removes_once() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = touch(dir.path(), "bg-1.png");

        let cleanup = CleanupCoordinator::new();
        cleanup.register(TemporaryAsset::new(path.clone()));
        assert_eq!(cleanup.pending(), 1);

        assert_eq!(cleanup.run().await, 1);
        assert!(!path.exists());

        // Second invocation is a no-op
        assert_eq!(cleanup.run().await, 0);
        assert_eq!(cleanup.pending(), 0);
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = touch(dir.path(), "bg-2.png");

        let handler_side = CleanupCoordinator::new();
        let bridge_side = handler_side.clone();
        handler_side.register(TemporaryAsset::new(path.clone()));

        let (a, b) = tokio::join!(handler_side.run(), bridge_side.run());
        assert_eq!(a + b, 1);
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_run_without_assets() {
        let cleanup = CleanupCoordinator::new();
        assert_eq!(cleanup.run().await, 0);
    }

    #[tokio::test]
    async fn test_missing_file_is_swallowed() {
        let dir = tempfile::TempDir::new().unwrap();
        let cleanup = CleanupCoordinator::new();
        cleanup.register(TemporaryAsset::new(dir.path().join("never-written.png")));

        assert_eq!(cleanup.run().await, 0);
        assert_eq!(cleanup.pending(), 0);
    }

    #[test]
    fn test_drop_removes_leftovers() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = touch(dir.path(), "bg-3.png");

        {
            let cleanup = CleanupCoordinator::new();
            cleanup.register(TemporaryAsset::new(path.clone()));
            let _clone = cleanup.clone();
        }

        assert!(!path.exists());
    }
}
