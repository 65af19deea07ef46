//! Per-resource advisory locks
//!
//! Mutating operations on the same pool, dataset or path are serialized
//! through a lock keyed by resource name. Entries exist only while someone
//! holds or waits for them; the guard removes its entry on drop, on every
//! exit path.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

type LockTable = DashMap<String, Arc<Mutex<()>>>;

/// Table of named async locks
#[derive(Clone, Default)]
pub struct ResourceLocks {
    table: Arc<LockTable>,
}

impl ResourceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `key`
    pub async fn acquire(&self, key: impl Into<String>) -> ResourceGuard {
        let key = key.into();
        let mutex = self
            .table
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        trace!(resource = %key, "Waiting for resource lock");
        let guard = mutex.lock_owned().await;
        trace!(resource = %key, "Acquired resource lock");

        ResourceGuard {
            key,
            guard: Some(guard),
            table: self.table.clone(),
        }
    }

    /// Acquire several keys in sorted order, so two callers naming the same
    /// keys in different orders cannot deadlock
    pub async fn acquire_many<I, S>(&self, keys: I) -> Vec<ResourceGuard>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut keys: Vec<String> = keys.into_iter().map(Into::into).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            guards.push(self.acquire(key).await);
        }
        guards
    }

    /// Whether `key` is currently held or awaited
    pub fn is_locked(&self, key: &str) -> bool {
        self.table.contains_key(key)
    }

    /// Number of keys currently held or awaited
    pub fn active(&self) -> usize {
        self.table.len()
    }
}

/// Lock key for a pool
pub fn pool_key(name: &str) -> String {
    format!("pool:{}", name)
}

/// Lock key for a dataset (snapshots lock their dataset)
pub fn dataset_key(name: &str) -> String {
    format!("dataset:{}", name)
}

/// Lock key for a btrfs subvolume, by pool and path below its mountpoint
pub fn subvolume_key(pool: &str, path: &str) -> String {
    format!("subvolume:{}/{}", pool, path.trim_matches('/'))
}

/// Lock key for an absolute file-tree path
pub fn path_key(path: &std::path::Path) -> String {
    format!("path:{}", path.display())
}

/// Held lock; released on drop
pub struct ResourceGuard {
    key: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<LockTable>,
}

impl ResourceGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for ResourceGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceGuard").field("key", &self.key).finish()
    }
}

impl Drop for ResourceGuard {
    fn drop(&mut self) {
        self.guard.take();
        // Only the table's own reference left: nobody holds or waits
        self.table
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
        trace!(resource = %self.key, "Released resource lock");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_guard_drop_removes_entry() {
        let locks = ResourceLocks::new();
        {
            let guard = locks.acquire(pool_key("tank")).await;
            assert_eq!(guard.key(), "pool:tank");
            assert!(locks.is_locked("pool:tank"));
        }
        assert!(!locks.is_locked("pool:tank"));
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_same_key_is_serialized() {
        let locks = ResourceLocks::new();
        let inside = Arc::new(AtomicUsize::new(0));
        let max_inside = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let locks = locks.clone();
                let inside = inside.clone();
                let max_inside = max_inside.clone();
                tokio::spawn(async move {
                    let _guard = locks.acquire(dataset_key("tank/data")).await;
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    max_inside.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.active(), 0);
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_block() {
        let locks = ResourceLocks::new();
        let _a = locks.acquire(pool_key("a")).await;
        let b = tokio::time::timeout(Duration::from_secs(1), locks.acquire(pool_key("b"))).await;
        assert!(b.is_ok());
    }

    #[tokio::test]
    async fn test_acquire_many_dedups() {
        let locks = ResourceLocks::new();
        let guards = locks.acquire_many(["path:/b", "path:/a", "path:/b"]).await;
        assert_eq!(guards.len(), 2);
        assert_eq!(guards[0].key(), "path:/a");
    }
}
