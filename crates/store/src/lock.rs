//! In-process named locks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::{Result, StoreError};

/// Sorts and deduplicates lock names.
///
/// Every backend acquires locks in this order, which rules out lock-order
/// deadlocks between units of work naming overlapping sets.
pub fn canonical_lock_names<I, S>(names: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut names: Vec<String> = names.into_iter().map(Into::into).collect();
    names.sort();
    names.dedup();
    names
}

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// A table of named async mutexes shared by all transactions of a store.
///
/// Entries exist only while a lock is held or awaited.
#[derive(Debug, Default)]
pub struct LockManager {
    locks: LockTable,
}

/// Holds one named lock and drops its table entry once nobody else wants it.
#[derive(Debug)]
pub struct LockGuard {
    name: String,
    guard: Option<OwnedMutexGuard<()>>,
    table: LockTable,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.guard.take();
        let Ok(mut locks) = self.table.lock() else {
            return;
        };
        // Waiters hold their own clone, so a count of one is the table's.
        if locks
            .get(&self.name)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.name);
            tracing::trace!(lock = %self.name, "Lock released");
        }
    }
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, name: &str) -> Result<Arc<AsyncMutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        Ok(locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone())
    }

    /// Number of names currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.lock().map(|locks| locks.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquires every lock in `names` in the given order.
    ///
    /// `names` must already be canonical. Each acquisition waits at most
    /// `timeout`. Guards taken before a timeout are dropped on error.
    pub async fn acquire(&self, names: &[String], timeout: Duration) -> Result<Vec<LockGuard>> {
        let mut guards = Vec::with_capacity(names.len());
        for name in names {
            let lock = self.lock_for(name)?;
            // A timed-out waiter still owes the table a prune.
            let mut pending = LockGuard {
                name: name.clone(),
                guard: None,
                table: self.locks.clone(),
            };
            let acquired = tokio::time::timeout(timeout, lock.lock_owned()).await;
            let Ok(guard) = acquired else {
                return Err(StoreError::LockTimeout { name: name.clone() });
            };
            pending.guard = Some(guard);
            tracing::trace!(lock = %name, "Lock acquired");
            guards.push(pending);
        }
        Ok(guards)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_names_are_sorted_and_unique() {
        let names = canonical_lock_names(["order_b", "account_a", "order_b", "account_a"]);
        assert_eq!(names, vec!["account_a".to_string(), "order_b".to_string()]);
    }

    #[tokio::test]
    async fn test_acquire_excludes_second_holder() {
        let manager = LockManager::new();
        let names = canonical_lock_names(["account_1"]);

        let guards = manager.acquire(&names, Duration::from_millis(50)).await.unwrap();
        let second = manager.acquire(&names, Duration::from_millis(20)).await;
        assert!(matches!(second, Err(StoreError::LockTimeout { .. })));

        drop(guards);
        assert!(manager.acquire(&names, Duration::from_millis(20)).await.is_ok());
    }

    #[tokio::test]
    async fn test_released_locks_leave_no_entries() {
        let manager = LockManager::new();
        let names = canonical_lock_names(["account_1", "order_1"]);

        let guards = manager.acquire(&names, Duration::from_millis(50)).await.unwrap();
        assert_eq!(manager.len(), 2);
        let timed_out = manager.acquire(&names, Duration::from_millis(10)).await;
        assert!(timed_out.is_err());
        assert_eq!(manager.len(), 2);

        drop(guards);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_entry_survives_while_a_waiter_is_queued() {
        let manager = Arc::new(LockManager::new());
        let names = canonical_lock_names(["order_1"]);
        let first = manager.acquire(&names, Duration::from_millis(50)).await.unwrap();

        let waiter = {
            let manager = manager.clone();
            let names = names.clone();
            tokio::spawn(async move {
                let guards = manager.acquire(&names, Duration::from_secs(1)).await.unwrap();
                manager.len() + guards.len()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        drop(first);

        // The waiter saw its own entry in the table while holding the lock.
        assert_eq!(waiter.await.unwrap(), 2);
        assert!(manager.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_names_do_not_contend() {
        let manager = LockManager::new();
        let _a = manager
            .acquire(&canonical_lock_names(["a"]), Duration::from_millis(20))
            .await
            .unwrap();
        assert!(
            manager
                .acquire(&canonical_lock_names(["b"]), Duration::from_millis(20))
                .await
                .is_ok()
        );
    }
}
