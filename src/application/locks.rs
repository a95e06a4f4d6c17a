use std::hash::Hash;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Async mutexes handed out per key.
///
/// Serializes read-recompute-write sequences on the same record (an invoice's
/// payments, a numbering sequence) while letting unrelated keys proceed.
/// An entry lives only while some guard holds or waits on it.
pub struct KeyedLocks<K> {
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
}

impl<K> KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
        }
    }

    /// Wait for exclusive access to `key`. Released when the guard drops.
    pub async fn lock(&self, key: K) -> KeyGuard<K> {
        // Clone the Arc out first so the shard lock is not held across the await
        let mutex = self.locks.entry(key.clone()).or_default().value().clone();
        let guard = mutex.lock_owned().await;
        KeyGuard {
            locks: self.locks.clone(),
            key,
            guard: Some(guard),
        }
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl<K> Default for KeyedLocks<K>
where
    K: Eq + Hash + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive access to one key of a [`KeyedLocks`].
pub struct KeyGuard<K>
where
    K: Eq + Hash,
{
    locks: Arc<DashMap<K, Arc<Mutex<()>>>>,
    key: K,
    guard: Option<OwnedMutexGuard<()>>,
}

impl<K> Drop for KeyGuard<K>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or waits on the key
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_same_key_is_exclusive() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let guard = locks.lock(1).await;

        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(1).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn test_different_keys_do_not_block() {
        let locks = KeyedLocks::<u32>::new();
        let _a = locks.lock(1).await;
        let _b = locks.lock(2).await;
        assert_eq!(locks.len(), 2);
    }

    #[tokio::test]
    async fn test_entries_are_released_with_their_guard() {
        let locks = KeyedLocks::<u32>::new();
        let held = locks.lock(1).await;
        drop(locks.lock(2).await);
        assert_eq!(locks.len(), 1);

        drop(held);
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_keeps_entry_alive() {
        let locks = Arc::new(KeyedLocks::<u32>::new());
        let guard = locks.lock(1).await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(1).await;
                tokio::time::sleep(Duration::from_millis(20)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        // The waiter still references the entry after the holder leaves
        drop(guard);
        assert_eq!(locks.len(), 1);

        waiter.await.unwrap();
        assert!(locks.is_empty());
    }
}
