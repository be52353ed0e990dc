use crate::domain::objective::Objective;
use crate::domain::types::Destination;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

struct LockEntry {
    mutex: Arc<AsyncMutex<()>>,
    /// Holders plus waiters. The entry is evicted when this drops to zero.
    users: usize,
}

/// Mutual exclusion over sets of channels.
///
/// Channel ids are always acquired in ascending byte order, so two operations
/// sharing channels cannot wait on each other in a cycle. Per-channel mutexes
/// are created on demand and dropped again once nobody holds or awaits them.
#[derive(Default)]
pub struct ChannelLocker {
    locks: Mutex<HashMap<Destination, LockEntry>>,
}

impl ChannelLocker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locks every channel the objective touches.
    pub async fn lock(&self, objective: &dyn Objective) -> ChannelLockGuard<'_> {
        self.lock_ids(objective.channels()).await
    }

    pub async fn lock_ids(&self, ids: impl IntoIterator<Item = Destination>) -> ChannelLockGuard<'_> {
        let mut ids: Vec<Destination> = ids.into_iter().collect();
        ids.sort_by(|a, b| a.as_bytes().cmp(b.as_bytes()));
        ids.dedup();

        let mutexes: Vec<Arc<AsyncMutex<()>>> = {
            let mut locks = self.locks.lock();
            ids.iter()
                .map(|id| {
                    let entry = locks.entry(*id).or_insert_with(|| LockEntry {
                        mutex: Arc::new(AsyncMutex::new(())),
                        users: 0,
                    });
                    entry.users += 1;
                    Arc::clone(&entry.mutex)
                })
                .collect()
        };

        // Registered before awaiting so a cancelled acquisition still gives
        // its reservations back on drop.
        let mut guard = ChannelLockGuard {
            locker: self,
            ids,
            held: Vec::with_capacity(mutexes.len()),
        };
        for mutex in mutexes {
            guard.held.push(mutex.lock_owned().await);
        }
        guard
    }

    /// Number of channels with a live mutex.
    pub fn tracked(&self) -> usize {
        self.locks.lock().len()
    }

    fn release(&self, ids: &[Destination]) {
        let mut locks = self.locks.lock();
        for id in ids {
            if let Some(entry) = locks.get_mut(id) {
                entry.users -= 1;
                if entry.users == 0 {
                    locks.remove(id);
                }
            }
        }
    }
}

/// Holds a set of channel locks; dropping it releases them in acquisition order.
pub struct ChannelLockGuard<'a> {
    locker: &'a ChannelLocker,
    ids: Vec<Destination>,
    held: Vec<OwnedMutexGuard<()>>,
}

impl ChannelLockGuard<'_> {
    pub fn channels(&self) -> &[Destination] {
        &self.ids
    }
}

impl Drop for ChannelLockGuard<'_> {
    fn drop(&mut self) {
        for guard in self.held.drain(..) {
            drop(guard);
        }
        self.locker.release(&self.ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn id(byte: u8) -> Destination {
        Destination([byte; 32])
    }

    #[tokio::test]
    async fn test_ids_are_sorted_and_deduplicated() {
        let locker = ChannelLocker::new();
        let guard = locker.lock_ids([id(3), id(1), id(3), id(2)]).await;
        assert_eq!(guard.channels(), &[id(1), id(2), id(3)]);
        assert_eq!(locker.tracked(), 3);
        drop(guard);
        assert_eq!(locker.tracked(), 0);
    }

    #[tokio::test]
    async fn test_overlapping_sets_are_serialized() {
        let locker = ChannelLocker::new();
        let first = locker.lock_ids([id(1), id(2)]).await;

        // Shares channel 2, so it must wait.
        assert!(
            timeout(Duration::from_millis(50), locker.lock_ids([id(2), id(3)]))
                .await
                .is_err()
        );
        // Disjoint sets proceed.
        let disjoint = timeout(Duration::from_millis(50), locker.lock_ids([id(4)]))
            .await
            .unwrap();
        drop(disjoint);

        drop(first);
        let second = timeout(Duration::from_millis(50), locker.lock_ids([id(2), id(3)]))
            .await
            .unwrap();
        assert_eq!(second.channels(), &[id(2), id(3)]);
    }

    #[tokio::test]
    async fn test_cancelled_acquisition_releases_reservations() {
        let locker = ChannelLocker::new();
        let held = locker.lock_ids([id(1)]).await;
        let _ = timeout(Duration::from_millis(20), locker.lock_ids([id(1), id(2)])).await;
        drop(held);
        assert_eq!(locker.tracked(), 0);
    }

    #[tokio::test]
    async fn test_empty_set() {
        let locker = ChannelLocker::new();
        let guard = locker.lock_ids(Vec::new()).await;
        assert!(guard.channels().is_empty());
    }
}
