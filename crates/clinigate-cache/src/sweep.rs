//! Background sweeper for eager TTL eviction.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::store::CacheStore;

/// Guard for the sweeper task; aborts the task on drop so the sweeper
/// never outlives its owner.
pub struct SweeperHandle {
    handle: JoinHandle<()>,
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Spawn an owned background task purging expired entries on a fixed
/// interval. Purely an optimization: lazy eviction in the store is the
/// correctness backstop.
pub fn spawn_sweeper(store: CacheStore, interval: Duration) -> SweeperHandle {
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // First tick fires immediately; skip it so the initial sweep
        // happens one interval after startup.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let purged = store.sweep();
            if purged > 0 {
                tracing::debug!(purged, entries = store.stats().entries, "cache sweep");
            }
        }
    });
    SweeperHandle { handle }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sweeper_purges_on_interval() {
        let store = CacheStore::new(Duration::from_secs(60));
        store.set("dead", vec![1], Some(Duration::ZERO));

        let _guard = spawn_sweeper(store.clone(), Duration::from_millis(10));
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            if store.stats().entries == 0 {
                return;
            }
        }
        panic!("sweeper never purged the expired entry");
    }

    #[tokio::test]
    async fn dropping_the_handle_stops_the_sweeper() {
        let store = CacheStore::new(Duration::from_secs(60));
        let guard = spawn_sweeper(store.clone(), Duration::from_millis(5));
        drop(guard);
        // After dropping, new expired entries stay until lazily evicted.
        store.set("dead", vec![1], Some(Duration::ZERO));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(store.stats().entries, 1);
        assert!(store.get("dead").is_none());
    }
}
