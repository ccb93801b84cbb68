//! Per-tenant subscription lifecycle.
//!
//! At most one active subscription exists per (tenant, table). Subscriptions
//! are created lazily after a tenant's first successful authentication and
//! live until explicit teardown or process shutdown; establishment failures
//! are logged and retried on the tenant's next request.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;

use clinigate_cache::CacheStore;
use clinigate_core::{TRACKED_RESOURCES, TenantId};

use crate::feed::{ChangeFeed, FeedHandle, FeedSubscription};
use crate::invalidation::apply_invalidation;

/// One live (tenant, table) subscription: the transport handle plus the
/// invalidation worker draining it. Both stop when the entry is removed.
struct ActiveSubscription {
    _transport: FeedHandle,
    worker: JoinHandle<()>,
}

impl Drop for ActiveSubscription {
    fn drop(&mut self) {
        self.worker.abort();
    }
}

/// Registry of change-feed subscriptions, keyed by (tenant, table).
pub struct SubscriptionRegistry {
    feed: Arc<dyn ChangeFeed>,
    store: CacheStore,
    tables: Vec<String>,
    active: DashMap<(TenantId, String), ActiveSubscription>,
}

impl SubscriptionRegistry {
    /// Registry covering all tracked resource tables.
    pub fn new(feed: Arc<dyn ChangeFeed>, store: CacheStore) -> Self {
        Self::with_tables(
            feed,
            store,
            TRACKED_RESOURCES.iter().map(|r| r.table.to_string()).collect(),
        )
    }

    pub fn with_tables(feed: Arc<dyn ChangeFeed>, store: CacheStore, tables: Vec<String>) -> Self {
        Self {
            feed,
            store,
            tables,
            active: DashMap::new(),
        }
    }

    /// Ensure every tracked table has a live subscription for this tenant.
    /// Idempotent: already-subscribed pairs are left alone. Failures are
    /// logged and left for the tenant's next request to retry; the cache
    /// TTL bounds staleness in the meantime.
    pub async fn ensure_subscribed(&self, tenant: &TenantId) {
        for table in &self.tables {
            let key = (tenant.clone(), table.clone());
            if self.active.contains_key(&key) {
                continue;
            }

            match self.feed.subscribe(tenant, table).await {
                Ok(subscription) => self.install(key, subscription),
                Err(e) => {
                    tracing::warn!(
                        tenant = %tenant,
                        table = %table,
                        error = %e,
                        "change feed subscription failed, will retry on next request"
                    );
                }
            }
        }
    }

    fn install(&self, key: (TenantId, String), subscription: FeedSubscription) {
        use dashmap::mapref::entry::Entry;

        let (tenant, table) = key.clone();
        let FeedSubscription { mut events, handle } = subscription;

        match self.active.entry(key) {
            // A concurrent request won the race; drop the duplicate, which
            // releases its transport.
            Entry::Occupied(_) => {}
            Entry::Vacant(slot) => {
                let store = self.store.clone();
                let worker_tenant = tenant.clone();
                let worker_table = table.clone();
                let worker = tokio::spawn(async move {
                    while let Some(event) = events.recv().await {
                        apply_invalidation(&store, &worker_tenant, &event);
                    }
                    tracing::debug!(
                        tenant = %worker_tenant,
                        table = %worker_table,
                        "change feed stream ended"
                    );
                });
                slot.insert(ActiveSubscription {
                    _transport: handle,
                    worker,
                });
                tracing::debug!(tenant = %tenant, table = %table, "tenant subscription established");
            }
        }
    }

    pub fn is_subscribed(&self, tenant: &TenantId, table: &str) -> bool {
        self.active
            .contains_key(&(tenant.clone(), table.to_string()))
    }

    pub fn subscription_count(&self, tenant: &TenantId) -> usize {
        self.active
            .iter()
            .filter(|entry| entry.key().0 == *tenant)
            .count()
    }

    /// Tear down all of one tenant's subscriptions. Returns the number
    /// released.
    pub fn unsubscribe_tenant(&self, tenant: &TenantId) -> usize {
        let keys: Vec<_> = self
            .active
            .iter()
            .filter(|entry| entry.key().0 == *tenant)
            .map(|entry| entry.key().clone())
            .collect();
        let mut released = 0;
        for key in keys {
            if self.active.remove(&key).is_some() {
                released += 1;
            }
        }
        if released > 0 {
            tracing::info!(tenant = %tenant, released, "tenant subscriptions released");
        }
        released
    }

    /// Release every subscription; used at process shutdown.
    pub fn shutdown(&self) {
        let count = self.active.len();
        self.active.clear();
        if count > 0 {
            tracing::info!(count, "all change feed subscriptions released");
        }
    }
}
