//! Mapping from change events to cache deletions.

use clinigate_cache::CacheStore;
use clinigate_core::{TenantId, path_for_table};

use crate::event::ChangeEvent;

/// Apply one change event against the cache, scoped to the event's tenant.
/// Tracked tables map 1:1 to a read path and get a targeted delete;
/// anything else falls back to pattern invalidation by table name rather
/// than being silently dropped. Returns the number of entries removed.
///
/// Idempotent by construction: deleting an absent key is a no-op, so
/// duplicate or out-of-order delivery is safe.
pub fn apply_invalidation(store: &CacheStore, tenant: &TenantId, event: &ChangeEvent) -> usize {
    let removed = match path_for_table(&event.table) {
        Some(path) => {
            let key = CacheStore::resource_key(path, tenant);
            usize::from(store.delete(&key))
        }
        None => store.delete_by_pattern(&event.table, Some(tenant)),
    };

    tracing::debug!(
        tenant = %tenant,
        table = %event.table,
        kind = ?event.event,
        removed,
        "change event applied"
    );
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeKind;
    use std::time::Duration;

    fn seeded_store(tenant: &TenantId) -> CacheStore {
        let store = CacheStore::new(Duration::from_secs(60));
        store.set(
            &CacheStore::resource_key("/architecture/config", tenant),
            b"cfg".to_vec(),
            None,
        );
        store.set(
            &CacheStore::resource_key("/patients", tenant),
            b"rows".to_vec(),
            None,
        );
        store
    }

    #[test]
    fn mapped_table_deletes_exact_key() {
        let tenant = TenantId::new("t1");
        let store = seeded_store(&tenant);

        let removed = apply_invalidation(
            &store,
            &tenant,
            &ChangeEvent::new(ChangeKind::Update, "architecture_configs"),
        );

        assert_eq!(removed, 1);
        assert!(store
            .get(&CacheStore::resource_key("/architecture/config", &tenant))
            .is_none());
        assert!(store
            .get(&CacheStore::resource_key("/patients", &tenant))
            .is_some());
    }

    #[test]
    fn unrelated_table_is_a_noop() {
        let tenant = TenantId::new("t1");
        let store = seeded_store(&tenant);

        let removed = apply_invalidation(
            &store,
            &tenant,
            &ChangeEvent::new(ChangeKind::Insert, "billing_records"),
        );

        assert_eq!(removed, 0);
        assert_eq!(store.stats().entries, 2);
    }

    #[test]
    fn other_tenant_entries_survive() {
        let t1 = TenantId::new("t1");
        let t2 = TenantId::new("t2");
        let store = seeded_store(&t1);
        store.set(
            &CacheStore::resource_key("/architecture/config", &t2),
            b"cfg2".to_vec(),
            None,
        );

        apply_invalidation(
            &store,
            &t1,
            &ChangeEvent::new(ChangeKind::Delete, "architecture_configs"),
        );

        assert!(store
            .get(&CacheStore::resource_key("/architecture/config", &t2))
            .is_some());
    }

    #[test]
    fn duplicate_delivery_is_idempotent() {
        let tenant = TenantId::new("t1");
        let store = seeded_store(&tenant);
        let event = ChangeEvent::new(ChangeKind::Update, "patients");

        assert_eq!(apply_invalidation(&store, &tenant, &event), 1);
        assert_eq!(apply_invalidation(&store, &tenant, &event), 0);
    }
}
