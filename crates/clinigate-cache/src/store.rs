//! Cache store keyed by (normalized resource path, tenant).
//!
//! ## Cache Key Format
//!
//! `{normalized_path}:{tenant_id}` — e.g. `/architecture/config:clinic-1`.
//! The query string is stripped and trailing slashes are trimmed, so
//! `/patients?page=2` and `/patients/` share one entry per tenant.
//! Tenant ids are opaque strings from the identity provider; `%` and `:`
//! are percent-escaped in the tenant segment so the last raw `:` of a key
//! is always the path/tenant separator.
//!
//! ## Eviction
//!
//! Expired entries are removed lazily on access; the background sweeper
//! ([`crate::sweep`]) purges them eagerly as an optimization. Correctness
//! never depends on the sweeper running.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use clinigate_core::TenantId;

/// A cached payload with TTL support.
///
/// The payload is wrapped in `Arc` so cache hits hand out a cheap clone
/// instead of copying the body; once inserted, the store owns the bytes
/// exclusively.
#[derive(Clone, Debug)]
pub struct CachedEntry {
    pub data: Arc<Vec<u8>>,
    pub inserted_at: Instant,
    pub ttl: Duration,
}

impl CachedEntry {
    pub fn new(data: Vec<u8>, ttl: Duration) -> Self {
        Self {
            data: Arc::new(data),
            inserted_at: Instant::now(),
            ttl,
        }
    }

    /// An entry is expired iff more than `ttl` has elapsed since insertion.
    pub fn is_expired(&self) -> bool {
        self.inserted_at.elapsed() > self.ttl
    }
}

/// Concurrent in-process cache store.
///
/// Explicitly constructed and dependency-injected; there is no global
/// instance, so tests can run isolated stores side by side. Clones share
/// the same underlying map.
#[derive(Clone)]
pub struct CacheStore {
    entries: Arc<DashMap<String, CachedEntry>>,
    default_ttl: Duration,
}

impl CacheStore {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Compute the cache key for a resource path and tenant.
    pub fn resource_key(path: &str, tenant: &TenantId) -> String {
        format!("{}:{}", normalize_path(path), escape_tenant(tenant))
    }

    /// Get a payload, treating absent and expired entries as a miss.
    /// An expired-but-present entry is deleted on access.
    pub fn get(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        let entry = self.entries.get(key)?;
        if entry.is_expired() {
            drop(entry);
            self.entries.remove(key);
            tracing::debug!(key = %key, "cache miss (expired)");
            return None;
        }
        Some(Arc::clone(&entry.data))
    }

    /// Insert a payload, unconditionally overwriting any existing entry.
    /// `ttl = None` uses the store's default TTL.
    pub fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) {
        let ttl = ttl.unwrap_or(self.default_ttl);
        self.entries
            .insert(key.to_string(), CachedEntry::new(value, ttl));
        tracing::debug!(key = %key, ttl_secs = ttl.as_secs(), "cache set");
    }

    /// Remove one entry. Absent keys are a no-op, never an error.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            tracing::debug!(key = %key, "cache invalidated");
        }
        removed
    }

    /// Remove every entry whose key contains `substring` and, when a
    /// tenant is given, belongs to exactly that tenant. Returns the
    /// removed count. The escaped tenant segment contains no raw `:`, so
    /// the suffix match below cannot cross into another tenant whose id
    /// merely ends with this one.
    pub fn delete_by_pattern(&self, substring: &str, tenant: Option<&TenantId>) -> usize {
        let suffix = tenant.map(|t| format!(":{}", escape_tenant(t)));
        let victims: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| {
                entry.key().contains(substring)
                    && suffix
                        .as_deref()
                        .is_none_or(|s| entry.key().ends_with(s))
            })
            .map(|entry| entry.key().clone())
            .collect();

        let mut removed = 0;
        for key in victims {
            if self.entries.remove(&key).is_some() {
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::debug!(
                pattern = %substring,
                tenant = tenant.map(|t| t.as_str()).unwrap_or("*"),
                removed,
                "cache pattern invalidation"
            );
        }
        removed
    }

    /// Purge all expired entries. Returns the purged count.
    pub fn sweep(&self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        before - self.entries.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
        }
    }
}

/// Cache statistics for logging and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
}

/// Escape `%` and `:` in the tenant segment of a cache key. Injective,
/// so two distinct tenant ids never produce the same segment.
fn escape_tenant(tenant: &TenantId) -> String {
    tenant.as_str().replace('%', "%25").replace(':', "%3A")
}

/// Strip the query string and trim trailing slashes.
fn normalize_path(path: &str) -> &str {
    let path = path.split('?').next().unwrap_or(path);
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() { "/" } else { trimmed }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id)
    }

    fn store() -> CacheStore {
        CacheStore::new(Duration::from_secs(60))
    }

    #[test]
    fn key_normalization_strips_query_and_trailing_slash() {
        let t = tenant("clinic-1");
        assert_eq!(
            CacheStore::resource_key("/patients?page=2", &t),
            "/patients:clinic-1"
        );
        assert_eq!(
            CacheStore::resource_key("/patients/", &t),
            "/patients:clinic-1"
        );
        assert_eq!(CacheStore::resource_key("/", &t), "/:clinic-1");
    }

    #[test]
    fn set_get_round_trip() {
        let store = store();
        let key = CacheStore::resource_key("/patients", &tenant("t1"));
        store.set(&key, b"payload".to_vec(), None);
        assert_eq!(store.get(&key).as_deref().map(|v| v.as_slice()), Some(&b"payload"[..]));
    }

    #[test]
    fn set_overwrites_unconditionally() {
        let store = store();
        store.set("k", b"one".to_vec(), None);
        store.set("k", b"two".to_vec(), None);
        assert_eq!(store.get("k").unwrap().as_slice(), b"two");
        assert_eq!(store.stats().entries, 1);
    }

    #[test]
    fn delete_is_noop_on_absent_key() {
        let store = store();
        assert!(!store.delete("missing"));
        store.set("k", vec![1], None);
        assert!(store.delete("k"));
        assert!(!store.delete("k"));
    }

    #[test]
    fn expired_entries_miss_and_are_removed_on_access() {
        let store = store();
        store.set("k", vec![1], Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(5));
        assert!(store.get("k").is_none());
        assert_eq!(store.stats().entries, 0);
    }

    #[test]
    fn sweep_purges_only_expired() {
        let store = store();
        store.set("live", vec![1], Some(Duration::from_secs(60)));
        store.set("dead", vec![2], Some(Duration::ZERO));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(store.sweep(), 1);
        assert!(store.get("live").is_some());
        assert!(store.get("dead").is_none());
    }

    #[test]
    fn pattern_delete_scopes_to_tenant() {
        let store = store();
        let t1 = tenant("t1");
        let t2 = tenant("t2");
        store.set(&CacheStore::resource_key("/patients", &t1), vec![1], None);
        store.set(&CacheStore::resource_key("/patients", &t2), vec![2], None);
        store.set(&CacheStore::resource_key("/appointments", &t1), vec![3], None);

        let removed = store.delete_by_pattern("/patients", Some(&t1));
        assert_eq!(removed, 1);
        assert!(store.get(&CacheStore::resource_key("/patients", &t1)).is_none());
        assert!(store.get(&CacheStore::resource_key("/patients", &t2)).is_some());
        assert!(store.get(&CacheStore::resource_key("/appointments", &t1)).is_some());
    }

    #[test]
    fn pattern_delete_matches_tenant_segment_exactly() {
        let store = store();
        let a = tenant("a");
        let ba = tenant("b:a");
        store.set(&CacheStore::resource_key("/patients", &a), vec![1], None);
        store.set(&CacheStore::resource_key("/patients", &ba), vec![2], None);

        // Tenant "a" must not reach entries of tenant "b:a".
        let removed = store.delete_by_pattern("patients", Some(&a));
        assert_eq!(removed, 1);
        assert!(store.get(&CacheStore::resource_key("/patients", &a)).is_none());
        assert!(store.get(&CacheStore::resource_key("/patients", &ba)).is_some());

        // And the reverse.
        store.set(&CacheStore::resource_key("/patients", &a), vec![1], None);
        let removed = store.delete_by_pattern("patients", Some(&ba));
        assert_eq!(removed, 1);
        assert!(store.get(&CacheStore::resource_key("/patients", &a)).is_some());
    }

    #[test]
    fn colon_and_percent_tenants_get_distinct_keys() {
        let key_colon = CacheStore::resource_key("/patients", &tenant("b:a"));
        let key_escaped = CacheStore::resource_key("/patients", &tenant("b%3Aa"));
        let key_plain = CacheStore::resource_key("/patients", &tenant("a"));
        assert_ne!(key_colon, key_escaped);
        assert_ne!(key_colon, key_plain);
        assert!(!key_colon.ends_with(":a"));
    }

    #[test]
    fn pattern_delete_without_tenant_spans_tenants() {
        let store = store();
        store.set(&CacheStore::resource_key("/patients", &tenant("t1")), vec![1], None);
        store.set(&CacheStore::resource_key("/patients", &tenant("t2")), vec![2], None);
        assert_eq!(store.delete_by_pattern("/patients", None), 2);
        assert_eq!(store.stats().entries, 0);
    }

    #[test]
    fn tenant_isolation_of_keys() {
        let store = store();
        let a = tenant("clinic-a");
        let b = tenant("clinic-b");
        let key_a = CacheStore::resource_key("/architecture/config", &a);
        store.set(&key_a, b"a-data".to_vec(), None);

        let key_b = CacheStore::resource_key("/architecture/config", &b);
        assert_ne!(key_a, key_b);
        assert!(store.get(&key_b).is_none());
    }

    #[test]
    fn concurrent_access_does_not_corrupt() {
        let store = store();
        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for j in 0..100 {
                    let key = format!("/patients:{}", i % 2);
                    store.set(&key, vec![j], None);
                    store.get(&key);
                    store.delete(&key);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        store.sweep();
    }
}
