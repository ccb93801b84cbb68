//! In-process tenant-scoped read cache with TTL eviction.

pub mod store;
pub mod sweep;

pub use store::{CacheStats, CacheStore, CachedEntry};
pub use sweep::{SweeperHandle, spawn_sweeper};
