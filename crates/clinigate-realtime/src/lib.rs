//! Change-notification subscriptions driving reactive cache invalidation.
//!
//! One logical stream exists per (tenant, table). Events are mapped to
//! cache keys and deleted; delivery is at-most-once, and the cache TTL is
//! the staleness bound when events are lost.

pub mod event;
pub mod feed;
pub mod invalidation;
pub mod redis;
pub mod registry;

pub use event::{ChangeEvent, ChangeKind};
pub use feed::{ChangeFeed, FeedError, FeedHandle, FeedSubscription, MemoryFeed};
pub use redis::RedisFeed;
pub use registry::SubscriptionRegistry;
