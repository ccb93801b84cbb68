//! The change-feed seam: an external push channel delivering row-level
//! mutation events, one logical stream per (tenant, table).

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use clinigate_core::TenantId;

use crate::event::ChangeEvent;

/// Buffer for one subscription's event stream. Invalidation is idempotent,
/// so dropped events only extend staleness up to the cache TTL.
pub const SUBSCRIPTION_BUFFER: usize = 64;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("feed connection failed: {0}")]
    Connect(String),

    #[error("feed subscription failed: {0}")]
    Subscribe(String),
}

/// Opaque handle owning a subscription's transport task. Dropping it
/// releases the external subscription.
pub struct FeedHandle {
    task: Option<JoinHandle<()>>,
}

impl FeedHandle {
    pub fn from_task(task: JoinHandle<()>) -> Self {
        Self { task: Some(task) }
    }

    /// Handle for feeds whose transport needs no dedicated task.
    pub fn detached() -> Self {
        Self { task: None }
    }
}

impl Drop for FeedHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// An established subscription: the event stream plus its transport handle.
pub struct FeedSubscription {
    pub events: mpsc::Receiver<ChangeEvent>,
    pub handle: FeedHandle,
}

/// External change feed. Implementations must scope every channel by
/// tenant; a subscriber for tenant A must never observe tenant B's events.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn subscribe(
        &self,
        tenant: &TenantId,
        table: &str,
    ) -> Result<FeedSubscription, FeedError>;
}

/// In-memory feed used in tests and single-process setups. Events published
/// while no subscriber is attached are dropped (at-most-once delivery).
#[derive(Default)]
pub struct MemoryFeed {
    channels: DashMap<String, broadcast::Sender<ChangeEvent>>,
}

impl MemoryFeed {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn channel_key(tenant: &TenantId, table: &str) -> String {
        format!("{tenant}:{table}")
    }

    /// Publish an event to one tenant's stream for a table. Returns the
    /// number of subscribers that received it.
    pub fn publish(&self, tenant: &TenantId, event: ChangeEvent) -> usize {
        let key = Self::channel_key(tenant, &event.table);
        match self.channels.get(&key) {
            Some(sender) => sender.send(event).unwrap_or(0),
            None => 0,
        }
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe(
        &self,
        tenant: &TenantId,
        table: &str,
    ) -> Result<FeedSubscription, FeedError> {
        let key = Self::channel_key(tenant, table);
        let mut channel_rx = self
            .channels
            .entry(key)
            .or_insert_with(|| broadcast::channel(SUBSCRIPTION_BUFFER).0)
            .subscribe();

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(async move {
            loop {
                match channel_rx.recv().await {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "memory feed subscriber lagged, events dropped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(FeedSubscription {
            events: rx,
            handle: FeedHandle::from_task(task),
        })
    }
}
