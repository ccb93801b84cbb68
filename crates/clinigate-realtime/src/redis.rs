//! Redis pub/sub transport for the change feed.
//!
//! One channel per (tenant, table): `changes:{tenant}:{table}`. Payloads
//! are JSON-encoded [`ChangeEvent`]s. Each subscription holds a dedicated
//! pub/sub connection and reconnects with capped exponential backoff.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;

use clinigate_core::TenantId;

use crate::event::ChangeEvent;
use crate::feed::{ChangeFeed, FeedError, FeedHandle, FeedSubscription, SUBSCRIPTION_BUFFER};

const MAX_BACKOFF: Duration = Duration::from_secs(300);

/// Change feed backed by Redis pub/sub.
pub struct RedisFeed {
    redis_url: String,
}

impl RedisFeed {
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
        }
    }

    fn channel_name(tenant: &TenantId, table: &str) -> String {
        format!("changes:{tenant}:{table}")
    }
}

#[async_trait]
impl ChangeFeed for RedisFeed {
    async fn subscribe(
        &self,
        tenant: &TenantId,
        table: &str,
    ) -> Result<FeedSubscription, FeedError> {
        let channel = Self::channel_name(tenant, table);
        let client = redis::Client::open(self.redis_url.as_str())
            .map_err(|e| FeedError::Connect(e.to_string()))?;

        let (tx, rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let task = tokio::spawn(run_subscription(client, channel, tx));

        Ok(FeedSubscription {
            events: rx,
            handle: FeedHandle::from_task(task),
        })
    }
}

/// Receive loop for one channel, reconnecting until the receiver is gone.
async fn run_subscription(
    client: redis::Client,
    channel: String,
    tx: mpsc::Sender<ChangeEvent>,
) {
    let mut backoff = Duration::from_secs(1);
    loop {
        match listen(&client, &channel, &tx).await {
            Ok(()) => {
                // Receiver dropped, subscription is done.
                return;
            }
            Err(e) => {
                if tx.is_closed() {
                    return;
                }
                tracing::warn!(
                    channel = %channel,
                    error = %e,
                    backoff_secs = backoff.as_secs(),
                    "change feed connection lost, reconnecting"
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

async fn listen(
    client: &redis::Client,
    channel: &str,
    tx: &mpsc::Sender<ChangeEvent>,
) -> Result<(), String> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| format!("failed to get pub/sub connection: {e}"))?;

    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| format!("failed to subscribe: {e}"))?;

    tracing::debug!(channel = %channel, "subscribed to change feed");

    let mut stream = pubsub.on_message();
    loop {
        match stream.next().await {
            Some(msg) => {
                let payload: String = match msg.get_payload() {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "unreadable feed payload");
                        continue;
                    }
                };
                match serde_json::from_str::<ChangeEvent>(&payload) {
                    Ok(event) => {
                        if tx.send(event).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        tracing::warn!(channel = %channel, error = %e, "malformed change event");
                    }
                }
            }
            None => {
                return Err("pub/sub connection closed".to_string());
            }
        }
    }
}
