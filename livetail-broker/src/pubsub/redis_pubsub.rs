use async_trait::async_trait;
use futures::stream::StreamExt;
use redis::{AsyncCommands, Client as RedisClient};
use tokio::time::{timeout, Duration};
use tracing::{debug, info, warn};

use super::{BrokerMessage, BrokerSubscriber, EventPublisher, SubscriberFactory};
use crate::redis_url::normalize_redis_url;
use crate::{Error, Result};

/// Default timeout for Redis operations
const REDIS_TIMEOUT_SECS: u64 = 5;

fn open_client(redis_url: &str) -> Result<RedisClient> {
    let url = normalize_redis_url(redis_url);
    RedisClient::open(url.as_str())
        .map_err(|e| Error::Configuration(format!("Invalid Redis URL: {e}")))
}

/// Opens one `redis::aio::PubSub` connection per relay session.
///
/// Each call to [`SubscriberFactory::connect`] dials a fresh connection; none
/// is shared with request handling or with other sessions.
#[derive(Clone)]
pub struct RedisSubscriberFactory {
    client: RedisClient,
    op_timeout: Duration,
}

impl RedisSubscriberFactory {
    pub fn new(redis_url: &str) -> Result<Self> {
        Ok(Self {
            client: open_client(redis_url)?,
            op_timeout: Duration::from_secs(REDIS_TIMEOUT_SECS),
        })
    }

    #[must_use]
    pub const fn with_timeout(mut self, op_timeout: Duration) -> Self {
        self.op_timeout = op_timeout;
        self
    }
}

#[async_trait]
impl SubscriberFactory for RedisSubscriberFactory {
    async fn connect(&self) -> Result<Box<dyn BrokerSubscriber>> {
        let pubsub = timeout(self.op_timeout, self.client.get_async_pubsub())
            .await
            .map_err(|_| Error::Timeout("Timed out getting Redis Pub/Sub connection".to_string()))??;

        debug!("Dedicated Redis subscriber connection opened");
        Ok(Box::new(RedisSubscriber {
            pubsub,
            op_timeout: self.op_timeout,
        }))
    }
}

struct RedisSubscriber {
    pubsub: redis::aio::PubSub,
    op_timeout: Duration,
}

#[async_trait]
impl BrokerSubscriber for RedisSubscriber {
    async fn subscribe(&mut self, channels: &[String]) -> Result<()> {
        for channel in channels {
            timeout(self.op_timeout, self.pubsub.subscribe(channel.as_str()))
                .await
                .map_err(|_| Error::Timeout(format!("Timed out subscribing to {channel}")))??;
            debug!(channel = %channel, "Subscribed to Redis channel");
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<()> {
        for channel in channels {
            timeout(self.op_timeout, self.pubsub.unsubscribe(channel.as_str()))
                .await
                .map_err(|_| Error::Timeout(format!("Timed out unsubscribing from {channel}")))??;
            debug!(channel = %channel, "Unsubscribed from Redis channel");
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Option<BrokerMessage> {
        let mut stream = self.pubsub.on_message();

        while let Some(msg) = stream.next().await {
            let channel = msg.get_channel_name().to_string();
            match msg.get_payload::<String>() {
                Ok(payload) => return Some(BrokerMessage { channel, payload }),
                Err(e) => {
                    warn!(error = %e, channel = %channel, "Invalid payload");
                }
            }
        }

        // Stream returned None -- the Redis connection was lost
        None
    }

    async fn close(self: Box<Self>) {
        // Dropping the PubSub closes its dedicated connection
        drop(self.pubsub);
        debug!("Dedicated Redis subscriber connection closed");
    }
}

/// Publisher that dials a new connection for every publish and releases it
/// afterwards, so producers hold no long-lived connection state.
#[derive(Clone)]
pub struct RedisPublisher {
    client: RedisClient,
    op_timeout: Duration,
}

impl RedisPublisher {
    pub fn new(redis_url: &str) -> Result<Self> {
        Ok(Self {
            client: open_client(redis_url)?,
            op_timeout: Duration::from_secs(REDIS_TIMEOUT_SECS),
        })
    }
}

#[async_trait]
impl EventPublisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let mut conn = timeout(self.op_timeout, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| Error::Timeout("Timed out getting Redis connection for publishing".to_string()))??;

        let subscribers: usize = timeout(self.op_timeout, conn.publish(channel, payload))
            .await
            .map_err(|_| Error::Timeout(format!("Timed out publishing to {channel}")))??;

        drop(conn);
        info!(channel = %channel, subscribers = subscribers, "Published to Redis");
        Ok(subscribers)
    }
}
