//! Broker seam used by the relay and by event producers
//!
//! Subscribers are always dedicated connections obtained from a
//! [`SubscriberFactory`], never borrowed from a shared pool, so a slow stream
//! cannot starve request traffic. Publishers acquire and release a connection
//! per call.

pub mod memory;
pub mod publisher;
pub mod redis_pubsub;

pub use memory::MemoryBroker;
pub use publisher::publish_envelope;
pub use redis_pubsub::{RedisPublisher, RedisSubscriberFactory};

use async_trait::async_trait;

use crate::Result;

/// A message delivered on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerMessage {
    pub channel: String,
    pub payload: String,
}

/// One dedicated subscriber connection
#[async_trait]
pub trait BrokerSubscriber: Send {
    async fn subscribe(&mut self, channels: &[String]) -> Result<()>;

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<()>;

    /// Next message on any subscribed channel.
    ///
    /// Returns `None` once the underlying connection is gone. Must be
    /// cancel-safe: it is polled inside `tokio::select!`.
    async fn next_message(&mut self) -> Option<BrokerMessage>;

    /// Release the connection
    async fn close(self: Box<Self>);
}

/// Opens dedicated subscriber connections
#[async_trait]
pub trait SubscriberFactory: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn BrokerSubscriber>>;
}

/// Publishes one payload to one channel
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Returns the number of subscribers that received the message
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize>;
}
