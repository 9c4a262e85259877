pub mod error;
pub mod pubsub;
pub mod redis_url;

pub use error::{Error, Result};
pub use pubsub::{
    publish_envelope, BrokerMessage, BrokerSubscriber, EventPublisher, MemoryBroker,
    RedisPublisher, RedisSubscriberFactory, SubscriberFactory,
};
pub use redis_url::{normalize_redis_url, wait_for_redis};
