//! In-process broker
//!
//! Used in single-node mode (no Redis configured) and by tests. Each
//! subscriber is its own "connection" with a private mailbox; the registry
//! holds the only sender, so severing a connection ends its message stream
//! the same way a dropped Redis connection does.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

use super::{BrokerMessage, BrokerSubscriber, EventPublisher, SubscriberFactory};
use crate::{Error, Result};

type ConnectionId = u64;

#[derive(Default)]
struct Registry {
    /// channel -> subscribed connection ids, in subscription order
    channels: DashMap<String, Vec<ConnectionId>>,
    /// connection id -> mailbox
    mailboxes: DashMap<ConnectionId, mpsc::UnboundedSender<BrokerMessage>>,
    next_id: AtomicU64,
    opened: AtomicUsize,
    closed: AtomicUsize,
    unsubscribes: AtomicUsize,
}

impl Registry {
    fn remove_from_channel(&self, channel: &str, id: ConnectionId) -> bool {
        let mut removed = false;
        if let Some(mut ids) = self.channels.get_mut(channel) {
            let before = ids.len();
            ids.retain(|sub| *sub != id);
            removed = ids.len() != before;
        }
        self.channels.remove_if(channel, |_, ids| ids.is_empty());
        removed
    }
}

#[derive(Clone, Default)]
pub struct MemoryBroker {
    registry: Arc<Registry>,
}

impl MemoryBroker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live subscriptions on `channel`
    #[must_use]
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.registry
            .channels
            .get(channel)
            .map_or(0, |ids| ids.len())
    }

    /// Number of live subscriptions across all channels
    #[must_use]
    pub fn total_subscriptions(&self) -> usize {
        self.registry.channels.iter().map(|entry| entry.value().len()).sum()
    }

    /// Channel subscriptions removed so far, by unsubscribe or close
    #[must_use]
    pub fn unsubscribe_count(&self) -> usize {
        self.registry.unsubscribes.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connections_opened(&self) -> usize {
        self.registry.opened.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn connections_closed(&self) -> usize {
        self.registry.closed.load(Ordering::SeqCst)
    }

    /// Drop every subscriber connection, as if the broker went away
    pub fn sever_all(&self) {
        self.registry.mailboxes.clear();
        debug!("All in-memory subscriber connections severed");
    }
}

#[async_trait]
impl SubscriberFactory for MemoryBroker {
    async fn connect(&self) -> Result<Box<dyn BrokerSubscriber>> {
        let id = self.registry.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.mailboxes.insert(id, tx);
        self.registry.opened.fetch_add(1, Ordering::SeqCst);

        Ok(Box::new(MemorySubscriber {
            id,
            registry: self.registry.clone(),
            rx,
            channels: HashSet::new(),
            closed: false,
        }))
    }
}

#[async_trait]
impl EventPublisher for MemoryBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<usize> {
        let Some(ids) = self.registry.channels.get(channel).map(|ids| ids.clone()) else {
            return Ok(0);
        };

        let mut delivered = 0;
        for id in ids {
            if let Some(mailbox) = self.registry.mailboxes.get(&id) {
                let msg = BrokerMessage {
                    channel: channel.to_string(),
                    payload: payload.to_string(),
                };
                if mailbox.send(msg).is_ok() {
                    delivered += 1;
                }
            }
        }
        Ok(delivered)
    }
}

struct MemorySubscriber {
    id: ConnectionId,
    registry: Arc<Registry>,
    rx: mpsc::UnboundedReceiver<BrokerMessage>,
    channels: HashSet<String>,
    closed: bool,
}

impl MemorySubscriber {
    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        for channel in self.channels.drain() {
            if self.registry.remove_from_channel(&channel, self.id) {
                self.registry.unsubscribes.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.registry.mailboxes.remove(&self.id);
        self.registry.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerSubscriber for MemorySubscriber {
    async fn subscribe(&mut self, channels: &[String]) -> Result<()> {
        if !self.registry.mailboxes.contains_key(&self.id) {
            return Err(Error::Closed);
        }
        for channel in channels {
            if self.channels.insert(channel.clone()) {
                self.registry
                    .channels
                    .entry(channel.clone())
                    .or_default()
                    .push(self.id);
            }
        }
        Ok(())
    }

    async fn unsubscribe(&mut self, channels: &[String]) -> Result<()> {
        for channel in channels {
            if self.channels.remove(channel) && self.registry.remove_from_channel(channel, self.id) {
                self.registry.unsubscribes.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }

    async fn next_message(&mut self) -> Option<BrokerMessage> {
        self.rx.recv().await
    }

    async fn close(mut self: Box<Self>) {
        self.release();
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers_in_order() {
        let broker = MemoryBroker::new();
        let mut sub = broker.connect().await.unwrap();
        sub.subscribe(&["thread:a".to_string()]).await.unwrap();

        for i in 0..3 {
            assert_eq!(broker.publish("thread:a", &i.to_string()).await.unwrap(), 1);
        }
        assert_eq!(broker.publish("thread:b", "x").await.unwrap(), 0);

        for i in 0..3 {
            let msg = sub.next_message().await.unwrap();
            assert_eq!(msg.channel, "thread:a");
            assert_eq!(msg.payload, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_unsubscribe_and_close_are_counted_once() {
        let broker = MemoryBroker::new();
        let mut sub = broker.connect().await.unwrap();
        let channels = vec!["thread:a".to_string(), "agent_run:r:new_response".to_string()];
        sub.subscribe(&channels).await.unwrap();
        assert_eq!(broker.total_subscriptions(), 2);

        sub.unsubscribe(&channels).await.unwrap();
        sub.unsubscribe(&channels).await.unwrap();
        assert_eq!(broker.unsubscribe_count(), 2);
        assert_eq!(broker.total_subscriptions(), 0);

        sub.close().await;
        assert_eq!(broker.connections_opened(), 1);
        assert_eq!(broker.connections_closed(), 1);
        assert_eq!(broker.unsubscribe_count(), 2);
    }

    #[tokio::test]
    async fn test_sever_ends_message_stream() {
        let broker = MemoryBroker::new();
        let mut sub = broker.connect().await.unwrap();
        sub.subscribe(&["thread:a".to_string()]).await.unwrap();

        broker.sever_all();
        assert!(sub.next_message().await.is_none());
        assert!(matches!(
            sub.subscribe(&["thread:b".to_string()]).await,
            Err(Error::Closed)
        ));
    }

    #[tokio::test]
    async fn test_drop_releases_subscriptions() {
        let broker = MemoryBroker::new();
        {
            let mut sub = broker.connect().await.unwrap();
            sub.subscribe(&["thread:a".to_string()]).await.unwrap();
            assert_eq!(broker.subscriber_count("thread:a"), 1);
        }
        assert_eq!(broker.subscriber_count("thread:a"), 0);
        assert_eq!(broker.connections_closed(), 1);
    }
}
