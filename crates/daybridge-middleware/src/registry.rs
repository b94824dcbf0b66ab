//! [`Registry`] – per-node publisher / subscription handles keyed by topic.
//!
//! Handles are created lazily through the [`Transport`] and looked up by
//! exact topic string afterwards, so there is at most one live handle per
//! `(topic, direction)` pair.
//!
//! The registry is only touched from the consumer thread and therefore
//! carries no internal locking.

use std::collections::HashMap;
use std::sync::Arc;

use daybridge_types::BridgeError;
use tracing::debug;

use crate::transport::{MessageCallback, Publisher, Subscription, Transport};

/// Result of [`Registry::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeOutcome {
    /// A new transport-level subscription was created.
    Created,
    /// The topic already had a live subscription; nothing changed.
    AlreadyExists,
}

/// Result of [`Registry::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeOutcome {
    Removed,
    NotFound,
}

/// Topic → handle tables owned by a single node.
#[derive(Default)]
pub struct Registry {
    publishers: HashMap<String, Arc<dyn Publisher>>,
    subscriptions: HashMap<String, Arc<dyn Subscription>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the publisher for `topic`, advertising it on first use.
    ///
    /// # Errors
    ///
    /// Propagates the transport's error when advertising fails; nothing is
    /// inserted in that case.
    pub fn get_or_create_publisher(
        &mut self,
        transport: &dyn Transport,
        topic: &str,
    ) -> Result<Arc<dyn Publisher>, BridgeError> {
        if let Some(publisher) = self.publishers.get(topic) {
            return Ok(Arc::clone(publisher));
        }
        let publisher = transport.advertise(topic)?;
        debug!(topic, "publisher created");
        self.publishers
            .insert(topic.to_string(), Arc::clone(&publisher));
        Ok(publisher)
    }

    /// Subscribe `on_message` to `topic` unless a subscription already exists.
    ///
    /// `on_message` is dropped unused when the topic is already subscribed.
    pub fn subscribe(
        &mut self,
        transport: &dyn Transport,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<SubscribeOutcome, BridgeError> {
        if self.subscriptions.contains_key(topic) {
            return Ok(SubscribeOutcome::AlreadyExists);
        }
        let subscription = transport.subscribe(topic, on_message)?;
        debug!(topic, "subscription created");
        self.subscriptions.insert(topic.to_string(), subscription);
        Ok(SubscribeOutcome::Created)
    }

    /// Remove and release the subscription for `topic`.
    pub fn unsubscribe(&mut self, topic: &str) -> UnsubscribeOutcome {
        match self.subscriptions.remove(topic) {
            Some(_) => {
                debug!(topic, "subscription released");
                UnsubscribeOutcome::Removed
            }
            None => UnsubscribeOutcome::NotFound,
        }
    }

    /// Release every handle.
    pub fn clear(&mut self) {
        self.subscriptions.clear();
        self.publishers.clear();
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.subscriptions.contains_key(topic)
    }

    pub fn publisher_count(&self) -> usize {
        self.publishers.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loopback::LoopbackTransport;
    use bytes::Bytes;

    fn bound_transport() -> LoopbackTransport {
        let transport = LoopbackTransport::new();
        transport.start("127.0.0.1", 8374).unwrap();
        transport
    }

    fn noop() -> MessageCallback {
        Arc::new(|_: Bytes| {})
    }

    #[test]
    fn publisher_is_created_once_per_topic() {
        let transport = bound_transport();
        let mut registry = Registry::new();

        let first = registry.get_or_create_publisher(&transport, "out").unwrap();
        let second = registry.get_or_create_publisher(&transport, "out").unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(transport.advertise_count(), 1);
        assert_eq!(registry.publisher_count(), 1);
    }

    #[test]
    fn failed_advertise_inserts_nothing() {
        let transport = LoopbackTransport::new();
        let mut registry = Registry::new();
        assert!(registry.get_or_create_publisher(&transport, "out").is_err());
        assert_eq!(registry.publisher_count(), 0);
    }

    #[test]
    fn second_subscribe_reports_already_exists() {
        let transport = bound_transport();
        let mut registry = Registry::new();

        assert_eq!(
            registry.subscribe(&transport, "sensor/temp", noop()).unwrap(),
            SubscribeOutcome::Created
        );
        assert_eq!(
            registry.subscribe(&transport, "sensor/temp", noop()).unwrap(),
            SubscribeOutcome::AlreadyExists
        );
        assert_eq!(transport.subscribe_count(), 1);
        assert_eq!(transport.live_subscriptions("sensor/temp"), 1);
    }

    #[test]
    fn unsubscribe_releases_transport_handle() {
        let transport = bound_transport();
        let mut registry = Registry::new();
        registry.subscribe(&transport, "a", noop()).unwrap();

        assert_eq!(registry.unsubscribe("a"), UnsubscribeOutcome::Removed);
        assert_eq!(transport.live_subscriptions("a"), 0);
        assert!(!registry.is_subscribed("a"));
    }

    #[test]
    fn unsubscribe_unknown_topic_is_not_found() {
        let mut registry = Registry::new();
        assert_eq!(registry.unsubscribe("never"), UnsubscribeOutcome::NotFound);
    }

    #[test]
    fn clear_releases_everything() {
        let transport = bound_transport();
        let mut registry = Registry::new();
        registry.subscribe(&transport, "a", noop()).unwrap();
        registry.get_or_create_publisher(&transport, "b").unwrap();

        registry.clear();
        assert_eq!(registry.subscription_count(), 0);
        assert_eq!(registry.publisher_count(), 0);
        assert_eq!(transport.live_subscriptions("a"), 0);
    }
}
