//! In-process loopback transport for tests and headless demos.
//!
//! [`LoopbackTransport`] behaves like a single-node pub/sub engine: payloads
//! published on a topic (or injected with [`LoopbackTransport::inject`] to
//! simulate remote peers) are queued and handed to every subscriber of that
//! topic on the next [`Transport::spin_once`], i.e. on whichever thread is
//! driving the polling loop.
//!
//! # Example
//!
//! ```rust
//! use daybridge_middleware::loopback::LoopbackTransport;
//! use daybridge_middleware::transport::{Publisher, Transport};
//!
//! let transport = LoopbackTransport::new();
//! transport.start("127.0.0.1", 8374).expect("loopback bind");
//! let publisher = transport.advertise("out").expect("advertise");
//! assert_eq!(publisher.topic(), "out");
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};

use bytes::Bytes;
use daybridge_types::BridgeError;
use tracing::{debug, trace};

use crate::relay::lock;
use crate::transport::{MessageCallback, Publisher, Subscription, Transport};

#[derive(Default)]
struct LoopbackInner {
    endpoint: Mutex<Option<(String, u16)>>,
    pending: Mutex<VecDeque<(String, Bytes)>>,
    subscribers: Mutex<HashMap<String, Vec<(u64, MessageCallback)>>>,
    published: Mutex<Vec<(String, Bytes)>>,
    next_subscription_id: AtomicU64,
    fail_next_start: AtomicBool,
    fail_next_stop: AtomicBool,
    bind_count: AtomicUsize,
    advertise_count: AtomicUsize,
    subscribe_count: AtomicUsize,
}

impl LoopbackInner {
    fn is_bound(&self) -> bool {
        lock(&self.endpoint).is_some()
    }

    fn unsubscribe(&self, topic: &str, id: u64) {
        let mut subscribers = lock(&self.subscribers);
        if let Some(list) = subscribers.get_mut(topic) {
            list.retain(|(sub_id, _)| *sub_id != id);
            if list.is_empty() {
                subscribers.remove(topic);
            }
        }
    }
}

/// Single-process pub/sub engine. Clones share the same state.
#[derive(Clone, Default)]
pub struct LoopbackTransport {
    inner: Arc<LoopbackInner>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `payload` on `topic` as if it had arrived from a remote peer.
    /// Delivered on the next `spin_once` while bound; discarded by `stop`.
    pub fn inject(&self, topic: &str, payload: Bytes) {
        lock(&self.inner.pending).push_back((topic.to_string(), payload));
    }

    /// Make the next `start` call fail.
    pub fn fail_next_start(&self) {
        self.inner.fail_next_start.store(true, Ordering::SeqCst);
    }

    /// Make the next `stop` call fail.
    pub fn fail_next_stop(&self) {
        self.inner.fail_next_stop.store(true, Ordering::SeqCst);
    }

    pub fn is_bound(&self) -> bool {
        self.inner.is_bound()
    }

    /// Number of successful bindings since creation.
    pub fn bind_count(&self) -> usize {
        self.inner.bind_count.load(Ordering::SeqCst)
    }

    /// Number of publishers created since creation.
    pub fn advertise_count(&self) -> usize {
        self.inner.advertise_count.load(Ordering::SeqCst)
    }

    /// Number of subscriptions created since creation.
    pub fn subscribe_count(&self) -> usize {
        self.inner.subscribe_count.load(Ordering::SeqCst)
    }

    /// Number of subscriptions currently attached to `topic`.
    pub fn live_subscriptions(&self, topic: &str) -> usize {
        lock(&self.inner.subscribers).get(topic).map_or(0, Vec::len)
    }

    /// Every payload sent through a publisher, in send order.
    pub fn published(&self) -> Vec<(String, Bytes)> {
        lock(&self.inner.published).clone()
    }
}

impl Transport for LoopbackTransport {
    fn start(&self, address: &str, port: u16) -> Result<(), BridgeError> {
        if self.inner.fail_next_start.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::Transport(format!(
                "loopback refused to bind {address}:{port}"
            )));
        }
        if address.is_empty() {
            return Err(BridgeError::Transport("empty bind address".to_string()));
        }
        let mut endpoint = lock(&self.inner.endpoint);
        if endpoint.is_none() {
            *endpoint = Some((address.to_string(), port));
            self.inner.bind_count.fetch_add(1, Ordering::SeqCst);
            debug!(address, port, "loopback bound");
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), BridgeError> {
        if self.inner.fail_next_stop.swap(false, Ordering::SeqCst) {
            return Err(BridgeError::Transport("loopback refused to unbind".to_string()));
        }
        *lock(&self.inner.endpoint) = None;
        lock(&self.inner.subscribers).clear();
        lock(&self.inner.pending).clear();
        debug!("loopback released");
        Ok(())
    }

    fn advertise(&self, topic: &str) -> Result<Arc<dyn Publisher>, BridgeError> {
        if !self.inner.is_bound() {
            return Err(BridgeError::Transport(format!(
                "cannot advertise '{topic}': loopback is not bound"
            )));
        }
        self.inner.advertise_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LoopbackPublisher {
            topic: topic.to_string(),
            inner: Arc::downgrade(&self.inner),
        }))
    }

    fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<Arc<dyn Subscription>, BridgeError> {
        if !self.inner.is_bound() {
            return Err(BridgeError::Transport(format!(
                "cannot subscribe to '{topic}': loopback is not bound"
            )));
        }
        let id = self.inner.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        lock(&self.inner.subscribers)
            .entry(topic.to_string())
            .or_default()
            .push((id, on_message));
        self.inner.subscribe_count.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(LoopbackSubscription {
            id,
            topic: topic.to_string(),
            inner: Arc::downgrade(&self.inner),
        }))
    }

    fn spin_once(&self) {
        if !self.inner.is_bound() {
            return;
        }
        let batch: Vec<(String, Bytes)> = lock(&self.inner.pending).drain(..).collect();
        for (topic, payload) in batch {
            // Callbacks run without the subscriber table locked.
            let callbacks: Vec<MessageCallback> = lock(&self.inner.subscribers)
                .get(&topic)
                .map(|list| list.iter().map(|(_, cb)| Arc::clone(cb)).collect())
                .unwrap_or_default();
            trace!(topic = %topic, receivers = callbacks.len(), "loopback deliver");
            for callback in callbacks {
                callback(payload.clone());
            }
        }
    }
}

struct LoopbackPublisher {
    topic: String,
    inner: Weak<LoopbackInner>,
}

impl Publisher for LoopbackPublisher {
    fn topic(&self) -> &str {
        &self.topic
    }

    fn publish(&self, payload: Bytes) -> Result<(), BridgeError> {
        let inner = self
            .inner
            .upgrade()
            .ok_or_else(|| BridgeError::Transport("loopback transport dropped".to_string()))?;
        if !inner.is_bound() {
            return Err(BridgeError::Transport(format!(
                "cannot publish on '{}': loopback is not bound",
                self.topic
            )));
        }
        lock(&inner.published).push((self.topic.clone(), payload.clone()));
        lock(&inner.pending).push_back((self.topic.clone(), payload));
        Ok(())
    }
}

struct LoopbackSubscription {
    id: u64,
    topic: String,
    inner: Weak<LoopbackInner>,
}

impl Subscription for LoopbackSubscription {
    fn topic(&self) -> &str {
        &self.topic
    }
}

impl Drop for LoopbackSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.unsubscribe(&self.topic, self.id);
        }
    }
}
