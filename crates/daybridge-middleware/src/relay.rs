//! Thread-safe message relay: many producer threads, one consumer.
//!
//! Engine callback threads push raw payloads with [`RelaySender::enqueue`];
//! the host's single consumer loop awaits [`RelayReceiver::wait`] and then
//! takes everything queued so far with [`RelayReceiver::drain_all`].
//!
//! # Wakeup coalescing
//!
//! The wakeup is a [`tokio::sync::Notify`]. `notify_one` with no waiter
//! stores a single permit, so any number of enqueues that happen before the
//! consumer wakes collapse into one wakeup, and the following drain picks up
//! all of them. Messages enqueued while a drain is in progress re-arm the
//! permit and are picked up on the next wakeup.
//!
//! # Backpressure
//!
//! Unbounded by default. With [`RelayConfig::capacity`] set, a full queue
//! drops its **oldest** message to make room (logged and counted in
//! [`RelayStats::dropped`]).

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use chrono::{DateTime, TimeDelta, Utc};
use daybridge_types::BridgeError;
use tokio::sync::Notify;
use tracing::warn;
use uuid::Uuid;

/// Lock a mutex, recovering the data if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A payload captured on a producer thread, waiting for the consumer.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Subscription handle that produced the payload.
    pub subscription: Uuid,
    pub topic: String,
    pub received_at: DateTime<Utc>,
    /// Encoded document, converted lazily on the consumer thread.
    pub payload: Bytes,
}

impl QueuedMessage {
    pub fn new(subscription: Uuid, topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            subscription,
            topic: topic.into(),
            received_at: Utc::now(),
            payload,
        }
    }

    /// Time spent waiting since the producer enqueued it.
    pub fn age(&self) -> TimeDelta {
        Utc::now() - self.received_at
    }
}

/// Relay construction parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayConfig {
    /// Maximum queued messages before drop-oldest kicks in. `None` or
    /// `Some(0)` means unbounded.
    pub capacity: Option<usize>,
}

/// Counters snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub enqueued: u64,
    pub dropped: u64,
    /// Wakeups observed by the consumer.
    pub wakeups: u64,
}

struct RelayState {
    queue: VecDeque<QueuedMessage>,
    closed: bool,
}

struct RelayShared {
    state: Mutex<RelayState>,
    wakeup: Notify,
    capacity: Option<usize>,
    enqueued: AtomicU64,
    dropped: AtomicU64,
    wakeups: AtomicU64,
}

/// Create a connected sender/receiver pair.
pub fn channel(config: RelayConfig) -> (RelaySender, RelayReceiver) {
    let shared = Arc::new(RelayShared {
        state: Mutex::new(RelayState {
            queue: VecDeque::new(),
            closed: false,
        }),
        wakeup: Notify::new(),
        capacity: config.capacity.filter(|&c| c > 0),
        enqueued: AtomicU64::new(0),
        dropped: AtomicU64::new(0),
        wakeups: AtomicU64::new(0),
    });
    (
        RelaySender {
            shared: Arc::clone(&shared),
        },
        RelayReceiver { shared },
    )
}

// ────────────────────────────────────────────────────────────────────────────
// Producer side
// ────────────────────────────────────────────────────────────────────────────

/// Producer handle. Cheap to clone and safe to use from any thread.
#[derive(Clone)]
pub struct RelaySender {
    shared: Arc<RelayShared>,
}

impl RelaySender {
    /// Push `message` and signal the consumer. Never waits for the consumer.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::RelayClosed`] once the relay has been closed;
    /// the message is not queued.
    pub fn enqueue(&self, message: QueuedMessage) -> Result<(), BridgeError> {
        {
            let mut state = lock(&self.shared.state);
            if state.closed {
                return Err(BridgeError::RelayClosed);
            }
            if let Some(capacity) = self.shared.capacity
                && state.queue.len() >= capacity
                && let Some(oldest) = state.queue.pop_front()
            {
                self.shared.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    topic = %oldest.topic,
                    capacity,
                    "relay full, dropped oldest message"
                );
            }
            state.queue.push_back(message);
        }
        self.shared.enqueued.fetch_add(1, Ordering::Relaxed);
        self.shared.wakeup.notify_one();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.shared.state).closed
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Consumer side
// ────────────────────────────────────────────────────────────────────────────

/// The single consumer end. Not `Clone`: exactly one owner drains the queue.
pub struct RelayReceiver {
    shared: Arc<RelayShared>,
}

impl RelayReceiver {
    /// A new producer handle for this relay.
    pub fn sender(&self) -> RelaySender {
        RelaySender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Wait until at least one enqueue has happened since the last wakeup.
    pub async fn wait(&self) {
        self.shared.wakeup.notified().await;
        self.shared.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    /// Take every message queued so far, in enqueue order.
    ///
    /// The lock is released before the messages are returned, so the caller
    /// processes them while producers keep enqueuing.
    pub fn drain_all(&self) -> Vec<QueuedMessage> {
        let mut state = lock(&self.shared.state);
        std::mem::take(&mut state.queue).into()
    }

    /// Reject further enqueues. Messages already queued stay drainable.
    pub fn close(&self) {
        lock(&self.shared.state).closed = true;
    }

    /// Accept enqueues again after [`close`](Self::close).
    pub fn reopen(&self) {
        lock(&self.shared.state).closed = false;
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> RelayStats {
        RelayStats {
            enqueued: self.shared.enqueued.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
            wakeups: self.shared.wakeups.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    fn msg(topic: &str, body: &'static [u8]) -> QueuedMessage {
        QueuedMessage::new(Uuid::nil(), topic, Bytes::from_static(body))
    }

    fn bodies(messages: &[QueuedMessage]) -> Vec<&[u8]> {
        messages.iter().map(|m| m.payload.as_ref()).collect()
    }

    #[test]
    fn single_producer_order_is_preserved() {
        let (tx, rx) = channel(RelayConfig::default());
        tx.enqueue(msg("t", b"m1")).unwrap();
        tx.enqueue(msg("t", b"m2")).unwrap();
        tx.enqueue(msg("t", b"m3")).unwrap();

        let drained = rx.drain_all();
        assert_eq!(bodies(&drained), vec![&b"m1"[..], b"m2", b"m3"]);
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn many_enqueues_coalesce_into_one_wakeup() {
        let (tx, rx) = channel(RelayConfig::default());
        let producer = thread::spawn(move || {
            for _ in 0..5 {
                tx.enqueue(msg("t", b"x")).unwrap();
            }
        });
        producer.join().unwrap();

        tokio::time::timeout(Duration::from_secs(1), rx.wait())
            .await
            .expect("first wakeup must arrive");
        assert_eq!(rx.drain_all().len(), 5);

        let second = tokio::time::timeout(Duration::from_millis(50), rx.wait()).await;
        assert!(second.is_err(), "no further wakeup expected after a full drain");
        assert_eq!(rx.stats().wakeups, 1);
        assert_eq!(rx.stats().enqueued, 5);
    }

    #[tokio::test]
    async fn concurrent_producers_lose_nothing_and_keep_per_thread_order() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 250;

        let (tx, rx) = channel(RelayConfig::default());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..PER_PRODUCER {
                        let payload = Bytes::from(format!("{p}:{i}"));
                        tx.enqueue(QueuedMessage::new(Uuid::nil(), "t", payload))
                            .unwrap();
                    }
                })
            })
            .collect();

        let mut received = Vec::new();
        while received.len() < PRODUCERS * PER_PRODUCER {
            tokio::time::timeout(Duration::from_secs(5), rx.wait())
                .await
                .expect("producers stalled");
            received.extend(rx.drain_all());
        }
        for h in handles {
            h.join().unwrap();
        }

        let mut next = [0usize; PRODUCERS];
        for m in &received {
            let text = std::str::from_utf8(&m.payload).unwrap();
            let (p, i) = text.split_once(':').unwrap();
            let (p, i): (usize, usize) = (p.parse().unwrap(), i.parse().unwrap());
            assert_eq!(i, next[p], "producer {p} delivered out of order");
            next[p] += 1;
        }
        assert!(next.iter().all(|&n| n == PER_PRODUCER));
    }

    #[test]
    fn closed_relay_rejects_but_keeps_queued_messages() {
        let (tx, rx) = channel(RelayConfig::default());
        tx.enqueue(msg("t", b"before")).unwrap();
        rx.close();
        assert!(tx.is_closed());
        assert!(matches!(
            tx.enqueue(msg("t", b"after")),
            Err(BridgeError::RelayClosed)
        ));
        assert_eq!(bodies(&rx.drain_all()), vec![&b"before"[..]]);

        rx.reopen();
        assert!(tx.enqueue(msg("t", b"again")).is_ok());
    }

    #[test]
    fn bounded_relay_drops_oldest() {
        let (tx, rx) = channel(RelayConfig { capacity: Some(2) });
        tx.enqueue(msg("t", b"a")).unwrap();
        tx.enqueue(msg("t", b"b")).unwrap();
        tx.enqueue(msg("t", b"c")).unwrap();

        assert_eq!(bodies(&rx.drain_all()), vec![&b"b"[..], b"c"]);
        assert_eq!(rx.stats().dropped, 1);
        assert_eq!(rx.stats().enqueued, 3);
    }

    #[test]
    fn queued_message_age_grows_while_waiting() {
        let message = msg("t", b"x");
        thread::sleep(Duration::from_millis(5));
        assert!(message.age() >= TimeDelta::milliseconds(5));
    }

    #[test]
    fn zero_capacity_means_unbounded() {
        let (tx, rx) = channel(RelayConfig { capacity: Some(0) });
        for _ in 0..10 {
            tx.enqueue(msg("t", b"x")).unwrap();
        }
        assert_eq!(rx.len(), 10);
        assert_eq!(rx.stats().dropped, 0);
    }
}
