//! [`Node`] – lifecycle owner tying transport, registry, relay and spinner
//! together.
//!
//! # Threads
//!
//! A `Node` lives on the host's single consumer thread. Every method here
//! runs on that thread; the only work done elsewhere is the spinner's polling
//! and the engine's subscription callbacks, which merely push onto the relay.
//!
//! # Lifecycle
//!
//! ```text
//! Idle ──start──► Running ──stop──► Idle
//! ```
//!
//! Both transitions are idempotent: `start` on a running node and `stop` on
//! an idle node return `Ok(())` without touching the transport. A failed
//! transition leaves the state unchanged so the caller can retry.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use daybridge_middleware::loopback::LoopbackTransport;
//! use daybridge_middleware::node::{Node, NodeConfig};
//! use daybridge_types::{HostObject, HostValue};
//!
//! let mut node = Node::new(Arc::new(LoopbackTransport::new()), NodeConfig::default());
//! node.start().expect("start");
//! node.publish("out", &HostValue::Object(HostObject::new().with("x", 3.0)))
//!     .expect("publish");
//! node.stop().expect("stop");
//! ```

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use daybridge_types::{BridgeError, ConversionError, HostValue};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

use crate::convert;
use crate::registry::{Registry, SubscribeOutcome, UnsubscribeOutcome};
use crate::relay::{self, QueuedMessage, RelayConfig, RelayReceiver, RelayStats};
use crate::spinner::{DEFAULT_SPIN_INTERVAL, Spinner, SpinnerState};
use crate::transport::{MessageCallback, Transport};

/// Host-side message handler. Receives one converted value per message.
pub type HostCallback = Box<dyn FnMut(HostValue)>;

/// Static node parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeConfig {
    pub name: String,
    /// Bind address used by [`Node::start`].
    pub address: String,
    pub port: u16,
    /// Idle time of the polling driver between cycles.
    pub spin_interval: Duration,
    pub relay: RelayConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "harrogate".to_string(),
            address: "127.0.0.1".to_string(),
            port: 8374,
            spin_interval: DEFAULT_SPIN_INTERVAL,
            relay: RelayConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Idle,
    Running,
}

/// Outcome of one [`Node::dispatch_pending`] pass.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Messages converted and handed to the host callback.
    pub delivered: usize,
    /// Messages dropped because no callback was registered.
    pub discarded: usize,
    /// Messages whose payload failed to convert, with their topic.
    pub failed: Vec<(String, ConversionError)>,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.delivered + self.discarded + self.failed.len()
    }
}

/// A pub/sub node bridged to a single-threaded host.
pub struct Node {
    config: NodeConfig,
    transport: Arc<dyn Transport>,
    registry: Registry,
    relay: RelayReceiver,
    running: Arc<AtomicBool>,
    spinner: Option<Spinner>,
    callback: Option<HostCallback>,
}

impl Node {
    /// Create an idle node over `transport`.
    pub fn new(transport: Arc<dyn Transport>, config: NodeConfig) -> Self {
        let (_, relay) = relay::channel(config.relay);
        // Nothing may be enqueued until `start` installs the wakeup.
        relay.close();
        Self {
            config,
            transport,
            registry: Registry::new(),
            relay,
            running: Arc::new(AtomicBool::new(false)),
            spinner: None,
            callback: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn state(&self) -> NodeState {
        if self.is_running() {
            NodeState::Running
        } else {
            NodeState::Idle
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn relay_stats(&self) -> RelayStats {
        self.relay.stats()
    }

    /// State of the polling driver, `None` when it has never been launched
    /// or has already been joined.
    pub fn spinner_state(&self) -> Option<SpinnerState> {
        self.spinner.as_ref().map(Spinner::state)
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Start on the configured address and port.
    pub fn start(&mut self) -> Result<(), BridgeError> {
        let address = self.config.address.clone();
        let port = self.config.port;
        self.start_at(&address, port)
    }

    /// Bind the transport to `address:port` and launch the polling driver.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when binding fails; the node stays idle.
    pub fn start_at(&mut self, address: &str, port: u16) -> Result<(), BridgeError> {
        if self.is_running() {
            return Ok(());
        }

        self.relay.reopen();
        if let Err(e) = self.transport.start(address, port) {
            self.relay.close();
            error!(node = %self.config.name, address, port, error = %e, "could not start node");
            return Err(e);
        }
        self.running.store(true, Ordering::SeqCst);

        match Spinner::launch(
            Arc::clone(&self.transport),
            Arc::clone(&self.running),
            self.config.spin_interval,
        ) {
            Ok(spinner) => self.spinner = Some(spinner),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                if let Err(stop_err) = self.transport.stop() {
                    warn!(error = %stop_err, "transport release after failed spinner launch");
                }
                self.relay.close();
                return Err(BridgeError::Transport(format!(
                    "could not launch polling thread: {e}"
                )));
            }
        }

        info!(node = %self.config.name, address, port, "node started");
        Ok(())
    }

    /// Release the transport and wind the node down.
    ///
    /// Order: transport release (tears down subscriptions), clear the run
    /// flag, join the polling thread, drop registry handles, deliver whatever
    /// is still queued, close the relay.
    ///
    /// # Errors
    ///
    /// Returns the transport's error when releasing fails; the node stays
    /// running.
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        if !self.is_running() {
            return Ok(());
        }

        if let Err(e) = self.transport.stop() {
            error!(node = %self.config.name, error = %e, "could not stop node");
            return Err(e);
        }
        let report = self.wind_down();

        info!(
            node = %self.config.name,
            drained = report.total(),
            "node stopped"
        );
        Ok(())
    }

    /// Everything `stop` does after the transport has been released.
    fn wind_down(&mut self) -> DispatchReport {
        self.running.store(false, Ordering::SeqCst);

        if let Some(mut spinner) = self.spinner.take() {
            spinner.join();
        }
        self.registry.clear();

        let report = self.dispatch_pending();
        self.relay.close();
        report
    }

    // -----------------------------------------------------------------------
    // Pub/sub
    // -----------------------------------------------------------------------

    /// Convert `value` and publish it on `topic`, advertising on first use.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::NotRunning`] when the node is idle.
    /// * [`BridgeError::Conversion`] when `value` has no wire form; no
    ///   publisher is created in that case.
    /// * [`BridgeError::Transport`] when advertising or sending fails.
    pub fn publish(&mut self, topic: &str, value: &HostValue) -> Result<(), BridgeError> {
        self.ensure_running()?;
        let payload = convert::encode_from_host(value)?;
        let publisher = self
            .registry
            .get_or_create_publisher(self.transport.as_ref(), topic)?;
        trace!(topic, bytes = payload.len(), "publish");
        publisher.publish(payload)
    }

    /// Subscribe to `topic`, routing its messages through the relay.
    pub fn subscribe(&mut self, topic: &str) -> Result<SubscribeOutcome, BridgeError> {
        self.ensure_running()?;
        if self.registry.is_subscribed(topic) {
            return Ok(SubscribeOutcome::AlreadyExists);
        }

        let subscription_id = Uuid::new_v4();
        let sender = self.relay.sender();
        let owned_topic = topic.to_string();
        let on_message: MessageCallback = Arc::new(move |payload: Bytes| {
            let message = QueuedMessage::new(subscription_id, owned_topic.as_str(), payload);
            if let Err(e) = sender.enqueue(message) {
                trace!(topic = %owned_topic, error = %e, "message arrived after teardown");
            }
        });

        let outcome = self
            .registry
            .subscribe(self.transport.as_ref(), topic, on_message)?;
        debug!(topic, subscription = %subscription_id, "subscribed");
        Ok(outcome)
    }

    /// Drop the subscription for `topic`. Unknown topics report
    /// [`UnsubscribeOutcome::NotFound`] rather than an error.
    pub fn unsubscribe(&mut self, topic: &str) -> Result<UnsubscribeOutcome, BridgeError> {
        self.ensure_running()?;
        Ok(self.registry.unsubscribe(topic))
    }

    /// Register (`Some`) or clear (`None`) the host message handler. Only
    /// affects messages drained from now on.
    pub fn set_callback(&mut self, callback: Option<HostCallback>) {
        self.callback = callback;
    }

    // -----------------------------------------------------------------------
    // Consumer side
    // -----------------------------------------------------------------------

    /// Resolve once the relay signals new messages.
    pub async fn wait_for_messages(&self) {
        self.relay.wait().await;
    }

    /// Drain the relay and hand each message to the host callback.
    ///
    /// Conversion failures are per message: they are logged, reported in
    /// [`DispatchReport::failed`], and do not affect the other messages.
    pub fn dispatch_pending(&mut self) -> DispatchReport {
        let mut report = DispatchReport::default();
        for message in self.relay.drain_all() {
            let Some(callback) = self.callback.as_mut() else {
                report.discarded += 1;
                continue;
            };
            trace!(
                topic = %message.topic,
                queued_us = message.age().num_microseconds().unwrap_or(i64::MAX),
                "dispatch"
            );
            match convert::decode_to_host(&message.payload) {
                Ok(value) => {
                    callback(value);
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(
                        topic = %message.topic,
                        subscription = %message.subscription,
                        error = %e,
                        "dropping unconvertible message"
                    );
                    report.failed.push((message.topic, e));
                }
            }
        }
        if report.discarded > 0 {
            trace!(discarded = report.discarded, "no host callback registered");
        }
        report
    }

    /// Consumer loop: wait, dispatch, repeat until `shutdown` resolves.
    pub async fn run_until(&mut self, shutdown: impl Future<Output = ()>) {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = self.relay.wait() => {}
            }
            self.dispatch_pending();
        }
    }

    fn ensure_running(&self) -> Result<(), BridgeError> {
        if self.is_running() {
            Ok(())
        } else {
            Err(BridgeError::NotRunning)
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            // The transport stays bound, but the polling thread must not
            // outlive the node.
            error!(node = %self.config.name, error = %e, "transport release failed during drop");
            self.wind_down();
        }
    }
}
