//! The pub/sub engine seam.
//!
//! The bridge never talks to a network directly. Everything it needs from the
//! engine (bind, release, advertise, subscribe, and one polling step) goes
//! through [`Transport`], so engines can be swapped without touching the
//! relay, registry or node lifecycle.

use std::sync::Arc;

use bytes::Bytes;
use daybridge_types::BridgeError;

/// Callback invoked by the engine for every payload received on a
/// subscription.
///
/// Runs on an engine-owned thread (the *producer* role) and must never block
/// on the host.
pub type MessageCallback = Arc<dyn Fn(Bytes) + Send + Sync>;

/// A live publisher registration for one topic.
pub trait Publisher: Send + Sync {
    fn topic(&self) -> &str;

    /// Send an encoded document.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Transport`] if the engine rejects the payload.
    fn publish(&self, payload: Bytes) -> Result<(), BridgeError>;
}

/// A live subscription. Dropping the last reference releases it at the
/// engine, after which its callback is never invoked again.
pub trait Subscription: Send + Sync {
    fn topic(&self) -> &str;
}

/// Every pub/sub engine backing a [`Node`][crate::node::Node] implements this
/// trait.
///
/// # Contract
///
/// * `start` / `stop` – acquire and release network resources. Releasing
///   must tear down live subscriptions so that no callback fires afterwards.
/// * `advertise` / `subscribe` – create handles; only called while started.
/// * `spin_once` – advance pending I/O for a single quantum. Called
///   repeatedly from the polling thread; must be safe to call concurrently
///   with the other methods.
pub trait Transport: Send + Sync {
    fn start(&self, address: &str, port: u16) -> Result<(), BridgeError>;

    fn stop(&self) -> Result<(), BridgeError>;

    fn advertise(&self, topic: &str) -> Result<Arc<dyn Publisher>, BridgeError>;

    fn subscribe(
        &self,
        topic: &str,
        on_message: MessageCallback,
    ) -> Result<Arc<dyn Subscription>, BridgeError>;

    fn spin_once(&self);
}
