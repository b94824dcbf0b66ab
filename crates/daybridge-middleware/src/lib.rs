//! `daybridge-middleware` – pub/sub node bridged to a single-threaded host
//!
//! Moves documents between a polled pub/sub engine and a host that may only
//! be touched from one thread.
//!
//! # Modules
//!
//! - [`codec`] – Binary wire format for documents (BSON subset).
//! - [`convert`] – Document ⇄ host value conversion with numeric width
//!   selection.
//! - [`transport`] – The engine seam: [`Transport`], [`Publisher`],
//!   [`Subscription`].
//! - [`loopback`] – In-process transport used by tests and the CLI demo.
//! - [`relay`] – Multi-producer, single-consumer queue with a coalescing
//!   wakeup.
//! - [`spinner`] – Background thread polling the engine.
//! - [`registry`] – Per-node publisher and subscription handles.
//! - [`node`] – Lifecycle owner gluing the pieces together.
//! - [`binding`] – Method-name dispatch with host argument validation.

pub mod binding;
pub mod codec;
pub mod convert;
pub mod loopback;
pub mod node;
pub mod registry;
pub mod relay;
pub mod spinner;
pub mod transport;

pub use binding::HostBinding;
pub use loopback::LoopbackTransport;
pub use node::{DispatchReport, HostCallback, Node, NodeConfig, NodeState};
pub use registry::{Registry, SubscribeOutcome, UnsubscribeOutcome};
pub use relay::{QueuedMessage, RelayConfig, RelayReceiver, RelaySender, RelayStats};
pub use spinner::{Spinner, SpinnerState};
pub use transport::{MessageCallback, Publisher, Subscription, Transport};
