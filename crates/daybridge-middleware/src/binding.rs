//! Dynamic host surface over a [`Node`].
//!
//! Hosts call into the node by method name with a list of loosely typed
//! [`HostValue`] arguments. [`HostBinding::call`] checks arity and argument
//! types before touching the node, so a malformed call never changes state.
//!
//! | Method | Arguments | Result |
//! |---|---|---|
//! | `start` | none, or `(ip: string, port: number)` | `true` |
//! | `stop` | none | `true` |
//! | `publish` | `(topic: string, message: object)` | `true` |
//! | `subscribe` | `(topic: string)` | `true` |
//! | `unsubscribe` | `(topic: string)` | `true` if a subscription was removed |

use daybridge_types::{BridgeError, HostValue};

use crate::node::{HostCallback, Node};
use crate::registry::UnsubscribeOutcome;

const WRONG_ARITY: &str = "Wrong number of arguments";
const WRONG_TYPES: &str = "Wrong arguments";

/// Method-name dispatcher exposing a [`Node`] to a dynamic host.
pub struct HostBinding {
    node: Node,
}

impl HostBinding {
    pub fn new(node: Node) -> Self {
        Self { node }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn node_mut(&mut self) -> &mut Node {
        &mut self.node
    }

    pub fn set_callback(&mut self, callback: Option<HostCallback>) {
        self.node.set_callback(callback);
    }

    /// Invoke `method` with `args`.
    ///
    /// # Errors
    ///
    /// * [`BridgeError::Argument`] for an unknown method, a wrong argument
    ///   count or wrongly typed arguments.
    /// * Whatever the node operation itself returns.
    pub fn call(&mut self, method: &str, args: &[HostValue]) -> Result<HostValue, BridgeError> {
        match method {
            "start" => match args {
                [] => self.node.start(),
                [ip, port] => {
                    let ip = ip.as_str().ok_or_else(wrong_types)?;
                    let port = port.as_f64().and_then(to_port).ok_or_else(wrong_types)?;
                    self.node.start_at(ip, port)
                }
                _ => Err(wrong_arity()),
            }
            .map(|()| HostValue::Bool(true)),
            "stop" => {
                expect_arity(args, 0)?;
                self.node.stop()?;
                Ok(HostValue::Bool(true))
            }
            "publish" => {
                expect_arity(args, 2)?;
                let topic = args[0].as_str().ok_or_else(wrong_types)?;
                if args[1].as_object().is_none() {
                    return Err(wrong_types());
                }
                self.node.publish(topic, &args[1])?;
                Ok(HostValue::Bool(true))
            }
            "subscribe" => {
                let topic = single_topic(args)?;
                self.node.subscribe(topic)?;
                Ok(HostValue::Bool(true))
            }
            "unsubscribe" => {
                let topic = single_topic(args)?;
                let outcome = self.node.unsubscribe(topic)?;
                Ok(HostValue::Bool(outcome == UnsubscribeOutcome::Removed))
            }
            other => Err(BridgeError::Argument(format!("unknown method '{other}'"))),
        }
    }
}

fn wrong_arity() -> BridgeError {
    BridgeError::Argument(WRONG_ARITY.to_string())
}

fn wrong_types() -> BridgeError {
    BridgeError::Argument(WRONG_TYPES.to_string())
}

fn expect_arity(args: &[HostValue], expected: usize) -> Result<(), BridgeError> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(wrong_arity())
    }
}

fn single_topic(args: &[HostValue]) -> Result<&str, BridgeError> {
    expect_arity(args, 1)?;
    args[0].as_str().ok_or_else(wrong_types)
}

fn to_port(n: f64) -> Option<u16> {
    (n.fract() == 0.0 && (0.0..=f64::from(u16::MAX)).contains(&n)).then_some(n as u16)
}
