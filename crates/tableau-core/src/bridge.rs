//! RPC bridge between remote operations and event streams.
//!
//! Every operation a client may call is registered once with
//! [`RpcBridge::receive`], which returns the [`Event`] of its invocations.
//! Outbound, the bridge invokes notifications on one connection or on every
//! member of a [`Group`].

use crate::group::Group;
use crate::stream::Event;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use tableau_protocol::Frame;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Identity of one client connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a connection ID.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for ConnectionId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ConnectionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Bridge errors.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// The connection's outbound channel is closed.
    #[error("Connection closed")]
    Closed,

    /// A declared parameter was not supplied.
    #[error("Missing parameter `{param}` for {op}")]
    MissingParam { op: String, param: String },

    /// A parameter could not be decoded into the expected type.
    #[error("Invalid parameter `{param}` for {op}: {source}")]
    InvalidParam {
        op: String,
        param: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Outbound half of a connection.
///
/// Delivery must not block: handlers run synchronously on the dispatcher.
pub trait ConnectionSink: Send + Sync {
    /// Queue a frame for the connection.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection can no longer receive frames.
    fn deliver(&self, frame: Frame) -> Result<(), BridgeError>;
}

impl ConnectionSink for mpsc::UnboundedSender<Frame> {
    fn deliver(&self, frame: Frame) -> Result<(), BridgeError> {
        self.send(frame).map_err(|_| BridgeError::Closed)
    }
}

/// A handle for invoking operations on one remote party.
#[derive(Clone)]
pub struct Remote {
    id: ConnectionId,
    sink: Option<Arc<dyn ConnectionSink>>,
}

impl Remote {
    /// The connection this handle targets.
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Invoke `op` on the remote party. Returns `true` if the call was queued.
    pub fn invoke(&self, op: &str, args: Vec<Value>) -> bool {
        match &self.sink {
            Some(sink) => deliver(&self.id, sink.as_ref(), Frame::call(op, args)),
            None => {
                trace!(connection = %self.id, op, "Invoke on detached connection");
                false
            }
        }
    }
}

impl fmt::Debug for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Remote")
            .field("id", &self.id)
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

/// One inbound invocation of a registered operation.
#[derive(Debug, Clone)]
pub struct Request {
    /// Connection that made the call.
    pub caller: ConnectionId,
    /// Operation name.
    pub op: Arc<str>,
    /// Declared parameter names bound to the positional arguments.
    pub body: Map<String, Value>,
    /// Handle for calling back into the caller.
    pub target: Remote,
}

impl Request {
    /// Decode the parameter `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter is missing or has the wrong shape.
    pub fn param<T: DeserializeOwned>(&self, name: &str) -> Result<T, BridgeError> {
        let value = self
            .body
            .get(name)
            .ok_or_else(|| BridgeError::MissingParam {
                op: self.op.to_string(),
                param: name.to_string(),
            })?;
        serde_json::from_value(value.clone()).map_err(|source| BridgeError::InvalidParam {
            op: self.op.to_string(),
            param: name.to_string(),
            source,
        })
    }

    /// Invoke `op` on the caller.
    pub fn reply(&self, op: &str, args: Vec<Value>) -> bool {
        self.target.invoke(op, args)
    }
}

/// A registered operation.
struct Operation {
    params: Arc<[String]>,
    requests: Event<Request>,
}

/// Maps operation names to request streams and connections to sinks.
#[derive(Default)]
pub struct RpcBridge {
    operations: DashMap<String, Operation>,
    connections: DashMap<ConnectionId, Arc<dyn ConnectionSink>>,
}

impl RpcBridge {
    /// Create an empty bridge.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a remotely invocable operation.
    ///
    /// The returned event fires once per invocation with the i-th positional
    /// argument bound to `params[i]`. Registering the same name again rebinds
    /// it; the previous event stops firing.
    pub fn receive(&self, op: &str, params: &[&str]) -> Event<Request> {
        let requests = Event::new();
        let operation = Operation {
            params: params.iter().map(|p| p.to_string()).collect(),
            requests: requests.clone(),
        };
        if self.operations.insert(op.to_string(), operation).is_some() {
            debug!(op, "Operation rebound");
        }
        requests
    }

    /// Whether `op` is registered.
    #[must_use]
    pub fn is_registered(&self, op: &str) -> bool {
        self.operations.contains_key(op)
    }

    /// Deliver an inbound call to its operation's event.
    ///
    /// Returns `false` if no such operation is registered. Missing arguments
    /// are left out of the body and extra arguments are ignored.
    pub fn dispatch(&self, caller: &ConnectionId, op: &str, args: Vec<Value>) -> bool {
        let Some((params, requests)) = self
            .operations
            .get(op)
            .map(|o| (Arc::clone(&o.params), o.requests.clone()))
        else {
            debug!(connection = %caller, op, "Call to unknown operation ignored");
            return false;
        };

        let body: Map<String, Value> = params.iter().cloned().zip(args).collect();
        let request = Request {
            caller: caller.clone(),
            op: Arc::from(op),
            body,
            target: self.remote(caller),
        };
        trace!(connection = %caller, op, "Dispatching request");
        requests.send(request);
        true
    }

    /// Bind a connection to its outbound sink.
    pub fn attach(&self, id: ConnectionId, sink: Arc<dyn ConnectionSink>) {
        debug!(connection = %id, "Connection attached");
        self.connections.insert(id, sink);
    }

    /// Unbind a connection. Returns `true` if it was attached.
    pub fn detach(&self, id: &ConnectionId) -> bool {
        let removed = self.connections.remove(id).is_some();
        if removed {
            debug!(connection = %id, "Connection detached");
        }
        removed
    }

    /// Number of attached connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// A handle for invoking operations on `id`.
    #[must_use]
    pub fn remote(&self, id: &ConnectionId) -> Remote {
        Remote {
            id: id.clone(),
            sink: self.connections.get(id).map(|s| Arc::clone(s.value())),
        }
    }

    /// Invoke `op` on one connection. Unknown or closed connections are
    /// skipped silently; returns whether the call was queued.
    pub fn invoke(&self, target: &ConnectionId, op: &str, args: Vec<Value>) -> bool {
        self.remote(target).invoke(op, args)
    }

    /// Invoke `op` on every member of `group` as of now.
    ///
    /// Best-effort: members whose connection is gone are dropped. Returns the
    /// number of members the call was queued for.
    pub fn invoke_group(&self, group: &Group, op: &str, args: Vec<Value>) -> usize {
        let frame = Frame::call(op, args);
        let delivered = group
            .members()
            .iter()
            .filter(|member| {
                let sink = self.connections.get(*member).map(|s| Arc::clone(s.value()));
                match sink {
                    Some(sink) => deliver(member, sink.as_ref(), frame.clone()),
                    None => false,
                }
            })
            .count();
        trace!(group = %group.id(), op, recipients = delivered, "Multicast");
        delivered
    }
}

fn deliver(id: &ConnectionId, sink: &dyn ConnectionSink, frame: Frame) -> bool {
    match sink.deliver(frame) {
        Ok(()) => true,
        Err(e) => {
            trace!(connection = %id, error = %e, "Dropped outbound frame");
            false
        }
    }
}
