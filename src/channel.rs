// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Message channel abstraction.
//!
//! Defines the interface the engine needs from the framing/transport layer:
//! a bidirectional connection to one server endpoint that sends structured
//! request messages and correlates them with structured responses.
//!
//! The engine never touches wire framing. In particular, two properties are
//! the implementation's responsibility, not the core's:
//!
//! - **Write serialization**: a continuous session's pull and push loops both
//!   send on the same channel; concurrent logical sends must not corrupt
//!   framing.
//! - **Correlation**: responses are delivered to whichever outstanding
//!   request they belong to, identified by the [`RequestId`] returned from
//!   [`MessageChannel::send()`]. One request may yield several response
//!   frames (continuous `subChanges`), so `receive()` can be called more
//!   than once per send.
//!
//! # Example
//!
//! ```rust,no_run
//! use syncload::channel::{MessageChannel, ScriptedChannel, proto};
//! use serde_json::json;
//! use std::time::Duration;
//!
//! # async fn example() -> syncload::Result<()> {
//! let channel = ScriptedChannel::new();
//! channel
//!     .enqueue_body(
//!         proto::GET_CHECKPOINT,
//!         syncload::channel::object(json!({"local-seq": "42", "remote-seq": "17"})),
//!     )
//!     .await;
//!
//! let req = channel.send(proto::GET_CHECKPOINT, Default::default()).await?;
//! let response = channel.receive(req, Duration::from_secs(1)).await?;
//! assert_eq!(response.opt_str("local-seq"), Some("42"));
//! # Ok(())
//! # }
//! ```

use crate::error::{LoadError, Result};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::Mutex;

/// Protocol method names understood by the sync server.
pub mod proto {
    /// Retrieve a stored checkpoint by id.
    pub const GET_CHECKPOINT: &str = "getCheckpoint";
    /// Persist a checkpoint.
    pub const SET_CHECKPOINT: &str = "setCheckpoint";
    /// Subscribe to changes since a sequence.
    pub const SUB_CHANGES: &str = "subChanges";
    /// Fetch a full revision body.
    pub const REQUEST_REV: &str = "requestRev";
    /// Offer a batch of local changes.
    pub const PROPOSE_CHANGES: &str = "proposeChanges";
    /// Upload one full revision.
    pub const SEND_REV: &str = "sendRev";
}

/// The named-field mapping carried by requests and responses.
pub type Body = serde_json::Map<String, Value>;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Extract the object map out of a `serde_json::json!({...})` literal.
///
/// Convenience for building request properties and scripted bodies.
/// Non-object values yield an empty body.
pub fn object(value: Value) -> Body {
    match value {
        Value::Object(map) => map,
        _ => Body::new(),
    }
}

/// Opaque handle correlating a response with an earlier send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId(pub u64);

/// A correlated response frame.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Named fields of the response body.
    pub body: Body,
}

impl Response {
    /// Get a required string field, or a malformed-response error naming the
    /// method and the missing field.
    pub fn require_str(&self, method: &str, field: &str) -> Result<&str> {
        self.body
            .get(field)
            .and_then(Value::as_str)
            .ok_or_else(|| LoadError::malformed(method, format!("missing field `{field}`")))
    }

    /// Get a required array field.
    pub fn require_array(&self, method: &str, field: &str) -> Result<&Vec<Value>> {
        self.body
            .get(field)
            .and_then(Value::as_array)
            .ok_or_else(|| LoadError::malformed(method, format!("missing field `{field}`")))
    }

    /// Get an optional string field.
    pub fn opt_str(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }

    /// Get an optional integer field.
    pub fn opt_i64(&self, field: &str) -> Option<i64> {
        self.body.get(field).and_then(Value::as_i64)
    }
}

/// Trait defining what the engine needs from the transport.
///
/// One channel serves exactly one replicator. Implementations must keep
/// `close()` idempotent: a continuous session's pull and push activities
/// both reference the channel, and the session releases it exactly once,
/// but defensive double-closes must not error.
pub trait MessageChannel: Send + Sync + 'static {
    /// Send a request message. Fails with [`LoadError::Channel`] if the
    /// connection is not open.
    fn send(&self, method: &str, properties: Body) -> BoxFuture<'_, RequestId>;

    /// Wait for the next response frame correlated with `request`.
    ///
    /// Returns [`LoadError::Timeout`] if no frame arrives within `timeout`.
    fn receive(&self, request: RequestId, timeout: Duration) -> BoxFuture<'_, Response>;

    /// Close the connection. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Shared handles speak the protocol too; lets a factory keep a reference to
/// a channel it hands out.
impl<C: MessageChannel> MessageChannel for std::sync::Arc<C> {
    fn send(&self, method: &str, properties: Body) -> BoxFuture<'_, RequestId> {
        (**self).send(method, properties)
    }

    fn receive(&self, request: RequestId, timeout: Duration) -> BoxFuture<'_, Response> {
        (**self).receive(request, timeout)
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        (**self).close()
    }
}

// =============================================================================
// Scripted channel (test double / dry-run)
// =============================================================================

/// A recorded outbound message.
#[derive(Debug, Clone)]
pub struct SentMessage {
    /// Protocol method name.
    pub method: String,
    /// Request properties as sent.
    pub properties: Body,
}

/// One scripted reply frame.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// Deliver a response with this body.
    Body(Body),
    /// Let the receive wait expire.
    Timeout,
    /// Fail the receive with a channel error.
    ChannelError(String),
}

#[derive(Default)]
struct ScriptState {
    next_id: u64,
    sent: Vec<SentMessage>,
    replies: HashMap<String, VecDeque<ScriptedReply>>,
    pending: HashMap<u64, String>,
    send_failure: Option<String>,
    close_count: u32,
}

/// An in-memory [`MessageChannel`] that replays queued responses.
///
/// Replies are queued per method name and consumed in order by `receive()`.
/// A receive with no queued reply behaves as a timeout, which makes an idle
/// continuous loop easy to script: just stop queueing changes batches.
///
/// Every sent message is recorded for assertions. Useful for tests and for
/// dry-running the engine without a server.
#[derive(Default)]
pub struct ScriptedChannel {
    state: Mutex<ScriptState>,
}

impl ScriptedChannel {
    /// Create an empty scripted channel.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response body for the next receive correlated with `method`.
    pub async fn enqueue_body(&self, method: &str, body: Body) {
        self.enqueue(method, ScriptedReply::Body(body)).await;
    }

    /// Queue a timeout for the next receive correlated with `method`.
    pub async fn enqueue_timeout(&self, method: &str) {
        self.enqueue(method, ScriptedReply::Timeout).await;
    }

    /// Queue a channel error for the next receive correlated with `method`.
    pub async fn enqueue_error(&self, method: &str, message: &str) {
        self.enqueue(method, ScriptedReply::ChannelError(message.to_string()))
            .await;
    }

    async fn enqueue(&self, method: &str, reply: ScriptedReply) {
        let mut state = self.state.lock().await;
        state
            .replies
            .entry(method.to_string())
            .or_default()
            .push_back(reply);
    }

    /// Make all subsequent sends fail with a channel error.
    pub async fn fail_sends(&self, message: &str) {
        self.state.lock().await.send_failure = Some(message.to_string());
    }

    /// Snapshot of every message sent so far, in order.
    pub async fn sent(&self) -> Vec<SentMessage> {
        self.state.lock().await.sent.clone()
    }

    /// Method names of every message sent so far, in order.
    pub async fn sent_methods(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .sent
            .iter()
            .map(|m| m.method.clone())
            .collect()
    }

    /// How many times `close()` has been called.
    pub async fn close_count(&self) -> u32 {
        self.state.lock().await.close_count
    }
}

impl MessageChannel for ScriptedChannel {
    fn send(&self, method: &str, properties: Body) -> BoxFuture<'_, RequestId> {
        let method = method.to_string();
        Box::pin(async move {
            let mut state = self.state.lock().await;
            if let Some(ref message) = state.send_failure {
                return Err(LoadError::channel(method, message.clone()));
            }
            let id = state.next_id;
            state.next_id += 1;
            state.pending.insert(id, method.clone());
            state.sent.push(SentMessage { method, properties });
            Ok(RequestId(id))
        })
    }

    fn receive(&self, request: RequestId, timeout: Duration) -> BoxFuture<'_, Response> {
        Box::pin(async move {
            let mut state = self.state.lock().await;
            let method = state
                .pending
                .get(&request.0)
                .cloned()
                .ok_or_else(|| LoadError::Internal(format!("unknown request id {}", request.0)))?;

            let reply = state
                .replies
                .get_mut(&method)
                .and_then(VecDeque::pop_front)
                .unwrap_or(ScriptedReply::Timeout);

            match reply {
                ScriptedReply::Body(body) => Ok(Response { body }),
                ScriptedReply::Timeout => Err(LoadError::Timeout {
                    waited_ms: timeout.as_millis() as u64,
                }),
                ScriptedReply::ChannelError(message) => Err(LoadError::channel(method, message)),
            }
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.state.lock().await.close_count += 1;
            Ok(())
        })
    }
}
