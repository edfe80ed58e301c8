// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared helpers for integration tests: scripted channels and a channel
//! factory that hands out pre-loaded scripts.

use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use syncload::channel::{object, proto, BoxFuture, Body, ScriptedChannel};
use syncload::{ChannelFactory, LoadError};

/// A fresh scripted channel behind an `Arc` so tests can keep a handle.
pub fn scripted() -> Arc<ScriptedChannel> {
    Arc::new(ScriptedChannel::new())
}

/// Body for a stored checkpoint response.
pub fn checkpoint_body(local_seq: &str, remote_seq: &str) -> Body {
    object(json!({
        "local-seq": local_seq,
        "remote-seq": remote_seq,
        "timestamp": 1_700_000_000_000i64,
    }))
}

/// Body for a changes batch.
pub fn changes_body(changes: Value, last_sequence: &str) -> Body {
    object(json!({ "changes": changes, "lastSequence": last_sequence }))
}

/// Body for a propose-changes response.
pub fn needed_body(indices: &[u64]) -> Body {
    object(json!({ "needed": indices }))
}

/// Script a complete one-shot pass onto `channel`: empty checkpoint, one
/// changes batch with `docs` live documents, and a persist ack.
pub async fn script_one_shot(channel: &ScriptedChannel, docs: usize, last_sequence: &str) {
    channel
        .enqueue_body(proto::GET_CHECKPOINT, object(json!({})))
        .await;
    let changes: Vec<Value> = (0..docs)
        .map(|i| json!({"id": format!("doc-{i}"), "rev": "1-a"}))
        .collect();
    channel
        .enqueue_body(proto::SUB_CHANGES, changes_body(json!(changes), last_sequence))
        .await;
    for _ in 0..docs {
        channel
            .enqueue_body(proto::REQUEST_REV, object(json!({"body": "payload"})))
            .await;
    }
    channel
        .enqueue_body(proto::SET_CHECKPOINT, object(json!({})))
        .await;
}

/// Hands out pre-scripted channels in order; an exhausted queue fails the
/// open with a channel error.
pub struct QueueFactory {
    channels: Mutex<Vec<Arc<ScriptedChannel>>>,
}

impl QueueFactory {
    pub fn new(mut channels: Vec<Arc<ScriptedChannel>>) -> Self {
        // Hand out in the order given.
        channels.reverse();
        Self {
            channels: Mutex::new(channels),
        }
    }
}

impl ChannelFactory for QueueFactory {
    type Channel = Arc<ScriptedChannel>;

    fn open(&self, _endpoint: &str) -> BoxFuture<'_, Self::Channel> {
        Box::pin(async move {
            self.channels
                .lock()
                .map_err(|_| LoadError::Internal("factory lock poisoned".to_string()))?
                .pop()
                .ok_or_else(|| LoadError::channel("open", "no scripted channels left"))
        })
    }
}
