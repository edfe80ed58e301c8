// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Checkpoint retrieval and persistence.
//!
//! Each replicator tracks its replication progress in a checkpoint stored on
//! the *server*, keyed by a generated checkpoint id. The engine holds no
//! local database; progress round-trips through the message channel.
//!
//! # First-Run Semantics
//!
//! A brand-new replicator has no stored checkpoint. `getCheckpoint` then
//! returns a body with the sequence fields absent, and bootstrap substitutes
//! `"0"` sequences and the current time. Absence is the expected first-run
//! state, never an error.
//!
//! # At-Least-Once Persistence
//!
//! Persistence is fire-and-forget from the session's perspective: a failed
//! `setCheckpoint` is reported but the in-memory sequence advance is kept.
//! A crash between advance and the next successful persist replays a small
//! window of already-seen changes on the next run, which the server side
//! must tolerate idempotently.
//!
//! ```text
//! pull batch → advance remote_seq → setCheckpoint
//!              (persist fails here = re-pull the batch next run, idempotent)
//! ```

use crate::channel::{object, proto, MessageChannel};
use crate::error::Result;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// A replicator's replication progress.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Checkpoint id, unique per replicator. Opaque to the server.
    pub id: String,
    /// Sequence marker for uploaded (pushed) changes. Numeric because the
    /// push contract advances it by the batch size.
    pub local_seq: u64,
    /// Sequence marker for the last fully-processed downloaded batch.
    /// Opaque string; servers emit composite sequences.
    pub remote_seq: String,
    /// Epoch millis of the last persistence.
    pub updated_at: i64,
}

/// Per-replicator view of checkpoint state on the server.
pub struct CheckpointStore {
    checkpoint_id: String,
}

impl CheckpointStore {
    /// Create a store for one replicator's checkpoint lineage.
    pub fn new(checkpoint_id: impl Into<String>) -> Self {
        Self {
            checkpoint_id: checkpoint_id.into(),
        }
    }

    /// The checkpoint id this store reads and writes.
    pub fn checkpoint_id(&self) -> &str {
        &self.checkpoint_id
    }

    /// Fetch the stored checkpoint, defaulting missing fields for a first run.
    ///
    /// Missing `local-seq`/`remote-seq` become `"0"`; a missing `timestamp`
    /// becomes the current time. A non-numeric `local-seq` is treated as a
    /// first run with a warning rather than failing the session.
    pub async fn bootstrap<C: MessageChannel>(
        &self,
        channel: &C,
        timeout: Duration,
    ) -> Result<Checkpoint> {
        let request = channel
            .send(
                proto::GET_CHECKPOINT,
                object(json!({ "checkpointId": self.checkpoint_id })),
            )
            .await?;
        let response = channel.receive(request, timeout).await?;

        let local_seq = match response.opt_str("local-seq") {
            Some(raw) => raw.parse::<u64>().unwrap_or_else(|_| {
                warn!(
                    checkpoint_id = %self.checkpoint_id,
                    raw,
                    "Stored local-seq is not numeric, starting from 0"
                );
                0
            }),
            None => 0,
        };
        let remote_seq = response
            .opt_str("remote-seq")
            .unwrap_or("0")
            .to_string();
        let updated_at = response
            .opt_i64("timestamp")
            .unwrap_or_else(|| chrono::Utc::now().timestamp_millis());

        debug!(
            checkpoint_id = %self.checkpoint_id,
            local_seq,
            remote_seq = %remote_seq,
            "Checkpoint bootstrapped"
        );

        Ok(Checkpoint {
            id: self.checkpoint_id.clone(),
            local_seq,
            remote_seq,
            updated_at,
        })
    }

    /// Persist the given sequences with the current time.
    ///
    /// Failure is for the caller to report; it is never retried and never
    /// rolls back in-memory progress.
    pub async fn persist<C: MessageChannel>(
        &self,
        channel: &C,
        local_seq: u64,
        remote_seq: &str,
        timeout: Duration,
    ) -> Result<()> {
        let timestamp = chrono::Utc::now().timestamp_millis();
        let request = channel
            .send(
                proto::SET_CHECKPOINT,
                object(json!({
                    "checkpointId": self.checkpoint_id,
                    "local-seq": local_seq.to_string(),
                    "remote-seq": remote_seq,
                    "timestamp": timestamp,
                })),
            )
            .await?;
        // The ack carries no required body fields; we only wait for it.
        channel.receive(request, timeout).await?;

        debug!(
            checkpoint_id = %self.checkpoint_id,
            local_seq,
            remote_seq = %remote_seq,
            "Checkpoint persisted"
        );
        Ok(())
    }
}
