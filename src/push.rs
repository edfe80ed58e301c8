// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Push replication: one round of proposing and uploading local changes.
//!
//! A round is: generate a fixed-size batch of synthetic local changes, offer
//! the full ordered (id, rev) list via `proposeChanges`, and upload exactly
//! the subset the server names in its `needed` response. The server's
//! selection is authoritative; an index absent from `needed` is never
//! uploaded, no matter what we think the server should want.
//!
//! The local sequence advances by the full batch size regardless of how many
//! revisions were actually needed: the batch was offered in its entirety.
//!
//! Uploads are issued sequentially in ascending index order. They could be
//! pipelined, but sequential sends keep ordering deterministic and give the
//! channel natural back-pressure.

use crate::channel::{object, proto, MessageChannel};
use crate::error::{LoadError, Result};
use crate::metrics;
use rand::Rng;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A locally originated change offered during a push round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposedChange {
    /// Generated document id, distinct per round.
    pub doc_id: String,
    /// Generated revision id.
    pub rev_id: String,
}

/// Outcome of one push round.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    /// `local_seq + batch_size`, the new local sequence.
    pub new_local_seq: u64,
    /// Changes proposed (always the configured batch size).
    pub proposed: usize,
    /// Revisions uploaded (size of the server's needed set).
    pub uploaded: usize,
}

/// Drives push rounds for one replicator.
///
/// Holds a round counter so generated document ids are distinct per round.
pub struct PushEngine {
    replicator_id: String,
    batch_size: usize,
    round: u64,
}

impl PushEngine {
    /// Create a push engine producing `batch_size` changes per round.
    pub fn new(replicator_id: impl Into<String>, batch_size: usize) -> Self {
        Self {
            replicator_id: replicator_id.into(),
            batch_size,
            round: 0,
        }
    }

    /// Generate the next round's batch of proposed changes.
    fn generate_batch(&mut self) -> Vec<ProposedChange> {
        let round = self.round;
        self.round += 1;
        let mut rng = rand::thread_rng();
        (0..self.batch_size)
            .map(|i| ProposedChange {
                doc_id: format!("{}-doc-{}-{}", self.replicator_id, round, i),
                rev_id: format!("1-{:08x}", rng.gen::<u32>()),
            })
            .collect()
    }

    /// Run exactly one push round, returning the advanced local sequence.
    pub async fn run_round<C: MessageChannel>(
        &mut self,
        channel: &C,
        local_seq: u64,
        receive_timeout: Duration,
    ) -> Result<PushOutcome> {
        let start = Instant::now();
        let batch = self.generate_batch();
        let new_local_seq = local_seq + batch.len() as u64;

        let changes: Vec<Value> = batch
            .iter()
            .map(|c| json!([c.doc_id, c.rev_id]))
            .collect();
        let request = channel
            .send(proto::PROPOSE_CHANGES, object(json!({ "changes": changes })))
            .await?;
        let response = channel.receive(request, receive_timeout).await?;

        let needed = response.require_array(proto::PROPOSE_CHANGES, "needed")?;
        let mut indices = BTreeSet::new();
        for value in needed {
            let index = value.as_u64().ok_or_else(|| {
                LoadError::malformed(proto::PROPOSE_CHANGES, "non-integer needed index")
            })?;
            indices.insert(index as usize);
        }

        let mut uploaded = 0;
        for index in indices {
            let Some(change) = batch.get(index) else {
                warn!(
                    replicator_id = %self.replicator_id,
                    index,
                    batch_size = batch.len(),
                    "Server requested index past batch end, skipping"
                );
                continue;
            };
            // Upload is send-only; no response is required.
            channel
                .send(
                    proto::SEND_REV,
                    object(json!({
                        "id": change.doc_id,
                        "rev": change.rev_id,
                        "body": { "generated": true, "source": self.replicator_id },
                    })),
                )
                .await?;
            uploaded += 1;
        }

        metrics::record_push_round(&self.replicator_id, batch.len(), uploaded, start.elapsed());
        debug!(
            replicator_id = %self.replicator_id,
            proposed = batch.len(),
            uploaded,
            new_local_seq,
            "Push round complete"
        );

        Ok(PushOutcome {
            new_local_seq,
            proposed: batch.len(),
            uploaded,
        })
    }
}
