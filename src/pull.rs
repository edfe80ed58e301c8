// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Pull replication: one round of change discovery and document fetch.
//!
//! A round is: subscribe to changes since the current remote sequence,
//! receive one changes batch, fetch the full revision of every non-deleted
//! change in batch order, and report the batch's `lastSequence` as the new
//! remote sequence candidate.
//!
//! Fetches within a batch are strictly sequential: each `requestRev` is
//! fully resolved before the next is issued, so one replicator never has
//! overlapping fetches in flight. The remote sequence advances only to the
//! batch's reported `lastSequence`, never partially.
//!
//! # Idle Rounds
//!
//! In continuous mode the changes receive is bounded by the per-receive
//! timeout. Expiry means no changes arrived, which is a legitimate idle
//! outcome: the round returns with no new sequence and the loop carries on.

use crate::channel::{object, proto, MessageChannel};
use crate::error::{LoadError, Result};
use crate::metrics;
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// One remote change from a changes batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Document id.
    pub doc_id: String,
    /// Revision id.
    pub rev_id: String,
    /// Tombstone flag; deleted changes are never fetched.
    pub deleted: bool,
}

/// Outcome of one pull round.
#[derive(Debug, Clone, Default)]
pub struct PullOutcome {
    /// The batch's `lastSequence`, or `None` for an idle round (continuous
    /// receive timed out with no changes).
    pub last_sequence: Option<String>,
    /// Changes in the received batch.
    pub changes: usize,
    /// Full revisions fetched.
    pub docs_fetched: usize,
    /// Tombstones skipped without a fetch.
    pub tombstones_skipped: usize,
}

impl PullOutcome {
    fn idle() -> Self {
        Self::default()
    }
}

/// Drives pull rounds for one replicator.
pub struct PullEngine {
    replicator_id: String,
}

impl PullEngine {
    /// Create a pull engine for the given replicator.
    pub fn new(replicator_id: impl Into<String>) -> Self {
        Self {
            replicator_id: replicator_id.into(),
        }
    }

    /// Run exactly one pull round.
    ///
    /// `continuous` selects streaming delivery on the server and makes a
    /// changes-receive timeout an idle outcome instead of an error.
    pub async fn run_round<C: MessageChannel>(
        &self,
        channel: &C,
        since: &str,
        continuous: bool,
        receive_timeout: Duration,
    ) -> Result<PullOutcome> {
        let start = Instant::now();

        let mut properties = object(json!({ "since": since }));
        if continuous {
            properties.insert("continuous".to_string(), Value::Bool(true));
        }
        let request = channel.send(proto::SUB_CHANGES, properties).await?;

        let response = match channel.receive(request, receive_timeout).await {
            Ok(response) => response,
            Err(e) if continuous && e.is_idle_timeout() => {
                trace!(replicator_id = %self.replicator_id, "No changes this round");
                metrics::record_pull_idle(&self.replicator_id);
                return Ok(PullOutcome::idle());
            }
            Err(e) => return Err(e),
        };

        let last_sequence = response
            .require_str(proto::SUB_CHANGES, "lastSequence")?
            .to_string();
        let entries = response.require_array(proto::SUB_CHANGES, "changes")?;

        let mut outcome = PullOutcome {
            last_sequence: Some(last_sequence.clone()),
            changes: entries.len(),
            ..PullOutcome::default()
        };

        // Fetch in changes-batch order, one at a time.
        for entry in entries {
            let change = parse_change(entry)?;
            if change.deleted {
                trace!(
                    replicator_id = %self.replicator_id,
                    doc_id = %change.doc_id,
                    "Skipping tombstone"
                );
                outcome.tombstones_skipped += 1;
                continue;
            }

            let request = channel
                .send(
                    proto::REQUEST_REV,
                    object(json!({ "id": change.doc_id, "rev": change.rev_id })),
                )
                .await?;
            // Body content is observed, not validated or stored.
            let _revision = channel.receive(request, receive_timeout).await?;
            outcome.docs_fetched += 1;
        }

        metrics::record_pull_round(
            &self.replicator_id,
            outcome.docs_fetched,
            outcome.tombstones_skipped,
            start.elapsed(),
        );
        debug!(
            replicator_id = %self.replicator_id,
            changes = outcome.changes,
            docs_fetched = outcome.docs_fetched,
            tombstones = outcome.tombstones_skipped,
            last_sequence = %last_sequence,
            "Pull round complete"
        );

        Ok(outcome)
    }
}

/// Parse one changes-batch entry. `deleted` defaults to false when absent.
fn parse_change(entry: &Value) -> Result<Change> {
    let doc_id = entry
        .get("id")
        .and_then(Value::as_str)
        .ok_or_else(|| LoadError::malformed(proto::SUB_CHANGES, "change entry missing `id`"))?;
    let rev_id = entry
        .get("rev")
        .and_then(Value::as_str)
        .ok_or_else(|| LoadError::malformed(proto::SUB_CHANGES, "change entry missing `rev`"))?;
    let deleted = entry
        .get("deleted")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    Ok(Change {
        doc_id: doc_id.to_string(),
        rev_id: rev_id.to_string(),
        deleted,
    })
}
