//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics for:
//! - Pull/push round throughput and latency
//! - Documents fetched and uploaded
//! - Idle (no-changes) rounds
//! - Checkpoint persistence outcomes
//! - Active session count and session results
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `syncload_` and follow Prometheus
//! conventions: counters end in `_total`, gauges represent current state,
//! histograms track distributions.

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a completed pull round.
pub fn record_pull_round(replicator_id: &str, docs_fetched: usize, tombstones: usize, duration: Duration) {
    counter!("syncload_pull_rounds_total", "replicator_id" => replicator_id.to_string()).increment(1);
    counter!("syncload_docs_fetched_total", "replicator_id" => replicator_id.to_string())
        .increment(docs_fetched as u64);
    if tombstones > 0 {
        counter!("syncload_tombstones_skipped_total", "replicator_id" => replicator_id.to_string())
            .increment(tombstones as u64);
    }
    histogram!("syncload_pull_round_duration_seconds", "replicator_id" => replicator_id.to_string())
        .record(duration.as_secs_f64());
}

/// Record an idle pull round (continuous receive timed out, no changes).
pub fn record_pull_idle(replicator_id: &str) {
    counter!("syncload_pull_idle_rounds_total", "replicator_id" => replicator_id.to_string()).increment(1);
}

/// Record an idle push round (propose receive timed out).
pub fn record_push_idle(replicator_id: &str) {
    counter!("syncload_push_idle_rounds_total", "replicator_id" => replicator_id.to_string()).increment(1);
}

/// Record a completed push round.
pub fn record_push_round(replicator_id: &str, proposed: usize, uploaded: usize, duration: Duration) {
    counter!("syncload_push_rounds_total", "replicator_id" => replicator_id.to_string()).increment(1);
    counter!("syncload_docs_proposed_total", "replicator_id" => replicator_id.to_string())
        .increment(proposed as u64);
    counter!("syncload_docs_uploaded_total", "replicator_id" => replicator_id.to_string())
        .increment(uploaded as u64);
    histogram!("syncload_push_round_duration_seconds", "replicator_id" => replicator_id.to_string())
        .record(duration.as_secs_f64());
}

/// Record a checkpoint persistence attempt.
pub fn record_checkpoint_persist(replicator_id: &str, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("syncload_checkpoint_persists_total", "replicator_id" => replicator_id.to_string(), "status" => status)
        .increment(1);
}

/// Record a round-level failure, attributed to a replicator and round kind.
pub fn record_round_failure(replicator_id: &str, kind: &str) {
    counter!("syncload_round_failures_total", "replicator_id" => replicator_id.to_string(), "kind" => kind.to_string())
        .increment(1);
}

/// Set the number of currently running sessions.
pub fn set_active_sessions(count: usize) {
    gauge!("syncload_active_sessions").set(count as f64);
}

/// Record a finished session.
pub fn record_session_complete(replicator_id: &str, success: bool, duration: Duration) {
    let status = if success { "success" } else { "failure" };
    counter!("syncload_sessions_total", "replicator_id" => replicator_id.to_string(), "status" => status)
        .increment(1);
    histogram!("syncload_session_duration_seconds").record(duration.as_secs_f64());
}
