// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Integration tests for the load engine.
//!
//! All tests run against scripted in-memory channels; no server required.
//!
//! # Test Organization
//! - `one_shot_*` - single-pass sessions and their message sequences
//! - `continuous_*` - dual-loop sessions, sequence advancement, shutdown
//! - `orchestrator_*` - multi-session fan-out and aggregation

mod common;

use common::{
    changes_body, checkpoint_body, needed_body, script_one_shot, scripted, QueueFactory,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use syncload::channel::{object, proto};
use syncload::{
    LoadConfig, Orchestrator, ReplicationMode, ReplicatorSession, SessionSettings,
};
use tokio::sync::watch;

fn settings(push_batch_size: usize) -> SessionSettings {
    SessionSettings {
        push_batch_size,
        duration_secs: 30,
        receive_timeout_secs: 1,
        idle_pause_ms: 5,
    }
}

fn no_shutdown() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    std::mem::forget(tx);
    rx
}

// =============================================================================
// One-Shot Sessions
// =============================================================================

#[tokio::test]
async fn one_shot_resumes_from_stored_checkpoint() {
    let channel = scripted();
    channel
        .enqueue_body(proto::GET_CHECKPOINT, checkpoint_body("40", "25"))
        .await;
    channel
        .enqueue_body(
            proto::SUB_CHANGES,
            changes_body(json!([{"id": "doc-new", "rev": "2-b"}]), "31"),
        )
        .await;
    channel
        .enqueue_body(proto::REQUEST_REV, object(json!({"body": "x"})))
        .await;
    channel
        .enqueue_body(proto::SET_CHECKPOINT, object(json!({})))
        .await;

    let session = ReplicatorSession::with_id(
        "rep-resume",
        Arc::clone(&channel),
        ReplicationMode::OneShot,
        settings(100),
    );
    let report = session.run(no_shutdown()).await;
    assert!(report.is_success());

    let sent = channel.sent().await;
    // Discovery starts from the stored remote sequence.
    assert_eq!(sent[1].method, proto::SUB_CHANGES);
    assert_eq!(sent[1].properties.get("since"), Some(&json!("25")));
    // Persist carries the new remote seq and the untouched local seq.
    assert_eq!(sent[3].method, proto::SET_CHECKPOINT);
    assert_eq!(sent[3].properties.get("remote-seq"), Some(&json!("31")));
    assert_eq!(sent[3].properties.get("local-seq"), Some(&json!("40")));
    assert_eq!(channel.close_count().await, 1);
}

#[tokio::test]
async fn one_shot_skips_tombstones_end_to_end() {
    let channel = scripted();
    channel
        .enqueue_body(proto::GET_CHECKPOINT, object(json!({})))
        .await;
    channel
        .enqueue_body(
            proto::SUB_CHANGES,
            changes_body(
                json!([
                    {"id": "doc-1", "rev": "1-a"},
                    {"id": "doc-2", "rev": "3-c", "deleted": true},
                    {"id": "doc-3", "rev": "1-b"},
                ]),
                "9",
            ),
        )
        .await;
    channel
        .enqueue_body(proto::REQUEST_REV, object(json!({"body": "x"})))
        .await;
    channel
        .enqueue_body(proto::REQUEST_REV, object(json!({"body": "y"})))
        .await;
    channel
        .enqueue_body(proto::SET_CHECKPOINT, object(json!({})))
        .await;

    let session = ReplicatorSession::with_id(
        "rep-tomb",
        Arc::clone(&channel),
        ReplicationMode::OneShot,
        settings(100),
    );
    let report = session.run(no_shutdown()).await;

    assert!(report.is_success());
    assert_eq!(report.docs_fetched, 2);
    let fetched: Vec<_> = channel
        .sent()
        .await
        .iter()
        .filter(|m| m.method == proto::REQUEST_REV)
        .map(|m| m.properties.get("id").unwrap().clone())
        .collect();
    assert_eq!(fetched, vec![json!("doc-1"), json!("doc-3")]);
}

// =============================================================================
// Continuous Sessions
// =============================================================================

/// Push batch of 100 with `needed = [0, 5, 99]`: exactly three uploads, and
/// the local sequence advances by the full batch size.
#[tokio::test]
async fn continuous_push_uploads_only_needed_and_advances_by_batch() {
    let channel = scripted();
    channel
        .enqueue_body(proto::GET_CHECKPOINT, object(json!({})))
        .await;
    channel
        .enqueue_body(proto::PROPOSE_CHANGES, needed_body(&[0, 5, 99]))
        .await;
    for _ in 0..10 {
        channel
            .enqueue_body(proto::PROPOSE_CHANGES, needed_body(&[]))
            .await;
        channel
            .enqueue_body(proto::SET_CHECKPOINT, object(json!({})))
            .await;
    }
    channel
        .enqueue_body(proto::SET_CHECKPOINT, object(json!({})))
        .await;

    let session = ReplicatorSession::with_id(
        "rep-push",
        Arc::clone(&channel),
        ReplicationMode::Continuous,
        settings(100),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(session.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();
    let report = handle.await.unwrap();

    assert!(report.is_success(), "fatal: {:?}", report.fatal);
    assert_eq!(report.docs_uploaded, 3);

    let sent = channel.sent().await;
    let uploads: Vec<_> = sent.iter().filter(|m| m.method == proto::SEND_REV).collect();
    assert_eq!(uploads.len(), 3);

    // First persist after the push round advances local-seq by exactly 100.
    let first_persist = sent
        .iter()
        .find(|m| m.method == proto::SET_CHECKPOINT)
        .unwrap();
    assert_eq!(first_persist.properties.get("local-seq"), Some(&json!("100")));
}

#[tokio::test]
async fn continuous_remote_seq_advances_before_next_discovery() {
    let channel = scripted();
    channel
        .enqueue_body(proto::GET_CHECKPOINT, object(json!({})))
        .await;
    channel
        .enqueue_body(proto::SUB_CHANGES, changes_body(json!([]), "14"))
        .await;
    channel
        .enqueue_body(proto::SUB_CHANGES, changes_body(json!([]), "22"))
        .await;
    for _ in 0..40 {
        channel
            .enqueue_body(proto::SET_CHECKPOINT, object(json!({})))
            .await;
        channel
            .enqueue_body(proto::PROPOSE_CHANGES, needed_body(&[]))
            .await;
    }

    let session = ReplicatorSession::with_id(
        "rep-seq",
        Arc::clone(&channel),
        ReplicationMode::Continuous,
        settings(10),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(session.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(120)).await;
    shutdown_tx.send(true).unwrap();
    let report = handle.await.unwrap();
    assert!(report.is_success(), "fatal: {:?}", report.fatal);

    // Each batch's lastSequence becomes the next round's since.
    let sinces: Vec<_> = channel
        .sent()
        .await
        .iter()
        .filter(|m| m.method == proto::SUB_CHANGES)
        .map(|m| m.properties.get("since").unwrap().clone())
        .collect();
    assert!(sinces.len() >= 3);
    assert_eq!(sinces[0], json!("0"));
    assert_eq!(sinces[1], json!("14"));
    assert_eq!(sinces[2], json!("22"));
    // Idle rounds afterwards keep the last sequence.
    for since in &sinces[3..] {
        assert_eq!(since, &json!("22"));
    }
}

#[tokio::test]
async fn continuous_idle_rounds_are_not_failures() {
    let channel = scripted();
    channel
        .enqueue_body(proto::GET_CHECKPOINT, object(json!({})))
        .await;
    // Nothing else scripted: every pull receive times out, every push
    // propose times out. A quiet server means idle rounds on both loops.
    let session = ReplicatorSession::with_id(
        "rep-idle",
        Arc::clone(&channel),
        ReplicationMode::Continuous,
        settings(10),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(session.run(shutdown_rx));
    tokio::time::sleep(Duration::from_millis(80)).await;
    shutdown_tx.send(true).unwrap();
    let report = handle.await.unwrap();

    assert!(report.is_success(), "fatal: {:?}", report.fatal);
    assert!(report.pull_rounds >= 1);
    assert!(report.push_rounds >= 1);
    assert!(report.round_failures.is_empty(), "{:?}", report.round_failures);
    assert_eq!(channel.close_count().await, 1);
}

// =============================================================================
// Orchestrator
// =============================================================================

#[tokio::test]
async fn orchestrator_aggregates_across_sessions() {
    let a = scripted();
    script_one_shot(&a, 2, "7").await;
    let b = scripted();
    script_one_shot(&b, 3, "9").await;

    let mut config = LoadConfig::for_testing(ReplicationMode::OneShot);
    config.replicators = 2;
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(QueueFactory::new(vec![Arc::clone(&a), Arc::clone(&b)])),
    )
    .unwrap();
    let summary = orchestrator.run().await;

    assert!(summary.is_success());
    assert_eq!(summary.sessions, 2);
    assert_eq!(summary.pull_rounds, 2);
    assert_eq!(summary.docs_fetched, 5);
    assert_eq!(summary.round_failures, 0);
    assert_eq!(a.close_count().await, 1);
    assert_eq!(b.close_count().await, 1);
}

#[tokio::test]
async fn orchestrator_isolates_failing_replicator() {
    let healthy = scripted();
    script_one_shot(&healthy, 1, "4").await;
    let broken = scripted();
    broken
        .enqueue_error(proto::GET_CHECKPOINT, "connection refused")
        .await;

    let mut config = LoadConfig::for_testing(ReplicationMode::OneShot);
    config.replicators = 2;
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(QueueFactory::new(vec![broken, Arc::clone(&healthy)])),
    )
    .unwrap();
    let summary = orchestrator.run().await;

    assert_eq!(summary.succeeded, 1);
    assert_eq!(summary.failed, 1);
    let failed = summary.reports.iter().find(|r| !r.is_success()).unwrap();
    assert!(failed.fatal.as_deref().unwrap().contains("connection refused"));
    assert_eq!(fetched_revs(&healthy).await, 1);
}

/// Count requestRev sends on a channel; keeps the assertion at the wire level.
async fn fetched_revs(channel: &syncload::ScriptedChannel) -> usize {
    channel
        .sent()
        .await
        .iter()
        .filter(|m| m.method == proto::REQUEST_REV)
        .count()
}
