// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Load orchestration.
//!
//! Thin layer over [`ReplicatorSession`]: opens one channel per replicator
//! through the [`ChannelFactory`] seam, starts N independent sessions on a
//! ramp-up schedule, and aggregates their reports into a [`LoadSummary`].
//!
//! Sessions are fully independent; one replicator's failure never aborts
//! another. The orchestrator only fans out, waits, and counts.

use crate::channel::{BoxFuture, MessageChannel};
use crate::config::{LoadConfig, ReplicationMode};
use crate::error::Result;
use crate::metrics;
use crate::session::{ReplicatorSession, SessionReport};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

/// Opens one [`MessageChannel`] per replicator against an endpoint.
///
/// The seam between the engine and the framing/transport layer: production
/// code supplies a factory for its real transport, tests supply scripted
/// channels.
pub trait ChannelFactory: Send + Sync + 'static {
    /// The channel type this factory produces.
    type Channel: MessageChannel;

    /// Open a new connection to `endpoint`.
    fn open(&self, endpoint: &str) -> BoxFuture<'_, Self::Channel>;
}

/// Aggregate outcome of a load run.
#[derive(Debug, Clone, Default)]
pub struct LoadSummary {
    /// Sessions started (including ones whose channel failed to open).
    pub sessions: usize,
    /// Sessions that ran to their natural end.
    pub succeeded: usize,
    /// Sessions that terminated abnormally.
    pub failed: usize,
    /// Pull rounds across all sessions.
    pub pull_rounds: u64,
    /// Push rounds across all sessions.
    pub push_rounds: u64,
    /// Documents fetched across all sessions.
    pub docs_fetched: u64,
    /// Documents uploaded across all sessions.
    pub docs_uploaded: u64,
    /// Round-level failures across all sessions.
    pub round_failures: usize,
    /// Per-session reports, in start order.
    pub reports: Vec<SessionReport>,
}

impl LoadSummary {
    /// Whether every session ran to its natural end.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn absorb(&mut self, report: SessionReport) {
        self.sessions += 1;
        if report.is_success() {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.pull_rounds += report.pull_rounds;
        self.push_rounds += report.push_rounds;
        self.docs_fetched += report.docs_fetched;
        self.docs_uploaded += report.docs_uploaded;
        self.round_failures += report.round_failures.len();
        self.reports.push(report);
    }
}

/// Instantiates and drives N independent replicator sessions.
pub struct Orchestrator<F: ChannelFactory> {
    config: LoadConfig,
    factory: Arc<F>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl<F: ChannelFactory> Orchestrator<F> {
    /// Create an orchestrator, validating the configuration up front.
    pub fn new(config: LoadConfig, factory: Arc<F>) -> Result<Self> {
        config.validate()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Ok(Self {
            config,
            factory,
            shutdown_tx,
            shutdown_rx,
        })
    }

    /// Signal every session to stop at its next iteration boundary.
    ///
    /// Also stops further ramp-up. Safe to call more than once.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run the configured load: open channels, start sessions with the
    /// ramp-up schedule, wait for all of them, and aggregate.
    pub async fn run(&self) -> LoadSummary {
        info!(
            replicators = self.config.replicators,
            mode = ?self.config.mode,
            endpoint = %self.config.endpoint,
            "Starting load run"
        );

        let mut handles = Vec::with_capacity(self.config.replicators);
        let mut summary = LoadSummary::default();
        let ramp_up = self.config.ramp_up_interval();

        for n in 0..self.config.replicators {
            if *self.shutdown_rx.borrow() {
                info!(started = n, "Shutdown during ramp-up, not starting more sessions");
                break;
            }

            match self.factory.open(&self.config.endpoint).await {
                Ok(channel) => {
                    let session = ReplicatorSession::new(
                        Arc::new(channel),
                        self.config.mode,
                        self.config.session.clone(),
                    );
                    let shutdown_rx = self.shutdown_rx.clone();
                    handles.push(tokio::spawn(session.run(shutdown_rx)));
                    metrics::set_active_sessions(handles.len());
                }
                Err(e) => {
                    warn!(replicator = n, error = %e, "Failed to open channel");
                    summary.absorb(SessionReport {
                        replicator_id: format!("unopened-{n}"),
                        fatal: Some(format!("channel open failed: {e}")),
                        ..SessionReport::default()
                    });
                }
            }

            if !ramp_up.is_zero() && n + 1 < self.config.replicators {
                let mut shutdown_rx = self.shutdown_rx.clone();
                tokio::select! {
                    _ = tokio::time::sleep(ramp_up) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }

        let started = handles.len();
        let mut active = started;
        for handle in handles {
            match handle.await {
                Ok(report) => summary.absorb(report),
                Err(e) => {
                    warn!(error = %e, "Session task panicked");
                    summary.absorb(SessionReport {
                        replicator_id: "panicked".to_string(),
                        fatal: Some(format!("session task panicked: {e}")),
                        ..SessionReport::default()
                    });
                }
            }
            active -= 1;
            metrics::set_active_sessions(active);
        }

        info!(
            started,
            succeeded = summary.succeeded,
            failed = summary.failed,
            pull_rounds = summary.pull_rounds,
            push_rounds = summary.push_rounds,
            docs_fetched = summary.docs_fetched,
            docs_uploaded = summary.docs_uploaded,
            "Load run complete"
        );
        summary
    }

    /// Whether one-shot sessions were configured.
    pub fn is_one_shot(&self) -> bool {
        self.config.mode == ReplicationMode::OneShot
    }
}
