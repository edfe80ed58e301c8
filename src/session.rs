// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replicator session lifecycle.
//!
//! One [`ReplicatorSession`] owns one simulated client: its generated
//! replicator id, its message channel, its checkpoint, and the pull/push
//! engines that drive it. Sessions are the unit of concurrency; the
//! orchestrator spawns one task per session and nothing is shared across
//! replicators except the server itself.
//!
//! # State Machine
//!
//! ```text
//! Bootstrapping ──► OneShotPull ──► (terminal)
//!       │
//!       └─────────► ContinuousLoop ──► (duration elapsed / shutdown)
//!                    ├── pull loop ┐  two concurrent activities,
//!                    └── push loop ┘  one shared channel
//! ```
//!
//! The one-shot path performs pull only; push is exercised solely by the
//! continuous path. In continuous mode the pull and push loops run as two
//! concurrently spawned tasks over the same channel. Each owns one half of
//! the session's progress (`remote_seq` for pull, `local_seq` for push) and
//! reads the other half only when persisting a checkpoint, so the loops
//! never contend beyond that combination step.
//!
//! # Shutdown
//!
//! The duration bound and the external shutdown signal are both observed at
//! iteration boundaries, never mid-round. A channel error in either loop
//! raises a session-local stop flag so the sibling exits at its next
//! boundary. The channel is closed exactly once per session, on every exit
//! path.

use crate::channel::MessageChannel;
use crate::checkpoint::CheckpointStore;
use crate::config::{ReplicationMode, SessionSettings};
use crate::metrics;
use crate::pull::PullEngine;
use crate::push::PushEngine;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, RwLock};
use tracing::{debug, error, info, info_span, warn, Instrument};

/// Which half of a session a failed round belonged to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundKind {
    /// Change discovery / document fetch.
    Pull,
    /// Change proposal / document upload.
    Push,
}

impl RoundKind {
    /// Label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}

/// One failed round, attributable for aggregate reporting.
#[derive(Debug, Clone)]
pub struct RoundFailure {
    /// Pull or push.
    pub kind: RoundKind,
    /// 1-based round number within that loop.
    pub round: u64,
    /// Error description.
    pub error: String,
}

/// Outcome of one session, returned to the orchestrator.
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    /// The session's generated replicator id.
    pub replicator_id: String,
    /// Completed pull rounds (idle rounds included).
    pub pull_rounds: u64,
    /// Completed push rounds (idle rounds included).
    pub push_rounds: u64,
    /// Full revisions fetched across all pull rounds.
    pub docs_fetched: u64,
    /// Revisions uploaded across all push rounds.
    pub docs_uploaded: u64,
    /// Round-level failures that did not end the session.
    pub round_failures: Vec<RoundFailure>,
    /// Session-fatal error, if the session terminated abnormally.
    pub fatal: Option<String>,
}

impl SessionReport {
    /// Whether the session ran to its natural end.
    pub fn is_success(&self) -> bool {
        self.fatal.is_none()
    }
}

/// Progress shared between a continuous session's two loops.
///
/// Pull writes `remote_seq`, push writes `local_seq`; each reads the other
/// field only when persisting a checkpoint.
struct Progress {
    remote_seq: RwLock<String>,
    local_seq: AtomicU64,
}

/// Accumulator for one loop's half of the report.
#[derive(Default)]
struct LoopStats {
    rounds: u64,
    docs: u64,
    failures: Vec<RoundFailure>,
    fatal: Option<String>,
}

/// Generate a collision-resistant opaque replicator id.
fn generate_replicator_id() -> String {
    let mut rng = rand::thread_rng();
    format!("rep-{:08x}{:08x}", rng.gen::<u32>(), rng.gen::<u32>())
}

/// One simulated client: checkpoint bootstrap, mode dispatch, and the
/// pull/push orchestration for that mode.
pub struct ReplicatorSession<C: MessageChannel> {
    replicator_id: String,
    channel: Arc<C>,
    mode: ReplicationMode,
    settings: SessionSettings,
}

impl<C: MessageChannel> ReplicatorSession<C> {
    /// Create a session with a freshly generated replicator id.
    pub fn new(channel: Arc<C>, mode: ReplicationMode, settings: SessionSettings) -> Self {
        Self::with_id(generate_replicator_id(), channel, mode, settings)
    }

    /// Create a session with an explicit replicator id.
    pub fn with_id(
        replicator_id: impl Into<String>,
        channel: Arc<C>,
        mode: ReplicationMode,
        settings: SessionSettings,
    ) -> Self {
        Self {
            replicator_id: replicator_id.into(),
            channel,
            mode,
            settings,
        }
    }

    /// The session's replicator id.
    pub fn replicator_id(&self) -> &str {
        &self.replicator_id
    }

    /// Run the session to completion.
    ///
    /// Bootstraps the checkpoint, dispatches on mode, and closes the channel
    /// on every exit path. `shutdown_rx` is the orchestrator's external stop
    /// signal; continuous loops observe it at iteration boundaries.
    pub async fn run(self, shutdown_rx: watch::Receiver<bool>) -> SessionReport {
        let span = info_span!("replicator", replicator_id = %self.replicator_id);
        async move {
            let started = Instant::now();
            let report = self.run_inner(shutdown_rx).await;

            // Single release point for the connection.
            if let Err(e) = self.channel.close().await {
                warn!(error = %e, "Failed to close channel");
            }

            metrics::record_session_complete(
                &self.replicator_id,
                report.is_success(),
                started.elapsed(),
            );
            if let Some(ref fatal) = report.fatal {
                error!(error = %fatal, "Session terminated abnormally");
            } else {
                info!(
                    pull_rounds = report.pull_rounds,
                    push_rounds = report.push_rounds,
                    docs_fetched = report.docs_fetched,
                    docs_uploaded = report.docs_uploaded,
                    round_failures = report.round_failures.len(),
                    "Session complete"
                );
            }
            report
        }
        .instrument(span)
        .await
    }

    async fn run_inner(&self, shutdown_rx: watch::Receiver<bool>) -> SessionReport {
        let mut report = SessionReport {
            replicator_id: self.replicator_id.clone(),
            ..SessionReport::default()
        };

        let store = CheckpointStore::new(&self.replicator_id);
        let checkpoint = match store
            .bootstrap(&*self.channel, self.settings.receive_timeout())
            .await
        {
            Ok(checkpoint) => checkpoint,
            Err(e) => {
                report.fatal = Some(format!("checkpoint bootstrap failed: {e}"));
                return report;
            }
        };
        info!(
            local_seq = checkpoint.local_seq,
            remote_seq = %checkpoint.remote_seq,
            "Bootstrapped checkpoint"
        );

        match self.mode {
            ReplicationMode::OneShot => {
                self.run_one_shot(&store, checkpoint, &mut report).await;
            }
            ReplicationMode::Continuous => {
                self.run_continuous(store, checkpoint, shutdown_rx, &mut report)
                    .await;
            }
        }
        report
    }

    /// One-shot path: a single non-continuous pull round, one checkpoint
    /// persist with the unchanged local sequence, then done. Push is not
    /// exercised here.
    async fn run_one_shot(
        &self,
        store: &CheckpointStore,
        checkpoint: crate::checkpoint::Checkpoint,
        report: &mut SessionReport,
    ) {
        let pull = PullEngine::new(&self.replicator_id);
        let timeout = self.settings.receive_timeout();

        match pull
            .run_round(&*self.channel, &checkpoint.remote_seq, false, timeout)
            .await
        {
            Ok(outcome) => {
                report.pull_rounds = 1;
                report.docs_fetched = outcome.docs_fetched as u64;
                let remote_seq = outcome
                    .last_sequence
                    .unwrap_or(checkpoint.remote_seq);
                match store
                    .persist(&*self.channel, checkpoint.local_seq, &remote_seq, timeout)
                    .await
                {
                    Ok(()) => metrics::record_checkpoint_persist(&self.replicator_id, true),
                    Err(e) => {
                        metrics::record_checkpoint_persist(&self.replicator_id, false);
                        warn!(error = %e, "Checkpoint persist failed");
                    }
                }
            }
            Err(e) if e.is_session_fatal() => {
                report.fatal = Some(e.to_string());
            }
            Err(e) => {
                metrics::record_round_failure(&self.replicator_id, RoundKind::Pull.as_str());
                report.round_failures.push(RoundFailure {
                    kind: RoundKind::Pull,
                    round: 1,
                    error: e.to_string(),
                });
            }
        }
    }

    /// Continuous path: spawn the pull and push loops as two tasks sharing
    /// the channel and the split-ownership progress pair, bounded by the
    /// configured duration.
    async fn run_continuous(
        &self,
        store: CheckpointStore,
        checkpoint: crate::checkpoint::Checkpoint,
        shutdown_rx: watch::Receiver<bool>,
        report: &mut SessionReport,
    ) {
        let deadline = Instant::now() + self.settings.duration();
        let progress = Arc::new(Progress {
            remote_seq: RwLock::new(checkpoint.remote_seq),
            local_seq: AtomicU64::new(checkpoint.local_seq),
        });
        // Raised by either loop on a session-fatal error so the sibling
        // stops at its next iteration boundary.
        let stop = Arc::new(AtomicBool::new(false));
        let store = Arc::new(store);

        let pull_handle = tokio::spawn(pull_loop(
            self.replicator_id.clone(),
            Arc::clone(&self.channel),
            Arc::clone(&store),
            Arc::clone(&progress),
            Arc::clone(&stop),
            shutdown_rx.clone(),
            deadline,
            self.settings.clone(),
        ));
        let push_handle = tokio::spawn(push_loop(
            self.replicator_id.clone(),
            Arc::clone(&self.channel),
            store,
            progress,
            Arc::clone(&stop),
            shutdown_rx,
            deadline,
            self.settings.clone(),
        ));

        let (pull_stats, push_stats) = match futures::future::join(pull_handle, push_handle).await
        {
            (Ok(pull), Ok(push)) => (pull, push),
            (pull, push) => {
                // A panicked loop task is an engine bug; salvage what we can.
                report.fatal = Some("session loop task panicked".to_string());
                (
                    pull.unwrap_or_default(),
                    push.unwrap_or_default(),
                )
            }
        };

        report.pull_rounds = pull_stats.rounds;
        report.docs_fetched = pull_stats.docs;
        report.push_rounds = push_stats.rounds;
        report.docs_uploaded = push_stats.docs;
        report.round_failures.extend(pull_stats.failures);
        report.round_failures.extend(push_stats.failures);
        if report.fatal.is_none() {
            report.fatal = pull_stats.fatal.or(push_stats.fatal);
        }
    }
}

/// Whether a loop should stop before starting another round.
fn should_stop(
    stop: &AtomicBool,
    shutdown_rx: &watch::Receiver<bool>,
    deadline: Instant,
) -> bool {
    stop.load(Ordering::Acquire) || *shutdown_rx.borrow() || Instant::now() >= deadline
}

/// Cooperative idle pause, cut short by the external shutdown signal.
///
/// A dropped shutdown sender makes `changed()` fail immediately and on every
/// later call; that must never skip the pause, so the closed-channel case
/// sleeps it out in full.
async fn idle_pause(settings: &SessionSettings, shutdown_rx: &mut watch::Receiver<bool>) {
    tokio::select! {
        _ = tokio::time::sleep(settings.idle_pause()) => {}
        changed = shutdown_rx.changed() => {
            if changed.is_err() {
                tokio::time::sleep(settings.idle_pause()).await;
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn pull_loop<C: MessageChannel>(
    replicator_id: String,
    channel: Arc<C>,
    store: Arc<CheckpointStore>,
    progress: Arc<Progress>,
    stop: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
    deadline: Instant,
    settings: SessionSettings,
) -> LoopStats {
    let pull = PullEngine::new(&replicator_id);
    let timeout = settings.receive_timeout();
    let mut stats = LoopStats::default();
    let mut round: u64 = 0;

    while !should_stop(&stop, &shutdown_rx, deadline) {
        round += 1;
        let since = progress.remote_seq.read().await.clone();

        match pull.run_round(&*channel, &since, true, timeout).await {
            Ok(outcome) => {
                stats.rounds += 1;
                stats.docs += outcome.docs_fetched as u64;
                if let Some(last_sequence) = outcome.last_sequence {
                    // Persist with the push loop's current local sequence,
                    // then advance our half. A failed persist is recorded
                    // and progress is kept (at-least-once).
                    let local_seq = progress.local_seq.load(Ordering::Acquire);
                    match store
                        .persist(&*channel, local_seq, &last_sequence, timeout)
                        .await
                    {
                        Ok(()) => metrics::record_checkpoint_persist(&replicator_id, true),
                        Err(e) => {
                            metrics::record_checkpoint_persist(&replicator_id, false);
                            warn!(error = %e, "Checkpoint persist failed after pull");
                        }
                    }
                    *progress.remote_seq.write().await = last_sequence;
                }
            }
            Err(e) if e.is_session_fatal() => {
                stats.fatal = Some(e.to_string());
                stop.store(true, Ordering::Release);
                break;
            }
            Err(e) if e.is_idle_timeout() => {
                // A receive window expired mid-round (fetch). The round ends
                // without advancing the sequence; not a failure.
                stats.rounds += 1;
                metrics::record_pull_idle(&replicator_id);
                debug!(round, "Receive window expired, ending pull round");
            }
            Err(e) => {
                metrics::record_round_failure(&replicator_id, RoundKind::Pull.as_str());
                warn!(round, error = %e, "Pull round failed");
                stats.failures.push(RoundFailure {
                    kind: RoundKind::Pull,
                    round,
                    error: e.to_string(),
                });
            }
        }

        idle_pause(&settings, &mut shutdown_rx).await;
    }

    debug!(rounds = stats.rounds, "Pull loop stopped");
    stats
}

#[allow(clippy::too_many_arguments)]
async fn push_loop<C: MessageChannel>(
    replicator_id: String,
    channel: Arc<C>,
    store: Arc<CheckpointStore>,
    progress: Arc<Progress>,
    stop: Arc<AtomicBool>,
    mut shutdown_rx: watch::Receiver<bool>,
    deadline: Instant,
    settings: SessionSettings,
) -> LoopStats {
    let mut push = PushEngine::new(&replicator_id, settings.push_batch_size);
    let timeout = settings.receive_timeout();
    let mut stats = LoopStats::default();
    let mut round: u64 = 0;

    while !should_stop(&stop, &shutdown_rx, deadline) {
        round += 1;
        let local_seq = progress.local_seq.load(Ordering::Acquire);

        match push.run_round(&*channel, local_seq, timeout).await {
            Ok(outcome) => {
                stats.rounds += 1;
                stats.docs += outcome.uploaded as u64;
                let remote_seq = progress.remote_seq.read().await.clone();
                match store
                    .persist(&*channel, outcome.new_local_seq, &remote_seq, timeout)
                    .await
                {
                    Ok(()) => metrics::record_checkpoint_persist(&replicator_id, true),
                    Err(e) => {
                        metrics::record_checkpoint_persist(&replicator_id, false);
                        warn!(error = %e, "Checkpoint persist failed after push");
                    }
                }
                progress.local_seq.store(outcome.new_local_seq, Ordering::Release);
            }
            Err(e) if e.is_session_fatal() => {
                stats.fatal = Some(e.to_string());
                stop.store(true, Ordering::Release);
                break;
            }
            Err(e) if e.is_idle_timeout() => {
                // Quiet server: the propose receive expired. The round ends
                // without advancing the sequence; not a failure.
                stats.rounds += 1;
                metrics::record_push_idle(&replicator_id);
                debug!(round, "Receive window expired, ending push round");
            }
            Err(e) => {
                metrics::record_round_failure(&replicator_id, RoundKind::Push.as_str());
                warn!(round, error = %e, "Push round failed");
                stats.failures.push(RoundFailure {
                    kind: RoundKind::Push,
                    round,
                    error: e.to_string(),
                });
            }
        }

        idle_pause(&settings, &mut shutdown_rx).await;
    }

    debug!(rounds = stats.rounds, "Push loop stopped");
    stats
}
