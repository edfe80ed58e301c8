//! # syncload
//!
//! A load-simulation engine for checkpoint-based sync servers. Drives many
//! independent simulated clients ("replicators") against one server, each
//! performing pull and push replication over its own persistent,
//! message-oriented channel, with per-replicator checkpoint progress.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                           syncload                                │
//! │                                                                   │
//! │  ┌──────────────┐   spawns    ┌───────────────────────────────┐   │
//! │  │ Orchestrator │────────────►│ ReplicatorSession (× N)       │   │
//! │  │ (ramp-up)    │             │                               │   │
//! │  └──────┬───────┘             │  CheckpointStore  (bootstrap) │   │
//! │         │                     │  PullEngine ──┐               │   │
//! │  ┌──────▼────────┐            │  PushEngine ──┤ rounds        │   │
//! │  │ ChannelFactory│            │  Checkpoint ◄─┘ persist       │   │
//! │  └──────┬────────┘            └───────────────┬───────────────┘   │
//! │         │ opens                               │                   │
//! │  ┌──────▼────────────────────────────────────▼────────────────┐   │
//! │  │ MessageChannel (one per replicator, correlated req/resp)   │   │
//! │  └────────────────────────────────────────────────────────────┘   │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modes
//!
//! - **One-shot**: a single pull round, one checkpoint persist, done.
//! - **Continuous**: pull and push loops run as two concurrent activities of
//!   the same session for a bounded wall-clock duration, each owning one
//!   half of the checkpoint's progress.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use syncload::{LoadConfig, Orchestrator, ReplicationMode};
//! use std::sync::Arc;
//!
//! # async fn example<F: syncload::ChannelFactory>(factory: Arc<F>) -> syncload::Result<()> {
//! let config = LoadConfig {
//!     replicators: 500,
//!     ..LoadConfig::for_testing(ReplicationMode::Continuous)
//! };
//!
//! let orchestrator = Orchestrator::new(config, factory)?;
//! let summary = orchestrator.run().await;
//! assert!(summary.is_success());
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod pull;
pub mod push;
pub mod session;

// Re-exports for convenience
pub use channel::{Body, MessageChannel, RequestId, Response, ScriptedChannel};
pub use checkpoint::{Checkpoint, CheckpointStore};
pub use config::{LoadConfig, ReplicationMode, SessionSettings};
pub use error::{LoadError, Result};
pub use orchestrator::{ChannelFactory, LoadSummary, Orchestrator};
pub use pull::{Change, PullEngine, PullOutcome};
pub use push::{ProposedChange, PushEngine, PushOutcome};
pub use session::{ReplicatorSession, RoundFailure, RoundKind, SessionReport};
