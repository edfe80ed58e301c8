// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the load engine.
//!
//! Errors are classified by how far they reach: some end the whole session,
//! some only abort the current pull/push round, and a continuous-mode receive
//! timeout is not a failure at all.
//!
//! # Error Reach
//!
//! | Error Type | Reach | Description |
//! |------------|-------|-------------|
//! | `Channel` | Session | Connection unusable; session closes and reports failure |
//! | `Timeout` | None | Continuous receive expired; idle round, loop continues |
//! | `MalformedResponse` | Round | Required response field missing; round aborted |
//! | `Config` | Startup | Configuration invalid; nothing runs |
//! | `Shutdown` | Session | Stop signal observed; clean exit |
//! | `Internal` | Session | Unexpected internal error (bug) |
//!
//! Use [`LoadError::is_session_fatal()`] to decide whether a continuous loop
//! should keep going after a failed round, and [`LoadError::is_idle_timeout()`]
//! to recognize the no-changes-this-round case.

use thiserror::Error;

/// Result type alias for load engine operations.
pub type Result<T> = std::result::Result<T, LoadError>;

/// Errors that can occur while driving a replicator.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The message channel is unusable (send failed, connection dropped).
    ///
    /// Fatal to the session: the connection is closed and the session
    /// terminates reporting failure. No retry; the orchestrator's other
    /// replicators are unaffected.
    #[error("channel error ({operation}): {message}")]
    Channel { operation: String, message: String },

    /// A receive wait expired.
    ///
    /// In continuous mode this is a legitimate idle outcome (no new changes
    /// arrived within the window), not a failure. The round ends and the
    /// loop continues.
    #[error("receive timed out after {waited_ms}ms")]
    Timeout { waited_ms: u64 },

    /// A response arrived but a required field was missing or had the wrong
    /// shape (e.g. no `lastSequence` in a changes batch, no `needed` in a
    /// propose response).
    ///
    /// Fatal to the current round only: the round is reported and aborted,
    /// the continuous loop carries on, a one-shot session ends.
    #[error("malformed {method} response: {detail}")]
    MalformedResponse { method: String, detail: String },

    /// Invalid or missing configuration.
    ///
    /// Caught before any session starts. Fix the config and rerun.
    #[error("configuration error: {0}")]
    Config(String),

    /// Stop signal observed (duration elapsed or external shutdown).
    ///
    /// Not a failure; used to unwind a round cleanly at a suspension point.
    #[error("shutdown in progress")]
    Shutdown,

    /// Unexpected internal error.
    ///
    /// Catch-all for states that shouldn't be reachable.
    #[error("internal error: {0}")]
    Internal(String),
}

impl LoadError {
    /// Create a channel error with an operation label for attribution.
    pub fn channel(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Channel {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a malformed-response error for a protocol method.
    pub fn malformed(method: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::MalformedResponse {
            method: method.into(),
            detail: detail.into(),
        }
    }

    /// Whether this error ends the whole session (vs. just the round).
    pub fn is_session_fatal(&self) -> bool {
        match self {
            Self::Channel { .. } => true,
            Self::Shutdown => true,
            Self::Internal(_) => true,
            Self::Config(_) => true,
            Self::Timeout { .. } => false,
            Self::MalformedResponse { .. } => false,
        }
    }

    /// Whether this is a continuous-mode idle timeout (no changes this round).
    pub fn is_idle_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
