//! Configuration for the load engine.
//!
//! The engine consumes, but does not own, its configuration: the surrounding
//! harness decides endpoints, replicator counts, and timing, and passes a
//! [`LoadConfig`] to [`Orchestrator::new()`](crate::Orchestrator::new).
//! Constructed programmatically or deserialized from YAML/JSON.
//!
//! # Configuration Structure
//!
//! ```text
//! LoadConfig
//! ├── endpoint: String              # Sync server endpoint
//! ├── mode: ReplicationMode         # one-shot | continuous
//! ├── replicators: usize            # Concurrent simulated clients
//! ├── ramp_up_interval_ms: u64      # Delay between session starts
//! └── session: SessionSettings
//!     ├── push_batch_size           # Proposed changes per push round
//!     ├── duration_secs             # Continuous-mode wall-clock bound
//!     ├── receive_timeout_secs      # Per-receive wait bound
//!     └── idle_pause_ms             # Pause between loop iterations
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! endpoint: "ws://sync-gateway:4984/db"
//! mode: continuous
//! replicators: 500
//! ramp_up_interval_ms: 20
//!
//! session:
//!   push_batch_size: 100
//!   duration_secs: 60
//!   receive_timeout_secs: 10
//!   idle_pause_ms: 100
//! ```

use crate::error::{LoadError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Replication mode for every session in a run.
///
/// Static configuration: a session never changes mode mid-run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationMode {
    /// Single bounded pass: one pull round, one checkpoint persist, done.
    #[serde(rename = "one-shot")]
    OneShot,
    /// Repeat pull and push loops for a bounded wall-clock duration.
    #[serde(rename = "continuous")]
    Continuous,
}

/// The top-level config object passed to `Orchestrator::new()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadConfig {
    /// Sync server endpoint every replicator connects to.
    pub endpoint: String,

    /// Replication mode applied to all sessions.
    pub mode: ReplicationMode,

    /// Number of concurrent replicators to drive.
    #[serde(default = "default_replicators")]
    pub replicators: usize,

    /// Delay between consecutive session starts (ramp-up schedule).
    /// Zero starts everything at once.
    #[serde(default)]
    pub ramp_up_interval_ms: u64,

    /// Per-session timing and batching parameters.
    #[serde(default)]
    pub session: SessionSettings,
}

fn default_replicators() -> usize {
    1
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            endpoint: "ws://localhost:4984/db".to_string(),
            mode: ReplicationMode::OneShot,
            replicators: 1,
            ramp_up_interval_ms: 0,
            session: SessionSettings::default(),
        }
    }
}

impl LoadConfig {
    /// Create a minimal config for testing.
    pub fn for_testing(mode: ReplicationMode) -> Self {
        Self {
            endpoint: "scripted://test".to_string(),
            mode,
            replicators: 1,
            ramp_up_interval_ms: 0,
            session: SessionSettings::default(),
        }
    }

    /// Reject configurations that cannot produce a meaningful run.
    pub fn validate(&self) -> Result<()> {
        if self.replicators == 0 {
            return Err(LoadError::Config("replicators must be > 0".to_string()));
        }
        if self.session.push_batch_size == 0 {
            return Err(LoadError::Config(
                "session.push_batch_size must be > 0".to_string(),
            ));
        }
        if self.mode == ReplicationMode::Continuous && self.session.duration_secs == 0 {
            return Err(LoadError::Config(
                "continuous mode requires session.duration_secs > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Ramp-up delay between session starts.
    pub fn ramp_up_interval(&self) -> Duration {
        Duration::from_millis(self.ramp_up_interval_ms)
    }
}

/// Per-session timing and batching parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Synthetic local changes proposed per push round.
    #[serde(default = "default_push_batch_size")]
    pub push_batch_size: usize,

    /// Continuous-mode wall-clock bound, in seconds.
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    /// Per-receive wait bound, in seconds.
    #[serde(default = "default_receive_timeout_secs")]
    pub receive_timeout_secs: u64,

    /// Cooperative pause after each loop iteration, in milliseconds.
    #[serde(default = "default_idle_pause_ms")]
    pub idle_pause_ms: u64,
}

fn default_push_batch_size() -> usize {
    100
}

fn default_duration_secs() -> u64 {
    60
}

fn default_receive_timeout_secs() -> u64 {
    10
}

fn default_idle_pause_ms() -> u64 {
    100
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            push_batch_size: 100,
            duration_secs: 60,
            receive_timeout_secs: 10,
            idle_pause_ms: 100,
        }
    }
}

impl SessionSettings {
    /// Continuous-mode duration bound.
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_secs)
    }

    /// Per-receive timeout.
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_secs(self.receive_timeout_secs)
    }

    /// Idle pause between loop iterations.
    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = SessionSettings::default();
        assert_eq!(settings.push_batch_size, 100);
        assert_eq!(settings.duration_secs, 60);
        assert_eq!(settings.receive_timeout_secs, 10);
        assert_eq!(settings.idle_pause_ms, 100);
    }

    #[test]
    fn test_validate_ok() {
        assert!(LoadConfig::for_testing(ReplicationMode::Continuous)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_validate_zero_replicators() {
        let mut config = LoadConfig::for_testing(ReplicationMode::OneShot);
        config.replicators = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_batch_size() {
        let mut config = LoadConfig::for_testing(ReplicationMode::OneShot);
        config.session.push_batch_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_continuous_needs_duration() {
        let mut config = LoadConfig::for_testing(ReplicationMode::Continuous);
        config.session.duration_secs = 0;
        assert!(config.validate().is_err());
        // One-shot ignores the duration bound.
        config.mode = ReplicationMode::OneShot;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_mode_serde_names() {
        let json = serde_json::to_string(&ReplicationMode::OneShot).unwrap();
        assert_eq!(json, "\"one-shot\"");
        let mode: ReplicationMode = serde_json::from_str("\"continuous\"").unwrap();
        assert_eq!(mode, ReplicationMode::Continuous);
    }

    #[test]
    fn test_config_round_trips_through_json() {
        let config = LoadConfig {
            replicators: 250,
            ramp_up_interval_ms: 20,
            ..LoadConfig::for_testing(ReplicationMode::Continuous)
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: LoadConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.replicators, 250);
        assert_eq!(parsed.mode, ReplicationMode::Continuous);
        assert_eq!(parsed.ramp_up_interval(), Duration::from_millis(20));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let parsed: LoadConfig =
            serde_json::from_str(r#"{"endpoint": "ws://s:4984/db", "mode": "continuous"}"#)
                .unwrap();
        assert_eq!(parsed.replicators, 1);
        assert_eq!(parsed.session.push_batch_size, 100);
        assert_eq!(parsed.session.idle_pause(), Duration::from_millis(100));
    }
}
