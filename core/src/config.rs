//! # Listener Configuration & Constants
//!
//! Defaults for the listener and the validated [`ListenerConfig`] the node
//! builds from its command line.
//!
//! The one relationship that matters: the window has to be at least as
//! large as the biggest batch the follower ever feeds it. Otherwise a batch
//! starts evicting its own front before the back has been linked, and the
//! fork-point search loses the depth it was promised.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

/// Identity of the listener aggregate. One listener per process role.
pub const DEFAULT_AGGREGATE_ID: &str = "listener";

/// Blocks retained in the chain window. Also the deepest reorganisation
/// that can be resolved without an external resync.
pub const DEFAULT_MAX_SIZE: usize = 3_000;

/// Blocks fetched per `add_blocks` call.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Events between snapshots.
pub const DEFAULT_SNAPSHOT_INTERVAL: u64 = 50;

/// Delay between follower polls when the local view is caught up.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1_000;

// ---------------------------------------------------------------------------
// ListenerConfig
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("aggregate id must not be empty")]
    EmptyAggregateId,

    #[error("aggregate id must not contain a NUL byte")]
    NulInAggregateId,

    #[error("max_size must be greater than zero")]
    ZeroMaxSize,

    #[error("batch_size must be greater than zero")]
    ZeroBatchSize,

    #[error("batch_size ({batch_size}) exceeds max_size ({max_size})")]
    BatchLargerThanWindow { batch_size: usize, max_size: usize },

    #[error("snapshot_interval must be greater than zero")]
    ZeroSnapshotInterval,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerConfig {
    /// Key under which the listener's events and snapshots are stored.
    pub aggregate_id: String,
    /// Chain window capacity.
    pub max_size: usize,
    /// Largest batch handed to a single `add_blocks`.
    pub batch_size: usize,
    /// Persist a snapshot every this many events.
    pub snapshot_interval: u64,
    /// Follower poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Indexed height reported at `init` and the first height fetched when
    /// the window is empty.
    pub start_height: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            aggregate_id: DEFAULT_AGGREGATE_ID.to_string(),
            max_size: DEFAULT_MAX_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            snapshot_interval: DEFAULT_SNAPSHOT_INTERVAL,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            start_height: 0,
        }
    }
}

impl ListenerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregate_id.is_empty() {
            return Err(ConfigError::EmptyAggregateId);
        }
        // NUL terminates the aggregate part of an event key.
        if self.aggregate_id.contains('\0') {
            return Err(ConfigError::NulInAggregateId);
        }
        if self.max_size == 0 {
            return Err(ConfigError::ZeroMaxSize);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.batch_size > self.max_size {
            return Err(ConfigError::BatchLargerThanWindow {
                batch_size: self.batch_size,
                max_size: self.max_size,
            });
        }
        if self.snapshot_interval == 0 {
            return Err(ConfigError::ZeroSnapshotInterval);
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(ListenerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn batch_must_fit_in_window() {
        let config = ListenerConfig {
            max_size: 10,
            batch_size: 11,
            ..ListenerConfig::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::BatchLargerThanWindow {
                batch_size: 11,
                max_size: 10
            })
        );
    }

    #[test]
    fn zero_values_are_rejected() {
        let base = ListenerConfig::default();
        assert_eq!(
            ListenerConfig { max_size: 0, ..base.clone() }.validate(),
            Err(ConfigError::ZeroMaxSize)
        );
        assert_eq!(
            ListenerConfig { batch_size: 0, ..base.clone() }.validate(),
            Err(ConfigError::ZeroBatchSize)
        );
        assert_eq!(
            ListenerConfig { snapshot_interval: 0, ..base.clone() }.validate(),
            Err(ConfigError::ZeroSnapshotInterval)
        );
        assert_eq!(
            ListenerConfig { aggregate_id: String::new(), ..base }.validate(),
            Err(ConfigError::EmptyAggregateId)
        );
    }

    #[test]
    fn aggregate_id_with_nul_is_rejected() {
        let config = ListenerConfig {
            aggregate_id: "listener\0a".to_string(),
            ..ListenerConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::NulInAggregateId));
    }

    #[test]
    fn poll_interval_converts_millis() {
        let config = ListenerConfig {
            poll_interval_ms: 250,
            ..ListenerConfig::default()
        };
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
    }
}
