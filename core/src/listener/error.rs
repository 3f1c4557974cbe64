//! Errors surfaced by listener commands.
//!
//! None of these record an event. The listener's state only advances when a
//! command succeeds end to end, including the write to the event store.
//! Retries are the caller's business.

use super::events::ListenerStatus;
use crate::config::ConfigError;
use crate::network::ProviderError;
use crate::storage::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// Command invoked in the wrong status.
    #[error("{operation} rejected: {}", .status.conflict_reason())]
    StateConflict {
        operation: &'static str,
        status: ListenerStatus,
    },

    /// Target height is above the current head, or there is no head at all.
    #[error("target height {height} is above the current head ({head:?})")]
    InvalidTarget { height: u64, head: Option<u64> },

    /// A batch longer than the window would evict its own front while it is
    /// being appended.
    #[error("batch of {len} blocks exceeds the window capacity of {max_size}")]
    BatchTooLarge { len: usize, max_size: usize },

    /// The fork-point search ran out of retained blocks. `height` is where
    /// the search started and `earliest` the lowest height it compared. The
    /// local view is further behind than the window can see; resync out of
    /// band.
    #[error("no common ancestor between heights {earliest} and {height}; resync required")]
    UnresolvableDivergence { height: u64, earliest: u64 },

    #[error("network provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("event store error: {0}")]
    Store(#[from] StoreError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}

pub type ListenerResult<T> = Result<T, ListenerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_conflict_message_names_operation_and_reason() {
        let err = ListenerError::StateConflict {
            operation: "add_blocks",
            status: ListenerStatus::Reorganisation,
        };
        assert_eq!(
            err.to_string(),
            "add_blocks rejected: reorganisation in progress"
        );
    }

    #[test]
    fn unresolvable_divergence_names_the_searched_range() {
        let err = ListenerError::UnresolvableDivergence {
            height: 105,
            earliest: 100,
        };
        assert_eq!(
            err.to_string(),
            "no common ancestor between heights 100 and 105; resync required"
        );
    }

    #[test]
    fn provider_errors_convert() {
        let err: ListenerError = ProviderError::Timeout.into();
        assert!(matches!(err, ListenerError::Provider(ProviderError::Timeout)));
    }
}
