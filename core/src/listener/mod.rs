//! The listener state machine and everything that drives it.

pub mod aggregate;
pub mod error;
pub mod events;
pub mod follower;
pub mod reorg;
pub mod service;
pub mod state;

pub use aggregate::Listener;
pub use error::{ListenerError, ListenerResult};
pub use events::{ListenerEvent, ListenerStatus, RecordedEvent};
pub use follower::{Follower, PollObserver, PollOutcome};
pub use reorg::{find_fork_point, ForkPoint};
pub use service::ListenerService;
pub use state::{reduce, ListenerState};
