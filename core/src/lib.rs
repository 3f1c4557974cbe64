// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # chainwatch Core Library
//!
//! Keeps a bounded local view of a remote, append-only block chain and
//! notices when the remote chain rewrites history underneath it.
//!
//! The listener is an event-sourced aggregate: every state change is a
//! recorded event, and the same reducer that applies events during live
//! operation rebuilds the state on restart. Nothing in here validates
//! proof-of-work or consensus rules. We only check that heights line up and
//! parent hashes link, and when they don't, we walk backwards until the
//! local and remote chains agree again.
//!
//! ## Architecture
//!
//! - **chain**: `Block` values and the height-keyed, bounded `ChainWindow`.
//! - **listener**: the state machine: commands, events, reducer, the
//!   backward fork-point search, the command processor and the follower loop.
//! - **network**: the `NetworkProvider` seam plus an in-memory provider.
//! - **storage**: the sled-backed event store and the replay repository.
//! - **config**: defaults and the validated `ListenerConfig`.

pub mod chain;
pub mod config;
pub mod listener;
pub mod network;
pub mod storage;

pub use chain::{Block, ChainWindow};
pub use config::{ConfigError, ListenerConfig};
pub use listener::{
    Follower, Listener, ListenerError, ListenerEvent, ListenerService, ListenerState,
    ListenerStatus, PollObserver, PollOutcome, RecordedEvent,
};
pub use network::{InMemoryProvider, NetworkProvider, ProviderError, RemoteBlock, RemoteTransaction};
pub use storage::{EventStore, Repository, SledEventStore, Snapshot, StoreError};
