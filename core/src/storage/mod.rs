//! # Storage Module
//!
//! The event-sourcing substrate the listener sits on.
//!
//! ```text
//! store.rs      - EventStore trait, sled implementation, snapshots
//! repository.rs - load (snapshot + replay) and commit (append + apply)
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! command ──► RecordedEvent ──► EventStore::append ──► Listener::apply
//!                                      │
//! restart ──► load_snapshot ──► load_events(after) ──► Listener::apply ...
//! ```
//!
//! Events are written before they are applied, so a crash between the two
//! only means the next load replays the event. Bincode for everything on
//! disk; it's compact and deterministic.

pub mod repository;
pub mod store;

pub use repository::Repository;
pub use store::{EventStore, SledEventStore, Snapshot, StoreError, StoreResult};
