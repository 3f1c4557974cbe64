//! # Network Module
//!
//! The listener's only window onto the authoritative chain. The core never
//! opens sockets itself; it talks to whatever implements
//! [`NetworkProvider`]. The node binary plugs in a JSON-RPC client, tests and
//! demos use [`InMemoryProvider`].

pub mod memory;
pub mod provider;

pub use memory::InMemoryProvider;
pub use provider::{NetworkProvider, ProviderError, RemoteBlock, RemoteTransaction};
