//! # Chain Module
//!
//! The listener's local picture of the remote chain.
//!
//! ```text
//! block.rs  - Block value: height, hash, parent hash, transaction ids
//! window.rs - Bounded, height-keyed window of the most recent blocks
//! ```
//!
//! The window is keyed by height rather than linked by references, so a
//! window restored from a flat list of blocks is immediately usable. Ancestry
//! is implicit in `height` + `parent_hash`.

pub mod block;
pub mod window;

pub use block::Block;
pub use window::ChainWindow;
