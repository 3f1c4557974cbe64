//! # Listener Events
//!
//! Events are the only thing that mutates a listener. Each one is recorded
//! inside a [`RecordedEvent`] envelope that carries the aggregate identity,
//! the request that caused it, the status to transition to, and a
//! per-aggregate sequence number.
//!
//! | Event                     | Status after      | Window effect                     |
//! |---------------------------|-------------------|-----------------------------------|
//! | `Initialized`             | awaiting          | none                              |
//! | `BlocksParsed`            | awaiting          | append blocks                     |
//! | `ReorganisationStarted`   | reorganisation    | none (discard set is informative) |
//! | `ReorganisationFinished`  | awaiting          | truncate to fork height           |
//! | `ReorganisationProcessed` | unchanged         | truncate to first block's height  |
//!
//! `ReorganisationProcessed` is never emitted by a live command. It exists
//! so stores written by older builds, which split very large reorganisations
//! into partial truncations, still replay.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chain::Block;

/// Listener status. There are exactly two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ListenerStatus {
    /// Following the remote chain; new blocks are accepted.
    #[default]
    Awaiting,
    /// A fork point has been found; waiting for the rollback to be processed.
    Reorganisation,
}

impl ListenerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListenerStatus::Awaiting => "awaiting",
            ListenerStatus::Reorganisation => "reorganisation",
        }
    }

    /// Why a command is refused while in this status.
    pub fn conflict_reason(&self) -> &'static str {
        match self {
            ListenerStatus::Awaiting => "reorganisation not in progress",
            ListenerStatus::Reorganisation => "reorganisation in progress",
        }
    }
}

impl fmt::Display for ListenerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListenerEvent {
    /// The listener was (re)started. `indexed_height` is the working height
    /// the caller should resume from.
    Initialized { indexed_height: u64 },

    /// A contiguous batch was accepted.
    BlocksParsed { blocks: Vec<Block> },

    /// The fork point is `height`; `blocks` are the local blocks above it,
    /// newest first, that the remote chain no longer agrees with.
    ReorganisationStarted { height: u64, blocks: Vec<Block> },

    /// The rollback to `height` is done. `blocks` are the replacement blocks
    /// supplied by the caller; they re-enter the window through a later
    /// `add_blocks`.
    ReorganisationFinished { height: u64, blocks: Vec<Block> },

    /// Partial truncation of a large reorganisation. Replay only.
    ReorganisationProcessed { height: u64, blocks: Vec<Block> },
}

impl ListenerEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            ListenerEvent::Initialized { .. } => "Initialized",
            ListenerEvent::BlocksParsed { .. } => "BlocksParsed",
            ListenerEvent::ReorganisationStarted { .. } => "ReorganisationStarted",
            ListenerEvent::ReorganisationFinished { .. } => "ReorganisationFinished",
            ListenerEvent::ReorganisationProcessed { .. } => "ReorganisationProcessed",
        }
    }

    pub fn blocks(&self) -> &[Block] {
        match self {
            ListenerEvent::Initialized { .. } => &[],
            ListenerEvent::BlocksParsed { blocks }
            | ListenerEvent::ReorganisationStarted { blocks, .. }
            | ListenerEvent::ReorganisationFinished { blocks, .. }
            | ListenerEvent::ReorganisationProcessed { blocks, .. } => blocks,
        }
    }
}

/// An event as it is persisted and replayed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub aggregate_id: String,
    pub request_id: String,
    /// 1-based, contiguous per aggregate.
    pub sequence: u64,
    /// Status the listener transitions to when this event is applied.
    pub status: ListenerStatus,
    pub recorded_at: DateTime<Utc>,
    pub event: ListenerEvent,
}
