//! # Listener Aggregate
//!
//! The chain-tracking state machine. Commands inspect the current state,
//! check their guard, and *decide* an event; they never mutate anything.
//! The caller persists the event and hands it back through
//! [`Listener::apply`], which runs the reducer. Splitting decide from apply
//! means a command that fails halfway (a network error during the fork
//! search, a store write that doesn't land) leaves no trace.
//!
//! ## Commands
//!
//! | Command                  | Legal in       | Emits                                      |
//! |--------------------------|----------------|--------------------------------------------|
//! | `init`                   | any            | `Initialized`                              |
//! | `add_blocks`             | awaiting       | `BlocksParsed` or `ReorganisationStarted`  |
//! | `start_reorganisation`   | awaiting       | `ReorganisationStarted`                    |
//! | `process_reorganisation` | reorganisation | `ReorganisationFinished`                   |

use chrono::Utc;
use tracing::info;

use super::error::{ListenerError, ListenerResult};
use super::events::{ListenerEvent, ListenerStatus, RecordedEvent};
use super::reorg::find_fork_point;
use super::state::ListenerState;
use crate::chain::{Block, ChainWindow};
use crate::network::{NetworkProvider, RemoteBlock};
use crate::storage::Snapshot;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Listener {
    id: String,
    state: ListenerState,
    /// Sequence of the last applied event; 0 before the first.
    version: u64,
}

impl Listener {
    pub fn new(id: impl Into<String>, max_size: usize) -> Self {
        Self {
            id: id.into(),
            state: ListenerState::new(max_size),
            version: 0,
        }
    }

    pub fn from_snapshot(snapshot: Snapshot, max_size: usize) -> Self {
        Self {
            id: snapshot.aggregate_id,
            state: ListenerState {
                status: snapshot.status,
                chain: ChainWindow::from_flat(max_size, snapshot.chain),
            },
            version: snapshot.version,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            aggregate_id: self.id.clone(),
            version: self.version,
            status: self.state.status,
            chain: self.state.chain.to_flat(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ListenerStatus {
        self.state.status
    }

    pub fn chain(&self) -> &ChainWindow {
        &self.state.chain
    }

    pub fn state(&self) -> &ListenerState {
        &self.state
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Applies a recorded event. Events at or below the current version have
    /// already been folded in and are skipped, which keeps replay after a
    /// snapshot idempotent.
    pub fn apply(&mut self, recorded: &RecordedEvent) {
        if recorded.sequence <= self.version {
            return;
        }
        self.state.apply(recorded);
        self.version = recorded.sequence;
    }

    fn record(&self, request_id: &str, status: ListenerStatus, event: ListenerEvent) -> RecordedEvent {
        RecordedEvent {
            aggregate_id: self.id.clone(),
            request_id: request_id.to_string(),
            sequence: self.version + 1,
            status,
            recorded_at: Utc::now(),
            event,
        }
    }

    fn ensure_status(&self, operation: &'static str, expected: ListenerStatus) -> ListenerResult<()> {
        if self.state.status != expected {
            return Err(ListenerError::StateConflict {
                operation,
                status: self.state.status,
            });
        }
        Ok(())
    }

    // -- Commands -----------------------------------------------------------

    /// Always legal and always lands in `Awaiting`. A listener that crashed
    /// mid-reorganisation does not resume it; the divergence is found again
    /// on the next batch.
    ///
    /// The recorded height is the lower of the local head and
    /// `indexed_height`, so the caller never resumes past what the listener
    /// has actually seen.
    pub fn init(&self, request_id: &str, indexed_height: u64) -> ListenerResult<RecordedEvent> {
        let height = match self.state.chain.head_height() {
            Some(head) => head.min(indexed_height),
            None => indexed_height,
        };

        Ok(self.record(
            request_id,
            ListenerStatus::Awaiting,
            ListenerEvent::Initialized {
                indexed_height: height,
            },
        ))
    }

    /// Accepts a batch that continues the window. A batch that doesn't is
    /// not an error: it means the remote chain has moved under us, so the
    /// command turns into a fork-point search from the current head.
    ///
    /// Batches longer than the window's `max_size` are rejected with
    /// [`ListenerError::BatchTooLarge`].
    pub async fn add_blocks<P>(
        &self,
        request_id: &str,
        blocks: &[RemoteBlock],
        provider: &P,
    ) -> ListenerResult<RecordedEvent>
    where
        P: NetworkProvider + ?Sized,
    {
        self.ensure_status("add_blocks", ListenerStatus::Awaiting)?;

        let max_size = self.state.chain.max_size();
        if blocks.len() > max_size {
            return Err(ListenerError::BatchTooLarge {
                len: blocks.len(),
                max_size,
            });
        }

        let blocks: Vec<Block> = blocks.iter().map(Block::from).collect();

        if !self.state.chain.validate_contiguous(&blocks) {
            // validate_contiguous only fails against an existing head.
            let head = self.state.chain.head_height().unwrap_or_default();
            return self
                .start_reorganisation(request_id, head, Vec::new(), provider)
                .await;
        }

        Ok(self.record(
            request_id,
            ListenerStatus::Awaiting,
            ListenerEvent::BlocksParsed { blocks },
        ))
    }

    /// Searches downward from `height` for the last block both chains agree
    /// on and records it as the fork point. `accumulated` seeds the discard
    /// set; the search appends every local block it rejects.
    pub async fn start_reorganisation<P>(
        &self,
        request_id: &str,
        height: u64,
        accumulated: Vec<Block>,
        provider: &P,
    ) -> ListenerResult<RecordedEvent>
    where
        P: NetworkProvider + ?Sized,
    {
        self.ensure_status("start_reorganisation", ListenerStatus::Awaiting)?;

        let fork = find_fork_point(&self.state.chain, provider, height, accumulated).await?;

        info!(
            aggregate_id = %self.id,
            reorganisation_height = fork.height,
            blocks_length = fork.discarded.len(),
            tx_length = fork.discarded.iter().map(Block::tx_count).sum::<usize>(),
            "blockchain reorganisation starting"
        );

        Ok(self.record(
            request_id,
            ListenerStatus::Reorganisation,
            ListenerEvent::ReorganisationStarted {
                height: fork.height,
                blocks: fork.discarded,
            },
        ))
    }

    /// Completes a reorganisation at fork height `height`. `blocks` are the
    /// replacement blocks; the window is only truncated here; they come back
    /// in through `add_blocks`.
    pub fn process_reorganisation(
        &self,
        request_id: &str,
        height: u64,
        blocks: Vec<Block>,
    ) -> ListenerResult<RecordedEvent> {
        self.ensure_status("process_reorganisation", ListenerStatus::Reorganisation)?;

        let head = self.state.chain.head_height();
        if head.map_or(true, |head| height > head) {
            return Err(ListenerError::InvalidTarget { height, head });
        }

        info!(
            aggregate_id = %self.id,
            height,
            replacement_blocks = blocks.len(),
            "blockchain reorganised to height"
        );

        Ok(self.record(
            request_id,
            ListenerStatus::Awaiting,
            ListenerEvent::ReorganisationFinished { height, blocks },
        ))
    }
}
