//! # Reducer
//!
//! Applies one recorded event to the listener state. The live command path
//! and the replay path both go through [`ListenerState::apply`], so a state
//! rebuilt from history is the state the process had before it stopped.
//!
//! Reducers never fail, never log and never touch the network. Every arm is
//! safe to run twice: appends are keyed by height and truncation to an
//! already satisfied height is a no-op.

use super::events::{ListenerEvent, ListenerStatus, RecordedEvent};
use crate::chain::ChainWindow;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerState {
    pub status: ListenerStatus,
    pub chain: ChainWindow,
}

impl ListenerState {
    pub fn new(max_size: usize) -> Self {
        Self {
            status: ListenerStatus::Awaiting,
            chain: ChainWindow::new(max_size),
        }
    }

    pub fn apply(&mut self, recorded: &RecordedEvent) {
        match &recorded.event {
            ListenerEvent::Initialized { .. } => {
                self.status = recorded.status;
            }
            ListenerEvent::BlocksParsed { blocks } => {
                self.status = recorded.status;
                self.chain.append(blocks.iter().cloned());
            }
            ListenerEvent::ReorganisationStarted { .. } => {
                self.status = recorded.status;
            }
            ListenerEvent::ReorganisationFinished { height, .. } => {
                self.status = recorded.status;
                self.chain.truncate_to(*height);
            }
            ListenerEvent::ReorganisationProcessed { blocks, .. } => {
                if let Some(first) = blocks.first() {
                    self.chain.truncate_to(first.height);
                }
            }
        }
    }
}

/// Pure form of [`ListenerState::apply`].
pub fn reduce(mut state: ListenerState, recorded: &RecordedEvent) -> ListenerState {
    state.apply(recorded);
    state
}
