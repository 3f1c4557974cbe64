//! # Repository
//!
//! Loads listeners from an [`EventStore`] and commits new events to it.
//!
//! Loading restores the latest snapshot (if any) and replays the events
//! recorded after it through the same reducer the live path uses. Committing
//! appends first and applies second, so the in-memory listener never gets
//! ahead of what is on disk.

use tracing::debug;

use super::store::{EventStore, StoreResult};
use crate::listener::{Listener, RecordedEvent};

#[derive(Debug, Clone)]
pub struct Repository<S> {
    store: S,
}

impl<S: EventStore> Repository<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Rebuilds the listener `aggregate_id`. A listener that has never
    /// recorded anything comes back empty, at version 0.
    pub fn load(&self, aggregate_id: &str, max_size: usize) -> StoreResult<Listener> {
        let mut listener = match self.store.load_snapshot(aggregate_id)? {
            Some(snapshot) => Listener::from_snapshot(snapshot, max_size),
            None => Listener::new(aggregate_id, max_size),
        };
        let from_snapshot = listener.version();

        let events = self.store.load_events(aggregate_id, from_snapshot)?;
        for event in &events {
            listener.apply(event);
        }

        debug!(
            aggregate_id,
            snapshot_version = from_snapshot,
            replayed = events.len(),
            version = listener.version(),
            "listener loaded"
        );
        Ok(listener)
    }

    /// Persists `event`, then applies it.
    pub fn commit(&self, listener: &mut Listener, event: &RecordedEvent) -> StoreResult<()> {
        self.store.append(event)?;
        listener.apply(event);
        Ok(())
    }

    pub fn save_snapshot(&self, listener: &Listener) -> StoreResult<()> {
        self.store.save_snapshot(&listener.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Block;
    use crate::listener::{ListenerEvent, ListenerStatus};
    use crate::storage::{SledEventStore, StoreError};
    use chrono::Utc;

    fn parsed(listener: &Listener, range: std::ops::RangeInclusive<u64>) -> RecordedEvent {
        RecordedEvent {
            aggregate_id: listener.id().to_string(),
            request_id: "req".into(),
            sequence: listener.version() + 1,
            status: ListenerStatus::Awaiting,
            recorded_at: Utc::now(),
            event: ListenerEvent::BlocksParsed {
                blocks: range
                    .map(|h| Block::new(h, format!("h{h}"), format!("h{}", h - 1), vec![]))
                    .collect(),
            },
        }
    }

    #[test]
    fn load_of_unknown_aggregate_is_empty() {
        let repo = Repository::new(SledEventStore::open_temporary().unwrap());
        let listener = repo.load("listener", 10).unwrap();
        assert_eq!(listener.version(), 0);
        assert!(listener.chain().is_empty());
    }

    #[test]
    fn replay_reproduces_live_state() {
        let repo = Repository::new(SledEventStore::open_temporary().unwrap());
        let mut live = Listener::new("listener", 10);

        for range in [1..=3, 4..=6, 7..=12] {
            let event = parsed(&live, range);
            repo.commit(&mut live, &event).unwrap();
        }

        let replayed = repo.load("listener", 10).unwrap();
        assert_eq!(replayed, live);
        assert_eq!(replayed.chain().len(), 10);
        assert_eq!(replayed.chain().tail_height(), Some(3));
    }

    #[test]
    fn snapshot_plus_suffix_matches_full_replay() {
        let store = SledEventStore::open_temporary().unwrap();
        let repo = Repository::new(store.clone());
        let mut live = Listener::new("listener", 10);

        let first = parsed(&live, 1..=4);
        repo.commit(&mut live, &first).unwrap();
        repo.save_snapshot(&live).unwrap();
        let second = parsed(&live, 5..=7);
        repo.commit(&mut live, &second).unwrap();

        let loaded = repo.load("listener", 10).unwrap();
        assert_eq!(loaded, live);
        assert_eq!(store.load_snapshot("listener").unwrap().unwrap().version, 1);
    }

    #[test]
    fn failed_append_leaves_listener_untouched() {
        let repo = Repository::new(SledEventStore::open_temporary().unwrap());
        let mut live = Listener::new("listener", 10);
        let mut event = parsed(&live, 1..=2);
        event.sequence = 5;

        let err = repo.commit(&mut live, &event).unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { .. }));
        assert_eq!(live.version(), 0);
        assert!(live.chain().is_empty());
    }
}
