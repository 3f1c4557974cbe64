//! # Event Store
//!
//! Persistent, append-only event log plus the latest snapshot per
//! aggregate, built on sled.
//!
//! ## Tree Layout
//!
//! | Tree        | Key                                     | Value                  |
//! |-------------|-----------------------------------------|------------------------|
//! | `events`    | `aggregate_id` ‖ `0x00` ‖ `seq` (8B BE) | `bincode(RecordedEvent)` |
//! | `snapshots` | `aggregate_id` (UTF-8)                  | `bincode(Snapshot)`    |
//!
//! Sequences are big-endian so sled's lexicographic order is numeric order
//! and a prefix range scan returns an aggregate's events in sequence.
//!
//! ## Sequence Guard
//!
//! `append` only accepts `last_sequence + 1`, and the insert itself is a
//! compare-and-swap against an absent key. Two writers racing on the same
//! aggregate can't both land the same sequence.

use std::path::Path;

use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use crate::chain::Block;
use crate::listener::{ListenerStatus, RecordedEvent};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("aggregate id {0:?} contains a NUL byte")]
    InvalidAggregateId(String),

    #[error("sequence conflict for {aggregate_id}: expected {expected}, got {got}")]
    SequenceConflict {
        aggregate_id: String,
        expected: u64,
        got: u64,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Listener state frozen at `version`. The chain is stored flat, in
/// ascending height order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub aggregate_id: String,
    pub version: u64,
    pub status: ListenerStatus,
    pub chain: Vec<Block>,
}

// ---------------------------------------------------------------------------
// EventStore
// ---------------------------------------------------------------------------

pub trait EventStore: Send + Sync {
    /// Appends one event. Fails with `SequenceConflict` unless
    /// `event.sequence` is exactly one past the last stored sequence.
    fn append(&self, event: &RecordedEvent) -> StoreResult<()>;

    /// Events with `sequence > after`, in order.
    fn load_events(&self, aggregate_id: &str, after: u64) -> StoreResult<Vec<RecordedEvent>>;

    /// Highest stored sequence, 0 if none.
    fn last_sequence(&self, aggregate_id: &str) -> StoreResult<u64>;

    fn save_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()>;

    fn load_snapshot(&self, aggregate_id: &str) -> StoreResult<Option<Snapshot>>;
}

// ---------------------------------------------------------------------------
// SledEventStore
// ---------------------------------------------------------------------------

/// sled-backed [`EventStore`]. Cheap to clone; clones share the database.
#[derive(Debug, Clone)]
pub struct SledEventStore {
    db: Db,
    events: Tree,
    snapshots: Tree,
}

impl SledEventStore {
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// In-memory database removed on drop. For tests.
    pub fn open_temporary() -> StoreResult<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let events = db.open_tree("events")?;
        let snapshots = db.open_tree("snapshots")?;
        Ok(Self {
            db,
            events,
            snapshots,
        })
    }

    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }

    /// Total number of stored events across all aggregates.
    pub fn event_count(&self) -> usize {
        self.events.len()
    }

    fn prefix(aggregate_id: &str) -> StoreResult<Vec<u8>> {
        if aggregate_id.as_bytes().contains(&0x00) {
            return Err(StoreError::InvalidAggregateId(aggregate_id.to_string()));
        }
        let mut key = Vec::with_capacity(aggregate_id.len() + 1);
        key.extend_from_slice(aggregate_id.as_bytes());
        key.push(0x00);
        Ok(key)
    }

    fn event_key(aggregate_id: &str, sequence: u64) -> StoreResult<Vec<u8>> {
        let mut key = Self::prefix(aggregate_id)?;
        key.extend_from_slice(&sequence.to_be_bytes());
        Ok(key)
    }

    fn decode_sequence(key: &[u8]) -> StoreResult<u64> {
        let tail = key
            .len()
            .checked_sub(8)
            .map(|start| &key[start..])
            .ok_or_else(|| StoreError::Serialization("event key too short".to_string()))?;
        let bytes: [u8; 8] = tail
            .try_into()
            .map_err(|_| StoreError::Serialization("invalid sequence bytes".to_string()))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

impl EventStore for SledEventStore {
    fn append(&self, event: &RecordedEvent) -> StoreResult<()> {
        let last = self.last_sequence(&event.aggregate_id)?;
        let conflict = || StoreError::SequenceConflict {
            aggregate_id: event.aggregate_id.clone(),
            expected: last + 1,
            got: event.sequence,
        };
        if event.sequence != last + 1 {
            return Err(conflict());
        }

        let bytes =
            bincode::serialize(event).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let key = Self::event_key(&event.aggregate_id, event.sequence)?;
        self.events
            .compare_and_swap(key, None as Option<&[u8]>, Some(bytes))?
            .map_err(|_| conflict())?;

        self.db.flush()?;
        Ok(())
    }

    fn load_events(&self, aggregate_id: &str, after: u64) -> StoreResult<Vec<RecordedEvent>> {
        let Some(first) = after.checked_add(1) else {
            return Ok(Vec::new());
        };
        let start = Self::event_key(aggregate_id, first)?;
        let end = Self::event_key(aggregate_id, u64::MAX)?;

        let mut events = Vec::new();
        for entry in self.events.range(start..=end) {
            let (_key, value) = entry?;
            let event: RecordedEvent = bincode::deserialize(&value)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;
            events.push(event);
        }
        Ok(events)
    }

    fn last_sequence(&self, aggregate_id: &str) -> StoreResult<u64> {
        match self.events.scan_prefix(Self::prefix(aggregate_id)?).next_back() {
            Some(entry) => {
                let (key, _value) = entry?;
                Self::decode_sequence(&key)
            }
            None => Ok(0),
        }
    }

    fn save_snapshot(&self, snapshot: &Snapshot) -> StoreResult<()> {
        let bytes =
            bincode::serialize(snapshot).map_err(|e| StoreError::Serialization(e.to_string()))?;
        self.snapshots
            .insert(snapshot.aggregate_id.as_bytes(), bytes)?;
        self.db.flush()?;
        Ok(())
    }

    fn load_snapshot(&self, aggregate_id: &str) -> StoreResult<Option<Snapshot>> {
        match self.snapshots.get(aggregate_id.as_bytes())? {
            Some(bytes) => {
                let snapshot: Snapshot = bincode::deserialize(&bytes)
                    .map_err(|e| StoreError::Serialization(e.to_string()))?;
                Ok(Some(snapshot))
            }
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::ListenerEvent;
    use chrono::Utc;

    fn event(aggregate_id: &str, sequence: u64) -> RecordedEvent {
        RecordedEvent {
            aggregate_id: aggregate_id.to_string(),
            request_id: format!("req-{sequence}"),
            sequence,
            status: ListenerStatus::Awaiting,
            recorded_at: Utc::now(),
            event: ListenerEvent::Initialized {
                indexed_height: sequence,
            },
        }
    }

    #[test]
    fn open_temporary_store_is_empty() {
        let store = SledEventStore::open_temporary().expect("temp store");
        assert_eq!(store.event_count(), 0);
        assert_eq!(store.last_sequence("listener").unwrap(), 0);
        assert!(store.load_snapshot("listener").unwrap().is_none());
    }

    #[test]
    fn append_and_load_in_sequence_order() {
        let store = SledEventStore::open_temporary().unwrap();
        for seq in 1..=5 {
            store.append(&event("listener", seq)).unwrap();
        }

        let all = store.load_events("listener", 0).unwrap();
        let sequences: Vec<u64> = all.iter().map(|e| e.sequence).collect();
        assert_eq!(sequences, vec![1, 2, 3, 4, 5]);

        let suffix = store.load_events("listener", 3).unwrap();
        assert_eq!(suffix.len(), 2);
        assert_eq!(suffix[0].sequence, 4);
        assert_eq!(store.last_sequence("listener").unwrap(), 5);
    }

    #[test]
    fn sequences_order_numerically_past_255() {
        let store = SledEventStore::open_temporary().unwrap();
        for seq in 1..=300 {
            store.append(&event("listener", seq)).unwrap();
        }
        let loaded = store.load_events("listener", 250).unwrap();
        assert_eq!(loaded.first().map(|e| e.sequence), Some(251));
        assert_eq!(loaded.last().map(|e| e.sequence), Some(300));
    }

    #[test]
    fn out_of_order_append_is_rejected() {
        let store = SledEventStore::open_temporary().unwrap();
        store.append(&event("listener", 1)).unwrap();

        let err = store.append(&event("listener", 3)).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SequenceConflict {
                expected: 2,
                got: 3,
                ..
            }
        ));

        let err = store.append(&event("listener", 1)).unwrap_err();
        assert!(matches!(err, StoreError::SequenceConflict { .. }));
        assert_eq!(store.event_count(), 1);
    }

    #[test]
    fn aggregates_do_not_share_sequences() {
        let store = SledEventStore::open_temporary().unwrap();
        store.append(&event("listener", 1)).unwrap();
        store.append(&event("listener", 2)).unwrap();
        store.append(&event("listener-b", 1)).unwrap();

        assert_eq!(store.last_sequence("listener").unwrap(), 2);
        assert_eq!(store.last_sequence("listener-b").unwrap(), 1);
        assert_eq!(store.load_events("listener-b", 0).unwrap().len(), 1);
    }

    #[test]
    fn nul_in_aggregate_id_cannot_reach_another_prefix() {
        let store = SledEventStore::open_temporary().unwrap();
        store.append(&event("a", 1)).unwrap();

        let err = store.append(&event("a\0", 1)).unwrap_err();
        assert!(matches!(err, StoreError::InvalidAggregateId(_)));
        assert!(matches!(
            store.last_sequence("a\0"),
            Err(StoreError::InvalidAggregateId(_))
        ));
        assert!(matches!(
            store.load_events("a\0", 0),
            Err(StoreError::InvalidAggregateId(_))
        ));
        assert_eq!(store.event_count(), 1);
        assert_eq!(store.last_sequence("a").unwrap(), 1);
    }

    #[test]
    fn snapshot_overwrites_previous() {
        let store = SledEventStore::open_temporary().unwrap();
        let mut snapshot = Snapshot {
            aggregate_id: "listener".into(),
            version: 4,
            status: ListenerStatus::Awaiting,
            chain: vec![Block::new(1, "h1", "h0", vec![])],
        };
        store.save_snapshot(&snapshot).unwrap();

        snapshot.version = 9;
        snapshot.status = ListenerStatus::Reorganisation;
        store.save_snapshot(&snapshot).unwrap();

        let loaded = store.load_snapshot("listener").unwrap().unwrap();
        assert_eq!(loaded, snapshot);
    }

    #[test]
    fn events_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        {
            let store = SledEventStore::open(dir.path()).unwrap();
            store.append(&event("listener", 1)).unwrap();
            store.append(&event("listener", 2)).unwrap();
        }

        let store = SledEventStore::open(dir.path()).unwrap();
        assert_eq!(store.last_sequence("listener").unwrap(), 2);
        assert_eq!(store.load_events("listener", 0).unwrap().len(), 2);
    }
}
