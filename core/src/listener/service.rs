//! # Listener Service
//!
//! The sequential command processor for one listener identity. It owns the
//! aggregate, the repository and the network provider, and every command
//! takes `&mut self`: one writer per listener, enforced by the borrow
//! checker. Share a service across tasks by wrapping it in a
//! `tokio::sync::Mutex`, never by cloning it.
//!
//! Each command decides an event against the current state, commits it to
//! the store and only then applies it. A snapshot is written whenever the
//! listener's version lands on a multiple of `snapshot_interval`.

use tracing::{debug, warn};

use super::aggregate::Listener;
use super::error::ListenerResult;
use super::events::RecordedEvent;
use crate::chain::Block;
use crate::config::ListenerConfig;
use crate::network::{NetworkProvider, RemoteBlock};
use crate::storage::{EventStore, Repository};

pub struct ListenerService<S, P> {
    repository: Repository<S>,
    provider: P,
    listener: Listener,
    config: ListenerConfig,
}

impl<S, P> ListenerService<S, P>
where
    S: EventStore,
    P: NetworkProvider,
{
    /// Validates `config` and loads the listener it names from `store`.
    pub fn open(store: S, provider: P, config: ListenerConfig) -> ListenerResult<Self> {
        config.validate()?;
        let repository = Repository::new(store);
        let listener = repository.load(&config.aggregate_id, config.max_size)?;
        Ok(Self {
            repository,
            provider,
            listener,
            config,
        })
    }

    pub fn listener(&self) -> &Listener {
        &self.listener
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        self.repository.store()
    }

    pub fn init(&mut self, request_id: &str, indexed_height: u64) -> ListenerResult<RecordedEvent> {
        let event = self.listener.init(request_id, indexed_height)?;
        self.commit(event)
    }

    pub async fn add_blocks(
        &mut self,
        request_id: &str,
        blocks: &[RemoteBlock],
    ) -> ListenerResult<RecordedEvent> {
        let event = self
            .listener
            .add_blocks(request_id, blocks, &self.provider)
            .await?;
        self.commit(event)
    }

    pub async fn start_reorganisation(
        &mut self,
        request_id: &str,
        height: u64,
        accumulated: Vec<Block>,
    ) -> ListenerResult<RecordedEvent> {
        let event = self
            .listener
            .start_reorganisation(request_id, height, accumulated, &self.provider)
            .await?;
        self.commit(event)
    }

    pub fn process_reorganisation(
        &mut self,
        request_id: &str,
        height: u64,
        blocks: Vec<Block>,
    ) -> ListenerResult<RecordedEvent> {
        let event = self
            .listener
            .process_reorganisation(request_id, height, blocks)?;
        self.commit(event)
    }

    fn commit(&mut self, event: RecordedEvent) -> ListenerResult<RecordedEvent> {
        self.repository.commit(&mut self.listener, &event)?;
        debug!(
            aggregate_id = %event.aggregate_id,
            sequence = event.sequence,
            kind = event.event.kind(),
            status = %event.status,
            "event recorded"
        );

        if self.listener.version() % self.config.snapshot_interval == 0 {
            // The event is already durable; a missed snapshot only costs replay time.
            if let Err(e) = self.repository.save_snapshot(&self.listener) {
                warn!(error = %e, version = self.listener.version(), "snapshot failed");
            }
        }
        Ok(event)
    }
}
