//! # Follower Loop
//!
//! Drives a [`ListenerService`] against its provider: fetch the next batch,
//! hand it to `add_blocks`, and when that turns into a reorganisation,
//! fetch the remote replacements and close the reorganisation out.
//!
//! ## How it works
//!
//! Each poll:
//!
//! 1. If the listener is stuck in `Reorganisation` (a previous poll failed
//!    between start and finish), re-run `init`. This is the same recovery
//!    the process applies on restart: start clean, re-detect the fork.
//! 2. Compare the local head with the remote best height. Nothing new means
//!    `Idle`.
//! 3. Fetch up to `batch_size` blocks one by one and submit them.
//! 4. On `ReorganisationStarted`, fetch the remote blocks from fork + 1 up
//!    to the old local head and record `ReorganisationFinished`. The window
//!    is truncated to the fork; the next poll re-ingests from there.
//!
//! ## Shutdown
//!
//! `run` watches a `tokio::sync::watch` channel and exits between polls when
//! it flips to `true` or the sender is dropped.

use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregate::Listener;
use super::error::{ListenerError, ListenerResult};
use super::events::{ListenerEvent, ListenerStatus};
use super::service::ListenerService;
use crate::chain::Block;
use crate::network::NetworkProvider;
use crate::storage::EventStore;

/// What a single poll did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The local head is level with the remote.
    Idle,
    /// A batch was accepted.
    Advanced { head: u64, blocks: usize },
    /// A reorganisation was detected and resolved at `fork`.
    Reorganised { fork: u64, discarded: usize },
    /// The listener was found mid-reorganisation and re-initialised.
    Reset,
}

/// Called after every successful poll in [`Follower::run`], with the
/// listener state the poll left behind.
pub type PollObserver = Box<dyn Fn(&PollOutcome, &Listener) + Send + Sync>;

pub struct Follower<S, P> {
    service: ListenerService<S, P>,
    observer: Option<PollObserver>,
}

impl<S, P> Follower<S, P>
where
    S: EventStore,
    P: NetworkProvider,
{
    pub fn new(service: ListenerService<S, P>) -> Self {
        Self {
            service,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: PollObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn service(&self) -> &ListenerService<S, P> {
        &self.service
    }

    pub fn into_inner(self) -> ListenerService<S, P> {
        self.service
    }

    /// Records `Initialized` with the configured start height.
    pub fn start(&mut self) -> ListenerResult<u64> {
        let start_height = self.service.config().start_height;
        let event = self.service.init(&request_id(), start_height)?;
        let indexed_height = match event.event {
            ListenerEvent::Initialized { indexed_height } => indexed_height,
            _ => start_height,
        };
        info!(
            aggregate_id = %event.aggregate_id,
            indexed_height,
            head = ?self.service.listener().chain().head_height(),
            "listener initialized"
        );
        Ok(indexed_height)
    }

    pub async fn poll_once(&mut self) -> ListenerResult<PollOutcome> {
        if self.service.listener().status() == ListenerStatus::Reorganisation {
            warn!("listener found mid-reorganisation, re-initialising");
            self.start()?;
            return Ok(PollOutcome::Reset);
        }

        let next = match self.service.listener().chain().head_height() {
            Some(head) => match head.checked_add(1) {
                Some(next) => next,
                None => return Ok(PollOutcome::Idle),
            },
            None => self.service.config().start_height,
        };
        let best = self.service.provider().best_height().await?;
        if best < next {
            return Ok(PollOutcome::Idle);
        }

        let batch_size = self.service.config().batch_size as u64;
        let last = best.min(next.saturating_add(batch_size - 1));
        let mut batch = Vec::with_capacity((last - next + 1) as usize);
        for height in next..=last {
            batch.push(self.service.provider().get_block_at_height(height).await?);
        }

        let event = self.service.add_blocks(&request_id(), &batch).await?;
        match event.event {
            ListenerEvent::BlocksParsed { blocks } => {
                let head = self
                    .service
                    .listener()
                    .chain()
                    .head_height()
                    .unwrap_or(last);
                debug!(head, blocks = blocks.len(), "batch accepted");
                Ok(PollOutcome::Advanced {
                    head,
                    blocks: blocks.len(),
                })
            }
            ListenerEvent::ReorganisationStarted { height, blocks } => {
                let replacements = self.fetch_replacements(height).await?;
                self.service
                    .process_reorganisation(&request_id(), height, replacements)?;
                Ok(PollOutcome::Reorganised {
                    fork: height,
                    discarded: blocks.len(),
                })
            }
            _ => Ok(PollOutcome::Idle),
        }
    }

    /// Remote blocks from `fork + 1` up to the local head, as far as the
    /// remote chain reaches.
    async fn fetch_replacements(&self, fork: u64) -> ListenerResult<Vec<Block>> {
        let Some(head) = self.service.listener().chain().head_height() else {
            return Ok(Vec::new());
        };
        let best = self.service.provider().best_height().await?;
        let mut blocks = Vec::new();
        for height in (fork + 1)..=head.min(best) {
            let remote = self.service.provider().get_block_at_height(height).await?;
            blocks.push(Block::from(remote));
        }
        Ok(blocks)
    }

    /// Initializes the listener and polls until shutdown.
    ///
    /// Provider errors are logged and retried on the next tick. Anything
    /// else (an unresolvable divergence, a store failure) stops the loop.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> ListenerResult<()> {
        self.start()?;
        let poll_interval = self.service.config().poll_interval();
        info!(?poll_interval, "follower starting");

        loop {
            if *shutdown.borrow() {
                info!("follower received shutdown signal, exiting cleanly");
                return Ok(());
            }

            let delay = match self.poll_once().await {
                Ok(outcome) => {
                    if let Some(observer) = &self.observer {
                        observer(&outcome, self.service.listener());
                    }
                    match outcome {
                        PollOutcome::Idle => poll_interval,
                        PollOutcome::Advanced { head, blocks } => {
                            info!(head, blocks, "chain advanced");
                            Duration::ZERO
                        }
                        PollOutcome::Reorganised { fork, discarded } => {
                            info!(fork, discarded, "reorganisation resolved");
                            Duration::ZERO
                        }
                        PollOutcome::Reset => Duration::ZERO,
                    }
                }
                Err(ListenerError::Provider(e)) => {
                    warn!(error = %e, "poll failed, retrying");
                    poll_interval
                }
                Err(e) => return Err(e),
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => {
                    info!("follower shutting down during sleep");
                    return Ok(());
                }
            }
        }
    }
}

fn request_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;
    use crate::network::{InMemoryProvider, RemoteBlock};
    use crate::storage::SledEventStore;

    fn remote(height: u64, tag: &str, parent_tag: &str) -> RemoteBlock {
        RemoteBlock {
            height,
            hash: format!("{tag}{height}"),
            parent_hash: height.checked_sub(1).map(|p| format!("{parent_tag}{p}")),
            transactions: vec![],
        }
    }

    fn follower(provider: InMemoryProvider) -> Follower<SledEventStore, InMemoryProvider> {
        let config = ListenerConfig {
            max_size: 50,
            batch_size: 4,
            poll_interval_ms: 10,
            ..ListenerConfig::default()
        };
        let store = SledEventStore::open_temporary().unwrap();
        Follower::new(ListenerService::open(store, provider, config).unwrap())
    }

    #[tokio::test]
    async fn catches_up_in_batches_then_idles() {
        let provider = InMemoryProvider::from_blocks((0..=9).map(|h| remote(h, "a", "a")));
        let mut follower = follower(provider);
        follower.start().unwrap();

        assert_eq!(
            follower.poll_once().await.unwrap(),
            PollOutcome::Advanced { head: 3, blocks: 4 }
        );
        assert_eq!(
            follower.poll_once().await.unwrap(),
            PollOutcome::Advanced { head: 7, blocks: 4 }
        );
        assert_eq!(
            follower.poll_once().await.unwrap(),
            PollOutcome::Advanced { head: 9, blocks: 2 }
        );
        assert_eq!(follower.poll_once().await.unwrap(), PollOutcome::Idle);
    }

    #[tokio::test]
    async fn resolves_reorganisation_and_reingests() {
        let provider = InMemoryProvider::from_blocks((0..=7).map(|h| remote(h, "a", "a")));
        let mut follower = follower(provider.clone());
        follower.start().unwrap();
        follower.poll_once().await.unwrap();
        follower.poll_once().await.unwrap();
        assert_eq!(follower.service().listener().chain().head_height(), Some(7));

        let mut fork = vec![remote(6, "b", "a")];
        fork.extend((7..=9).map(|h| remote(h, "b", "b")));
        provider.reorganise(fork);

        assert_eq!(
            follower.poll_once().await.unwrap(),
            PollOutcome::Reorganised {
                fork: 5,
                discarded: 2
            }
        );
        let listener = follower.service().listener();
        assert_eq!(listener.status(), ListenerStatus::Awaiting);
        assert_eq!(listener.chain().head_height(), Some(5));

        assert_eq!(
            follower.poll_once().await.unwrap(),
            PollOutcome::Advanced { head: 9, blocks: 4 }
        );
        let head = follower.service().listener().chain().head().cloned().unwrap();
        assert_eq!(head.hash, "b9");
    }

    #[tokio::test]
    async fn stuck_reorganisation_is_reset() {
        let provider = InMemoryProvider::from_blocks((0..=3).map(|h| remote(h, "a", "a")));
        let mut follower = follower(provider);
        follower.start().unwrap();
        follower.poll_once().await.unwrap();
        follower
            .service
            .start_reorganisation("manual", 3, vec![])
            .await
            .unwrap();

        assert_eq!(follower.poll_once().await.unwrap(), PollOutcome::Reset);
        assert_eq!(
            follower.service().listener().status(),
            ListenerStatus::Awaiting
        );
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let provider = InMemoryProvider::from_blocks((0..=3).map(|h| remote(h, "a", "a")));
        let mut follower = follower(provider);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = shutdown_tx.send(true);
        });

        follower.run(shutdown_rx).await.unwrap();
        assert_eq!(follower.service().listener().chain().head_height(), Some(3));
    }

    #[tokio::test]
    async fn observer_sees_every_successful_poll() {
        use std::sync::atomic::{AtomicU64, Ordering};
        use std::sync::Arc;

        let provider = InMemoryProvider::from_blocks((0..=5).map(|h| remote(h, "a", "a")));
        let blocks_seen = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&blocks_seen);
        let observer = move |outcome: &PollOutcome, _: &Listener| {
            if let PollOutcome::Advanced { blocks, .. } = outcome {
                counter.fetch_add(*blocks as u64, Ordering::SeqCst);
            }
        };
        let mut follower = follower(provider).with_observer(Box::new(observer));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = shutdown_tx.send(true);
        });

        follower.run(shutdown_rx).await.unwrap();
        assert_eq!(blocks_seen.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn run_survives_provider_errors() {
        let provider = InMemoryProvider::from_blocks((0..=3).map(|h| remote(h, "a", "a")));
        provider.fail_at(2);
        let mut follower = follower(provider.clone());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            provider.clear_failure();
            tokio::time::sleep(Duration::from_millis(100)).await;
            let _ = shutdown_tx.send(true);
        });

        follower.run(shutdown_rx).await.unwrap();
        assert_eq!(follower.service().listener().chain().head_height(), Some(3));
    }
}
