//! In-memory network provider.
//!
//! Holds a remote chain as a height-indexed map that tests can rewrite at
//! will to simulate reorganisations. Clones share the same chain, so a test
//! can keep a handle while the service owns another. Every fetch is logged
//! in order, which lets tests assert exactly which heights the fork-point
//! search visited.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::provider::{NetworkProvider, ProviderError, RemoteBlock};

#[derive(Debug, Default)]
struct Inner {
    blocks: BTreeMap<u64, RemoteBlock>,
    fetches: Vec<u64>,
    fail_at: Option<u64>,
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryProvider {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_blocks<I>(blocks: I) -> Self
    where
        I: IntoIterator<Item = RemoteBlock>,
    {
        let provider = Self::new();
        provider.extend(blocks);
        provider
    }

    /// Adds or overwrites blocks by height.
    pub fn extend<I>(&self, blocks: I)
    where
        I: IntoIterator<Item = RemoteBlock>,
    {
        let mut inner = self.inner.write();
        for block in blocks {
            inner.blocks.insert(block.height, block);
        }
    }

    /// Replaces the chain from `blocks[0].height` upwards, dropping anything
    /// above the new tip. This is how tests stage a reorganisation.
    pub fn reorganise<I>(&self, blocks: I)
    where
        I: IntoIterator<Item = RemoteBlock>,
    {
        let mut blocks = blocks.into_iter().peekable();
        let Some(from) = blocks.peek().map(|b| b.height) else {
            return;
        };
        let mut inner = self.inner.write();
        inner.blocks.retain(|height, _| *height < from);
        for block in blocks {
            inner.blocks.insert(block.height, block);
        }
    }

    /// Makes every fetch of `height` fail with a transport error.
    pub fn fail_at(&self, height: u64) {
        self.inner.write().fail_at = Some(height);
    }

    pub fn clear_failure(&self) {
        self.inner.write().fail_at = None;
    }

    pub fn block(&self, height: u64) -> Option<RemoteBlock> {
        self.inner.read().blocks.get(&height).cloned()
    }

    /// Heights requested through `get_block_at_height`, oldest first.
    pub fn fetch_log(&self) -> Vec<u64> {
        self.inner.read().fetches.clone()
    }

    pub fn clear_fetch_log(&self) {
        self.inner.write().fetches.clear();
    }
}

#[async_trait]
impl NetworkProvider for InMemoryProvider {
    async fn get_block_at_height(&self, height: u64) -> Result<RemoteBlock, ProviderError> {
        let mut inner = self.inner.write();
        inner.fetches.push(height);
        if inner.fail_at == Some(height) {
            return Err(ProviderError::Transport(format!(
                "injected failure at height {height}"
            )));
        }
        inner
            .blocks
            .get(&height)
            .cloned()
            .ok_or(ProviderError::BlockNotFound(height))
    }

    async fn best_height(&self) -> Result<u64, ProviderError> {
        self.inner
            .read()
            .blocks
            .last_key_value()
            .map(|(height, _)| *height)
            .ok_or_else(|| ProviderError::InvalidResponse("remote chain is empty".to_string()))
    }
}
