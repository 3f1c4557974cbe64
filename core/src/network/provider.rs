//! # Network Provider
//!
//! Types and trait for fetching blocks from the authoritative chain.
//!
//! Fetches are strictly request/response: the fork-point search issues one
//! `get_block_at_height` per height it examines and waits for the answer
//! before deciding where to look next. Timeouts and retries belong to the
//! implementation or the caller; a failed fetch simply aborts the command
//! that issued it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A transaction as the remote chain reports it. Only `txid` survives into
/// recorded events.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTransaction {
    pub txid: String,
    /// Raw transaction bytes, if the provider returned them.
    #[serde(default)]
    pub raw: Vec<u8>,
}

impl RemoteTransaction {
    pub fn new(txid: impl Into<String>, raw: Vec<u8>) -> Self {
        Self {
            txid: txid.into(),
            raw,
        }
    }
}

/// A full block fetched from the remote chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBlock {
    pub height: u64,
    pub hash: String,
    /// `None` for genesis.
    pub parent_hash: Option<String>,
    pub transactions: Vec<RemoteTransaction>,
}

impl RemoteBlock {
    /// Parent hash with genesis normalized to the empty string, matching
    /// how [`crate::chain::Block`] stores it.
    pub fn parent_hash(&self) -> &str {
        self.parent_hash.as_deref().unwrap_or("")
    }
}

/// Failures talking to the authoritative chain.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request timed out")]
    Timeout,

    #[error("block not found at height {0}")]
    BlockNotFound(u64),

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Source of truth for the chain the listener follows.
#[async_trait]
pub trait NetworkProvider: Send + Sync {
    /// Fetches the block at `height` on the remote's current best chain.
    async fn get_block_at_height(&self, height: u64) -> Result<RemoteBlock, ProviderError>;

    /// Height of the remote's current best block.
    async fn best_height(&self) -> Result<u64, ProviderError>;
}

#[async_trait]
impl<P> NetworkProvider for std::sync::Arc<P>
where
    P: NetworkProvider + ?Sized,
{
    async fn get_block_at_height(&self, height: u64) -> Result<RemoteBlock, ProviderError> {
        (**self).get_block_at_height(height).await
    }

    async fn best_height(&self) -> Result<u64, ProviderError> {
        (**self).best_height().await
    }
}
