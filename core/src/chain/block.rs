//! # Block
//!
//! The light block the listener keeps in its window and records in events.
//! Full transaction bodies never make it this far: by the time a block is
//! recorded, its transactions have been reduced to their ids so events stay
//! small no matter how large the remote blocks get.

use serde::{Deserialize, Serialize};

use crate::network::RemoteBlock;

/// A block as the listener sees it. Immutable once constructed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block height (genesis = 0).
    pub height: u64,
    /// Block hash as reported by the remote chain.
    pub hash: String,
    /// Hash of the parent block. Empty for genesis.
    pub parent_hash: String,
    /// Ordered transaction ids.
    pub tx_ids: Vec<String>,
}

impl Block {
    pub fn new(
        height: u64,
        hash: impl Into<String>,
        parent_hash: impl Into<String>,
        tx_ids: Vec<String>,
    ) -> Self {
        Self {
            height,
            hash: hash.into(),
            parent_hash: parent_hash.into(),
            tx_ids,
        }
    }

    /// True if `self` sits directly on top of `parent`: next height and
    /// matching parent hash.
    pub fn extends(&self, parent: &Block) -> bool {
        parent.height.checked_add(1) == Some(self.height) && self.parent_hash == parent.hash
    }

    /// Structural identity used by the fork-point search. Hash alone is not
    /// enough; the parent hash has to agree too.
    pub fn same_identity(&self, hash: &str, parent_hash: &str) -> bool {
        self.hash == hash && self.parent_hash == parent_hash
    }

    pub fn tx_count(&self) -> usize {
        self.tx_ids.len()
    }
}

impl From<&RemoteBlock> for Block {
    fn from(remote: &RemoteBlock) -> Self {
        Self {
            height: remote.height,
            hash: remote.hash.clone(),
            parent_hash: remote.parent_hash().to_string(),
            tx_ids: remote.transactions.iter().map(|tx| tx.txid.clone()).collect(),
        }
    }
}

impl From<RemoteBlock> for Block {
    fn from(remote: RemoteBlock) -> Self {
        Block::from(&remote)
    }
}
