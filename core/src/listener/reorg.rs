//! # Fork-Point Search
//!
//! Walks the window downward from a suspect height, comparing each local
//! block with the remote block at the same height, until both agree on
//! `(hash, parent_hash)`. That height is the fork point: the last block the
//! two chains share.
//!
//! ```text
//! local   100 ─ 101 ─ 102 ─ 103 ─ 104 ─ 105
//! remote  100 ─ 101 ─ 102 ─ 103'─ 104'─ 105'─ 106'
//!                      ▲      ◄──── visited, mismatched
//!                 fork point
//! ```
//!
//! The search is a loop, not recursion. It moves down exactly one height per
//! mismatch, fetches one remote block per step and never looks below the
//! window's tail. If it reaches the tail without agreement the divergence is
//! deeper than the window retains and there's nothing sensible left to do
//! but report it.

use tracing::debug;

use super::error::{ListenerError, ListenerResult};
use crate::chain::{Block, ChainWindow};
use crate::network::NetworkProvider;

/// Where the local and remote chains last agreed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkPoint {
    pub height: u64,
    /// Local blocks above the fork point, in the order they were visited
    /// (newest first), after whatever the caller passed in.
    pub discarded: Vec<Block>,
}

pub async fn find_fork_point<P>(
    chain: &ChainWindow,
    provider: &P,
    start: u64,
    mut accumulated: Vec<Block>,
) -> ListenerResult<ForkPoint>
where
    P: NetworkProvider + ?Sized,
{
    let (Some(tail), Some(head)) = (chain.tail_height(), chain.head_height()) else {
        return Err(ListenerError::UnresolvableDivergence {
            height: start,
            earliest: start,
        });
    };
    if start > head {
        return Err(ListenerError::InvalidTarget {
            height: start,
            head: Some(head),
        });
    }

    let mut height = start;
    let mut earliest = start;
    let mut depth = 0;

    while height >= tail && depth < chain.len() {
        let Some(local) = chain.find_by_height(height) else {
            break;
        };
        let remote = provider.get_block_at_height(height).await?;
        earliest = height;
        depth += 1;

        if local.same_identity(&remote.hash, remote.parent_hash()) {
            return Ok(ForkPoint {
                height,
                discarded: accumulated,
            });
        }

        debug!(
            height,
            local_hash = %local.hash,
            remote_hash = %remote.hash,
            "local block diverges from remote chain"
        );
        accumulated.push(local.clone());

        match height.checked_sub(1) {
            Some(next) => height = next,
            None => break,
        }
    }

    Err(ListenerError::UnresolvableDivergence {
        height: start,
        earliest,
    })
}
