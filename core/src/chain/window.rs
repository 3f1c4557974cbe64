//! # Chain Window
//!
//! A bounded window over the most recent blocks of the remote chain.
//!
//! ```text
//!   tail                                   head
//!    │                                      │
//!   [100]──[101]──[102]──[103]──[104]──[105]
//!    ▲                                      ▲
//!    evicted first on overflow              appends land here
//! ```
//!
//! Blocks are stored in a `BTreeMap` keyed by height. Ordered iteration,
//! head/tail lookup and truncation all fall out of the map, and there are no
//! internal links to rebuild after a snapshot is restored.
//!
//! The window itself performs no validation on `append`. Callers check a
//! batch with [`ChainWindow::validate_contiguous`] first; the listener does
//! this before it ever records a `BlocksParsed` event.

use std::collections::BTreeMap;

use super::block::Block;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainWindow {
    blocks: BTreeMap<u64, Block>,
    max_size: usize,
}

impl ChainWindow {
    /// Creates an empty window retaining at most `max_size` blocks.
    ///
    /// `max_size` must be at least the largest batch ever passed to a
    /// single `append`, otherwise the front of a batch is evicted before its
    /// tail has been linked.
    pub fn new(max_size: usize) -> Self {
        Self {
            blocks: BTreeMap::new(),
            max_size,
        }
    }

    /// Rebuilds a window from its flat form. Only the newest `max_size`
    /// blocks are kept.
    pub fn from_flat(max_size: usize, blocks: Vec<Block>) -> Self {
        let mut window = Self::new(max_size);
        window.append(blocks);
        window
    }

    /// Flattens the window into ascending height order.
    pub fn to_flat(&self) -> Vec<Block> {
        self.blocks.values().cloned().collect()
    }

    /// Appends blocks in order, evicting the oldest block whenever the
    /// window grows past `max_size`.
    pub fn append<I>(&mut self, blocks: I)
    where
        I: IntoIterator<Item = Block>,
    {
        for block in blocks {
            self.blocks.insert(block.height, block);
            if self.blocks.len() > self.max_size {
                self.blocks.pop_first();
            }
        }
    }

    /// Checks that `candidates` continue the window: each height is one past
    /// the previous block and each parent hash names the previous block's
    /// hash. The first candidate is checked against the current head.
    ///
    /// An empty window anchors on the first candidate, and an empty batch
    /// is trivially valid.
    pub fn validate_contiguous(&self, candidates: &[Block]) -> bool {
        let mut previous = self.head();
        for candidate in candidates {
            if let Some(parent) = previous {
                if !candidate.extends(parent) {
                    return false;
                }
            }
            previous = Some(candidate);
        }
        true
    }

    pub fn find_by_height(&self, height: u64) -> Option<&Block> {
        self.blocks.get(&height)
    }

    /// Drops every block above `height`.
    ///
    /// Safe to repeat: truncating to the same height twice leaves the same
    /// window. A target below the tail is ignored, since the evicted blocks
    /// can't be brought back and clearing the window would lose the anchor.
    pub fn truncate_to(&mut self, height: u64) {
        let Some(tail) = self.tail_height() else {
            return;
        };
        if height < tail {
            return;
        }
        self.blocks.retain(|retained, _| *retained <= height);
    }

    pub fn head(&self) -> Option<&Block> {
        self.blocks.last_key_value().map(|(_, block)| block)
    }

    /// Height of the newest retained block.
    pub fn head_height(&self) -> Option<u64> {
        self.blocks.last_key_value().map(|(height, _)| *height)
    }

    /// Height of the oldest retained block.
    pub fn tail_height(&self) -> Option<u64> {
        self.blocks.first_key_value().map(|(height, _)| *height)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// Ascending iteration, tail to head.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Block> + '_ {
        self.blocks.values()
    }

    /// Walks from the head towards the tail following parent links. Stops
    /// early at the first block whose parent is missing or doesn't link.
    pub fn ancestry(&self) -> impl Iterator<Item = &Block> + '_ {
        std::iter::successors(self.head(), move |block| {
            block
                .height
                .checked_sub(1)
                .and_then(|height| self.blocks.get(&height))
                .filter(|parent| block.extends(parent))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn hash(height: u64) -> String {
        format!("h{height}")
    }

    fn block(height: u64) -> Block {
        Block::new(
            height,
            hash(height),
            if height == 0 { String::new() } else { hash(height - 1) },
            vec![format!("tx{height}")],
        )
    }

    fn blocks(range: std::ops::RangeInclusive<u64>) -> Vec<Block> {
        range.map(block).collect()
    }

    fn heights(window: &ChainWindow) -> Vec<u64> {
        window.iter().map(|b| b.height).collect()
    }

    #[test]
    fn empty_window_has_no_head() {
        let window = ChainWindow::new(10);
        assert!(window.is_empty());
        assert_eq!(window.head_height(), None);
        assert_eq!(window.tail_height(), None);
        assert_eq!(window.ancestry().count(), 0);
    }

    #[test]
    fn append_advances_head_by_batch_length() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(100..=102));
        assert_eq!(window.head_height(), Some(102));

        window.append(blocks(103..=106));
        assert_eq!(window.head_height(), Some(106));
        assert_eq!(window.len(), 7);
    }

    #[test]
    fn eviction_removes_oldest_first() {
        let mut window = ChainWindow::new(3);
        for b in blocks(0..=5) {
            window.append([b]);
            assert!(window.len() <= 3);
        }
        assert_eq!(heights(&window), vec![3, 4, 5]);
        assert_eq!(window.tail_height(), Some(3));
    }

    #[test]
    fn validate_accepts_linked_continuation() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(100..=102));
        assert!(window.validate_contiguous(&blocks(103..=105)));
        assert!(window.validate_contiguous(&[]));
    }

    #[test]
    fn validate_rejects_height_gap() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(100..=102));
        assert!(!window.validate_contiguous(&blocks(104..=105)));
    }

    #[test]
    fn validate_rejects_parent_hash_mismatch() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(100..=102));

        let forked = Block::new(103, "h103'", "h102-other", vec![]);
        assert!(!window.validate_contiguous(&[forked]));
    }

    #[test]
    fn validate_rejects_broken_link_inside_batch() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(100..=102));

        let mut batch = blocks(103..=105);
        batch[2] = Block::new(105, "h105", "elsewhere", vec![]);
        assert!(!window.validate_contiguous(&batch));
    }

    #[test]
    fn validate_on_empty_window_anchors_on_first_candidate() {
        let window = ChainWindow::new(10);
        assert!(window.validate_contiguous(&blocks(500..=503)));

        let mut broken = blocks(500..=503);
        broken.swap(1, 2);
        assert!(!window.validate_contiguous(&broken));
    }

    #[test]
    fn find_by_height_hits_and_misses() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(10..=12));
        assert_eq!(window.find_by_height(11).map(|b| b.hash.as_str()), Some("h11"));
        assert!(window.find_by_height(9).is_none());
        assert!(window.find_by_height(13).is_none());
    }

    #[test]
    fn truncate_is_idempotent() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(100..=105));

        window.truncate_to(102);
        let once = window.clone();
        window.truncate_to(102);

        assert_eq!(window, once);
        assert_eq!(heights(&window), vec![100, 101, 102]);
    }

    #[test]
    fn truncate_at_or_above_head_is_noop() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(100..=105));
        let before = window.clone();

        window.truncate_to(105);
        assert_eq!(window, before);
        window.truncate_to(u64::MAX);
        assert_eq!(window, before);
    }

    #[test]
    fn truncate_below_tail_is_noop() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(100..=105));
        let before = window.clone();

        window.truncate_to(50);
        assert_eq!(window, before);
    }

    #[test]
    fn truncate_to_tail_keeps_only_tail() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(100..=105));
        window.truncate_to(100);
        assert_eq!(heights(&window), vec![100]);
    }

    #[test]
    fn flat_round_trip_preserves_ancestry_and_head() {
        let mut window = ChainWindow::new(4);
        window.append(blocks(0..=9));

        let restored = ChainWindow::from_flat(4, window.to_flat());

        assert_eq!(restored.head_height(), window.head_height());
        let original_walk: Vec<_> = window.ancestry().map(|b| b.hash.clone()).collect();
        let restored_walk: Vec<_> = restored.ancestry().map(|b| b.hash.clone()).collect();
        assert_eq!(original_walk, restored_walk);
        assert_eq!(original_walk, vec!["h9", "h8", "h7", "h6"]);
    }

    #[test]
    fn from_flat_keeps_newest_when_over_capacity() {
        let restored = ChainWindow::from_flat(2, blocks(0..=4));
        assert_eq!(heights(&restored), vec![3, 4]);
    }

    #[test]
    fn ancestry_stops_at_broken_link() {
        let mut window = ChainWindow::new(10);
        window.append(blocks(0..=2));
        window.append([Block::new(3, "h3", "not-h2", vec![])]);
        window.append([Block::new(4, "h4", "h3", vec![])]);

        let walk: Vec<u64> = window.ancestry().map(|b| b.height).collect();
        assert_eq!(walk, vec![4, 3]);
    }

    fn hashes(window: &ChainWindow) -> Vec<String> {
        window.ancestry().map(|b| b.hash.clone()).collect()
    }

    proptest! {
        #[test]
        fn appends_evict_oldest_and_stay_within_capacity(
            max_size in 1usize..32,
            batches in prop::collection::vec(1u64..16, 1..12),
        ) {
            let mut window = ChainWindow::new(max_size);
            let mut next = 0u64;
            for len in batches {
                window.append(blocks(next..=next + len - 1));
                next += len;

                let tail = next.saturating_sub(max_size as u64);
                prop_assert!(window.len() <= max_size);
                prop_assert_eq!(window.head_height(), Some(next - 1));
                prop_assert_eq!(heights(&window), (tail..next).collect::<Vec<_>>());
            }
        }

        #[test]
        fn truncate_is_idempotent_and_inert_outside_the_window(
            start in 0u64..1_000,
            len in 1u64..40,
            offset in 0u64..60,
        ) {
            let mut window = ChainWindow::new(64);
            window.append(blocks(start..=start + len - 1));
            let head = start + len - 1;
            let target = start.saturating_sub(5) + offset;

            let mut once = window.clone();
            once.truncate_to(target);
            let mut twice = once.clone();
            twice.truncate_to(target);
            prop_assert_eq!(&twice, &once);

            if target >= head || target < start {
                prop_assert_eq!(&once, &window);
            } else {
                prop_assert_eq!(once.head_height(), Some(target));
                prop_assert_eq!(once.tail_height(), Some(start));
            }
        }

        #[test]
        fn flat_round_trip_keeps_head_and_ancestry(
            max_size in 1usize..32,
            count in 1u64..64,
        ) {
            let mut window = ChainWindow::new(max_size);
            window.append(blocks(0..=count - 1));

            let restored = ChainWindow::from_flat(max_size, window.to_flat());

            prop_assert_eq!(&restored, &window);
            prop_assert_eq!(restored.head_height(), window.head_height());
            prop_assert_eq!(hashes(&restored), hashes(&window));
            prop_assert_eq!(hashes(&restored).len(), window.len());
        }
    }
}
