//! Chain cursor: the local view of the chain tip plus a bounded window of
//! recorded block identities used to find fork points.

use std::collections::VecDeque;

use crate::types::BlockRef;

/// Tracks the last scanned blocks (oldest first).
///
/// Ancestry checks are lookups into the window; there is no parent-pointer
/// traversal. A cursor for reorgs up to `max_depth` blocks deep keeps
/// `max_depth + 1` identities: the replaced blocks plus their common
/// ancestor. Older identities are evicted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainCursor {
    window: VecDeque<BlockRef>,
    max_depth: usize,
}

impl ChainCursor {
    /// Create an empty cursor able to reconcile reorgs up to `max_depth`
    /// blocks deep.
    pub fn new(max_depth: usize) -> Self {
        let max_depth = max_depth.max(1);
        Self {
            window: VecDeque::with_capacity(max_depth + 1),
            max_depth,
        }
    }

    /// Rebuild a cursor from persisted identities, keeping the newest ones.
    pub fn from_blocks(max_depth: usize, mut blocks: Vec<BlockRef>) -> Self {
        let mut cursor = Self::new(max_depth);
        blocks.sort_by_key(|b| b.height);
        for block in blocks {
            cursor.record(block.height, block.hash);
        }
        cursor
    }

    /// The current tip, `None` before the first scan.
    pub fn tip(&self) -> Option<&BlockRef> {
        self.window.back()
    }

    pub fn height(&self) -> Option<u32> {
        self.tip().map(|b| b.height)
    }

    /// The oldest identity still retained.
    pub fn oldest(&self) -> Option<&BlockRef> {
        self.window.front()
    }

    /// Record the identity of the block at `height`.
    ///
    /// Recording at or below the current tip replaces that height and drops
    /// everything above it.
    pub fn record(&mut self, height: u32, hash: impl Into<String>) {
        while matches!(self.window.back(), Some(b) if b.height >= height) {
            self.window.pop_back();
        }
        if self.window.len() > self.max_depth {
            self.window.pop_front();
        }
        self.window.push_back(BlockRef::new(height, hash));
    }

    /// Discard every identity above `height`.
    pub fn rollback_to(&mut self, height: u32) {
        while matches!(self.window.back(), Some(b) if b.height > height) {
            self.window.pop_back();
        }
    }

    /// Forget everything (full rescan).
    pub fn clear(&mut self) {
        self.window.clear();
    }

    /// The recorded hash at `height`, if it is inside the window.
    pub fn hash_at(&self, height: u32) -> Option<&str> {
        let oldest = self.oldest()?.height;
        if height < oldest {
            return None;
        }
        // Fast path: the window is contiguous in the common case.
        match self.window.get((height - oldest) as usize) {
            Some(b) if b.height == height => Some(b.hash.as_str()),
            _ => self
                .window
                .iter()
                .find(|b| b.height == height)
                .map(|b| b.hash.as_str()),
        }
    }

    /// Recorded identities, newest first.
    pub fn iter_desc(&self) -> impl Iterator<Item = &BlockRef> {
        self.window.iter().rev()
    }

    /// Recorded identities, oldest first.
    pub fn blocks(&self) -> impl Iterator<Item = &BlockRef> {
        self.window.iter()
    }

    /// Deepest reorganization the window can reconcile.
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(range: std::ops::RangeInclusive<u32>, max_depth: usize) -> ChainCursor {
        let mut cursor = ChainCursor::new(max_depth);
        for h in range {
            cursor.record(h, format!("h{h}"));
        }
        cursor
    }

    #[test]
    fn record_advances_tip() {
        let cursor = filled(100..=102, 10);
        assert_eq!(cursor.tip().unwrap(), &BlockRef::new(102, "h102"));
        assert_eq!(cursor.len(), 3);
    }

    #[test]
    fn record_below_tip_replaces() {
        let mut cursor = filled(100..=105, 10);
        cursor.record(103, "other");
        assert_eq!(cursor.height(), Some(103));
        assert_eq!(cursor.hash_at(103), Some("other"));
        assert_eq!(cursor.hash_at(104), None);
        assert_eq!(cursor.hash_at(102), Some("h102"));
    }

    #[test]
    fn rollback_to() {
        let mut cursor = filled(100..=110, 20);
        cursor.rollback_to(105);
        assert_eq!(cursor.height(), Some(105));
        cursor.rollback_to(200);
        assert_eq!(cursor.height(), Some(105));
    }

    #[test]
    fn window_keeps_depth_plus_ancestor() {
        let cursor = filled(0..=9, 5);
        assert_eq!(cursor.len(), 6);
        assert_eq!(cursor.oldest().unwrap().height, 4);
        assert_eq!(cursor.hash_at(3), None);
        assert_eq!(cursor.hash_at(9), Some("h9"));
    }

    #[test]
    fn from_blocks_sorts_and_trims() {
        let blocks = vec![
            BlockRef::new(3, "c"),
            BlockRef::new(1, "a"),
            BlockRef::new(2, "b"),
        ];
        let cursor = ChainCursor::from_blocks(1, blocks);
        let heights: Vec<u32> = cursor.blocks().map(|b| b.height).collect();
        assert_eq!(heights, vec![2, 3]);
    }

    #[test]
    fn hash_at_tolerates_gaps() {
        let mut cursor = ChainCursor::new(10);
        cursor.record(10, "anchor");
        cursor.record(20, "later");
        assert_eq!(cursor.hash_at(20), Some("later"));
        assert_eq!(cursor.hash_at(15), None);
    }
}
