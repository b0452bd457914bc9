use std::collections::VecDeque;

use crate::error::CacheError;
use crate::types::{IndexedBlock, Point};

// ==============================================================================
// Block Cache
// ==============================================================================

/// Bounded in-memory view of the most recent base-chain blocks, oldest first.
///
/// Every adjacent pair satisfies `next.prev_hash() == prev.hash()` and
/// `next.height == prev.height + 1`. When growing past `capacity` the oldest
/// block is evicted. The cache does no locking of its own: it is owned by the
/// dispatcher task and only mutated from there.
#[derive(Debug, Clone)]
pub struct BlockCache {
    blocks: VecDeque<IndexedBlock>,
    capacity: usize,
}

impl BlockCache {
    pub fn new(capacity: usize) -> Result<Self, CacheError> {
        if capacity == 0 {
            return Err(CacheError::ZeroCapacity);
        }
        Ok(Self {
            blocks: VecDeque::with_capacity(capacity),
            capacity,
        })
    }

    /// Build a verified cache from an oldest-first run of blocks, keeping only
    /// the trailing `capacity` entries.
    pub fn from_blocks(
        capacity: usize,
        blocks: impl IntoIterator<Item = IndexedBlock>,
    ) -> Result<Self, CacheError> {
        let mut cache = Self::new(capacity)?;
        for block in blocks {
            cache.add(block)?;
        }
        Ok(cache)
    }

    pub fn tip(&self) -> Option<&IndexedBlock> {
        self.blocks.back()
    }

    /// The oldest retained block.
    pub fn base(&self) -> Option<&IndexedBlock> {
        self.blocks.front()
    }

    /// Append `block` on top of the tip, evicting the oldest block first when
    /// the cache is full.
    pub fn add(&mut self, block: IndexedBlock) -> Result<(), CacheError> {
        if let Some(tip) = self.tip() {
            if block.prev_hash() != tip.hash() {
                return Err(CacheError::InvalidChain {
                    expected: tip.hash(),
                    found: block.prev_hash(),
                });
            }
            let expected = tip.height.next();
            if block.height != expected {
                return Err(CacheError::HeightGap {
                    expected,
                    found: block.height,
                });
            }
        }

        if self.blocks.len() == self.capacity {
            self.blocks.pop_front();
        }
        self.blocks.push_back(block);
        Ok(())
    }

    pub fn remove_last(&mut self) -> Result<IndexedBlock, CacheError> {
        self.blocks.pop_back().ok_or(CacheError::EmptyCache)
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn points(&self) -> Vec<Point> {
        self.blocks.iter().map(IndexedBlock::point).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &IndexedBlock> {
        self.blocks.iter()
    }

    /// All blocks as one oldest-first slice.
    pub fn as_slice(&mut self) -> &[IndexedBlock] {
        self.blocks.make_contiguous()
    }
}
