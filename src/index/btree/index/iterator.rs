use std::sync::Arc;

use crate::common::types::{IndexKey, PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, LeafNode};
use crate::storage::buffer::BufferPoolManager;
use super::base::{BTreeIndex, SearchTarget};

/// Forward scan over the leaf chain.
///
/// Holds a pin on the current leaf (released on drop) and a decoded copy
/// of its entries; no latch is held between steps. Concurrent writers may
/// restructure the tree under the scan: the iterator never crashes but
/// promises no snapshot. A leaf that stops decoding ends the scan.
pub struct BTreeIterator {
    buffer_pool: Arc<BufferPoolManager>,
    leaf_page_id: PageId,
    next_page_id: PageId,
    entries: Vec<(IndexKey, Rid)>,
    position: usize,
}

impl BTreeIterator {
    pub(crate) fn from_leaf(
        buffer_pool: Arc<BufferPoolManager>,
        leaf: LeafNode,
        position: usize,
    ) -> Self {
        Self {
            buffer_pool,
            leaf_page_id: leaf.page_id,
            next_page_id: leaf.next_page_id,
            entries: leaf.entries,
            position,
        }
    }

    pub(crate) fn exhausted(buffer_pool: Arc<BufferPoolManager>) -> Self {
        Self {
            buffer_pool,
            leaf_page_id: INVALID_PAGE_ID,
            next_page_id: INVALID_PAGE_ID,
            entries: Vec::new(),
            position: 0,
        }
    }

    /// Move the pin to the next leaf in the chain; decode under a brief
    /// read latch.
    fn advance_leaf(&mut self) -> bool {
        let next_id = self.next_page_id;
        self.buffer_pool.unpin_page(self.leaf_page_id, false);
        self.leaf_page_id = INVALID_PAGE_ID;
        self.entries.clear();
        self.position = 0;

        if next_id == INVALID_PAGE_ID {
            return false;
        }
        let Ok(page) = self.buffer_pool.fetch_page(next_id) else {
            return false;
        };
        let decoded = {
            let guard = page.read();
            BTreeNode::decode(next_id, &guard.data)
        };
        match decoded {
            Ok(BTreeNode::Leaf(leaf)) => {
                self.leaf_page_id = next_id;
                self.next_page_id = leaf.next_page_id;
                self.entries = leaf.entries;
                true
            }
            _ => {
                self.buffer_pool.unpin_page(next_id, false);
                false
            }
        }
    }
}

impl Iterator for BTreeIterator {
    type Item = (IndexKey, Rid);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if self.leaf_page_id == INVALID_PAGE_ID {
                return None;
            }
            if self.position < self.entries.len() {
                let entry = self.entries[self.position];
                self.position += 1;
                return Some(entry);
            }
            if !self.advance_leaf() {
                return None;
            }
        }
    }
}

impl Drop for BTreeIterator {
    fn drop(&mut self) {
        if self.leaf_page_id != INVALID_PAGE_ID {
            self.buffer_pool.unpin_page(self.leaf_page_id, false);
        }
    }
}

impl BTreeIndex {
    /// Scan from the smallest key.
    pub fn iter(&self) -> Result<BTreeIterator, BTreeError> {
        match self.find_leaf_read(SearchTarget::Leftmost)? {
            Some(leaf) => Ok(BTreeIterator::from_leaf(
                Arc::clone(&self.buffer_pool),
                leaf,
                0,
            )),
            None => Ok(BTreeIterator::exhausted(Arc::clone(&self.buffer_pool))),
        }
    }

    /// Scan from the first key >= `key`.
    pub fn iter_from(&self, key: IndexKey) -> Result<BTreeIterator, BTreeError> {
        match self.find_leaf_read(SearchTarget::Key(key))? {
            Some(leaf) => {
                let position = leaf.key_index(key);
                Ok(BTreeIterator::from_leaf(
                    Arc::clone(&self.buffer_pool),
                    leaf,
                    position,
                ))
            }
            None => Ok(BTreeIterator::exhausted(Arc::clone(&self.buffer_pool))),
        }
    }
}
