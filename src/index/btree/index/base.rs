use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::{
    IndexKey, PageId, PageWriteGuard, Rid, RootGuard, HEADER_PAGE_ID, INVALID_PAGE_ID,
};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{self, BTreeNode, LeafNode};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::page::header;

/// What a descent is about to do; decides latch kinds and the safety
/// predicate used to release ancestors early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Operation {
    Insert,
    Delete,
}

/// Target of a read-only descent.
#[derive(Debug, Clone, Copy)]
pub(crate) enum SearchTarget {
    Leftmost,
    Key(IndexKey),
}

/// Per-operation held set for crab latching.
///
/// Owns the root-latch guard and the stack of write-latched ancestors
/// (root first). Every guard in `latched` pairs with one buffer pool pin,
/// released together. `held_below` lists pages whose guards are owned by
/// enclosing call frames of the same operation; parent-pointer rewrites
/// that target them are queued in `pending_reparent` and applied by the
/// owning frame before it encodes its node.
pub(crate) struct LatchContext {
    pub(crate) root_guard: Option<RootGuard>,
    pub(crate) latched: Vec<PageWriteGuard>,
    pub(crate) deleted: Vec<PageId>,
    held_below: Vec<PageId>,
    pending_reparent: Vec<(PageId, PageId)>,
}

impl LatchContext {
    pub(crate) fn new(root_guard: RootGuard) -> Self {
        Self {
            root_guard: Some(root_guard),
            latched: Vec::new(),
            deleted: Vec::new(),
            held_below: Vec::new(),
            pending_reparent: Vec::new(),
        }
    }

    pub(crate) fn root_id(&self) -> PageId {
        **self
            .root_guard
            .as_ref()
            .expect("root latch already released")
    }

    pub(crate) fn set_root_id(&mut self, page_id: PageId) {
        **self
            .root_guard
            .as_mut()
            .expect("root latch must be held to move the root") = page_id;
    }

    pub(crate) fn release_root(&mut self) {
        self.root_guard.take();
    }

    pub(crate) fn register_held(&mut self, page_id: PageId) {
        self.held_below.push(page_id);
    }

    pub(crate) fn is_held(&self, page_id: PageId) -> bool {
        self.held_below.contains(&page_id)
    }

    pub(crate) fn defer_reparent(&mut self, child: PageId, new_parent: PageId) {
        self.pending_reparent.push((child, new_parent));
    }

    /// New parent queued for `page_id` by a deeper frame, if any.
    pub(crate) fn take_pending_for(&mut self, page_id: PageId) -> Option<PageId> {
        let position = self
            .pending_reparent
            .iter()
            .position(|&(child, _)| child == page_id)?;
        Some(self.pending_reparent.remove(position).1)
    }
}

/// Disk-resident B+tree mapping unique `IndexKey`s to record ids, built
/// on buffer pool pages with crab latching for concurrent access.
pub struct BTreeIndex {
    pub(crate) index_name: String,
    pub(crate) buffer_pool: Arc<BufferPoolManager>,
    pub(crate) root_page_id: Arc<Mutex<PageId>>,
    pub(crate) leaf_max_size: u32,
    pub(crate) internal_max_size: u32,
}

impl BTreeIndex {
    /// Open the index named `name`, creating it on first use. An existing
    /// root recorded in the header page is picked up.
    pub fn new(
        name: impl Into<String>,
        buffer_pool: Arc<BufferPoolManager>,
        leaf_max_size: u32,
        internal_max_size: u32,
    ) -> Result<Self, BTreeError> {
        assert!(
            (2..=node::leaf_capacity() as u32).contains(&leaf_max_size),
            "leaf_max_size must fit a page"
        );
        assert!(
            (3..=node::internal_capacity() as u32).contains(&internal_max_size),
            "internal_max_size must fit a page"
        );

        let index_name = name.into();
        let header_page = buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let root_page_id = {
            let guard = header_page.read();
            header::get_root_page_id(&guard, &index_name).unwrap_or(INVALID_PAGE_ID)
        };
        buffer_pool.unpin_page(HEADER_PAGE_ID, false);

        Ok(Self {
            index_name,
            buffer_pool,
            root_page_id: Arc::new(Mutex::new(root_page_id)),
            leaf_max_size,
            internal_max_size,
        })
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.lock() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        *self.root_page_id.lock()
    }

    /// Point lookup.
    pub fn get_value(&self, key: IndexKey) -> Result<Option<Rid>, BTreeError> {
        let Some(leaf) = self.find_leaf_read(SearchTarget::Key(key))? else {
            return Ok(None);
        };
        let value = leaf.lookup(key);
        self.buffer_pool.unpin_page(leaf.page_id, false);
        Ok(value)
    }

    /// Record the root mapping in the header page; `insert_record` on
    /// first creation, update afterwards.
    pub(crate) fn update_root_page_id(&self, root_page_id: PageId) -> Result<(), BTreeError> {
        let header_page = self.buffer_pool.fetch_page(HEADER_PAGE_ID)?;
        let updated = {
            let mut guard = header_page.write();
            header::update_record(&mut guard, &self.index_name, root_page_id)
                || header::insert_record(&mut guard, &self.index_name, root_page_id)
        };
        self.buffer_pool.unpin_page(HEADER_PAGE_ID, true);
        if !updated {
            return Err(BTreeError::HeaderFull);
        }
        Ok(())
    }

    /// Whether `node` cannot propagate structural change to its
    /// ancestors under `op`, so latches above it may be released.
    pub(crate) fn is_safe(&self, node: &BTreeNode, op: Operation) -> bool {
        match op {
            Operation::Insert => node.size() < node.max_size() - 1,
            Operation::Delete => {
                if node.is_root() {
                    if node.is_leaf() {
                        // Keep the root latch while a delete may empty the
                        // tree, so the root id moves under it.
                        node.size() > 1
                    } else {
                        node.size() > 2
                    }
                } else {
                    node.size() > node.min_size()
                }
            }
        }
    }

    /// Crab-latching write descent to the leaf responsible for `key`.
    ///
    /// On return the leaf is write-latched and pinned; `ctx.latched`
    /// holds exactly the ancestors that the operation may still modify.
    /// The caller owns all cleanup, including on error.
    pub(crate) fn find_leaf_write(
        &self,
        key: IndexKey,
        op: Operation,
        ctx: &mut LatchContext,
    ) -> Result<(PageWriteGuard, BTreeNode), BTreeError> {
        let root_id = ctx.root_id();
        let page = self.buffer_pool.fetch_page(root_id)?;
        let mut guard = page.write_arc();
        let mut current = match BTreeNode::decode(root_id, &guard.data) {
            Ok(node) => node,
            Err(e) => {
                self.unlatch_unpin(guard, false);
                return Err(e);
            }
        };
        if self.is_safe(&current, op) {
            ctx.release_root();
        }

        loop {
            let child_id = match &current {
                BTreeNode::Leaf(_) => break,
                BTreeNode::Internal(internal) => internal.lookup(key),
            };

            let child_page = match self.buffer_pool.fetch_page(child_id) {
                Ok(page) => page,
                Err(e) => {
                    self.unlatch_unpin(guard, false);
                    return Err(e.into());
                }
            };
            let child_guard = child_page.write_arc();
            ctx.latched.push(guard);
            guard = child_guard;

            current = match BTreeNode::decode(child_id, &guard.data) {
                Ok(node) => node,
                Err(e) => {
                    self.unlatch_unpin(guard, false);
                    return Err(e);
                }
            };
            if self.is_safe(&current, op) {
                ctx.release_root();
                self.release_ancestors(ctx);
            }
        }
        Ok((guard, current))
    }

    /// Hand-over-hand read descent. The returned leaf stays pinned but
    /// unlatched; the caller unpins it.
    pub(crate) fn find_leaf_read(
        &self,
        target: SearchTarget,
    ) -> Result<Option<LeafNode>, BTreeError> {
        let root_guard = self.root_page_id.lock_arc();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let page = self.buffer_pool.fetch_page(root_id)?;
        let mut guard = page.read_arc();
        drop(root_guard);

        loop {
            let page_id = guard.page_id;
            let node = match BTreeNode::decode(page_id, &guard.data) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false);
                    return Err(e);
                }
            };
            match node {
                BTreeNode::Leaf(leaf) => {
                    drop(guard);
                    // The leaf's pin travels to the caller.
                    return Ok(Some(leaf));
                }
                BTreeNode::Internal(internal) => {
                    let child_id = match target {
                        SearchTarget::Leftmost => internal.value_at(0),
                        SearchTarget::Key(key) => internal.lookup(key),
                    };
                    let child_page = match self.buffer_pool.fetch_page(child_id) {
                        Ok(page) => page,
                        Err(e) => {
                            drop(guard);
                            self.buffer_pool.unpin_page(page_id, false);
                            return Err(e.into());
                        }
                    };
                    let child_guard = child_page.read_arc();
                    drop(guard);
                    self.buffer_pool.unpin_page(page_id, false);
                    guard = child_guard;
                }
            }
        }
    }

    /// Rewrite a child's parent pointer through the buffer pool.
    /// Must not target pages latched by this same operation; those go
    /// through `LatchContext::defer_reparent`.
    pub(crate) fn reparent(&self, child_id: PageId, new_parent: PageId) -> Result<(), BTreeError> {
        let page = self.buffer_pool.fetch_page(child_id)?;
        {
            let mut guard = page.write();
            let mut node = match BTreeNode::decode(child_id, &guard.data) {
                Ok(node) => node,
                Err(e) => {
                    drop(guard);
                    self.buffer_pool.unpin_page(child_id, false);
                    return Err(e);
                }
            };
            node.set_parent_page_id(new_parent);
            node.encode(&mut guard.data);
        }
        self.buffer_pool.unpin_page(child_id, true);
        Ok(())
    }

    /// Re-parent each child, deferring the ones latched deeper in this
    /// operation's call chain.
    pub(crate) fn reparent_children(
        &self,
        ctx: &mut LatchContext,
        children: impl IntoIterator<Item = PageId>,
        new_parent: PageId,
    ) -> Result<(), BTreeError> {
        for child in children {
            if ctx.is_held(child) {
                ctx.defer_reparent(child, new_parent);
            } else {
                self.reparent(child, new_parent)?;
            }
        }
        Ok(())
    }

    /// Unlatch and unpin every retained ancestor, root first. Used when a
    /// safe child proves they cannot be modified, and on no-op exits.
    pub(crate) fn release_ancestors(&self, ctx: &mut LatchContext) {
        for guard in ctx.latched.drain(..) {
            let page_id = guard.page_id;
            drop(guard);
            self.buffer_pool.unpin_page(page_id, false);
        }
    }

    pub(crate) fn release_all(&self, ctx: &mut LatchContext) {
        ctx.release_root();
        self.release_ancestors(ctx);
    }

    pub(crate) fn unlatch_unpin(&self, guard: PageWriteGuard, is_dirty: bool) {
        let page_id = guard.page_id;
        drop(guard);
        self.buffer_pool.unpin_page(page_id, is_dirty);
    }
}
