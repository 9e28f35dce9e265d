use crate::common::types::{IndexKey, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::{BTreeNode, InternalNode, LeafNode};
use super::base::{BTreeIndex, LatchContext, Operation};

impl BTreeIndex {
    /// Insert a key. Returns false when the key already exists; the
    /// index stores unique keys only.
    pub fn insert(&self, key: IndexKey, rid: Rid) -> Result<bool, BTreeError> {
        let mut ctx = LatchContext::new(self.root_page_id.lock_arc());

        if ctx.root_id() == INVALID_PAGE_ID {
            self.start_new_tree(&mut ctx, key, rid)?;
            return Ok(true);
        }

        let result = self.insert_into_leaf(&mut ctx, key, rid);
        if result.is_err() {
            self.release_all(&mut ctx);
        }
        result
    }

    /// An empty tree grows a single leaf root holding the first entry.
    fn start_new_tree(
        &self,
        ctx: &mut LatchContext,
        key: IndexKey,
        rid: Rid,
    ) -> Result<(), BTreeError> {
        let (root_page, root_page_id) = self.buffer_pool.new_page()?;
        let mut root = LeafNode::new(root_page_id, INVALID_PAGE_ID, self.leaf_max_size);
        root.insert(key, rid);
        {
            let mut guard = root_page.write();
            BTreeNode::Leaf(root).encode(&mut guard.data);
        }
        ctx.set_root_id(root_page_id);
        let result = self.update_root_page_id(root_page_id);
        self.buffer_pool.unpin_page(root_page_id, true);
        result
    }

    fn insert_into_leaf(
        &self,
        ctx: &mut LatchContext,
        key: IndexKey,
        rid: Rid,
    ) -> Result<bool, BTreeError> {
        let (mut guard, node) = self.find_leaf_write(key, Operation::Insert, ctx)?;
        let mut leaf = node.into_leaf();

        if leaf.lookup(key).is_some() {
            self.release_all(ctx);
            self.unlatch_unpin(guard, false);
            return Ok(false);
        }

        leaf.insert(key, rid);

        if leaf.size() >= leaf.max_size as usize {
            // Split: upper half moves to a fresh leaf, chained in after
            // this one; its write latch is held until it is encoded so a
            // descent through the updated parent cannot observe an
            // uninitialized page.
            let (new_page, new_page_id) = match self.buffer_pool.new_page() {
                Ok(created) => created,
                Err(e) => {
                    self.release_all(ctx);
                    self.unlatch_unpin(guard, false);
                    return Err(e.into());
                }
            };
            let mut new_guard = new_page.write_arc();

            let mut new_leaf = LeafNode::new(new_page_id, leaf.parent_page_id, self.leaf_max_size);
            leaf.move_half_to(&mut new_leaf);
            new_leaf.next_page_id = leaf.next_page_id;
            leaf.next_page_id = new_page_id;
            let separator = new_leaf.key_at(0);

            let mut old_node = BTreeNode::Leaf(leaf);
            let mut new_node = BTreeNode::Leaf(new_leaf);
            if let Err(e) = self.insert_into_parent(ctx, &mut old_node, separator, &mut new_node) {
                drop(new_guard);
                self.buffer_pool.unpin_page(new_page_id, false);
                self.release_all(ctx);
                self.unlatch_unpin(guard, false);
                return Err(e);
            }

            new_node.encode(&mut new_guard.data);
            drop(new_guard);
            self.buffer_pool.unpin_page(new_page_id, true);
            old_node.encode(&mut guard.data);
        } else {
            BTreeNode::Leaf(leaf).encode(&mut guard.data);
        }

        ctx.release_root();
        self.unlatch_unpin(guard, true);
        Ok(true)
    }

    /// Hook the freshly split `new_node` into the tree, splitting
    /// ancestors as needed. `old_node` and `new_node` are encoded by the
    /// caller after this returns, so parent pointer updates made here are
    /// visible in their pages.
    fn insert_into_parent(
        &self,
        ctx: &mut LatchContext,
        old_node: &mut BTreeNode,
        separator: IndexKey,
        new_node: &mut BTreeNode,
    ) -> Result<(), BTreeError> {
        if old_node.is_root() {
            // The tree grows a level: a new internal root over the pair.
            let (root_page, root_page_id) = self.buffer_pool.new_page()?;
            let mut root = InternalNode::new(root_page_id, INVALID_PAGE_ID, self.internal_max_size);
            root.populate_new_root(old_node.page_id(), separator, new_node.page_id());
            old_node.set_parent_page_id(root_page_id);
            new_node.set_parent_page_id(root_page_id);
            {
                let mut guard = root_page.write();
                BTreeNode::Internal(root).encode(&mut guard.data);
            }
            ctx.set_root_id(root_page_id);
            let result = self.update_root_page_id(root_page_id);
            self.buffer_pool.unpin_page(root_page_id, true);
            ctx.release_root();
            self.release_ancestors(ctx);
            return result;
        }

        let mut parent_guard = ctx
            .latched
            .pop()
            .expect("unsafe child keeps its parent latched");
        let parent_id = parent_guard.page_id;
        let mut parent = match BTreeNode::decode(parent_id, &parent_guard.data) {
            Ok(node) => node.into_internal(),
            Err(e) => {
                self.unlatch_unpin(parent_guard, false);
                return Err(e);
            }
        };

        new_node.set_parent_page_id(parent.page_id);
        parent.insert_node_after(old_node.page_id(), separator, new_node.page_id());

        if parent.size() < self.internal_max_size as usize {
            ctx.release_root();
            self.release_ancestors(ctx);
            BTreeNode::Internal(parent).encode(&mut parent_guard.data);
            self.unlatch_unpin(parent_guard, true);
            return Ok(());
        }

        // The parent overflowed in turn: split it and recurse.
        let (new_page, new_parent_id) = match self.buffer_pool.new_page() {
            Ok(created) => created,
            Err(e) => {
                self.unlatch_unpin(parent_guard, false);
                return Err(e.into());
            }
        };
        let mut new_parent_guard = new_page.write_arc();

        let mut new_parent =
            InternalNode::new(new_parent_id, parent.parent_page_id, self.internal_max_size);
        let moved_children = parent.move_half_to(&mut new_parent);
        let separator_up = new_parent.key_at(0);

        // Moved children now live under the new parent. The two pages of
        // this split are in scope as nodes; everything else is fixed
        // through the buffer pool.
        let mut fixup = Ok(());
        for child_id in moved_children {
            if child_id == old_node.page_id() {
                old_node.set_parent_page_id(new_parent_id);
            } else if child_id == new_node.page_id() {
                new_node.set_parent_page_id(new_parent_id);
            } else {
                fixup = self.reparent(child_id, new_parent_id);
                if fixup.is_err() {
                    break;
                }
            }
        }

        let mut parent_node = BTreeNode::Internal(parent);
        let mut new_parent_node = BTreeNode::Internal(new_parent);
        let result = fixup.and_then(|()| {
            self.insert_into_parent(ctx, &mut parent_node, separator_up, &mut new_parent_node)
        });
        match result {
            Ok(()) => {
                new_parent_node.encode(&mut new_parent_guard.data);
                drop(new_parent_guard);
                self.buffer_pool.unpin_page(new_parent_id, true);
                parent_node.encode(&mut parent_guard.data);
                self.unlatch_unpin(parent_guard, true);
                Ok(())
            }
            Err(e) => {
                drop(new_parent_guard);
                self.buffer_pool.unpin_page(new_parent_id, false);
                self.unlatch_unpin(parent_guard, false);
                Err(e)
            }
        }
    }
}
