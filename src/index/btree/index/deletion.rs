use crate::common::types::{IndexKey, PageId, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::node::BTreeNode;
use super::base::{BTreeIndex, LatchContext, Operation};

impl BTreeIndex {
    /// Remove a key; absent keys are a no-op.
    pub fn remove(&self, key: IndexKey) -> Result<(), BTreeError> {
        let mut ctx = LatchContext::new(self.root_page_id.lock_arc());
        if ctx.root_id() == INVALID_PAGE_ID {
            return Ok(());
        }

        let result = self.remove_from_leaf(&mut ctx, key);
        if result.is_err() {
            self.release_all(&mut ctx);
        }
        result
    }

    fn remove_from_leaf(&self, ctx: &mut LatchContext, key: IndexKey) -> Result<(), BTreeError> {
        let (mut guard, node) = self.find_leaf_write(key, Operation::Delete, ctx)?;
        let mut leaf = node.into_leaf();

        let old_size = leaf.size();
        leaf.remove(key);
        if leaf.size() == old_size {
            self.release_all(ctx);
            self.unlatch_unpin(guard, false);
            return Ok(());
        }

        ctx.register_held(leaf.page_id);
        let mut node = BTreeNode::Leaf(leaf);
        let should_delete = self.coalesce_or_redistribute(ctx, &mut node)?;

        if let Some(new_parent) = ctx.take_pending_for(node.page_id()) {
            node.set_parent_page_id(new_parent);
        }
        let leaf_id = node.page_id();
        node.encode(&mut guard.data);
        if should_delete {
            ctx.deleted.push(leaf_id);
        }

        ctx.release_root();
        self.unlatch_unpin(guard, true);

        // Pages merged away are deleted only after every latch is gone.
        for page_id in std::mem::take(&mut ctx.deleted) {
            self.buffer_pool.delete_page(page_id);
        }
        Ok(())
    }

    /// Restore the size invariant of an underfull node by merging with or
    /// borrowing from a sibling. Returns true when `node` itself must be
    /// deleted by the caller.
    pub(crate) fn coalesce_or_redistribute(
        &self,
        ctx: &mut LatchContext,
        node: &mut BTreeNode,
    ) -> Result<bool, BTreeError> {
        if node.is_root() {
            let should_delete = self.adjust_root(ctx, node)?;
            ctx.release_root();
            self.release_ancestors(ctx);
            return Ok(should_delete);
        }

        if node.size() >= node.min_size() {
            ctx.release_root();
            self.release_ancestors(ctx);
            return Ok(false);
        }

        let mut parent_guard = ctx
            .latched
            .pop()
            .expect("underfull node keeps its parent latched");
        let parent_id = parent_guard.page_id;
        let mut parent = match BTreeNode::decode(parent_id, &parent_guard.data) {
            Ok(decoded) => decoded.into_internal(),
            Err(e) => {
                self.unlatch_unpin(parent_guard, false);
                return Err(e);
            }
        };

        let index = parent
            .value_index(node.page_id())
            .expect("node is referenced by its parent");
        // Previous sibling, or the next one for the leftmost child.
        let sibling_index = if index == 0 { 1 } else { index - 1 };
        let sibling_id = parent.value_at(sibling_index);

        let sibling_page = match self.buffer_pool.fetch_page(sibling_id) {
            Ok(page) => page,
            Err(e) => {
                self.unlatch_unpin(parent_guard, false);
                return Err(e.into());
            }
        };
        let mut sibling_guard = sibling_page.write_arc();
        let mut sibling = match BTreeNode::decode(sibling_id, &sibling_guard.data) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.unlatch_unpin(sibling_guard, false);
                self.unlatch_unpin(parent_guard, false);
                return Err(e);
            }
        };

        if node.size() + sibling.size() <= node.max_size() - 1 {
            // Coalesce. The survivor is always the left page; when this
            // node is the leftmost child the sibling merges into it.
            ctx.register_held(parent_id);
            ctx.register_held(sibling_id);

            let node_should_delete = if index == 0 {
                let fixups = Self::merge_right_into_left(&mut sibling, node, parent.key_at(1));
                self.reparent_children(ctx, fixups, node.page_id())?;
                parent.remove(1);
                ctx.deleted.push(sibling_id);
                false
            } else {
                let fixups = Self::merge_right_into_left(node, &mut sibling, parent.key_at(index));
                self.reparent_children(ctx, fixups, sibling.page_id())?;
                parent.remove(index);
                true
            };

            let mut parent_node = BTreeNode::Internal(parent);
            let parent_should_delete = match self.coalesce_or_redistribute(ctx, &mut parent_node) {
                Ok(flag) => flag,
                Err(e) => {
                    self.unlatch_unpin(sibling_guard, true);
                    self.unlatch_unpin(parent_guard, true);
                    return Err(e);
                }
            };

            if let Some(new_parent) = ctx.take_pending_for(sibling.page_id()) {
                sibling.set_parent_page_id(new_parent);
            }
            if let Some(new_parent) = ctx.take_pending_for(parent_node.page_id()) {
                parent_node.set_parent_page_id(new_parent);
            }
            if parent_should_delete {
                ctx.deleted.push(parent_node.page_id());
            }

            sibling.encode(&mut sibling_guard.data);
            self.unlatch_unpin(sibling_guard, true);
            parent_node.encode(&mut parent_guard.data);
            self.unlatch_unpin(parent_guard, true);
            return Ok(node_should_delete);
        }

        // Redistribute: borrow one entry across the boundary and refresh
        // the separator in the parent.
        ctx.release_root();
        let node_page_id = node.page_id();
        match (&mut *node, &mut sibling) {
            (BTreeNode::Leaf(node_leaf), BTreeNode::Leaf(sibling_leaf)) => {
                if index == 0 {
                    sibling_leaf.move_first_to_end_of(node_leaf);
                    parent.set_key_at(1, sibling_leaf.key_at(0));
                } else {
                    sibling_leaf.move_last_to_front_of(node_leaf);
                    parent.set_key_at(index, node_leaf.key_at(0));
                }
            }
            (BTreeNode::Internal(node_internal), BTreeNode::Internal(sibling_internal)) => {
                let moved_child = if index == 0 {
                    let child =
                        sibling_internal.move_first_to_end_of(node_internal, parent.key_at(1));
                    parent.set_key_at(1, sibling_internal.key_at(0));
                    child
                } else {
                    let child =
                        sibling_internal.move_last_to_front_of(node_internal, parent.key_at(index));
                    parent.set_key_at(index, node_internal.key_at(0));
                    child
                };
                self.reparent_children(ctx, [moved_child], node_page_id)?;
            }
            _ => unreachable!("siblings share a node kind"),
        }

        sibling.encode(&mut sibling_guard.data);
        self.unlatch_unpin(sibling_guard, true);
        BTreeNode::Internal(parent).encode(&mut parent_guard.data);
        self.unlatch_unpin(parent_guard, true);
        self.release_ancestors(ctx);
        Ok(false)
    }

    /// Merge `right` into `left` (both children of the same parent, with
    /// `middle_key` separating them). Returns child pages that must be
    /// re-parented onto the survivor.
    fn merge_right_into_left(
        right: &mut BTreeNode,
        left: &mut BTreeNode,
        middle_key: IndexKey,
    ) -> Vec<PageId> {
        match (right, left) {
            (BTreeNode::Leaf(right_leaf), BTreeNode::Leaf(left_leaf)) => {
                right_leaf.move_all_to(left_leaf);
                Vec::new()
            }
            (BTreeNode::Internal(right_internal), BTreeNode::Internal(left_internal)) => {
                right_internal.move_all_to(left_internal, middle_key)
            }
            _ => unreachable!("siblings share a node kind"),
        }
    }

    /// Shrink the root after a delete: an internal root left with one
    /// child promotes that child; an emptied leaf root empties the tree.
    /// Returns true when the old root page must be deleted.
    fn adjust_root(
        &self,
        ctx: &mut LatchContext,
        node: &mut BTreeNode,
    ) -> Result<bool, BTreeError> {
        match node {
            BTreeNode::Internal(internal) if internal.size() == 1 => {
                let child_id = internal.remove_and_return_only_child();
                ctx.set_root_id(child_id);
                self.update_root_page_id(child_id)?;
                // The promoted child is the survivor of the merge one
                // level down, so its guard is held by a deeper frame.
                self.reparent_children(ctx, [child_id], INVALID_PAGE_ID)?;
                Ok(true)
            }
            BTreeNode::Leaf(leaf) if leaf.size() == 0 => {
                ctx.set_root_id(INVALID_PAGE_ID);
                self.update_root_page_id(INVALID_PAGE_ID)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
