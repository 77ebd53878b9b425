//! Tree deletion
//!
//! Keys are removed at a leaf. A child that drops below the minimum reports
//! [`RemoveOutcome::Underflow`]; its parent fixes it by rotating a key from a
//! sibling that can spare one, or else by merging with a sibling and pulling
//! the separator down, which may underflow the parent in turn.

use crate::arena::Address;
use crate::error::{DexError, Result};
use crate::index::IndexKey;

use super::node::TreeNode;
use super::{TreeInner, TreeVariant};

/// What a child reports to its parent after a removal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum RemoveOutcome {
    /// Child still holds at least the minimum number of keys
    Unchanged,

    /// Child fell below the minimum and needs a rotation or merge
    Underflow,
}

impl TreeInner {
    pub(super) fn delete(&mut self, id: i64) -> Result<IndexKey> {
        // The root is exempt from the minimum
        let (removed, _) = self.remove_from(self.root, id)?;
        self.shrink_root()?;
        Ok(removed)
    }

    fn remove_from(&mut self, address: Address, id: i64) -> Result<(IndexKey, RemoveOutcome)> {
        let mut node = self.read_node(address)?;
        let pos = node.search(id);

        if node.leaf {
            if !node.holds(pos, id) {
                return Err(DexError::NotFound(id));
            }
            let removed = node.keys.remove(pos);
            self.write_node(&node)?;
            return Ok((removed, self.occupancy(&node)));
        }

        let (removed, outcome) = if self.variant == TreeVariant::BTree && node.holds(pos, id) {
            // Internal hit: overwrite with the in-order predecessor, then
            // delete the predecessor from the left subtree
            let removed = node.keys[pos];
            let predecessor = self.max_key(node.children[pos])?;
            node.keys[pos] = predecessor;
            self.write_node(&node)?;
            let (_, outcome) = self.remove_from(node.children[pos], predecessor.id)?;
            (removed, outcome)
        } else {
            self.remove_from(node.children[pos], id)?
        };

        match outcome {
            RemoveOutcome::Unchanged => Ok((removed, RemoveOutcome::Unchanged)),
            RemoveOutcome::Underflow => {
                let outcome = self.rebalance(&mut node, pos)?;
                Ok((removed, outcome))
            }
        }
    }

    fn occupancy(&self, node: &TreeNode) -> RemoveOutcome {
        if node.keys.len() < self.min_keys() {
            RemoveOutcome::Underflow
        } else {
            RemoveOutcome::Unchanged
        }
    }

    /// Largest key in the subtree rooted at `address`
    fn max_key(&self, mut address: Address) -> Result<IndexKey> {
        loop {
            let node = self.read_node(address)?;
            if node.leaf {
                return node.keys.last().copied().ok_or_else(|| {
                    DexError::corruption(format!("non-root leaf {} is empty", node.address))
                });
            }
            address = *node
                .children
                .last()
                .ok_or_else(|| DexError::corruption(format!("internal node {} has no children", node.address)))?;
        }
    }

    /// Fix the underflowing child at `parent.children[idx]`
    fn rebalance(&mut self, parent: &mut TreeNode, idx: usize) -> Result<RemoveOutcome> {
        let mut child = self.read_node(parent.children[idx])?;
        let min = self.min_keys();

        let mut left = match idx.checked_sub(1) {
            Some(i) => Some(self.read_node(parent.children[i])?),
            None => None,
        };
        if let Some(left) = left.as_mut() {
            if left.keys.len() > min {
                self.borrow_from_left(parent, idx, left, &mut child)?;
                self.write_node(left)?;
                self.write_node(&child)?;
                self.write_node(parent)?;
                return Ok(RemoveOutcome::Unchanged);
            }
        }

        let mut right = match parent.children.get(idx + 1) {
            Some(address) => Some(self.read_node(*address)?),
            None => None,
        };
        if let Some(right) = right.as_mut() {
            if right.keys.len() > min {
                self.borrow_from_right(parent, idx, &mut child, right)?;
                self.write_node(right)?;
                self.write_node(&child)?;
                self.write_node(parent)?;
                return Ok(RemoveOutcome::Unchanged);
            }
        }

        match (left, right) {
            (Some(left), _) => self.merge(parent, idx - 1, left, child)?,
            (None, Some(right)) => self.merge(parent, idx, child, right)?,
            (None, None) => {
                return Err(DexError::corruption(format!(
                    "node {} has no sibling under {}",
                    child.address, parent.address
                )))
            }
        }

        self.write_node(parent)?;
        Ok(self.occupancy(parent))
    }

    /// Rotate the last key of the left sibling into `child` through the parent
    fn borrow_from_left(
        &self,
        parent: &mut TreeNode,
        idx: usize,
        left: &mut TreeNode,
        child: &mut TreeNode,
    ) -> Result<()> {
        let moved = pop_last(left)?;

        if child.leaf && self.variant == TreeVariant::BPlusTree {
            child.keys.insert(0, moved);
            parent.keys[idx - 1] = pop_peek(left)?;
        } else {
            child.keys.insert(0, parent.keys[idx - 1]);
            parent.keys[idx - 1] = moved;
            if !child.leaf {
                let subtree = left.children.pop().ok_or_else(|| missing_child(left))?;
                child.children.insert(0, subtree);
            }
        }

        tracing::debug!(from = %left.address, to = %child.address, "Borrowed key from left sibling");
        Ok(())
    }

    /// Rotate the first key of the right sibling into `child` through the parent
    fn borrow_from_right(
        &self,
        parent: &mut TreeNode,
        idx: usize,
        child: &mut TreeNode,
        right: &mut TreeNode,
    ) -> Result<()> {
        if right.keys.is_empty() {
            return Err(DexError::corruption(format!("sibling {} is empty", right.address)));
        }
        let moved = right.keys.remove(0);

        if child.leaf && self.variant == TreeVariant::BPlusTree {
            child.keys.push(moved);
            parent.keys[idx] = moved;
        } else {
            child.keys.push(parent.keys[idx]);
            parent.keys[idx] = moved;
            if !child.leaf {
                if right.children.is_empty() {
                    return Err(missing_child(right));
                }
                child.children.push(right.children.remove(0));
            }
        }

        tracing::debug!(from = %right.address, to = %child.address, "Borrowed key from right sibling");
        Ok(())
    }

    /// Fold `right` into `left`; the separator at `sep` leaves the parent
    fn merge(&mut self, parent: &mut TreeNode, sep: usize, mut left: TreeNode, right: TreeNode) -> Result<()> {
        let separator = parent.keys.remove(sep);
        parent.children.remove(sep + 1);

        if left.leaf && self.variant == TreeVariant::BPlusTree {
            // Leaves already hold every key; the separator was only a copy
            left.keys.extend(right.keys);
            left.next = right.next;
        } else {
            left.keys.push(separator);
            left.keys.extend(right.keys);
            left.children.extend(right.children);
        }

        self.write_node(&left)?;
        self.free_node(right.address);

        tracing::debug!(into = %left.address, freed = %right.address, "Merged tree nodes");
        Ok(())
    }

    /// Empty internal root: its only child takes over, height - 1
    fn shrink_root(&mut self) -> Result<()> {
        let root = self.read_node(self.root)?;
        if root.leaf || !root.keys.is_empty() {
            return Ok(());
        }

        let old = root.address;
        self.set_root(root.children[0]);
        self.free_node(old);

        tracing::debug!(root = %self.root, "Tree height shrank");
        Ok(())
    }
}

fn pop_last(node: &mut TreeNode) -> Result<IndexKey> {
    node.keys
        .pop()
        .ok_or_else(|| DexError::corruption(format!("sibling {} is empty", node.address)))
}

/// Last key after a pop; the new separator for a B+ left leaf
fn pop_peek(node: &TreeNode) -> Result<IndexKey> {
    node.keys
        .last()
        .copied()
        .ok_or_else(|| DexError::corruption(format!("sibling {} is empty", node.address)))
}

fn missing_child(node: &TreeNode) -> DexError {
    DexError::corruption(format!("internal node {} has no children", node.address))
}
