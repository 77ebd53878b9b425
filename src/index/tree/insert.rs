//! Tree insertion
//!
//! Recursive descent; a node that reaches `order` keys splits and hands a
//! [`InsertOutcome::Split`] back to its parent.

use crate::arena::Address;
use crate::error::{DexError, Result};
use crate::index::IndexKey;

use super::node::TreeNode;
use super::{TreeInner, TreeVariant};

/// What a child reports to its parent after an insert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum InsertOutcome {
    /// Child absorbed the key
    Unchanged,

    /// Child split; `carry` must be inserted between `left` and `right`
    Split {
        left: Address,
        carry: IndexKey,
        right: Address,
    },
}

impl TreeInner {
    pub(super) fn insert(&mut self, key: IndexKey) -> Result<()> {
        match self.insert_into(self.root, key)? {
            InsertOutcome::Unchanged => Ok(()),
            InsertOutcome::Split { left, carry, right } => self.grow_root(left, carry, right),
        }
    }

    fn insert_into(&mut self, address: Address, key: IndexKey) -> Result<InsertOutcome> {
        let mut node = self.read_node(address)?;
        let pos = node.search(key.id);

        // A B+ separator equal to the id is only a bound; the leaf decides
        if node.holds(pos, key.id) && self.terminal(&node) {
            return Err(DexError::DuplicateKey(key.id));
        }

        if node.leaf {
            node.keys.insert(pos, key);
        } else {
            match self.insert_into(node.children[pos], key)? {
                InsertOutcome::Unchanged => return Ok(InsertOutcome::Unchanged),
                InsertOutcome::Split { left, carry, right } => {
                    debug_assert_eq!(node.children[pos], left);
                    node.keys.insert(pos, carry);
                    node.children.insert(pos + 1, right);
                }
            }
        }

        if node.keys.len() > self.max_keys() {
            return self.split(node);
        }

        self.write_node(&node)?;
        Ok(InsertOutcome::Unchanged)
    }

    /// Move the upper half of an overfull node into a new right sibling
    fn split(&mut self, mut node: TreeNode) -> Result<InsertOutcome> {
        let right_address = self.alloc_node();
        let mut right = if node.leaf {
            TreeNode::leaf(right_address)
        } else {
            TreeNode::internal(right_address)
        };

        let carry = if node.leaf && self.variant == TreeVariant::BPlusTree {
            // Left keeps the larger half; its last key goes up as a copy
            let mid = (node.keys.len() + 1) / 2;
            right.keys = node.keys.split_off(mid);
            right.next = node.next;
            node.next = right_address;
            node.keys[mid - 1]
        } else {
            // Middle key leaves both halves
            let mid = node.keys.len() / 2;
            let carry = node.keys[mid];
            right.keys = node.keys.split_off(mid + 1);
            node.keys.truncate(mid);
            if !node.leaf {
                right.children = node.children.split_off(mid + 1);
            }
            carry
        };

        self.write_node(&right)?;
        self.write_node(&node)?;

        tracing::debug!(
            left = %node.address,
            right = %right_address,
            carry = carry.id,
            leaf = node.leaf,
            "Split tree node"
        );

        Ok(InsertOutcome::Split {
            left: node.address,
            carry,
            right: right_address,
        })
    }

    /// Root split: new root with two children, height + 1
    fn grow_root(&mut self, left: Address, carry: IndexKey, right: Address) -> Result<()> {
        let mut root = TreeNode::internal(self.alloc_node());
        root.keys.push(carry);
        root.children = vec![left, right];
        self.write_node(&root)?;
        self.set_root(root.address);

        tracing::debug!(root = %root.address, "Tree height grew");
        Ok(())
    }
}
