//! Structural audit of a persisted tree
//!
//! Walks every node from the root and reports the first violated property as
//! [`DexError::Corruption`]: child counts, key order, separator bounds,
//! node occupancy, uniform leaf depth and, for B+ trees, the leaf chain.

use crate::arena::Address;
use crate::error::{DexError, Result};
use crate::index::IndexStats;

use super::node::TreeNode;
use super::{TreeInner, TreeVariant};

/// Running totals of one walk
#[derive(Default)]
struct Walk {
    leaf_depth: Option<usize>,
    nodes: u64,
    entries: u64,
    /// Leaves in left-to-right order, for the chain check
    leaves: Vec<(Address, Address)>,
}

impl TreeInner {
    pub(super) fn verify(&self) -> Result<IndexStats> {
        let mut walk = Walk::default();
        self.verify_node(self.root, 1, None, None, true, &mut walk)?;

        if self.variant == TreeVariant::BPlusTree {
            verify_leaf_chain(&walk.leaves)?;
        }

        Ok(IndexStats {
            kind: self.variant.kind(),
            entries: walk.entries,
            depth: walk.leaf_depth.unwrap_or(0) as u64,
            units: walk.nodes,
            free_units: self.allocator.free_count() as u64,
        })
    }

    /// `lo`/`hi` are the separators around this subtree. Ids must be
    /// strictly inside for a B-tree; a B+ subtree may also hold `hi` itself.
    fn verify_node(
        &self,
        address: Address,
        depth: usize,
        lo: Option<i64>,
        hi: Option<i64>,
        is_root: bool,
        walk: &mut Walk,
    ) -> Result<()> {
        let node = self.read_node(address)?;
        walk.nodes += 1;

        if !is_root && node.keys.len() < self.min_keys() {
            return Err(DexError::corruption(format!(
                "node {} holds {} keys, below the minimum {}",
                address,
                node.keys.len(),
                self.min_keys()
            )));
        }
        if node.keys.windows(2).any(|w| w[0].id >= w[1].id) {
            return Err(DexError::corruption(format!("keys of node {} are not ascending", address)));
        }
        self.check_bounds(&node, lo, hi)?;

        if node.leaf {
            match walk.leaf_depth {
                None => walk.leaf_depth = Some(depth),
                Some(expected) if expected != depth => {
                    return Err(DexError::corruption(format!(
                        "leaf {} at depth {}, expected {}",
                        address, depth, expected
                    )))
                }
                Some(_) => {}
            }
            walk.entries += node.keys.len() as u64;
            walk.leaves.push((address, node.next));
            return Ok(());
        }

        if node.children.len() != node.keys.len() + 1 {
            return Err(DexError::corruption(format!(
                "internal node {} has {} keys but {} children",
                address,
                node.keys.len(),
                node.children.len()
            )));
        }
        if is_root && node.keys.is_empty() {
            return Err(DexError::corruption(format!("internal root {} has no keys", address)));
        }
        if self.variant == TreeVariant::BTree {
            walk.entries += node.keys.len() as u64;
        }

        for (i, child) in node.children.iter().enumerate() {
            let child_lo = if i == 0 { lo } else { Some(node.keys[i - 1].id) };
            let child_hi = node.keys.get(i).map(|k| k.id).or(hi);
            self.verify_node(*child, depth + 1, child_lo, child_hi, false, walk)?;
        }
        Ok(())
    }

    fn check_bounds(&self, node: &TreeNode, lo: Option<i64>, hi: Option<i64>) -> Result<()> {
        let (first, last) = match (node.keys.first(), node.keys.last()) {
            (Some(first), Some(last)) => (first.id, last.id),
            _ => return Ok(()),
        };

        let above = lo.map_or(true, |lo| first > lo);
        let below = match (hi, self.variant) {
            (None, _) => true,
            (Some(hi), TreeVariant::BTree) => last < hi,
            (Some(hi), TreeVariant::BPlusTree) => last <= hi,
        };

        if above && below {
            Ok(())
        } else {
            Err(DexError::corruption(format!(
                "node {} keys [{}, {}] escape separators {:?}..{:?}",
                node.address, first, last, lo, hi
            )))
        }
    }
}

fn verify_leaf_chain(leaves: &[(Address, Address)]) -> Result<()> {
    for pair in leaves.windows(2) {
        let (address, next) = pair[0];
        if next != pair[1].0 {
            return Err(DexError::corruption(format!(
                "leaf {} links to {}, expected {}",
                address, next, pair[1].0
            )));
        }
    }
    match leaves.last() {
        Some((address, next)) if !next.is_null() => Err(DexError::corruption(format!(
            "last leaf {} links to {}",
            address, next
        ))),
        _ => Ok(()),
    }
}
