//! Ordered Index
//!
//! Persisted multiway search tree mapping record id → record log address.
//!
//! ## Variants
//! - **B-tree**: keys live at every level; a split moves the middle key up;
//!   deleting from an internal node swaps in the in-order predecessor.
//! - **B+ tree**: data lives only in leaves, which are chained left to right;
//!   a leaf split copies the last key kept on the left up as separator, so a
//!   separator is the largest id its left subtree may hold.
//!
//! ## Files
//! ```text
//! {stem}.hdr    [Root (8)][Order (8)][FreeLen (8)][Free (8) × FreeLen]
//! {stem}.nodes  fixed-size node slots, see node.rs
//! ```
//!
//! Every mutation writes all nodes it touched before returning. There is no
//! log: a crash between the writes of a split or merge leaves the tree
//! inconsistent.

mod insert;
mod node;
mod remove;
mod verify;

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use bytes::{BufMut, BytesMut};
use parking_lot::RwLock;

use crate::arena::{read_exact_at, write_all_at, Address, SlotAllocator};
use crate::codec::{get_address, get_len};
use crate::config::{validate_tree_order, IndexKind};
use crate::error::{DexError, Result};

use super::{IndexKey, IndexStats, SecondaryIndex};
use node::TreeNode;

/// Which tree flavour a file pair holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeVariant {
    BTree,
    BPlusTree,
}

impl TreeVariant {
    fn file_stem(self) -> &'static str {
        match self {
            TreeVariant::BTree => "btree",
            TreeVariant::BPlusTree => "bplustree",
        }
    }

    pub fn kind(self) -> IndexKind {
        match self {
            TreeVariant::BTree => IndexKind::BTree,
            TreeVariant::BPlusTree => IndexKind::BPlusTree,
        }
    }
}

/// Persisted B-tree / B+ tree
///
/// ## Concurrency:
/// - `inner`: RwLock; `find`, `range` and `verify` share it, structural
///   mutations (and the free list they feed) hold it exclusively
pub struct OrderedIndex {
    variant: TreeVariant,
    header_path: PathBuf,
    inner: RwLock<TreeInner>,
}

/// State behind the lock: header fields, files and the node allocator
pub(super) struct TreeInner {
    variant: TreeVariant,
    order: u64,
    root: Address,
    header_file: File,
    nodes_file: File,
    allocator: SlotAllocator,
    /// Root or free list changed since the header was last written
    header_dirty: bool,
}

impl OrderedIndex {
    /// Create an empty tree in `dir`, replacing any existing files
    pub fn create(dir: &Path, variant: TreeVariant, order: u64) -> Result<Self> {
        validate_tree_order(order)?;
        fs::create_dir_all(dir)?;

        let (header_path, nodes_path) = Self::paths(dir, variant);
        let header_file = open_file(&header_path, true)?;
        let nodes_file = open_file(&nodes_path, true)?;

        let allocator = SlotAllocator::new(TreeNode::encoded_size(order, variant)?, 0, Vec::new())?;
        let mut inner = TreeInner {
            variant,
            order,
            root: Address::NULL,
            header_file,
            nodes_file,
            allocator,
            header_dirty: true,
        };

        let root = TreeNode::leaf(inner.alloc_node());
        inner.write_node(&root)?;
        inner.root = root.address;
        inner.persist_header()?;

        tracing::debug!(
            path = %header_path.display(),
            ?variant,
            order,
            "Created ordered index"
        );

        Ok(Self {
            variant,
            header_path,
            inner: RwLock::new(inner),
        })
    }

    /// Open an existing tree, reloading its root and free list
    pub fn open(dir: &Path, variant: TreeVariant) -> Result<Self> {
        let (header_path, nodes_path) = Self::paths(dir, variant);
        let header = fs::read(&header_path)?;
        let mut buf = header.as_slice();

        let root = get_address(&mut buf, "root")?;
        let order = get_len(&mut buf, "order")?;
        validate_tree_order(order).map_err(|e| DexError::corruption(e.to_string()))?;

        let free_len = get_len(&mut buf, "free list length")?;
        let mut free = Vec::new();
        for _ in 0..free_len {
            free.push(get_address(&mut buf, "free list entry")?);
        }

        let header_file = open_file(&header_path, false)?;
        let nodes_file = open_file(&nodes_path, false)?;
        let nodes_len = nodes_file.metadata()?.len();
        let allocator = SlotAllocator::new(TreeNode::encoded_size(order, variant)?, nodes_len, free)?;

        if !allocator.is_slot(root) {
            return Err(DexError::corruption(format!(
                "root {} is not a node slot in {}",
                root,
                nodes_path.display()
            )));
        }

        tracing::debug!(
            path = %header_path.display(),
            ?variant,
            order,
            free = free_len,
            "Opened ordered index"
        );

        Ok(Self {
            variant,
            header_path,
            inner: RwLock::new(TreeInner {
                variant,
                order,
                root,
                header_file,
                nodes_file,
                allocator,
                header_dirty: false,
            }),
        })
    }

    /// Whether a tree of `variant` exists in `dir`
    pub fn exists(dir: &Path, variant: TreeVariant) -> bool {
        let (header, nodes) = Self::paths(dir, variant);
        header.exists() && nodes.exists()
    }

    fn paths(dir: &Path, variant: TreeVariant) -> (PathBuf, PathBuf) {
        let stem = variant.file_stem();
        (
            dir.join(format!("{}.hdr", stem)),
            dir.join(format!("{}.nodes", stem)),
        )
    }

    pub fn insert(&self, key: IndexKey) -> Result<()> {
        let mut inner = self.inner.write();
        let result = inner.insert(key);
        inner.finish_mutation()?;
        result
    }

    pub fn find(&self, id: i64) -> Result<IndexKey> {
        self.inner.read().find(id)
    }

    pub fn delete(&self, id: i64) -> Result<IndexKey> {
        let mut inner = self.inner.write();
        let result = inner.delete(id);
        inner.finish_mutation()?;
        result
    }

    pub fn update_pointer(&self, id: i64, address: Address) -> Result<()> {
        self.inner.write().update_pointer(id, address)
    }

    pub fn range(&self, lo: i64, hi: i64) -> Result<Vec<IndexKey>> {
        self.inner.read().range(lo, hi)
    }

    pub fn verify(&self) -> Result<IndexStats> {
        self.inner.read().verify()
    }

    /// Node key ids level by level from the root, left to right
    pub fn levels(&self) -> Result<Vec<Vec<Vec<i64>>>> {
        self.inner.read().levels()
    }

    pub fn variant(&self) -> TreeVariant {
        self.variant
    }

    pub fn order(&self) -> u64 {
        self.inner.read().order
    }

    /// Minimum keys in any node but the root
    pub fn min_keys(&self) -> usize {
        self.inner.read().min_keys()
    }

    pub fn header_path(&self) -> &Path {
        &self.header_path
    }
}

impl SecondaryIndex for OrderedIndex {
    fn insert(&self, key: IndexKey) -> Result<()> {
        OrderedIndex::insert(self, key)
    }

    fn find(&self, id: i64) -> Result<Address> {
        OrderedIndex::find(self, id).map(|k| k.pointer)
    }

    fn delete(&self, id: i64) -> Result<Address> {
        OrderedIndex::delete(self, id).map(|k| k.pointer)
    }

    fn update_pointer(&self, id: i64, address: Address) -> Result<()> {
        OrderedIndex::update_pointer(self, id, address)
    }

    fn range(&self, lo: i64, hi: i64) -> Result<Vec<IndexKey>> {
        OrderedIndex::range(self, lo, hi)
    }

    fn verify(&self) -> Result<IndexStats> {
        OrderedIndex::verify(self)
    }

    fn kind(&self) -> IndexKind {
        self.variant.kind()
    }
}

fn open_file(path: &Path, truncate: bool) -> Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(truncate)
        .truncate(truncate)
        .open(path)?;
    Ok(file)
}

// =============================================================================
// Node I/O and header bookkeeping
// =============================================================================

impl TreeInner {
    /// ⌈order/2⌉ children, so ⌈order/2⌉ - 1 keys
    pub(super) fn min_keys(&self) -> usize {
        ((self.order + 1) / 2 - 1) as usize
    }

    pub(super) fn max_keys(&self) -> usize {
        (self.order - 1) as usize
    }

    pub(super) fn read_node(&self, address: Address) -> Result<TreeNode> {
        if !self.allocator.is_slot(address) {
            return Err(DexError::corruption(format!("node address {} is not a slot", address)));
        }
        let mut buf = vec![0u8; self.allocator.slot_size() as usize];
        read_exact_at(&self.nodes_file, &mut buf, address.offset())?;
        TreeNode::decode(address, &buf, self.order, self.variant)
    }

    pub(super) fn write_node(&self, node: &TreeNode) -> Result<()> {
        let buf = node.encode(self.order, self.variant)?;
        write_all_at(&self.nodes_file, &buf, node.address.offset())?;
        Ok(())
    }

    /// Reuse a reclaimed slot if there is one, else grow the node file
    pub(super) fn alloc_node(&mut self) -> Address {
        if self.allocator.free_count() > 0 {
            self.header_dirty = true;
        }
        self.allocator.alloc()
    }

    pub(super) fn free_node(&mut self, address: Address) {
        self.allocator.free(address);
        self.header_dirty = true;
    }

    pub(super) fn set_root(&mut self, address: Address) {
        self.root = address;
        self.header_dirty = true;
    }

    fn finish_mutation(&mut self) -> Result<()> {
        if self.header_dirty {
            self.persist_header()?;
        }
        Ok(())
    }

    fn persist_header(&mut self) -> Result<()> {
        let free = self.allocator.free_count();
        let mut buf = BytesMut::with_capacity(24 + free * 8);
        buf.put_i64_le(self.root.to_disk());
        buf.put_i64_le(self.order as i64);
        buf.put_i64_le(free as i64);
        for address in self.allocator.free_slots() {
            buf.put_i64_le(address.to_disk());
        }

        write_all_at(&self.header_file, &buf, 0)?;
        self.header_file.set_len(buf.len() as u64)?;
        self.header_dirty = false;
        Ok(())
    }

    // =========================================================================
    // Lookups
    // =========================================================================

    /// Whether a match at this node ends the search
    fn terminal(&self, node: &TreeNode) -> bool {
        node.leaf || self.variant == TreeVariant::BTree
    }

    pub(super) fn find(&self, id: i64) -> Result<IndexKey> {
        let mut address = self.root;
        loop {
            let node = self.read_node(address)?;
            let pos = node.search(id);
            if node.holds(pos, id) && self.terminal(&node) {
                return Ok(node.keys[pos]);
            }
            if node.leaf {
                return Err(DexError::NotFound(id));
            }
            address = node.children[pos];
        }
    }

    /// Rewrites the pointer of `id`; in a B+ tree separator copies met on
    /// the way down are refreshed too
    pub(super) fn update_pointer(&mut self, id: i64, pointer: Address) -> Result<()> {
        let mut matches = Vec::new();
        let mut address = self.root;
        loop {
            let node = self.read_node(address)?;
            let pos = node.search(id);
            let next = node.children.get(pos).copied();

            if node.holds(pos, id) {
                let terminal = self.terminal(&node);
                matches.push((node, pos));
                if terminal {
                    break;
                }
            }
            match next {
                Some(child) => address = child,
                None => return Err(DexError::NotFound(id)),
            }
        }

        for (mut node, pos) in matches {
            node.keys[pos].pointer = pointer;
            self.write_node(&node)?;
        }
        Ok(())
    }

    fn levels(&self) -> Result<Vec<Vec<Vec<i64>>>> {
        let mut levels = Vec::new();
        let mut frontier = vec![self.root];
        while !frontier.is_empty() {
            let mut level: Vec<Vec<i64>> = Vec::with_capacity(frontier.len());
            let mut next = Vec::new();
            for address in frontier {
                let node = self.read_node(address)?;
                level.push(node.keys.iter().map(|k| k.id).collect());
                next.extend(node.children);
            }
            levels.push(level);
            frontier = next;
        }
        Ok(levels)
    }

    pub(super) fn range(&self, lo: i64, hi: i64) -> Result<Vec<IndexKey>> {
        let mut out = Vec::new();
        if lo > hi {
            return Ok(out);
        }
        match self.variant {
            TreeVariant::BPlusTree => self.range_leaf_chain(lo, hi, &mut out)?,
            TreeVariant::BTree => self.range_in_order(self.root, lo, hi, &mut out)?,
        }
        Ok(out)
    }

    fn range_leaf_chain(&self, lo: i64, hi: i64, out: &mut Vec<IndexKey>) -> Result<()> {
        let mut node = self.read_node(self.root)?;
        while !node.leaf {
            let pos = node.search(lo);
            node = self.read_node(node.children[pos])?;
        }

        loop {
            for key in &node.keys {
                if key.id > hi {
                    return Ok(());
                }
                if key.id >= lo {
                    out.push(*key);
                }
            }
            if node.next.is_null() {
                return Ok(());
            }
            node = self.read_node(node.next)?;
        }
    }

    fn range_in_order(&self, address: Address, lo: i64, hi: i64, out: &mut Vec<IndexKey>) -> Result<()> {
        let node = self.read_node(address)?;
        if node.leaf {
            out.extend(node.keys.iter().filter(|k| k.id >= lo && k.id <= hi));
            return Ok(());
        }

        // child i holds ids strictly between keys[i-1] and keys[i]
        for (i, child) in node.children.iter().enumerate() {
            let above_lower = i == 0 || node.keys[i - 1].id < hi;
            let below_upper = i == node.keys.len() || node.keys[i].id > lo;
            if above_lower && below_upper {
                self.range_in_order(*child, lo, hi, out)?;
            }
            if let Some(key) = node.keys.get(i) {
                if key.id >= lo && key.id <= hi {
                    out.push(*key);
                }
            }
        }
        Ok(())
    }
}
