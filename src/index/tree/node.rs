//! Tree node layout
//!
//! ```text
//! ┌──────────────┬──────────────┐
//! │ KeyCount (8) │ LeafFlag (8) │
//! ├──────────────┴──────────────┴────────────┐
//! │ (order - 1) × [Child (8)][Id (8)][Ptr (8)]│
//! ├──────────────────────────────────────────┤
//! │ Child (8)                                │
//! ├──────────────────────────────────────────┤
//! │ Next (8)            (B+ variant only)    │
//! └──────────────────────────────────────────┘
//! ```
//!
//! Unused key slots hold `(-1, -1)`, unused children `-1`.

use bytes::{BufMut, BytesMut};

use crate::arena::Address;
use crate::codec::{get_address, get_i64};
use crate::error::{DexError, Result};
use crate::index::IndexKey;

use super::TreeVariant;

/// In-memory image of one node slot
///
/// Between a child split and the node's own split, `keys` may briefly hold
/// `order` entries; only nodes with at most `order - 1` keys reach disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct TreeNode {
    pub(super) address: Address,
    pub(super) leaf: bool,
    pub(super) keys: Vec<IndexKey>,
    /// Empty for leaves, `keys.len() + 1` entries otherwise
    pub(super) children: Vec<Address>,
    /// Right neighbour in the leaf chain (B+ leaves only)
    pub(super) next: Address,
}

impl TreeNode {
    pub(super) fn leaf(address: Address) -> Self {
        Self {
            address,
            leaf: true,
            keys: Vec::new(),
            children: Vec::new(),
            next: Address::NULL,
        }
    }

    pub(super) fn internal(address: Address) -> Self {
        Self {
            leaf: false,
            ..Self::leaf(address)
        }
    }

    /// Bytes occupied by one node slot
    pub(super) fn encoded_size(order: u64, variant: TreeVariant) -> Result<u64> {
        let chain = match variant {
            TreeVariant::BPlusTree => 8,
            TreeVariant::BTree => 0,
        };
        order
            .checked_sub(1)
            .and_then(|keys| keys.checked_mul(24))
            .and_then(|body| body.checked_add(24 + chain))
            .ok_or_else(|| DexError::corruption(format!("node size overflows for order {}", order)))
    }

    /// Index of the first key with `key.id >= id`
    pub(super) fn search(&self, id: i64) -> usize {
        self.keys.partition_point(|k| k.id < id)
    }

    /// Whether the key at `pos` (from [`search`](Self::search)) is `id`
    pub(super) fn holds(&self, pos: usize, id: i64) -> bool {
        self.keys.get(pos).map_or(false, |k| k.id == id)
    }

    pub(super) fn encode(&self, order: u64, variant: TreeVariant) -> Result<BytesMut> {
        let max_keys = (order - 1) as usize;
        if self.keys.len() > max_keys {
            return Err(DexError::corruption(format!(
                "node {} holds {} keys, more than the {} a slot fits",
                self.address,
                self.keys.len(),
                max_keys
            )));
        }

        let mut buf = BytesMut::with_capacity(Self::encoded_size(order, variant)? as usize);
        buf.put_i64_le(self.keys.len() as i64);
        buf.put_i64_le(i64::from(self.leaf));

        for i in 0..max_keys {
            let child = self.children.get(i).copied().unwrap_or(Address::NULL);
            let key = self.keys.get(i).copied().unwrap_or(IndexKey::EMPTY);
            buf.put_i64_le(child.to_disk());
            buf.put_i64_le(key.id);
            buf.put_i64_le(key.pointer.to_disk());
        }
        let last = self.children.get(max_keys).copied().unwrap_or(Address::NULL);
        buf.put_i64_le(last.to_disk());

        if variant == TreeVariant::BPlusTree {
            buf.put_i64_le(self.next.to_disk());
        }

        Ok(buf)
    }

    pub(super) fn decode(
        address: Address,
        mut buf: &[u8],
        order: u64,
        variant: TreeVariant,
    ) -> Result<Self> {
        let max_keys = (order - 1) as usize;

        let key_count = get_i64(&mut buf, "key count")?;
        let key_count = usize::try_from(key_count)
            .ok()
            .filter(|n| *n <= max_keys)
            .ok_or_else(|| {
                DexError::corruption(format!("node {} has invalid key count {}", address, key_count))
            })?;

        let leaf = match get_i64(&mut buf, "leaf flag")? {
            0 => false,
            1 => true,
            other => {
                return Err(DexError::corruption(format!(
                    "node {} has invalid leaf flag {}",
                    address, other
                )))
            }
        };

        let mut keys = Vec::with_capacity(key_count);
        let mut children = Vec::with_capacity(key_count + 1);
        for i in 0..max_keys {
            let child = get_address(&mut buf, "child")?;
            let id = get_i64(&mut buf, "key id")?;
            let pointer = get_address(&mut buf, "key pointer")?;
            if i <= key_count {
                children.push(child);
            }
            if i < key_count {
                keys.push(IndexKey { id, pointer });
            }
        }
        let last = get_address(&mut buf, "child")?;
        if key_count == max_keys {
            children.push(last);
        }

        let next = match variant {
            TreeVariant::BPlusTree => get_address(&mut buf, "next leaf")?,
            TreeVariant::BTree => Address::NULL,
        };

        if leaf {
            children.clear();
        } else if children.iter().any(|c| c.is_null()) {
            return Err(DexError::corruption(format!(
                "internal node {} is missing a child for its {} keys",
                address, key_count
            )));
        }

        Ok(Self {
            address,
            leaf,
            keys,
            children,
            next,
        })
    }
}
