//! Bucket slot layout
//!
//! ```text
//! ┌────────────────┬────────────────┐
//! │ LocalDepth (8) │ EntryCount (8) │
//! ├────────────────┴────────────────┤
//! │ capacity × [Id (8)][Ptr (8)]    │
//! └─────────────────────────────────┘
//! ```
//!
//! Unused entries hold `(-1, -1)`.

use bytes::{BufMut, BytesMut};

use crate::arena::Address;
use crate::codec::{get_address, get_i64, get_len};
use crate::error::{DexError, Result};
use crate::index::IndexKey;

use super::MAX_GLOBAL_DEPTH;

/// Header bytes before the entry array
const BUCKET_HEADER_SIZE: u64 = 16;

/// Bytes per stored entry
const ENTRY_SIZE: u64 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Bucket {
    pub(super) address: Address,
    pub(super) local_depth: u32,
    pub(super) entries: Vec<IndexKey>,
}

impl Bucket {
    pub(super) fn new(address: Address, local_depth: u32) -> Self {
        Self {
            address,
            local_depth,
            entries: Vec::new(),
        }
    }

    pub(super) fn encoded_size(capacity: u64) -> Result<u64> {
        capacity
            .checked_mul(ENTRY_SIZE)
            .and_then(|body| body.checked_add(BUCKET_HEADER_SIZE))
            .ok_or_else(|| DexError::corruption(format!("bucket size overflows for capacity {}", capacity)))
    }

    pub(super) fn position(&self, id: i64) -> Option<usize> {
        self.entries.iter().position(|e| e.id == id)
    }

    pub(super) fn encode(&self, capacity: u64) -> Result<BytesMut> {
        if self.entries.len() as u64 > capacity {
            return Err(DexError::corruption(format!(
                "bucket {} holds {} entries, more than its capacity {}",
                self.address,
                self.entries.len(),
                capacity
            )));
        }

        let mut buf = BytesMut::with_capacity(Self::encoded_size(capacity)? as usize);
        buf.put_i64_le(i64::from(self.local_depth));
        buf.put_i64_le(self.entries.len() as i64);
        for i in 0..capacity as usize {
            let entry = self.entries.get(i).copied().unwrap_or(IndexKey::EMPTY);
            buf.put_i64_le(entry.id);
            buf.put_i64_le(entry.pointer.to_disk());
        }
        Ok(buf)
    }

    pub(super) fn decode(address: Address, mut buf: &[u8], capacity: u64) -> Result<Self> {
        let local_depth = get_i64(&mut buf, "local depth")?;
        let local_depth = u32::try_from(local_depth)
            .ok()
            .filter(|d| *d <= MAX_GLOBAL_DEPTH)
            .ok_or_else(|| {
                DexError::corruption(format!("bucket {} has invalid local depth {}", address, local_depth))
            })?;

        let count = get_len(&mut buf, "entry count")?;
        if count > capacity {
            return Err(DexError::corruption(format!(
                "bucket {} claims {} entries, capacity is {}",
                address, count, capacity
            )));
        }

        let mut entries = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let id = get_i64(&mut buf, "entry id")?;
            let pointer = get_address(&mut buf, "entry pointer")?;
            entries.push(IndexKey { id, pointer });
        }

        Ok(Self {
            address,
            local_depth,
            entries,
        })
    }
}
