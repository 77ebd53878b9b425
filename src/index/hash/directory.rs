//! Directory file layout and slot arithmetic
//!
//! ```text
//! ┌─────────────┬─────────────────┐
//! │ PathLen (4) │ BucketPath      │
//! ├─────────────┴─────────────────┤
//! │ Capacity (8)                  │
//! │ BucketSize (8)                │
//! │ GlobalDepth (8)               │
//! │ DirLen (8)                    │
//! │ Slot (8) × DirLen             │
//! │ GarbageLen (8)                │
//! │ Garbage (8) × GarbageLen      │
//! └───────────────────────────────┘
//! ```

use bytes::{BufMut, BytesMut};

use crate::arena::Address;
use crate::codec::{get_address, get_bytes, get_len, get_u32};
use crate::config::MAX_HASH_LOAD_FACTOR;
use crate::error::{DexError, Result};

use super::bucket::Bucket;
use super::MAX_GLOBAL_DEPTH;

/// `2^global_depth` bucket addresses, possibly aliased
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct Directory {
    pub(super) global_depth: u32,
    pub(super) slots: Vec<Address>,
}

impl Directory {
    pub(super) fn new(global_depth: u32, slots: Vec<Address>) -> Self {
        Self { global_depth, slots }
    }

    /// Directory slot for `id`: its low `global_depth` bits
    pub(super) fn slot_of(&self, id: i64) -> usize {
        low_bits(id, self.global_depth) as usize
    }

    pub(super) fn bucket_of(&self, id: i64) -> Address {
        self.slots[self.slot_of(id)]
    }

    /// Add one bit of depth; slot `i + old_len` aliases slot `i`
    pub(super) fn double(&mut self) -> Result<()> {
        if self.global_depth >= MAX_GLOBAL_DEPTH {
            return Err(DexError::CapacityExceeded(format!(
                "directory already at global depth {}",
                self.global_depth
            )));
        }
        self.slots.extend_from_within(..);
        self.global_depth += 1;
        Ok(())
    }

    /// Point every slot whose low `depth` bits equal `pattern` at `bucket`
    pub(super) fn repoint(&mut self, pattern: u64, depth: u32, bucket: Address) {
        for (slot, address) in self.slots.iter_mut().enumerate() {
            if low_bits(slot as i64, depth) == pattern {
                *address = bucket;
            }
        }
    }
}

/// Low `depth` bits of `value`, two's complement for negative ids
pub(super) fn low_bits(value: i64, depth: u32) -> u64 {
    let mask = if depth >= 64 { u64::MAX } else { (1u64 << depth) - 1 };
    (value as u64) & mask
}

/// Everything the directory file holds
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) struct DirectoryImage {
    /// Bucket file name as stored, relative to the directory file's folder
    pub(super) bucket_path: String,
    /// Entries per bucket slot, load factor + 1
    pub(super) capacity: u64,
    pub(super) directory: Directory,
    pub(super) garbage: Vec<Address>,
}

impl DirectoryImage {
    pub(super) fn encode(&self) -> Result<BytesMut> {
        let path = self.bucket_path.as_bytes();
        let mut buf = BytesMut::with_capacity(
            4 + path.len() + 40 + 8 * (self.directory.slots.len() + self.garbage.len()),
        );

        buf.put_u32_le(path.len() as u32);
        buf.put_slice(path);
        buf.put_i64_le(self.capacity as i64);
        buf.put_i64_le(Bucket::encoded_size(self.capacity)? as i64);
        buf.put_i64_le(i64::from(self.directory.global_depth));

        buf.put_i64_le(self.directory.slots.len() as i64);
        for address in &self.directory.slots {
            buf.put_i64_le(address.to_disk());
        }

        buf.put_i64_le(self.garbage.len() as i64);
        for address in &self.garbage {
            buf.put_i64_le(address.to_disk());
        }
        Ok(buf)
    }

    pub(super) fn decode(mut buf: &[u8]) -> Result<Self> {
        let path_len = get_u32(&mut buf, "bucket path length")? as usize;
        let path = get_bytes(&mut buf, path_len, "bucket path")?;
        let bucket_path = String::from_utf8(path)
            .map_err(|_| DexError::corruption("bucket path is not valid UTF-8"))?;

        let capacity = get_len(&mut buf, "capacity")?;
        if !(2..=MAX_HASH_LOAD_FACTOR + 1).contains(&capacity) {
            return Err(DexError::corruption(format!("bucket capacity {} is out of range", capacity)));
        }
        let bucket_size = get_len(&mut buf, "bucket size")?;
        if bucket_size != Bucket::encoded_size(capacity)? {
            return Err(DexError::corruption(format!(
                "bucket size {} does not match capacity {}",
                bucket_size, capacity
            )));
        }

        let global_depth = get_len(&mut buf, "global depth")?;
        if global_depth == 0 || global_depth > u64::from(MAX_GLOBAL_DEPTH) {
            return Err(DexError::corruption(format!("invalid global depth {}", global_depth)));
        }
        let global_depth = global_depth as u32;

        let dir_len = get_len(&mut buf, "directory length")?;
        if dir_len != 1u64 << global_depth {
            return Err(DexError::corruption(format!(
                "directory holds {} slots at global depth {}",
                dir_len, global_depth
            )));
        }
        let mut slots = Vec::with_capacity(dir_len as usize);
        for _ in 0..dir_len {
            slots.push(get_address(&mut buf, "directory slot")?);
        }

        let garbage_len = get_len(&mut buf, "garbage list length")?;
        let mut garbage = Vec::new();
        for _ in 0..garbage_len {
            garbage.push(get_address(&mut buf, "garbage entry")?);
        }

        Ok(Self {
            bucket_path,
            capacity,
            directory: Directory::new(global_depth, slots),
            garbage,
        })
    }
}
