//! Arena addressing for fixed-slot files
//!
//! Every on-disk structure refers to other structures by byte offset. Offsets
//! are wrapped in [`Address`] so they cannot be mixed up with ids or lengths,
//! and slot reuse goes through an explicit [`SlotAllocator`] owned by the
//! structure that reclaims the slots.

use std::collections::VecDeque;
use std::fmt;
use std::fs::File;
use std::io;

use crate::error::{DexError, Result};

/// Byte offset of a record, node or bucket inside its backing file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(u64);

impl Address {
    /// Sentinel for "no address"; stored as -1 on disk
    pub const NULL: Address = Address(u64::MAX);

    pub const fn new(offset: u64) -> Self {
        Address(offset)
    }

    pub fn offset(self) -> u64 {
        self.0
    }

    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    /// Encoding used by every 64-bit address field on disk
    pub(crate) fn to_disk(self) -> i64 {
        if self.is_null() {
            -1
        } else {
            self.0 as i64
        }
    }

    pub(crate) fn from_disk(raw: i64) -> Result<Self> {
        match raw {
            -1 => Ok(Self::NULL),
            r if r < 0 => Err(DexError::corruption(format!("negative address {}", r))),
            r => Ok(Address(r as u64)),
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            f.write_str("null")
        } else {
            write!(f, "@{:#x}", self.0)
        }
    }
}

/// Hands out fixed-size slots in a file, reusing reclaimed ones first
///
/// The free list is FIFO: the oldest reclaimed slot is reused first.
#[derive(Debug)]
pub(crate) struct SlotAllocator {
    slot_size: u64,
    /// First byte past the last slot ever handed out
    end: u64,
    free: VecDeque<Address>,
}

impl SlotAllocator {
    pub(crate) fn new(slot_size: u64, end: u64, free: Vec<Address>) -> Result<Self> {
        if end % slot_size != 0 {
            return Err(DexError::corruption(format!(
                "file length {} is not a multiple of slot size {}",
                end, slot_size
            )));
        }
        let allocator = Self {
            slot_size,
            end,
            free: free.into(),
        };
        if let Some(bad) = allocator.free.iter().find(|a| !allocator.is_slot(**a)) {
            return Err(DexError::corruption(format!("free list holds invalid slot {}", bad)));
        }
        Ok(allocator)
    }

    /// Take a slot; the caller must write it before releasing its lock
    pub(crate) fn alloc(&mut self) -> Address {
        match self.free.pop_front() {
            Some(address) => address,
            None => {
                let address = Address::new(self.end);
                self.end += self.slot_size;
                address
            }
        }
    }

    pub(crate) fn free(&mut self, address: Address) {
        debug_assert!(self.is_slot(address));
        self.free.push_back(address);
    }

    pub(crate) fn free_slots(&self) -> impl Iterator<Item = Address> + '_ {
        self.free.iter().copied()
    }

    pub(crate) fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Whether `address` is the start of a slot that has been handed out
    pub(crate) fn is_slot(&self, address: Address) -> bool {
        !address.is_null() && address.offset() < self.end && address.offset() % self.slot_size == 0
    }

    pub(crate) fn slot_size(&self) -> u64 {
        self.slot_size
    }
}

// =============================================================================
// Positional I/O
// =============================================================================
//
// All files are read and written at explicit offsets so that readers holding a
// shared lock never race on a file cursor.

#[cfg(unix)]
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.read_exact_at(buf, offset)
}

#[cfg(unix)]
pub(crate) fn write_all_at(file: &File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
pub(crate) fn read_exact_at(file: &File, mut buf: &mut [u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_read(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "failed to fill whole buffer",
                ))
            }
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[cfg(windows)]
pub(crate) fn write_all_at(file: &File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "failed to write whole buffer",
                ))
            }
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
