//! Record Store
//!
//! Owns the record log file and the slot counter in its header.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::arena::{read_exact_at, write_all_at, Address};
use crate::error::{DexError, Result};

use super::scan::Scan;
use super::{Slot, Tombstone, HEADER_SIZE, SLOT_PREFIX_SIZE};

/// Append-only log of tombstone-deletable records
///
/// ## Concurrency:
/// - `state`: RwLock; appends and tombstones take the write side, reads and
///   scan steps take the read side
/// - File access is positional, so shared readers never move a cursor
pub struct RecordStore {
    path: PathBuf,
    file: File,
    state: RwLock<LogState>,
    sync_on_write: bool,
}

#[derive(Debug, Clone, Copy)]
pub(super) struct LogState {
    /// Slots physically written, live or dead
    pub(super) slot_count: u32,
    /// End-of-file offset; next append lands here
    pub(super) end: u64,
}

impl RecordStore {
    /// Open or create a record log
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with(path, false)
    }

    /// Open or create a record log, optionally fsyncing after every mutation
    pub fn open_with(path: &Path, sync_on_write: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(path)?;

        let mut len = file.metadata()?.len();
        if len == 0 {
            write_all_at(&file, &0u32.to_le_bytes(), 0)?;
            file.sync_all()?;
            len = HEADER_SIZE;
        } else if len < HEADER_SIZE {
            return Err(DexError::corruption(format!(
                "record log {} is {} bytes, shorter than its header",
                path.display(),
                len
            )));
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        read_exact_at(&file, &mut header, 0)?;
        let slot_count = u32::from_le_bytes(header);

        tracing::debug!(
            path = %path.display(),
            slot_count,
            bytes = len,
            "Opened record log"
        );

        Ok(Self {
            path: path.to_path_buf(),
            file,
            state: RwLock::new(LogState {
                slot_count,
                end: len,
            }),
            sync_on_write,
        })
    }

    /// Append a payload as a new live slot and return its address
    ///
    /// Not atomic across a crash: the slot bytes and the header counter are
    /// two separate writes.
    pub fn append(&self, payload: &[u8]) -> Result<Address> {
        let declared_len = u32::try_from(payload.len())
            .ok()
            .and_then(|n| n.checked_add(4))
            .ok_or(DexError::PayloadTooLarge(payload.len()))?;

        let mut state = self.state.write();
        let slot_count = state.slot_count.checked_add(1).ok_or_else(|| {
            DexError::CapacityExceeded("record log slot counter overflow".to_string())
        })?;

        let address = Address::new(state.end);

        let mut slot = Vec::with_capacity(SLOT_PREFIX_SIZE as usize + payload.len());
        slot.extend_from_slice(&Tombstone::Alive.to_disk().to_le_bytes());
        slot.extend_from_slice(&declared_len.to_le_bytes());
        slot.extend_from_slice(payload);

        write_all_at(&self.file, &slot, state.end)?;
        write_all_at(&self.file, &slot_count.to_le_bytes(), 0)?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }

        state.end += slot.len() as u64;
        state.slot_count = slot_count;

        tracing::trace!(%address, len = payload.len(), "Appended record");
        Ok(address)
    }

    /// Read the slot starting at `address`
    pub fn read_at(&self, address: Address) -> Result<Slot> {
        let state = self.state.read();
        self.read_slot(&state, address)
    }

    /// Flag the slot at `address` as dead; repeating it is harmless
    pub fn mark_tombstone(&self, address: Address) -> Result<()> {
        let state = self.state.write();
        // Validates that `address` really starts a slot before writing to it
        self.read_prefix(&state, address)?;

        write_all_at(
            &self.file,
            &Tombstone::Dead.to_disk().to_le_bytes(),
            address.offset(),
        )?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }

        tracing::trace!(%address, "Marked tombstone");
        Ok(())
    }

    /// Logical update: tombstone the old slot, append the new payload
    ///
    /// The caller must repoint its index entry at the returned address.
    pub fn replace(&self, old: Address, payload: &[u8]) -> Result<Address> {
        self.mark_tombstone(old)?;
        self.append(payload)
    }

    /// Lazy walk over every slot written before this call
    ///
    /// Must not be interleaved with appends from the same caller; each step
    /// re-reads under the shared lock but the slot count is fixed at start.
    pub fn scan(&self) -> Scan<'_> {
        let state = self.state.read();
        Scan::new(self, state.slot_count)
    }

    /// Number of slots whose tombstone is alive
    pub fn count_live(&self) -> Result<u64> {
        let mut live = 0;
        for slot in self.scan() {
            if slot?.is_alive() {
                live += 1;
            }
        }
        Ok(live)
    }

    /// Slots written so far, including dead ones
    pub fn slot_count(&self) -> u32 {
        self.state.read().slot_count
    }

    /// Current size of the log file in bytes
    pub fn len_bytes(&self) -> u64 {
        self.state.read().end
    }

    /// Force all written slots to disk
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Internal Helpers
    // =========================================================================

    pub(super) fn read_state(&self) -> parking_lot::RwLockReadGuard<'_, LogState> {
        self.state.read()
    }

    /// Parse the tombstone/length prefix and bounds-check the payload
    fn read_prefix(&self, state: &LogState, address: Address) -> Result<(Tombstone, u64)> {
        if address.is_null()
            || address.offset() < HEADER_SIZE
            || address.offset() + SLOT_PREFIX_SIZE > state.end
        {
            return Err(DexError::corruption(format!(
                "slot address {} outside record log of {} bytes",
                address, state.end
            )));
        }

        let mut prefix = [0u8; SLOT_PREFIX_SIZE as usize];
        read_exact_at(&self.file, &mut prefix, address.offset())?;

        let tombstone = Tombstone::from_disk(u32::from_le_bytes([
            prefix[0], prefix[1], prefix[2], prefix[3],
        ]))?;
        let declared_len = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);

        if declared_len < 4 {
            return Err(DexError::corruption(format!(
                "slot {} declares length {}, below the minimum of 4",
                address, declared_len
            )));
        }
        let payload_len = u64::from(declared_len - 4);

        if address.offset() + SLOT_PREFIX_SIZE + payload_len > state.end {
            return Err(DexError::corruption(format!(
                "slot {} declares {} payload bytes past end of log ({} bytes)",
                address, payload_len, state.end
            )));
        }

        Ok((tombstone, payload_len))
    }

    pub(super) fn read_slot(&self, state: &LogState, address: Address) -> Result<Slot> {
        let (tombstone, payload_len) = self.read_prefix(state, address)?;

        let mut payload = vec![0u8; payload_len as usize];
        read_exact_at(
            &self.file,
            &mut payload,
            address.offset() + SLOT_PREFIX_SIZE,
        )?;

        Ok(Slot {
            address,
            tombstone,
            payload,
        })
    }
}
