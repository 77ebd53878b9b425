//! Record Store Scan
//!
//! Sequential iteration over all slots in log order.

use crate::arena::Address;
use crate::error::Result;

use super::log::RecordStore;
use super::{Slot, HEADER_SIZE, SLOT_PREFIX_SIZE};

/// Iterator over record slots, live and dead, in append order
///
/// Stops after the slot count captured when the scan started, or at the
/// first error.
pub struct Scan<'a> {
    store: &'a RecordStore,
    /// Offset of the next slot to read
    next_offset: u64,
    /// Slots still to be yielded
    remaining: u32,
}

impl<'a> Scan<'a> {
    pub(super) fn new(store: &'a RecordStore, slot_count: u32) -> Self {
        Self {
            store,
            next_offset: HEADER_SIZE,
            remaining: slot_count,
        }
    }

    /// Keep only live slots
    pub fn live(self) -> impl Iterator<Item = Result<Slot>> + 'a {
        self.filter(|slot| match slot {
            Ok(slot) => slot.is_alive(),
            Err(_) => true,
        })
    }
}

impl<'a> Iterator for Scan<'a> {
    type Item = Result<Slot>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }

        let state = self.store.read_state();
        match self.store.read_slot(&state, Address::new(self.next_offset)) {
            Ok(slot) => {
                self.next_offset += SLOT_PREFIX_SIZE + slot.payload.len() as u64;
                self.remaining -= 1;
                Some(Ok(slot))
            }
            Err(e) => {
                self.remaining = 0;
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}
