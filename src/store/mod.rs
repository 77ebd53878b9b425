//! Record Store Module
//!
//! Append-only log of variable-length records; the ground truth of all data.
//!
//! ## Responsibilities
//! - Append records at end-of-file and hand back their address
//! - Read a slot at an address
//! - Logically delete a slot by flipping its tombstone in place
//! - Sequential scan for index rebuilds
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Header                                  │
//! │ ┌─────────────────┐                     │
//! │ │ SlotCount (4)   │                     │
//! │ └─────────────────┘                     │
//! ├─────────────────────────────────────────┤
//! │ Slot 1                                  │
//! │ ┌───────────────┬─────────┬───────────┐ │
//! │ │ Tombstone (4) │ Len (4) │ Payload   │ │
//! │ └───────────────┴─────────┴───────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Slot 2 ...                              │
//! └─────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. `Len` is the payload size plus 4.

mod log;
mod record;
mod scan;

pub use log::RecordStore;
pub use record::{Record, Slot, Tombstone};
pub use scan::Scan;

/// Header size: SlotCount (4)
pub const HEADER_SIZE: u64 = 4;

/// Per-slot prefix: Tombstone (4) + Len (4)
pub const SLOT_PREFIX_SIZE: u64 = 8;
