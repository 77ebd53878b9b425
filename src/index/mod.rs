//! Index Module
//!
//! Secondary indexes mapping a record id to the address of its live slot in
//! the record log.
//!
//! ## Structures
//! - [`OrderedIndex`]: persisted multiway tree, B-tree or B+tree flavour
//! - [`HashIndex`]: extendible hashing, directory + buckets
//!
//! Both are rebuilt from scratch with [`bulk_load`] and maintained
//! incrementally afterwards. Callers always write the record log first and
//! then feed the returned address to the index.

mod hash;
mod tree;

use crate::arena::Address;
use crate::config::IndexKind;
use crate::error::Result;
use crate::store::Slot;

pub use hash::{BucketInfo, HashIndex, MAX_GLOBAL_DEPTH};
pub use tree::{OrderedIndex, TreeVariant};

/// Entry stored by every index: record id → record log address
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexKey {
    pub id: i64,
    pub pointer: Address,
}

impl IndexKey {
    pub fn new(id: i64, pointer: Address) -> Self {
        Self { id, pointer }
    }

    /// Filler for unused key slots on disk
    pub(crate) const EMPTY: IndexKey = IndexKey {
        id: -1,
        pointer: Address::NULL,
    };
}

/// Shape summary returned by a successful structural check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexStats {
    pub kind: IndexKind,
    /// Keys reachable through the index
    pub entries: u64,
    /// Tree height, or global depth for hashing
    pub depth: u64,
    /// Distinct nodes or buckets in use
    pub units: u64,
    /// Reclaimed slots waiting for reuse
    pub free_units: u64,
}

/// Operations shared by every index structure
///
/// Every method is safe to call from several threads: lookups share a read
/// lock, mutations are exclusive.
pub trait SecondaryIndex: Send + Sync {
    /// Add a key; fails with `DuplicateKey` if the id is already present
    fn insert(&self, key: IndexKey) -> Result<()>;

    /// Address of the record with `id`
    fn find(&self, id: i64) -> Result<Address>;

    /// Remove `id`, returning the address it pointed at
    fn delete(&self, id: i64) -> Result<Address>;

    /// Repoint `id` at a new record address
    fn update_pointer(&self, id: i64, address: Address) -> Result<()>;

    /// Keys with `lo <= id <= hi` in ascending order
    fn range(&self, lo: i64, hi: i64) -> Result<Vec<IndexKey>>;

    /// Check every structural invariant
    fn verify(&self) -> Result<IndexStats>;

    fn kind(&self) -> IndexKind;
}

/// Counters reported by [`bulk_load`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkLoadStats {
    /// Slots read from the source
    pub scanned: u64,
    /// Live slots inserted into the index
    pub indexed: u64,
    /// Tombstoned slots passed over
    pub skipped: u64,
}

/// Build `index` from a sequential pass over record slots
///
/// Accepts anything yielding slots in the shape [`RecordStore::scan`]
/// produces; dead slots are skipped.
///
/// [`RecordStore::scan`]: crate::store::RecordStore::scan
pub fn bulk_load<I, S>(index: &I, slots: S) -> Result<BulkLoadStats>
where
    I: SecondaryIndex + ?Sized,
    S: IntoIterator<Item = Result<Slot>>,
{
    let mut stats = BulkLoadStats::default();

    for slot in slots {
        let slot = slot?;
        stats.scanned += 1;

        if !slot.is_alive() {
            stats.skipped += 1;
            continue;
        }

        let id = slot.record_id()?;
        index.insert(IndexKey::new(i64::from(id), slot.address))?;
        stats.indexed += 1;
    }

    tracing::info!(
        kind = %index.kind(),
        scanned = stats.scanned,
        indexed = stats.indexed,
        skipped = stats.skipped,
        "Bulk load complete"
    );

    Ok(stats)
}
