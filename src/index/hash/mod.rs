//! Hash Index
//!
//! Extendible hashing over record ids. A directory of `2^global_depth` slots
//! points into a file of fixed-size buckets; slot `i` serves the ids whose low
//! `global_depth` bits equal `i`. A bucket with local depth `d` is shared by
//! every slot agreeing on the low `d` bits.
//!
//! ## Insert
//! A full bucket splits on bit `d`: the directory doubles first when
//! `d == global_depth`, a bucket is taken from the garbage list (or appended),
//! entries with bit `d` set move over and both halves get depth `d + 1`.
//! Splitting repeats until the id's bucket has room.
//!
//! ## Delete
//! An emptied bucket folds into its buddy (the slot differing in bit `d - 1`)
//! when the buddy has the same local depth. The emptied slot joins the
//! garbage list; the directory never shrinks.
//!
//! ## Files
//! - directory file: rewritten after every change, see directory.rs
//! - bucket file: fixed-size bucket slots, see bucket.rs

mod bucket;
mod directory;

use std::collections::{HashMap, HashSet};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::arena::{read_exact_at, write_all_at, Address, SlotAllocator};
use crate::config::{validate_load_factor, IndexKind};
use crate::error::{DexError, Result};

use super::{IndexKey, IndexStats, SecondaryIndex};
use bucket::Bucket;
use directory::{low_bits, Directory, DirectoryImage};

/// Deepest directory the index will grow to
pub const MAX_GLOBAL_DEPTH: u32 = 32;

/// Public view of one bucket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BucketInfo {
    pub address: Address,
    pub local_depth: u32,
    pub entries: Vec<IndexKey>,
}

/// Persisted extendible hash table
///
/// ## Concurrency:
/// - `inner`: RwLock; `find` and `verify` share it, anything touching
///   buckets, the directory or the garbage list holds it exclusively
pub struct HashIndex {
    directory_path: PathBuf,
    inner: RwLock<HashInner>,
}

struct HashInner {
    /// Bucket path exactly as recorded in the directory file
    bucket_name: String,
    capacity: u64,
    directory: Directory,
    directory_file: File,
    bucket_file: File,
    /// Free list of this allocator is the garbage list
    allocator: SlotAllocator,
}

impl HashIndex {
    /// Create an empty table: global depth 1, two buckets of depth 1
    ///
    /// Any existing files at either path are replaced.
    pub fn create(directory_path: &Path, bucket_path: &Path, load_factor: u64) -> Result<Self> {
        validate_load_factor(load_factor)?;
        for path in [directory_path, bucket_path] {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
        }

        let bucket_name = stored_bucket_name(directory_path, bucket_path)?;
        let capacity = load_factor + 1;
        let directory_file = open_file(directory_path, true)?;
        let bucket_file = open_file(bucket_path, true)?;
        let allocator = SlotAllocator::new(Bucket::encoded_size(capacity)?, 0, Vec::new())?;

        let mut inner = HashInner {
            bucket_name,
            capacity,
            directory: Directory::new(1, Vec::new()),
            directory_file,
            bucket_file,
            allocator,
        };
        for _ in 0..2 {
            let bucket = Bucket::new(inner.allocator.alloc(), 1);
            inner.write_bucket(&bucket)?;
            inner.directory.slots.push(bucket.address);
        }
        inner.persist_directory()?;

        tracing::debug!(
            path = %directory_path.display(),
            load_factor,
            "Created hash index"
        );

        Ok(Self {
            directory_path: directory_path.to_path_buf(),
            inner: RwLock::new(inner),
        })
    }

    /// Reload the directory and reopen the bucket file it names
    pub fn open(directory_path: &Path) -> Result<Self> {
        let raw = fs::read(directory_path)?;
        let image = DirectoryImage::decode(&raw)?;

        let bucket_path = resolve_bucket_path(directory_path, &image.bucket_path);
        let directory_file = open_file(directory_path, false)?;
        let bucket_file = open_file(&bucket_path, false)?;
        let bucket_len = bucket_file.metadata()?.len();
        let allocator = SlotAllocator::new(Bucket::encoded_size(image.capacity)?, bucket_len, image.garbage)?;

        if let Some(bad) = image.directory.slots.iter().find(|a| !allocator.is_slot(**a)) {
            return Err(DexError::corruption(format!(
                "directory slot points at {}, not a bucket in {}",
                bad,
                bucket_path.display()
            )));
        }

        tracing::debug!(
            path = %directory_path.display(),
            global_depth = image.directory.global_depth,
            load_factor = image.capacity - 1,
            "Opened hash index"
        );

        Ok(Self {
            directory_path: directory_path.to_path_buf(),
            inner: RwLock::new(HashInner {
                bucket_name: image.bucket_path,
                capacity: image.capacity,
                directory: image.directory,
                directory_file,
                bucket_file,
                allocator,
            }),
        })
    }

    pub fn insert(&self, key: IndexKey) -> Result<()> {
        self.inner.write().insert(key)
    }

    pub fn find(&self, id: i64) -> Result<IndexKey> {
        let inner = self.inner.read();
        let bucket = inner.read_bucket(inner.directory.bucket_of(id))?;
        bucket
            .position(id)
            .map(|pos| bucket.entries[pos])
            .ok_or(DexError::NotFound(id))
    }

    pub fn delete(&self, id: i64) -> Result<IndexKey> {
        self.inner.write().delete(id)
    }

    pub fn update_pointer(&self, id: i64, pointer: Address) -> Result<()> {
        let inner = self.inner.write();
        let mut bucket = inner.read_bucket(inner.directory.bucket_of(id))?;
        let pos = bucket.position(id).ok_or(DexError::NotFound(id))?;
        bucket.entries[pos].pointer = pointer;
        inner.write_bucket(&bucket)
    }

    pub fn verify(&self) -> Result<IndexStats> {
        self.inner.read().verify()
    }

    /// Entries a bucket holds before it must split
    pub fn load_factor(&self) -> u64 {
        self.inner.read().load_factor()
    }

    pub fn global_depth(&self) -> u32 {
        self.inner.read().directory.global_depth
    }

    /// Bucket addresses per directory slot, aliases included
    pub fn directory(&self) -> Vec<Address> {
        self.inner.read().directory.slots.clone()
    }

    /// Bucket served by directory slot `slot`
    pub fn slot(&self, slot: usize) -> Result<BucketInfo> {
        let inner = self.inner.read();
        let address = inner.directory.slots.get(slot).copied().ok_or_else(|| {
            DexError::Unsupported(format!(
                "directory slot {} is out of range for {} slots",
                slot,
                inner.directory.slots.len()
            ))
        })?;
        let bucket = inner.read_bucket(address)?;
        Ok(BucketInfo {
            address: bucket.address,
            local_depth: bucket.local_depth,
            entries: bucket.entries,
        })
    }

    pub fn directory_path(&self) -> &Path {
        &self.directory_path
    }
}

impl SecondaryIndex for HashIndex {
    fn insert(&self, key: IndexKey) -> Result<()> {
        HashIndex::insert(self, key)
    }

    fn find(&self, id: i64) -> Result<Address> {
        HashIndex::find(self, id).map(|k| k.pointer)
    }

    fn delete(&self, id: i64) -> Result<Address> {
        HashIndex::delete(self, id).map(|k| k.pointer)
    }

    fn update_pointer(&self, id: i64, address: Address) -> Result<()> {
        HashIndex::update_pointer(self, id, address)
    }

    fn range(&self, _lo: i64, _hi: i64) -> Result<Vec<IndexKey>> {
        Err(DexError::Unsupported("range scan over a hash index".to_string()))
    }

    fn verify(&self) -> Result<IndexStats> {
        HashIndex::verify(self)
    }

    fn kind(&self) -> IndexKind {
        IndexKind::Hash
    }
}

/// Bucket path relative to the directory file's folder when it lives there
fn stored_bucket_name(directory_path: &Path, bucket_path: &Path) -> Result<String> {
    let stored = match directory_path.parent() {
        Some(parent) => bucket_path.strip_prefix(parent).unwrap_or(bucket_path),
        None => bucket_path,
    };
    stored
        .to_str()
        .map(str::to_owned)
        .ok_or_else(|| DexError::InvalidConfig(format!("bucket path {} is not UTF-8", bucket_path.display())))
}

fn resolve_bucket_path(directory_path: &Path, stored: &str) -> PathBuf {
    let stored = Path::new(stored);
    match directory_path.parent() {
        Some(parent) if stored.is_relative() => parent.join(stored),
        _ => stored.to_path_buf(),
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
// Bucket I/O and directory bookkeeping
// =============================================================================

impl HashInner {
    fn load_factor(&self) -> u64 {
        self.capacity - 1
    }

    fn read_bucket(&self, address: Address) -> Result<Bucket> {
        if !self.allocator.is_slot(address) {
            return Err(DexError::corruption(format!("bucket address {} is not a slot", address)));
        }
        let mut buf = vec![0u8; self.allocator.slot_size() as usize];
        read_exact_at(&self.bucket_file, &mut buf, address.offset())?;
        Bucket::decode(address, &buf, self.capacity)
    }

    fn write_bucket(&self, bucket: &Bucket) -> Result<()> {
        let buf = bucket.encode(self.capacity)?;
        write_all_at(&self.bucket_file, &buf, bucket.address.offset())?;
        Ok(())
    }

    fn persist_directory(&self) -> Result<()> {
        let image = DirectoryImage {
            bucket_path: self.bucket_name.clone(),
            capacity: self.capacity,
            directory: self.directory.clone(),
            garbage: self.allocator.free_slots().collect(),
        };
        let buf = image.encode()?;
        write_all_at(&self.directory_file, &buf, 0)?;
        self.directory_file.set_len(buf.len() as u64)?;
        Ok(())
    }

    // =========================================================================
    // Mutations
    // =========================================================================

    fn insert(&mut self, key: IndexKey) -> Result<()> {
        loop {
            let mut bucket = self.read_bucket(self.directory.bucket_of(key.id))?;
            if bucket.position(key.id).is_some() {
                return Err(DexError::DuplicateKey(key.id));
            }

            if (bucket.entries.len() as u64) < self.load_factor() {
                bucket.entries.push(key);
                return self.write_bucket(&bucket);
            }

            let pattern = low_bits(key.id, bucket.local_depth);
            self.split(bucket, pattern)?;
        }
    }

    /// Split a full bucket whose slots share the low bits `pattern`
    fn split(&mut self, mut bucket: Bucket, pattern: u64) -> Result<()> {
        let depth = bucket.local_depth;
        if depth == self.directory.global_depth {
            self.directory.double()?;
            tracing::debug!(global_depth = self.directory.global_depth, "Hash directory doubled");
        }

        let mut sibling = Bucket::new(self.allocator.alloc(), depth + 1);
        bucket.local_depth = depth + 1;
        let (moved, kept): (Vec<IndexKey>, Vec<IndexKey>) = bucket
            .entries
            .drain(..)
            .partition(|e| ((e.id as u64) >> depth) & 1 == 1);
        sibling.entries = moved;
        bucket.entries = kept;

        let sibling_pattern = pattern | (1u64 << depth);
        self.directory.repoint(sibling_pattern, depth + 1, sibling.address);

        self.write_bucket(&sibling)?;
        self.write_bucket(&bucket)?;
        self.persist_directory()?;

        tracing::debug!(
            bucket = %bucket.address,
            sibling = %sibling.address,
            local_depth = depth + 1,
            "Split hash bucket"
        );
        Ok(())
    }

    fn delete(&mut self, id: i64) -> Result<IndexKey> {
        let slot = self.directory.slot_of(id);
        let mut bucket = self.read_bucket(self.directory.slots[slot])?;
        let pos = bucket.position(id).ok_or(DexError::NotFound(id))?;

        // Vec::remove keeps the survivors contiguous
        let removed = bucket.entries.remove(pos);
        self.write_bucket(&bucket)?;

        if bucket.entries.is_empty() {
            self.fold_into_buddy(bucket, slot)?;
        }
        Ok(removed)
    }

    /// Hand an empty bucket's slots to its buddy and reclaim it
    fn fold_into_buddy(&mut self, bucket: Bucket, slot: usize) -> Result<()> {
        let depth = bucket.local_depth;
        if depth == 0 {
            return Ok(());
        }

        let buddy_slot = slot ^ (1usize << (depth - 1));
        let mut buddy = self.read_bucket(self.directory.slots[buddy_slot])?;
        if buddy.address == bucket.address || buddy.local_depth != depth {
            return Ok(());
        }

        buddy.local_depth = depth - 1;
        self.directory
            .repoint(low_bits(slot as i64, depth - 1), depth - 1, buddy.address);
        self.write_bucket(&buddy)?;
        self.allocator.free(bucket.address);
        self.persist_directory()?;

        tracing::debug!(
            freed = %bucket.address,
            into = %buddy.address,
            local_depth = depth - 1,
            "Merged empty hash bucket"
        );
        Ok(())
    }

    // =========================================================================
    // Audit
    // =========================================================================

    fn verify(&self) -> Result<IndexStats> {
        let global = self.directory.global_depth;
        if self.directory.slots.len() as u64 != 1u64 << global {
            return Err(DexError::corruption(format!(
                "directory holds {} slots at global depth {}",
                self.directory.slots.len(),
                global
            )));
        }

        let mut aliases: HashMap<Address, u64> = HashMap::new();
        let mut buckets: HashMap<Address, (usize, Bucket)> = HashMap::new();
        let mut seen_ids = HashSet::new();
        let mut entries = 0u64;

        for (slot, address) in self.directory.slots.iter().enumerate() {
            *aliases.entry(*address).or_default() += 1;

            match buckets.get(address) {
                Some((first, bucket)) => {
                    // Every alias must agree with the first slot on the bucket's prefix
                    let depth = bucket.local_depth;
                    if low_bits(slot as i64, depth) != low_bits(*first as i64, depth) {
                        return Err(DexError::corruption(format!(
                            "slot {} aliases bucket {} outside its depth-{} prefix",
                            slot, address, depth
                        )));
                    }
                }
                None => {
                    let bucket = self.read_bucket(*address)?;
                    self.check_bucket(&bucket, slot)?;
                    for entry in &bucket.entries {
                        if !seen_ids.insert(entry.id) {
                            return Err(DexError::corruption(format!("id {} stored twice", entry.id)));
                        }
                    }
                    entries += bucket.entries.len() as u64;
                    buckets.insert(*address, (slot, bucket));
                }
            }
        }

        for (address, (_, bucket)) in &buckets {
            let expected = 1u64 << (global - bucket.local_depth);
            if aliases[address] != expected {
                return Err(DexError::corruption(format!(
                    "bucket {} at depth {} has {} directory slots, expected {}",
                    address, bucket.local_depth, aliases[address], expected
                )));
            }
        }

        if let Some(live) = self.allocator.free_slots().find(|a| buckets.contains_key(a)) {
            return Err(DexError::corruption(format!("garbage list holds live bucket {}", live)));
        }

        Ok(IndexStats {
            kind: IndexKind::Hash,
            entries,
            depth: u64::from(global),
            units: buckets.len() as u64,
            free_units: self.allocator.free_count() as u64,
        })
    }

    fn check_bucket(&self, bucket: &Bucket, slot: usize) -> Result<()> {
        if bucket.local_depth > self.directory.global_depth {
            return Err(DexError::corruption(format!(
                "bucket {} local depth {} exceeds global depth {}",
                bucket.address, bucket.local_depth, self.directory.global_depth
            )));
        }
        if bucket.entries.len() as u64 > self.load_factor() {
            return Err(DexError::corruption(format!(
                "bucket {} holds {} entries, load factor is {}",
                bucket.address,
                bucket.entries.len(),
                self.load_factor()
            )));
        }

        let pattern = low_bits(slot as i64, bucket.local_depth);
        if let Some(stray) = bucket
            .entries
            .iter()
            .find(|e| low_bits(e.id, bucket.local_depth) != pattern)
        {
            return Err(DexError::corruption(format!(
                "id {} sits in bucket {} for prefix {:#b}",
                stray.id, bucket.address, pattern
            )));
        }
        Ok(())
    }
}
