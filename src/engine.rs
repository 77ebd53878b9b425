//! Engine Module
//!
//! CRUD facade over one record log and the secondary index built on it.
//!
//! ## Responsibilities
//! - Open or create the record log, catalog and index under `data_dir`
//! - Bulk-load a fresh index from the log on first open
//! - Keep the index in step with every log mutation
//! - Rebuild the index (possibly as a different kind) on demand
//!
//! ## Layout
//! ```text
//! {data_dir}/
//!   ├── records.db
//!   ├── catalog.bin
//!   ├── index.tmp/   (only while an index is being built)
//!   └── index/
//!         ├── btree.hdr + btree.nodes          (B-tree)
//!         ├── bplustree.hdr + bplustree.nodes  (B+ tree)
//!         └── hash.dir + hash.buckets          (extendible hashing)
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::arena::Address;
use crate::catalog::Catalog;
use crate::config::{Config, IndexKind};
use crate::error::{DexError, Result};
use crate::index::{
    bulk_load, BulkLoadStats, HashIndex, IndexKey, IndexStats, OrderedIndex, SecondaryIndex, TreeVariant,
};
use crate::store::{Record, RecordStore};

/// Result of [`Engine::verify`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyReport {
    pub index: IndexStats,
    /// Live slots found by a full log scan
    pub live_records: u64,
    /// Slots in the log, live or dead
    pub slots: u32,
}

/// The storage engine
///
/// ## Concurrency Model: Single-Writer / Multiple-Reader
///
/// - **Writes** (create/update/delete/rebuild): serialized by `write_lock`,
///   then log first, index second
/// - **Reads** (read/range/scan): no write_lock; the log and the index each
///   guard themselves with an internal RwLock
/// - `index` itself sits behind a RwLock only so `rebuild_index` can swap it
pub struct Engine {
    config: Config,
    store: RecordStore,
    catalog: RwLock<Catalog>,
    index: RwLock<Box<dyn SecondaryIndex>>,
    write_lock: Mutex<()>,
}

impl Engine {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const RECORDS_FILENAME: &'static str = "records.db";
    const CATALOG_FILENAME: &'static str = "catalog.bin";
    const INDEX_DIR: &'static str = "index";
    const STAGING_DIR: &'static str = "index.tmp";
    const HASH_DIRECTORY_FILENAME: &'static str = "hash.dir";
    const HASH_BUCKETS_FILENAME: &'static str = "hash.buckets";

    /// Open or create an engine with the given config
    ///
    /// On startup:
    /// 1. Open/create the record log
    /// 2. Read the catalog; it wins over `config` for index parameters
    /// 3. Open the catalogued index, or build one from a log scan
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        fs::create_dir_all(&config.data_dir)?;

        let store = RecordStore::open_with(&config.data_dir.join(Self::RECORDS_FILENAME), config.sync_on_write)?;
        let catalog_path = config.data_dir.join(Self::CATALOG_FILENAME);
        let index_dir = config.data_dir.join(Self::INDEX_DIR);
        let loaded = Catalog::load(&catalog_path)?;

        let (catalog, index) = match loaded {
            Some(catalog) if Self::index_exists(&index_dir, catalog.index_kind) => {
                if catalog != Catalog::from_config(&config) {
                    tracing::info!(
                        kind = %catalog.index_kind,
                        "Catalog overrides configured index parameters"
                    );
                }
                (catalog, Self::open_index(&index_dir, catalog.index_kind)?)
            }
            // First open, or the index files are gone: rebuild from the log
            _ => {
                let catalog = loaded.unwrap_or_else(|| Catalog::from_config(&config));
                let (index, _) = Self::build_index(&config.data_dir, &store, &catalog)?;
                catalog.store(&catalog_path)?;
                (catalog, index)
            }
        };

        tracing::info!(
            data_dir = %config.data_dir.display(),
            kind = %catalog.index_kind,
            slots = store.slot_count(),
            "Engine opened"
        );

        Ok(Self {
            config,
            store,
            catalog: RwLock::new(catalog),
            index: RwLock::new(index),
            write_lock: Mutex::new(()),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    // =========================================================================
    // CRUD
    // =========================================================================

    /// Store a new record; its id must not be indexed yet
    pub fn create(&self, record: &Record) -> Result<Address> {
        let _write_guard = self.write_lock.lock();
        let index = self.index.read();
        let id = i64::from(record.id);

        match index.find(id) {
            Ok(_) => return Err(DexError::DuplicateKey(id)),
            Err(DexError::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let address = self.store.append(&record.encode())?;
        index.insert(IndexKey::new(id, address))?;
        Ok(address)
    }

    /// Fetch the live record with `id`
    pub fn read(&self, id: u32) -> Result<Record> {
        let index = self.index.read();
        let address = index.find(i64::from(id))?;
        self.load_live(id, address)
    }

    /// Replace the record with the same id; returns its new address
    pub fn update(&self, record: &Record) -> Result<Address> {
        let _write_guard = self.write_lock.lock();
        let index = self.index.read();
        let id = i64::from(record.id);

        let old = index.find(id)?;
        let address = self.store.replace(old, &record.encode())?;
        index.update_pointer(id, address)?;
        Ok(address)
    }

    /// Tombstone the record with `id` and drop it from the index
    pub fn delete(&self, id: u32) -> Result<()> {
        let _write_guard = self.write_lock.lock();
        let index = self.index.read();
        let key = i64::from(id);

        let address = index.find(key)?;
        self.store.mark_tombstone(address)?;
        index.delete(key)?;
        Ok(())
    }

    /// Live records with `lo <= id <= hi`, ascending; ordered indexes only
    pub fn range(&self, lo: u32, hi: u32) -> Result<Vec<Record>> {
        let index = self.index.read();
        index
            .range(i64::from(lo), i64::from(hi))?
            .into_iter()
            .map(|key| self.load_live(key.id as u32, key.pointer))
            .collect()
    }

    /// Every live record in log order, without touching the index
    pub fn scan_live(&self) -> Result<Vec<Record>> {
        self.store
            .scan()
            .live()
            .map(|slot| Record::decode(&slot?.payload))
            .collect()
    }

    fn load_live(&self, id: u32, address: Address) -> Result<Record> {
        let slot = self.store.read_at(address)?;
        if !slot.is_alive() {
            tracing::warn!(id, %address, "Index entry points at a tombstoned slot");
            return Err(DexError::NotFound(i64::from(id)));
        }
        Record::decode(&slot.payload)
    }

    // =========================================================================
    // Maintenance
    // =========================================================================

    /// Throw the current index away and bulk-load a new one of `kind`
    pub fn rebuild_index(&self, kind: IndexKind) -> Result<BulkLoadStats> {
        let _write_guard = self.write_lock.lock();
        let mut index = self.index.write();
        let mut catalog = self.catalog.write();

        let next = catalog.with_kind(kind);
        let (rebuilt, stats) = Self::build_index(&self.config.data_dir, &self.store, &next)?;

        next.store(&self.catalog_path())?;
        *index = rebuilt;
        *catalog = next;

        tracing::info!(kind = %kind, indexed = stats.indexed, "Index rebuilt");
        Ok(stats)
    }

    /// Check the index structure and that it covers exactly the live records
    pub fn verify(&self) -> Result<VerifyReport> {
        let _write_guard = self.write_lock.lock();
        let stats = self.index.read().verify()?;
        let live_records = self.store.count_live()?;

        if stats.entries != live_records {
            return Err(DexError::corruption(format!(
                "index holds {} entries but the log has {} live records",
                stats.entries, live_records
            )));
        }

        Ok(VerifyReport {
            index: stats,
            live_records,
            slots: self.store.slot_count(),
        })
    }

    /// Sync the record log to disk and close
    pub fn close(self) -> Result<()> {
        self.store.sync()
    }

    // =========================================================================
    // Index construction
    // =========================================================================

    /// Bulk-load a fresh index under `index.tmp/`, then move it into `index/`
    ///
    /// The live index files are only replaced once the load has succeeded.
    fn build_index(
        data_dir: &Path,
        store: &RecordStore,
        catalog: &Catalog,
    ) -> Result<(Box<dyn SecondaryIndex>, BulkLoadStats)> {
        let staging = data_dir.join(Self::STAGING_DIR);
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }

        let loaded = Self::create_index(&staging, catalog)
            .and_then(|index| bulk_load(index.as_ref(), store.scan()));
        let stats = match loaded {
            Ok(stats) => stats,
            Err(e) => {
                tracing::warn!(kind = %catalog.index_kind, error = %e, "Index build failed, live index kept");
                if staging.exists() {
                    if let Err(cleanup) = fs::remove_dir_all(&staging) {
                        tracing::warn!(error = %cleanup, "Failed to remove staging index directory");
                    }
                }
                return Err(e);
            }
        };

        let index_dir = data_dir.join(Self::INDEX_DIR);
        fs::create_dir_all(&index_dir)?;
        for entry in fs::read_dir(&staging)? {
            let entry = entry?;
            fs::rename(entry.path(), index_dir.join(entry.file_name()))?;
        }
        fs::remove_dir(&staging)?;

        Ok((Self::open_index(&index_dir, catalog.index_kind)?, stats))
    }

    fn index_exists(index_dir: &Path, kind: IndexKind) -> bool {
        match kind {
            IndexKind::BTree => OrderedIndex::exists(index_dir, TreeVariant::BTree),
            IndexKind::BPlusTree => OrderedIndex::exists(index_dir, TreeVariant::BPlusTree),
            IndexKind::Hash => {
                index_dir.join(Self::HASH_DIRECTORY_FILENAME).exists()
                    && index_dir.join(Self::HASH_BUCKETS_FILENAME).exists()
            }
        }
    }

    fn open_index(index_dir: &Path, kind: IndexKind) -> Result<Box<dyn SecondaryIndex>> {
        let index: Box<dyn SecondaryIndex> = match kind {
            IndexKind::BTree => Box::new(OrderedIndex::open(index_dir, TreeVariant::BTree)?),
            IndexKind::BPlusTree => Box::new(OrderedIndex::open(index_dir, TreeVariant::BPlusTree)?),
            IndexKind::Hash => Box::new(HashIndex::open(&index_dir.join(Self::HASH_DIRECTORY_FILENAME))?),
        };
        Ok(index)
    }

    fn create_index(index_dir: &Path, catalog: &Catalog) -> Result<Box<dyn SecondaryIndex>> {
        let index: Box<dyn SecondaryIndex> = match catalog.index_kind {
            IndexKind::BTree => Box::new(OrderedIndex::create(index_dir, TreeVariant::BTree, catalog.tree_order)?),
            IndexKind::BPlusTree => Box::new(OrderedIndex::create(
                index_dir,
                TreeVariant::BPlusTree,
                catalog.tree_order,
            )?),
            IndexKind::Hash => Box::new(HashIndex::create(
                &index_dir.join(Self::HASH_DIRECTORY_FILENAME),
                &index_dir.join(Self::HASH_BUCKETS_FILENAME),
                catalog.hash_load_factor,
            )?),
        };
        Ok(index)
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Active index description
    pub fn catalog(&self) -> Catalog {
        *self.catalog.read()
    }

    pub fn index_kind(&self) -> IndexKind {
        self.catalog.read().index_kind
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    fn catalog_path(&self) -> PathBuf {
        self.config.data_dir.join(Self::CATALOG_FILENAME)
    }
}
