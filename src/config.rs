//! Configuration for dexstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{DexError, Result};

/// Smallest tree order that still leaves room for a split
pub const MIN_TREE_ORDER: u64 = 3;

/// Largest tree order; keeps one node slot near 1.5 MiB
pub const MAX_TREE_ORDER: u64 = 1 << 16;

/// Largest hash load factor; keeps one bucket slot near 1 MiB
pub const MAX_HASH_LOAD_FACTOR: u64 = 1 << 16;

/// Which secondary index structure maps record ids to log addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexKind {
    /// Multiway tree, keys live in every level, no leaf chain
    BTree,

    /// Multiway tree, data only in chained leaves
    BPlusTree,

    /// Extendible hashing directory + buckets
    Hash,
}

impl IndexKind {
    /// Whether the index can answer range queries
    pub fn is_ordered(self) -> bool {
        !matches!(self, IndexKind::Hash)
    }
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IndexKind::BTree => "btree",
            IndexKind::BPlusTree => "bplus",
            IndexKind::Hash => "hash",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for IndexKind {
    type Err = DexError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "btree" | "b-tree" => Ok(IndexKind::BTree),
            "bplus" | "bplustree" | "b+tree" => Ok(IndexKind::BPlusTree),
            "hash" => Ok(IndexKind::Hash),
            other => Err(DexError::InvalidConfig(format!("unknown index kind '{}'", other))),
        }
    }
}

/// Main configuration for a dexstore instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── records.db       (append-only record log)
    ///     ├── catalog.bin      (active index + parameters)
    ///     └── index/           (tree or hash files)
    pub data_dir: PathBuf,

    /// fsync the record log after every mutation
    pub sync_on_write: bool,

    // -------------------------------------------------------------------------
    // Index Configuration
    // -------------------------------------------------------------------------
    /// Index structure built over the record log
    pub index_kind: IndexKind,

    /// Maximum children per tree node
    pub tree_order: u64,

    /// Maximum entries per hash bucket
    pub hash_load_factor: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./dexstore_data"),
            sync_on_write: false,
            index_kind: IndexKind::BPlusTree,
            tree_order: 8,
            hash_load_factor: 8,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject parameters the index structures cannot work with
    pub fn validate(&self) -> Result<()> {
        validate_tree_order(self.tree_order)?;
        validate_load_factor(self.hash_load_factor)
    }
}

pub(crate) fn validate_tree_order(order: u64) -> Result<()> {
    if !(MIN_TREE_ORDER..=MAX_TREE_ORDER).contains(&order) {
        return Err(DexError::InvalidConfig(format!(
            "tree order must be between {} and {}, got {}",
            MIN_TREE_ORDER, MAX_TREE_ORDER, order
        )));
    }
    Ok(())
}

pub(crate) fn validate_load_factor(load_factor: u64) -> Result<()> {
    if !(1..=MAX_HASH_LOAD_FACTOR).contains(&load_factor) {
        return Err(DexError::InvalidConfig(format!(
            "hash load factor must be between 1 and {}, got {}",
            MAX_HASH_LOAD_FACTOR, load_factor
        )));
    }
    Ok(())
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// fsync the record log after every mutation
    pub fn sync_on_write(mut self, sync: bool) -> Self {
        self.config.sync_on_write = sync;
        self
    }

    /// Set the index structure
    pub fn index_kind(mut self, kind: IndexKind) -> Self {
        self.config.index_kind = kind;
        self
    }

    /// Set the tree order (max children per node)
    pub fn tree_order(mut self, order: u64) -> Self {
        self.config.tree_order = order;
        self
    }

    /// Set the hash bucket load factor
    pub fn hash_load_factor(mut self, load_factor: u64) -> Self {
        self.config.hash_load_factor = load_factor;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
