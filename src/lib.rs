//! # dexstore
//!
//! An embedded record store with interchangeable secondary indexes:
//! - Append-only record log with in-place tombstones
//! - Persisted B-tree / B+ tree index with leaf chaining for range scans
//! - Persisted extendible hash index
//! - Arena-style slot allocation with reclaimed-slot reuse
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Engine                             │
//! │          (CRUD facade, single writer / many readers)        │
//! └──────────────┬──────────────────────────────┬───────────────┘
//!                │ log first                    │ then index
//!                ▼                              ▼
//!        ┌──────────────┐            ┌────────────────────┐
//!        │ RecordStore  │            │  SecondaryIndex    │
//!        │ (append log) │──scan────▶ │  OrderedIndex      │
//!        └──────────────┘ bulk load  │  or HashIndex      │
//!                                    └────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod arena;
mod codec;
pub mod store;
pub mod index;
pub mod catalog;
pub mod engine;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{DexError, Result};
pub use config::{Config, IndexKind};
pub use arena::Address;
pub use store::{Record, RecordStore};
pub use index::{bulk_load, HashIndex, IndexKey, OrderedIndex, SecondaryIndex, TreeVariant};
pub use engine::Engine;

// =============================================================================
// Version Info
// =============================================================================

/// Current version of dexstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
