//! Engine integration tests

mod lifecycle_tests;

use dexstore::{Config, Engine, IndexKind};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

pub fn config_for(temp_dir: &TempDir, kind: IndexKind) -> Config {
    Config::builder()
        .data_dir(temp_dir.path())
        .index_kind(kind)
        .tree_order(4)
        .hash_load_factor(2)
        .build()
}

pub fn setup_temp_engine(kind: IndexKind) -> (TempDir, Engine) {
    let temp_dir = TempDir::new().unwrap();
    let engine = Engine::open(config_for(&temp_dir, kind)).unwrap();
    (temp_dir, engine)
}

pub const ALL_KINDS: [IndexKind; 3] = [IndexKind::BTree, IndexKind::BPlusTree, IndexKind::Hash];
