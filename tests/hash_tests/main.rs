//! Hash index integration tests

mod directory_tests;

use std::path::{Path, PathBuf};

use dexstore::{Address, HashIndex, IndexKey};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

pub fn setup_temp_hash() -> (TempDir, PathBuf, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let directory = temp_dir.path().join("hash.dir");
    let buckets = temp_dir.path().join("hash.buckets");
    (temp_dir, directory, buckets)
}

pub fn create_hash(directory: &Path, buckets: &Path, load_factor: u64) -> HashIndex {
    HashIndex::create(directory, buckets, load_factor).unwrap()
}

pub fn pointer_for(id: i64) -> Address {
    Address::new(4 + (id.unsigned_abs()) * 16)
}

pub fn key(id: i64) -> IndexKey {
    IndexKey::new(id, pointer_for(id))
}

/// `0..n` in a fixed pseudo-random order
pub fn shuffled(n: i64, seed: u64) -> Vec<i64> {
    let mut ids: Vec<i64> = (0..n).collect();
    let mut state = seed;
    for i in (1..ids.len()).rev() {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let j = (state >> 33) as usize % (i + 1);
        ids.swap(i, j);
    }
    ids
}
