//! Tests for directory growth, bucket splits and bucket merges
//!
//! These tests verify:
//! - Doubling, redistribution and aliasing on a full bucket
//! - Splits without doubling once local depth trails global depth
//! - Emptied buckets fold into their buddy and feed the garbage list
//! - Directory file contents and reopen

use dexstore::index::SecondaryIndex;
use dexstore::{DexError, HashIndex};

use super::{create_hash, key, pointer_for, setup_temp_hash};

#[test]
fn test_create_starts_with_two_buckets() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 2);

    assert_eq!(hash.global_depth(), 1);
    assert_eq!(hash.load_factor(), 2);

    let slots = hash.directory();
    assert_eq!(slots.len(), 2);
    assert_ne!(slots[0], slots[1]);
    assert_eq!(hash.slot(0).unwrap().local_depth, 1);
    assert_eq!(hash.slot(1).unwrap().local_depth, 1);

    let stats = hash.verify().unwrap();
    assert_eq!(stats.units, 2);
    assert_eq!(stats.entries, 0);
}

#[test]
fn test_full_bucket_doubles_directory() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 2);
    let untouched = hash.directory()[1];

    hash.insert(key(0)).unwrap();
    assert_eq!(ids(&hash, 0), vec![0]);

    hash.insert(key(2)).unwrap();
    assert_eq!(ids(&hash, 0), vec![0, 2]);
    assert_eq!(hash.global_depth(), 1);

    hash.insert(key(4)).unwrap();
    assert_eq!(hash.global_depth(), 2);
    assert_eq!(ids(&hash, 0), vec![0, 4]);
    assert_eq!(ids(&hash, 2), vec![2]);
    assert_eq!(hash.slot(0).unwrap().local_depth, 2);
    assert_eq!(hash.slot(2).unwrap().local_depth, 2);

    // Odd slots still alias the original sibling
    let slots = hash.directory();
    assert_eq!(slots.len(), 4);
    assert_eq!(slots[1], untouched);
    assert_eq!(slots[3], untouched);
    assert_eq!(hash.slot(3).unwrap().local_depth, 1);

    let stats = hash.verify().unwrap();
    assert_eq!(stats.depth, 2);
    assert_eq!(stats.units, 3);
    assert_eq!(stats.entries, 3);
}

#[test]
fn test_split_below_global_depth_does_not_double() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 2);

    for id in [0, 2, 4] {
        hash.insert(key(id)).unwrap();
    }
    // Odd bucket still has depth 1 under a depth-2 directory
    hash.insert(key(1)).unwrap();
    hash.insert(key(3)).unwrap();
    hash.insert(key(5)).unwrap();

    assert_eq!(hash.global_depth(), 2);
    assert_eq!(ids(&hash, 1), vec![1, 5]);
    assert_eq!(ids(&hash, 3), vec![3]);
    assert_ne!(hash.directory()[1], hash.directory()[3]);
    hash.verify().unwrap();
}

#[test]
fn test_skewed_ids_keep_splitting_until_room() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 2);

    for id in [0, 1024, 2048] {
        hash.insert(key(id)).unwrap();
    }

    // Bit 10 is the first one separating 1024 from 0
    assert_eq!(hash.global_depth(), 11);
    assert_eq!(ids(&hash, 0), vec![0, 2048]);
    assert_eq!(ids(&hash, 1024), vec![1024]);
    hash.verify().unwrap();
}

#[test]
fn test_empty_bucket_folds_into_buddy() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 2);

    for id in [0, 2, 4] {
        hash.insert(key(id)).unwrap();
    }
    let survivor = hash.directory()[0];

    let removed = hash.delete(2).unwrap();
    assert_eq!(removed.pointer, pointer_for(2));

    let slots = hash.directory();
    assert_eq!(slots.len(), 4, "directory never shrinks");
    assert_eq!(slots[0], survivor);
    assert_eq!(slots[2], survivor);
    assert_eq!(hash.slot(2).unwrap().local_depth, 1);

    let stats = hash.verify().unwrap();
    assert_eq!(stats.units, 2);
    assert_eq!(stats.free_units, 1);
}

#[test]
fn test_garbage_bucket_is_reused_by_next_split() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 2);

    for id in [0, 2, 4] {
        hash.insert(key(id)).unwrap();
    }
    hash.delete(2).unwrap();
    let len = std::fs::metadata(&buckets).unwrap().len();

    hash.insert(key(6)).unwrap();

    assert_eq!(std::fs::metadata(&buckets).unwrap().len(), len);
    assert_eq!(ids(&hash, 2), vec![6]);
    assert_eq!(ids(&hash, 0), vec![0, 4]);
    let stats = hash.verify().unwrap();
    assert_eq!(stats.free_units, 0);
    assert_eq!(stats.units, 3);
}

#[test]
fn test_initial_buckets_fold_to_depth_zero() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 2);

    hash.insert(key(1)).unwrap();
    hash.delete(1).unwrap();

    let slots = hash.directory();
    assert_eq!(slots[0], slots[1]);
    assert_eq!(hash.slot(0).unwrap().local_depth, 0);
    assert_eq!(hash.verify().unwrap().units, 1);

    // Everything lands in the one bucket until it fills
    hash.insert(key(7)).unwrap();
    hash.insert(key(8)).unwrap();
    assert_eq!(ids(&hash, 0), vec![7, 8]);
    hash.insert(key(9)).unwrap();
    hash.verify().unwrap();
    assert_eq!(hash.find(9).unwrap().pointer, pointer_for(9));
}

#[test]
fn test_delete_compacts_remaining_entries() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 4);

    for id in [0, 2, 4, 6] {
        hash.insert(key(id)).unwrap();
    }
    hash.delete(2).unwrap();

    assert_eq!(ids(&hash, 0), vec![0, 4, 6]);
}

#[test]
fn test_directory_file_names_bucket_file_relatively() {
    let (_temp, directory, buckets) = setup_temp_hash();
    create_hash(&directory, &buckets, 3);

    let raw = std::fs::read(&directory).unwrap();
    let name = b"hash.buckets";
    assert_eq!(&raw[0..4], &(name.len() as u32).to_le_bytes());
    assert_eq!(&raw[4..4 + name.len()], name);

    // Capacity is the load factor plus one slack slot
    let at = 4 + name.len();
    assert_eq!(&raw[at..at + 8], &4i64.to_le_bytes());
    assert_eq!(&raw[at + 8..at + 16], &(16i64 + 4 * 16).to_le_bytes());
    assert_eq!(&raw[at + 16..at + 24], &1i64.to_le_bytes());
}

#[test]
fn test_reopen_restores_directory_and_garbage() {
    let (_temp, directory, buckets) = setup_temp_hash();

    let before = {
        let hash = create_hash(&directory, &buckets, 2);
        for id in 0..40 {
            hash.insert(key(id)).unwrap();
        }
        for id in (0..40).filter(|id| id % 4 == 2) {
            hash.delete(id).unwrap();
        }
        (hash.directory(), hash.verify().unwrap())
    };

    let hash = HashIndex::open(&directory).unwrap();
    assert_eq!(hash.directory(), before.0);
    assert_eq!(hash.verify().unwrap(), before.1);
    assert_eq!(hash.load_factor(), 2);

    for id in 0..40 {
        let found = hash.find(id);
        if id % 4 == 2 {
            assert!(matches!(found, Err(DexError::NotFound(_))));
        } else {
            assert_eq!(found.unwrap().pointer, pointer_for(id));
        }
    }
}

#[test]
fn test_moved_folder_reopens_through_relative_path() {
    let (temp, directory, buckets) = setup_temp_hash();
    {
        let hash = create_hash(&directory, &buckets, 2);
        hash.insert(key(5)).unwrap();
    }

    let moved = temp.path().join("moved");
    std::fs::create_dir(&moved).unwrap();
    std::fs::rename(&directory, moved.join("hash.dir")).unwrap();
    std::fs::rename(&buckets, moved.join("hash.buckets")).unwrap();

    let hash = HashIndex::open(&moved.join("hash.dir")).unwrap();
    assert_eq!(hash.find(5).unwrap().pointer, pointer_for(5));
}

#[test]
fn test_oversized_capacity_in_directory_is_corruption() {
    let (_temp, directory, buckets) = setup_temp_hash();
    create_hash(&directory, &buckets, 2);

    let mut raw = std::fs::read(&directory).unwrap();
    let at = 4 + b"hash.buckets".len();
    raw[at..at + 8].copy_from_slice(&i64::MAX.to_le_bytes());
    std::fs::write(&directory, &raw).unwrap();

    assert!(matches!(HashIndex::open(&directory), Err(DexError::Corruption(_))));
}

#[test]
fn test_slot_past_directory_end_names_the_slot() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 2);

    match hash.slot(2) {
        Err(DexError::Unsupported(msg)) => assert!(msg.contains("slot 2")),
        other => panic!("expected Unsupported, got {:?}", other),
    }
}

#[test]
fn test_range_is_unsupported() {
    let (_temp, directory, buckets) = setup_temp_hash();
    let hash = create_hash(&directory, &buckets, 2);
    let index: &dyn SecondaryIndex = &hash;

    assert!(matches!(index.range(0, 10), Err(DexError::Unsupported(_))));
}

fn ids(hash: &HashIndex, slot: usize) -> Vec<i64> {
    hash.slot(slot).unwrap().entries.iter().map(|e| e.id).collect()
}
