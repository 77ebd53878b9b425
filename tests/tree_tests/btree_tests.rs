//! Tests for the B-tree variant
//!
//! These tests verify:
//! - Middle-key splits and root growth
//! - Internal-node deletes through the in-order predecessor
//! - Merges, root collapse and node slot reuse
//! - Pruned in-order range scans

use dexstore::index::{OrderedIndex, TreeVariant};
use dexstore::DexError;

use super::{key, pointer_for, setup_temp_index};

#[test]
fn test_leaf_split_promotes_middle_key() {
    let (_temp, dir) = setup_temp_index();
    let tree = OrderedIndex::create(&dir, TreeVariant::BTree, 3).unwrap();

    tree.insert(key(10)).unwrap();
    tree.insert(key(20)).unwrap();
    assert_eq!(tree.levels().unwrap(), vec![vec![vec![10, 20]]]);

    tree.insert(key(30)).unwrap();
    assert_eq!(
        tree.levels().unwrap(),
        vec![vec![vec![20]], vec![vec![10], vec![30]]]
    );

    let stats = tree.verify().unwrap();
    assert_eq!(stats.depth, 2);
    assert_eq!(stats.units, 3);
    assert_eq!(stats.entries, 3);
}

#[test]
fn test_find_hits_key_stored_in_internal_node() {
    let (_temp, dir) = setup_temp_index();
    let tree = OrderedIndex::create(&dir, TreeVariant::BTree, 3).unwrap();

    for id in [10, 20, 30] {
        tree.insert(key(id)).unwrap();
    }

    // 20 lives only in the root
    let found = tree.find(20).unwrap();
    assert_eq!(found.pointer, pointer_for(20));
}

#[test]
fn test_duplicate_in_internal_node_is_rejected() {
    let (_temp, dir) = setup_temp_index();
    let tree = OrderedIndex::create(&dir, TreeVariant::BTree, 3).unwrap();

    for id in [10, 20, 30] {
        tree.insert(key(id)).unwrap();
    }

    let err = tree.insert(key(20)).unwrap_err();
    assert!(matches!(err, DexError::DuplicateKey(20)));
    assert_eq!(tree.verify().unwrap().entries, 3);
}

#[test]
fn test_delete_internal_key_merges_and_collapses_root() {
    let (_temp, dir) = setup_temp_index();
    let tree = OrderedIndex::create(&dir, TreeVariant::BTree, 3).unwrap();

    for id in [10, 20, 30] {
        tree.insert(key(id)).unwrap();
    }

    let removed = tree.delete(20).unwrap();
    assert_eq!(removed.id, 20);
    assert_eq!(removed.pointer, pointer_for(20));

    assert_eq!(tree.levels().unwrap(), vec![vec![vec![10, 30]]]);
    let stats = tree.verify().unwrap();
    assert_eq!(stats.depth, 1);
    assert_eq!(stats.units, 1);
    assert_eq!(stats.free_units, 2);

    assert!(matches!(tree.find(20), Err(DexError::NotFound(20))));
    assert_eq!(tree.find(10).unwrap().pointer, pointer_for(10));
    assert_eq!(tree.find(30).unwrap().pointer, pointer_for(30));
}

#[test]
fn test_freed_nodes_are_reused_before_file_grows() {
    let (_temp, dir) = setup_temp_index();
    let tree = OrderedIndex::create(&dir, TreeVariant::BTree, 3).unwrap();
    let nodes_path = dir.join("btree.nodes");

    for id in [10, 20, 30] {
        tree.insert(key(id)).unwrap();
    }
    let grown = std::fs::metadata(&nodes_path).unwrap().len();

    tree.delete(20).unwrap();
    tree.insert(key(20)).unwrap();

    assert_eq!(std::fs::metadata(&nodes_path).unwrap().len(), grown);
    let stats = tree.verify().unwrap();
    assert_eq!(stats.free_units, 0);
    assert_eq!(stats.units, 3);
}

#[test]
fn test_borrow_from_sibling_keeps_height() {
    let (_temp, dir) = setup_temp_index();
    let tree = OrderedIndex::create(&dir, TreeVariant::BTree, 3).unwrap();

    // root [20], leaves [10] and [30, 40]
    for id in [10, 20, 30, 40] {
        tree.insert(key(id)).unwrap();
    }
    assert_eq!(
        tree.levels().unwrap(),
        vec![vec![vec![20]], vec![vec![10], vec![30, 40]]]
    );

    tree.delete(10).unwrap();

    assert_eq!(
        tree.levels().unwrap(),
        vec![vec![vec![30]], vec![vec![20], vec![40]]]
    );
    assert_eq!(tree.verify().unwrap().depth, 2);
}

#[test]
fn test_range_walks_keys_in_order() {
    let (_temp, dir) = setup_temp_index();
    let tree = OrderedIndex::create(&dir, TreeVariant::BTree, 4).unwrap();

    for id in super::shuffled(100, 3) {
        tree.insert(key(id)).unwrap();
    }

    let ids: Vec<i64> = tree.range(17, 42).unwrap().iter().map(|k| k.id).collect();
    assert_eq!(ids, (17..=42).collect::<Vec<_>>());

    assert_eq!(tree.range(0, 99).unwrap().len(), 100);
    assert!(tree.range(50, 10).unwrap().is_empty());
    assert!(tree.range(200, 300).unwrap().is_empty());
}
