//! Tests for Engine lifecycle and index maintenance
//!
//! These tests verify:
//! - Reopen attaches to the catalogued index
//! - Missing index files are rebuilt from the record log
//! - rebuild_index switches index kinds
//! - bulk_load over a record scan
//! - Config validation

use dexstore::catalog::Catalog;
use dexstore::config::{MAX_HASH_LOAD_FACTOR, MAX_TREE_ORDER};
use dexstore::{bulk_load, Config, DexError, Engine, HashIndex, IndexKind, OrderedIndex, Record, RecordStore, TreeVariant};
use tempfile::TempDir;

use super::{config_for, setup_temp_engine, ALL_KINDS};

#[test]
fn test_reopen_preserves_records() {
    for kind in ALL_KINDS {
        let temp_dir = TempDir::new().unwrap();
        {
            let engine = Engine::open(config_for(&temp_dir, kind)).unwrap();
            for id in 0..50u32 {
                engine.create(&Record::new(id, format!("v{}", id))).unwrap();
            }
            engine.delete(10).unwrap();
            engine.update(&Record::new(20, "changed")).unwrap();
            engine.close().unwrap();
        }

        let engine = Engine::open(config_for(&temp_dir, kind)).unwrap();
        assert_eq!(engine.index_kind(), kind);
        assert!(matches!(engine.read(10), Err(DexError::NotFound(10))));
        assert_eq!(engine.read(20).unwrap().body, b"changed");
        assert_eq!(engine.read(49).unwrap().body, b"v49");
        assert_eq!(engine.verify().unwrap().live_records, 49);
    }
}

#[test]
fn test_catalog_wins_over_config_on_reopen() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir, IndexKind::Hash)).unwrap();
        engine.create(&Record::new(1, "one")).unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir, IndexKind::BTree)).unwrap();

    assert_eq!(engine.index_kind(), IndexKind::Hash);
    assert_eq!(engine.config().index_kind, IndexKind::BTree);
    assert_eq!(engine.read(1).unwrap().body, b"one");
}

#[test]
fn test_catalog_file_written_on_first_open() {
    let (temp_dir, engine) = setup_temp_engine(IndexKind::BTree);

    let catalog = Catalog::load(&temp_dir.path().join("catalog.bin")).unwrap().unwrap();

    assert_eq!(catalog, engine.catalog());
    assert_eq!(catalog.index_kind, IndexKind::BTree);
    assert_eq!(catalog.tree_order, 4);
    assert_eq!(catalog.hash_load_factor, 2);
}

#[test]
fn test_missing_index_is_rebuilt_from_log() {
    let temp_dir = TempDir::new().unwrap();
    {
        let engine = Engine::open(config_for(&temp_dir, IndexKind::BPlusTree)).unwrap();
        for id in 0..30u32 {
            engine.create(&Record::new(id, "x")).unwrap();
        }
        engine.delete(4).unwrap();
    }
    std::fs::remove_dir_all(temp_dir.path().join("index")).unwrap();

    let engine = Engine::open(config_for(&temp_dir, IndexKind::Hash)).unwrap();

    // Kind comes from the surviving catalog
    assert_eq!(engine.index_kind(), IndexKind::BPlusTree);
    assert_eq!(engine.range(0, 5).unwrap().len(), 5);
    assert_eq!(engine.verify().unwrap().index.entries, 29);
}

#[test]
fn test_first_open_indexes_existing_log() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = RecordStore::open(&temp_dir.path().join("records.db")).unwrap();
        for id in [3u32, 1, 2] {
            store.append(&Record::new(id, "pre").encode()).unwrap();
        }
        let dead = store.append(&Record::new(9, "dead").encode()).unwrap();
        store.mark_tombstone(dead).unwrap();
    }

    let engine = Engine::open(config_for(&temp_dir, IndexKind::BTree)).unwrap();

    assert_eq!(engine.read(2).unwrap().body, b"pre");
    assert!(matches!(engine.read(9), Err(DexError::NotFound(9))));
    let report = engine.verify().unwrap();
    assert_eq!(report.index.entries, 3);
    assert_eq!(report.slots, 4);
}

#[test]
fn test_rebuild_switches_kind() {
    let (temp_dir, engine) = setup_temp_engine(IndexKind::Hash);
    for id in 0..40u32 {
        engine.create(&Record::new(id, "r")).unwrap();
    }
    for id in (0..40u32).step_by(5) {
        engine.delete(id).unwrap();
    }

    let stats = engine.rebuild_index(IndexKind::BTree).unwrap();

    assert_eq!(stats.scanned, 40);
    assert_eq!(stats.indexed, 32);
    assert_eq!(stats.skipped, 8);
    assert_eq!(engine.index_kind(), IndexKind::BTree);
    assert_eq!(engine.range(0, 9).unwrap().len(), 8);
    engine.verify().unwrap();
    drop(engine);

    let engine = Engine::open(config_for(&temp_dir, IndexKind::Hash)).unwrap();
    assert_eq!(engine.index_kind(), IndexKind::BTree);
    assert_eq!(engine.verify().unwrap().index.entries, 32);
}

#[test]
fn test_rebuild_same_kind_compacts_index() {
    let (_temp, engine) = setup_temp_engine(IndexKind::BPlusTree);
    for id in 0..100u32 {
        engine.create(&Record::new(id, "r")).unwrap();
    }
    for id in 0..90u32 {
        engine.delete(id).unwrap();
    }
    assert!(engine.verify().unwrap().index.free_units > 0);

    engine.rebuild_index(IndexKind::BPlusTree).unwrap();

    let report = engine.verify().unwrap();
    assert_eq!(report.index.free_units, 0);
    assert_eq!(report.index.entries, 10);
    assert_eq!(engine.read(95).unwrap().body, b"r");
}

#[test]
fn test_bulk_load_into_each_index() {
    let temp_dir = TempDir::new().unwrap();
    let store = RecordStore::open(&temp_dir.path().join("records.db")).unwrap();
    let mut addresses = Vec::new();
    for id in 0..25u32 {
        addresses.push(store.append(&Record::new(id, "b").encode()).unwrap());
    }
    store.mark_tombstone(addresses[7]).unwrap();
    store.mark_tombstone(addresses[8]).unwrap();

    let btree = OrderedIndex::create(&temp_dir.path().join("b"), TreeVariant::BTree, 3).unwrap();
    let bplus = OrderedIndex::create(&temp_dir.path().join("p"), TreeVariant::BPlusTree, 5).unwrap();
    let hash = HashIndex::create(
        &temp_dir.path().join("h").join("hash.dir"),
        &temp_dir.path().join("h").join("hash.buckets"),
        2,
    )
    .unwrap();

    for stats in [
        bulk_load(&btree, store.scan()).unwrap(),
        bulk_load(&bplus, store.scan()).unwrap(),
        bulk_load(&hash, store.scan()).unwrap(),
    ] {
        assert_eq!(stats.scanned, 25);
        assert_eq!(stats.indexed, 23);
        assert_eq!(stats.skipped, 2);
    }

    assert_eq!(btree.find(12).unwrap().pointer, addresses[12]);
    assert_eq!(bplus.find(24).unwrap().pointer, addresses[24]);
    assert_eq!(hash.find(0).unwrap().pointer, addresses[0]);
    assert!(matches!(hash.find(7), Err(DexError::NotFound(7))));
    assert_eq!(btree.verify().unwrap().entries, 23);
    assert_eq!(bplus.verify().unwrap().entries, 23);
}

#[test]
fn test_invalid_config_is_rejected() {
    let temp_dir = TempDir::new().unwrap();

    let small_order = Config::builder().data_dir(temp_dir.path()).tree_order(2).build();
    assert!(matches!(Engine::open(small_order), Err(DexError::InvalidConfig(_))));

    let empty_buckets = Config::builder().data_dir(temp_dir.path()).hash_load_factor(0).build();
    assert!(matches!(Engine::open(empty_buckets), Err(DexError::InvalidConfig(_))));
}

#[test]
fn test_parameters_above_limits_are_rejected() {
    let temp_dir = TempDir::new().unwrap();

    for order in [MAX_TREE_ORDER + 1, u64::MAX] {
        let config = Config::builder().data_dir(temp_dir.path()).tree_order(order).build();
        assert!(matches!(config.validate(), Err(DexError::InvalidConfig(_))));
        assert!(matches!(Engine::open(config), Err(DexError::InvalidConfig(_))));
    }
    for load_factor in [MAX_HASH_LOAD_FACTOR + 1, u64::MAX] {
        let config = Config::builder()
            .data_dir(temp_dir.path())
            .index_kind(IndexKind::Hash)
            .hash_load_factor(load_factor)
            .build();
        assert!(matches!(config.validate(), Err(DexError::InvalidConfig(_))));
        assert!(matches!(Engine::open(config), Err(DexError::InvalidConfig(_))));
    }

    let at_limits = Config::builder()
        .tree_order(MAX_TREE_ORDER)
        .hash_load_factor(MAX_HASH_LOAD_FACTOR)
        .build();
    assert!(at_limits.validate().is_ok());
}

#[test]
fn test_failed_rebuild_keeps_live_index() {
    for kind in ALL_KINDS {
        let (temp_dir, engine) = setup_temp_engine(kind);
        let mut last = None;
        for id in 0..50u32 {
            last = Some(engine.create(&Record::new(id, format!("v{}", id))).unwrap());
        }
        let deleted = |id: u32| id < 40 && id % 3 == 0;
        for id in (0..50u32).filter(|id| deleted(*id)) {
            engine.delete(id).unwrap();
        }
        write_tombstone(&temp_dir, last.unwrap().offset(), 7);

        let err = engine.rebuild_index(kind).unwrap_err();

        assert!(matches!(err, DexError::Corruption(_)), "{}", kind);
        assert!(!temp_dir.path().join("index.tmp").exists());
        assert_eq!(engine.index_kind(), kind);
        for id in 0..49u32 {
            if deleted(id) {
                assert!(matches!(engine.read(id), Err(DexError::NotFound(_))), "{} id {}", kind, id);
            } else {
                assert_eq!(engine.read(id).unwrap().body, format!("v{}", id).into_bytes(), "{}", kind);
            }
        }
        if kind.is_ordered() {
            assert_eq!(engine.range(30, 48).unwrap().len(), 15);
        }
    }
}

#[test]
fn test_failed_rebuild_to_other_kind_keeps_catalog() {
    let (temp_dir, engine) = setup_temp_engine(IndexKind::BTree);
    let address = engine.create(&Record::new(1, "one")).unwrap();
    engine.create(&Record::new(2, "two")).unwrap();
    write_tombstone(&temp_dir, address.offset(), 9);

    assert!(engine.rebuild_index(IndexKind::Hash).is_err());

    assert_eq!(engine.index_kind(), IndexKind::BTree);
    assert_eq!(engine.read(2).unwrap().body, b"two");
    drop(engine);
    let catalog = Catalog::load(&temp_dir.path().join("catalog.bin")).unwrap().unwrap();
    assert_eq!(catalog.index_kind, IndexKind::BTree);
}

#[test]
fn test_failed_first_build_leaves_no_index_behind() {
    let temp_dir = TempDir::new().unwrap();
    let bad = {
        let store = RecordStore::open(&temp_dir.path().join("records.db")).unwrap();
        store.append(&Record::new(1, "ok").encode()).unwrap();
        store.append(&Record::new(2, "bad").encode()).unwrap()
    };
    write_tombstone(&temp_dir, bad.offset(), 3);

    let result = Engine::open(config_for(&temp_dir, IndexKind::BPlusTree));

    assert!(matches!(result, Err(DexError::Corruption(_))));
    assert!(!OrderedIndex::exists(&temp_dir.path().join("index"), TreeVariant::BPlusTree));
    assert!(!temp_dir.path().join("index.tmp").exists());
    assert!(!temp_dir.path().join("catalog.bin").exists());
}

/// Overwrite the tombstone word of the slot at `offset` in the record log
fn write_tombstone(temp_dir: &TempDir, offset: u64, value: u32) {
    let path = temp_dir.path().join("records.db");
    let mut raw = std::fs::read(&path).unwrap();
    let at = offset as usize;
    raw[at..at + 4].copy_from_slice(&value.to_le_bytes());
    std::fs::write(&path, &raw).unwrap();
}

#[test]
fn test_open_path_uses_defaults() {
    let temp_dir = TempDir::new().unwrap();

    let engine = Engine::open_path(temp_dir.path()).unwrap();

    assert_eq!(engine.index_kind(), IndexKind::BPlusTree);
    assert_eq!(engine.catalog().tree_order, 8);
    assert_eq!(engine.data_dir(), temp_dir.path());
}

#[test]
fn test_corrupt_catalog_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    drop(Engine::open(config_for(&temp_dir, IndexKind::BTree)).unwrap());

    std::fs::write(temp_dir.path().join("catalog.bin"), b"DXCT garbage").unwrap();

    assert!(matches!(
        Engine::open(config_for(&temp_dir, IndexKind::BTree)),
        Err(DexError::Corruption(_))
    ));
}

#[test]
fn test_index_kind_parses_from_cli_names() {
    assert_eq!("btree".parse::<IndexKind>().unwrap(), IndexKind::BTree);
    assert_eq!("B+Tree".parse::<IndexKind>().unwrap(), IndexKind::BPlusTree);
    assert_eq!("hash".parse::<IndexKind>().unwrap(), IndexKind::Hash);
    assert!(matches!("lsm".parse::<IndexKind>(), Err(DexError::InvalidConfig(_))));
    assert!(!IndexKind::Hash.is_ordered());
}
