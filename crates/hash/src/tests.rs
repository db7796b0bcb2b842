use super::*;
use buffer::BufferPool;
use common::Config;
use crypto::Passthrough;
use pager::Pager;
use tempfile::{tempdir, TempDir};
use types::{canonical_key, Value};
use wal::Wal;

fn test_pool() -> (Arc<BufferPool>, TempDir) {
    let dir = tempdir().unwrap();
    let path = dir.path().join("idx.edb");
    let pager = Pager::open(&path, "idx", &Config::default(), Arc::new(Passthrough)).unwrap();
    let wal = Arc::new(Wal::open(&Config::wal_path(&path)).unwrap());
    (BufferPool::new(pager, wal, 256), dir)
}

fn int_key(i: i64) -> Vec<u8> {
    canonical_key(&Value::Int(i))
}

#[test]
fn insert_and_lookup_single_key() {
    let (pool, _dir) = test_pool();
    let mut index = HashIndex::create(pool).unwrap();

    index.insert(&int_key(42), "r1").unwrap();
    assert_eq!(index.lookup(&int_key(42)).unwrap(), vec!["r1"]);
    assert!(index.lookup(&int_key(43)).unwrap().is_empty());
}

#[test]
fn duplicate_keys_return_all_ids() {
    let (pool, _dir) = test_pool();
    let mut index = HashIndex::create(pool).unwrap();

    index.insert(&int_key(1), "a").unwrap();
    index.insert(&int_key(1), "b").unwrap();

    let mut hits = index.lookup(&int_key(1)).unwrap();
    hits.sort();
    assert_eq!(hits, vec!["a", "b"]);
}

#[test]
fn remove_deletes_one_pair() {
    let (pool, _dir) = test_pool();
    let mut index = HashIndex::create(pool).unwrap();
    index.insert(&int_key(1), "a").unwrap();
    index.insert(&int_key(1), "b").unwrap();

    assert!(index.remove(&int_key(1), "a").unwrap());
    assert!(!index.remove(&int_key(1), "a").unwrap());
    assert_eq!(index.lookup(&int_key(1)).unwrap(), vec!["b"]);
}

#[test]
fn different_value_types_do_not_collide() {
    let (pool, _dir) = test_pool();
    let mut index = HashIndex::create(pool).unwrap();

    index
        .insert(&canonical_key(&Value::Int(1)), "int")
        .unwrap();
    index
        .insert(&canonical_key(&Value::Text("1".into())), "text")
        .unwrap();
    index
        .insert(&canonical_key(&Value::Bool(true)), "bool")
        .unwrap();

    assert_eq!(index.lookup(&canonical_key(&Value::Int(1))).unwrap(), vec!["int"]);
    assert_eq!(
        index.lookup(&canonical_key(&Value::Text("1".into()))).unwrap(),
        vec!["text"]
    );
    assert_eq!(
        index.lookup(&canonical_key(&Value::Bool(true))).unwrap(),
        vec!["bool"]
    );
}

#[test]
fn overflow_chains_hold_collisions() {
    let (pool, _dir) = test_pool();
    let mut index = HashIndex::create(pool).unwrap();

    // Far more entries than one bucket page holds.
    for i in 0..2000 {
        index.insert(&int_key(i), &format!("r{i}")).unwrap();
    }
    for i in (0..2000).step_by(131) {
        assert_eq!(
            index.lookup(&int_key(i)).unwrap(),
            vec![format!("r{i}")],
            "key {i}"
        );
    }
    assert_eq!(index.len().unwrap(), 2000);
}

#[test]
fn persists_across_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("idx.edb");
    let root;
    {
        let pager =
            Pager::open(&path, "idx", &Config::default(), Arc::new(Passthrough)).unwrap();
        let wal = Arc::new(Wal::open(&Config::wal_path(&path)).unwrap());
        let pool = BufferPool::new(pager, wal, 256);
        let mut index = HashIndex::create(Arc::clone(&pool)).unwrap();
        for i in 0..500 {
            index.insert(&int_key(i), &format!("r{i}")).unwrap();
        }
        root = index.root();
        pool.flush_all().unwrap();
    }

    let pager = Pager::open(&path, "idx", &Config::default(), Arc::new(Passthrough)).unwrap();
    let wal = Arc::new(Wal::open(&Config::wal_path(&path)).unwrap());
    let pool = BufferPool::new(pager, wal, 256);
    let index = HashIndex::open(pool, root).unwrap();
    assert_eq!(index.lookup(&int_key(250)).unwrap(), vec!["r250"]);
    assert_eq!(index.len().unwrap(), 500);
}

#[test]
fn destroy_frees_every_page() {
    let (pool, _dir) = test_pool();
    let mut index = HashIndex::create(Arc::clone(&pool)).unwrap();
    for i in 0..1000 {
        index.insert(&int_key(i), &format!("r{i}")).unwrap();
    }
    let pages_before = pool.num_pages();
    index.destroy().unwrap();

    let mut replacement = HashIndex::create(Arc::clone(&pool)).unwrap();
    for i in 0..1000 {
        replacement.insert(&int_key(i), &format!("r{i}")).unwrap();
    }
    assert!(pool.num_pages() <= pages_before);
}

#[test]
fn oversized_keys_are_rejected() {
    let (pool, _dir) = test_pool();
    let mut index = HashIndex::create(pool).unwrap();
    let huge = canonical_key(&Value::Text("k".repeat(4000)));
    assert!(matches!(
        index.insert(&huge, "r"),
        Err(DbError::InvalidArgument(_))
    ));
}

#[test]
fn open_with_nil_root_is_corrupt() {
    let (pool, _dir) = test_pool();
    assert!(matches!(
        HashIndex::open(pool, PageId(0)),
        Err(DbError::CorruptHeader(_))
    ));
}
