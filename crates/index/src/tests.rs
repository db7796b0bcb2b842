use super::*;
use common::Config;
use crypto::Passthrough;
use pager::Pager;
use tempfile::{tempdir, TempDir};
use wal::Wal;

fn test_pool(dir: &TempDir) -> Arc<BufferPool> {
    let path = dir.path().join("items.edb");
    let pager = Pager::open(&path, "items", &Config::default(), Arc::new(Passthrough)).unwrap();
    let wal = Arc::new(Wal::open(&Config::wal_path(&path)).unwrap());
    BufferPool::new(pager, wal, 256)
}

fn body(pairs: &[(&str, Value)]) -> Fields {
    let mut fields = Fields::new();
    for (k, v) in pairs {
        fields.insert(*k, v.clone());
    }
    fields
}

fn no_records() -> impl Iterator<Item = DbResult<(String, Fields)>> {
    std::iter::empty()
}

#[test]
fn create_and_lookup() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Ordered, no_records())
        .unwrap();

    manager
        .on_insert("p1", &body(&[("price", Value::Int(10))]))
        .unwrap();
    manager
        .on_insert("p2", &body(&[("price", Value::Int(20))]))
        .unwrap();

    let handle = manager.index_for("price").unwrap();
    assert_eq!(handle.lookup_eq(&Value::Int(10)).unwrap(), vec!["p1"]);
    assert_eq!(handle.cardinality(), 2);
}

#[test]
fn duplicate_creation_is_rejected() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Hash, no_records())
        .unwrap();
    assert!(matches!(
        manager.create_index("price", IndexKind::Ordered, no_records()),
        Err(DbError::IndexAlreadyExists(_))
    ));
}

#[test]
fn creation_backfills_existing_records() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();

    let records = (0..50).map(|i| {
        Ok((
            format!("r{i}"),
            body(&[("price", Value::Int(i)), ("name", Value::Text(format!("n{i}")))]),
        ))
    });
    manager
        .create_index("price", IndexKind::Ordered, records)
        .unwrap();

    let handle = manager.index_for("price").unwrap();
    assert_eq!(handle.cardinality(), 50);
    assert_eq!(handle.lookup_eq(&Value::Int(33)).unwrap(), vec!["r33"]);
}

#[test]
fn records_without_the_field_are_skipped() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Hash, no_records())
        .unwrap();

    manager
        .on_insert("with", &body(&[("price", Value::Int(1))]))
        .unwrap();
    manager
        .on_insert("without", &body(&[("name", Value::Text("x".into()))]))
        .unwrap();

    let handle = manager.index_for("price").unwrap();
    assert_eq!(handle.cardinality(), 1);
    assert_eq!(handle.lookup_eq(&Value::Int(1)).unwrap(), vec!["with"]);
}

#[test]
fn update_moves_index_entries() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Ordered, no_records())
        .unwrap();

    let old = body(&[("price", Value::Int(10))]);
    let new = body(&[("price", Value::Int(99))]);
    manager.on_insert("p1", &old).unwrap();
    manager.on_update("p1", &old, &new).unwrap();

    let handle = manager.index_for("price").unwrap();
    assert!(handle.lookup_eq(&Value::Int(10)).unwrap().is_empty());
    assert_eq!(handle.lookup_eq(&Value::Int(99)).unwrap(), vec!["p1"]);
    assert_eq!(handle.cardinality(), 1);
}

#[test]
fn update_dropping_the_field_removes_the_entry() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Hash, no_records())
        .unwrap();

    let old = body(&[("price", Value::Int(10))]);
    let new = body(&[("name", Value::Text("renamed".into()))]);
    manager.on_insert("p1", &old).unwrap();
    manager.on_update("p1", &old, &new).unwrap();

    let handle = manager.index_for("price").unwrap();
    assert!(handle.lookup_eq(&Value::Int(10)).unwrap().is_empty());
    assert_eq!(handle.cardinality(), 0);
}

#[test]
fn delete_removes_entries_from_every_index() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Ordered, no_records())
        .unwrap();
    manager
        .create_index("name", IndexKind::Hash, no_records())
        .unwrap();

    let record = body(&[
        ("price", Value::Int(5)),
        ("name", Value::Text("gadget".into())),
    ]);
    manager.on_insert("p1", &record).unwrap();
    manager.on_delete("p1", &record).unwrap();

    assert_eq!(manager.index_for("price").unwrap().cardinality(), 0);
    assert_eq!(manager.index_for("name").unwrap().cardinality(), 0);
}

#[test]
fn dotted_paths_index_nested_fields() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("address.city", IndexKind::Hash, no_records())
        .unwrap();

    let record = body(&[(
        "address",
        Value::Map(body(&[("city", Value::Text("Oslo".into()))])),
    )]);
    manager.on_insert("p1", &record).unwrap();

    let handle = manager.index_for("address.city").unwrap();
    assert_eq!(
        handle.lookup_eq(&Value::Text("Oslo".into())).unwrap(),
        vec!["p1"]
    );
}

#[test]
fn roots_persist_across_reopen() {
    let dir = tempdir().unwrap();
    {
        let pool = test_pool(&dir);
        let manager = IndexManager::open(Arc::clone(&pool)).unwrap();
        manager
            .create_index("price", IndexKind::Ordered, no_records())
            .unwrap();
        // Enough entries to split the root at least once.
        for i in 0..2000 {
            manager
                .on_insert(&format!("r{i}"), &body(&[("price", Value::Int(i))]))
                .unwrap();
        }
        pool.flush_all().unwrap();
    }

    let pool = test_pool(&dir);
    let manager = IndexManager::open(pool).unwrap();
    let handle = manager.index_for("price").unwrap();
    assert_eq!(handle.cardinality(), 2000);
    assert_eq!(handle.lookup_eq(&Value::Int(1234)).unwrap(), vec!["r1234"]);
}

#[test]
fn drop_index_removes_registration() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Hash, no_records())
        .unwrap();
    manager.drop_index("price").unwrap();

    assert!(manager.index_for("price").is_none());
    assert!(matches!(
        manager.drop_index("price"),
        Err(DbError::IndexNotFound(_))
    ));
    assert_eq!(manager.index_count(), 0);
}

#[test]
fn range_lookup_through_handle() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Ordered, no_records())
        .unwrap();
    for i in 0..20 {
        manager
            .on_insert(&format!("r{i:02}"), &body(&[("price", Value::Int(i))]))
            .unwrap();
    }

    let handle = manager.index_for("price").unwrap();
    let hits = handle
        .lookup_range(Some((&Value::Int(5), true)), Some((&Value::Int(8), false)))
        .unwrap();
    assert_eq!(hits, vec!["r05", "r06", "r07"]);

    // Hash indexes refuse range queries.
    manager
        .create_index("name", IndexKind::Hash, no_records())
        .unwrap();
    let hash_handle = manager.index_for("name").unwrap();
    assert!(matches!(
        hash_handle.lookup_range(Some((&Value::Int(0), true)), None),
        Err(DbError::UnsupportedIndexType(_))
    ));
}

#[test]
fn all_ids_follow_value_order_on_ordered_indexes() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Ordered, no_records())
        .unwrap();
    for (id, price) in [("c", 30), ("a", 10), ("b", 20)] {
        manager
            .on_insert(id, &body(&[("price", Value::Int(price))]))
            .unwrap();
    }

    let handle = manager.index_for("price").unwrap();
    assert_eq!(
        handle.all_ids(btree::IterOrder::Ascending).unwrap(),
        vec!["a", "b", "c"]
    );
    assert_eq!(
        handle.all_ids(btree::IterOrder::Descending).unwrap(),
        vec!["c", "b", "a"]
    );
}

#[test]
fn open_rebuilt_discards_stale_structures() {
    let dir = tempdir().unwrap();
    {
        let pool = test_pool(&dir);
        let manager = IndexManager::open(Arc::clone(&pool)).unwrap();
        manager
            .create_index("price", IndexKind::Ordered, no_records())
            .unwrap();
        // Stale entries that the rebuild must throw away.
        manager
            .on_insert("ghost", &body(&[("price", Value::Int(666))]))
            .unwrap();
        pool.flush_all().unwrap();
    }

    let pool = test_pool(&dir);
    let records: Vec<(String, Fields)> = (0..5)
        .map(|i| (format!("r{i}"), body(&[("price", Value::Int(i))])))
        .collect();
    let manager =
        IndexManager::open_rebuilt(pool, || records.clone().into_iter().map(Ok)).unwrap();

    let handle = manager.index_for("price").unwrap();
    assert_eq!(handle.kind, IndexKind::Ordered);
    assert_eq!(handle.cardinality(), 5);
    assert!(handle.lookup_eq(&Value::Int(666)).unwrap().is_empty());
    assert_eq!(handle.lookup_eq(&Value::Int(2)).unwrap(), vec!["r2"]);
}

#[test]
fn rebuild_all_recreates_from_records() {
    let dir = tempdir().unwrap();
    let manager = IndexManager::open(test_pool(&dir)).unwrap();
    manager
        .create_index("price", IndexKind::Ordered, no_records())
        .unwrap();
    // Stale state: the index never saw these records.
    let records: Vec<(String, Fields)> = (0..10)
        .map(|i| (format!("r{i}"), body(&[("price", Value::Int(i))])))
        .collect();

    manager
        .rebuild_all(|| records.clone().into_iter().map(Ok))
        .unwrap();

    let handle = manager.index_for("price").unwrap();
    assert_eq!(handle.cardinality(), 10);
    assert_eq!(handle.lookup_eq(&Value::Int(7)).unwrap(), vec!["r7"]);
}
