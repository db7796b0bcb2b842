use super::*;
use crate::exec::{execute, ExecContext};
use buffer::BufferPool;
use codec::{encode_record, Record, TypeRegistry};
use common::{CancelToken, Config, DbError, DbResult};
use crypto::Passthrough;
use pager::Pager;
use std::sync::Arc;
use store::RecordStore;
use tempfile::{tempdir, TempDir};
use types::{Fields, Value};
use wal::Wal;

struct Fixture {
    store: RecordStore,
    indexes: IndexManager,
    registry: TypeRegistry,
    _dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempdir().unwrap();
        let path = dir.path().join("items.edb");
        let pager =
            Pager::open(&path, "items", &Config::default(), Arc::new(Passthrough)).unwrap();
        let wal = Arc::new(Wal::open(&Config::wal_path(&path)).unwrap());
        let pool = BufferPool::new(pager, wal, 256);
        let store = RecordStore::open(Arc::clone(&pool)).unwrap();
        let indexes = IndexManager::open(pool).unwrap();
        Fixture {
            store,
            indexes,
            registry: TypeRegistry::default(),
            _dir: dir,
        }
    }

    fn put(&self, id: &str, pairs: &[(&str, Value)]) {
        let mut body = Fields::new();
        for (k, v) in pairs {
            body.insert(*k, v.clone());
        }
        let bytes = encode_record(&Record::new(id, 1, body.clone()));
        let mut txn = self.store.begin().unwrap();
        self.store.insert(&mut txn, id, &bytes).unwrap();
        self.store.commit(txn).unwrap();
        self.indexes.on_insert(id, &body).unwrap();
    }

    fn ctx(&self) -> ExecContext<'_> {
        ExecContext::new(
            &self.store,
            &self.indexes,
            &self.registry,
            CancelToken::new(),
        )
    }

    fn run(&self, q: &query::Query) -> Vec<String> {
        let plan = plan_query(&self.indexes, q);
        let mut ctx = self.ctx();
        execute(&plan, &mut ctx)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect()
    }

    fn seed_products(&self, n: i64) {
        for i in 0..n {
            self.put(
                &format!("p{i:04}"),
                &[
                    ("price", Value::Int(i)),
                    (
                        "category",
                        Value::Text((if i % 2 == 0 { "even" } else { "odd" }).into()),
                    ),
                    ("name", Value::Text(format!("product {i}"))),
                ],
            );
        }
    }
}

use query::Query;

#[test]
fn unindexed_query_falls_back_to_full_scan() {
    let fx = Fixture::new();
    let plan = plan_query(&fx.indexes, &Query::eq("price", Value::Int(1)));
    assert_eq!(plan.access, AccessPath::FullScan);
}

#[test]
fn equality_leaf_uses_the_index() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Hash, std::iter::empty())
        .unwrap();
    let plan = plan_query(&fx.indexes, &Query::eq("price", Value::Int(1)));
    assert!(matches!(plan.access, AccessPath::IndexEq { .. }));
}

#[test]
fn range_leaves_need_an_ordered_index() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Hash, std::iter::empty())
        .unwrap();
    // A hash index cannot serve a range.
    let plan = plan_query(&fx.indexes, &Query::gt("price", Value::Int(1)));
    assert_eq!(plan.access, AccessPath::FullScan);

    fx.indexes
        .create_index("qty", common::IndexKind::Ordered, std::iter::empty())
        .unwrap();
    let plan = plan_query(&fx.indexes, &Query::gt("qty", Value::Int(1)));
    assert!(matches!(plan.access, AccessPath::IndexRange { .. }));
}

#[test]
fn and_intersects_smallest_first() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("category", common::IndexKind::Hash, std::iter::empty())
        .unwrap();
    fx.indexes
        .create_index("price", common::IndexKind::Ordered, std::iter::empty())
        .unwrap();
    fx.seed_products(100);

    let q = Query::and(vec![
        Query::eq("category", Value::Text("even".into())),
        Query::between("price", Value::Int(10), Value::Int(20), true, true),
    ]);
    let plan = plan_query(&fx.indexes, &q);
    match &plan.access {
        AccessPath::Intersect(parts) => {
            assert_eq!(parts.len(), 2);
        }
        other => panic!("expected intersect, got {other}"),
    }

    let mut hits = fx.run(&q);
    hits.sort();
    assert_eq!(hits, vec!["p0010", "p0012", "p0014", "p0016", "p0018", "p0020"]);
}

#[test]
fn or_unions_when_every_branch_is_covered() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Ordered, std::iter::empty())
        .unwrap();
    fx.seed_products(30);

    let q = Query::or(vec![
        Query::eq("price", Value::Int(3)),
        Query::eq("price", Value::Int(7)),
    ]);
    let plan = plan_query(&fx.indexes, &q);
    assert!(matches!(plan.access, AccessPath::Union(_)));

    let mut hits = fx.run(&q);
    hits.sort();
    assert_eq!(hits, vec!["p0003", "p0007"]);
}

#[test]
fn or_with_uncovered_branch_scans() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Ordered, std::iter::empty())
        .unwrap();
    let q = Query::or(vec![
        Query::eq("price", Value::Int(3)),
        Query::eq("unindexed", Value::Int(7)),
    ]);
    let plan = plan_query(&fx.indexes, &q);
    assert_eq!(plan.access, AccessPath::FullScan);
}

#[test]
fn not_under_and_becomes_a_difference() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Ordered, std::iter::empty())
        .unwrap();
    fx.indexes
        .create_index("category", common::IndexKind::Hash, std::iter::empty())
        .unwrap();
    fx.seed_products(10);

    let q = Query::and(vec![
        Query::between("price", Value::Int(0), Value::Int(9), true, true),
        Query::not(Query::eq("category", Value::Text("odd".into()))),
    ]);
    let plan = plan_query(&fx.indexes, &q);
    assert!(matches!(plan.access, AccessPath::Difference { .. }));

    let hits = fx.run(&q);
    assert_eq!(hits, vec!["p0000", "p0002", "p0004", "p0006", "p0008"]);
}

#[test]
fn range_results_stream_in_value_order() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Ordered, std::iter::empty())
        .unwrap();
    // Insert in shuffled order; the index sorts.
    for i in [5i64, 1, 9, 3, 7, 2, 8, 0, 6, 4] {
        fx.put(&format!("r{i}"), &[("price", Value::Int(i))]);
    }

    let q = Query::between("price", Value::Int(2), Value::Int(7), true, true);
    let hits = fx.run(&q);
    assert_eq!(hits, vec!["r2", "r3", "r4", "r5", "r6", "r7"]);
}

#[test]
fn residual_filter_keeps_plans_exact() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Ordered, std::iter::empty())
        .unwrap();
    fx.seed_products(20);

    // "name" is unindexed, so only the filter can check it.
    let q = Query::and(vec![
        Query::between("price", Value::Int(0), Value::Int(19), true, true),
        Query::Contains {
            field: "name".into(),
            value: Value::Text("product 1".into()),
        },
    ]);
    let hits = fx.run(&q);
    // product 1 and product 10..19.
    assert_eq!(hits.len(), 11);
}

#[test]
fn in_probes_the_index_per_value() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Hash, std::iter::empty())
        .unwrap();
    fx.seed_products(20);

    let q = Query::is_in("price", vec![Value::Int(4), Value::Int(15), Value::Int(99)]);
    let plan = plan_query(&fx.indexes, &q);
    assert!(matches!(plan.access, AccessPath::IndexIn { .. }));

    let mut hits = fx.run(&q);
    hits.sort();
    assert_eq!(hits, vec!["p0004", "p0015"]);
}

#[test]
fn full_scan_yields_id_order() {
    let fx = Fixture::new();
    fx.put("b", &[("x", Value::Int(1))]);
    fx.put("a", &[("x", Value::Int(2))]);
    fx.put("c", &[("x", Value::Int(3))]);

    let hits = fx.run(&Query::Exists { field: "x".into() });
    assert_eq!(hits, vec!["a", "b", "c"]);
}

#[test]
fn cancellation_stops_the_scan() {
    let fx = Fixture::new();
    fx.seed_products(50);

    let cancel = CancelToken::new();
    cancel.cancel();
    let mut ctx = ExecContext::new(&fx.store, &fx.indexes, &fx.registry, cancel);
    let plan = plan_query(&fx.indexes, &Query::Exists { field: "price".into() });
    let result: DbResult<Vec<_>> = execute(&plan, &mut ctx);
    assert!(matches!(result, Err(DbError::Cancelled)));
}

#[test]
fn plan_cache_reuses_plans() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Ordered, std::iter::empty())
        .unwrap();
    let engine = QueryEngine::new(16, false);

    let q = Query::eq("price", Value::Int(1));
    let first = engine.plan(&fx.indexes, &q);
    let second = engine.plan(&fx.indexes, &q);
    assert!(Arc::ptr_eq(&first, &second));

    engine.invalidate_all();
    let third = engine.plan(&fx.indexes, &q);
    assert!(!Arc::ptr_eq(&first, &third));
}

#[test]
fn result_cache_serves_repeats_and_invalidates() {
    let fx = Fixture::new();
    fx.indexes
        .create_index("price", common::IndexKind::Ordered, std::iter::empty())
        .unwrap();
    fx.seed_products(10);
    let engine = QueryEngine::new(16, true);

    let q = Query::lt("price", Value::Int(5));
    let first = engine.find(&mut fx.ctx(), &q).unwrap();
    assert_eq!(first.len(), 5);
    let second = engine.find(&mut fx.ctx(), &q).unwrap();
    assert!(Arc::ptr_eq(&first, &second), "second read hits the cache");
    assert!(engine.hit_ratio() > 0.0);

    // A mutation invalidates: new record shows up.
    fx.put("extra", &[("price", Value::Int(0))]);
    engine.invalidate_results();
    let third = engine.find(&mut fx.ctx(), &q).unwrap();
    assert_eq!(third.len(), 6);
}
