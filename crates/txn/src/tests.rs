use super::*;
use common::Config;
use tempfile::{tempdir, TempDir};
use types::Value;

fn setup() -> (TransactionManager, TempDir) {
    let dir = tempdir().unwrap();
    let coll =
        Arc::new(Collection::open(&dir.path().join("items.edb"), Config::default()).unwrap());
    (TransactionManager::new(coll), dir)
}

fn doc(id: &str, n: i64) -> Document {
    Document::with_id(id).set("n", Value::Int(n))
}

#[test]
fn writes_are_invisible_until_commit() {
    let (mgr, _dir) = setup();

    let mut txn = mgr.begin(IsolationLevel::ReadCommitted);
    txn.insert(doc("a", 1)).unwrap();
    assert_eq!(mgr.collection().get("a").unwrap(), None, "not yet visible");

    txn.commit().unwrap();
    assert!(mgr.collection().get("a").unwrap().is_some());
}

#[test]
fn reads_see_own_buffered_writes() {
    let (mgr, _dir) = setup();
    mgr.collection().insert(doc("a", 1)).unwrap();

    let mut txn = mgr.begin(IsolationLevel::ReadCommitted);
    txn.update(doc("a", 99)).unwrap();
    let seen = txn.get("a").unwrap().unwrap();
    assert_eq!(seen.get_i64("n").unwrap(), 99);

    txn.delete("a").unwrap();
    assert_eq!(txn.get("a").unwrap(), None);
    txn.rollback();

    // The outside world never saw any of it.
    assert_eq!(
        mgr.collection().get("a").unwrap().unwrap().get_i64("n").unwrap(),
        1
    );
}

#[test]
fn rollback_discards_the_queue() {
    let (mgr, _dir) = setup();

    let mut txn = mgr.begin(IsolationLevel::ReadCommitted);
    txn.insert(doc("a", 1)).unwrap();
    txn.insert(doc("b", 2)).unwrap();
    assert_eq!(txn.pending_ops(), 2);
    txn.rollback();

    assert_eq!(mgr.collection().count(), 0);
}

#[test]
fn operations_apply_in_issue_order() {
    let (mgr, _dir) = setup();

    let mut txn = mgr.begin(IsolationLevel::ReadCommitted);
    txn.insert(doc("a", 1)).unwrap();
    txn.update(doc("a", 2)).unwrap();
    txn.delete("a").unwrap();
    txn.insert(doc("a", 3)).unwrap();
    txn.commit().unwrap();

    let current = mgr.collection().get("a").unwrap().unwrap();
    assert_eq!(current.get_i64("n").unwrap(), 3);
}

#[test]
fn read_committed_sees_other_commits_mid_transaction() {
    let (mgr, _dir) = setup();
    mgr.collection().insert(doc("a", 1)).unwrap();

    let mut txn = mgr.begin(IsolationLevel::ReadCommitted);
    assert_eq!(txn.get("a").unwrap().unwrap().get_i64("n").unwrap(), 1);

    // Another writer commits in between.
    let mut doc_a = mgr.collection().get("a").unwrap().unwrap();
    doc_a.insert_field("n", Value::Int(2));
    mgr.collection().update(doc_a).unwrap();

    assert_eq!(txn.get("a").unwrap().unwrap().get_i64("n").unwrap(), 2);
    txn.rollback();
}

#[test]
fn repeatable_read_pins_the_first_observation() {
    let (mgr, _dir) = setup();
    mgr.collection().insert(doc("a", 1)).unwrap();

    let mut txn = mgr.begin(IsolationLevel::RepeatableRead);
    assert_eq!(txn.get("a").unwrap().unwrap().get_i64("n").unwrap(), 1);

    let mut doc_a = mgr.collection().get("a").unwrap().unwrap();
    doc_a.insert_field("n", Value::Int(2));
    mgr.collection().update(doc_a).unwrap();

    // Still the first-read value, and stable across repeats.
    assert_eq!(txn.get("a").unwrap().unwrap().get_i64("n").unwrap(), 1);
    assert_eq!(txn.get("a").unwrap().unwrap().get_i64("n").unwrap(), 1);
    txn.rollback();
}

#[test]
fn repeatable_read_pins_observed_absence() {
    let (mgr, _dir) = setup();

    let mut txn = mgr.begin(IsolationLevel::RepeatableRead);
    assert_eq!(txn.get("ghost").unwrap(), None);

    mgr.collection().insert(doc("ghost", 1)).unwrap();
    assert_eq!(txn.get("ghost").unwrap(), None, "absence is stable too");
    txn.rollback();
}

#[test]
fn serializable_conflict_names_the_changed_record() {
    let (mgr, _dir) = setup();
    mgr.collection().insert(doc("x", 1)).unwrap();
    mgr.collection().insert(doc("y", 1)).unwrap();

    // T1 reads x, will write y.
    let mut t1 = mgr.begin(IsolationLevel::Serializable);
    t1.get("x").unwrap();
    t1.update(doc("y", 100)).unwrap();

    // T2 updates x and commits first.
    let mut t2 = mgr.begin(IsolationLevel::Serializable);
    let seen = t2.get("x").unwrap().unwrap();
    let mut changed = seen.clone();
    changed.insert_field("n", Value::Int(2));
    t2.update(changed).unwrap();
    t2.commit().unwrap();

    // T1's read of x is now stale.
    let err = t1.commit().unwrap_err();
    match err {
        DbError::TransactionConflict { ids } => assert_eq!(ids, vec!["x".to_string()]),
        other => panic!("expected TransactionConflict, got {other}"),
    }

    // y is untouched; the retry succeeds.
    assert_eq!(
        mgr.collection().get("y").unwrap().unwrap().get_i64("n").unwrap(),
        1
    );
    let mut retry = mgr.begin(IsolationLevel::Serializable);
    retry.get("x").unwrap();
    retry.update(doc("y", 100)).unwrap();
    retry.commit().unwrap();
    assert_eq!(
        mgr.collection().get("y").unwrap().unwrap().get_i64("n").unwrap(),
        100
    );
}

#[test]
fn serializable_tolerates_unchanged_reads() {
    let (mgr, _dir) = setup();
    mgr.collection().insert(doc("x", 1)).unwrap();

    let mut txn = mgr.begin(IsolationLevel::Serializable);
    txn.get("x").unwrap();
    txn.get("absent").unwrap();
    txn.insert(doc("z", 5)).unwrap();
    txn.commit().unwrap();

    assert!(mgr.collection().get("z").unwrap().is_some());
}

#[test]
fn serializable_detects_phantom_insert_of_a_read_absence() {
    let (mgr, _dir) = setup();

    let mut txn = mgr.begin(IsolationLevel::Serializable);
    assert_eq!(txn.get("new").unwrap(), None);
    txn.insert(doc("other", 1)).unwrap();

    // Someone else creates the record this transaction observed as
    // absent.
    mgr.collection().insert(doc("new", 1)).unwrap();

    let err = txn.commit().unwrap_err();
    assert!(matches!(err, DbError::TransactionConflict { ids } if ids == vec!["new".to_string()]));
}

#[test]
fn read_uncommitted_behaves_as_read_committed() {
    let (mgr, _dir) = setup();
    mgr.collection().insert(doc("a", 1)).unwrap();

    let mut other = mgr.begin(IsolationLevel::ReadCommitted);
    other.update(doc("a", 99)).unwrap();

    let mut txn = mgr.begin(IsolationLevel::ReadUncommitted);
    // Buffered writes of other transactions are never visible.
    assert_eq!(txn.get("a").unwrap().unwrap().get_i64("n").unwrap(), 1);
    txn.rollback();
    other.rollback();
}

#[test]
fn failed_commit_leaves_no_partial_state() {
    let (mgr, _dir) = setup();
    mgr.collection().insert(doc("exists", 1)).unwrap();

    let mut txn = mgr.begin(IsolationLevel::ReadCommitted);
    txn.insert(doc("fresh", 1)).unwrap();
    txn.insert(doc("exists", 2)).unwrap(); // will fail AlreadyExists

    let err = txn.commit().unwrap_err();
    assert!(matches!(err, DbError::AlreadyExists(_)));

    assert_eq!(mgr.collection().get("fresh").unwrap(), None);
    assert_eq!(
        mgr.collection().get("exists").unwrap().unwrap().get_i64("n").unwrap(),
        1
    );
    assert_eq!(mgr.collection().count(), 1);
}

#[test]
fn transactional_insert_requires_an_id() {
    let (mgr, _dir) = setup();
    let mut txn = mgr.begin(IsolationLevel::ReadCommitted);
    let err = txn.insert(Document::new()).unwrap_err();
    assert!(matches!(err, DbError::InvalidArgument(_)));
    txn.rollback();
}

#[test]
fn transaction_ids_are_unique() {
    let (mgr, _dir) = setup();
    let a = mgr.begin(IsolationLevel::ReadCommitted);
    let b = mgr.begin(IsolationLevel::ReadCommitted);
    assert_ne!(a.id(), b.id());
    a.rollback();
    b.rollback();
}
