//! Index manager: the set of secondary indexes on one collection.
//!
//! Owns the lifecycle of every declared index: creation (with a
//! rebuild from the live records), persistence of roots in the file
//! header, synchronous maintenance on record mutations, and the
//! field/cardinality facts the query planner uses to pick access
//! paths.
//!
//! Locking: the registry map has its own lock, each index has its own;
//! maintenance walks indexes in ascending field-name order and never
//! holds two index locks at once.

#[cfg(test)]
mod tests;

use btree::{IterOrder, OrderedIndex};
use buffer::BufferPool;
use common::{DbError, DbResult, IndexKind, PageId};
use hash::HashIndex;
use pager::IndexEntry;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};
use types::{canonical_key, Fields, Value};

enum AnyIndex {
    Hash(HashIndex),
    Ordered(OrderedIndex),
}

impl AnyIndex {
    fn insert(&mut self, key: &[u8], id: &str) -> DbResult<()> {
        match self {
            AnyIndex::Hash(index) => index.insert(key, id),
            AnyIndex::Ordered(index) => index.insert(key, id),
        }
    }

    fn remove(&mut self, key: &[u8], id: &str) -> DbResult<bool> {
        match self {
            AnyIndex::Hash(index) => index.remove(key, id),
            AnyIndex::Ordered(index) => index.remove(key, id),
        }
    }

    fn root(&self) -> PageId {
        match self {
            AnyIndex::Hash(index) => index.root(),
            AnyIndex::Ordered(index) => index.root(),
        }
    }

    fn len(&self) -> DbResult<usize> {
        match self {
            AnyIndex::Hash(index) => index.len(),
            AnyIndex::Ordered(index) => index.len(),
        }
    }
}

/// One declared index and its runtime state.
pub struct IndexHandle {
    pub field: String,
    pub kind: IndexKind,
    /// Entry count, maintained on every mutation; feeds selectivity
    /// estimates in the planner.
    cardinality: AtomicU64,
    inner: Mutex<AnyIndex>,
}

impl IndexHandle {
    pub fn cardinality(&self) -> u64 {
        self.cardinality.load(Ordering::Relaxed)
    }

    /// Record ids equal to `value`.
    pub fn lookup_eq(&self, value: &Value) -> DbResult<Vec<String>> {
        let key = canonical_key(value);
        match &*self.inner.lock() {
            AnyIndex::Hash(index) => index.lookup(&key),
            AnyIndex::Ordered(index) => index.lookup(&key),
        }
    }

    /// Record ids with values in the given range, in value order.
    /// Ordered indexes only.
    pub fn lookup_range(
        &self,
        lo: Option<(&Value, bool)>,
        hi: Option<(&Value, bool)>,
    ) -> DbResult<Vec<String>> {
        let lo_key = lo.map(|(v, inclusive)| (canonical_key(v), inclusive));
        let hi_key = hi.map(|(v, inclusive)| (canonical_key(v), inclusive));
        match &*self.inner.lock() {
            AnyIndex::Ordered(index) => {
                let lo_bound = match &lo_key {
                    Some((key, true)) => Bound::Included(key.as_slice()),
                    Some((key, false)) => Bound::Excluded(key.as_slice()),
                    None => Bound::Unbounded,
                };
                let hi_bound = match &hi_key {
                    Some((key, true)) => Bound::Included(key.as_slice()),
                    Some((key, false)) => Bound::Excluded(key.as_slice()),
                    None => Bound::Unbounded,
                };
                Ok(index
                    .range(lo_bound, hi_bound)?
                    .into_iter()
                    .map(|(_, id)| id)
                    .collect())
            }
            AnyIndex::Hash(_) => Err(DbError::UnsupportedIndexType(format!(
                "hash index on '{}' cannot serve range queries",
                self.field
            ))),
        }
    }

    /// Every record id in the index, in value order for ordered
    /// indexes.
    pub fn all_ids(&self, order: IterOrder) -> DbResult<Vec<String>> {
        match &*self.inner.lock() {
            AnyIndex::Ordered(index) => Ok(index
                .iterate(order)?
                .into_iter()
                .map(|(_, id)| id)
                .collect()),
            AnyIndex::Hash(index) => {
                Ok(index.entries()?.into_iter().map(|(_, id)| id).collect())
            }
        }
    }
}

pub struct IndexManager {
    pool: Arc<BufferPool>,
    /// field -> handle, kept in field order for the lock discipline.
    indexes: RwLock<BTreeMap<String, Arc<IndexHandle>>>,
}

impl IndexManager {
    /// Reattach every index registered in the file header.
    pub fn open(pool: Arc<BufferPool>) -> DbResult<Self> {
        let entries = pool.header(|h| h.indexes.clone());
        let mut indexes = BTreeMap::new();
        for entry in entries {
            entry.verify()?;
            let inner = match entry.kind {
                IndexKind::Hash => AnyIndex::Hash(HashIndex::open(Arc::clone(&pool), entry.root)?),
                IndexKind::Ordered => {
                    AnyIndex::Ordered(OrderedIndex::open(Arc::clone(&pool), entry.root)?)
                }
            };
            let cardinality = inner.len()? as u64;
            indexes.insert(
                entry.field.clone(),
                Arc::new(IndexHandle {
                    field: entry.field,
                    kind: entry.kind,
                    cardinality: AtomicU64::new(cardinality),
                    inner: Mutex::new(inner),
                }),
            );
        }
        Ok(IndexManager {
            pool,
            indexes: RwLock::new(indexes),
        })
    }

    /// Reattach after a crash recovery pass. Persisted index pages may
    /// be torn or stale (they are only guaranteed consistent as of the
    /// last checkpoint, and recovery replays records without index
    /// maintenance), so every declared index is discarded and rebuilt
    /// from the live records. Structures too damaged to walk just leak
    /// their pages.
    pub fn open_rebuilt<I, F>(pool: Arc<BufferPool>, mut records: F) -> DbResult<Self>
    where
        I: Iterator<Item = DbResult<(String, Fields)>>,
        F: FnMut() -> I,
    {
        let entries = pool.header(|h| h.indexes.clone());
        for entry in &entries {
            let destroyed = match entry.kind {
                IndexKind::Hash => {
                    HashIndex::open(Arc::clone(&pool), entry.root).and_then(HashIndex::destroy)
                }
                IndexKind::Ordered => OrderedIndex::open(Arc::clone(&pool), entry.root)
                    .and_then(OrderedIndex::destroy),
            };
            if let Err(err) = destroyed {
                warn!(field = %entry.field, %err, "stale index structure left unreclaimed");
            }
        }
        pool.update_header(|h| h.indexes.clear())?;

        let manager = IndexManager {
            pool,
            indexes: RwLock::new(BTreeMap::new()),
        };
        for entry in entries {
            manager.create_index(&entry.field, entry.kind, records())?;
        }
        Ok(manager)
    }

    /// Declare an index and build it by streaming the collection's
    /// current records.
    pub fn create_index<I>(&self, field: &str, kind: IndexKind, records: I) -> DbResult<()>
    where
        I: Iterator<Item = DbResult<(String, Fields)>>,
    {
        {
            let indexes = self.indexes.read();
            if indexes.contains_key(field) {
                return Err(DbError::IndexAlreadyExists(field.to_string()));
            }
        }

        let mut inner = match kind {
            IndexKind::Hash => AnyIndex::Hash(HashIndex::create(Arc::clone(&self.pool))?),
            IndexKind::Ordered => AnyIndex::Ordered(OrderedIndex::create(Arc::clone(&self.pool))?),
        };

        let mut cardinality = 0u64;
        for item in records {
            let (id, body) = item?;
            if let Some(value) = body.get_path(field) {
                inner.insert(&canonical_key(value), &id)?;
                cardinality += 1;
            }
        }

        let root = inner.root();
        let handle = Arc::new(IndexHandle {
            field: field.to_string(),
            kind,
            cardinality: AtomicU64::new(cardinality),
            inner: Mutex::new(inner),
        });

        let mut indexes = self.indexes.write();
        if indexes.contains_key(field) {
            return Err(DbError::IndexAlreadyExists(field.to_string()));
        }
        indexes.insert(field.to_string(), handle);
        drop(indexes);

        self.pool.update_header(|h| {
            h.indexes
                .push(IndexEntry::new(index_name(field, kind), kind, field, root));
        })?;
        info!(field, %kind, entries = cardinality, "created index");
        Ok(())
    }

    /// Drop an index and free its pages.
    pub fn drop_index(&self, field: &str) -> DbResult<()> {
        let handle = {
            let mut indexes = self.indexes.write();
            indexes
                .remove(field)
                .ok_or_else(|| DbError::IndexNotFound(field.to_string()))?
        };
        let inner = Arc::try_unwrap(handle)
            .map_err(|_| {
                DbError::InvalidArgument(format!("index on '{field}' is still in use"))
            })?
            .inner
            .into_inner();
        match inner {
            AnyIndex::Hash(index) => index.destroy()?,
            AnyIndex::Ordered(index) => index.destroy()?,
        }
        self.pool.update_header(|h| {
            h.remove_index(field);
        })?;
        info!(field, "dropped index");
        Ok(())
    }

    /// Rebuild every declared index from scratch. Used after crash
    /// recovery replays record operations that bypassed maintenance.
    pub fn rebuild_all<I, F>(&self, mut records: F) -> DbResult<()>
    where
        I: Iterator<Item = DbResult<(String, Fields)>>,
        F: FnMut() -> I,
    {
        let declared: Vec<(String, IndexKind)> = {
            let indexes = self.indexes.read();
            indexes
                .values()
                .map(|h| (h.field.clone(), h.kind))
                .collect()
        };
        if declared.is_empty() {
            return Ok(());
        }
        debug!(count = declared.len(), "rebuilding indexes after recovery");
        for (field, kind) in declared {
            self.drop_index(&field)?;
            self.create_index(&field, kind, records())?;
        }
        Ok(())
    }

    pub fn index_for(&self, field: &str) -> Option<Arc<IndexHandle>> {
        self.indexes.read().get(field).cloned()
    }

    pub fn fields(&self) -> Vec<String> {
        self.indexes.read().keys().cloned().collect()
    }

    pub fn index_count(&self) -> usize {
        self.indexes.read().len()
    }

    // ---- synchronous maintenance hooks ----

    pub fn on_insert(&self, id: &str, body: &Fields) -> DbResult<()> {
        self.for_each_index(|field, handle| {
            if let Some(value) = body.get_path(field) {
                handle.inner.lock().insert(&canonical_key(value), id)?;
                handle.cardinality.fetch_add(1, Ordering::Relaxed);
                self.persist_root_if_moved(field, handle)?;
            }
            Ok(())
        })
    }

    pub fn on_update(&self, id: &str, old: &Fields, new: &Fields) -> DbResult<()> {
        self.for_each_index(|field, handle| {
            let old_value = old.get_path(field);
            let new_value = new.get_path(field);
            if old_value == new_value {
                return Ok(());
            }
            let mut inner = handle.inner.lock();
            if let Some(value) = old_value {
                if inner.remove(&canonical_key(value), id)? {
                    handle.cardinality.fetch_sub(1, Ordering::Relaxed);
                }
            }
            if let Some(value) = new_value {
                inner.insert(&canonical_key(value), id)?;
                handle.cardinality.fetch_add(1, Ordering::Relaxed);
            }
            drop(inner);
            self.persist_root_if_moved(field, handle)
        })
    }

    pub fn on_delete(&self, id: &str, body: &Fields) -> DbResult<()> {
        self.for_each_index(|field, handle| {
            if let Some(value) = body.get_path(field) {
                if handle.inner.lock().remove(&canonical_key(value), id)? {
                    handle.cardinality.fetch_sub(1, Ordering::Relaxed);
                }
            }
            Ok(())
        })
    }

    /// Visit indexes in ascending field order, one lock at a time.
    fn for_each_index(
        &self,
        mut f: impl FnMut(&str, &Arc<IndexHandle>) -> DbResult<()>,
    ) -> DbResult<()> {
        let handles: Vec<Arc<IndexHandle>> = self.indexes.read().values().cloned().collect();
        for handle in &handles {
            f(&handle.field, handle)?;
        }
        Ok(())
    }

    /// An ordered index's root moves on a root split; keep the header
    /// table pointing at the current root.
    fn persist_root_if_moved(&self, field: &str, handle: &Arc<IndexHandle>) -> DbResult<()> {
        let root = handle.inner.lock().root();
        let stored = self.pool.header(|h| h.index(field).map(|e| e.root));
        if stored != Some(root) {
            let kind = handle.kind;
            self.pool.update_header(|h| {
                if let Some(entry) = h.index_mut(field) {
                    *entry = IndexEntry::new(index_name(field, kind), kind, field, root);
                }
            })?;
        }
        Ok(())
    }
}

fn index_name(field: &str, kind: IndexKind) -> String {
    format!("idx_{kind}_{field}")
}
