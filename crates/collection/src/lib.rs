//! Typed collection layer: CRUD, queries, and optimistic concurrency
//! over the storage core.
//!
//! A `Collection` wires the whole stack together for one on-disk file:
//! pager → buffer pool → WAL → record store, plus the index manager and
//! the caching query engine. Writers on the same record id serialize on
//! a per-record lock table; schema operations (index create/drop,
//! dispose) take the coarse collection lock. Readers go straight to the
//! buffer pool and never block writers.
//!
//! Every successful update bumps the record's version counter; an
//! update carrying a stale expected version fails with
//! `ConcurrencyConflict` and no side effects. The transaction layer
//! builds on [`Collection::apply_batch`], which validates a read set
//! and applies a whole operation list under one WAL transaction scope.

mod document;
mod locks;

pub use document::{Document, Entity};
pub use store::recovery::RecoverySummary;

use buffer::BufferPool;
use codec::{Record, TypeRegistry};
use common::{
    CancelToken, Clock, Config, DbError, DbResult, IdGenerator, IndexKind, SystemClock,
    UuidGenerator,
};
use crypto::cipher_for_key;
use document::{entity_from_body, entity_to_body};
use index::IndexManager;
use locks::LockTable;
use pager::Pager;
use parking_lot::RwLock;
use planner::{ExecContext, QueryEngine};
use query::Query;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use store::{recovery, RecordStore};
use tracing::{debug, info};
use types::Fields;
use wal::{IndexChange, Wal};

/// Pluggable runtime services; defaults are the real ones.
pub struct Dependencies {
    pub registry: Arc<TypeRegistry>,
    pub ids: Arc<dyn IdGenerator>,
    pub clock: Arc<dyn Clock>,
}

impl Default for Dependencies {
    fn default() -> Self {
        Dependencies {
            registry: Arc::new(TypeRegistry::default()),
            ids: Arc::new(UuidGenerator),
            clock: Arc::new(SystemClock),
        }
    }
}

/// One operation in a batched (transactional) apply.
#[derive(Clone, Debug)]
pub enum BatchOp {
    /// Document must carry an id.
    Insert(Document),
    /// Document must carry an id; its version is the expected version
    /// (0 skips the check).
    Update(Document),
    Delete(String),
}

impl BatchOp {
    fn id(&self) -> DbResult<&str> {
        match self {
            BatchOp::Insert(doc) | BatchOp::Update(doc) => doc
                .id()
                .ok_or_else(|| DbError::InvalidArgument("operation requires an id".into())),
            BatchOp::Delete(id) => Ok(id),
        }
    }
}

/// Counters surfaced to monitoring.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stats {
    pub count: u64,
    pub index_count: usize,
    pub cache_hit_ratio: f64,
}

pub struct Collection {
    name: String,
    config: Config,
    store: RecordStore,
    indexes: IndexManager,
    engine: QueryEngine,
    registry: Arc<TypeRegistry>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    record_locks: LockTable,
    /// Coarse collection lock: schema changes exclusive, record ops
    /// shared.
    schema: RwLock<()>,
    disposed: AtomicBool,
    /// Whether open-time recovery replayed anything.
    recovered: Option<RecoverySummary>,
}

impl Collection {
    /// Open or create the collection file at `path`.
    pub fn open(path: &Path, config: Config) -> DbResult<Collection> {
        Self::open_with(path, config, Dependencies::default())
    }

    pub fn open_with(
        path: &Path,
        config: Config,
        deps: Dependencies,
    ) -> DbResult<Collection> {
        config.validate()?;
        let name = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("collection")
            .to_string();

        let cipher = cipher_for_key(config.encryption_key.as_deref())?;
        let pager = Pager::open(path, &name, &config, Arc::from(cipher))?;
        let wal = Arc::new(Wal::open(&Config::wal_path(path))?);
        let pool = BufferPool::new(pager, wal, config.buffer_pool_pages);
        let store = RecordStore::open(Arc::clone(&pool))?;

        let recovered = if recovery::needs_recovery(&store) {
            info!(collection = %name, "dirty shutdown detected, running recovery");
            Some(recovery::recover(&store)?)
        } else {
            None
        };

        let indexes = if recovered.is_some() {
            // Recovery replayed records without index maintenance, and
            // the persisted structures may postdate the last checkpoint
            // only partially; rebuild them from the records.
            let registry = Arc::clone(&deps.registry);
            IndexManager::open_rebuilt(Arc::clone(&pool), || {
                let registry = Arc::clone(&registry);
                store.stream().map(move |item| {
                    let (id, bytes) = item?;
                    let record = codec::decode_record(&bytes, &registry)?;
                    Ok((id, record.body))
                })
            })?
        } else {
            IndexManager::open(Arc::clone(&pool))?
        };

        let engine = QueryEngine::new(config.plan_cache_size, config.result_cache);
        pool.set_dirty_shutdown(true)?;
        debug!(collection = %name, records = store.count(), "collection open");

        Ok(Collection {
            name,
            config,
            store,
            indexes,
            engine,
            registry: deps.registry,
            ids: deps.ids,
            clock: deps.clock,
            record_locks: LockTable::new(),
            schema: RwLock::new(()),
            disposed: AtomicBool::new(false),
            recovered,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current UTC time as a timestamp value, from the configured
    /// clock. Tests substitute a fixed clock via [`Dependencies`].
    pub fn timestamp_now(&self) -> types::Value {
        types::Value::timestamp_from(self.clock.now())
    }

    /// Recovery summary from open, if a recovery pass ran.
    pub fn recovery_summary(&self) -> Option<&RecoverySummary> {
        self.recovered.as_ref()
    }

    // ---- document CRUD ----

    /// Insert a document, generating a v4 UUID when it carries no id.
    /// Returns the record id.
    pub fn insert(&self, mut doc: Document) -> DbResult<String> {
        let id = match doc.id() {
            Some(id) => id.to_string(),
            None => {
                let id = self.ids.new_id();
                doc.set_id(id.clone());
                id
            }
        };
        self.apply_batch(vec![BatchOp::Insert(doc)], &[])?;
        Ok(id)
    }

    /// Insert several documents atomically: all or none.
    pub fn insert_many(&self, docs: Vec<Document>) -> DbResult<Vec<String>> {
        let mut ops = Vec::with_capacity(docs.len());
        let mut ids = Vec::with_capacity(docs.len());
        for mut doc in docs {
            let id = match doc.id() {
                Some(id) => id.to_string(),
                None => {
                    let id = self.ids.new_id();
                    doc.set_id(id.clone());
                    id
                }
            };
            ids.push(id);
            ops.push(BatchOp::Insert(doc));
        }
        self.apply_batch(ops, &[])?;
        Ok(ids)
    }

    pub fn get(&self, id: &str) -> DbResult<Option<Document>> {
        let _schema = self.schema.read();
        self.ensure_live()?;
        match self.store.get(id)? {
            Some(bytes) => {
                let record = codec::decode_record(&bytes, &self.registry)?;
                Ok(Some(Document::from_parts(
                    record.id,
                    record.version,
                    record.body,
                )))
            }
            None => Ok(None),
        }
    }

    /// Update an existing document. The document's version is the
    /// expected version: if it is non-zero and differs from the current
    /// one, the update fails with `ConcurrencyConflict` and no side
    /// effects.
    pub fn update(&self, doc: Document) -> DbResult<()> {
        self.apply_batch(vec![BatchOp::Update(doc)], &[])
    }

    pub fn delete(&self, id: &str) -> DbResult<bool> {
        {
            let _schema = self.schema.read();
            self.ensure_live()?;
            if !self.store.exists(id)? {
                return Ok(false);
            }
        }
        match self.apply_batch(vec![BatchOp::Delete(id.to_string())], &[]) {
            Ok(()) => Ok(true),
            // Deleted by a racing writer between the check and the lock.
            Err(DbError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    // ---- typed entity CRUD ----

    pub fn insert_entity<T: Entity>(&self, entity: &mut T) -> DbResult<String> {
        let body = entity_to_body(entity)?;
        let mut doc = Document::from(body);
        if let Some(id) = entity.entity_id() {
            doc.set_id(id);
        }
        let id = self.insert(doc)?;
        entity.set_entity_id(&id);
        Ok(id)
    }

    pub fn get_entity<T: Entity>(&self, id: &str) -> DbResult<Option<T>> {
        match self.get(id)? {
            Some(doc) => {
                let mut entity: T = entity_from_body(doc.body())?;
                entity.set_entity_id(id);
                Ok(Some(entity))
            }
            None => Ok(None),
        }
    }

    pub fn update_entity<T: Entity>(&self, entity: &T) -> DbResult<()> {
        let id = entity
            .entity_id()
            .ok_or_else(|| DbError::InvalidArgument("entity has no id".into()))?;
        let body = entity_to_body(entity)?;
        let mut doc = Document::from(body);
        doc.set_id(id);
        self.update(doc)
    }

    // ---- queries ----

    pub fn find(&self, query: &Query) -> DbResult<Vec<Document>> {
        self.find_with(query, CancelToken::new())
    }

    pub fn find_with(&self, query: &Query, cancel: CancelToken) -> DbResult<Vec<Document>> {
        let _schema = self.schema.read();
        self.ensure_live()?;
        let mut ctx = ExecContext::new(&self.store, &self.indexes, &self.registry, cancel);
        let tuples = self.engine.find(&mut ctx, query)?;
        Ok(tuples
            .iter()
            .map(|t| Document::from_parts(t.id.clone(), t.version, t.body.clone()))
            .collect())
    }

    pub fn find_one(&self, query: &Query) -> DbResult<Option<Document>> {
        Ok(self.find(query)?.into_iter().next())
    }

    pub fn count(&self) -> u64 {
        self.store.count()
    }

    pub fn count_where(&self, query: &Query) -> DbResult<u64> {
        Ok(self.find(query)?.len() as u64)
    }

    pub fn exists_where(&self, query: &Query) -> DbResult<bool> {
        Ok(self.find_one(query)?.is_some())
    }

    /// Human-readable plan for `query` against the current indexes.
    pub fn explain(&self, query: &Query) -> String {
        planner::plan_query(&self.indexes, query).to_string()
    }

    // ---- schema ----

    pub fn create_index(&self, field: &str, kind: IndexKind) -> DbResult<()> {
        let _schema = self.schema.write();
        self.ensure_live()?;
        let txn = self.store.begin()?;
        self.store
            .log_index_change(&txn, field, IndexChange::Created(kind))?;
        let result = self
            .indexes
            .create_index(field, kind, self.decoded_stream());
        match result {
            Ok(()) => {
                self.store.commit(txn)?;
                self.engine.invalidate_all();
                Ok(())
            }
            Err(err) => {
                self.store.rollback(txn)?;
                Err(err)
            }
        }
    }

    pub fn drop_index(&self, field: &str) -> DbResult<()> {
        let _schema = self.schema.write();
        self.ensure_live()?;
        let txn = self.store.begin()?;
        self.store
            .log_index_change(&txn, field, IndexChange::Dropped)?;
        match self.indexes.drop_index(field) {
            Ok(()) => {
                self.store.commit(txn)?;
                self.engine.invalidate_all();
                Ok(())
            }
            Err(err) => {
                self.store.rollback(txn)?;
                Err(err)
            }
        }
    }

    pub fn index_fields(&self) -> Vec<String> {
        self.indexes.fields()
    }

    // ---- maintenance ----

    pub fn flush(&self) -> DbResult<()> {
        let _schema = self.schema.read();
        self.ensure_live()?;
        self.store.flush()
    }

    pub fn checkpoint(&self) -> DbResult<()> {
        let _schema = self.schema.read();
        self.ensure_live()?;
        self.store.checkpoint()
    }

    /// Flush, checkpoint, clear the dirty flag, and refuse all further
    /// operations.
    pub fn dispose(&self) -> DbResult<()> {
        let _schema = self.schema.write();
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.store.close()?;
        self.store.pool().set_dirty_shutdown(false)?;
        info!(collection = %self.name, "collection disposed");
        Ok(())
    }

    pub fn stats(&self) -> Stats {
        Stats {
            count: self.store.count(),
            index_count: self.indexes.index_count(),
            cache_hit_ratio: self.store.pool().hit_ratio(),
        }
    }

    // ---- snapshot / restore (backup interface) ----

    /// Schema version plus every record's encoded bytes, id-ordered.
    pub fn snapshot(&self) -> DbResult<(u32, Vec<(String, Vec<u8>)>)> {
        let _schema = self.schema.read();
        self.ensure_live()?;
        let version = self.store.pool().header(|h| h.schema_version);
        let records: Vec<(String, Vec<u8>)> = self.store.stream().collect::<DbResult<_>>()?;
        Ok((version, records))
    }

    /// Replace the collection contents with a snapshot.
    pub fn restore(&self, records: Vec<(String, Vec<u8>)>) -> DbResult<()> {
        let _schema = self.schema.write();
        self.ensure_live()?;
        // Validate before touching anything.
        for (id, bytes) in &records {
            let record = codec::decode_record(bytes, &self.registry)?;
            if record.id != *id {
                return Err(DbError::InvalidArgument(format!(
                    "snapshot id '{id}' does not match record id '{}'",
                    record.id
                )));
            }
        }

        let mut txn = self.store.begin()?;
        for id in self.store.ids() {
            self.store.delete(&mut txn, &id)?;
        }
        for (id, bytes) in &records {
            self.store.insert(&mut txn, id, bytes)?;
        }
        self.store.commit(txn)?;

        self.rebuild_indexes()?;
        self.engine.invalidate_all();
        Ok(())
    }

    // ---- migration interface ----

    pub fn iterate_all(&self) -> DbResult<Vec<(String, Fields)>> {
        let _schema = self.schema.read();
        self.ensure_live()?;
        self.decoded_stream().collect()
    }

    /// Apply field-map replacements per id, bumping versions. Used by
    /// migrations; skips the optimistic version check.
    pub fn batch_apply(&self, changes: Vec<(String, Fields)>) -> DbResult<()> {
        let ops = changes
            .into_iter()
            .map(|(id, body)| {
                let mut doc = Document::from(body);
                doc.set_id(id);
                BatchOp::Update(doc)
            })
            .collect();
        self.apply_batch(ops, &[])
    }

    pub fn read_schema_version(&self) -> u32 {
        self.store.pool().header(|h| h.schema_version)
    }

    pub fn write_schema_version(&self, version: u32) -> DbResult<()> {
        let _schema = self.schema.write();
        self.ensure_live()?;
        self.store.pool().update_header(|h| h.schema_version = version)
    }

    // ---- transactional batch apply ----

    /// Validate a read set and apply an operation list atomically.
    ///
    /// The transaction layer's commit path. All touched ids (reads and
    /// writes) are locked as one unit; `read_set` entries whose current
    /// version moved fail the whole batch with `TransactionConflict`
    /// naming the conflicting ids. Operations then apply in order under
    /// one WAL transaction scope; any failure rolls back both record
    /// and index changes.
    pub fn apply_batch(&self, ops: Vec<BatchOp>, read_set: &[(String, u64)]) -> DbResult<()> {
        let _schema = self.schema.read();
        self.ensure_live()?;
        if ops.is_empty() && read_set.is_empty() {
            return Ok(());
        }

        let mut lock_ids: Vec<String> = ops
            .iter()
            .map(|op| op.id().map(str::to_string))
            .collect::<DbResult<_>>()?;
        lock_ids.extend(read_set.iter().map(|(id, _)| id.clone()));
        lock_ids.sort_unstable();
        lock_ids.dedup();
        let _locks = self
            .record_locks
            .acquire_many(&lock_ids, self.config.lock_timeout)?;

        // Commit-time validation of the read set.
        let mut conflicts = Vec::new();
        for (id, expected) in read_set {
            let current = self.current_version(id)?;
            if current != Some(*expected) && !(current.is_none() && *expected == 0) {
                conflicts.push(id.clone());
            }
        }
        if !conflicts.is_empty() {
            return Err(DbError::TransactionConflict { ids: conflicts });
        }

        let mut txn = self.store.begin()?;
        // Index changes applied so far, for reversal on failure.
        let mut applied: Vec<IndexRollback> = Vec::new();
        let result = (|| -> DbResult<()> {
            for op in &ops {
                match op {
                    BatchOp::Insert(doc) => {
                        let id = doc.id().expect("checked above");
                        let record = Record::new(id, 1, doc.body().clone());
                        let bytes = self.encode_checked(&record)?;
                        self.store.insert(&mut txn, id, &bytes)?;
                        self.indexes.on_insert(id, doc.body())?;
                        applied.push(IndexRollback::Insert(id.to_string(), doc.body().clone()));
                    }
                    BatchOp::Update(doc) => {
                        let id = doc.id().expect("checked above");
                        let current_bytes = self
                            .store
                            .get(id)?
                            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
                        let current = codec::decode_record(&current_bytes, &self.registry)?;
                        if doc.version() != 0 && doc.version() != current.version {
                            return Err(DbError::ConcurrencyConflict(id.to_string()));
                        }
                        let record =
                            Record::new(id, current.version + 1, doc.body().clone());
                        let bytes = self.encode_checked(&record)?;
                        self.store.update(&mut txn, id, &bytes)?;
                        self.indexes.on_update(id, &current.body, doc.body())?;
                        applied.push(IndexRollback::Update(
                            id.to_string(),
                            current.body,
                            doc.body().clone(),
                        ));
                    }
                    BatchOp::Delete(id) => {
                        let current_bytes = self
                            .store
                            .get(id)?
                            .ok_or_else(|| DbError::NotFound(id.clone()))?;
                        let current = codec::decode_record(&current_bytes, &self.registry)?;
                        self.store.delete(&mut txn, id)?;
                        self.indexes.on_delete(id, &current.body)?;
                        applied.push(IndexRollback::Delete(id.clone(), current.body));
                    }
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                self.store.commit(txn)?;
                self.engine.invalidate_results();
                Ok(())
            }
            Err(err) => {
                for change in applied.into_iter().rev() {
                    change.revert(&self.indexes)?;
                }
                self.store.rollback(txn)?;
                Err(err)
            }
        }
    }

    /// Current version counter of a record, without decoding the body.
    pub fn current_version(&self, id: &str) -> DbResult<Option<u64>> {
        match self.store.get(id)? {
            Some(bytes) => Ok(Some(codec::record_version_prefix(&bytes)?)),
            None => Ok(None),
        }
    }

    // ---- internals ----

    fn ensure_live(&self) -> DbResult<()> {
        if self.disposed.load(Ordering::Acquire) {
            Err(DbError::Disposed)
        } else {
            Ok(())
        }
    }

    fn encode_checked(&self, record: &Record) -> DbResult<Vec<u8>> {
        let len = codec::encoded_record_len(record);
        if len > self.config.max_record_size {
            return Err(DbError::InvalidArgument(format!(
                "record '{}' is {len} bytes encoded, limit is {}",
                record.id, self.config.max_record_size
            )));
        }
        Ok(codec::encode_record(record))
    }

    fn decoded_stream(&self) -> impl Iterator<Item = DbResult<(String, Fields)>> + '_ {
        self.store.stream().map(|item| {
            let (id, bytes) = item?;
            let record = codec::decode_record(&bytes, &self.registry)?;
            Ok((id, record.body))
        })
    }

    fn rebuild_indexes(&self) -> DbResult<()> {
        self.indexes.rebuild_all(|| self.decoded_stream())
    }
}

enum IndexRollback {
    Insert(String, Fields),
    Update(String, Fields, Fields),
    Delete(String, Fields),
}

impl IndexRollback {
    fn revert(self, indexes: &IndexManager) -> DbResult<()> {
        match self {
            IndexRollback::Insert(id, body) => indexes.on_delete(&id, &body),
            IndexRollback::Update(id, old, new) => indexes.on_update(&id, &new, &old),
            IndexRollback::Delete(id, body) => indexes.on_insert(&id, &body),
        }
    }
}
