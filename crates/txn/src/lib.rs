//! Optimistic transactions over a collection.
//!
//! The model is snapshot-plus-validation: reads go to the last
//! committed state (with per-transaction read stability at
//! `repeatable_read` and above), writes are buffered in the transaction
//! until commit, and commit validates before applying anything.
//!
//! Commit sequence: (1) validate — at `serializable`, every record in
//! the read set is re-checked and any version change fails the commit
//! with `TransactionConflict` naming the changed ids; (2..5) the
//! operation list is handed to [`Collection::apply_batch`], which locks
//! the touched ids, logs every operation, applies records and indexes
//! together, and flushes the WAL through the commit record. A failed
//! commit leaves no trace; the caller retries with a fresh transaction.

#[cfg(test)]
mod tests;

use collection::{BatchOp, Collection, Document};
use common::{DbError, DbResult};
use hashbrown::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Accepted for completeness; behaves as `ReadCommitted` because
    /// writes are buffered until commit and never visible early.
    ReadUncommitted,
    #[default]
    ReadCommitted,
    /// Re-reads of a record within the transaction return the value
    /// first observed.
    RepeatableRead,
    /// Repeatable reads plus commit-time validation of the whole read
    /// set.
    Serializable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxnStatus {
    Active,
    Committing,
    Committed,
    RolledBack,
}

/// Hands out transactions over one collection.
pub struct TransactionManager {
    collection: Arc<Collection>,
    next_id: AtomicU64,
}

impl TransactionManager {
    pub fn new(collection: Arc<Collection>) -> Self {
        TransactionManager {
            collection,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn begin(&self, level: IsolationLevel) -> Transaction {
        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        debug!(txn = id, ?level, "transaction started");
        Transaction {
            id,
            level,
            collection: Arc::clone(&self.collection),
            reads: HashMap::new(),
            snapshot: HashMap::new(),
            pending: Vec::new(),
            status: TxnStatus::Active,
        }
    }

    pub fn collection(&self) -> &Arc<Collection> {
        &self.collection
    }
}

/// One open transaction. Writes are queued; nothing touches storage
/// until [`Transaction::commit`].
pub struct Transaction {
    id: u64,
    level: IsolationLevel,
    collection: Arc<Collection>,
    /// id -> version observed at first read (the read set).
    reads: HashMap<String, u64>,
    /// First-read snapshot for repeatable reads; `None` records an
    /// observed absence.
    snapshot: HashMap<String, Option<Document>>,
    /// Buffered operations, in issue order.
    pending: Vec<BatchOp>,
    status: TxnStatus,
}

impl Transaction {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    pub fn status(&self) -> TxnStatus {
        self.status
    }

    /// Read a record. Buffered writes of this transaction are visible
    /// to its own reads; at `repeatable_read` and above, the first read
    /// of each id pins the value for the rest of the transaction.
    pub fn get(&mut self, id: &str) -> DbResult<Option<Document>> {
        self.ensure_active()?;

        // Read-your-writes: the newest buffered op for this id wins.
        for op in self.pending.iter().rev() {
            match op {
                BatchOp::Insert(doc) | BatchOp::Update(doc) if doc.id() == Some(id) => {
                    return Ok(Some(doc.clone()));
                }
                BatchOp::Delete(deleted) if deleted == id => return Ok(None),
                _ => {}
            }
        }

        let stable = matches!(
            self.level,
            IsolationLevel::RepeatableRead | IsolationLevel::Serializable
        );
        if stable {
            if let Some(seen) = self.snapshot.get(id) {
                return Ok(seen.clone());
            }
        }

        let current = self.collection.get(id)?;
        let version = current.as_ref().map(Document::version).unwrap_or(0);
        if self.level == IsolationLevel::Serializable {
            self.reads.entry(id.to_string()).or_insert(version);
        }
        if stable {
            self.snapshot.insert(id.to_string(), current.clone());
        }
        Ok(current)
    }

    /// Queue an insert. The document must carry an id (the transaction
    /// cannot generate one at commit time without breaking replay
    /// determinism).
    pub fn insert(&mut self, doc: Document) -> DbResult<()> {
        self.ensure_active()?;
        if doc.id().is_none() {
            return Err(DbError::InvalidArgument(
                "transactional insert requires an explicit id".into(),
            ));
        }
        self.pending.push(BatchOp::Insert(doc));
        Ok(())
    }

    pub fn update(&mut self, doc: Document) -> DbResult<()> {
        self.ensure_active()?;
        if doc.id().is_none() {
            return Err(DbError::InvalidArgument("update requires an id".into()));
        }
        self.pending.push(BatchOp::Update(doc));
        Ok(())
    }

    pub fn delete(&mut self, id: impl Into<String>) -> DbResult<()> {
        self.ensure_active()?;
        self.pending.push(BatchOp::Delete(id.into()));
        Ok(())
    }

    pub fn pending_ops(&self) -> usize {
        self.pending.len()
    }

    /// Validate and apply. On `TransactionConflict` the transaction is
    /// rolled back and the error carries the conflicting record ids so
    /// the caller can retry narrowly.
    pub fn commit(mut self) -> DbResult<()> {
        self.ensure_active()?;
        self.status = TxnStatus::Committing;

        let read_set: Vec<(String, u64)> = if self.level == IsolationLevel::Serializable {
            self.reads
                .iter()
                .map(|(id, version)| (id.clone(), *version))
                .collect()
        } else {
            Vec::new()
        };

        let ops = std::mem::take(&mut self.pending);
        match self.collection.apply_batch(ops, &read_set) {
            Ok(()) => {
                self.status = TxnStatus::Committed;
                debug!(txn = self.id, "transaction committed");
                Ok(())
            }
            Err(err) => {
                self.status = TxnStatus::RolledBack;
                debug!(txn = self.id, error = %err, "transaction failed to commit");
                Err(err)
            }
        }
    }

    /// Discard the pending queue. Nothing was applied, so nothing needs
    /// undoing.
    pub fn rollback(mut self) {
        self.pending.clear();
        self.status = TxnStatus::RolledBack;
        debug!(txn = self.id, "transaction rolled back");
    }

    fn ensure_active(&self) -> DbResult<()> {
        match self.status {
            TxnStatus::Active => Ok(()),
            other => Err(DbError::InvalidArgument(format!(
                "transaction is {other:?}, not active"
            ))),
        }
    }
}
