//! Crash recovery: analysis, redo, undo.
//!
//! Runs when a file is opened after a dirty shutdown (or with log
//! records outstanding past the last checkpoint). All record images
//! needed for redo and undo travel in the log itself, so recovery works
//! from the WAL and the heap alone:
//!
//! 1. **Analysis** — scan the retained log forward (checkpointing
//!    already truncated everything older than the oldest transaction
//!    active at checkpoint time), classifying each transaction by its
//!    terminal record.
//! 2. **Redo** — re-apply every operation of a committed transaction in
//!    LSN order through the store's idempotent put/remove primitives.
//! 3. **Undo** — reverse the operations of transactions that never
//!    reached a terminal record, newest first, from their before
//!    images, then log an abort on their behalf.
//!
//! The pass is idempotent: a crash during recovery re-runs it with the
//! same outcome. It finishes with a checkpoint, leaving a clean log.

use crate::RecordStore;
use common::{DbResult, Lsn, TxnId};
use hashbrown::{HashMap, HashSet};
use tracing::{info, warn};
use wal::{WalOp, WalRecord};

/// What recovery did, for logging and for the layers above (index
/// rebuilds key off `replayed > 0`).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RecoverySummary {
    pub committed_txns: usize,
    pub rolled_back_txns: usize,
    pub replayed: usize,
    pub undone: usize,
}

/// True when the file needs a recovery pass before use.
pub fn needs_recovery(store: &RecordStore) -> bool {
    let dirty = store.pool().header(|h| h.dirty_shutdown);
    dirty || has_records_past_checkpoint(store)
}

fn has_records_past_checkpoint(store: &RecordStore) -> bool {
    match store.wal().iterate_since(0) {
        Ok(records) => records
            .iter()
            .rev()
            .take_while(|r| !matches!(r.op, WalOp::CheckpointEnd { .. }))
            .any(|r| !matches!(r.op, WalOp::CheckpointBegin)),
        Err(_) => true,
    }
}

pub fn recover(store: &RecordStore) -> DbResult<RecoverySummary> {
    // Checkpointing truncates the log up to the oldest transaction
    // still active at checkpoint time, so the retained log is exactly
    // the span analysis needs: scan all of it. (Redo of work already in
    // the pages is harmless; the primitives are idempotent.)
    let records = store.wal().iterate_since(0)?;
    let tail = &records[..];

    let mut committed: HashSet<TxnId> = HashSet::new();
    let mut aborted: HashSet<TxnId> = HashSet::new();
    let mut seen: HashSet<TxnId> = HashSet::new();
    for record in tail {
        match record.op {
            WalOp::Commit => {
                committed.insert(record.txn_id);
            }
            WalOp::Abort => {
                aborted.insert(record.txn_id);
            }
            WalOp::Begin
            | WalOp::Insert { .. }
            | WalOp::Update { .. }
            | WalOp::Delete { .. }
            | WalOp::IndexUpdate { .. } => {
                seen.insert(record.txn_id);
            }
            WalOp::CheckpointBegin | WalOp::CheckpointEnd { .. } => {}
        }
    }
    let in_flight: HashSet<TxnId> = seen
        .iter()
        .filter(|id| !committed.contains(*id) && !aborted.contains(*id))
        .copied()
        .collect();

    let mut summary = RecoverySummary {
        committed_txns: committed.len(),
        rolled_back_txns: in_flight.len(),
        ..Default::default()
    };

    // Redo committed work forward.
    for record in tail {
        if !committed.contains(&record.txn_id) {
            continue;
        }
        match &record.op {
            WalOp::Insert { id, after } | WalOp::Update { id, after, .. } => {
                store.apply_put(id, after, record.lsn)?;
                summary.replayed += 1;
            }
            WalOp::Delete { id, .. } => {
                store.apply_remove(id, record.lsn)?;
                summary.replayed += 1;
            }
            _ => {}
        }
    }

    // Undo in-flight work backward. Aborted transactions already undid
    // themselves before logging the abort.
    let mut undo_by_txn: HashMap<TxnId, Vec<&WalRecord>> = HashMap::new();
    for record in tail {
        if in_flight.contains(&record.txn_id) {
            undo_by_txn.entry(record.txn_id).or_default().push(record);
        }
    }
    let max_lsn: Lsn = records.last().map(|r| r.lsn).unwrap_or(0);
    for (txn_id, ops) in undo_by_txn {
        for record in ops.iter().rev() {
            match &record.op {
                WalOp::Insert { id, .. } => {
                    store.apply_remove(id, max_lsn)?;
                    summary.undone += 1;
                }
                WalOp::Update { id, before, .. } | WalOp::Delete { id, before } => {
                    store.apply_put(id, before, max_lsn)?;
                    summary.undone += 1;
                }
                _ => {}
            }
        }
        store.wal().append(txn_id, &WalOp::Abort)?;
    }

    if summary.replayed > 0 || summary.undone > 0 {
        info!(
            replayed = summary.replayed,
            undone = summary.undone,
            committed = summary.committed_txns,
            rolled_back = summary.rolled_back_txns,
            "recovery applied log records"
        );
    }

    // Settle: flush pages, checkpoint, clear the dirty flag.
    store.checkpoint()?;
    store.pool().set_dirty_shutdown(false)?;

    if store.pool().header(|h| h.record_count) != store.count() {
        warn!("record count drifted during recovery");
    }
    Ok(summary)
}
