//! Per-record lock table.
//!
//! Writers on the same record id serialize here; readers never touch
//! the table. Waits park on a condvar with a deadline, surfacing
//! [`DbError::LockTimeout`] with no side effects. Multi-record
//! operations acquire their whole id set atomically, which sidesteps
//! lock-order deadlocks entirely (ids are still kept sorted by the
//! callers for determinism).

use common::{DbError, DbResult};
use hashbrown::HashSet;
use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default, Debug)]
pub struct LockTable {
    held: Mutex<HashSet<String>>,
    released: Condvar,
}

impl LockTable {
    pub fn new() -> Self {
        LockTable::default()
    }

    /// Lock a single record id.
    pub fn acquire<'a>(&'a self, id: &str, timeout: Duration) -> DbResult<RecordGuard<'a>> {
        self.acquire_many(std::slice::from_ref(&id.to_string()), timeout)
    }

    /// Lock a set of record ids as one unit: either all of them within
    /// the timeout, or none.
    pub fn acquire_many<'a>(
        &'a self,
        ids: &[String],
        timeout: Duration,
    ) -> DbResult<RecordGuard<'a>> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock();
        while ids.iter().any(|id| held.contains(id)) {
            if self.released.wait_until(&mut held, deadline).timed_out() {
                let blocked = ids
                    .iter()
                    .find(|id| held.contains(*id))
                    .cloned()
                    .unwrap_or_default();
                return Err(DbError::LockTimeout(blocked));
            }
        }
        for id in ids {
            held.insert(id.clone());
        }
        Ok(RecordGuard {
            table: self,
            ids: ids.to_vec(),
        })
    }
}

/// Releases its ids and wakes waiters on drop.
#[derive(Debug)]
pub struct RecordGuard<'a> {
    table: &'a LockTable,
    ids: Vec<String>,
}

impl Drop for RecordGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.table.held.lock();
        for id in &self.ids {
            held.remove(id);
        }
        self.table.released.notify_all();
    }
}
