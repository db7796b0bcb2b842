//! Paged record store: durable heap of encoded records addressed by id.
//!
//! Records live on slotted heap pages; oversized records spill into
//! overflow chains. An in-memory directory maps record id to its stable
//! head slot and is rebuilt from a heap scan on open. Every mutation
//! appends a WAL record carrying before/after images before any page
//! is touched, so a crash at any byte recovers to a transaction
//! boundary (see [`recovery`]).
//!
//! Mutations run inside a [`StoreTxn`] scope: changes are applied
//! eagerly with undo captured, `commit` makes them durable
//! (`flush_through` the commit LSN), `rollback` reverses them.

mod heap;
pub mod recovery;

use buffer::{BufferPool, PinnedPage};
use common::{DbError, DbResult, Lsn, PageId, RecordSlot, TxnId};
use hashbrown::HashMap;
use heap::SlotEntry;
use pager::PageType;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use wal::{Wal, WalOp};

/// Overflow page body: `u64 next | u32 chunk_len | chunk bytes`.
const OVERFLOW_HEADER: usize = 12;
/// Record ids are short strings; anything longer is a caller bug.
const MAX_ID_LEN: usize = 1024;

struct StoreState {
    /// id -> stable head slot.
    directory: HashMap<String, RecordSlot>,
    /// Contiguous free bytes per heap page, pid-ordered for first-fit.
    free_space: BTreeMap<PageId, usize>,
    record_count: u64,
    /// begin LSN per active transaction; bounds WAL truncation.
    active: HashMap<TxnId, Lsn>,
    open: bool,
}

pub struct RecordStore {
    pool: Arc<BufferPool>,
    wal: Arc<Wal>,
    state: RwLock<StoreState>,
    next_txn: AtomicU64,
}

/// Undo actions captured while a transaction applies its operations.
enum UndoOp {
    Remove(String),
    Restore(String, Vec<u8>),
}

/// An open store-level transaction scope. Operations applied through it
/// are invisible to crash recovery until `commit` appends and flushes
/// the commit record.
pub struct StoreTxn {
    id: TxnId,
    begin_lsn: Lsn,
    undo: Vec<UndoOp>,
    finished: bool,
}

impl StoreTxn {
    pub fn id(&self) -> TxnId {
        self.id
    }

    pub fn begin_lsn(&self) -> Lsn {
        self.begin_lsn
    }
}

impl Drop for StoreTxn {
    fn drop(&mut self) {
        if !self.finished {
            warn!(txn = self.id, "transaction dropped without commit or rollback");
        }
    }
}

impl RecordStore {
    /// Build the store over an open pool, rebuilding the directory and
    /// free-space map from a full heap scan.
    pub fn open(pool: Arc<BufferPool>) -> DbResult<Self> {
        let wal = Arc::clone(pool.wal());
        let next_txn = wal
            .iterate_since(0)?
            .iter()
            .map(|r| r.txn_id)
            .max()
            .unwrap_or(0)
            + 1;

        let store = RecordStore {
            pool,
            wal,
            state: RwLock::new(StoreState {
                directory: HashMap::new(),
                free_space: BTreeMap::new(),
                record_count: 0,
                active: HashMap::new(),
                open: true,
            }),
            next_txn: AtomicU64::new(next_txn),
        };
        store.rebuild_directory()?;
        Ok(store)
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    // ---- transaction scope ----

    pub fn begin(&self) -> DbResult<StoreTxn> {
        let mut state = self.state.write();
        self.ensure_open(&state)?;
        let id = self.next_txn.fetch_add(1, Ordering::AcqRel);
        let begin_lsn = self.wal.append(id, &WalOp::Begin)?;
        state.active.insert(id, begin_lsn);
        Ok(StoreTxn {
            id,
            begin_lsn,
            undo: Vec::new(),
            finished: false,
        })
    }

    /// Append the commit record and flush the WAL through it. This is
    /// the durability point: after `commit` returns, the transaction
    /// survives any crash.
    pub fn commit(&self, mut txn: StoreTxn) -> DbResult<Lsn> {
        let commit_lsn = self.wal.append(txn.id, &WalOp::Commit)?;
        self.wal.flush_through(commit_lsn)?;
        let mut state = self.state.write();
        state.active.remove(&txn.id);
        txn.finished = true;
        Ok(commit_lsn)
    }

    /// Reverse every applied operation (newest first) and append an
    /// abort record.
    pub fn rollback(&self, mut txn: StoreTxn) -> DbResult<()> {
        let mut state = self.state.write();
        while let Some(op) = txn.undo.pop() {
            match op {
                UndoOp::Remove(id) => {
                    self.apply_remove_locked(&mut state, &id, 0)?;
                }
                UndoOp::Restore(id, bytes) => {
                    self.apply_put_locked(&mut state, &id, &bytes, 0)?;
                }
            }
        }
        let abort_lsn = self.wal.append(txn.id, &WalOp::Abort)?;
        self.wal.flush_through(abort_lsn)?;
        state.active.remove(&txn.id);
        txn.finished = true;
        Ok(())
    }

    // ---- mutations ----

    pub fn insert(&self, txn: &mut StoreTxn, id: &str, bytes: &[u8]) -> DbResult<()> {
        validate_id(id)?;
        let mut state = self.state.write();
        self.ensure_open(&state)?;
        if state.directory.contains_key(id) {
            return Err(DbError::AlreadyExists(id.to_string()));
        }

        let lsn = self.wal.append(
            txn.id,
            &WalOp::Insert {
                id: id.to_string(),
                after: bytes.to_vec(),
            },
        )?;
        let slot = self.place_record(&mut state, bytes, lsn)?;
        state.directory.insert(id.to_string(), slot);
        state.record_count += 1;
        txn.undo.push(UndoOp::Remove(id.to_string()));
        Ok(())
    }

    pub fn update(&self, txn: &mut StoreTxn, id: &str, bytes: &[u8]) -> DbResult<()> {
        validate_id(id)?;
        let mut state = self.state.write();
        self.ensure_open(&state)?;
        let head = *state
            .directory
            .get(id)
            .ok_or_else(|| DbError::NotFound(id.to_string()))?;
        let before = self.read_record_at(head)?;

        let lsn = self.wal.append(
            txn.id,
            &WalOp::Update {
                id: id.to_string(),
                before: before.clone(),
                after: bytes.to_vec(),
            },
        )?;
        self.replace_record(&mut state, head, bytes, lsn)?;
        txn.undo.push(UndoOp::Restore(id.to_string(), before));
        Ok(())
    }

    pub fn delete(&self, txn: &mut StoreTxn, id: &str) -> DbResult<bool> {
        let mut state = self.state.write();
        self.ensure_open(&state)?;
        let head = match state.directory.get(id) {
            Some(slot) => *slot,
            None => return Ok(false),
        };
        let before = self.read_record_at(head)?;

        let lsn = self.wal.append(
            txn.id,
            &WalOp::Delete {
                id: id.to_string(),
                before: before.clone(),
            },
        )?;
        self.erase_record(&mut state, head, lsn)?;
        state.directory.remove(id);
        state.record_count -= 1;
        txn.undo.push(UndoOp::Restore(id.to_string(), before));
        Ok(true)
    }

    pub fn upsert(&self, txn: &mut StoreTxn, id: &str, bytes: &[u8]) -> DbResult<()> {
        let exists = self.state.read().directory.contains_key(id);
        if exists {
            self.update(txn, id, bytes)
        } else {
            self.insert(txn, id, bytes)
        }
    }

    /// Log an index DDL event so recovery can tell schema changes from
    /// data changes.
    pub fn log_index_change(
        &self,
        txn: &StoreTxn,
        field: &str,
        change: wal::IndexChange,
    ) -> DbResult<Lsn> {
        self.wal.append(
            txn.id,
            &WalOp::IndexUpdate {
                field: field.to_string(),
                change,
            },
        )
    }

    // ---- reads ----

    pub fn get(&self, id: &str) -> DbResult<Option<Vec<u8>>> {
        let state = self.state.read();
        self.ensure_open(&state)?;
        match state.directory.get(id) {
            Some(&slot) => Ok(Some(self.read_record_at(slot)?)),
            None => Ok(None),
        }
    }

    pub fn exists(&self, id: &str) -> DbResult<bool> {
        let state = self.state.read();
        self.ensure_open(&state)?;
        Ok(state.directory.contains_key(id))
    }

    pub fn count(&self) -> u64 {
        self.state.read().record_count
    }

    /// All record ids, sorted. The basis for [`RecordStore::stream`]
    /// and full scans.
    pub fn ids(&self) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<String> = state.directory.keys().cloned().collect();
        ids.sort_unstable();
        ids
    }

    /// Lazily yield `(id, bytes)` for every record, in id order.
    pub fn stream(&self) -> RecordStream<'_> {
        RecordStream {
            store: self,
            ids: self.ids().into_iter(),
        }
    }

    // ---- maintenance ----

    /// Flush dirty pages (WAL first), persist the header, bound the WAL.
    ///
    /// Appends `checkpoint_begin`/`checkpoint_end` and truncates every
    /// log record no active transaction still needs for undo.
    pub fn checkpoint(&self) -> DbResult<()> {
        let state = self.state.write();
        self.ensure_open(&state)?;
        let record_count = state.record_count;

        let begin_lsn = self.wal.append(0, &WalOp::CheckpointBegin)?;
        self.pool.update_header(|h| h.record_count = record_count)?;
        self.pool.flush_all()?;

        let flushed_lsn = self.wal.flushed_lsn();
        let end_lsn = self.wal.append(0, &WalOp::CheckpointEnd { flushed_lsn })?;
        self.wal.flush_through(end_lsn)?;

        let oldest_active = state.active.values().min().copied();
        let safe = match oldest_active {
            Some(begin) => begin.saturating_sub(1).min(begin_lsn - 1),
            None => begin_lsn - 1,
        };
        self.wal.truncate_to(safe)?;
        debug!(end_lsn, truncated_to = safe, "checkpoint complete");
        Ok(())
    }

    /// Flush without truncating the log.
    pub fn flush(&self) -> DbResult<()> {
        let state = self.state.write();
        self.ensure_open(&state)?;
        let record_count = state.record_count;
        self.pool.update_header(|h| h.record_count = record_count)?;
        self.pool.flush_all()
    }

    /// Checkpoint and mark closed; subsequent operations fail `NotOpen`.
    pub fn close(&self) -> DbResult<()> {
        self.checkpoint()?;
        self.state.write().open = false;
        Ok(())
    }

    fn ensure_open(&self, state: &StoreState) -> DbResult<()> {
        if state.open {
            Ok(())
        } else {
            Err(DbError::NotOpen)
        }
    }

    // ---- idempotent primitives used by recovery and rollback ----

    pub(crate) fn apply_put(&self, id: &str, bytes: &[u8], lsn: Lsn) -> DbResult<()> {
        let mut state = self.state.write();
        self.apply_put_locked(&mut state, id, bytes, lsn)
    }

    pub(crate) fn apply_remove(&self, id: &str, lsn: Lsn) -> DbResult<()> {
        let mut state = self.state.write();
        self.apply_remove_locked(&mut state, id, lsn)
    }

    fn apply_put_locked(
        &self,
        state: &mut StoreState,
        id: &str,
        bytes: &[u8],
        lsn: Lsn,
    ) -> DbResult<()> {
        if let Some(&head) = state.directory.get(id) {
            self.erase_record(state, head, lsn)?;
            state.directory.remove(id);
            state.record_count -= 1;
        }
        let slot = self.place_record(state, bytes, lsn)?;
        state.directory.insert(id.to_string(), slot);
        state.record_count += 1;
        Ok(())
    }

    fn apply_remove_locked(&self, state: &mut StoreState, id: &str, lsn: Lsn) -> DbResult<()> {
        if let Some(&head) = state.directory.get(id) {
            self.erase_record(state, head, lsn)?;
            state.directory.remove(id);
            state.record_count -= 1;
        }
        Ok(())
    }

    // ---- physical placement ----

    fn overflow_threshold(&self) -> usize {
        self.pool.payload_size() / 2
    }

    fn overflow_chunk_capacity(&self) -> usize {
        self.pool.payload_size() - OVERFLOW_HEADER
    }

    /// Write record bytes somewhere with room, returning the new slot.
    fn place_record(
        &self,
        state: &mut StoreState,
        bytes: &[u8],
        lsn: Lsn,
    ) -> DbResult<RecordSlot> {
        if bytes.len() > self.overflow_threshold() {
            let first = self.write_overflow_chain(bytes, lsn)?;
            let slot = self.place_slot_entry(
                state,
                SlotEntry::Overflow {
                    first,
                    total_len: bytes.len() as u32,
                },
                0,
                lsn,
            )?;
            Ok(slot)
        } else {
            self.place_inline(state, bytes, lsn)
        }
    }

    fn place_inline(
        &self,
        state: &mut StoreState,
        bytes: &[u8],
        lsn: Lsn,
    ) -> DbResult<RecordSlot> {
        let pid = self.find_heap_page(state, heap::space_needed(bytes.len()))?;
        let pinned = self.pool.pin(pid)?;
        let mut page = pinned.write();
        let slot = heap::take_slot(&mut page)?
            .ok_or_else(|| DbError::CorruptPage(pid.0))?;
        let offset = heap::place_bytes(&mut page, bytes)?;
        heap::write_slot(
            &mut page,
            slot,
            SlotEntry::Active {
                offset,
                len: bytes.len() as u32,
            },
        )?;
        page.set_lsn(lsn);
        let free = heap::free_space(&page)?;
        drop(page);
        state.free_space.insert(pid, free);
        Ok(RecordSlot::new(pid, slot))
    }

    /// Place a bare slot entry (no inline data) on some heap page.
    fn place_slot_entry(
        &self,
        state: &mut StoreState,
        entry: SlotEntry,
        data_len: usize,
        lsn: Lsn,
    ) -> DbResult<RecordSlot> {
        let pid = self.find_heap_page(state, heap::space_needed(data_len))?;
        let pinned = self.pool.pin(pid)?;
        let mut page = pinned.write();
        let slot = heap::take_slot(&mut page)?
            .ok_or_else(|| DbError::CorruptPage(pid.0))?;
        heap::write_slot(&mut page, slot, entry)?;
        page.set_lsn(lsn);
        let free = heap::free_space(&page)?;
        drop(page);
        state.free_space.insert(pid, free);
        Ok(RecordSlot::new(pid, slot))
    }

    /// First-fit over known heap pages; extends the file when none fits.
    fn find_heap_page(&self, state: &mut StoreState, needed: usize) -> DbResult<PageId> {
        if let Some((&pid, _)) = state
            .free_space
            .iter()
            .find(|(_, &free)| free >= needed)
        {
            return Ok(pid);
        }
        let pinned = self.pool.allocate(PageType::Record)?;
        let mut page = pinned.write();
        heap::init_heap_page(&mut page)?;
        let free = heap::free_space(&page)?;
        let pid = page.id;
        drop(page);
        state.free_space.insert(pid, free);
        Ok(pid)
    }

    fn write_overflow_chain(&self, bytes: &[u8], lsn: Lsn) -> DbResult<PageId> {
        let chunk_cap = self.overflow_chunk_capacity();
        let chunks: Vec<&[u8]> = bytes.chunks(chunk_cap).collect();

        let mut pages = Vec::with_capacity(chunks.len());
        for _ in &chunks {
            pages.push(self.pool.allocate(PageType::Overflow)?);
        }
        for (i, chunk) in chunks.iter().enumerate() {
            let next = pages.get(i + 1).map(PinnedPage::id).unwrap_or(PageId(0));
            let mut page = pages[i].write();
            page.write_u64(0, next.0)?;
            page.write_u32(8, chunk.len() as u32)?;
            page.write_bytes(OVERFLOW_HEADER, chunk)?;
            page.set_lsn(lsn);
        }
        Ok(pages[0].id())
    }

    fn read_overflow_chain(&self, first: PageId, total_len: u32) -> DbResult<Vec<u8>> {
        let mut out = Vec::with_capacity(total_len as usize);
        let mut pid = first;
        while !pid.is_nil() {
            let pinned = self.pool.pin(pid)?;
            let page = pinned.read();
            if page.page_type != PageType::Overflow {
                return Err(DbError::CorruptPage(pid.0));
            }
            let next = PageId(page.read_u64(0)?);
            let chunk_len = page.read_u32(8)? as usize;
            out.extend_from_slice(page.read_bytes(OVERFLOW_HEADER, chunk_len)?);
            pid = next;
        }
        if out.len() != total_len as usize {
            return Err(DbError::CorruptPage(first.0));
        }
        Ok(out)
    }

    fn free_overflow_chain(&self, first: PageId) -> DbResult<()> {
        let mut pid = first;
        while !pid.is_nil() {
            let next = {
                let pinned = self.pool.pin(pid)?;
                let page = pinned.read();
                PageId(page.read_u64(0)?)
            };
            self.pool.free(pid)?;
            pid = next;
        }
        Ok(())
    }

    /// Resolve a head slot to the slot actually carrying the data.
    fn resolve_data_slot(&self, head: RecordSlot) -> DbResult<(RecordSlot, SlotEntry)> {
        let entry = self.read_slot_entry(head)?;
        match entry {
            SlotEntry::Forwarded { target } => {
                let target_entry = self.read_slot_entry(target)?;
                match target_entry {
                    SlotEntry::Active { .. } | SlotEntry::Overflow { .. } => {
                        Ok((target, target_entry))
                    }
                    _ => Err(DbError::CorruptPage(target.page_id.0)),
                }
            }
            SlotEntry::Active { .. } | SlotEntry::Overflow { .. } => Ok((head, entry)),
            SlotEntry::Free => Err(DbError::CorruptPage(head.page_id.0)),
        }
    }

    fn read_slot_entry(&self, slot: RecordSlot) -> DbResult<SlotEntry> {
        let pinned = self.pool.pin(slot.page_id)?;
        let page = pinned.read();
        heap::read_slot(&page, slot.slot)
    }

    fn read_record_at(&self, head: RecordSlot) -> DbResult<Vec<u8>> {
        let (slot, entry) = self.resolve_data_slot(head)?;
        match entry {
            SlotEntry::Active { offset, len } => {
                let pinned = self.pool.pin(slot.page_id)?;
                let page = pinned.read();
                Ok(page.read_bytes(offset as usize, len as usize)?.to_vec())
            }
            SlotEntry::Overflow { first, total_len } => {
                self.read_overflow_chain(first, total_len)
            }
            _ => unreachable!("resolve_data_slot returns data entries"),
        }
    }

    /// Overwrite in place when the new bytes fit; otherwise move and
    /// leave a forwarding marker at the stable head slot.
    fn replace_record(
        &self,
        state: &mut StoreState,
        head: RecordSlot,
        bytes: &[u8],
        lsn: Lsn,
    ) -> DbResult<()> {
        let (data_slot, entry) = self.resolve_data_slot(head)?;

        if let SlotEntry::Active { offset, len } = entry {
            if bytes.len() <= len as usize {
                let pinned = self.pool.pin(data_slot.page_id)?;
                let mut page = pinned.write();
                page.write_bytes(offset as usize, bytes)?;
                heap::write_slot(
                    &mut page,
                    data_slot.slot,
                    SlotEntry::Active {
                        offset,
                        len: bytes.len() as u32,
                    },
                )?;
                page.set_lsn(lsn);
                return Ok(());
            }
        }

        // Move: clear the old data, then point the head at the new copy.
        match entry {
            SlotEntry::Active { .. } => {
                if data_slot != head {
                    self.clear_slot(state, data_slot, lsn)?;
                }
            }
            SlotEntry::Overflow { first, .. } => {
                self.free_overflow_chain(first)?;
                if data_slot != head {
                    self.clear_slot(state, data_slot, lsn)?;
                }
            }
            _ => unreachable!("resolve_data_slot returns data entries"),
        }

        let new_slot = self.place_record(state, bytes, lsn)?;
        let pinned = self.pool.pin(head.page_id)?;
        let mut page = pinned.write();
        heap::write_slot(&mut page, head.slot, SlotEntry::Forwarded { target: new_slot })?;
        page.set_lsn(lsn);
        let free = heap::free_space(&page)?;
        let pid = page.id;
        drop(page);
        state.free_space.insert(pid, free);
        Ok(())
    }

    /// Remove a record's slots and any overflow pages.
    fn erase_record(&self, state: &mut StoreState, head: RecordSlot, lsn: Lsn) -> DbResult<()> {
        let (data_slot, entry) = self.resolve_data_slot(head)?;
        if let SlotEntry::Overflow { first, .. } = entry {
            self.free_overflow_chain(first)?;
        }
        self.clear_slot(state, data_slot, lsn)?;
        if data_slot != head {
            self.clear_slot(state, head, lsn)?;
        }
        Ok(())
    }

    fn clear_slot(&self, state: &mut StoreState, slot: RecordSlot, lsn: Lsn) -> DbResult<()> {
        let pinned = self.pool.pin(slot.page_id)?;
        let mut page = pinned.write();
        heap::write_slot(&mut page, slot.slot, SlotEntry::Free)?;
        // A fully empty page resets, reclaiming its fragmented space.
        if heap::is_unused(&page)? {
            heap::init_heap_page(&mut page)?;
        }
        page.set_lsn(lsn);
        let free = heap::free_space(&page)?;
        let pid = page.id;
        drop(page);
        state.free_space.insert(pid, free);
        Ok(())
    }

    // ---- open-time scan ----

    fn rebuild_directory(&self) -> DbResult<()> {
        let mut state = self.state.write();
        let num_pages = self.pool.num_pages();

        // data slot -> id, plus forwarding heads seen along the way.
        // Overflow heads are resolved after the scan so only one page
        // latch is ever held at a time.
        let mut by_data_slot: HashMap<RecordSlot, String> = HashMap::new();
        let mut forwards: Vec<(RecordSlot, RecordSlot)> = Vec::new();
        let mut overflow_heads: Vec<(RecordSlot, PageId)> = Vec::new();

        for raw in 1..num_pages {
            let pid = PageId(raw);
            let pinned = self.pool.pin(pid)?;
            let page = pinned.read();
            if page.page_type != PageType::Record {
                continue;
            }
            for slot in 0..heap::slot_count(&page)? {
                let here = RecordSlot::new(pid, slot);
                match heap::read_slot(&page, slot)? {
                    SlotEntry::Free => {}
                    SlotEntry::Forwarded { target } => forwards.push((here, target)),
                    SlotEntry::Active { offset, len } => {
                        let bytes = page.read_bytes(offset as usize, len as usize)?;
                        let id = codec::record_id_prefix(bytes)?;
                        by_data_slot.insert(here, id);
                    }
                    SlotEntry::Overflow { first, .. } => {
                        overflow_heads.push((here, first));
                    }
                }
            }
            let free = heap::free_space(&page)?;
            state.free_space.insert(pid, free);
        }

        for (here, first) in overflow_heads {
            let chain = self.pool.pin(first)?;
            let chain_page = chain.read();
            let chunk_len = chain_page.read_u32(8)? as usize;
            let id =
                codec::record_id_prefix(chain_page.read_bytes(OVERFLOW_HEADER, chunk_len)?)?;
            by_data_slot.insert(here, id);
        }

        // Records reached through a forwarding marker keep the marker's
        // address as their stable head.
        let mut directory: HashMap<String, RecordSlot> = HashMap::new();
        let mut forwarded_targets: HashMap<RecordSlot, RecordSlot> = HashMap::new();
        for (head, target) in forwards {
            forwarded_targets.insert(target, head);
        }
        for (data_slot, id) in by_data_slot {
            let head = forwarded_targets
                .get(&data_slot)
                .copied()
                .unwrap_or(data_slot);
            directory.insert(id, head);
        }

        state.record_count = directory.len() as u64;
        state.directory = directory;

        let header_count = self.pool.header(|h| h.record_count);
        if header_count != state.record_count {
            warn!(
                header = header_count,
                scanned = state.record_count,
                "header record count disagrees with heap scan"
            );
        }
        Ok(())
    }
}

/// Lazy `(id, bytes)` iterator over a snapshot of the id set.
pub struct RecordStream<'a> {
    store: &'a RecordStore,
    ids: std::vec::IntoIter<String>,
}

impl Iterator for RecordStream<'_> {
    type Item = DbResult<(String, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let id = self.ids.next()?;
            match self.store.get(&id) {
                // Deleted between snapshot and visit: skip.
                Ok(None) => continue,
                Ok(Some(bytes)) => return Some(Ok((id, bytes))),
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

fn validate_id(id: &str) -> DbResult<()> {
    if id.is_empty() {
        return Err(DbError::InvalidArgument("record id must not be empty".into()));
    }
    if id.len() > MAX_ID_LEN {
        return Err(DbError::InvalidArgument(format!(
            "record id exceeds {MAX_ID_LEN} bytes"
        )));
    }
    Ok(())
}
