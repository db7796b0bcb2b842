//! Buffer manager: a bounded pool of page frames over the pager.
//!
//! Frames are pinned while in use and become eviction candidates once
//! their pin count drops to zero; eviction picks the least recently
//! unpinned frame. A dirty frame is written back before eviction, and
//! never before the WAL has been flushed through the page's LSN
//! (WAL-before-data).
//!
//! Residency and access are separate: a pin keeps the page in memory,
//! while the per-frame `RwLock` arbitrates shared readers vs one
//! writer. Callers that need several pages at once acquire them in
//! ascending page-id order.


use common::{DbError, DbResult, PageId};
use hashbrown::HashMap;
use lru::LruCache;
use pager::{Header, Page, PageType, Pager};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::trace;
use wal::Wal;

struct Frame {
    page: RwLock<Page>,
    pins: AtomicUsize,
}

struct PoolState {
    pager: Pager,
    frames: HashMap<PageId, Arc<Frame>>,
    /// Unpinned pages only, least recently used first out.
    lru: LruCache<PageId, ()>,
}

/// Shared, bounded page cache. Cheap to clone via `Arc`.
pub struct BufferPool {
    capacity: usize,
    wal: Arc<Wal>,
    state: Mutex<PoolState>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl BufferPool {
    pub fn new(pager: Pager, wal: Arc<Wal>, capacity: usize) -> Arc<Self> {
        assert!(capacity > 0, "buffer pool needs at least one frame");
        Arc::new(BufferPool {
            capacity,
            wal,
            state: Mutex::new(PoolState {
                pager,
                frames: HashMap::new(),
                lru: LruCache::new(NonZeroUsize::new(capacity).unwrap()),
            }),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        })
    }

    /// Pin a page into the pool, loading it from disk on a miss.
    pub fn pin(self: &Arc<Self>, pid: PageId) -> DbResult<PinnedPage> {
        let mut state = self.state.lock();
        if let Some(frame) = state.frames.get(&pid) {
            let frame = Arc::clone(frame);
            frame.pins.fetch_add(1, Ordering::AcqRel);
            state.lru.pop(&pid);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(PinnedPage {
                pid,
                frame,
                pool: Arc::clone(self),
            });
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        if state.frames.len() >= self.capacity {
            self.evict_one(&mut state)?;
        }
        let page = state.pager.read_page(pid)?;
        let frame = Arc::new(Frame {
            page: RwLock::new(page),
            pins: AtomicUsize::new(1),
        });
        state.frames.insert(pid, Arc::clone(&frame));
        Ok(PinnedPage {
            pid,
            frame,
            pool: Arc::clone(self),
        })
    }

    /// Allocate a fresh page and return it pinned.
    pub fn allocate(self: &Arc<Self>, page_type: PageType) -> DbResult<PinnedPage> {
        let mut state = self.state.lock();
        if state.frames.len() >= self.capacity {
            self.evict_one(&mut state)?;
        }
        let page = state.pager.allocate(page_type)?;
        let pid = page.id;
        let frame = Arc::new(Frame {
            page: RwLock::new(page),
            pins: AtomicUsize::new(1),
        });
        state.frames.insert(pid, Arc::clone(&frame));
        Ok(PinnedPage {
            pid,
            frame,
            pool: Arc::clone(self),
        })
    }

    /// Drop a page from the pool and hand it to the pager's free list.
    /// Fails if the page is still pinned.
    pub fn free(&self, pid: PageId) -> DbResult<()> {
        let mut state = self.state.lock();
        if let Some(frame) = state.frames.get(&pid) {
            if frame.pins.load(Ordering::Acquire) > 0 {
                return Err(DbError::InvalidArgument(format!(
                    "cannot free pinned page {}",
                    pid.0
                )));
            }
            state.frames.remove(&pid);
            state.lru.pop(&pid);
        }
        state.pager.free(pid)
    }

    /// Write every dirty frame back, WAL first, then fsync the file.
    pub fn flush_all(&self) -> DbResult<()> {
        let mut state = self.state.lock();
        let pids: Vec<PageId> = state.frames.keys().copied().collect();
        for pid in pids {
            let frame = Arc::clone(&state.frames[&pid]);
            let mut page = frame.page.write();
            if page.is_dirty() {
                self.wal.flush_through(page.lsn)?;
                state.pager.write_page(&page)?;
                page.clear_dirty();
            }
        }
        state.pager.persist_header()?;
        state.pager.flush()
    }

    /// Read access to the persistent header.
    pub fn header<R>(&self, f: impl FnOnce(&Header) -> R) -> R {
        let state = self.state.lock();
        f(state.pager.header())
    }

    /// Mutate and durably persist the header.
    pub fn update_header(&self, f: impl FnOnce(&mut Header)) -> DbResult<()> {
        let mut state = self.state.lock();
        f(state.pager.header_mut());
        state.pager.persist_header()
    }

    pub fn set_dirty_shutdown(&self, dirty: bool) -> DbResult<()> {
        self.state.lock().pager.set_dirty_shutdown(dirty)
    }

    pub fn payload_size(&self) -> usize {
        self.state.lock().pager.payload_size()
    }

    pub fn num_pages(&self) -> u64 {
        self.state.lock().pager.num_pages()
    }

    pub fn wal(&self) -> &Arc<Wal> {
        &self.wal
    }

    /// Cache hit ratio since open; 0 when nothing was requested.
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed) as f64;
        let misses = self.misses.load(Ordering::Relaxed) as f64;
        if hits + misses == 0.0 {
            0.0
        } else {
            hits / (hits + misses)
        }
    }

    /// Flush everything and consume the pool, closing the file.
    pub fn close(self: Arc<Self>) -> DbResult<()> {
        self.flush_all()?;
        // Remaining Arcs only hold the pool alive; the pager closes when
        // the state drops with it.
        Ok(())
    }

    fn evict_one(&self, state: &mut PoolState) -> DbResult<()> {
        let (victim, _) = state.lru.pop_lru().ok_or(DbError::BufferExhausted)?;
        let frame = state
            .frames
            .remove(&victim)
            .expect("lru entries are resident");
        debug_assert_eq!(frame.pins.load(Ordering::Acquire), 0);
        let mut page = frame.page.write();
        if page.is_dirty() {
            // WAL-before-data: the log must cover this page before the
            // page image may replace the on-disk version.
            self.wal.flush_through(page.lsn)?;
            state.pager.write_page(&page)?;
            page.clear_dirty();
        }
        trace!(pid = victim.0, "evicted frame");
        Ok(())
    }

    fn unpin(&self, pid: PageId, frame: &Arc<Frame>) {
        let mut state = self.state.lock();
        let previous = frame.pins.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0);
        if previous == 1 && state.frames.contains_key(&pid) {
            state.lru.push(pid, ());
        }
    }
}

/// A pinned page. Residency is guaranteed while this guard lives;
/// `read`/`write` take the page latch for actual access. Unpins on drop.
pub struct PinnedPage {
    pid: PageId,
    frame: Arc<Frame>,
    pool: Arc<BufferPool>,
}

impl PinnedPage {
    pub fn id(&self) -> PageId {
        self.pid
    }

    /// Shared access; many readers may hold this at once.
    pub fn read(&self) -> RwLockReadGuard<'_, Page> {
        self.frame.page.read()
    }

    /// Exclusive access; excludes readers and other writers.
    pub fn write(&self) -> RwLockWriteGuard<'_, Page> {
        self.frame.page.write()
    }
}

impl Drop for PinnedPage {
    fn drop(&mut self) {
        self.pool.unpin(self.pid, &self.frame);
    }
}
