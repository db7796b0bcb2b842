//! Equality-only secondary index: static hashing with overflow chains.
//!
//! A fixed directory of bucket pages is allocated up front; collisions
//! chain into overflow buckets. Keys are canonical key bytes; values
//! are record ids. O(1) amortized lookup, no ordering guarantees.
//!
//! Layout: a directory page (bucket page ids) rooted in the header's
//! index table, then one page per bucket, each `u8 version | u8 kind |
//! u32 len | bincode bucket`.

#[cfg(test)]
mod tests;

use ahash::RandomState;
use buffer::BufferPool;
use common::{DbError, DbResult, PageId};
use pager::PageType;
use serde::{Deserialize, Serialize};
use std::hash::{BuildHasher, Hasher};
use std::sync::Arc;

const NUM_BUCKETS: usize = 128;
const BUCKET_FORMAT: u8 = 1;
const KIND_DIRECTORY: u8 = 0;
const KIND_BUCKET: u8 = 1;
const NODE_HEADER: usize = 6;

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::legacy()
}

/// Seeded identically everywhere so bucket placement is stable across
/// process restarts.
fn hasher() -> RandomState {
    RandomState::with_seeds(
        0x9E37_79B9_7F4A_7C15,
        0x2545_F491_4F6C_DD1D,
        0x1234_5678_9ABC_DEF0,
        0x0FED_CBA9_8765_4321,
    )
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
struct Bucket {
    entries: Vec<(Vec<u8>, String)>,
    /// Overflow page; None terminates the chain.
    overflow: Option<PageId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct Directory {
    buckets: Vec<PageId>,
}

pub struct HashIndex {
    pool: Arc<BufferPool>,
    root: PageId,
    buckets: Vec<PageId>,
    state: RandomState,
    /// Entries per bucket before chaining; sized to the page payload.
    bucket_capacity: usize,
}

impl HashIndex {
    /// Allocate the directory and its empty buckets.
    pub fn create(pool: Arc<BufferPool>) -> DbResult<Self> {
        let mut buckets = Vec::with_capacity(NUM_BUCKETS);
        for _ in 0..NUM_BUCKETS {
            let pinned = pool.allocate(PageType::IndexLeaf)?;
            let pid = pinned.id();
            let mut page = pinned.write();
            write_node(&mut page, KIND_BUCKET, &Bucket::default())?;
            drop(page);
            buckets.push(pid);
        }

        let directory = Directory {
            buckets: buckets.clone(),
        };
        let pinned = pool.allocate(PageType::IndexInternal)?;
        let root = pinned.id();
        write_node(&mut pinned.write(), KIND_DIRECTORY, &directory)?;

        let bucket_capacity = bucket_capacity_for(pool.payload_size());
        Ok(HashIndex {
            pool,
            root,
            buckets,
            state: hasher(),
            bucket_capacity,
        })
    }

    /// Reattach to a persisted index rooted at its directory page.
    pub fn open(pool: Arc<BufferPool>, root: PageId) -> DbResult<Self> {
        if root.is_nil() {
            return Err(DbError::CorruptHeader("hash index root is nil".into()));
        }
        let directory: Directory = {
            let pinned = pool.pin(root)?;
            let guard = pinned.read();
            read_node(&guard, KIND_DIRECTORY)?
        };
        let bucket_capacity = bucket_capacity_for(pool.payload_size());
        Ok(HashIndex {
            pool,
            root,
            buckets: directory.buckets,
            state: hasher(),
            bucket_capacity,
        })
    }

    pub fn root(&self) -> PageId {
        self.root
    }

    pub fn insert(&mut self, key: &[u8], record_id: &str) -> DbResult<()> {
        // The capacity budget assumes entries stay under this bound.
        if key.len() + record_id.len() > 448 {
            return Err(DbError::InvalidArgument(
                "index key too large for hash bucket".into(),
            ));
        }
        let mut pid = self.bucket_for(key);
        loop {
            let pinned = self.pool.pin(pid)?;
            let mut bucket: Bucket = read_node(&pinned.read(), KIND_BUCKET)?;

            if bucket.entries.len() < self.bucket_capacity {
                bucket
                    .entries
                    .push((key.to_vec(), record_id.to_string()));
                write_node(&mut pinned.write(), KIND_BUCKET, &bucket)?;
                return Ok(());
            }
            match bucket.overflow {
                Some(next) => pid = next,
                None => {
                    let overflow = self.pool.allocate(PageType::IndexLeaf)?;
                    let overflow_pid = overflow.id();
                    write_node(
                        &mut overflow.write(),
                        KIND_BUCKET,
                        &Bucket {
                            entries: vec![(key.to_vec(), record_id.to_string())],
                            overflow: None,
                        },
                    )?;
                    bucket.overflow = Some(overflow_pid);
                    write_node(&mut pinned.write(), KIND_BUCKET, &bucket)?;
                    return Ok(());
                }
            }
        }
    }

    /// Remove one `(key, record_id)` pair. Returns whether it existed.
    pub fn remove(&mut self, key: &[u8], record_id: &str) -> DbResult<bool> {
        let mut pid = self.bucket_for(key);
        loop {
            let pinned = self.pool.pin(pid)?;
            let mut bucket: Bucket = read_node(&pinned.read(), KIND_BUCKET)?;

            let before = bucket.entries.len();
            bucket
                .entries
                .retain(|(k, id)| !(k.as_slice() == key && id == record_id));
            if bucket.entries.len() < before {
                write_node(&mut pinned.write(), KIND_BUCKET, &bucket)?;
                return Ok(true);
            }
            match bucket.overflow {
                Some(next) => pid = next,
                None => return Ok(false),
            }
        }
    }

    /// All record ids stored under exactly `key`.
    pub fn lookup(&self, key: &[u8]) -> DbResult<Vec<String>> {
        let mut out = Vec::new();
        let mut pid = self.bucket_for(key);
        loop {
            let pinned = self.pool.pin(pid)?;
            let bucket: Bucket = read_node(&pinned.read(), KIND_BUCKET)?;
            for (k, id) in &bucket.entries {
                if k.as_slice() == key {
                    out.push(id.clone());
                }
            }
            match bucket.overflow {
                Some(next) => pid = next,
                None => return Ok(out),
            }
        }
    }

    /// Every `(key, record_id)` pair, in no particular order.
    pub fn entries(&self) -> DbResult<Vec<(Vec<u8>, String)>> {
        let mut out = Vec::new();
        for &bucket_pid in &self.buckets {
            let mut pid = Some(bucket_pid);
            while let Some(current) = pid {
                let pinned = self.pool.pin(current)?;
                let bucket: Bucket = read_node(&pinned.read(), KIND_BUCKET)?;
                out.extend(bucket.entries.iter().cloned());
                pid = bucket.overflow;
            }
        }
        Ok(out)
    }

    pub fn len(&self) -> DbResult<usize> {
        Ok(self.entries()?.len())
    }

    pub fn is_empty(&self) -> DbResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Free the directory, buckets, and overflow chains.
    pub fn destroy(self) -> DbResult<()> {
        for &bucket_pid in &self.buckets {
            let mut pid = Some(bucket_pid);
            while let Some(current) = pid {
                let next = {
                    let pinned = self.pool.pin(current)?;
                    let bucket: Bucket = read_node(&pinned.read(), KIND_BUCKET)?;
                    bucket.overflow
                };
                self.pool.free(current)?;
                pid = next;
            }
        }
        self.pool.free(self.root)
    }

    fn bucket_for(&self, key: &[u8]) -> PageId {
        let mut hasher = self.state.build_hasher();
        hasher.write(key);
        let idx = (hasher.finish() as usize) % NUM_BUCKETS;
        self.buckets[idx]
    }
}

/// Keep serialized buckets comfortably under the page payload: entries
/// are key + id + framing, assume a pessimistic 512 bytes each.
fn bucket_capacity_for(payload: usize) -> usize {
    ((payload - NODE_HEADER) / 512).max(2)
}

fn write_node<T: Serialize>(page: &mut pager::Page, kind: u8, value: &T) -> DbResult<()> {
    let bytes = bincode::serde::encode_to_vec(value, bincode_config())
        .map_err(|e| DbError::Encoding(format!("hash node encode failed: {e}")))?;
    if NODE_HEADER + bytes.len() > page.body().len() {
        return Err(DbError::Encoding("hash bucket exceeds page size".into()));
    }
    page.write_bytes(0, &[BUCKET_FORMAT, kind])?;
    page.write_u32(2, bytes.len() as u32)?;
    page.write_bytes(NODE_HEADER, &bytes)?;
    Ok(())
}

fn read_node<T: for<'de> Deserialize<'de>>(page: &pager::Page, kind: u8) -> DbResult<T> {
    let version = page.read_bytes(0, 1)?[0];
    if version != BUCKET_FORMAT {
        return Err(DbError::Decoding(format!(
            "unsupported hash node format {version}"
        )));
    }
    let actual_kind = page.read_bytes(1, 1)?[0];
    if actual_kind != kind {
        return Err(DbError::CorruptPage(page.id.0));
    }
    let len = page.read_u32(2)? as usize;
    let bytes = page
        .read_bytes(NODE_HEADER, len)
        .map_err(|_| DbError::CorruptPage(page.id.0))?;
    let (value, _) = bincode::serde::decode_from_slice(bytes, bincode_config())
        .map_err(|e| DbError::Decoding(format!("hash node decode failed: {e}")))?;
    Ok(value)
}
