//! Write-ahead log.
//!
//! Append-only file of self-delimiting frames:
//! `u32 length | u64 lsn | u64 txn_id | u8 kind | payload | u32 crc32c`,
//! where `length` counts lsn through payload and the CRC covers the
//! same span. A frame is valid iff its CRC matches; the first invalid
//! frame found on open truncates the tail (a torn final write).
//!
//! Durability contract: [`Wal::append`] only buffers;
//! [`Wal::flush_through`] returns after every frame with `lsn <= L` is
//! on stable storage. Dirty pages must not reach disk before the WAL is
//! flushed through their page LSN (enforced by the buffer manager).


use bincode::config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{DbError, DbResult, IndexKind, Lsn, TxnId};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

fn bincode_config() -> impl config::Config {
    config::legacy()
}

/// Logical operation recorded in the log. Mutations carry the images
/// needed for both redo (after) and undo (before).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WalOp {
    Begin,
    Insert {
        id: String,
        after: Vec<u8>,
    },
    Update {
        id: String,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    Delete {
        id: String,
        before: Vec<u8>,
    },
    IndexUpdate {
        field: String,
        change: IndexChange,
    },
    Commit,
    Abort,
    CheckpointBegin,
    CheckpointEnd {
        flushed_lsn: Lsn,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum IndexChange {
    Created(IndexKind),
    Dropped,
}

impl WalOp {
    pub fn kind(&self) -> u8 {
        match self {
            WalOp::Begin => 0,
            WalOp::Insert { .. } => 1,
            WalOp::Update { .. } => 2,
            WalOp::Delete { .. } => 3,
            WalOp::IndexUpdate { .. } => 4,
            WalOp::Commit => 5,
            WalOp::Abort => 6,
            WalOp::CheckpointBegin => 7,
            WalOp::CheckpointEnd { .. } => 8,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WalOp::Commit | WalOp::Abort)
    }
}

/// One decoded log record.
#[derive(Clone, Debug, PartialEq)]
pub struct WalRecord {
    pub lsn: Lsn,
    pub txn_id: TxnId,
    pub op: WalOp,
}

struct WalInner {
    file: File,
    /// Next LSN to hand out.
    next_lsn: Lsn,
    /// Highest LSN known to be on stable storage.
    flushed_lsn: Lsn,
    /// Byte length of the valid frame prefix.
    valid_len: u64,
}

/// Append-only log manager. Shared via `Arc`; the tail lock is the only
/// lock held across file I/O in the engine.
pub struct Wal {
    path: PathBuf,
    inner: Mutex<WalInner>,
}

impl Wal {
    /// Open or create the log, scanning existing frames to find the
    /// next LSN. A torn tail (bad length or CRC) is truncated away.
    pub fn open(path: &Path) -> DbResult<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| DbError::Wal(format!("open {} failed: {e}", path.display())))?;

        let (records, valid_len) = scan(&mut file)?;
        let file_len = file.metadata()?.len();
        if valid_len < file_len {
            warn!(
                path = %path.display(),
                dropped = file_len - valid_len,
                "truncating torn wal tail"
            );
            file.set_len(valid_len)?;
            file.sync_all()?;
        }
        let next_lsn = records.last().map(|r| r.lsn + 1).unwrap_or(1);
        file.seek(SeekFrom::End(0))?;

        Ok(Wal {
            path: path.to_path_buf(),
            inner: Mutex::new(WalInner {
                file,
                next_lsn,
                flushed_lsn: next_lsn.saturating_sub(1),
                valid_len,
            }),
        })
    }

    /// Append one record, returning its LSN. Buffered only.
    pub fn append(&self, txn_id: TxnId, op: &WalOp) -> DbResult<Lsn> {
        let mut inner = self.inner.lock();
        let lsn = inner.next_lsn;
        inner.next_lsn += 1;

        let frame = encode_frame(lsn, txn_id, op)?;
        inner
            .file
            .write_all(&frame)
            .map_err(|e| DbError::Wal(format!("append failed: {e}")))?;
        inner.valid_len += frame.len() as u64;
        Ok(lsn)
    }

    /// Block until every record with `lsn <= through` is durable.
    pub fn flush_through(&self, through: Lsn) -> DbResult<()> {
        let mut inner = self.inner.lock();
        if inner.flushed_lsn >= through {
            return Ok(());
        }
        inner
            .file
            .sync_data()
            .map_err(|e| DbError::Wal(format!("fsync failed: {e}")))?;
        inner.flushed_lsn = inner.next_lsn - 1;
        Ok(())
    }

    pub fn flushed_lsn(&self) -> Lsn {
        self.inner.lock().flushed_lsn
    }

    /// LSN of the most recently appended record; 0 when empty.
    pub fn head_lsn(&self) -> Lsn {
        self.inner.lock().next_lsn - 1
    }

    /// All valid records with `lsn > since`, in LSN order.
    pub fn iterate_since(&self, since: Lsn) -> DbResult<Vec<WalRecord>> {
        let _guard = self.inner.lock();
        let mut file = OpenOptions::new()
            .read(true)
            .open(&self.path)
            .map_err(|e| DbError::Wal(format!("reopen for scan failed: {e}")))?;
        let (records, _) = scan(&mut file)?;
        Ok(records.into_iter().filter(|r| r.lsn > since).collect())
    }

    /// Drop every record with `lsn <= through`, preserving the rest.
    /// Used after a checkpoint makes the prefix reclaimable.
    pub fn truncate_to(&self, through: Lsn) -> DbResult<()> {
        let mut inner = self.inner.lock();
        inner.file.seek(SeekFrom::Start(0))?;
        let (records, _) = scan(&mut inner.file)?;
        let keep: Vec<&WalRecord> = records.iter().filter(|r| r.lsn > through).collect();

        inner.file.set_len(0)?;
        inner.file.seek(SeekFrom::Start(0))?;
        let mut written = 0u64;
        for record in &keep {
            let frame = encode_frame(record.lsn, record.txn_id, &record.op)?;
            inner.file.write_all(&frame)?;
            written += frame.len() as u64;
        }
        inner
            .file
            .sync_all()
            .map_err(|e| DbError::Wal(format!("fsync after truncate failed: {e}")))?;
        inner.valid_len = written;
        debug!(kept = keep.len(), through, "truncated wal prefix");
        Ok(())
    }

    /// Byte length of the valid log contents.
    pub fn len(&self) -> u64 {
        self.inner.lock().valid_len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn encode_frame(lsn: Lsn, txn_id: TxnId, op: &WalOp) -> DbResult<Vec<u8>> {
    let payload = encode_to_vec(op, bincode_config())
        .map_err(|e| DbError::Wal(format!("record encode failed: {e}")))?;
    let span_len = 8 + 8 + 1 + payload.len();

    let mut frame = Vec::with_capacity(4 + span_len + 4);
    frame.extend_from_slice(&(span_len as u32).to_le_bytes());
    frame.extend_from_slice(&lsn.to_le_bytes());
    frame.extend_from_slice(&txn_id.to_le_bytes());
    frame.push(op.kind());
    frame.extend_from_slice(&payload);
    let crc = crc32c::crc32c(&frame[4..]);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// Read frames from the start of `file`, stopping at EOF or the first
/// invalid frame. Returns the records and the byte length of the valid
/// prefix.
fn scan(file: &mut File) -> DbResult<(Vec<WalRecord>, u64)> {
    file.seek(SeekFrom::Start(0))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;

    let mut records = Vec::new();
    let mut pos = 0usize;
    while bytes.len() - pos >= 4 {
        let span_len =
            u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap()) as usize;
        // lsn + txn + kind is the minimum span.
        if span_len < 17 || pos + 4 + span_len + 4 > bytes.len() {
            break;
        }
        let span = &bytes[pos + 4..pos + 4 + span_len];
        let stored_crc =
            u32::from_le_bytes(bytes[pos + 4 + span_len..pos + 8 + span_len].try_into().unwrap());
        if crc32c::crc32c(span) != stored_crc {
            break;
        }

        let lsn = u64::from_le_bytes(span[0..8].try_into().unwrap());
        let txn_id = u64::from_le_bytes(span[8..16].try_into().unwrap());
        let kind = span[16];
        let (op, _): (WalOp, usize) = decode_from_slice(&span[17..], bincode_config())
            .map_err(|e| DbError::Wal(format!("record decode failed at lsn {lsn}: {e}")))?;
        if op.kind() != kind {
            return Err(DbError::Wal(format!(
                "kind byte {kind} does not match payload at lsn {lsn}"
            )));
        }
        records.push(WalRecord { lsn, txn_id, op });
        pos += 8 + span_len;
    }
    Ok((records, pos as u64))
}
