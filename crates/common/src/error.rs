use std::io;
use thiserror::Error;

/// Canonical error type shared across all storage-engine layers.
///
/// The pager and WAL surface raw I/O and corruption errors; upper
/// layers translate but never swallow them. `TransactionConflict`
/// carries the conflicting record ids so callers can retry narrowly.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("concurrent update on record '{0}'")]
    ConcurrencyConflict(String),
    #[error("transaction conflict on {ids:?}")]
    TransactionConflict { ids: Vec<String> },
    #[error("store is not open")]
    NotOpen,
    #[error("collection has been disposed")]
    Disposed,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("corrupt header: {0}")]
    CorruptHeader(String),
    #[error("corrupt page {0}")]
    CorruptPage(u64),
    #[error("checksum mismatch on page {0}")]
    ChecksumMismatch(u64),
    #[error("page authentication failed")]
    AuthenticationFailed,
    #[error("io: {0}")]
    Io(#[from] io::Error),
    #[error("database file is locked by another process: {0}")]
    StorageLocked(String),
    #[error("all buffer frames are pinned")]
    BufferExhausted,
    #[error("timed out acquiring lock on '{0}'")]
    LockTimeout(String),
    #[error("unsupported index kind: {0}")]
    UnsupportedIndexType(String),
    #[error("no index on field '{0}'")]
    IndexNotFound(String),
    #[error("index on field '{0}' already exists")]
    IndexAlreadyExists(String),
    #[error("invalid query: {0}")]
    QueryInvalid(String),
    #[error("encode: {0}")]
    Encoding(String),
    #[error("decode: {0}")]
    Decoding(String),
    #[error("wal: {0}")]
    Wal(String),
    #[error("recovery failed: {0}")]
    RecoveryFailed(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl DbError {
    /// True for the conflict kinds a caller is expected to retry.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            DbError::ConcurrencyConflict(_) | DbError::TransactionConflict { .. }
        )
    }
}

/// Result alias carrying a [`DbError`].
pub type DbResult<T> = Result<T, DbError>;
