//! Shared identifiers, errors, configuration, and runtime services.

mod cancel;
mod error;
mod services;

pub use cancel::CancelToken;
pub use error::{DbError, DbResult};
pub use services::{Clock, IdGenerator, SystemClock, UuidGenerator};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Logical identifier for a page in a collection file. Page 0 is the
/// header page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PageId(pub u64);

impl PageId {
    pub const HEADER: PageId = PageId(0);

    /// 0 is the header page, so it doubles as the "no page" sentinel in
    /// free-list links and overflow chains.
    pub fn is_nil(self) -> bool {
        self.0 == 0
    }
}

/// Address of a record inside a heap page.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordSlot {
    pub page_id: PageId,
    pub slot: u16,
}

impl RecordSlot {
    pub fn new(page_id: PageId, slot: u16) -> Self {
        Self { page_id, slot }
    }
}

/// Kind of secondary index declared on a collection field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexKind {
    /// Equality-only, O(1) amortized lookup.
    Hash,
    /// Range-capable ordered mapping, O(log n) point lookup.
    Ordered,
}

impl std::fmt::Display for IndexKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexKind::Hash => f.write_str("hash"),
            IndexKind::Ordered => f.write_str("ordered"),
        }
    }
}

/// Log sequence number. Strictly increasing across WAL records.
pub type Lsn = u64;

/// Transaction identifier, unique within one open database.
pub type TxnId = u64;

/// Runtime configuration for a collection's storage stack.
///
/// # Example
/// ```
/// use common::Config;
///
/// let config = Config::builder()
///     .page_size(8192)
///     .buffer_pool_pages(512)
///     .build();
/// ```
#[derive(Clone, Debug, bon::Builder)]
pub struct Config {
    /// Fixed page size in bytes; power of two, at least 4096.
    #[builder(default = 4096)]
    pub page_size: usize,
    /// Number of frames the buffer pool keeps resident.
    #[builder(default = 1024)]
    pub buffer_pool_pages: usize,
    /// Verify page checksums on every read.
    #[builder(default = true)]
    pub verify_checksums: bool,
    /// Upper bound on the encoded (pre-encryption) record size.
    #[builder(default = 16 * 1024 * 1024)]
    pub max_record_size: usize,
    /// Optional AES-GCM key (16, 24, or 32 bytes).
    pub encryption_key: Option<Vec<u8>>,
    /// Bound on per-record lock acquisition.
    #[builder(default = Duration::from_secs(10))]
    pub lock_timeout: Duration,
    /// Cache query results keyed by the serialized query.
    #[builder(default = false)]
    pub result_cache: bool,
    /// Number of compiled plans kept per collection.
    #[builder(default = 64)]
    pub plan_cache_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config::builder().build()
    }
}

impl Config {
    /// Reject configurations the pager cannot honor.
    pub fn validate(&self) -> DbResult<()> {
        if self.page_size < 4096 || !self.page_size.is_power_of_two() {
            return Err(DbError::InvalidArgument(format!(
                "page size must be a power of two >= 4096, got {}",
                self.page_size
            )));
        }
        if self.buffer_pool_pages == 0 {
            return Err(DbError::InvalidArgument(
                "buffer pool must hold at least one page".into(),
            ));
        }
        if let Some(key) = &self.encryption_key {
            if !matches!(key.len(), 16 | 24 | 32) {
                return Err(DbError::InvalidArgument(format!(
                    "encryption key must be 16, 24, or 32 bytes, got {}",
                    key.len()
                )));
            }
        }
        Ok(())
    }

    pub fn wal_path(data_path: &std::path::Path) -> PathBuf {
        let mut os = data_path.as_os_str().to_os_string();
        os.push(".wal");
        PathBuf::from(os)
    }
}
