//! Paged file access: the authoritative on-disk page store.
//!
//! A collection file is a sequence of fixed-size pages. Page 0 is the
//! header; every page is framed as `type | lsn | body | crc32c`. The
//! pager owns the file handle, holds an exclusive advisory lock while
//! open, verifies checksums on read, and runs every non-header page
//! body through the configured [`crypto::PageCipher`] with the page id
//! as AAD.
//!
//! Writes are issued in the order callers request them; the pager never
//! reorders. Durability is explicit via [`Pager::flush`].

mod header;
mod page;

pub use header::{Header, IndexEntry, FORMAT_VERSION, MAGIC};
pub use page::{Page, PageType};

use bincode::config;
use bincode::serde::{decode_from_slice, encode_to_vec};
use common::{Config, DbError, DbResult, PageId};
use crypto::PageCipher;
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// type byte + 8-byte LSN before the body, 4-byte crc32c after it.
const FRAME_PREFIX: usize = 9;
const FRAME_SUFFIX: usize = 4;

fn bincode_config() -> impl config::Config {
    config::legacy()
}

pub struct Pager {
    file: File,
    path: PathBuf,
    page_size: usize,
    verify_checksums: bool,
    cipher: Arc<dyn PageCipher>,
    header: Header,
    num_pages: u64,
}

impl Pager {
    /// Open or create a collection file.
    ///
    /// Acquires an exclusive advisory lock; a second opener gets
    /// [`DbError::StorageLocked`]. A fresh file is initialized with a
    /// well-formed header page; an existing one must match the
    /// configured page size and carry the EntiDB magic.
    pub fn open(
        path: &Path,
        collection: &str,
        config: &Config,
        cipher: Arc<dyn PageCipher>,
    ) -> DbResult<Self> {
        config.validate()?;
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        file.try_lock_exclusive()
            .map_err(|_| DbError::StorageLocked(path.display().to_string()))?;

        let file_len = file.metadata()?.len();
        let mut pager = Pager {
            file,
            path: path.to_path_buf(),
            page_size: config.page_size,
            verify_checksums: config.verify_checksums,
            cipher,
            header: Header::new(collection, config.page_size as u32),
            num_pages: file_len / config.page_size as u64,
        };

        if file_len == 0 {
            if pager.cipher.is_enabled() {
                pager.header.encryption_salt = Some(crypto::random_salt());
            }
            pager.num_pages = 1;
            pager.persist_header()?;
            pager.flush()?;
            info!(path = %path.display(), page_size = config.page_size, "created collection file");
        } else {
            pager.header = pager.load_header()?;
            pager.header.validate(config.page_size as u32)?;
            debug!(
                path = %path.display(),
                pages = pager.num_pages,
                records = pager.header.record_count,
                "opened collection file"
            );
        }

        Ok(pager)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Usable body bytes per page after framing and cipher overhead.
    pub fn payload_size(&self) -> usize {
        self.page_size - FRAME_PREFIX - FRAME_SUFFIX - self.cipher.overhead()
    }

    pub fn num_pages(&self) -> u64 {
        self.num_pages
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn header_mut(&mut self) -> &mut Header {
        &mut self.header
    }

    /// Allocate a page: pop the free list if non-empty, otherwise
    /// extend the file. The fresh zeroed page is written immediately so
    /// its id is readable before first use.
    pub fn allocate(&mut self, page_type: PageType) -> DbResult<Page> {
        let pid = if !self.header.free_head.is_nil() {
            let free = self.read_page(self.header.free_head)?;
            if free.page_type != PageType::Free {
                return Err(DbError::CorruptPage(free.id.0));
            }
            let next = PageId(free.read_u64(0)?);
            let pid = free.id;
            self.header.free_head = next;
            self.persist_header()?;
            pid
        } else {
            let pid = PageId(self.num_pages);
            self.num_pages += 1;
            pid
        };

        let page = Page::new(pid, page_type, self.payload_size());
        self.write_page(&page)?;
        Ok(page)
    }

    /// Zero a page and push it onto the free list.
    pub fn free(&mut self, pid: PageId) -> DbResult<()> {
        if pid.is_nil() || pid.0 >= self.num_pages {
            return Err(DbError::InvalidArgument(format!(
                "cannot free page {}",
                pid.0
            )));
        }
        let mut page = Page::new(pid, PageType::Free, self.payload_size());
        page.write_u64(0, self.header.free_head.0)?;
        self.write_page(&page)?;
        self.header.free_head = pid;
        self.persist_header()
    }

    /// Read and verify one page.
    pub fn read_page(&mut self, pid: PageId) -> DbResult<Page> {
        if pid.0 >= self.num_pages {
            return Err(DbError::InvalidArgument(format!(
                "page {} beyond end of file ({} pages)",
                pid.0, self.num_pages
            )));
        }
        let mut frame = vec![0u8; self.page_size];
        self.file
            .seek(SeekFrom::Start(pid.0 * self.page_size as u64))?;
        self.file.read_exact(&mut frame)?;

        if self.verify_checksums {
            let stored = u32::from_le_bytes(frame[self.page_size - FRAME_SUFFIX..].try_into().unwrap());
            let actual = crc32c::crc32c(&frame[..self.page_size - FRAME_SUFFIX]);
            if stored != actual {
                return Err(DbError::ChecksumMismatch(pid.0));
            }
        }

        let page_type = PageType::from_u8(frame[0], pid)?;
        let lsn = u64::from_le_bytes(frame[1..FRAME_PREFIX].try_into().unwrap());
        let stored_body = &frame[FRAME_PREFIX..self.page_size - FRAME_SUFFIX];

        let body = if self.cipher.is_enabled() && !pid.is_nil() {
            self.cipher
                .decrypt(stored_body, &pid.0.to_le_bytes())
                .map_err(|err| match err {
                    DbError::AuthenticationFailed => DbError::CorruptPage(pid.0),
                    other => other,
                })?
        } else {
            stored_body[..self.payload_size()].to_vec()
        };

        Ok(Page::from_parts(pid, page_type, lsn, body))
    }

    /// Write one page frame at its offset. No fsync; see [`Pager::flush`].
    pub fn write_page(&mut self, page: &Page) -> DbResult<()> {
        if page.body().len() != self.payload_size() {
            return Err(DbError::InvalidArgument(format!(
                "page body is {} bytes, expected {}",
                page.body().len(),
                self.payload_size()
            )));
        }
        let mut frame = vec![0u8; self.page_size];
        frame[0] = page.page_type as u8;
        frame[1..FRAME_PREFIX].copy_from_slice(&page.lsn.to_le_bytes());

        let stored_region = FRAME_PREFIX..self.page_size - FRAME_SUFFIX;
        if self.cipher.is_enabled() && !page.id.is_nil() {
            let blob = self.cipher.encrypt(page.body(), &page.id.0.to_le_bytes())?;
            debug_assert_eq!(blob.len(), stored_region.len());
            frame[stored_region.clone()].copy_from_slice(&blob);
        } else {
            frame[FRAME_PREFIX..FRAME_PREFIX + page.body().len()].copy_from_slice(page.body());
        }

        let crc = crc32c::crc32c(&frame[..self.page_size - FRAME_SUFFIX]);
        frame[self.page_size - FRAME_SUFFIX..].copy_from_slice(&crc.to_le_bytes());

        self.file
            .seek(SeekFrom::Start(page.id.0 * self.page_size as u64))?;
        self.file.write_all(&frame)?;
        if page.id.0 >= self.num_pages {
            self.num_pages = page.id.0 + 1;
        }
        Ok(())
    }

    /// Serialize the in-memory header onto page 0.
    pub fn persist_header(&mut self) -> DbResult<()> {
        let bytes = encode_to_vec(&self.header, bincode_config())
            .map_err(|e| DbError::Encoding(format!("header encode failed: {e}")))?;
        if bytes.len() + 4 > self.payload_size() {
            return Err(DbError::InvalidArgument(
                "header (index table) exceeds one page".into(),
            ));
        }
        let mut page = Page::new(PageId::HEADER, PageType::Header, self.payload_size());
        page.write_u32(0, bytes.len() as u32)?;
        page.write_bytes(4, &bytes)?;
        self.write_page(&page)
    }

    fn load_header(&mut self) -> DbResult<Header> {
        let page = self.read_page(PageId::HEADER)?;
        if page.page_type != PageType::Header {
            return Err(DbError::CorruptHeader("page 0 is not a header page".into()));
        }
        let len = page.read_u32(0)? as usize;
        let bytes = page
            .read_bytes(4, len)
            .map_err(|_| DbError::CorruptHeader("header length field out of range".into()))?;
        let (header, _) = decode_from_slice(bytes, bincode_config())
            .map_err(|e| DbError::CorruptHeader(format!("header decode failed: {e}")))?;
        Ok(header)
    }

    /// Mark the file as open-for-writing (set) or cleanly closed
    /// (cleared), durably.
    pub fn set_dirty_shutdown(&mut self, dirty: bool) -> DbResult<()> {
        self.header.dirty_shutdown = dirty;
        self.persist_header()?;
        self.flush()
    }

    /// Fsync everything written so far.
    pub fn flush(&mut self) -> DbResult<()> {
        self.file.sync_all()?;
        Ok(())
    }

    /// Flush and release the file lock.
    pub fn close(mut self) -> DbResult<()> {
        self.persist_header()?;
        self.flush()
        // Lock releases when the handle drops.
    }
}
