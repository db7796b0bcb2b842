use common::{DbError, DbResult, Lsn, PageId};

/// Page type tag, first byte of every stored page frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PageType {
    Header = 0,
    Record = 1,
    Overflow = 2,
    IndexInternal = 3,
    IndexLeaf = 4,
    Free = 5,
}

impl PageType {
    pub fn from_u8(byte: u8, pid: PageId) -> DbResult<Self> {
        Ok(match byte {
            0 => PageType::Header,
            1 => PageType::Record,
            2 => PageType::Overflow,
            3 => PageType::IndexInternal,
            4 => PageType::IndexLeaf,
            5 => PageType::Free,
            _ => return Err(DbError::CorruptPage(pid.0)),
        })
    }
}

/// In-memory copy of one page: id, type, LSN, and the decrypted body.
///
/// The dirty flag exists only in memory; the buffer manager consults it
/// to decide what must reach disk on eviction and checkpoint.
#[derive(Clone, Debug)]
pub struct Page {
    pub id: PageId,
    pub page_type: PageType,
    pub lsn: Lsn,
    body: Vec<u8>,
    dirty: bool,
}

impl Page {
    pub fn new(id: PageId, page_type: PageType, body_len: usize) -> Self {
        Page {
            id,
            page_type,
            lsn: 0,
            body: vec![0u8; body_len],
            dirty: false,
        }
    }

    pub(crate) fn from_parts(id: PageId, page_type: PageType, lsn: Lsn, body: Vec<u8>) -> Self {
        Page {
            id,
            page_type,
            lsn,
            body,
            dirty: false,
        }
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut [u8] {
        self.dirty = true;
        &mut self.body
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }

    /// Stamp the LSN of the WAL record that last touched this page.
    /// Page LSNs never move backwards: the WAL-before-data rule keys
    /// off the highest record affecting the page.
    pub fn set_lsn(&mut self, lsn: Lsn) {
        self.lsn = self.lsn.max(lsn);
        self.dirty = true;
    }

    pub fn zero(&mut self) {
        self.body.fill(0);
        self.dirty = true;
    }

    // Typed little-endian accessors for fixed offsets inside the body.

    pub fn read_u16(&self, offset: usize) -> DbResult<u16> {
        let bytes = self.slice(offset, 2)?;
        Ok(u16::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn write_u16(&mut self, offset: usize, value: u16) -> DbResult<()> {
        self.slice_mut(offset, 2)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_u32(&self, offset: usize) -> DbResult<u32> {
        let bytes = self.slice(offset, 4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn write_u32(&mut self, offset: usize, value: u32) -> DbResult<()> {
        self.slice_mut(offset, 4)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_u64(&self, offset: usize) -> DbResult<u64> {
        let bytes = self.slice(offset, 8)?;
        Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
    }

    pub fn write_u64(&mut self, offset: usize, value: u64) -> DbResult<()> {
        self.slice_mut(offset, 8)?.copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    pub fn read_bytes(&self, offset: usize, len: usize) -> DbResult<&[u8]> {
        self.slice(offset, len)
    }

    pub fn write_bytes(&mut self, offset: usize, bytes: &[u8]) -> DbResult<()> {
        self.slice_mut(offset, bytes.len())?.copy_from_slice(bytes);
        Ok(())
    }

    fn slice(&self, offset: usize, len: usize) -> DbResult<&[u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.body.len())
            .ok_or_else(|| {
                DbError::InvalidArgument(format!(
                    "page access at {offset}+{len} outside body of {}",
                    self.body.len()
                ))
            })?;
        Ok(&self.body[offset..end])
    }

    fn slice_mut(&mut self, offset: usize, len: usize) -> DbResult<&mut [u8]> {
        let end = offset
            .checked_add(len)
            .filter(|&end| end <= self.body.len())
            .ok_or_else(|| {
                DbError::InvalidArgument(format!(
                    "page access at {offset}+{len} outside body of {}",
                    self.body.len()
                ))
            })?;
        self.dirty = true;
        Ok(&mut self.body[offset..end])
    }
}
