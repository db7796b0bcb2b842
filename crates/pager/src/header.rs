use common::{DbError, DbResult, IndexKind, PageId};
use serde::{Deserialize, Serialize};

pub const MAGIC: u32 = u32::from_be_bytes(*b"ENTI");
pub const FORMAT_VERSION: u16 = 1;

/// One registered index: its root page and enough metadata to reopen it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub name: String,
    pub kind: IndexKind,
    pub field: String,
    pub root: PageId,
    /// crc32c over `name | kind | field | root`, guards against a torn
    /// header write corrupting a single table row unnoticed.
    pub crc: u32,
}

impl IndexEntry {
    pub fn new(name: impl Into<String>, kind: IndexKind, field: impl Into<String>, root: PageId) -> Self {
        let mut entry = IndexEntry {
            name: name.into(),
            kind,
            field: field.into(),
            root,
            crc: 0,
        };
        entry.crc = entry.compute_crc();
        entry
    }

    pub fn compute_crc(&self) -> u32 {
        let mut crc = crc32c::crc32c(self.name.as_bytes());
        crc = crc32c::crc32c_append(crc, &[self.kind as u8]);
        crc = crc32c::crc32c_append(crc, self.field.as_bytes());
        crc32c::crc32c_append(crc, &self.root.0.to_le_bytes())
    }

    pub fn verify(&self) -> DbResult<()> {
        if self.crc == self.compute_crc() {
            Ok(())
        } else {
            Err(DbError::CorruptHeader(format!(
                "index entry '{}' failed its checksum",
                self.name
            )))
        }
    }
}

/// Contents of page 0. Never encrypted: the salt must be readable
/// before any key material can be derived.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub magic: u32,
    pub format_version: u16,
    pub page_size: u32,
    pub collection: String,
    pub schema_version: u32,
    pub record_count: u64,
    /// Head of the free-page list; 0 means empty.
    pub free_head: PageId,
    /// Set while the file is open for writing; still set after a crash.
    pub dirty_shutdown: bool,
    pub encryption_salt: Option<[u8; 16]>,
    pub indexes: Vec<IndexEntry>,
}

impl Header {
    pub fn new(collection: impl Into<String>, page_size: u32) -> Self {
        Header {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            page_size,
            collection: collection.into(),
            schema_version: 0,
            record_count: 0,
            free_head: PageId(0),
            dirty_shutdown: false,
            encryption_salt: None,
            indexes: Vec::new(),
        }
    }

    pub fn validate(&self, expected_page_size: u32) -> DbResult<()> {
        if self.magic != MAGIC {
            return Err(DbError::CorruptHeader(format!(
                "bad magic 0x{:08x}",
                self.magic
            )));
        }
        if self.format_version != FORMAT_VERSION {
            return Err(DbError::CorruptHeader(format!(
                "unsupported format version {}",
                self.format_version
            )));
        }
        if self.page_size != expected_page_size {
            return Err(DbError::CorruptHeader(format!(
                "file uses {}-byte pages, configured for {}",
                self.page_size, expected_page_size
            )));
        }
        for entry in &self.indexes {
            entry.verify()?;
        }
        Ok(())
    }

    pub fn index(&self, field: &str) -> Option<&IndexEntry> {
        self.indexes.iter().find(|e| e.field == field)
    }

    pub fn index_mut(&mut self, field: &str) -> Option<&mut IndexEntry> {
        self.indexes.iter_mut().find(|e| e.field == field)
    }

    pub fn remove_index(&mut self, field: &str) -> Option<IndexEntry> {
        let idx = self.indexes.iter().position(|e| e.field == field)?;
        Some(self.indexes.remove(idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_header_validates() {
        let header = Header::new("products", 4096);
        header.validate(4096).unwrap();
    }

    #[test]
    fn page_size_mismatch_is_corrupt() {
        let header = Header::new("products", 4096);
        assert!(matches!(
            header.validate(8192),
            Err(DbError::CorruptHeader(_))
        ));
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut header = Header::new("products", 4096);
        header.magic = 0x1234_5678;
        assert!(matches!(
            header.validate(4096),
            Err(DbError::CorruptHeader(_))
        ));
    }

    #[test]
    fn index_entry_crc_catches_tampering() {
        let mut entry = IndexEntry::new("idx_price", IndexKind::Ordered, "price", PageId(12));
        entry.verify().unwrap();

        entry.root = PageId(13);
        assert!(entry.verify().is_err());
    }

    #[test]
    fn index_lookup_by_field() {
        let mut header = Header::new("products", 4096);
        header
            .indexes
            .push(IndexEntry::new("idx_price", IndexKind::Ordered, "price", PageId(2)));
        assert!(header.index("price").is_some());
        assert!(header.index("name").is_none());
        assert!(header.remove_index("price").is_some());
        assert!(header.index("price").is_none());
    }
}
