//! Node (de)serialization onto index pages.
//!
//! Page body: `u8 format version | u8 kind | u32 len | bincode bytes`.
//! The kind byte doubles as a cross-check against the page type tag.

use buffer::BufferPool;
use common::{DbError, DbResult, PageId};
use pager::PageType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const NODE_FORMAT: u8 = 1;
const KIND_INTERNAL: u8 = 0;
const KIND_LEAF: u8 = 1;
const NODE_HEADER: usize = 6;

fn bincode_config() -> impl bincode::config::Config {
    bincode::config::legacy()
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Node {
    Internal {
        keys: Vec<Vec<u8>>,
        children: Vec<PageId>,
    },
    Leaf {
        /// Sorted by `(key, record_id)`.
        entries: Vec<(Vec<u8>, String)>,
        next: Option<PageId>,
    },
}

impl Node {
    pub fn empty_leaf() -> Self {
        Node::Leaf {
            entries: Vec::new(),
            next: None,
        }
    }

    fn kind(&self) -> u8 {
        match self {
            Node::Internal { .. } => KIND_INTERNAL,
            Node::Leaf { .. } => KIND_LEAF,
        }
    }

    fn page_type(&self) -> PageType {
        match self {
            Node::Internal { .. } => PageType::IndexInternal,
            Node::Leaf { .. } => PageType::IndexLeaf,
        }
    }

    pub fn split_leaf(self) -> DbResult<(Node, Node, Vec<u8>)> {
        match self {
            Node::Leaf { entries, next } => {
                let mid = entries.len() / 2;
                if mid == 0 {
                    return Err(DbError::InvalidArgument(
                        "index entry larger than a page".into(),
                    ));
                }
                let right_entries = entries[mid..].to_vec();
                let sep = right_entries[0].0.clone();
                let left = Node::Leaf {
                    entries: entries[..mid].to_vec(),
                    next: None, // caller links to the new right page
                };
                let right = Node::Leaf {
                    entries: right_entries,
                    next,
                };
                Ok((left, right, sep))
            }
            Node::Internal { .. } => Err(DbError::InvalidArgument(
                "split_leaf called on internal node".into(),
            )),
        }
    }

    pub fn split_internal(self) -> DbResult<(Node, Vec<u8>, Node)> {
        match self {
            Node::Internal { keys, children } => {
                let mid = keys.len() / 2;
                if mid == 0 {
                    return Err(DbError::InvalidArgument(
                        "index separator larger than a page".into(),
                    ));
                }
                let sep = keys[mid].clone();
                let left = Node::Internal {
                    keys: keys[..mid].to_vec(),
                    children: children[..=mid].to_vec(),
                };
                let right = Node::Internal {
                    keys: keys[mid + 1..].to_vec(),
                    children: children[mid + 1..].to_vec(),
                };
                Ok((left, sep, right))
            }
            Node::Leaf { .. } => Err(DbError::InvalidArgument(
                "split_internal called on leaf node".into(),
            )),
        }
    }
}

fn encode(node: &Node) -> DbResult<Vec<u8>> {
    bincode::serde::encode_to_vec(node, bincode_config())
        .map_err(|e| DbError::Encoding(format!("index node encode failed: {e}")))
}

/// Whether `node` still fits on one page.
pub fn fits(pool: &Arc<BufferPool>, node: &Node) -> DbResult<bool> {
    Ok(NODE_HEADER + encode(node)?.len() <= pool.payload_size())
}

pub fn read(pool: &Arc<BufferPool>, pid: PageId) -> DbResult<Node> {
    let pinned = pool.pin(pid)?;
    let page = pinned.read();
    if !matches!(
        page.page_type,
        PageType::IndexInternal | PageType::IndexLeaf
    ) {
        return Err(DbError::CorruptPage(pid.0));
    }
    let version = page.read_bytes(0, 1)?[0];
    if version != NODE_FORMAT {
        return Err(DbError::Decoding(format!(
            "unsupported index node format {version}"
        )));
    }
    let kind = page.read_bytes(1, 1)?[0];
    let len = page.read_u32(2)? as usize;
    let bytes = page
        .read_bytes(NODE_HEADER, len)
        .map_err(|_| DbError::CorruptPage(pid.0))?;
    let (node, _): (Node, usize) = bincode::serde::decode_from_slice(bytes, bincode_config())
        .map_err(|e| DbError::Decoding(format!("index node decode failed: {e}")))?;
    if node.kind() != kind {
        return Err(DbError::CorruptPage(pid.0));
    }
    Ok(node)
}

pub fn write_at(pool: &Arc<BufferPool>, pid: PageId, node: &Node) -> DbResult<()> {
    let bytes = encode(node)?;
    if NODE_HEADER + bytes.len() > pool.payload_size() {
        return Err(DbError::Encoding("index node exceeds page size".into()));
    }
    let pinned = pool.pin(pid)?;
    let mut page = pinned.write();
    page.page_type = node.page_type();
    page.write_bytes(0, &[NODE_FORMAT, node.kind()])?;
    page.write_u32(2, bytes.len() as u32)?;
    page.write_bytes(NODE_HEADER, &bytes)?;
    page.mark_dirty();
    Ok(())
}

pub fn write_new(pool: &Arc<BufferPool>, node: &Node) -> DbResult<PageId> {
    let bytes = encode(node)?;
    if NODE_HEADER + bytes.len() > pool.payload_size() {
        return Err(DbError::Encoding("index node exceeds page size".into()));
    }
    let pinned = pool.allocate(node.page_type())?;
    let mut page = pinned.write();
    page.write_bytes(0, &[NODE_FORMAT, node.kind()])?;
    page.write_u32(2, bytes.len() as u32)?;
    page.write_bytes(NODE_HEADER, &bytes)?;
    Ok(page.id)
}
