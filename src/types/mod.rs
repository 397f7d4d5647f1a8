#![forbid(unsafe_code)]
//! Identifiers, errors, and on-disk page metadata shared across the crate.

/// CRC32 helpers for durable page images.
pub mod checksum;
/// Page types and the fixed header written in front of every page image.
pub mod page;

use std::fmt;

use serde::{Deserialize, Serialize};

/// Logical record number in a column-store tree (1-based).
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Serialize, Deserialize)]
pub struct RecordNo(pub u64);

impl RecordNo {
    /// The first record number of every column-store tree.
    pub const FIRST: RecordNo = RecordNo(1);

    /// Returns the record number `n` records after this one.
    pub fn advance(self, n: u64) -> Self {
        RecordNo(self.0 + n)
    }
}

/// Location of a durable page image inside a page store.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, Serialize, Deserialize)]
pub struct PageAddr {
    /// Byte offset of the image within the store.
    pub offset: u64,
    /// Length of the image in bytes.
    pub size: u32,
    /// CRC32 of the image, salted with its offset.
    pub checksum: u32,
}

/// Stable index of a child reference slot owned by a bulk-load session.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ChildSlot(pub usize);

/// Which page a reconciliation failure happened on.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum PageRole {
    /// A bulk-loaded leaf, identified by the child slot that will reference it.
    Leaf(ChildSlot),
    /// The synthesized root page.
    Root,
}

/// Errors raised by the page store, the tree and bulk loads.
#[derive(thiserror::Error, Debug)]
pub enum ArborError {
    /// Underlying file I/O failed.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// A caller broke an API precondition.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// The tree has no root to read from.
    #[error("not found")]
    NotFound,
    /// Bulk load started on a tree that is not initially empty.
    #[error("bulk-load is only possible for empty trees")]
    NotEmpty,
    /// An allocation failed; the payload names what was being allocated.
    #[error("out of memory allocating {0}")]
    OutOfMemory(&'static str),
    /// Writing a leaf or the root to durable storage failed.
    #[error("reconciliation of {page} failed: {source}")]
    ReconcileFailed {
        /// Page that was being reconciled.
        page: PageRole,
        /// Error reported by the reconciler.
        #[source]
        source: Box<ArborError>,
    },
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ArborError>;

impl fmt::Display for RecordNo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.offset, self.size)
    }
}

impl fmt::Display for ChildSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageRole::Leaf(slot) => write!(f, "leaf page (child slot {slot})"),
            PageRole::Root => f.write_str("root page"),
        }
    }
}

impl From<u64> for RecordNo {
    fn from(value: u64) -> Self {
        RecordNo(value)
    }
}

impl From<RecordNo> for u64 {
    fn from(value: RecordNo) -> Self {
        value.0
    }
}
