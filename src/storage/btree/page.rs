use std::mem;

use crate::storage::btree::alloc::{KeyRecord, Update};
use crate::types::page::PageType;
use crate::types::{ArborError, ChildSlot, PageAddr, RecordNo, Result};

/// Page has changes that are not yet in a durable image.
pub const FLAG_MODIFIED: u8 = 0x01;
/// Page was built by a bulk load rather than read from disk.
pub const FLAG_BULK_LOAD: u8 = 0x02;
/// Page is the placeholder root of a freshly created tree.
pub const FLAG_INITIAL_EMPTY: u8 = 0x04;

/// Append-only owned record sequence.
///
/// Appends are O(1) amortized and reserve fallibly, so a failed append
/// drops (and thereby releases) the record instead of aborting.
#[derive(Debug)]
pub struct RecordList<T> {
    items: Vec<T>,
}

impl<T> Default for RecordList<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> RecordList<T> {
    /// Creates an empty list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `item` at the tail.
    pub fn try_push(&mut self, item: T) -> Result<()> {
        if self.items.try_reserve(1).is_err() {
            return Err(ArborError::OutOfMemory("record list"));
        }
        self.items.push(item);
        Ok(())
    }

    /// Number of entries in the list.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// True if the list is empty.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// First entry, if any.
    pub fn first(&self) -> Option<&T> {
        self.items.first()
    }

    /// Mutable access to the tail entry.
    pub fn last_mut(&mut self) -> Option<&mut T> {
        self.items.last_mut()
    }

    /// Iterates entries in append order.
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.items.iter()
    }

    /// Moves every entry out, leaving the list empty.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }
}

/// A row-store record: an owned key with its owned value update.
#[derive(Debug)]
pub struct RowInsert {
    key: KeyRecord,
    update: Update,
}

impl RowInsert {
    /// Pairs an allocated key with its value.
    pub fn new(key: KeyRecord, update: Update) -> Self {
        Self { key, update }
    }

    /// Key bytes.
    pub fn key(&self) -> &[u8] {
        self.key.key()
    }

    /// Value bytes.
    pub fn value(&self) -> &[u8] {
        self.update.value()
    }
}

/// Row-store child reference: the child's first key and where it lives.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RowRef {
    /// Copy of the first key on the child page.
    pub key: Box<[u8]>,
    /// Durable address, set once the child has been reconciled.
    pub addr: Option<PageAddr>,
}

impl RowRef {
    /// Copies `key` into a new unresolved reference.
    pub fn copy_key(key: &[u8]) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(key.len())
            .map_err(|_| ArborError::OutOfMemory("child reference key"))?;
        buf.extend_from_slice(key);
        Ok(Self {
            key: buf.into_boxed_slice(),
            addr: None,
        })
    }
}

/// Column-store child reference: the child's starting record number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ColRef {
    /// First record number stored on the child page.
    pub recno: RecordNo,
    /// Durable address, set once the child has been reconciled.
    pub addr: Option<PageAddr>,
}

/// Records held by a page that has not been reconciled yet.
#[derive(Debug)]
pub enum PageContent {
    /// Column-store leaf: one update per record (or per run).
    Column {
        /// Record number of the first update.
        recno: RecordNo,
        /// Updates in record-number order.
        updates: RecordList<Update>,
    },
    /// Row-store leaf: key/value pairs in key order.
    Row {
        /// Inserts in key order.
        inserts: RecordList<RowInsert>,
    },
    /// Column-store internal page.
    ColumnInternal {
        /// Record number of the first child.
        recno: RecordNo,
        /// Children in record-number order.
        children: Vec<ColRef>,
    },
    /// Row-store internal page.
    RowInternal {
        /// Children in key order.
        children: Vec<RowRef>,
    },
}

impl PageContent {
    /// Empty content suitable for a page of `page_type`.
    pub fn empty(page_type: PageType) -> Self {
        match page_type {
            PageType::ColFix | PageType::ColRle | PageType::ColVar => PageContent::Column {
                recno: RecordNo::FIRST,
                updates: RecordList::new(),
            },
            PageType::RowLeaf => PageContent::Row {
                inserts: RecordList::new(),
            },
            PageType::ColInt => PageContent::ColumnInternal {
                recno: RecordNo::FIRST,
                children: Vec::new(),
            },
            PageType::RowInt => PageContent::RowInternal {
                children: Vec::new(),
            },
        }
    }

    /// Number of entries (updates, inserts, or children).
    pub fn entries(&self) -> usize {
        match self {
            PageContent::Column { updates, .. } => updates.len(),
            PageContent::Row { inserts } => inserts.len(),
            PageContent::ColumnInternal { children, .. } => children.len(),
            PageContent::RowInternal { children } => children.len(),
        }
    }

    fn matches(&self, page_type: PageType) -> bool {
        matches!(
            (self, page_type),
            (
                PageContent::Column { .. },
                PageType::ColFix | PageType::ColRle | PageType::ColVar
            ) | (PageContent::Row { .. }, PageType::RowLeaf)
                | (PageContent::ColumnInternal { .. }, PageType::ColInt)
                | (PageContent::RowInternal { .. }, PageType::RowInt)
        )
    }
}

/// Whether a page still holds its records or has been written out.
#[derive(Debug)]
pub enum PageBody {
    /// Records accumulated in memory; no durable image exists.
    Building(PageContent),
    /// Records written to a durable image and released from memory.
    Reconciled {
        /// Where the image lives.
        addr: PageAddr,
    },
}

/// An in-memory tree page.
#[derive(Debug)]
pub struct Page {
    page_type: PageType,
    parent_slot: Option<ChildSlot>,
    read_gen: u64,
    flags: u8,
    body: PageBody,
}

impl Page {
    /// Placeholder root of a freshly created, empty tree.
    pub fn initial_empty(page_type: PageType) -> Self {
        Self {
            page_type,
            parent_slot: None,
            read_gen: 0,
            flags: FLAG_INITIAL_EMPTY,
            body: PageBody::Building(PageContent::empty(page_type)),
        }
    }

    /// Skeleton leaf built by a bulk load; `slot` is the parent reference
    /// that will point at it once reconciled.
    pub fn bulk_leaf(
        page_type: PageType,
        slot: ChildSlot,
        read_gen: u64,
        content: PageContent,
    ) -> Result<Self> {
        if !page_type.is_leaf() {
            return Err(ArborError::Invalid("bulk leaf needs a leaf page type"));
        }
        Self::building(page_type, Some(slot), read_gen, FLAG_MODIFIED | FLAG_BULK_LOAD, content)
    }

    /// Internal root page with no parent.
    pub fn root(page_type: PageType, content: PageContent) -> Result<Self> {
        if page_type.is_leaf() {
            return Err(ArborError::Invalid("root needs an internal page type"));
        }
        Self::building(page_type, None, 0, FLAG_MODIFIED, content)
    }

    fn building(
        page_type: PageType,
        parent_slot: Option<ChildSlot>,
        read_gen: u64,
        flags: u8,
        content: PageContent,
    ) -> Result<Self> {
        if !content.matches(page_type) {
            return Err(ArborError::Invalid("page content does not match page type"));
        }
        Ok(Self {
            page_type,
            parent_slot,
            read_gen,
            flags,
            body: PageBody::Building(content),
        })
    }

    /// Type of the page.
    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    /// Child slot of the parent reference, `None` for a root.
    pub fn parent_slot(&self) -> Option<ChildSlot> {
        self.parent_slot
    }

    /// Read generation the page was created with; zero outside bulk loads.
    pub fn read_gen(&self) -> u64 {
        self.read_gen
    }

    /// True if any bit of `flag` is set.
    pub fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// Page holds changes with no durable image yet.
    pub fn is_modified(&self) -> bool {
        self.has_flag(FLAG_MODIFIED)
    }

    /// Page was built by a bulk load.
    pub fn is_bulk_load(&self) -> bool {
        self.has_flag(FLAG_BULK_LOAD)
    }

    /// Page is the placeholder root of a fresh tree.
    pub fn is_initial_empty(&self) -> bool {
        self.has_flag(FLAG_INITIAL_EMPTY)
    }

    /// Records or the durable address, depending on state.
    pub fn body(&self) -> &PageBody {
        &self.body
    }

    /// Records still held in memory, if the page has not been reconciled.
    pub fn content(&self) -> Option<&PageContent> {
        match &self.body {
            PageBody::Building(content) => Some(content),
            PageBody::Reconciled { .. } => None,
        }
    }

    /// Durable address, once reconciled.
    pub fn addr(&self) -> Option<PageAddr> {
        match self.body {
            PageBody::Building(_) => None,
            PageBody::Reconciled { addr } => Some(addr),
        }
    }

    /// Drops the in-memory records and records where the image went.
    pub(crate) fn mark_reconciled(&mut self, addr: PageAddr) {
        self.body = PageBody::Reconciled { addr };
        self.flags &= !FLAG_MODIFIED;
    }

    /// Records that an image of the current records exists.
    pub(crate) fn mark_clean(&mut self) {
        self.flags &= !FLAG_MODIFIED;
    }
}
