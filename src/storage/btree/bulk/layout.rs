//! Per-layout record building and parent bookkeeping for bulk loads.

use crate::storage::btree::alloc::{Allocator, Update};
use crate::storage::btree::page::{ColRef, Page, PageContent, RecordList, RowInsert, RowRef};
use crate::types::page::PageType;
use crate::types::{ArborError, ChildSlot, PageAddr, RecordNo, Result};

/// Growable child-reference array owned by a bulk-load session.
///
/// Capacity grows in fixed chunks. Slots are stable indices, so a leaf
/// can carry its slot through reconciliation and have the address
/// patched in afterwards.
#[derive(Debug)]
pub struct ChildRefArray<T> {
    refs: Vec<T>,
    chunk: usize,
}

impl<T> ChildRefArray<T> {
    /// Creates an array that grows `chunk` references at a time, with the
    /// first chunk already reserved.
    pub fn with_chunk(chunk: usize) -> Result<Self> {
        let mut array = Self {
            refs: Vec::new(),
            chunk: chunk.max(1),
        };
        array.grow()?;
        Ok(array)
    }

    fn grow(&mut self) -> Result<()> {
        self.refs
            .try_reserve_exact(self.chunk)
            .map_err(|_| ArborError::OutOfMemory("child reference array"))
    }

    /// Appends `child`, growing by one chunk when full.
    pub fn push(&mut self, child: T) -> Result<ChildSlot> {
        if self.refs.len() == self.refs.capacity() {
            self.grow()?;
        }
        let slot = ChildSlot(self.refs.len());
        self.refs.push(child);
        Ok(slot)
    }

    /// Reference stored at `slot`, if it was pushed.
    pub fn get_mut(&mut self, slot: ChildSlot) -> Option<&mut T> {
        self.refs.get_mut(slot.0)
    }

    /// References handed out so far.
    pub fn used(&self) -> usize {
        self.refs.len()
    }

    /// References the array can hold before it grows again.
    pub fn allocated(&self) -> usize {
        self.refs.capacity()
    }

    /// Moves the references out, leaving the array empty.
    pub fn take(&mut self) -> Vec<T> {
        std::mem::take(&mut self.refs)
    }
}

/// Layout-specific half of a bulk load.
pub trait LayoutStrategy: Send {
    /// Page type of the leaves this strategy fills.
    fn leaf_page_type(&self) -> PageType;

    /// Copies one record into the current page's list.
    fn build_record(&mut self, alloc: &dyn Allocator, key: Option<&[u8]>, value: &[u8])
        -> Result<()>;

    /// Reserves a parent reference for the current page and hands over its
    /// records; `records` is the logical record count the page holds.
    fn capture_child_reference(&mut self, records: u64) -> Result<(ChildSlot, PageContent)>;

    /// Records where the leaf referenced by `slot` landed.
    fn resolve_child(&mut self, slot: ChildSlot, addr: PageAddr) -> Result<()>;

    /// Builds the internal root over every captured child.
    fn build_root_page(&mut self) -> Result<Page>;

    /// `(used, allocated)` child-reference counts.
    fn child_refs(&self) -> (usize, usize);
}

/// Column-store strategy shared by the fixed, run-length and variable layouts.
pub struct ColumnStrategy {
    page_type: PageType,
    page_recno: RecordNo,
    updates: RecordList<Update>,
    refs: ChildRefArray<ColRef>,
}

impl ColumnStrategy {
    /// Strategy for column leaves of `page_type`, growing child references by `chunk`.
    pub fn new(page_type: PageType, chunk: usize) -> Result<Self> {
        if !page_type.is_column() || !page_type.is_leaf() {
            return Err(ArborError::Invalid("column strategy needs a column leaf type"));
        }
        Ok(Self {
            page_type,
            page_recno: RecordNo::FIRST,
            updates: RecordList::new(),
            refs: ChildRefArray::with_chunk(chunk)?,
        })
    }

    /// Record number the current page starts at.
    pub fn page_recno(&self) -> RecordNo {
        self.page_recno
    }
}

impl LayoutStrategy for ColumnStrategy {
    fn leaf_page_type(&self) -> PageType {
        self.page_type
    }

    fn build_record(
        &mut self,
        alloc: &dyn Allocator,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> Result<()> {
        if key.is_some() {
            return Err(ArborError::Invalid("column-store inserts take no key"));
        }
        if self.page_type == PageType::ColRle {
            if let Some(tail) = self.updates.last_mut() {
                if tail.value() == value {
                    tail.extend_run();
                    return Ok(());
                }
            }
        }
        let update = alloc.alloc_update(value)?;
        self.updates.try_push(update)
    }

    fn capture_child_reference(&mut self, records: u64) -> Result<(ChildSlot, PageContent)> {
        let slot = self.refs.push(ColRef {
            recno: self.page_recno,
            addr: None,
        })?;
        let content = PageContent::Column {
            recno: self.page_recno,
            updates: self.updates.take(),
        };
        self.page_recno = self.page_recno.advance(records);
        Ok((slot, content))
    }

    fn resolve_child(&mut self, slot: ChildSlot, addr: PageAddr) -> Result<()> {
        let child = self
            .refs
            .get_mut(slot)
            .ok_or(ArborError::Invalid("unknown child slot"))?;
        child.addr = Some(addr);
        Ok(())
    }

    fn build_root_page(&mut self) -> Result<Page> {
        let content = PageContent::ColumnInternal {
            recno: RecordNo::FIRST,
            children: self.refs.take(),
        };
        Page::root(self.page_type.internal(), content)
    }

    fn child_refs(&self) -> (usize, usize) {
        (self.refs.used(), self.refs.allocated())
    }
}

/// Row-store strategy.
pub struct RowStrategy {
    inserts: RecordList<RowInsert>,
    refs: ChildRefArray<RowRef>,
}

impl RowStrategy {
    /// Row strategy growing child references by `chunk`.
    pub fn new(chunk: usize) -> Result<Self> {
        Ok(Self {
            inserts: RecordList::new(),
            refs: ChildRefArray::with_chunk(chunk)?,
        })
    }
}

impl LayoutStrategy for RowStrategy {
    fn leaf_page_type(&self) -> PageType {
        PageType::RowLeaf
    }

    fn build_record(
        &mut self,
        alloc: &dyn Allocator,
        key: Option<&[u8]>,
        value: &[u8],
    ) -> Result<()> {
        let key = key.ok_or(ArborError::Invalid("row-store inserts need a key"))?;
        let key = alloc.alloc_key_record(key)?;
        let update = alloc.alloc_update(value)?;
        self.inserts.try_push(RowInsert::new(key, update))
    }

    fn capture_child_reference(&mut self, _records: u64) -> Result<(ChildSlot, PageContent)> {
        let first = self
            .inserts
            .first()
            .ok_or(ArborError::Invalid("no records to capture"))?;
        let child = RowRef::copy_key(first.key())?;
        let slot = self.refs.push(child)?;
        let content = PageContent::Row {
            inserts: self.inserts.take(),
        };
        Ok((slot, content))
    }

    fn resolve_child(&mut self, slot: ChildSlot, addr: PageAddr) -> Result<()> {
        let child = self
            .refs
            .get_mut(slot)
            .ok_or(ArborError::Invalid("unknown child slot"))?;
        child.addr = Some(addr);
        Ok(())
    }

    fn build_root_page(&mut self) -> Result<Page> {
        let content = PageContent::RowInternal {
            children: self.refs.take(),
        };
        Page::root(self.leaf_page_type().internal(), content)
    }

    fn child_refs(&self) -> (usize, usize) {
        (self.refs.used(), self.refs.allocated())
    }
}

/// Strategy for leaves of `page_type`.
pub fn strategy_for(page_type: PageType, chunk: usize) -> Result<Box<dyn LayoutStrategy>> {
    if page_type == PageType::RowLeaf {
        Ok(Box::new(RowStrategy::new(chunk)?))
    } else {
        Ok(Box::new(ColumnStrategy::new(page_type, chunk)?))
    }
}
