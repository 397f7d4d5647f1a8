//! Bulk loading of an empty tree from records in increasing key order.
//!
//! A [`BulkLoad`] session bypasses search and split entirely: records are
//! appended to a skeleton leaf until it holds `records_per_page` records,
//! the leaf is handed to the tree's [`Reconciler`] and evicted, and only a
//! child reference survives. [`BulkLoad::end`] flushes the last partial
//! leaf and installs a single internal root over every child.
//!
//! Callers guarantee strictly increasing, unique keys (row layout) and
//! exclusive access to the tree for the lifetime of the session. Ordering
//! is not checked.

mod layout;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use layout::{strategy_for, ChildRefArray, ColumnStrategy, LayoutStrategy, RowStrategy};

use super::alloc::{AllocLedger, Allocator, HeapAllocator};
use super::page::Page;
use super::reconcile::{ReconcileFlags, Reconciler};
use super::tree::Tree;
use crate::types::{ArborError, ChildSlot, PageAddr, PageRole, RecordNo, Result};

/// Records accumulated on a skeleton leaf before it is reconciled.
pub const DEFAULT_RECORDS_PER_PAGE: u64 = 50_000;
/// Child references reserved each time the session's array fills up.
pub const CHILD_REF_CHUNK: usize = 1000;

/// Tuning knobs for a bulk-load session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkOptions {
    /// Records per skeleton leaf before it is flushed
    pub records_per_page: u64,
    /// Growth step of the child reference array
    pub child_ref_chunk: usize,
}

impl Default for BulkOptions {
    fn default() -> Self {
        Self {
            records_per_page: DEFAULT_RECORDS_PER_PAGE,
            child_ref_chunk: CHILD_REF_CHUNK,
        }
    }
}

impl BulkOptions {
    /// Sets the number of records per leaf page.
    pub fn records_per_page(mut self, records: u64) -> Self {
        self.records_per_page = records;
        self
    }

    /// Sets the growth step of the child reference array.
    pub fn child_ref_chunk(mut self, chunk: usize) -> Self {
        self.child_ref_chunk = chunk;
        self
    }

    /// Rejects zero capacities.
    pub fn validate(&self) -> Result<()> {
        if self.records_per_page == 0 {
            return Err(ArborError::Invalid("records_per_page must be greater than zero"));
        }
        if self.child_ref_chunk == 0 {
            return Err(ArborError::Invalid("child_ref_chunk must be greater than zero"));
        }
        Ok(())
    }
}

/// Outcome of a completed bulk load.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BulkSummary {
    /// Records inserted
    pub records: u64,
    /// Leaf pages written
    pub leaf_pages: u64,
    /// Image of the new root
    pub root: PageAddr,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum SessionState {
    Active,
    Abandoned,
    Finished,
}

/// A bulk-load session over one initially empty tree.
pub struct BulkLoad<'t> {
    tree: &'t mut Tree,
    reconciler: Arc<dyn Reconciler>,
    alloc: Arc<dyn Allocator>,
    strategy: Box<dyn LayoutStrategy>,
    // Logical records on the active page; an RLE run counts each record.
    ins_cnt: u64,
    capacity: u64,
    records: u64,
    leaf_pages: u64,
    state: SessionState,
}

impl<'t> BulkLoad<'t> {
    /// Starts a bulk load using the heap allocator.
    pub fn begin(tree: &'t mut Tree, opts: BulkOptions) -> Result<Self> {
        Self::begin_with_allocator(tree, opts, Arc::new(HeapAllocator::new()))
    }

    /// Starts a bulk load whose records come from `alloc`.
    ///
    /// Fails with [`ArborError::NotEmpty`] unless the tree is in its
    /// initial empty state; the tree is left untouched on any error.
    pub fn begin_with_allocator(
        tree: &'t mut Tree,
        opts: BulkOptions,
        alloc: Arc<dyn Allocator>,
    ) -> Result<Self> {
        opts.validate()?;
        if !tree.is_initially_empty() {
            return Err(ArborError::NotEmpty);
        }
        let strategy = strategy_for(tree.layout().leaf_page_type(), opts.child_ref_chunk)?;
        tree.release_empty_placeholder()?;
        tree.disable_background_eviction();
        debug!(
            page_type = strategy.leaf_page_type().name(),
            records_per_page = opts.records_per_page,
            "bulk load started"
        );
        Ok(Self {
            reconciler: tree.reconciler(),
            tree,
            alloc,
            strategy,
            ins_cnt: 0,
            capacity: opts.records_per_page,
            records: 0,
            leaf_pages: 0,
            state: SessionState::Active,
        })
    }

    /// Appends one record; `key` must be `Some` exactly for row layouts.
    ///
    /// On [`ArborError::OutOfMemory`] nothing of the record is kept and the
    /// insert may be retried. A reconciliation failure abandons the session.
    pub fn insert(&mut self, key: Option<&[u8]>, value: &[u8]) -> Result<()> {
        self.ensure_active()?;
        if let Err(err) = self
            .strategy
            .build_record(self.alloc.as_ref(), key, value)
        {
            if matches!(err, ArborError::OutOfMemory(_)) {
                self.tree.stats().inc_alloc_failures();
            }
            return Err(err);
        }
        self.ins_cnt += 1;
        self.records += 1;
        self.tree.stats().inc_items_inserted();
        if self.ins_cnt >= self.capacity {
            self.rotate()?;
        }
        Ok(())
    }

    /// Appends a row-store record.
    pub fn insert_row(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.insert(Some(key), value)
    }

    /// Appends the next column-store record.
    pub fn insert_value(&mut self, value: &[u8]) -> Result<()> {
        self.insert(None, value)
    }

    fn ensure_active(&self) -> Result<()> {
        match self.state {
            SessionState::Active => Ok(()),
            SessionState::Abandoned => Err(ArborError::Invalid("bulk load was abandoned")),
            SessionState::Finished => Err(ArborError::Invalid("bulk load already finished")),
        }
    }

    /// Flushes the active page and starts an empty one.
    fn rotate(&mut self) -> Result<()> {
        let (slot, content) = match self.strategy.capture_child_reference(self.ins_cnt) {
            Ok(captured) => captured,
            Err(err) => return Err(self.abandon(err)),
        };
        let read_gen = self.tree.next_read_gen();
        let page_type = self.strategy.leaf_page_type();
        let mut page = match Page::bulk_leaf(page_type, slot, read_gen, content) {
            Ok(page) => page,
            Err(err) => return Err(self.abandon(err)),
        };
        let flushed = self.ins_cnt;
        self.ins_cnt = 0;
        let addr = match self
            .reconciler
            .reconcile_and_evict(&mut page, ReconcileFlags::EVICT_LOCKED)
        {
            Ok(addr) => addr,
            Err(source) => {
                return Err(self.abandon(ArborError::ReconcileFailed {
                    page: PageRole::Leaf(slot),
                    source: Box::new(source),
                }))
            }
        };
        let resolved = page
            .parent_slot()
            .ok_or(ArborError::Invalid("bulk leaf lost its parent slot"))
            .and_then(|slot| self.strategy.resolve_child(slot, addr));
        if let Err(err) = resolved {
            return Err(self.abandon(err));
        }
        self.leaf_pages += 1;
        debug!(slot = slot.0, records = flushed, addr = %addr, "bulk leaf flushed");
        Ok(())
    }

    fn abandon(&mut self, err: ArborError) -> ArborError {
        self.state = SessionState::Abandoned;
        warn!(error = %err, "bulk load abandoned");
        err
    }

    /// Flushes the last partial page, then builds, installs and reconciles
    /// the root.
    ///
    /// If the root fails to reconcile the tree keeps it in memory, pointing
    /// at durable leaves but without a durable image of its own.
    pub fn end(mut self) -> Result<BulkSummary> {
        self.ensure_active()?;
        if self.ins_cnt > 0 {
            self.rotate()?;
        }
        let root = match self.strategy.build_root_page() {
            Ok(root) => root,
            Err(err) => return Err(self.abandon(err)),
        };
        if let Err(err) = self.tree.install_root(root) {
            return Err(self.abandon(err));
        }
        let root = match self.tree.reconcile_root() {
            Ok(addr) => addr,
            Err(source) => {
                return Err(self.abandon(ArborError::ReconcileFailed {
                    page: PageRole::Root,
                    source: Box::new(source),
                }))
            }
        };
        self.tree.enable_background_eviction();
        self.state = SessionState::Finished;
        let stats = self.tree.stats();
        stats.inc_loads_completed();
        info!(
            records = self.records,
            leaf_pages = self.leaf_pages,
            root = %root,
            "bulk load finished"
        );
        Ok(BulkSummary {
            records: self.records,
            leaf_pages: self.leaf_pages,
            root,
        })
    }

    /// Records held by the page currently accumulating.
    pub fn page_records(&self) -> u64 {
        self.ins_cnt
    }

    /// Records accepted so far.
    pub fn records_inserted(&self) -> u64 {
        self.records
    }

    /// Leaf pages flushed so far.
    pub fn leaf_pages(&self) -> u64 {
        self.leaf_pages
    }

    /// Child references recorded so far.
    pub fn child_refs_used(&self) -> usize {
        self.strategy.child_refs().0
    }

    /// Child reference capacity reserved so far.
    pub fn child_refs_allocated(&self) -> usize {
        self.strategy.child_refs().1
    }

    /// Record number the next column-store insert will receive.
    pub fn next_recno(&self) -> RecordNo {
        RecordNo::FIRST.advance(self.records)
    }

    /// Records per leaf for this session.
    pub fn page_capacity(&self) -> u64 {
        self.capacity
    }

    /// Ledger of the allocator feeding this session.
    pub fn ledger(&self) -> Arc<AllocLedger> {
        Arc::clone(self.alloc.ledger())
    }

    /// True once a failure has ended the session.
    pub fn is_abandoned(&self) -> bool {
        self.state == SessionState::Abandoned
    }

    /// Slot the next flushed page will occupy in the root.
    pub fn next_child_slot(&self) -> ChildSlot {
        ChildSlot(self.child_refs_used())
    }
}

impl Drop for BulkLoad<'_> {
    fn drop(&mut self) {
        if self.state != SessionState::Finished {
            self.tree.stats().inc_loads_abandoned();
            warn!(
                records = self.records,
                leaf_pages = self.leaf_pages,
                "bulk load dropped before end"
            );
        }
    }
}
