use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::image::ImageView;
use super::page::{ColRef, Page, PageContent, RowRef};
use super::reconcile::{ImageReconciler, ReconcileFlags, Reconciler};
use super::stats::{TreeStats, TreeStatsSnapshot};
use crate::primitives::pager::PageStore;
use crate::types::page::PageType;
use crate::types::{ArborError, PageAddr, RecordNo, Result};

/// How records are addressed and laid out on leaf pages.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Layout {
    /// Column store of fixed-width values.
    #[serde(rename = "fix")]
    FixedColumn,
    /// Column store with run-length encoded values.
    #[serde(rename = "rle")]
    RunLengthColumn,
    /// Column store of variable-length values.
    #[serde(rename = "var")]
    VariableColumn,
    /// Row store of variable-length keys and values.
    #[serde(rename = "row")]
    Row,
}

impl Layout {
    /// Page type of the leaves this layout produces.
    pub const fn leaf_page_type(self) -> PageType {
        match self {
            Layout::FixedColumn => PageType::ColFix,
            Layout::RunLengthColumn => PageType::ColRle,
            Layout::VariableColumn => PageType::ColVar,
            Layout::Row => PageType::RowLeaf,
        }
    }

    /// True for the record-number addressed layouts.
    pub const fn is_column(self) -> bool {
        !matches!(self, Layout::Row)
    }

    /// Name used in config files and on the command line.
    pub const fn name(self) -> &'static str {
        match self {
            Layout::FixedColumn => "fix",
            Layout::RunLengthColumn => "rle",
            Layout::VariableColumn => "var",
            Layout::Row => "row",
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Layout {
    type Err = ArborError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fix" => Ok(Layout::FixedColumn),
            "rle" => Ok(Layout::RunLengthColumn),
            "var" => Ok(Layout::VariableColumn),
            "row" => Ok(Layout::Row),
            _ => Err(ArborError::Invalid("unknown layout")),
        }
    }
}

/// Configuration knobs for a tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeOptions {
    /// Record layout of the tree
    pub layout: Layout,
    /// Value width in bytes for fixed-length column trees
    pub fixed_width: u8,
    /// Whether to verify checksums when reading page images
    pub checksum_verify_on_read: bool,
    /// Root image of an existing tree
    #[serde(skip)]
    pub root: Option<PageAddr>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            layout: Layout::Row,
            fixed_width: 1,
            checksum_verify_on_read: true,
            root: None,
        }
    }
}

impl TreeOptions {
    /// Sets the record layout.
    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Sets the value width for fixed-length column trees.
    pub fn fixed_width(mut self, width: u8) -> Self {
        self.fixed_width = width;
        self
    }

    /// Enables or disables checksum verification on reads.
    pub fn checksum_verify_on_read(mut self, enabled: bool) -> Self {
        self.checksum_verify_on_read = enabled;
        self
    }

    /// Opens the tree rooted at an existing image.
    pub fn root(mut self, root: PageAddr) -> Self {
        self.root = Some(root);
        self
    }

    /// Rejects settings no tree can be built with.
    pub fn validate(&self) -> Result<()> {
        if self.layout == Layout::FixedColumn && self.fixed_width == 0 {
            return Err(ArborError::Invalid("fixed_width must be greater than zero"));
        }
        Ok(())
    }
}

/// Where the tree's root currently lives.
enum RootState {
    /// Root held in memory: the placeholder of an empty tree, or a root a
    /// bulk load installed but could not reconcile.
    Mem(Page),
    /// Placeholder released by a bulk load still in progress.
    Released,
    /// Root written to a durable image.
    Disk(PageAddr),
}

/// Children of a tree's root page.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RootEntries {
    /// Children of a column-store root.
    Column(Vec<ColRef>),
    /// Children of a row-store root.
    Row(Vec<RowRef>),
}

impl RootEntries {
    /// Number of children.
    pub fn len(&self) -> usize {
        match self {
            RootEntries::Column(children) => children.len(),
            RootEntries::Row(children) => children.len(),
        }
    }

    /// True if the root has no children.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Ordered page tree over a [`PageStore`].
pub struct Tree {
    store: Arc<dyn PageStore>,
    reconciler: Arc<dyn Reconciler>,
    options: TreeOptions,
    root: RootState,
    eviction_enabled: bool,
    read_gen: u64,
    stats: Arc<TreeStats>,
}

impl Tree {
    /// Open the tree rooted at `opts.root`, or create an empty one.
    pub fn open_or_create(ps: &Arc<dyn PageStore>, opts: TreeOptions) -> Result<Self> {
        opts.validate()?;
        ps.set_checksum_verification(opts.checksum_verify_on_read);
        let store = Arc::clone(ps);
        let stats = Arc::new(TreeStats::default());
        let reconciler: Arc<dyn Reconciler> = Arc::new(ImageReconciler::new(
            Arc::clone(&store),
            opts.fixed_width,
            Arc::clone(&stats),
        ));
        let root = match opts.root {
            Some(addr) => RootState::Disk(addr),
            None => RootState::Mem(Page::initial_empty(opts.layout.leaf_page_type())),
        };
        Ok(Self {
            store,
            reconciler,
            options: opts,
            root,
            eviction_enabled: true,
            read_gen: 0,
            stats,
        })
    }

    /// Replaces the reconciler pages are handed to.
    pub fn with_reconciler(mut self, reconciler: Arc<dyn Reconciler>) -> Self {
        self.reconciler = reconciler;
        self
    }

    /// Record layout of the tree.
    pub fn layout(&self) -> Layout {
        self.options.layout
    }

    /// Options the tree was opened with.
    pub fn options(&self) -> &TreeOptions {
        &self.options
    }

    /// Store holding the tree's images.
    pub fn store(&self) -> &Arc<dyn PageStore> {
        &self.store
    }

    /// Access the live statistics counters for this tree.
    pub fn stats(&self) -> Arc<TreeStats> {
        Arc::clone(&self.stats)
    }

    /// Snapshot the current statistics counters.
    pub fn stats_snapshot(&self) -> TreeStatsSnapshot {
        self.stats.snapshot()
    }

    /// Emit the current statistics to the tracing sink.
    pub fn emit_stats(&self) {
        self.stats.emit_tracing();
    }

    /// Address of the durable root image, if there is one.
    pub fn root_addr(&self) -> Option<PageAddr> {
        match self.root {
            RootState::Disk(addr) => Some(addr),
            RootState::Mem(_) | RootState::Released => None,
        }
    }

    /// Root page still held in memory, if any.
    pub fn root_page(&self) -> Option<&Page> {
        match &self.root {
            RootState::Mem(page) => Some(page),
            RootState::Released | RootState::Disk(_) => None,
        }
    }

    /// Whether background eviction may consider this tree's pages.
    pub fn eviction_enabled(&self) -> bool {
        self.eviction_enabled
    }

    /// True while the root is the placeholder of a never-populated tree.
    pub fn is_initially_empty(&self) -> bool {
        matches!(&self.root, RootState::Mem(page) if page.is_initial_empty())
    }

    /// Discards the root and returns the tree to the initial empty state.
    ///
    /// Images the old root referenced stay in the store, unreferenced.
    pub fn truncate(&mut self) {
        debug!(layout = %self.options.layout, "tree truncated");
        self.root = RootState::Mem(Page::initial_empty(self.options.layout.leaf_page_type()));
        self.eviction_enabled = true;
    }

    pub(crate) fn reconciler(&self) -> Arc<dyn Reconciler> {
        Arc::clone(&self.reconciler)
    }

    pub(crate) fn release_empty_placeholder(&mut self) -> Result<()> {
        if !self.is_initially_empty() {
            return Err(ArborError::NotEmpty);
        }
        self.root = RootState::Released;
        Ok(())
    }

    pub(crate) fn disable_background_eviction(&mut self) {
        self.eviction_enabled = false;
    }

    pub(crate) fn enable_background_eviction(&mut self) {
        self.eviction_enabled = true;
    }

    pub(crate) fn next_read_gen(&mut self) -> u64 {
        self.read_gen += 1;
        self.read_gen
    }

    pub(crate) fn install_root(&mut self, page: Page) -> Result<()> {
        if !matches!(self.root, RootState::Released) {
            return Err(ArborError::Invalid("root can only be installed after release"));
        }
        self.root = RootState::Mem(page);
        Ok(())
    }

    /// Reconciles the in-memory root and evicts it; on failure the root
    /// stays resident, still referencing its children.
    pub(crate) fn reconcile_root(&mut self) -> Result<PageAddr> {
        let reconciler = Arc::clone(&self.reconciler);
        let RootState::Mem(page) = &mut self.root else {
            return Err(ArborError::Invalid("no in-memory root to reconcile"));
        };
        if page.is_initial_empty() {
            return Err(ArborError::Invalid("placeholder root is never reconciled"));
        }
        let addr = reconciler.reconcile_and_evict(page, ReconcileFlags::EVICT_LOCKED)?;
        self.root = RootState::Disk(addr);
        Ok(addr)
    }

    fn durable_root(&self) -> Result<Option<PageAddr>> {
        match &self.root {
            RootState::Disk(addr) => Ok(Some(*addr)),
            RootState::Mem(page) if page.is_initial_empty() => Ok(None),
            RootState::Mem(_) => Err(ArborError::Invalid("root page has no durable image")),
            RootState::Released => Err(ArborError::NotFound),
        }
    }

    fn read_view(&self, addr: PageAddr) -> Result<ImageView> {
        ImageView::parse(self.store.read_image(addr)?)
    }

    /// Children of the durable root; empty for a never-populated tree.
    pub fn root_entries(&self) -> Result<RootEntries> {
        let Some(root) = self.durable_root()? else {
            return Ok(if self.options.layout.is_column() {
                RootEntries::Column(Vec::new())
            } else {
                RootEntries::Row(Vec::new())
            });
        };
        let view = self.read_view(root)?;
        match view.page_type() {
            PageType::ColInt => Ok(RootEntries::Column(view.column_children()?)),
            PageType::RowInt => Ok(RootEntries::Row(view.row_children()?)),
            _ => Err(ArborError::Corruption("root image is not an internal page")),
        }
    }

    /// Visits every row in key order.
    pub fn for_each_row<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        if self.options.layout.is_column() {
            return Err(ArborError::Invalid("row scan on a column-store tree"));
        }
        match self.durable_root()? {
            Some(root) => self.visit_rows(root, None, &mut visit),
            None => Ok(()),
        }
    }

    fn visit_rows<F>(&self, addr: PageAddr, lower: Option<&[u8]>, visit: &mut F) -> Result<()>
    where
        F: FnMut(&[u8], &[u8]) -> Result<()>,
    {
        let view = self.read_view(addr)?;
        match view.page_type() {
            PageType::RowInt => {
                for child in view.row_children()? {
                    let addr = child.addr.ok_or(ArborError::Corruption("row child without address"))?;
                    self.visit_rows(addr, Some(&child.key), visit)?;
                }
                Ok(())
            }
            PageType::RowLeaf => {
                let rows = view.rows()?;
                if let (Some(lower), Some((first, _))) = (lower, rows.first()) {
                    if *first < lower {
                        return Err(ArborError::Corruption("leaf key precedes its parent key"));
                    }
                }
                for (key, value) in rows {
                    visit(key, value)?;
                }
                Ok(())
            }
            _ => Err(ArborError::Corruption("unexpected page type in row-store tree")),
        }
    }

    /// Visits every record in record-number order.
    pub fn for_each_record<F>(&self, mut visit: F) -> Result<()>
    where
        F: FnMut(RecordNo, &[u8]) -> Result<()>,
    {
        if !self.options.layout.is_column() {
            return Err(ArborError::Invalid("record scan on a row-store tree"));
        }
        match self.durable_root()? {
            Some(root) => self.visit_records(root, None, &mut visit),
            None => Ok(()),
        }
    }

    fn visit_records<F>(&self, addr: PageAddr, expect: Option<RecordNo>, visit: &mut F) -> Result<()>
    where
        F: FnMut(RecordNo, &[u8]) -> Result<()>,
    {
        let view = self.read_view(addr)?;
        if let Some(expect) = expect {
            if view.recno() != expect {
                return Err(ArborError::Corruption("child record number mismatch"));
            }
        }
        match view.page_type() {
            PageType::ColInt => {
                for child in view.column_children()? {
                    let addr = child
                        .addr
                        .ok_or(ArborError::Corruption("column child without address"))?;
                    self.visit_records(addr, Some(child.recno), visit)?;
                }
                Ok(())
            }
            PageType::ColFix | PageType::ColRle | PageType::ColVar => {
                let mut recno = view.recno();
                for run in view.column_runs()? {
                    for _ in 0..run.repeat {
                        visit(recno, run.value)?;
                        recno = recno.advance(1);
                    }
                }
                Ok(())
            }
            _ => Err(ArborError::Corruption("unexpected page type in column-store tree")),
        }
    }

    /// Looks up the value stored under `key`.
    pub fn get_row(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        if self.options.layout.is_column() {
            return Err(ArborError::Invalid("key lookup on a column-store tree"));
        }
        let Some(mut current) = self.durable_root()? else {
            return Ok(None);
        };
        loop {
            let view = self.read_view(current)?;
            match view.page_type() {
                PageType::RowInt => {
                    let children = view.row_children()?;
                    let idx = children.partition_point(|child| &*child.key <= key);
                    let Some(child) = idx.checked_sub(1).and_then(|i| children.get(i)) else {
                        return Ok(None);
                    };
                    current = child.addr.ok_or(ArborError::Corruption("row child without address"))?;
                }
                PageType::RowLeaf => {
                    let rows = view.rows()?;
                    return Ok(rows
                        .binary_search_by(|(k, _)| (*k).cmp(key))
                        .ok()
                        .map(|idx| rows[idx].1.to_vec()));
                }
                _ => return Err(ArborError::Corruption("unexpected page type in row-store tree")),
            }
        }
    }

    /// Looks up the value of record `recno`.
    pub fn get_record(&self, recno: RecordNo) -> Result<Option<Vec<u8>>> {
        if !self.options.layout.is_column() {
            return Err(ArborError::Invalid("record lookup on a row-store tree"));
        }
        let Some(mut current) = self.durable_root()? else {
            return Ok(None);
        };
        loop {
            let view = self.read_view(current)?;
            match view.page_type() {
                PageType::ColInt => {
                    let children = view.column_children()?;
                    let idx = children.partition_point(|child| child.recno <= recno);
                    let Some(child) = idx.checked_sub(1).and_then(|i| children.get(i)) else {
                        return Ok(None);
                    };
                    current = child
                        .addr
                        .ok_or(ArborError::Corruption("column child without address"))?;
                }
                PageType::ColFix | PageType::ColRle | PageType::ColVar => {
                    if recno < view.recno() {
                        return Ok(None);
                    }
                    let mut remaining = recno.0 - view.recno().0;
                    for run in view.column_runs()? {
                        if remaining < run.repeat {
                            return Ok(Some(run.value.to_vec()));
                        }
                        remaining -= run.repeat;
                    }
                    return Ok(None);
                }
                _ => {
                    return Err(ArborError::Corruption(
                        "unexpected page type in column-store tree",
                    ))
                }
            }
        }
    }

    /// Content of the in-memory root, for inspection after a failed load.
    pub fn resident_root_entries(&self) -> Option<usize> {
        self.root_page()
            .and_then(Page::content)
            .map(PageContent::entries)
    }
}
