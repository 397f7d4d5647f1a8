#![forbid(unsafe_code)]

//! Page tree with a bulk-load fast path for populating empty trees.

/// Fallible record allocation and leak accounting.
pub mod alloc;
/// Durable page image codec.
pub mod image;
/// In-memory pages and the records they hold.
pub mod page;

mod bulk;
mod reconcile;
mod stats;
mod tree;

pub use alloc::{AllocLedger, Allocator, FailingAllocator, HeapAllocator, KeyRecord, Update};
pub use bulk::{
    BulkLoad, BulkOptions, BulkSummary, ChildRefArray, ColumnStrategy, LayoutStrategy,
    RowStrategy, CHILD_REF_CHUNK, DEFAULT_RECORDS_PER_PAGE,
};
pub use reconcile::{ImageReconciler, ReconcileFlags, Reconciler};
pub use stats::{TreeStats, TreeStatsSnapshot};
pub use tree::{Layout, RootEntries, Tree, TreeOptions};

#[cfg(test)]
mod tests;
