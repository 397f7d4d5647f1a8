use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// Snapshot of tree statistics at a point in time.
#[derive(Default, Debug, Clone, Copy, Eq, PartialEq)]
pub struct TreeStatsSnapshot {
    /// Records accepted by bulk-load inserts
    pub items_inserted: u64,
    /// Leaf pages written by reconciliation
    pub leaf_pages_reconciled: u64,
    /// Internal pages written by reconciliation
    pub internal_pages_reconciled: u64,
    /// Bytes of page images written
    pub image_bytes_written: u64,
    /// Record allocations that failed
    pub alloc_failures: u64,
    /// Bulk loads that finished successfully
    pub loads_completed: u64,
    /// Bulk loads dropped or failed before finishing
    pub loads_abandoned: u64,
}

/// Thread-safe statistics tracking for tree operations.
#[derive(Default)]
pub struct TreeStats {
    items_inserted: AtomicU64,
    leaf_pages_reconciled: AtomicU64,
    internal_pages_reconciled: AtomicU64,
    image_bytes_written: AtomicU64,
    alloc_failures: AtomicU64,
    loads_completed: AtomicU64,
    loads_abandoned: AtomicU64,
}

impl TreeStats {
    /// Returns the number of records accepted by bulk-load inserts.
    pub fn items_inserted(&self) -> u64 {
        self.items_inserted.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of leaf pages written by reconciliation.
    pub fn leaf_pages_reconciled(&self) -> u64 {
        self.leaf_pages_reconciled.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of internal pages written by reconciliation.
    pub fn internal_pages_reconciled(&self) -> u64 {
        self.internal_pages_reconciled.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of page image bytes written.
    pub fn image_bytes_written(&self) -> u64 {
        self.image_bytes_written.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of failed record allocations.
    pub fn alloc_failures(&self) -> u64 {
        self.alloc_failures.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of bulk loads that finished.
    pub fn loads_completed(&self) -> u64 {
        self.loads_completed.load(AtomicOrdering::Relaxed)
    }

    /// Returns the number of bulk loads abandoned before finishing.
    pub fn loads_abandoned(&self) -> u64 {
        self.loads_abandoned.load(AtomicOrdering::Relaxed)
    }

    pub(crate) fn inc_items_inserted(&self) {
        self.items_inserted.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn record_page_reconciled(&self, leaf: bool, image_bytes: usize) {
        if leaf {
            self.leaf_pages_reconciled
                .fetch_add(1, AtomicOrdering::Relaxed);
        } else {
            self.internal_pages_reconciled
                .fetch_add(1, AtomicOrdering::Relaxed);
        }
        self.image_bytes_written
            .fetch_add(image_bytes as u64, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_alloc_failures(&self) {
        self.alloc_failures.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_loads_completed(&self) {
        self.loads_completed.fetch_add(1, AtomicOrdering::Relaxed);
    }

    pub(crate) fn inc_loads_abandoned(&self) {
        self.loads_abandoned.fetch_add(1, AtomicOrdering::Relaxed);
    }

    /// Creates a snapshot of all current statistics.
    pub fn snapshot(&self) -> TreeStatsSnapshot {
        TreeStatsSnapshot {
            items_inserted: self.items_inserted(),
            leaf_pages_reconciled: self.leaf_pages_reconciled(),
            internal_pages_reconciled: self.internal_pages_reconciled(),
            image_bytes_written: self.image_bytes_written(),
            alloc_failures: self.alloc_failures(),
            loads_completed: self.loads_completed(),
            loads_abandoned: self.loads_abandoned(),
        }
    }

    /// Emits current statistics to the tracing infrastructure.
    pub fn emit_tracing(&self) {
        let snapshot = self.snapshot();
        tracing::info!(
            target: "arbor_btree::stats",
            items_inserted = snapshot.items_inserted,
            leaf_pages_reconciled = snapshot.leaf_pages_reconciled,
            internal_pages_reconciled = snapshot.internal_pages_reconciled,
            image_bytes_written = snapshot.image_bytes_written,
            alloc_failures = snapshot.alloc_failures,
            loads_completed = snapshot.loads_completed,
            loads_abandoned = snapshot.loads_abandoned,
            "tree stats snapshot"
        );
    }
}
