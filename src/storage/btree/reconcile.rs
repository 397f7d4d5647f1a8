use std::sync::Arc;

use tracing::trace;

use super::image::encode_page;
use super::page::Page;
use super::stats::TreeStats;
use crate::primitives::pager::PageStore;
use crate::types::{ArborError, PageAddr, Result};

/// Instructions passed along with a page handed to reconciliation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ReconcileFlags {
    /// Discard the in-memory records once the image is durable.
    pub evict: bool,
    /// The caller already holds exclusive access to the page.
    pub locked: bool,
}

impl ReconcileFlags {
    /// Build the image, then evict the page; exclusive access is already held.
    pub const EVICT_LOCKED: ReconcileFlags = ReconcileFlags {
        evict: true,
        locked: true,
    };
}

/// Turns an in-memory page into a durable image.
///
/// Reconciliation is the authority on the on-disk layout: callers only see
/// the address the image landed at. On success with `evict` set, the page's
/// body has been replaced by that address and its records released.
pub trait Reconciler: Send + Sync {
    /// Writes `page` to durable storage and returns where it went.
    fn reconcile_and_evict(&self, page: &mut Page, flags: ReconcileFlags) -> Result<PageAddr>;
}

/// Reconciler that serializes pages with the image codec into a [`PageStore`].
pub struct ImageReconciler {
    store: Arc<dyn PageStore>,
    fixed_width: u8,
    stats: Arc<TreeStats>,
}

impl ImageReconciler {
    /// Creates a reconciler writing into `store`.
    pub fn new(store: Arc<dyn PageStore>, fixed_width: u8, stats: Arc<TreeStats>) -> Self {
        Self {
            store,
            fixed_width,
            stats,
        }
    }
}

impl Reconciler for ImageReconciler {
    fn reconcile_and_evict(&self, page: &mut Page, flags: ReconcileFlags) -> Result<PageAddr> {
        if !flags.locked {
            return Err(ArborError::Invalid(
                "reconciliation requires exclusive access to the page",
            ));
        }
        let content = page
            .content()
            .ok_or(ArborError::Invalid("page has already been reconciled"))?;
        let mut image = Vec::new();
        let header = encode_page(page.page_type(), content, self.fixed_width, &mut image)?;
        let addr = self.store.write_image(&image)?;
        self.stats
            .record_page_reconciled(page.page_type().is_leaf(), image.len());
        trace!(
            page_type = page.page_type().name(),
            entries = header.entries,
            recno = header.recno.0,
            offset = addr.offset,
            size = addr.size,
            bulk = page.is_bulk_load(),
            parent_slot = page.parent_slot().map(|slot| slot.0),
            read_gen = page.read_gen(),
            "page reconciled"
        );
        if flags.evict {
            page.mark_reconciled(addr);
        } else {
            page.mark_clean();
        }
        Ok(addr)
    }
}
