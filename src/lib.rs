//! Arbor: an append-only page tree with a bulk-load fast path.
//!
//! Trees come in a row layout addressed by key and three column layouts
//! addressed by record number. An empty tree is populated with
//! [`storage::btree::BulkLoad`], which writes each full leaf through a
//! [`storage::btree::Reconciler`] into a [`primitives::pager::PageStore`]
//! and finishes by installing a single internal root.

#![warn(missing_docs)]

pub mod cli;
pub mod primitives;
pub mod storage;
pub mod types;
