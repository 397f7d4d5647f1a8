//! Tree storage built on top of the page store primitives.

/// Page tree and bulk loading.
pub mod btree;
