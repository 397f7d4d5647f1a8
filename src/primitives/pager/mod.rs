#![forbid(unsafe_code)]

mod store;

pub use store::{FileStore, MemStore, PageStore, StoreStats, STORE_MAGIC};
