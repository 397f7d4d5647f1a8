//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities and the durable page image store.

/// Byte-level utilities and encoding/decoding.
///
/// Varints and a bounds-checked slice cursor for parsing page images.
pub mod bytes;

/// Durable page image storage.
///
/// Append-only stores that hand back a checksummed address for every image.
pub mod pager;
