#![forbid(unsafe_code)]

//! Command-line support: loading CSV files into stores and scanning them back.

/// CSV bulk loading and the store metadata sidecar.
pub mod load;
/// Record scanning and display.
pub mod scan;
