//! Fallible allocation of the owned records a skeleton page holds.
//!
//! Every buffer handed out carries a handle to the [`AllocLedger`] that
//! produced it and reports its own release on drop, so a balanced ledger
//! proves that nothing allocated during a load leaked.

use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::types::{ArborError, Result};

/// Running totals for record allocations.
#[derive(Default, Debug)]
pub struct AllocLedger {
    allocations: AtomicU64,
    releases: AtomicU64,
    live_bytes: AtomicU64,
    failures: AtomicU64,
}

impl AllocLedger {
    /// Number of buffers handed out.
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::Relaxed)
    }

    /// Number of buffers released.
    pub fn releases(&self) -> u64 {
        self.releases.load(Ordering::Relaxed)
    }

    /// Buffers currently alive.
    pub fn live(&self) -> u64 {
        self.allocations().saturating_sub(self.releases())
    }

    /// Bytes held by live buffers.
    pub fn live_bytes(&self) -> u64 {
        self.live_bytes.load(Ordering::Relaxed)
    }

    /// Allocation attempts that failed.
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// True when every allocation has been released.
    pub fn is_balanced(&self) -> bool {
        self.live() == 0 && self.live_bytes() == 0
    }

    fn record_alloc(&self, len: usize) {
        self.allocations.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_add(len as u64, Ordering::Relaxed);
    }

    fn record_release(&self, len: usize) {
        self.releases.fetch_add(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(len as u64, Ordering::Relaxed);
    }

    fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }
}

/// Owned byte buffer that reports its release to the ledger it came from.
pub struct TrackedBytes {
    bytes: Box<[u8]>,
    ledger: Arc<AllocLedger>,
}

impl TrackedBytes {
    fn copy_from(ledger: &Arc<AllocLedger>, src: &[u8], what: &'static str) -> Result<Self> {
        let mut buf = Vec::new();
        if buf.try_reserve_exact(src.len()).is_err() {
            ledger.record_failure();
            return Err(ArborError::OutOfMemory(what));
        }
        buf.extend_from_slice(src);
        ledger.record_alloc(buf.len());
        Ok(Self {
            bytes: buf.into_boxed_slice(),
            ledger: Arc::clone(ledger),
        })
    }
}

impl Deref for TrackedBytes {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.bytes
    }
}

impl Drop for TrackedBytes {
    fn drop(&mut self) {
        self.ledger.record_release(self.bytes.len());
    }
}

impl fmt::Debug for TrackedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedBytes")
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Owned copy of an inserted value.
///
/// A run-length column page folds identical consecutive values into a
/// single update whose `repeat` counts the records it covers.
#[derive(Debug)]
pub struct Update {
    value: TrackedBytes,
    repeat: u64,
}

impl Update {
    /// The stored value bytes.
    pub fn value(&self) -> &[u8] {
        &self.value
    }

    /// How many consecutive records this update covers (at least 1).
    pub fn repeat(&self) -> u64 {
        self.repeat
    }

    pub(crate) fn extend_run(&mut self) {
        self.repeat += 1;
    }
}

/// Owned copy of an inserted row-store key.
#[derive(Debug)]
pub struct KeyRecord {
    key: TrackedBytes,
}

impl KeyRecord {
    /// The stored key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

/// Source of the owned records a bulk load copies caller buffers into.
pub trait Allocator: Send + Sync {
    /// Copies `value` into a new single-record update.
    fn alloc_update(&self, value: &[u8]) -> Result<Update>;
    /// Copies `key` into a new insertable key record.
    fn alloc_key_record(&self, key: &[u8]) -> Result<KeyRecord>;
    /// Ledger tracking everything this allocator handed out.
    fn ledger(&self) -> &Arc<AllocLedger>;
}

/// Heap allocator backed by fallible `Vec` reservations.
#[derive(Default)]
pub struct HeapAllocator {
    ledger: Arc<AllocLedger>,
}

impl HeapAllocator {
    /// Creates an allocator with a fresh ledger.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Allocator for HeapAllocator {
    fn alloc_update(&self, value: &[u8]) -> Result<Update> {
        Ok(Update {
            value: TrackedBytes::copy_from(&self.ledger, value, "update")?,
            repeat: 1,
        })
    }

    fn alloc_key_record(&self, key: &[u8]) -> Result<KeyRecord> {
        Ok(KeyRecord {
            key: TrackedBytes::copy_from(&self.ledger, key, "key record")?,
        })
    }

    fn ledger(&self) -> &Arc<AllocLedger> {
        &self.ledger
    }
}

/// Fault-injecting allocator that fails exactly the Nth allocation call.
///
/// Calls are counted across both update and key allocations, starting at 1.
pub struct FailingAllocator {
    inner: HeapAllocator,
    fail_on_call: u64,
    calls: AtomicU64,
}

impl FailingAllocator {
    /// Fails the `call`th allocation and lets every other one through.
    pub fn fail_on_call(call: u64) -> Self {
        Self {
            inner: HeapAllocator::new(),
            fail_on_call: call,
            calls: AtomicU64::new(0),
        }
    }

    /// Allocation calls observed so far, including the failed one.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }

    fn check(&self, what: &'static str) -> Result<()> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if call == self.fail_on_call {
            self.inner.ledger.record_failure();
            debug!(call, what, "injected allocation failure");
            return Err(ArborError::OutOfMemory(what));
        }
        Ok(())
    }
}

impl Allocator for FailingAllocator {
    fn alloc_update(&self, value: &[u8]) -> Result<Update> {
        self.check("update")?;
        self.inner.alloc_update(value)
    }

    fn alloc_key_record(&self, key: &[u8]) -> Result<KeyRecord> {
        self.check("key record")?;
        self.inner.alloc_key_record(key)
    }

    fn ledger(&self) -> &Arc<AllocLedger> {
        self.inner.ledger()
    }
}
