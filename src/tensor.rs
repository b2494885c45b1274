//! Tensor Accounting Module
//!
//! Every numeric buffer created on the inference path is wrapped in a
//! [`Tracked`] handle registered with a [`TensorLedger`]. Dropping the handle
//! releases it, so each buffer is released exactly once on every exit path,
//! and the ledger can report how many are alive at any moment.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::metrics;

/// Tensor allocation counters
#[derive(Debug, Default)]
struct LedgerCounters {
    live: AtomicUsize,
    peak: AtomicUsize,
    allocated_total: AtomicU64,
}

/// Shared allocation ledger; clones observe the same counters
#[derive(Debug, Clone, Default)]
pub struct TensorLedger {
    counters: Arc<LedgerCounters>,
}

impl TensorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buffer and hand back its RAII handle
    pub fn track<T>(&self, value: T) -> Tracked<T> {
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak.fetch_max(live, Ordering::SeqCst);
        self.counters.allocated_total.fetch_add(1, Ordering::Relaxed);
        metrics::LIVE_TENSORS.inc();

        Tracked {
            value,
            counters: self.counters.clone(),
        }
    }

    /// Number of tracked buffers currently alive
    pub fn live(&self) -> usize {
        self.counters.live.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously alive buffers since creation or the last reset
    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn allocated_total(&self) -> u64 {
        self.counters.allocated_total.load(Ordering::Relaxed)
    }

    /// Restart peak tracking from the current live count
    pub fn reset_peak(&self) {
        let live = self.live();
        self.counters.peak.store(live, Ordering::SeqCst);
    }

    pub fn stats(&self) -> LedgerStats {
        LedgerStats {
            live: self.live(),
            peak: self.peak(),
            allocated_total: self.allocated_total(),
        }
    }
}

/// Snapshot of ledger counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerStats {
    pub live: usize,
    pub peak: usize,
    pub allocated_total: u64,
}

/// RAII handle that releases its ledger slot on drop
#[derive(Debug)]
pub struct Tracked<T> {
    value: T,
    counters: Arc<LedgerCounters>,
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for Tracked<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}

impl<T> Drop for Tracked<T> {
    fn drop(&mut self) {
        self.counters.live.fetch_sub(1, Ordering::SeqCst);
        metrics::LIVE_TENSORS.dec();
    }
}
