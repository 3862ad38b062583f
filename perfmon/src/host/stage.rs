//! Per-stage counter totals
//!
//! Written only by the thread that dispatches the stage; read and cleared by
//! the control thread only while that thread is parked at the
//! [`WorkerBarrier`](super::WorkerBarrier). The atomics make the cross-thread
//! accesses well defined. They are never contended, so plain load/store with
//! relaxed ordering is enough and the barrier provides the happens-before.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::sampler::CounterScratch;
use crate::session::MAX_ACTIVE;

#[derive(Debug)]
pub struct StageCounters {
    name: String,
    totals: [AtomicU64; MAX_ACTIVE],
    dispatches: AtomicU64,
    last_clear: [AtomicU64; MAX_ACTIVE],
    last_clear_dispatches: AtomicU64,
}

/// Copy of one stage's counters taken under the barrier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterSnapshot {
    pub totals: [u64; MAX_ACTIVE],
    pub dispatches: u64,
    pub last_clear: [u64; MAX_ACTIVE],
    pub last_clear_dispatches: u64,
}

impl CounterSnapshot {
    /// Both counter totals are zero: the stage saw no sampled dispatch
    pub fn is_empty(&self) -> bool {
        self.totals.iter().all(|&t| t == 0)
    }

    /// Counter delta of slot `k` since the last clear
    pub fn delta(&self, k: usize) -> u64 {
        self.totals[k].wrapping_sub(self.last_clear[k])
    }

    /// Dispatches since the last clear
    pub fn throughput(&self) -> u64 {
        self.dispatches.wrapping_sub(self.last_clear_dispatches)
    }
}

impl StageCounters {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            totals: Default::default(),
            dispatches: AtomicU64::new(0),
            last_clear: Default::default(),
            last_clear_dispatches: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add one dispatch of `vectors` items, with counter readings taken
    /// before and after it. Owning thread only.
    #[inline]
    pub fn accumulate(&self, before: &CounterScratch, after: &CounterScratch, vectors: u64) {
        for (k, total) in self.totals.iter().enumerate() {
            let delta = after[k].wrapping_sub(before[k]);
            total.store(total.load(Ordering::Relaxed).wrapping_add(delta), Ordering::Relaxed);
        }
        let dispatches = self.dispatches.load(Ordering::Relaxed);
        self.dispatches.store(dispatches.wrapping_add(vectors), Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            totals: [self.totals[0].load(Ordering::Relaxed), self.totals[1].load(Ordering::Relaxed)],
            dispatches: self.dispatches.load(Ordering::Relaxed),
            last_clear: [
                self.last_clear[0].load(Ordering::Relaxed),
                self.last_clear[1].load(Ordering::Relaxed),
            ],
            last_clear_dispatches: self.last_clear_dispatches.load(Ordering::Relaxed),
        }
    }

    /// Copy, then zero the totals and the baselines
    ///
    /// Only call while the owning thread is parked at the barrier.
    pub(crate) fn snapshot_and_clear(&self) -> CounterSnapshot {
        let snapshot = self.snapshot();
        for (total, base) in self.totals.iter().zip(&self.last_clear) {
            total.store(0, Ordering::Relaxed);
            base.store(0, Ordering::Relaxed);
        }
        self.dispatches.store(0, Ordering::Relaxed);
        self.last_clear_dispatches.store(0, Ordering::Relaxed);
        snapshot
    }
}
