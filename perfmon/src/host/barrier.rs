//! Stop-the-world barrier for dispatch threads
//!
//! Workers call [`WorkerBarrier::check_in`] between dispatch iterations. It is
//! a single relaxed-cost load unless the control thread has asked for the
//! barrier, in which case the worker parks until the [`BarrierGuard`] is
//! dropped. While the guard is alive no registered worker is inside a
//! dispatch, so the control thread may read and clear their stage counters.
//!
//! ```text
//!  control                       worker 1..N
//!  ───────                       ───────────
//!  sync() ── requested=1 ──▶     check_in() ─▶ park (parked += 1)
//!         ◀── parked == registered
//!  ... read / clear stages ...
//!  drop(guard) ── requested=0 ─▶ unpark (parked -= 1)
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::{debug, warn};

/// Waiting longer than this for workers to park gets a warning
const SLOW_SYNC: Duration = Duration::from_millis(100);

#[derive(Debug, Default)]
pub struct WorkerBarrier {
    requested: AtomicBool,
    registered: AtomicUsize,
    parked: AtomicUsize,
}

/// Holds every registered worker parked; releases them on drop
#[derive(Debug)]
#[must_use = "workers are released as soon as the guard is dropped"]
pub struct BarrierGuard<'a> {
    barrier: &'a WorkerBarrier,
    since: Instant,
}

impl WorkerBarrier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the calling worker. Must happen before its first dispatch.
    pub fn join(&self) {
        self.registered.fetch_add(1, Ordering::AcqRel);
    }

    /// Unregister the calling worker on its way out
    pub fn leave(&self) {
        self.registered.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn registered(&self) -> usize {
        self.registered.load(Ordering::Acquire)
    }

    /// Worker side: park here if the control thread wants the barrier
    #[inline]
    pub fn check_in(&self) {
        if self.requested.load(Ordering::Acquire) {
            self.park();
        }
    }

    #[cold]
    fn park(&self) {
        self.parked.fetch_add(1, Ordering::AcqRel);
        while self.requested.load(Ordering::Acquire) {
            std::hint::spin_loop();
            std::thread::yield_now();
        }
        self.parked.fetch_sub(1, Ordering::AcqRel);
    }

    /// Control side: halt every registered worker
    ///
    /// Blocks until all of them are parked. A worker that never checks in
    /// stalls this call; it is logged once it gets slow.
    pub fn sync(&self) -> BarrierGuard<'_> {
        // Workers released by the previous guard must be out first
        while self.parked.load(Ordering::Acquire) != 0 {
            std::thread::yield_now();
        }

        let since = Instant::now();
        self.requested.store(true, Ordering::Release);

        let mut warned = false;
        while self.parked.load(Ordering::Acquire) < self.registered.load(Ordering::Acquire) {
            if !warned && since.elapsed() > SLOW_SYNC {
                warn!(
                    "barrier: {}/{} workers parked after {:?}",
                    self.parked.load(Ordering::Acquire),
                    self.registered(),
                    since.elapsed()
                );
                warned = true;
            }
            std::thread::yield_now();
        }

        BarrierGuard { barrier: self, since }
    }
}

impl Drop for BarrierGuard<'_> {
    fn drop(&mut self) {
        self.barrier.requested.store(false, Ordering::Release);
        debug!("barrier held {:?}", self.since.elapsed());
    }
}
