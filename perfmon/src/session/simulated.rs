//! Simulated counter backend
//!
//! Deterministic stand-in for `perf_event_open(2)` used when the host has no
//! PMU access (containers, CI) and by the tests. Each session is a counter
//! that advances by a fixed step on every read, so per-stage deltas are
//! predictable. Non-software events pretend to map a control page and read
//! through the register path, mirroring the perf backend.
//!
//! Faults can be injected per thread: open failure, control-page mapping
//! failure, and syscall-read failure after a number of reads.

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use log::debug;

use super::{CounterSession, FastRead, SessionBackend, SessionTarget};
use crate::domain::{EventDescriptor, SessionError, ThreadIndex};

/// Per-thread session accounting
#[derive(Debug, Default)]
pub struct SimulatedStats {
    opened: AtomicU64,
    closed: AtomicU64,
    reads: AtomicU64,
    failed_reads: AtomicU64,
}

impl SimulatedStats {
    pub fn opened(&self) -> u64 {
        self.opened.load(Ordering::Acquire)
    }

    pub fn closed(&self) -> u64 {
        self.closed.load(Ordering::Acquire)
    }

    /// Sessions currently open
    pub fn live(&self) -> u64 {
        self.opened().saturating_sub(self.closed())
    }

    /// Successful reads, register and syscall
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Acquire)
    }

    pub fn failed_reads(&self) -> u64 {
        self.failed_reads.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct Faults {
    open: HashSet<(ThreadIndex, String)>,
    map: HashSet<(ThreadIndex, String)>,
    reads_before_failure: HashMap<ThreadIndex, u64>,
}

#[derive(Debug, Default)]
pub struct SimulatedBackend {
    faults: Mutex<Faults>,
    stats: Mutex<HashMap<ThreadIndex, Arc<SimulatedStats>>>,
}

impl SimulatedBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opening `event` on `thread` fails
    pub fn fail_open(&self, thread: ThreadIndex, event: &str) {
        self.faults().open.insert((thread, event.to_string()));
    }

    /// Mapping the control page of `event` on `thread` fails
    pub fn fail_map(&self, thread: ThreadIndex, event: &str) {
        self.faults().map.insert((thread, event.to_string()));
    }

    /// Sessions opened on `thread` from now on fail their syscall read after
    /// `reads` successful ones
    pub fn fail_reads_after(&self, thread: ThreadIndex, reads: u64) {
        self.faults().reads_before_failure.insert(thread, reads);
    }

    /// Remove every injected fault
    pub fn clear_faults(&self) {
        *self.faults() = Faults::default();
    }

    /// Accounting for `thread`, created on first use
    pub fn stats(&self, thread: ThreadIndex) -> Arc<SimulatedStats> {
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(thread)
            .or_default()
            .clone()
    }

    fn faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SessionBackend for SimulatedBackend {
    type Session = SimulatedSession;

    fn name(&self) -> &'static str {
        "simulated"
    }

    fn open(
        &self,
        event: &EventDescriptor,
        target: SessionTarget,
    ) -> Result<SimulatedSession, SessionError> {
        let key = (target.thread, event.name.clone());
        let (open_fails, map_fails, reads_left) = {
            let faults = self.faults();
            (
                faults.open.contains(&key),
                faults.map.contains(&key),
                faults.reads_before_failure.get(&target.thread).copied(),
            )
        };

        if open_fails {
            return Err(SessionError::OpenFailed {
                event: event.name.clone(),
                perf_type: event.category.perf_type(),
                config: event.config,
                source: std::io::Error::from_raw_os_error(libc::ENOENT),
            });
        }

        let stats = self.stats(target.thread);
        stats.opened.fetch_add(1, Ordering::AcqRel);
        let mut session = SimulatedSession {
            event: event.clone(),
            stats,
            mapped: false,
            step: 1 + (event.config & 0xff),
            value: Cell::new(0),
            reads_left: reads_left.map(Cell::new),
        };

        if event.category.supports_register_read() {
            if map_fails {
                // `session` drops here and counts as closed
                return Err(SessionError::MapFailed {
                    event: event.name.clone(),
                    source: std::io::Error::from_raw_os_error(libc::ENOMEM),
                });
            }
            session.mapped = true;
        }

        debug!("{}: simulated session open for {}", target.thread, event.name);
        Ok(session)
    }
}

/// A simulated counter
#[derive(Debug)]
pub struct SimulatedSession {
    event: EventDescriptor,
    stats: Arc<SimulatedStats>,
    mapped: bool,
    step: u64,
    value: Cell<u64>,
    reads_left: Option<Cell<u64>>,
}

impl SimulatedSession {
    fn advance(&self) -> u64 {
        let value = self.value.get() + self.step;
        self.value.set(value);
        self.stats.reads.fetch_add(1, Ordering::AcqRel);
        value
    }
}

impl CounterSession for SimulatedSession {
    fn event(&self) -> &EventDescriptor {
        &self.event
    }

    #[allow(clippy::cast_possible_truncation)]
    fn resolve_fast_read(&mut self) -> FastRead {
        if self.mapped {
            FastRead::Register((self.event.config & 0x7) as u32)
        } else {
            FastRead::Syscall
        }
    }

    fn read_register(&self, _index: u32) -> u64 {
        self.advance()
    }

    fn read_syscall(&self) -> Result<u64, SessionError> {
        if let Some(left) = &self.reads_left {
            if left.get() == 0 {
                self.stats.failed_reads.fetch_add(1, Ordering::AcqRel);
                return Err(SessionError::ReadFailed {
                    event: self.event.name.clone(),
                    source: std::io::Error::from_raw_os_error(libc::EIO),
                });
            }
            left.set(left.get() - 1);
        }
        Ok(self.advance())
    }
}

impl Drop for SimulatedSession {
    fn drop(&mut self) {
        self.stats.closed.fetch_add(1, Ordering::AcqRel);
    }
}
