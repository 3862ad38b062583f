//! # Counter Sessions
//!
//! A session is one OS-level counting instance of an [`EventDescriptor`],
//! bound to the thread that opened it. Backends implement
//! [`SessionBackend`]; the [`ThreadSessions`] manager opens at most
//! [`MAX_ACTIVE`] of them per thread per round.
//!
//! ## Backends
//!
//! - [`perf`]: Linux `perf_event_open(2)` with `rdpmc` fast reads
//! - [`simulated`]: deterministic software counters with fault injection
//!
//! ## Lifetime
//!
//! Sessions release their OS resources in `Drop`. Closing a session is
//! therefore just dropping it, on every path, including the early returns
//! of a failed enable.

pub mod manager;
pub mod perf;
pub mod simulated;

pub use manager::{ActiveSession, ThreadSessions};
pub use perf::{PerfBackend, PerfSession};
pub use simulated::{SimulatedBackend, SimulatedSession, SimulatedStats};

use crate::domain::{CpuId, EventDescriptor, SessionError, ThreadIndex};

/// Hardware counter slots used concurrently per thread
pub const MAX_ACTIVE: usize = 2;

/// How the hot path reads a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FastRead {
    /// Direct register read with this counter index
    Register(u32),
    /// No usable register index; read the session handle
    #[default]
    Syscall,
}

/// Where a session is opened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTarget {
    pub thread: ThreadIndex,
    /// CPU the thread is pinned to, if any
    pub cpu: Option<CpuId>,
}

/// An open, enabled counter
pub trait CounterSession: Send {
    fn event(&self) -> &EventDescriptor;

    /// Resolve the fast-read index. Only meaningful once every session of
    /// the round has been opened and enabled.
    fn resolve_fast_read(&mut self) -> FastRead;

    /// Read the counter register `index` of the current CPU
    fn read_register(&self, index: u32) -> u64;

    /// Blocking read of the session handle
    ///
    /// # Errors
    /// Returns [`SessionError`] on a failed or short read
    fn read_syscall(&self) -> Result<u64, SessionError>;
}

/// Opens sessions for the calling thread
pub trait SessionBackend: Send + Sync + 'static {
    type Session: CounterSession;

    fn name(&self) -> &'static str;

    /// Open, reset and enable a session for `event` on the calling thread
    ///
    /// # Errors
    /// Returns [`SessionError`] when the session or its control page cannot
    /// be set up. Nothing stays open on error.
    fn open(&self, event: &EventDescriptor, target: SessionTarget)
        -> Result<Self::Session, SessionError>;
}
