//! # Worker Handoff Protocol
//!
//! Single-producer/single-consumer command slot between the control thread
//! and one dispatch thread.
//!
//! ```text
//!  control thread                         worker thread
//!  ──────────────                         ─────────────
//!  post(Start) ──▶ [ slot: seq=7 ] ──▶ take()      (between iterations)
//!                                      enable sessions
//!  is_acknowledged(7)? ◀── completed=7 ◀─ complete(7)
//! ```
//!
//! The slot is a one-element crossbeam channel, so neither side ever takes a
//! lock. Acknowledgement is a monotonically increasing sequence number: the
//! worker publishes the sequence of the last command it finished, and the
//! control thread polls for it with a bounded wait. Posting a new command
//! drops any stale command the worker never picked up.

use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::domain::EventDescriptor;

/// What the control thread asks a worker to do
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffCommand {
    /// Open sessions for these events (one round, at most two)
    Start(Vec<EventDescriptor>),
    /// Uninstall the sampler and close every session
    Stop,
}

impl HandoffCommand {
    pub fn label(&self) -> &'static str {
        match self {
            HandoffCommand::Start(_) => "start",
            HandoffCommand::Stop => "stop",
        }
    }
}

#[derive(Debug)]
struct Posted {
    seq: u64,
    command: HandoffCommand,
}

/// Receipt for a posted command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandoffTicket {
    pub seq: u64,
    /// A command the worker had not picked up yet was discarded
    pub superseded: bool,
}

/// Per-thread command slot
#[derive(Debug)]
pub struct HandoffSlot {
    tx: Sender<Posted>,
    rx: Receiver<Posted>,
    posted: AtomicU64,
    completed: AtomicU64,
}

impl Default for HandoffSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl HandoffSlot {
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = bounded(1);
        Self { tx, rx, posted: AtomicU64::new(0), completed: AtomicU64::new(0) }
    }

    // ---------------------------------------------------------------------
    // Control side
    // ---------------------------------------------------------------------

    /// Post a command, replacing one still waiting in the slot
    pub fn post(&self, command: HandoffCommand) -> HandoffTicket {
        let mut superseded = false;
        while self.rx.try_recv().is_ok() {
            superseded = true;
        }

        let seq = self.posted.fetch_add(1, Ordering::AcqRel) + 1;
        // Only the control thread sends and the slot was just drained, so
        // this cannot find it full.
        let _ = self.tx.try_send(Posted { seq, command });

        HandoffTicket { seq, superseded }
    }

    /// Has the worker finished the command behind `ticket`?
    pub fn is_acknowledged(&self, ticket: HandoffTicket) -> bool {
        self.completed.load(Ordering::Acquire) >= ticket.seq
    }

    /// No command is waiting or executing
    pub fn is_idle(&self) -> bool {
        self.completed.load(Ordering::Acquire) >= self.posted.load(Ordering::Acquire)
    }

    // ---------------------------------------------------------------------
    // Worker side
    // ---------------------------------------------------------------------

    /// Take the pending command, if any. Call only between dispatch
    /// iterations.
    #[inline]
    pub fn take(&self) -> Option<(u64, HandoffCommand)> {
        self.rx.try_recv().ok().map(|posted| (posted.seq, posted.command))
    }

    /// Publish completion of the command taken with sequence `seq`
    pub fn complete(&self, seq: u64) {
        self.completed.fetch_max(seq, Ordering::AcqRel);
    }
}
