//! Per-thread counter runtime
//!
//! Everything one pipeline thread owns privately: its sessions, its counter
//! hook slot and the scratch the hook writes into. A `ThreadRuntime` lives on
//! its thread and is never shared; other threads reach it only through the
//! thread's [`HandoffSlot`].

use std::sync::Arc;

use log::{debug, warn};

use crate::domain::{CpuId, EventDescriptor, ThreadIndex};
use crate::handoff::{HandoffCommand, HandoffSlot};
use crate::sampler::{CounterScratch, HotPathSampler};
use crate::session::{SessionBackend, SessionTarget, ThreadSessions, MAX_ACTIVE};

pub struct ThreadRuntime<B: SessionBackend> {
    index: ThreadIndex,
    cpu: Option<CpuId>,
    backend: Arc<B>,
    sessions: ThreadSessions<B::Session>,
    hook: Option<HotPathSampler>,
    scratch: CounterScratch,
}

impl<B: SessionBackend> ThreadRuntime<B> {
    #[must_use]
    pub fn new(index: ThreadIndex, cpu: Option<CpuId>, backend: Arc<B>) -> Self {
        Self {
            index,
            cpu,
            backend,
            sessions: ThreadSessions::new(),
            hook: None,
            scratch: [0; MAX_ACTIVE],
        }
    }

    pub fn index(&self) -> ThreadIndex {
        self.index
    }

    /// Open this round's sessions and install the hook
    ///
    /// Returns the number of active slots, 0 when nothing could be opened.
    /// A failure is logged and leaves the thread idle for the round; the
    /// pipeline keeps running.
    pub fn enable(&mut self, events: &[EventDescriptor]) -> usize {
        self.hook = None;
        let target = SessionTarget { thread: self.index, cpu: self.cpu };

        match self.sessions.enable(self.backend.as_ref(), events, target) {
            Ok(0) => 0,
            Ok(active) => {
                self.hook = Some(HotPathSampler::new(active));
                debug!("{}: sampling {active} event(s) via {}", self.index, self.backend.name());
                active
            }
            Err(e) => {
                warn!("{}: {e}; not sampling this round", self.index);
                0
            }
        }
    }

    /// Uninstall the hook and close every session
    pub fn disable(&mut self) {
        self.hook = None;
        self.sessions.disable();
    }

    pub fn hook_installed(&self) -> bool {
        self.hook.is_some()
    }

    pub fn active(&self) -> usize {
        self.hook.map_or(0, |hook| hook.active())
    }

    /// Run the hook, if installed
    ///
    /// A read failure uninstalls the hook for the rest of the round.
    #[inline]
    pub fn read_counters(&mut self) -> Option<CounterScratch> {
        let hook = self.hook?;
        match hook.sample(&self.sessions, &mut self.scratch) {
            Ok(()) => Some(self.scratch),
            Err(e) => {
                warn!("{}: counter read failed, disable collection: {e}", self.index);
                self.hook = None;
                None
            }
        }
    }

    /// Execute the command waiting in `slot`, if any, and acknowledge it
    ///
    /// Returns true when a command was executed.
    pub fn service_handoff(&mut self, slot: &HandoffSlot) -> bool {
        let Some((seq, command)) = slot.take() else {
            return false;
        };
        debug!("{}: handoff #{seq} {}", self.index, command.label());

        match command {
            HandoffCommand::Start(events) => {
                self.enable(&events);
            }
            HandoffCommand::Stop => self.disable(),
        }
        slot.complete(seq);
        true
    }
}

impl<B: SessionBackend> std::fmt::Debug for ThreadRuntime<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadRuntime")
            .field("index", &self.index)
            .field("cpu", &self.cpu)
            .field("backend", &self.backend.name())
            .field("active", &self.active())
            .finish_non_exhaustive()
    }
}
