//! Event Session Manager
//!
//! Per-thread owner of the sessions for the current round. Enable is
//! all-or-nothing: if slot 1 fails, slot 0 is closed before returning, so a
//! thread never samples half a pair.

use log::debug;

use super::{CounterSession, FastRead, SessionBackend, SessionTarget, MAX_ACTIVE};
use crate::domain::{EventDescriptor, SessionError};

/// A session together with its resolved read path
#[derive(Debug)]
pub struct ActiveSession<S> {
    pub session: S,
    pub fast_read: FastRead,
}

/// Sessions of one thread for one round
#[derive(Debug)]
pub struct ThreadSessions<S> {
    slots: Vec<ActiveSession<S>>,
}

impl<S> Default for ThreadSessions<S> {
    fn default() -> Self {
        Self { slots: Vec::new() }
    }
}

impl<S: CounterSession> ThreadSessions<S> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open sessions for up to [`MAX_ACTIVE`] of `events`
    ///
    /// Any sessions from a previous round are closed first. Fast-read
    /// indices are resolved only after every session is open and enabled:
    /// the PMU may reassign counters while the pair is being scheduled.
    ///
    /// # Errors
    /// Returns the first open/map failure. Every session opened by this call
    /// has been closed by then and the thread has no active slots.
    pub fn enable<B>(
        &mut self,
        backend: &B,
        events: &[EventDescriptor],
        target: SessionTarget,
    ) -> Result<usize, SessionError>
    where
        B: SessionBackend<Session = S>,
    {
        self.disable();

        let mut opened = Vec::with_capacity(MAX_ACTIVE);
        for event in events.iter().take(MAX_ACTIVE) {
            opened.push(backend.open(event, target)?);
        }

        self.slots = opened
            .into_iter()
            .map(|mut session| {
                let fast_read = session.resolve_fast_read();
                debug!("{}: {} read via {fast_read:?}", target.thread, session.event().name);
                ActiveSession { session, fast_read }
            })
            .collect();

        Ok(self.slots.len())
    }

    /// Close every session. Calling it again is a no-op.
    pub fn disable(&mut self) {
        self.slots.clear();
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn slots(&self) -> &[ActiveSession<S>] {
        &self.slots
    }
}
