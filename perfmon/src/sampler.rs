//! # Hot-Path Sampler
//!
//! The counter hook a dispatch loop calls once per iteration (typically
//! once before and once after each stage). It reads every active slot,
//! using `rdpmc` when a register index was resolved and `read(2)` otherwise,
//! and leaves the raw values in thread-local scratch.
//!
//! A failed read is reported to the caller, which must drop the hook: the
//! sampler never retries and never reinstalls itself. The next enable does.

use crate::domain::SessionError;
use crate::session::{CounterSession, FastRead, ThreadSessions, MAX_ACTIVE};

/// Raw counter values of the last sample, one per slot
pub type CounterScratch = [u64; MAX_ACTIVE];

/// The installed per-iteration counter hook
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HotPathSampler {
    active: usize,
}

impl HotPathSampler {
    /// Hook for `active` slots (at most [`MAX_ACTIVE`])
    #[must_use]
    pub fn new(active: usize) -> Self {
        Self { active: active.min(MAX_ACTIVE) }
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.active
    }

    /// Read every active slot into `scratch`. Unused slots read as 0.
    ///
    /// # Errors
    /// Returns the first syscall-read failure; `scratch` is then partially
    /// written and must not be accumulated.
    #[inline]
    pub fn sample<S: CounterSession>(
        &self,
        sessions: &ThreadSessions<S>,
        scratch: &mut CounterScratch,
    ) -> Result<(), SessionError> {
        *scratch = [0; MAX_ACTIVE];

        for (value, slot) in scratch.iter_mut().zip(sessions.slots()).take(self.active) {
            *value = match slot.fast_read {
                FastRead::Register(index) => slot.session.read_register(index),
                FastRead::Syscall => slot.session.read_syscall()?,
            };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EventDescriptor, ThreadIndex};
    use crate::session::{SessionTarget, SimulatedBackend};

    fn target() -> SessionTarget {
        SessionTarget { thread: ThreadIndex(1), cpu: None }
    }

    #[test]
    fn test_sample_reads_each_slot() {
        let backend = SimulatedBackend::new();
        let mut sessions = ThreadSessions::new();
        let events = [EventDescriptor::hardware(1, "instructions"), EventDescriptor::software(3, "context-switches")];
        let active = sessions.enable(&backend, &events, target()).unwrap();

        let sampler = HotPathSampler::new(active);
        let mut scratch = [0; MAX_ACTIVE];
        sampler.sample(&sessions, &mut scratch).unwrap();
        assert_eq!(scratch, [2, 4]);
        sampler.sample(&sessions, &mut scratch).unwrap();
        assert_eq!(scratch, [4, 8]);
    }

    #[test]
    fn test_single_slot_leaves_second_zero() {
        let backend = SimulatedBackend::new();
        let mut sessions = ThreadSessions::new();
        let active = sessions
            .enable(&backend, &[EventDescriptor::software(2, "page-faults")], target())
            .unwrap();

        let sampler = HotPathSampler::new(active);
        let mut scratch = [99; MAX_ACTIVE];
        sampler.sample(&sessions, &mut scratch).unwrap();
        assert_eq!(scratch, [3, 0]);
    }

    #[test]
    fn test_read_failure_is_reported() {
        let backend = SimulatedBackend::new();
        backend.fail_reads_after(ThreadIndex(1), 0);
        let mut sessions = ThreadSessions::new();
        let active = sessions
            .enable(&backend, &[EventDescriptor::software(3, "context-switches")], target())
            .unwrap();

        let mut scratch = [0; MAX_ACTIVE];
        let err = HotPathSampler::new(active).sample(&sessions, &mut scratch).unwrap_err();
        assert!(matches!(err, SessionError::ReadFailed { .. }));
    }

    #[test]
    fn test_active_is_clamped() {
        assert_eq!(HotPathSampler::new(5).active(), MAX_ACTIVE);
    }
}
