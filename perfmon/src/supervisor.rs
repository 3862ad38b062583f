//! # Lifecycle/Rotation Supervisor
//!
//! The control thread's state machine. It owns the run state, the capture
//! store and, when the host hands it over, the main thread's runtime.
//!
//! ```text
//!            Start(events)                     timeout, events left
//!   ┌─────┐ ───────────────▶ ┌─────────┐ ──────────────────────────┐
//!   │ OFF │                  │ RUNNING │ ◀─────── enable next pair ─┘
//!   └─────┘ ◀─────────────── └─────────┘
//!            timeout, list exhausted
//! ```
//!
//! Every timeout stops the current pair on all participants (bounded by the
//! deadman), scrapes the stage counters into the capture store and moves
//! the cursor forward by the number of events that were active.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::{debug, info, warn};
use serde::Serialize;

use crate::aggregator::{clear_all, scrape_and_clear, CaptureStore};
use crate::config::{CaptureRetention, EngineConfig};
use crate::domain::{EngineState, EventDescriptor, ThreadSelector};
use crate::handoff::{HandoffCommand, HandoffTicket};
use crate::host::{HostPipeline, ThreadShared};
use crate::runtime::ThreadRuntime;
use crate::session::{SessionBackend, MAX_ACTIVE};

/// Requests to the control thread
#[derive(Debug)]
pub enum ControlEvent {
    /// Collect `events` on the selected threads, two at a time
    Start { events: Vec<EventDescriptor>, threads: ThreadSelector },
    /// Reply with a copy of every capture record
    Dump(Sender<CaptureStore>),
    /// A raw signal the engine does not understand; logged and ignored
    Signal(u32),
    Shutdown,
}

/// Engine state published for other threads
#[derive(Debug, Default)]
pub struct EngineStatus {
    state: AtomicU8,
    cursor: AtomicUsize,
    active: AtomicUsize,
    rounds: AtomicU64,
    runs: AtomicU64,
    completed_runs: AtomicU64,
    deadman_expiries: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    #[serde(serialize_with = "serialize_state")]
    pub state: EngineState,
    pub cursor: usize,
    pub active: usize,
    /// Rounds scraped since the engine started
    pub rounds: u64,
    /// Runs started
    pub runs: u64,
    /// Runs that went through their whole event list
    pub completed_runs: u64,
    /// Threads that missed an acknowledgement deadline
    pub deadman_expiries: u64,
}

fn serialize_state<S: serde::Serializer>(state: &EngineState, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(state)
}

impl EngineStatus {
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            state: EngineState::from_u8(self.state.load(Ordering::Acquire)),
            cursor: self.cursor.load(Ordering::Acquire),
            active: self.active.load(Ordering::Acquire),
            rounds: self.rounds.load(Ordering::Acquire),
            runs: self.runs.load(Ordering::Acquire),
            completed_runs: self.completed_runs.load(Ordering::Acquire),
            deadman_expiries: self.deadman_expiries.load(Ordering::Acquire),
        }
    }
}

pub struct Supervisor<H: HostPipeline, B: SessionBackend> {
    host: Arc<H>,
    /// The control thread's own runtime, driven directly instead of through
    /// a handoff slot
    local: Option<ThreadRuntime<B>>,
    config: EngineConfig,
    status: Arc<EngineStatus>,

    state: EngineState,
    events: Vec<EventDescriptor>,
    selector: ThreadSelector,
    cursor: usize,
    active: usize,
    round_deadline: Option<Instant>,
    captures: CaptureStore,
}

impl<H: HostPipeline, B: SessionBackend> Supervisor<H, B> {
    pub fn new(
        host: Arc<H>,
        local: Option<ThreadRuntime<B>>,
        config: EngineConfig,
        status: Arc<EngineStatus>,
    ) -> Self {
        Self {
            host,
            local,
            config,
            status,
            state: EngineState::Off,
            events: Vec::new(),
            selector: ThreadSelector::All,
            cursor: 0,
            active: 0,
            round_deadline: None,
            captures: CaptureStore::new(),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn captures(&self) -> &CaptureStore {
        &self.captures
    }

    /// Control loop: block while OFF, wait for an event or the round
    /// deadline while RUNNING. Returns on Shutdown or when every sender is
    /// gone.
    pub fn run(mut self, events: &Receiver<ControlEvent>) {
        info!("supervisor started ({} thread(s))", self.host.threads().len());

        loop {
            let received = match (self.state, self.round_deadline) {
                (EngineState::Running, Some(deadline)) => match events.recv_deadline(deadline) {
                    Ok(event) => Some(event),
                    Err(RecvTimeoutError::Timeout) => None,
                    Err(RecvTimeoutError::Disconnected) => break,
                },
                _ => match events.recv() {
                    Ok(event) => Some(event),
                    Err(_) => break,
                },
            };

            match received {
                None => self.handle_timeout(),
                Some(ControlEvent::Start { events, threads }) => self.start(events, threads),
                Some(ControlEvent::Dump(reply)) => {
                    if reply.send(self.captures.clone()).is_err() {
                        debug!("dump requester went away");
                    }
                }
                Some(ControlEvent::Signal(code)) => warn!("Unexpected event {code}"),
                Some(ControlEvent::Shutdown) => break,
            }
        }

        self.shutdown();
    }

    /// Begin a run over `events`. A run in progress is stopped first and
    /// its partial round discarded.
    pub fn start(&mut self, events: Vec<EventDescriptor>, selector: ThreadSelector) {
        if self.state == EngineState::Running {
            info!("restart requested, stopping run at cursor {}", self.cursor);
            self.stop_participants();
        }

        self.cursor = 0;
        self.active = 0;
        if events.is_empty() {
            info!("no events requested, staying off");
            self.enter_off();
            return;
        }

        if self.config.capture_retention == CaptureRetention::ResetOnStart {
            self.captures.clear();
        }
        self.events = events;
        self.selector = selector;
        self.state = EngineState::Running;
        self.status.runs.fetch_add(1, Ordering::AcqRel);

        info!(
            "run started: {} event(s), {} round(s), threads: {}",
            self.events.len(),
            self.events.len().div_ceil(MAX_ACTIVE),
            self.selector
        );

        clear_all(self.host.as_ref());
        self.enable_current();
    }

    /// End of a round: stop, scrape, rotate
    pub fn handle_timeout(&mut self) {
        if self.state != EngineState::Running {
            return;
        }

        self.stop_participants();
        scrape_and_clear(self.host.as_ref(), &self.events, self.cursor, self.active, &mut self.captures);
        self.status.rounds.fetch_add(1, Ordering::AcqRel);

        self.cursor += self.active;
        if self.cursor >= self.events.len() {
            info!("run complete: {} event(s), {} record(s)", self.events.len(), self.captures.len());
            self.cursor = 0;
            self.active = 0;
            self.status.completed_runs.fetch_add(1, Ordering::AcqRel);
            self.enter_off();
            return;
        }

        self.enable_current();
    }

    /// Stop collection everywhere and leave the loop's state OFF
    pub fn shutdown(&mut self) {
        if self.state == EngineState::Running {
            self.stop_participants();
        }
        if let Some(local) = &mut self.local {
            local.disable();
        }
        self.cursor = 0;
        self.active = 0;
        self.enter_off();
        info!("supervisor stopped");
    }

    fn enter_off(&mut self) {
        self.state = EngineState::Off;
        self.round_deadline = None;
        self.publish();
    }

    /// Enable the pair at the cursor on every participant
    fn enable_current(&mut self) {
        let end = (self.cursor + MAX_ACTIVE).min(self.events.len());
        let pair = &self.events[self.cursor..end];
        self.active = pair.len();

        let names: Vec<&str> = pair.iter().map(|e| e.name.as_str()).collect();
        debug!("round at cursor {}: {}", self.cursor, names.join(", "));

        if let Some(local) = self.local.as_mut().filter(|rt| self.selector.includes(rt.index())) {
            local.enable(pair);
        }
        for thread in self.remote_participants() {
            thread.handoff().post(HandoffCommand::Start(pair.to_vec()));
        }

        // Measured from the enable, so dumps and unknown events arriving
        // mid-round do not stretch it
        self.round_deadline = Some(Instant::now() + self.config.poll_interval);
        self.publish();
    }

    /// Disable on every participant and wait, bounded by the deadman, for
    /// the remote ones to acknowledge
    fn stop_participants(&mut self) {
        if let Some(local) = &mut self.local {
            local.disable();
        }

        let mut pending: Vec<(Arc<ThreadShared>, HandoffTicket)> = self
            .remote_participants()
            .into_iter()
            .map(|thread| {
                let ticket = thread.handoff().post(HandoffCommand::Stop);
                if ticket.superseded {
                    debug!("thread {}: stop replaced a command it never picked up", thread.index().0);
                }
                (thread, ticket)
            })
            .collect();

        let deadline = Instant::now() + self.config.deadman;
        loop {
            pending.retain(|(thread, ticket)| !thread.handoff().is_acknowledged(*ticket));
            if pending.is_empty() {
                break;
            }
            if Instant::now() > deadline {
                for (thread, _) in &pending {
                    warn!("thread {} deadman timeout!", thread.index().0);
                }
                self.status.deadman_expiries.fetch_add(pending.len() as u64, Ordering::AcqRel);
                break;
            }
            std::thread::sleep(self.config.ack_poll);
        }
    }

    /// Participating threads reached through their handoff slot
    fn remote_participants(&self) -> Vec<Arc<ThreadShared>> {
        let local = self.local.as_ref().map(ThreadRuntime::index);
        self.host
            .threads()
            .iter()
            .filter(|t| Some(t.index()) != local && self.selector.includes(t.index()))
            .cloned()
            .collect()
    }

    fn publish(&self) {
        self.status.state.store(self.state as u8, Ordering::Release);
        self.status.cursor.store(self.cursor, Ordering::Release);
        self.status.active.store(self.active, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ThreadIndex;
    use crate::host::StaticPipeline;
    use crate::session::SimulatedBackend;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    /// Main thread plus `workers` workers that never run; their handoff
    /// slots are serviced by hand or not at all
    fn host(workers: usize) -> Arc<StaticPipeline> {
        let threads = (0..=workers).map(|i| Arc::new(ThreadShared::new(ThreadIndex(i), ["stage"]))).collect();
        Arc::new(StaticPipeline::new(threads))
    }

    fn config() -> EngineConfig {
        EngineConfig {
            poll_interval: Duration::from_millis(10),
            deadman: Duration::from_millis(20),
            ..EngineConfig::default()
        }
    }

    fn events(n: usize) -> Vec<EventDescriptor> {
        (0..n).map(|i| EventDescriptor::software(i as u64, format!("e{i}"))).collect()
    }

    fn supervisor(
        host: &Arc<StaticPipeline>,
        backend: &Arc<SimulatedBackend>,
    ) -> Supervisor<StaticPipeline, SimulatedBackend> {
        let local = ThreadRuntime::new(ThreadIndex::MAIN, None, backend.clone());
        Supervisor::new(host.clone(), Some(local), config(), Arc::new(EngineStatus::default()))
    }

    #[test]
    fn test_empty_list_stays_off() {
        let host = host(0);
        let backend = Arc::new(SimulatedBackend::new());
        let mut sup = supervisor(&host, &backend);

        sup.start(Vec::new(), ThreadSelector::All);
        assert_eq!(sup.state(), EngineState::Off);
        assert_eq!(sup.status.snapshot().runs, 0);
    }

    #[test]
    fn test_rotation_over_local_thread() {
        let host = host(0);
        let backend = Arc::new(SimulatedBackend::new());
        let mut sup = supervisor(&host, &backend);

        sup.start(events(5), ThreadSelector::All);
        assert_eq!(sup.state(), EngineState::Running);
        assert_eq!(sup.status.snapshot().active, 2);
        assert_eq!(backend.stats(ThreadIndex::MAIN).live(), 2);

        sup.handle_timeout();
        assert_eq!(sup.cursor(), 2);
        sup.handle_timeout();
        assert_eq!(sup.cursor(), 4);
        assert_eq!(sup.status.snapshot().active, 1);
        assert_eq!(backend.stats(ThreadIndex::MAIN).live(), 1);

        sup.handle_timeout();
        assert_eq!(sup.state(), EngineState::Off);
        assert_eq!(sup.cursor(), 0);
        assert_eq!(backend.stats(ThreadIndex::MAIN).live(), 0);

        let status = sup.status.snapshot();
        assert_eq!(status.rounds, 3);
        assert_eq!(status.completed_runs, 1);
        assert_eq!(status.deadman_expiries, 0);
    }

    #[test]
    fn test_deadman_expires_and_rotation_continues() {
        let host = host(2);
        let backend = Arc::new(SimulatedBackend::new());
        let mut sup = supervisor(&host, &backend);

        sup.start(events(3), ThreadSelector::All);
        let started = Instant::now();
        sup.handle_timeout();
        assert!(started.elapsed() >= config().deadman);

        // Nobody serviced the slots, yet the run moved on
        assert_eq!(sup.cursor(), 2);
        assert_eq!(sup.status.snapshot().deadman_expiries, 2);
        sup.handle_timeout();
        assert_eq!(sup.state(), EngineState::Off);
    }

    #[test]
    fn test_stop_replaces_start_never_picked_up() {
        let host = host(1);
        let backend = Arc::new(SimulatedBackend::new());
        let mut sup = supervisor(&host, &backend);
        let slot = host.threads()[1].handoff();

        sup.start(events(2), ThreadSelector::only([1]));
        sup.handle_timeout();
        assert_eq!(sup.status.snapshot().deadman_expiries, 1);

        // Only the stop is left for the worker; the stale start is gone
        let (seq, command) = slot.take().unwrap();
        assert_eq!(command, HandoffCommand::Stop);
        assert!(slot.take().is_none());
        slot.complete(seq);
        assert!(slot.is_idle());
    }

    #[test]
    fn test_acknowledged_stop_does_not_wait() {
        let host = host(1);
        let backend = Arc::new(SimulatedBackend::new());
        let mut sup = supervisor(&host, &backend);
        let worker = host.threads()[1].clone();

        sup.start(events(2), ThreadSelector::All);
        let finished = Arc::new(AtomicBool::new(false));
        let serviced = {
            let finished = finished.clone();
            std::thread::spawn(move || {
                let mut rt = ThreadRuntime::new(ThreadIndex(1), None, Arc::new(SimulatedBackend::new()));
                let mut commands = 0;
                while !finished.load(Ordering::Acquire) {
                    if rt.service_handoff(worker.handoff()) {
                        commands += 1;
                    }
                    std::thread::yield_now();
                }
                commands
            })
        };

        sup.handle_timeout();
        finished.store(true, Ordering::Release);
        assert!(serviced.join().unwrap() >= 1);
        assert_eq!(sup.status.snapshot().deadman_expiries, 0);
    }

    #[test]
    fn test_selector_excludes_main_thread() {
        let host = host(1);
        let backend = Arc::new(SimulatedBackend::new());
        let mut sup = supervisor(&host, &backend);

        sup.start(events(2), ThreadSelector::only([1]));
        assert_eq!(backend.stats(ThreadIndex::MAIN).opened(), 0);
        assert!(!host.threads()[1].handoff().is_idle());
    }

    #[test]
    fn test_restart_resets_cursor_and_captures() {
        let host = host(0);
        let backend = Arc::new(SimulatedBackend::new());
        let mut sup = supervisor(&host, &backend);

        sup.start(events(4), ThreadSelector::All);
        host.threads()[0].stages()[0].accumulate(&[0, 0], &[1, 1], 1);
        sup.handle_timeout();
        assert_eq!(sup.captures().len(), 1);

        sup.start(events(2), ThreadSelector::All);
        assert_eq!(sup.cursor(), 0);
        assert!(sup.captures().is_empty());
        assert_eq!(sup.status.snapshot().runs, 2);
    }

    #[test]
    fn test_accumulate_retention_keeps_records() {
        let host = host(0);
        let backend = Arc::new(SimulatedBackend::new());
        let local = ThreadRuntime::new(ThreadIndex::MAIN, None, backend.clone());
        let config = EngineConfig { capture_retention: CaptureRetention::Accumulate, ..config() };
        let mut sup = Supervisor::new(host.clone(), Some(local), config, Arc::new(EngineStatus::default()));

        for _ in 0..2 {
            sup.start(events(1), ThreadSelector::All);
            host.threads()[0].stages()[0].accumulate(&[0, 0], &[1, 0], 1);
            sup.handle_timeout();
        }
        assert_eq!(sup.captures().get(ThreadIndex::MAIN, "stage").unwrap().len(), 2);
    }

    #[test]
    fn test_unknown_signal_changes_nothing() {
        let host = host(0);
        let backend = Arc::new(SimulatedBackend::new());
        let sup = supervisor(&host, &backend);
        let status = sup.status.clone();

        let (tx, rx) = crossbeam_channel::unbounded();
        tx.send(ControlEvent::Signal(42)).unwrap();
        tx.send(ControlEvent::Shutdown).unwrap();
        sup.run(&rx);

        let snapshot = status.snapshot();
        assert_eq!(snapshot.state, EngineState::Off);
        assert_eq!(snapshot.runs, 0);
    }
}
