//! Engine entry point and control API
//!
//! [`spawn`] moves a [`Supervisor`] onto its own control thread and returns
//! an [`EngineHandle`]. Every handle method is a message to that thread;
//! nothing blocks the dispatch workers.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Sender};
use log::warn;

use crate::aggregator::CaptureStore;
use crate::config::EngineConfig;
use crate::domain::{EngineError, EngineState, EventDescriptor, ThreadIndex, ThreadSelector};
use crate::host::HostPipeline;
use crate::runtime::ThreadRuntime;
use crate::session::SessionBackend;
use crate::supervisor::{ControlEvent, EngineStatus, StatusSnapshot, Supervisor};

const STATUS_POLL: Duration = Duration::from_millis(2);

/// Start the control thread
///
/// `local` is the runtime of the thread the engine should treat as its own
/// (thread 0); its sessions are opened on the control thread.
///
/// # Errors
/// Returns [`EngineError::SpawnFailed`] if the thread cannot be created.
pub fn spawn<H: HostPipeline, B: SessionBackend>(
    host: Arc<H>,
    local: Option<ThreadRuntime<B>>,
    config: EngineConfig,
) -> Result<EngineHandle, EngineError> {
    let (tx, rx) = unbounded();
    let status = Arc::new(EngineStatus::default());
    let threads: Vec<ThreadIndex> = host.threads().iter().map(|t| t.index()).collect();

    let supervisor = Supervisor::new(host, local, config, status.clone());
    let control = std::thread::Builder::new()
        .name("perfmon-ctl".into())
        .spawn(move || supervisor.run(&rx))
        .map_err(EngineError::SpawnFailed)?;

    Ok(EngineHandle { tx, status, threads, control: Some(control) })
}

/// Control API of a running engine. Dropping it shuts the engine down.
#[derive(Debug)]
pub struct EngineHandle {
    tx: Sender<ControlEvent>,
    status: Arc<EngineStatus>,
    threads: Vec<ThreadIndex>,
    control: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Collect `events` on the selected threads
    ///
    /// # Errors
    /// [`EngineError::UnknownThread`] if the selector names a thread the
    /// pipeline does not have; [`EngineError::Disconnected`] after shutdown.
    pub fn start(
        &self,
        events: Vec<EventDescriptor>,
        threads: ThreadSelector,
    ) -> Result<(), EngineError> {
        if let ThreadSelector::Only(set) = &threads {
            if let Some(&unknown) = set.iter().find(|t| !self.threads.contains(t)) {
                return Err(EngineError::UnknownThread(unknown));
            }
        }
        self.send(ControlEvent::Start { events, threads })
    }

    /// Copy of every capture record collected so far
    ///
    /// # Errors
    /// [`EngineError::Disconnected`] if the control thread is gone.
    pub fn dump(&self) -> Result<CaptureStore, EngineError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(ControlEvent::Dump(reply_tx))?;
        reply_rx.recv().map_err(|_| EngineError::Disconnected)
    }

    /// Deliver a raw control signal
    ///
    /// # Errors
    /// [`EngineError::Disconnected`] if the control thread is gone.
    pub fn signal(&self, code: u32) -> Result<(), EngineError> {
        self.send(ControlEvent::Signal(code))
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.snapshot()
    }

    /// Wait until `runs` runs have gone through their whole event list
    ///
    /// Returns false on timeout.
    pub fn wait_for_completed_runs(&self, runs: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            let status = self.status();
            if status.completed_runs >= runs && status.state == EngineState::Off {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(STATUS_POLL);
        }
    }

    /// Stop collection everywhere and join the control thread
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let Some(control) = self.control.take() else {
            return;
        };
        // Already gone if the loop exited on its own
        let _ = self.tx.send(ControlEvent::Shutdown);
        if control.join().is_err() {
            warn!("control thread panicked");
        }
    }

    fn send(&self, event: ControlEvent) -> Result<(), EngineError> {
        self.tx.send(event).map_err(|_| EngineError::Disconnected)
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.stop();
    }
}
