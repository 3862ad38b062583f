//! Synthetic run-to-completion pipeline
//!
//! Thread 0 is the caller (the control thread). It runs no stages; its
//! runtime is handed back so the engine can sample on it directly. Threads
//! 1..=N are dispatch workers that loop over the configured stages:
//!
//! ```text
//! loop {
//!     barrier.check_in()
//!     service handoff
//!     for stage in stages {
//!         before = read_counters()
//!         stage work
//!         after = read_counters()
//!         stage.accumulate(before, after, batch)
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use log::{debug, info, warn};

use super::cpu_utils::{online_cpus, pin_current_thread};
use super::{HostPipeline, StaticPipeline, ThreadShared};
use crate::domain::{CpuId, EngineError, ThreadIndex};
use crate::runtime::ThreadRuntime;
use crate::session::SessionBackend;

pub const DEFAULT_STAGES: &[&str] = &["ingress", "parse", "classify", "rewrite", "egress"];

#[derive(Debug, Clone)]
pub struct SyntheticConfig {
    /// Dispatch threads, not counting the main thread
    pub workers: usize,
    pub stages: Vec<String>,
    /// Pin worker N to the Nth online CPU (wrapping)
    pub pin: bool,
    /// Busy-work iterations per stage dispatch, scaled by stage position
    pub work: u64,
    /// Items each dispatch claims to process
    pub batch: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            stages: DEFAULT_STAGES.iter().map(ToString::to_string).collect(),
            pin: false,
            work: 64,
            batch: 32,
        }
    }
}

/// A started pipeline: the host, the main thread's runtime, and the workers
pub struct LaunchedPipeline<B: SessionBackend> {
    pub host: Arc<StaticPipeline>,
    pub main: ThreadRuntime<B>,
    pub workers: WorkerPool,
}

/// Build the pipeline and start its dispatch workers
///
/// # Errors
/// Returns [`EngineError::SpawnFailed`] if a worker thread cannot be
/// spawned; workers already running are stopped first.
pub fn launch<B: SessionBackend>(
    config: &SyntheticConfig,
    backend: Arc<B>,
) -> Result<LaunchedPipeline<B>, EngineError> {
    let no_stages: [&str; 0] = [];
    let mut threads = vec![Arc::new(ThreadShared::new(ThreadIndex::MAIN, no_stages))];
    threads.extend(
        (1..=config.workers)
            .map(|i| Arc::new(ThreadShared::new(ThreadIndex(i), config.stages.iter().cloned()))),
    );
    let host = Arc::new(StaticPipeline::new(threads));

    let cpus = if config.pin { worker_cpus() } else { Vec::new() };

    let mut workers =
        WorkerPool { stop: Arc::new(AtomicBool::new(false)), handles: Vec::new() };
    for shared in host.threads().iter().skip(1) {
        let cpu = (!cpus.is_empty()).then(|| cpus[(shared.index().0 - 1) % cpus.len()]);
        let worker = Worker {
            shared: shared.clone(),
            host: host.clone(),
            backend: backend.clone(),
            stop: workers.stop.clone(),
            cpu,
            work: config.work,
            batch: config.batch,
        };

        host.barrier().join();
        let spawned = std::thread::Builder::new()
            .name(format!("perfmon-w{}", shared.index().0))
            .spawn(move || worker.run());
        match spawned {
            Ok(handle) => workers.handles.push(handle),
            Err(e) => {
                host.barrier().leave();
                // Dropping the pool stops and joins what was started
                return Err(EngineError::SpawnFailed(e));
            }
        }
    }

    info!(
        "synthetic pipeline: {} worker(s), {} stage(s), pinned: {}",
        config.workers,
        config.stages.len(),
        !cpus.is_empty()
    );

    let main = ThreadRuntime::new(ThreadIndex::MAIN, None, backend);
    Ok(LaunchedPipeline { host, main, workers })
}

fn worker_cpus() -> Vec<CpuId> {
    match online_cpus() {
        Ok(cpus) => cpus,
        Err(e) => {
            warn!("not pinning workers: {e:#}");
            Vec::new()
        }
    }
}

/// Running dispatch threads. Stopped and joined on drop.
#[derive(Debug)]
pub struct WorkerPool {
    stop: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Stop every worker and wait for it to exit
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                warn!("dispatch worker panicked");
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

struct Worker<B: SessionBackend> {
    shared: Arc<ThreadShared>,
    host: Arc<StaticPipeline>,
    backend: Arc<B>,
    stop: Arc<AtomicBool>,
    cpu: Option<CpuId>,
    work: u64,
    batch: u64,
}

impl<B: SessionBackend> Worker<B> {
    fn run(self) {
        let index = self.shared.index();
        let cpu = self.cpu.filter(|&cpu| match pin_current_thread(cpu) {
            Ok(()) => true,
            Err(e) => {
                warn!("{index}: cannot pin to {cpu}: {e}");
                false
            }
        });
        debug!("{index}: dispatch loop started ({})", cpu.map_or("unpinned".into(), |c| c.to_string()));

        let mut runtime = ThreadRuntime::new(index, cpu, self.backend.clone());
        let barrier = self.host.barrier();
        let handoff = self.shared.handoff();

        while !self.stop.load(Ordering::Acquire) {
            barrier.check_in();
            runtime.service_handoff(handoff);

            for (position, stage) in self.shared.stages().iter().enumerate() {
                let before = runtime.read_counters();
                stage_work(self.work * (position as u64 + 1));
                let after = runtime.read_counters();

                if let (Some(before), Some(after)) = (before, after) {
                    stage.accumulate(&before, &after, self.batch);
                }
            }
        }

        runtime.disable();
        // A command that raced with the stop flag is acknowledged, not run
        if let Some((seq, _)) = handoff.take() {
            handoff.complete(seq);
        }
        barrier.leave();
        debug!("{index}: dispatch loop stopped");
    }
}

#[inline(never)]
fn stage_work(iterations: u64) {
    let mut acc = 0u64;
    for i in 0..iterations {
        acc = std::hint::black_box(acc.wrapping_mul(31).wrapping_add(i));
    }
    std::hint::black_box(acc);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EventDescriptor;
    use crate::handoff::HandoffCommand;
    use crate::session::SimulatedBackend;
    use std::time::{Duration, Instant};

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_launch_layout() {
        let backend = Arc::new(SimulatedBackend::new());
        let config = SyntheticConfig { workers: 3, ..SyntheticConfig::default() };
        let launched = launch(&config, backend).unwrap();

        let threads = launched.host.threads();
        assert_eq!(threads.len(), 4);
        assert!(threads[0].stages().is_empty());
        assert_eq!(threads[2].stages().len(), DEFAULT_STAGES.len());
        assert_eq!(launched.host.barrier().registered(), 3);
        assert_eq!(launched.main.index(), ThreadIndex::MAIN);
        assert_eq!(launched.workers.len(), 3);

        launched.workers.shutdown();
        assert_eq!(launched.host.barrier().registered(), 0);
    }

    #[test]
    fn test_workers_accumulate_while_sampling() {
        let backend = Arc::new(SimulatedBackend::new());
        let config = SyntheticConfig { workers: 1, ..SyntheticConfig::default() };
        let launched = launch(&config, backend.clone()).unwrap();
        let worker = launched.host.thread(ThreadIndex(1)).unwrap().clone();

        // Nothing is accumulated without a hook
        std::thread::sleep(Duration::from_millis(10));
        assert!(worker.stages()[0].snapshot().is_empty());

        let ticket = worker
            .handoff()
            .post(HandoffCommand::Start(vec![EventDescriptor::software(3, "context-switches")]));
        wait_for(|| worker.handoff().is_acknowledged(ticket));
        wait_for(|| worker.stages()[0].snapshot().dispatches > 0);

        let snap = {
            let _halted = launched.host.barrier().sync();
            worker.stages()[0].snapshot()
        };
        // One read before and one after each dispatch, step 4
        assert_eq!(snap.totals[0], 4 * snap.dispatches / config.batch);
        assert_eq!(snap.totals[1], 0);

        let ticket = worker.handoff().post(HandoffCommand::Stop);
        wait_for(|| worker.handoff().is_acknowledged(ticket));
        assert_eq!(backend.stats(ThreadIndex(1)).live(), 0);
    }
}
