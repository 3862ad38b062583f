//! # Host pipeline contract
//!
//! What the engine needs from the dataplane it measures:
//!
//! - every thread's stages and their [`StageCounters`], enumerable from the
//!   control thread ([`HostPipeline::threads`])
//! - one [`HandoffSlot`] per thread, polled between dispatch iterations
//! - a [`WorkerBarrier`] that halts every dispatch thread
//!
//! The per-thread counter hook itself lives in the thread's own
//! [`ThreadRuntime`](crate::runtime::ThreadRuntime), which the host keeps on
//! that thread.
//!
//! [`synthetic`] is a complete host used by the operator binary and the
//! tests.

pub mod barrier;
pub mod cpu_utils;
pub mod stage;
pub mod synthetic;

pub use barrier::{BarrierGuard, WorkerBarrier};
pub use stage::{CounterSnapshot, StageCounters};
pub use synthetic::{launch, LaunchedPipeline, SyntheticConfig, WorkerPool};

use crate::domain::ThreadIndex;
use crate::handoff::HandoffSlot;
use std::sync::Arc;

/// The cross-thread half of one pipeline thread
#[derive(Debug)]
pub struct ThreadShared {
    index: ThreadIndex,
    stages: Vec<StageCounters>,
    handoff: HandoffSlot,
}

impl ThreadShared {
    pub fn new<S: Into<String>>(index: ThreadIndex, stages: impl IntoIterator<Item = S>) -> Self {
        Self {
            index,
            stages: stages.into_iter().map(StageCounters::new).collect(),
            handoff: HandoffSlot::new(),
        }
    }

    pub fn index(&self) -> ThreadIndex {
        self.index
    }

    pub fn stages(&self) -> &[StageCounters] {
        &self.stages
    }

    pub fn handoff(&self) -> &HandoffSlot {
        &self.handoff
    }
}

/// A running pipeline the engine can measure
pub trait HostPipeline: Send + Sync + 'static {
    /// All threads, main thread first
    fn threads(&self) -> &[Arc<ThreadShared>];

    fn barrier(&self) -> &WorkerBarrier;

    fn thread(&self, index: ThreadIndex) -> Option<&Arc<ThreadShared>> {
        self.threads().iter().find(|t| t.index() == index)
    }
}

/// A host whose threads are described up front and driven by the embedding
/// application
#[derive(Debug)]
pub struct StaticPipeline {
    threads: Vec<Arc<ThreadShared>>,
    barrier: WorkerBarrier,
}

impl StaticPipeline {
    pub fn new(threads: Vec<Arc<ThreadShared>>) -> Self {
        Self { threads, barrier: WorkerBarrier::new() }
    }
}

impl HostPipeline for StaticPipeline {
    fn threads(&self) -> &[Arc<ThreadShared>] {
        &self.threads
    }

    fn barrier(&self) -> &WorkerBarrier {
        &self.barrier
    }
}
