//! # Snapshot & Capture Aggregator
//!
//! Turns the live per-stage counters of every thread into an append-only
//! time series. Each rotation:
//!
//! 1. under the worker barrier, copy and zero every stage's counters
//! 2. with the workers running again, append one sample per active slot to
//!    the stage's [`CaptureRecord`]
//!
//! Stages whose two counter totals are both zero saw no sampled dispatch
//! and get no sample.

use std::collections::BTreeMap;
use std::fmt;

use log::debug;
use serde::Serialize;

use crate::domain::{EventDescriptor, ThreadIndex};
use crate::host::{CounterSnapshot, HostPipeline};
use crate::session::MAX_ACTIVE;

/// Capture records are keyed by thread and stage name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct CaptureKey {
    pub thread: ThreadIndex,
    pub stage: String,
}

impl CaptureKey {
    pub fn new(thread: ThreadIndex, stage: impl Into<String>) -> Self {
        Self { thread, stage: stage.into() }
    }
}

impl fmt::Display for CaptureKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.thread, self.stage)
    }
}

/// One (thread, stage) time series. The three sequences always have the
/// same length and are only ever appended to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CaptureRecord {
    counter_names: Vec<String>,
    counter_values: Vec<u64>,
    dispatches: Vec<u64>,
}

impl CaptureRecord {
    fn push(&mut self, event: &str, value: u64, dispatches: u64) {
        self.counter_names.push(event.to_string());
        self.counter_values.push(value);
        self.dispatches.push(dispatches);
    }

    pub fn len(&self) -> usize {
        self.counter_names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counter_names.is_empty()
    }

    pub fn counter_names(&self) -> &[String] {
        &self.counter_names
    }

    pub fn counter_values(&self) -> &[u64] {
        &self.counter_values
    }

    pub fn dispatches(&self) -> &[u64] {
        &self.dispatches
    }

    /// (event, counter delta, dispatches) in collection order
    pub fn samples(&self) -> impl Iterator<Item = (&str, u64, u64)> + '_ {
        self.counter_names
            .iter()
            .zip(&self.counter_values)
            .zip(&self.dispatches)
            .map(|((name, &value), &dispatches)| (name.as_str(), value, dispatches))
    }
}

/// Every capture record of a run (or of several, when retained)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureStore {
    records: BTreeMap<CaptureKey, CaptureRecord>,
}

impl CaptureStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, thread: ThreadIndex, stage: &str) -> Option<&CaptureRecord> {
        self.records.get(&CaptureKey::new(thread, stage))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CaptureKey, &CaptureRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Total samples over all records
    pub fn sample_count(&self) -> usize {
        self.records.values().map(CaptureRecord::len).sum()
    }

    fn record_mut(&mut self, thread: ThreadIndex, stage: &str) -> &mut CaptureRecord {
        self.records.entry(CaptureKey::new(thread, stage)).or_default()
    }
}

/// What one scrape did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScrapeSummary {
    pub stages: usize,
    pub skipped: usize,
    pub samples: usize,
}

/// Zero every stage of every thread, under the barrier
pub fn clear_all<H: HostPipeline + ?Sized>(host: &H) -> usize {
    let _halted = host.barrier().sync();
    let mut cleared = 0;
    for thread in host.threads() {
        for stage in thread.stages() {
            stage.snapshot_and_clear();
            cleared += 1;
        }
    }
    cleared
}

/// Snapshot and clear every stage, then append this round's samples
///
/// `events[cursor..cursor + active]` are the events that were being
/// collected; slot `k` holds `events[cursor + k]`.
pub fn scrape_and_clear<H: HostPipeline + ?Sized>(
    host: &H,
    events: &[EventDescriptor],
    cursor: usize,
    active: usize,
    store: &mut CaptureStore,
) -> ScrapeSummary {
    let snapshots: Vec<(ThreadIndex, &str, CounterSnapshot)> = {
        let _halted = host.barrier().sync();
        host.threads()
            .iter()
            .flat_map(|thread| {
                thread
                    .stages()
                    .iter()
                    .map(move |stage| (thread.index(), stage.name(), stage.snapshot_and_clear()))
            })
            .collect()
    };

    let mut summary = ScrapeSummary { stages: snapshots.len(), ..ScrapeSummary::default() };
    for (thread, stage, snapshot) in snapshots {
        if snapshot.is_empty() {
            summary.skipped += 1;
            continue;
        }

        let record = store.record_mut(thread, stage);
        for k in 0..active.min(MAX_ACTIVE) {
            let Some(event) = events.get(cursor + k) else {
                break;
            };
            record.push(&event.name, snapshot.delta(k), snapshot.throughput());
            summary.samples += 1;
        }
    }

    debug!(
        "scrape at cursor {cursor}: {} stage(s), {} skipped, {} sample(s)",
        summary.stages, summary.skipped, summary.samples
    );
    summary
}
