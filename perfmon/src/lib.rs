//! # perfmon - Multiplexed Performance Counters for Run-to-Completion Pipelines
//!
//! perfmon measures a dataplane pipeline per stage and per thread while it
//! keeps running. It rotates a list of performance events through the two
//! counter slots each thread gets, attributes counter deltas to the stage
//! that was dispatching, and builds a time series of per-stage samples.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Control thread (thread 0)                    │
//! │                                                                 │
//! │  EngineHandle ──▶ Supervisor ──▶ Aggregator ──▶ CaptureStore    │
//! │   start/dump       OFF/RUNNING    barrier         (t1-parse,    │
//! │                    rotation       snapshot         t2-route..)  │
//! └───────────┬─────────────────────────▲───────────────────────────┘
//!             │ HandoffSlot             │ WorkerBarrier
//!             │ Start(pair) / Stop      │ stop-the-world scrape
//!             ▼                         │
//! ┌─────────────────────────────────────┴───────────────────────────┐
//! │                  Dispatch workers (threads 1..N)                │
//! │                                                                 │
//! │  ThreadRuntime ──▶ ThreadSessions ──▶ perf_event_open / rdpmc   │
//! │  HotPathSampler ──▶ StageCounters (per stage, single writer)    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Core Engine
//!
//! - [`session`]: counter sessions, at most two per thread per round
//!   - `manager`: all-or-nothing enable, idempotent disable
//!   - `perf`: Linux `perf_event_open(2)` with `rdpmc` fast reads
//!   - `simulated`: deterministic counters with fault injection
//! - [`sampler`]: the per-iteration counter hook
//! - [`runtime`]: per-thread sessions, hook slot and handoff servicing
//! - [`handoff`]: lock-free command slot between control and workers
//! - [`aggregator`]: barrier snapshot and append-only capture records
//! - [`supervisor`]: the OFF/RUNNING rotation state machine
//! - [`engine`]: control thread and [`EngineHandle`](engine::EngineHandle)
//!
//! ### Host Contract
//!
//! - [`host`]: what a pipeline provides (stages, handoff slots, barrier),
//!   plus a synthetic multi-threaded pipeline
//!
//! ### Operator Surface
//!
//! - [`catalog`]: event names and raw selectors
//! - [`cli`]: command-line arguments
//! - [`config`]: engine timing and capture retention
//! - [`display`]: plain-text capture table
//! - [`export`]: JSON capture dump
//! - [`preflight`]: kernel and permission checks for the perf backend
//! - [`domain`]: core types and errors
//!
//! ## Typical Usage
//!
//! ```bash
//! # Five events, two per 2s round, on every thread
//! perfmon -e cpu-cycles,instructions,cache-references,cache-misses,context-switches
//!
//! # No perf access (containers, CI)
//! perfmon --backend simulated --interval-ms 200 --export capture.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Round**: one event pair collected for one poll interval
//! - **Rotation**: stop, scrape, advance the cursor, enable the next pair
//! - **Deadman**: bound on waiting for a worker's acknowledgement
//! - **rdpmc**: user-space counter read, available when the control page
//!   advertises it

pub mod aggregator;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod display;
pub mod domain;
pub mod engine;
pub mod export;
pub mod handoff;
pub mod host;
pub mod preflight;
pub mod runtime;
pub mod sampler;
pub mod session;
pub mod supervisor;

pub use engine::{spawn, EngineHandle};
