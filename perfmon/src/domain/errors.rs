//! Structured error types for perfmon
//!
//! Using thiserror for automatic Display implementation and error chaining.
//! None of these are fatal: the engine logs them and degrades to "collection
//! stops" for the affected thread or round.

use super::types::ThreadIndex;
use thiserror::Error;

/// Failures while opening, configuring or reading a counter session
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("event open failed for {event} (type {perf_type}, config {config:#x}): {source}")]
    OpenFailed { event: String, perf_type: u32, config: u64, source: std::io::Error },

    #[error("control page mmap failed for {event}: {source}")]
    MapFailed { event: String, source: std::io::Error },

    #[error("{op} ioctl failed for {event}: {source}")]
    Ioctl { op: &'static str, event: String, source: std::io::Error },

    #[error("counter read failed for {event}: {source}")]
    ReadFailed { event: String, source: std::io::Error },

    #[error("short counter read for {event}: got {got} of 8 bytes")]
    ShortRead { event: String, got: usize },
}

/// Failures turning operator input into event descriptors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("unknown event \"{0}\" (use a catalog name or r<hex> for a raw selector)")]
    UnknownEvent(String),

    #[error("malformed raw event selector \"{0}\"")]
    BadRawSelector(String),

    #[error("event list is empty")]
    Empty,
}

/// Failures of the control API
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("perfmon control thread is not running")]
    Disconnected,

    #[error("failed to spawn perfmon thread: {0}")]
    SpawnFailed(#[source] std::io::Error),

    #[error("thread {0} is not part of the pipeline")]
    UnknownThread(ThreadIndex),
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
