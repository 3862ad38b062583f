//! Capture export
//!
//! Writes a dump of every capture record as one JSON document:
//!
//! ```json
//! {
//!   "tool": "perfmon 0.1.0",
//!   "backend": "perf",
//!   "events": ["cpu-cycles", "instructions"],
//!   "status": { "state": "off", "rounds": 1, ... },
//!   "records": [
//!     { "key": "t1-parse", "thread": 1, "stage": "parse",
//!       "samples": [ { "event": "cpu-cycles", "value": 18234, "dispatches": 512 } ] }
//!   ]
//! }
//! ```

use serde::Serialize;
use std::io::Write;

use crate::aggregator::CaptureStore;
use crate::domain::{EventDescriptor, ExportError};
use crate::supervisor::StatusSnapshot;

#[derive(Debug, Serialize)]
struct CaptureDocument<'a> {
    tool: String,
    backend: &'a str,
    events: Vec<&'a str>,
    status: StatusSnapshot,
    records: Vec<RecordEntry<'a>>,
}

#[derive(Debug, Serialize)]
struct RecordEntry<'a> {
    key: String,
    thread: usize,
    stage: &'a str,
    samples: Vec<Sample<'a>>,
}

#[derive(Debug, Serialize)]
struct Sample<'a> {
    event: &'a str,
    value: u64,
    dispatches: u64,
}

/// JSON exporter for a capture dump
pub struct CaptureExporter<'a> {
    store: &'a CaptureStore,
    events: &'a [EventDescriptor],
    backend: &'a str,
    status: StatusSnapshot,
}

impl<'a> CaptureExporter<'a> {
    pub fn new(
        store: &'a CaptureStore,
        events: &'a [EventDescriptor],
        backend: &'a str,
        status: StatusSnapshot,
    ) -> Self {
        Self { store, events, backend, status }
    }

    fn document(&self) -> CaptureDocument<'a> {
        let records = self
            .store
            .iter()
            .map(|(key, record)| RecordEntry {
                key: key.to_string(),
                thread: key.thread.0,
                stage: &key.stage,
                samples: record
                    .samples()
                    .map(|(event, value, dispatches)| Sample { event, value, dispatches })
                    .collect(),
            })
            .collect();

        CaptureDocument {
            tool: format!("perfmon {}", env!("CARGO_PKG_VERSION")),
            backend: self.backend,
            events: self.events.iter().map(|e| e.name.as_str()).collect(),
            status: self.status,
            records,
        }
    }

    /// Write the document, pretty-printed
    ///
    /// # Errors
    /// Returns [`ExportError`] if serialization or the writer fails.
    pub fn export<W: Write>(&self, mut writer: W) -> Result<(), ExportError> {
        serde_json::to_writer_pretty(&mut writer, &self.document())?;
        writeln!(writer)?;
        writer.flush()?;
        Ok(())
    }
}
