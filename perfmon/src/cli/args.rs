//! CLI argument definitions

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::domain::ThreadSelector;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Linux perf_event_open(2) counters
    Perf,
    /// Deterministic software counters, no privileges needed
    Simulated,
}

#[derive(Parser, Debug)]
#[command(
    name = "perfmon",
    about = "Multiplex performance counters across a run-to-completion pipeline",
    after_help = "\
EXAMPLES:
    perfmon -e cpu-cycles,instructions,cache-misses     Collect three events, two per round
    perfmon -e r00c0,branch-misses --threads 1,2         Raw selector, workers 1 and 2 only
    perfmon --backend simulated --export capture.json    No perf access needed
    perfmon --list-events                                Show the event catalog"
)]
pub struct Args {
    /// Comma-separated events, collected two at a time in this order
    #[arg(
        short,
        long,
        value_name = "LIST",
        default_value = "cpu-cycles,instructions,cache-references,cache-misses,context-switches"
    )]
    pub events: String,

    /// Threads to sample: "all" or a comma-separated list of indices (0 = main)
    #[arg(short, long, value_name = "LIST", default_value = "all", value_parser = parse_thread_selector)]
    pub threads: ThreadSelector,

    /// Dispatch worker threads
    #[arg(short, long, default_value = "2")]
    pub workers: usize,

    /// Comma-separated pipeline stage names (default: built-in five-stage graph)
    #[arg(long, value_name = "LIST")]
    pub stages: Option<String>,

    /// Round length in milliseconds
    #[arg(long, value_name = "MS", default_value = "2000")]
    pub interval_ms: u64,

    /// How long to wait for workers to acknowledge, in milliseconds
    #[arg(long, value_name = "MS", default_value = "1000")]
    pub deadman_ms: u64,

    /// Counter backend
    #[arg(long, value_enum, default_value = "perf")]
    pub backend: BackendKind,

    /// Pin each worker to an online CPU
    #[arg(long)]
    pub pin: bool,

    /// Export the capture to a JSON file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Stop after N seconds even if the run is not finished (0 = unlimited)
    #[arg(long, default_value = "0")]
    pub duration: u64,

    /// Keep records of earlier runs when a run is restarted
    #[arg(long)]
    pub accumulate: bool,

    /// Print the event catalog and exit
    #[arg(long)]
    pub list_events: bool,

    /// Suppress non-essential output
    #[arg(short, long)]
    pub quiet: bool,
}

/// Parse `all` or a comma-separated list of thread indices
pub fn parse_thread_selector(input: &str) -> Result<ThreadSelector, String> {
    let input = input.trim();
    if input.eq_ignore_ascii_case("all") {
        return Ok(ThreadSelector::All);
    }

    let indices = input
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| part.parse::<usize>().map_err(|_| format!("invalid thread index \"{part}\"")))
        .collect::<Result<Vec<_>, _>>()?;

    if indices.is_empty() {
        return Err("thread list is empty".to_string());
    }
    Ok(ThreadSelector::only(indices))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["perfmon"]).unwrap();
        assert_eq!(args.threads, ThreadSelector::All);
        assert_eq!(args.workers, 2);
        assert_eq!(args.backend, BackendKind::Perf);
        assert_eq!(args.interval_ms, 2000);
        assert!(args.export.is_none());
    }

    #[test]
    fn test_backend_and_export() {
        let args = Args::try_parse_from([
            "perfmon",
            "--backend",
            "simulated",
            "-e",
            "task-clock",
            "--export",
            "out.json",
        ])
        .unwrap();
        assert_eq!(args.backend, BackendKind::Simulated);
        assert_eq!(args.events, "task-clock");
        assert_eq!(args.export, Some(PathBuf::from("out.json")));
    }

    #[test]
    fn test_thread_selector() {
        assert_eq!(parse_thread_selector("ALL").unwrap(), ThreadSelector::All);
        assert_eq!(parse_thread_selector("2, 1,2").unwrap(), ThreadSelector::only([1, 2]));
        assert!(parse_thread_selector("1,x").unwrap_err().contains("\"x\""));
        assert!(parse_thread_selector(",").is_err());

        let args = Args::try_parse_from(["perfmon", "--threads", "0,3"]).unwrap();
        assert_eq!(args.threads, ThreadSelector::only([0, 3]));
    }

    #[test]
    fn test_unknown_backend_is_rejected() {
        assert!(Args::try_parse_from(["perfmon", "--backend", "msr"]).is_err());
    }
}
