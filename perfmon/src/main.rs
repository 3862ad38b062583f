//! # perfmon - Main Entry Point
//!
//! Launches the synthetic pipeline, runs the engine over the requested event
//! list once, then prints the capture table and optionally exports it.

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::{Duration, Instant};

use perfmon::catalog::{parse_event_list, print_catalog};
use perfmon::cli::{Args, BackendKind};
use perfmon::config::{CaptureRetention, EngineConfig};
use perfmon::display::print_table;
use perfmon::domain::{CatalogError, EngineError, EngineState, EventDescriptor};
use perfmon::engine;
use perfmon::export::CaptureExporter;
use perfmon::host::{launch, SyntheticConfig};
use perfmon::preflight::run_preflight_checks;
use perfmon::session::{PerfBackend, SessionBackend, SimulatedBackend};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;
const EXIT_NOPERM: i32 = 77;

fn main() {
    env_logger::init();
    std::process::exit(match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<CatalogError>().is_some()
        || matches!(err.downcast_ref::<EngineError>(), Some(EngineError::UnknownThread(_)))
    {
        return EXIT_USAGE;
    }
    let msg = err.to_string().to_lowercase();
    if msg.contains("permission denied") {
        EXIT_NOPERM
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run() -> Result<()> {
    let args = Args::parse();

    if args.list_events {
        print_catalog();
        return Ok(());
    }

    let events = parse_event_list(&args.events)?;

    match args.backend {
        BackendKind::Perf => {
            run_preflight_checks(&events, args.quiet)?;
            collect(Arc::new(PerfBackend::new()), &args, events).await
        }
        BackendKind::Simulated => collect(Arc::new(SimulatedBackend::new()), &args, events).await,
    }
}

async fn collect<B: SessionBackend>(
    backend: Arc<B>,
    args: &Args,
    events: Vec<EventDescriptor>,
) -> Result<()> {
    let quiet = args.quiet;
    let backend_name = backend.name();

    let mut pipeline = SyntheticConfig { workers: args.workers, pin: args.pin, ..SyntheticConfig::default() };
    if let Some(ref stages) = args.stages {
        pipeline.stages =
            stages.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
    }

    let config = EngineConfig {
        poll_interval: Duration::from_millis(args.interval_ms.max(1)),
        deadman: Duration::from_millis(args.deadman_ms),
        capture_retention: if args.accumulate {
            CaptureRetention::Accumulate
        } else {
            CaptureRetention::ResetOnStart
        },
        ..EngineConfig::default()
    };

    if !quiet {
        println!("perfmon v{}", env!("CARGO_PKG_VERSION"));
        println!("backend: {backend_name}");
        println!("workers: {} ({} stages)", pipeline.workers, pipeline.stages.len());
        println!(
            "events: {} in {} round(s) of {}ms",
            events.len(),
            events.len().div_ceil(2),
            config.poll_interval.as_millis()
        );
    }

    let launched = launch(&pipeline, backend).context("Failed to start pipeline")?;
    let engine = engine::spawn(launched.host.clone(), Some(launched.main), config)
        .context("Failed to start engine")?;
    engine.start(events.clone(), args.threads.clone())?;

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let started = Instant::now();
    let duration_limit =
        if args.duration > 0 { Some(Duration::from_secs(args.duration)) } else { None };

    // Track why we exited the loop
    let mut exit_reason = "interrupted";
    let mut last_round = 0;

    loop {
        let status = engine.status();
        if status.completed_runs >= 1 && status.state == EngineState::Off {
            exit_reason = "run complete";
            break;
        }
        if status.rounds != last_round {
            last_round = status.rounds;
            info!("round {last_round} done, cursor {}", status.cursor);
        }
        if let Some(limit) = duration_limit {
            if started.elapsed() >= limit {
                exit_reason = "duration limit reached";
                break;
            }
        }

        tokio::select! {
            () = tokio::time::sleep(Duration::from_millis(50)) => {}
            _ = &mut ctrl_c => {
                break;
            }
        }
    }

    let store = engine.dump().context("Failed to collect capture")?;
    let status = engine.status();
    engine.shutdown();
    launched.workers.shutdown();

    if !quiet {
        eprintln!(
            "\n{exit_reason}: {:.1}s, {} round(s), {} record(s), {} sample(s), {} deadman timeout(s)",
            started.elapsed().as_secs_f64(),
            status.rounds,
            store.len(),
            store.sample_count(),
            status.deadman_expiries,
        );
    }
    print_table(&store);

    if let Some(ref export_path) = args.export {
        let file = File::create(export_path).context("Failed to create capture output file")?;
        let writer = BufWriter::new(file);
        CaptureExporter::new(&store, &events, backend_name, status)
            .export(writer)
            .context("Failed to export capture")?;

        if !quiet {
            println!("saved: {}", export_path.display());
        }
    }

    Ok(())
}
