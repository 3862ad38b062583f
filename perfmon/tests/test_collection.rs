use std::sync::Arc;
use std::time::Duration;

use perfmon::catalog::parse_event_list;
use perfmon::config::{CaptureRetention, EngineConfig};
use perfmon::domain::{EngineState, ThreadIndex, ThreadSelector};
use perfmon::engine;
use perfmon::host::{launch, HostPipeline, StaticPipeline, SyntheticConfig, ThreadShared};
use perfmon::session::SimulatedBackend;

const RUN_TIMEOUT: Duration = Duration::from_secs(10);

fn fast_config() -> EngineConfig {
    EngineConfig {
        poll_interval: Duration::from_millis(40),
        deadman: Duration::from_millis(500),
        ..EngineConfig::default()
    }
}

fn two_workers() -> SyntheticConfig {
    SyntheticConfig { workers: 2, stages: vec!["parse".into(), "route".into()], ..SyntheticConfig::default() }
}

#[test]
fn test_five_events_rotate_in_three_rounds() {
    let backend = Arc::new(SimulatedBackend::new());
    let events =
        parse_event_list("cpu-cycles,instructions,cache-references,cache-misses,context-switches")
            .expect("catalog events");

    let launched = launch(&two_workers(), backend).expect("launch pipeline");
    let engine = engine::spawn(launched.host.clone(), Some(launched.main), fast_config())
        .expect("spawn engine");
    engine.start(events.clone(), ThreadSelector::All).unwrap();

    assert!(engine.wait_for_completed_runs(1, RUN_TIMEOUT));
    let status = engine.status();
    assert_eq!(status.state, EngineState::Off);
    assert_eq!(status.cursor, 0);
    assert_eq!(status.rounds, 3);
    assert_eq!(status.deadman_expiries, 0);

    let store = engine.dump().unwrap();
    // Two workers with two stages each; thread 0 dispatches nothing
    assert_eq!(store.len(), 4);

    let expected: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    for (key, record) in store.iter() {
        assert_ne!(key.thread, ThreadIndex::MAIN);
        let names: Vec<&str> = record.counter_names().iter().map(String::as_str).collect();
        assert_eq!(names, expected, "{key}");
        assert_eq!(record.counter_values().len(), record.len());
        assert_eq!(record.dispatches().len(), record.len());
        assert!(record.counter_values().iter().all(|&v| v > 0), "{key}");
    }

    engine.shutdown();
    launched.workers.shutdown();
}

#[test]
fn test_selected_worker_only() {
    let backend = Arc::new(SimulatedBackend::new());
    let events = parse_event_list("cpu-cycles,instructions").unwrap();

    let launched = launch(&two_workers(), backend.clone()).unwrap();
    let engine = engine::spawn(launched.host.clone(), Some(launched.main), fast_config()).unwrap();
    engine.start(events, ThreadSelector::only([2])).unwrap();

    assert!(engine.wait_for_completed_runs(1, RUN_TIMEOUT));
    let store = engine.dump().unwrap();
    assert!(store.iter().all(|(key, _)| key.thread == ThreadIndex(2)));
    assert_eq!(store.len(), 2);
    assert_eq!(backend.stats(ThreadIndex(1)).opened(), 0);
    assert_eq!(backend.stats(ThreadIndex(0)).opened(), 0);

    engine.shutdown();
    launched.workers.shutdown();
}

#[test]
fn test_unknown_thread_is_rejected() {
    let launched = launch(&two_workers(), Arc::new(SimulatedBackend::new())).unwrap();
    let engine = engine::spawn(launched.host.clone(), Some(launched.main), fast_config()).unwrap();

    let events = parse_event_list("cpu-cycles").unwrap();
    assert!(engine.start(events, ThreadSelector::only([7])).is_err());
    assert_eq!(engine.status().runs, 0);

    engine.shutdown();
    launched.workers.shutdown();
}

#[test]
fn test_read_failure_is_isolated_to_one_thread() {
    let backend = Arc::new(SimulatedBackend::new());
    backend.fail_reads_after(ThreadIndex(1), 5);
    let events = parse_event_list("context-switches,page-faults").unwrap();

    let launched = launch(&two_workers(), backend.clone()).unwrap();
    let engine = engine::spawn(launched.host.clone(), Some(launched.main), fast_config()).unwrap();
    engine.start(events, ThreadSelector::All).unwrap();

    assert!(engine.wait_for_completed_runs(1, RUN_TIMEOUT));
    let store = engine.dump().unwrap();

    // The failing thread stopped sampling once, the other kept going
    assert_eq!(backend.stats(ThreadIndex(1)).failed_reads(), 1);
    for stage in ["parse", "route"] {
        let record = store.get(ThreadIndex(2), stage).expect("healthy worker record");
        assert_eq!(record.len(), 2);
    }

    engine.shutdown();
    launched.workers.shutdown();

    // Every opened session was closed again
    for thread in 0..=2 {
        let stats = backend.stats(ThreadIndex(thread));
        assert_eq!(stats.live(), 0, "thread {thread}");
    }
}

#[test]
fn test_restart_with_accumulate_appends() {
    let backend = Arc::new(SimulatedBackend::new());
    let config = EngineConfig { capture_retention: CaptureRetention::Accumulate, ..fast_config() };
    let events = parse_event_list("cpu-cycles,instructions").unwrap();

    let launched = launch(&two_workers(), backend).unwrap();
    let engine = engine::spawn(launched.host.clone(), Some(launched.main), config).unwrap();

    engine.start(events.clone(), ThreadSelector::All).unwrap();
    assert!(engine.wait_for_completed_runs(1, RUN_TIMEOUT));
    engine.start(events, ThreadSelector::All).unwrap();
    assert!(engine.wait_for_completed_runs(2, RUN_TIMEOUT));

    let store = engine.dump().unwrap();
    for (key, record) in store.iter() {
        assert_eq!(record.len(), 4, "{key}");
        assert_eq!(record.counter_names()[2], "cpu-cycles");
    }

    engine.shutdown();
    launched.workers.shutdown();
}

#[test]
fn test_unresponsive_worker_hits_deadman() {
    // Thread 1 exists in the pipeline but nothing ever services its slot
    let host = Arc::new(StaticPipeline::new(vec![
        Arc::new(ThreadShared::new(ThreadIndex::MAIN, ["control"])),
        Arc::new(ThreadShared::new(ThreadIndex(1), ["parse"])),
        Arc::new(ThreadShared::new(ThreadIndex(2), ["parse"])),
    ]));
    let config = EngineConfig {
        poll_interval: Duration::from_millis(10),
        deadman: Duration::from_millis(30),
        ..EngineConfig::default()
    };
    let engine = engine::spawn::<_, SimulatedBackend>(host, None, config).unwrap();

    let events = parse_event_list("cpu-cycles,instructions,cache-misses").unwrap();
    engine.start(events, ThreadSelector::only([1])).unwrap();

    assert!(engine.wait_for_completed_runs(1, RUN_TIMEOUT));
    let status = engine.status();
    assert_eq!(status.rounds, 2);
    assert_eq!(status.deadman_expiries, 2);
    assert!(engine.dump().unwrap().is_empty());

    engine.shutdown();
}

#[test]
fn test_slow_worker_is_scraped_through_the_barrier() {
    // One stage whose dispatch runs far longer than the deadman, so the stop
    // is picked up late and the scrape must wait for the worker to park
    let pipeline = SyntheticConfig {
        workers: 1,
        stages: vec!["crunch".into()],
        work: 200_000_000,
        ..SyntheticConfig::default()
    };
    let config = EngineConfig {
        poll_interval: Duration::from_millis(10),
        deadman: Duration::from_millis(1),
        ..EngineConfig::default()
    };

    let launched = launch(&pipeline, Arc::new(SimulatedBackend::new())).unwrap();
    let worker = launched.host.threads()[1].clone();
    let engine = engine::spawn(launched.host.clone(), Some(launched.main), config).unwrap();

    let events = parse_event_list("cpu-cycles,instructions").unwrap();
    engine.start(events, ThreadSelector::only([1])).unwrap();

    assert!(engine.wait_for_completed_runs(1, Duration::from_secs(60)));
    let status = engine.status();
    assert_eq!(status.state, EngineState::Off);
    assert_eq!(status.rounds, 1);
    assert!(status.deadman_expiries >= 1);

    // The worker was released after the scrape and caught up with the stop
    let deadline = std::time::Instant::now() + Duration::from_secs(60);
    while !worker.handoff().is_idle() {
        assert!(std::time::Instant::now() < deadline, "worker never acknowledged");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(launched.host.barrier().registered(), 1);

    engine.shutdown();
    launched.workers.shutdown();
    assert_eq!(launched.host.barrier().registered(), 0);
}

#[test]
fn test_empty_event_list_never_runs() {
    let launched = launch(&two_workers(), Arc::new(SimulatedBackend::new())).unwrap();
    let engine = engine::spawn(launched.host.clone(), Some(launched.main), fast_config()).unwrap();

    engine.start(Vec::new(), ThreadSelector::All).unwrap();
    engine.signal(42).unwrap();
    std::thread::sleep(Duration::from_millis(100));

    let status = engine.status();
    assert_eq!(status.state, EngineState::Off);
    assert_eq!(status.rounds, 0);
    assert!(engine.dump().unwrap().is_empty());

    engine.shutdown();
    launched.workers.shutdown();
}
