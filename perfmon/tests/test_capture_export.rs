use std::fs::File;
use std::io::BufWriter;
use std::sync::Arc;
use std::time::Duration;

use perfmon::catalog::parse_event_list;
use perfmon::config::EngineConfig;
use perfmon::domain::ThreadSelector;
use perfmon::engine;
use perfmon::export::CaptureExporter;
use perfmon::host::{launch, SyntheticConfig};
use perfmon::session::{SessionBackend, SimulatedBackend};

#[test]
fn test_export_writes_capture_json() {
    let backend = Arc::new(SimulatedBackend::new());
    let events = parse_event_list("cpu-cycles,instructions,task-clock").unwrap();
    let config = EngineConfig { poll_interval: Duration::from_millis(30), ..EngineConfig::default() };

    let pipeline = SyntheticConfig { workers: 1, ..SyntheticConfig::default() };
    let launched = launch(&pipeline, backend.clone()).unwrap();
    let engine = engine::spawn(launched.host.clone(), Some(launched.main), config).unwrap();
    engine.start(events.clone(), ThreadSelector::All).unwrap();
    assert!(engine.wait_for_completed_runs(1, Duration::from_secs(10)));

    let store = engine.dump().unwrap();
    let status = engine.status();
    engine.shutdown();
    launched.workers.shutdown();

    let output = tempfile::NamedTempFile::new().expect("Failed to create temp file");
    {
        let writer = BufWriter::new(File::create(output.path()).unwrap());
        CaptureExporter::new(&store, &events, backend.name(), status)
            .export(writer)
            .expect("Failed to export capture");
    }

    let json_str = std::fs::read_to_string(output.path()).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json_str).expect("Invalid JSON");

    assert_eq!(parsed["backend"], "simulated");
    assert_eq!(parsed["events"].as_array().unwrap().len(), 3);
    assert_eq!(parsed["status"]["state"], "off");
    assert_eq!(parsed["status"]["rounds"], 2);

    let records = parsed["records"].as_array().unwrap();
    assert_eq!(records.len(), pipeline.stages.len());
    for record in records {
        assert_eq!(record["thread"], 1);
        let samples = record["samples"].as_array().unwrap();
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0]["event"], "cpu-cycles");
        assert_eq!(samples[2]["event"], "task-clock");
        assert!(samples.iter().all(|s| s["dispatches"].as_u64().unwrap() > 0));
    }
}
