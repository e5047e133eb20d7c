//! Scheduling loop tests against in-memory sources and peripheral

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use gattboard_core::{
    chunking, DataSnapshot, EngineState, FallbackSource, MemoryPeripheral, Phase, PrimarySource,
    RecordingNotifier, RefreshPipeline, Result, StopSignal, SyncConfig, SyncEngine, SyncError,
};
use serde_json::{json, Value};

// ----------------------------------------------------------------------------
// Test Sources
// ----------------------------------------------------------------------------

/// Serves a scripted sequence of documents; the last one repeats.
/// Sets the stop signal once `stop_after` fetches have happened.
struct ScriptedPrimary {
    responses: Mutex<Vec<Result<Value>>>,
    fetches: AtomicUsize,
    stop: StopSignal,
    stop_after: usize,
}

impl ScriptedPrimary {
    fn new(responses: Vec<Result<Value>>, stop: StopSignal, stop_after: usize) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            fetches: AtomicUsize::new(0),
            stop,
            stop_after,
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PrimarySource for ScriptedPrimary {
    async fn fetch(&self) -> Result<DataSnapshot> {
        let count = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        if count >= self.stop_after {
            self.stop.set();
        }

        let next = {
            let mut responses = self.responses.lock().unwrap();
            if responses.len() > 1 {
                responses.remove(0)
            } else {
                match &responses[0] {
                    Ok(doc) => Ok(doc.clone()),
                    Err(e) => Err(SyncError::source_unavailable(e)),
                }
            }
        };
        DataSnapshot::from_value(next?)
    }
}

struct FixedFallback {
    calls: AtomicUsize,
}

impl FixedFallback {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FallbackSource for FixedFallback {
    async fn departures(&self, lines: &[String], count: usize) -> Result<BTreeMap<String, String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        assert_eq!(count, 3);
        Ok(lines
            .iter()
            .map(|line| {
                let times = match line.as_str() {
                    "197" => "07:15|07:30|07:45",
                    "201" => "08:10|08:20|08:40",
                    _ => "",
                };
                (line.clone(), times.to_string())
            })
            .collect())
    }
}

// ----------------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------------

fn config() -> SyncConfig {
    SyncConfig::new().with_refresh_interval(Duration::from_secs(1))
}

struct Harness {
    engine: SyncEngine,
    primary: Arc<ScriptedPrimary>,
    fallback: Arc<FixedFallback>,
    notifier: Arc<RecordingNotifier>,
    central: gattboard_core::MemoryCentral,
}

fn harness(responses: Vec<Result<Value>>, stop_after: usize, stop: StopSignal) -> Harness {
    harness_with(responses, stop_after, stop, MemoryPeripheral::new())
}

fn harness_with(
    responses: Vec<Result<Value>>,
    stop_after: usize,
    stop: StopSignal,
    peripheral: MemoryPeripheral,
) -> Harness {
    let config = config();
    let primary = ScriptedPrimary::new(responses, stop.clone(), stop_after);
    let fallback = FixedFallback::new();
    let notifier = Arc::new(RecordingNotifier::new());
    let central = peripheral.central();

    let pipeline = RefreshPipeline::new(primary.clone(), fallback.clone(), &config);
    let engine = SyncEngine::new(
        &config,
        pipeline,
        Box::new(peripheral),
        notifier.clone(),
        stop,
    );

    Harness {
        engine,
        primary,
        fallback,
        notifier,
        central,
    }
}

fn published_document(central: &gattboard_core::MemoryCentral) -> Value {
    let payload = chunking::reassemble(&central.read_all());
    serde_json::from_slice(&payload).expect("published slots do not form valid JSON")
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[tokio::test]
async fn test_cycle_publishes_merged_snapshot() {
    let mut h = harness(
        vec![Ok(json!({"attributes": {"bus_197": "", "bus_201": "08:00"}}))],
        1,
        StopSignal::cooperative(),
    );

    let exit = h.engine.run().await.unwrap();

    assert_eq!(exit.cycles, 1);
    assert_eq!(exit.exit_code(), 0);
    assert_eq!(h.fallback.calls.load(Ordering::SeqCst), 1);
    assert_eq!(
        published_document(&h.central),
        json!({"attributes": {"bus_197": "07:15|07:30|07:45", "bus_201": "08:00"}})
    );
}

#[tokio::test]
async fn test_large_snapshot_spans_several_slots() {
    let filler = "x".repeat(700);
    let doc = json!({"attributes": {"bus_197": "07:00", "notes": filler}});
    let mut h = harness(vec![Ok(doc.clone())], 1, StopSignal::cooperative());

    h.engine.run().await.unwrap();

    let payload_len = serde_json::to_vec(&doc).unwrap().len();
    let slots = h.central.read_all();
    assert_eq!(slots.len(), 5);
    assert_eq!(slots[0].len(), 240);
    assert_eq!(
        slots.iter().filter(|s| !s.is_empty()).count(),
        chunking::chunk_count(payload_len, 240)
    );
    assert_eq!(published_document(&h.central), doc);
    assert_eq!(h.fallback.calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_stop_signal_stops_engine_and_peripheral() {
    let mut h = harness(
        vec![Ok(json!({"attributes": {"bus_197": "07:00"}}))],
        1,
        StopSignal::cooperative(),
    );
    assert_eq!(h.engine.state(), EngineState::Idle);

    h.engine.run().await.unwrap();

    assert_eq!(h.engine.state(), EngineState::Stopped);
    assert!(h.central.is_stopped());
    assert!(!h.central.is_advertising());
    assert_eq!(h.notifier.messages().last().map(String::as_str), Some("STOPPING=1"));
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_after_every_successful_cycle() {
    let mut h = harness(
        vec![Ok(json!({"attributes": {"bus_197": "07:00"}}))],
        3,
        StopSignal::cooperative(),
    );

    let exit = h.engine.run().await.unwrap();

    assert_eq!(exit.cycles, 3);
    assert_eq!(h.primary.fetches(), 3);
    assert_eq!(h.notifier.heartbeats(), 3);
    assert_eq!(h.notifier.messages()[0], "READY=1");
}

#[tokio::test(start_paused = true)]
async fn test_threaded_stop_signal_ends_run() {
    let mut h = harness(
        vec![Ok(json!({"attributes": {"bus_197": "07:00"}}))],
        2,
        StopSignal::threaded(),
    );

    let exit = h.engine.run().await.unwrap();

    assert_eq!(exit.cycles, 2);
    assert_eq!(h.engine.state(), EngineState::Stopped);
}

#[tokio::test]
async fn test_primary_failure_is_fatal_without_retry() {
    let mut h = harness(
        vec![Err(SyncError::source_unavailable("HTTP status server error (500)"))],
        usize::MAX,
        StopSignal::cooperative(),
    );

    let fatal = h.engine.run().await.unwrap_err();

    assert_eq!(fatal.phase, Phase::Refresh);
    assert_eq!(fatal.cycle, 1);
    assert_eq!(fatal.exit_code(), 1);
    assert!(matches!(fatal.source, SyncError::SourceUnavailable { .. }));
    assert_eq!(h.primary.fetches(), 1);
    assert_eq!(h.engine.state(), EngineState::Failed);
    assert_eq!(h.notifier.heartbeats(), 0);
    assert!(h.central.read_all().iter().all(Vec::is_empty));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_snapshot_is_fatal_and_keeps_previous_values() {
    let small = json!({"attributes": {"bus_197": "07:00"}});
    let huge = json!({"attributes": {"bus_197": "07:00", "notes": "y".repeat(1300)}});
    let mut h = harness(
        vec![Ok(small.clone()), Ok(huge)],
        usize::MAX,
        StopSignal::cooperative(),
    );

    let fatal = h.engine.run().await.unwrap_err();

    assert_eq!(fatal.phase, Phase::Chunking);
    assert_eq!(fatal.cycle, 2);
    assert!(matches!(
        fatal.source,
        SyncError::CapacityExceeded { slots: 5, .. }
    ));
    assert_eq!(published_document(&h.central), small);
    assert_eq!(h.notifier.heartbeats(), 1);
    assert_eq!(h.engine.cycles(), 1);
}

#[tokio::test]
async fn test_registration_failure_is_fatal_at_startup() {
    let mut h = harness_with(
        vec![Ok(json!({"attributes": {}}))],
        usize::MAX,
        StopSignal::cooperative(),
        MemoryPeripheral::failing(),
    );

    let fatal = h.engine.run().await.unwrap_err();

    assert_eq!(fatal.phase, Phase::Startup);
    assert_eq!(fatal.cycle, 0);
    assert_eq!(h.primary.fetches(), 0);
    assert_eq!(h.engine.state(), EngineState::Failed);
}

#[tokio::test]
async fn test_run_cycle_requires_registration() {
    let mut h = harness(
        vec![Ok(json!({"attributes": {}}))],
        usize::MAX,
        StopSignal::cooperative(),
    );

    let fatal = h.engine.run_cycle().await.unwrap_err();

    assert_eq!(fatal.phase, Phase::Publish);
    assert_eq!(h.primary.fetches(), 0);
}

#[tokio::test]
async fn test_stop_set_before_run_is_cleared() {
    let stop = StopSignal::cooperative();
    stop.set();
    let mut h = harness(vec![Ok(json!({"attributes": {"bus_197": "07:00"}}))], 1, stop);

    let exit = h.engine.run().await.unwrap();

    assert_eq!(exit.cycles, 1);
}
