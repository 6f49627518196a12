mod common;
use crate::common::builders::{ScenarioBuilder, names};
use crate::common::scripted::FlagSequence;
use crate::common::{init_tracing, with_timeout};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use stagedag::engine::{EngineConfig, RunController, RunEvent, RunRequest, StageStatus};
use stagedag::types::RunStatus;

fn controller() -> RunController {
    let graph = ScenarioBuilder::new()
        .review(FlagSequence::new("accepted", [false, true]))
        .build();
    RunController::new(graph, EngineConfig::default())
}

#[tokio::test]
async fn events_are_sequenced_and_end_with_one_terminal_event() {
    init_tracing();

    let mut request = RunRequest::new().set("query", "X");
    let stream = request.subscribe();
    let report = with_timeout(controller().run(request)).await.expect("run");
    let events = with_timeout(stream.collect()).await;

    assert_eq!(events, report.events);

    let seqs: Vec<u64> = events.iter().map(RunEvent::seq).collect();
    let expected: Vec<u64> = (0..events.len() as u64).collect();
    assert_eq!(seqs, expected);

    assert_eq!(events.iter().filter(|e| e.is_terminal()).count(), 1);
    let Some(RunEvent::Finished(finished)) = events.last() else {
        panic!("last event must be terminal");
    };
    assert_eq!(finished.status, RunStatus::Completed);
    assert_eq!(finished.run_id, report.run_id);
    assert_eq!(finished.path, report.path);
    assert_eq!(finished.iterations, 1);
    assert!(finished.error.is_none());

    let stamps: Vec<_> = events
        .iter()
        .filter_map(RunEvent::as_progress)
        .map(|e| e.timestamp)
        .collect();
    assert!(stamps.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test]
async fn progress_events_follow_the_recorded_path() {
    init_tracing();

    let report = with_timeout(controller().run(RunRequest::new().set("query", "X")))
        .await
        .expect("run");

    let stages: Vec<&str> = report.progress_events().map(|e| e.stage.as_str()).collect();
    assert_eq!(stages, report.path);

    let reviews: Vec<(u32, &str)> = report
        .progress_events()
        .filter(|e| e.stage == names::REVIEW)
        .map(|e| (e.iteration, e.summary.as_str()))
        .collect();
    assert_eq!(reviews, [(0, "RETRY"), (1, "PASSED")]);
    assert!(
        report
            .progress_events()
            .all(|e| e.status == StageStatus::Succeeded && e.elapsed_secs >= 0.0)
    );
}

#[tokio::test]
async fn every_subscriber_sees_the_same_trace() {
    init_tracing();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);

    let mut request = RunRequest::new()
        .set("query", "X")
        .with_subscriber(move |event: &RunEvent| {
            sink.lock().unwrap().push(event.clone());
        });
    let first = request.subscribe();
    let second = request.subscribe();

    let report = with_timeout(controller().run(request)).await.expect("run");
    let first = with_timeout(first.collect()).await;
    let second = with_timeout(second.collect()).await;

    assert_eq!(first, report.events);
    assert_eq!(second, report.events);
    assert_eq!(*seen.lock().unwrap(), report.events);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn run_returns_only_after_slow_subscribers_drain() {
    init_tracing();

    let delivered = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&delivered);

    let request = RunRequest::new()
        .set("query", "X")
        .with_subscriber(move |_: &RunEvent| {
            std::thread::sleep(Duration::from_millis(30));
            counter.fetch_add(1, Ordering::SeqCst);
        });

    let report = with_timeout(controller().run(request)).await.expect("run");

    assert!(report.is_completed());
    assert_eq!(delivered.load(Ordering::SeqCst), report.events.len());
}

#[tokio::test]
async fn dropped_subscriber_does_not_disturb_the_run() {
    init_tracing();

    let mut request = RunRequest::new().set("query", "X");
    drop(request.subscribe());
    let kept = request.subscribe();

    let report = with_timeout(controller().run(request)).await.expect("run");
    let events = with_timeout(kept.collect()).await;

    assert!(report.is_completed());
    assert_eq!(events.len(), report.events.len());
}

#[tokio::test]
async fn run_id_is_generated_or_taken_from_the_request() {
    init_tracing();

    let generated = with_timeout(controller().run(RunRequest::new().set("query", "X")))
        .await
        .expect("run");
    assert_eq!(generated.run_id.len(), 36, "uuid v4: {}", generated.run_id);

    let named = with_timeout(
        controller().run(RunRequest::new().set("query", "X").run_id("report-42")),
    )
    .await
    .expect("run");
    assert_eq!(named.run_id, "report-42");
}

#[tokio::test]
async fn terminal_event_serializes_with_a_type_tag() {
    init_tracing();

    let report = with_timeout(controller().run(RunRequest::new().set("query", "X")))
        .await
        .expect("run");

    let json = serde_json::to_value(report.events.last().expect("terminal")).unwrap();
    assert_eq!(json["type"], "finished");
    assert_eq!(json["status"], "completed");

    let report_json = serde_json::to_value(&report).unwrap();
    assert_eq!(report_json["state"]["query"], "X");
    assert!(report_json["error"].is_null());
}
