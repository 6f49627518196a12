mod common;
use crate::common::builders::{ScenarioBuilder, names};
use crate::common::scripted::ScriptedStage;
use crate::common::{init_tracing, with_timeout};

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;
use stagedag::engine::{EngineConfig, RunController, RunEvent, RunRequest, StageStatus};
use stagedag::errors::RunError;
use stagedag::state::StateUpdate;
use stagedag::types::RunStatus;

fn slow_fetches(delay_ms: u64) -> ScenarioBuilder {
    ScenarioBuilder::new()
        .fetch_a(
            ScriptedStage::writes(StateUpdate::new().append("items", [json!("a")]))
                .delay_ms(delay_ms),
        )
        .fetch_b(
            ScriptedStage::writes(StateUpdate::new().append("items", [json!("b")]))
                .delay_ms(delay_ms),
        )
}

#[tokio::test]
async fn cancel_after_first_wave_keeps_only_first_wave_output() {
    init_tracing();

    let controller = RunController::new(slow_fetches(300).build(), EngineConfig::default());
    let mut request = RunRequest::new().set("query", "X");
    let mut stream = request.subscribe();
    let handle = controller.start(request).expect("run starts");

    // Wait for plan (wave 1) to be merged, then cancel during wave 2.
    with_timeout(async {
        while let Some(event) = stream.recv().await {
            if let RunEvent::Progress(e) = &event
                && e.stage == names::PLAN
            {
                break;
            }
        }
    })
    .await;
    handle.cancel();

    let report = with_timeout(handle.join()).await.expect("join");

    assert_eq!(report.status, RunStatus::Failed);
    assert_eq!(report.error, Some(RunError::Cancelled));
    assert_eq!(report.state.text("plan"), Some("plan for X"));
    assert_eq!(report.list_len("items"), 0);
    assert!(!report.state.contains("draft"));
    assert_eq!(report.path, ["plan"]);
    assert!(report.events.last().is_some_and(RunEvent::is_terminal));
}

#[tokio::test]
async fn non_cooperative_stages_are_aborted() {
    init_tracing();

    let graph = ScenarioBuilder::new()
        .fetch_a(ScriptedStage::new().delay(Duration::from_secs(30)).ignore_cancel())
        .fetch_b(ScriptedStage::new().delay(Duration::from_secs(30)).ignore_cancel())
        .build();
    let controller = RunController::new(graph, EngineConfig::default());
    let handle = controller
        .start(RunRequest::new().set("query", "X"))
        .expect("run starts");

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();

    // with_timeout fails the test if the wave waited for the sleeps.
    let report = with_timeout(handle.join()).await.expect("join");

    assert_eq!(report.error, Some(RunError::Cancelled));
    assert_eq!(report.list_len("items"), 0);
    assert!(report.elapsed < Duration::from_secs(5));
}

#[tokio::test]
async fn cancel_before_any_wave_runs_nothing() {
    init_tracing();

    let plan = ScriptedStage::new();
    let plan_calls = plan.calls();
    let controller = RunController::new(
        ScenarioBuilder::new().plan(plan).build(),
        EngineConfig::default(),
    );

    let mut request = RunRequest::new().set("query", "X");
    let stream = request.subscribe();
    let handle = controller.start(request).expect("run starts");
    handle.cancel();

    let report = with_timeout(handle.join()).await.expect("join");
    let events = with_timeout(stream.collect()).await;

    // The spawned run may or may not have polled before the cancel landed.
    assert_eq!(report.error, Some(RunError::Cancelled));
    assert!(plan_calls.load(Ordering::SeqCst) <= 1);
    assert!(!report.state.contains("draft"));
    assert_eq!(events.last().map(RunEvent::is_terminal), Some(true));
}

#[tokio::test]
async fn cancelled_wave_siblings_are_reported_as_discarded() {
    init_tracing();

    // fetchA returns quickly, fetchB is still running when the run is cancelled.
    let graph = ScenarioBuilder::new()
        .fetch_a(ScriptedStage::writes(StateUpdate::new().append("items", [json!("a")])))
        .fetch_b(ScriptedStage::new().delay_ms(2_000))
        .build();
    let controller = RunController::new(graph, EngineConfig::default());
    let mut request = RunRequest::new().set("query", "X");
    let mut stream = request.subscribe();
    let handle = controller.start(request).expect("run starts");

    with_timeout(async {
        while let Some(event) = stream.recv().await {
            if matches!(&event, RunEvent::Progress(e) if e.stage == names::PLAN) {
                break;
            }
        }
    })
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.cancel();

    let report = with_timeout(handle.join()).await.expect("join");

    assert_eq!(report.error, Some(RunError::Cancelled));
    assert_eq!(report.list_len("items"), 0, "partial wave must not be merged");
    let fetch_a = report
        .progress_events()
        .find(|e| e.stage == names::FETCH_A)
        .expect("fetchA finished before the cancel");
    assert_eq!(fetch_a.status, StageStatus::Discarded);
}
