mod common;
use crate::common::builders::ConfigFileBuilder;
use crate::common::{init_tracing, with_timeout};

use std::time::Duration;

use stagedag::engine::{EngineConfig, RunController, RunReport};
use stagedag::pipeline::simulated::SimulatedWorld;
use stagedag::pipeline::stage_names::*;
use stagedag::pipeline::{AnalysisRequest, AnalysisSummary, analysis_graph, fields};

async fn analyse(world: &SimulatedWorld, request: AnalysisRequest, max_iterations: u32) -> RunReport {
    let cfg = ConfigFileBuilder::new().with_max_iterations(max_iterations).build();
    let graph = analysis_graph(&world.collaborators(), &cfg.pipeline).expect("valid graph");
    let engine = EngineConfig::from_config(&cfg)
        .for_graph(&graph)
        .expect("config fits graph");

    let controller = RunController::new(graph, engine);
    with_timeout(controller.run(request.into_run_request()))
        .await
        .expect("run")
}

#[tokio::test]
async fn accepted_first_draft_runs_straight_through() {
    init_tracing();

    let world = SimulatedWorld::new(0);
    let report = analyse(&world, AnalysisRequest::new("smart pet feeder"), 3).await;

    assert!(report.is_completed(), "{:?}", report.error);
    assert_eq!(
        report.path,
        [PLAN, FETCH_PATENTS, FETCH_TRENDS, SYNTHESIZE, REVIEW, FINALIZE]
    );
    assert_eq!(report.iterations, 0);
    assert_eq!(world.model.reviews(), 1);

    // Three keywords, two hits each, one hit shared by all of them.
    assert_eq!(report.list_len(fields::SEARCH_KEYWORDS), 3);
    assert_eq!(report.list_len(fields::PATENTS), 4);
    assert_eq!(report.list_len(fields::TREND_SUMMARIES), 3);
    assert_eq!(report.list_len(fields::TRENDS), 36);
    assert!(
        report
            .state
            .text(fields::TREND_ANALYSIS)
            .is_some_and(|t| t.starts_with("## Trend summary"))
    );

    let final_report = report.state.text(fields::FINAL_REPORT).expect("final report");
    assert!(final_report.contains("Draft 1 for smart pet feeder"));
}

#[tokio::test]
async fn rejected_drafts_are_redrafted_with_feedback() {
    init_tracing();

    let world = SimulatedWorld::new(2);
    let report = analyse(&world, AnalysisRequest::new("solar roof tiles"), 3).await;

    assert!(report.is_completed());
    assert!(!report.forced_pass);
    assert_eq!(report.iterations, 2);
    assert_eq!(report.runs_of(SYNTHESIZE), 3);
    assert_eq!(world.model.reviews(), 3);
    assert_eq!(report.state.flag(fields::ACCEPTED), Some(true));

    let final_report = report.state.text(fields::FINAL_REPORT).expect("final report");
    assert!(final_report.contains("Draft 3"));
    assert!(final_report.contains("Feedback from previous review"));
    // Fetches are outside the loop: patents were gathered once.
    assert_eq!(report.list_len(fields::PATENTS), 4);

    let saved = world.reports.saved().await;
    assert_eq!(saved.len(), 1);
    assert!(!saved[0].forced);
}

#[tokio::test]
async fn stubborn_reviewer_is_forced_through_with_the_last_draft() {
    init_tracing();

    let world = SimulatedWorld::new(10);
    let report = analyse(&world, AnalysisRequest::new("drone delivery"), 2).await;

    assert!(report.is_completed());
    assert!(report.forced_pass);
    assert_eq!(report.iterations, 2);
    assert_eq!(world.model.reviews(), 3);

    let saved = world.reports.saved().await;
    assert_eq!(saved.len(), 1);
    assert!(saved[0].forced);
    assert!(saved[0].final_report.contains("Draft 3 for drone delivery"));
    assert_eq!(
        report.state.text(fields::FINAL_REPORT),
        Some(saved[0].final_report.as_str())
    );
}

#[tokio::test]
async fn finalize_remembers_the_run_for_the_next_one() {
    init_tracing();

    let world = SimulatedWorld::new(0);
    let mut first = AnalysisRequest::new("heat pumps");
    first.user_id = Some("u-1".into());
    analyse(&world, first, 3).await;

    let entries = world.memory.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].user_id, "u-1");
    assert_eq!(entries[0].patent_count, 4);

    let mut second = AnalysisRequest::new("geothermal drilling");
    second.user_id = Some("u-1".into());
    let report = analyse(&world, second, 3).await;

    let memory = report.state.text(fields::MEMORY_CONTEXT).expect("memory context");
    assert!(memory.contains("[heat pumps]"), "{memory}");
}

#[tokio::test]
async fn report_id_doubles_as_run_id() {
    init_tracing();

    let world = SimulatedWorld::new(0);
    let mut request = AnalysisRequest::new("e-bikes");
    request.report_id = Some("rep-7".into());
    request.extra_context = Some("EU market only".into());

    let report = analyse(&world, request, 3).await;
    let summary = AnalysisSummary::from(&report);

    assert_eq!(report.run_id, "rep-7");
    assert_eq!(summary.report_id, "rep-7");
    assert_eq!(summary.query, "e-bikes");
    assert_eq!(summary.patent_count, 4);
    assert_eq!(summary.trend_keywords, 3);
    assert!(
        summary
            .final_report
            .as_deref()
            .is_some_and(|r| r.contains("EU market only"))
    );

    let saved = world.reports.saved().await;
    assert_eq!(saved[0].report_id.as_deref(), Some("rep-7"));
}

#[tokio::test]
async fn fetch_stages_overlap() {
    init_tracing();

    let world = SimulatedWorld::with_latency(0, Duration::from_millis(100));
    let report = analyse(&world, AnalysisRequest::new("vertical farming"), 3).await;

    assert!(report.is_completed());
    let fetch_events: Vec<_> = report
        .progress_events()
        .filter(|e| e.stage == FETCH_PATENTS || e.stage == FETCH_TRENDS)
        .collect();
    assert_eq!(fetch_events.len(), 2);
    // Patent fetch alone is three searches plus an analysis call.
    assert!(fetch_events[0].elapsed_secs >= 0.35);
    assert!(fetch_events[1].elapsed_secs < 0.35);
}
