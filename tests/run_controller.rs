mod common;
use crate::common::builders::ScenarioBuilder;
use crate::common::scripted::FlagSequence;
use crate::common::{init_tracing, with_timeout};

use std::sync::Arc;

use stagedag::dag::StageGraph;
use stagedag::engine::{EngineConfig, MAX_ITERATIONS_LIMIT, RunController, RunRequest};
use stagedag::errors::{MergeError, StagedagError};
use stagedag::state::StateUpdate;

#[tokio::test]
async fn initial_values_must_match_the_schema() {
    init_tracing();

    let controller = RunController::new(ScenarioBuilder::new().build(), EngineConfig::default());

    let err = controller
        .start(RunRequest::new().set("query", "X").set("session", "s-1"))
        .unwrap_err();
    assert!(matches!(
        err,
        StagedagError::InvalidInput(MergeError::UnknownField(ref f)) if f == "session"
    ));

    let err = controller
        .start(RunRequest::new().set("query", 42i64))
        .unwrap_err();
    assert!(matches!(
        err,
        StagedagError::InvalidInput(MergeError::TypeMismatch { .. })
    ));
}

#[tokio::test]
async fn ceiling_above_limit_is_refused() {
    init_tracing();

    let controller = RunController::new(ScenarioBuilder::new().build(), EngineConfig::default());
    let err = controller
        .start(RunRequest::new().max_iterations(MAX_ITERATIONS_LIMIT + 1))
        .unwrap_err();
    assert!(matches!(err, StagedagError::ConfigError(_)));
}

#[tokio::test]
async fn initial_update_seeds_the_state() {
    init_tracing();

    let controller = RunController::new(ScenarioBuilder::new().build(), EngineConfig::default());
    let report = with_timeout(controller.run(
        RunRequest::new().initial(StateUpdate::new().set("query", "seeded")),
    ))
    .await
    .expect("run");

    assert_eq!(report.state.text("query"), Some("seeded"));
    assert_eq!(report.state.text("plan"), Some("plan for seeded"));
}

#[tokio::test]
async fn concurrent_runs_do_not_share_state() {
    init_tracing();

    let graph: Arc<StageGraph> = Arc::new(
        ScenarioBuilder::new()
            .review(FlagSequence::new("accepted", [false, true]))
            .build(),
    );
    let controller = RunController::new(graph, EngineConfig::default());

    let first = controller.start(RunRequest::new().set("query", "one")).expect("start");
    let second = controller.start(RunRequest::new().set("query", "two")).expect("start");
    assert_ne!(first.run_id(), second.run_id());

    let first = with_timeout(first.join()).await.expect("join");
    let second = with_timeout(second.join()).await.expect("join");

    assert_eq!(first.state.text("plan"), Some("plan for one"));
    assert_eq!(second.state.text("plan"), Some("plan for two"));
    assert_eq!(first.list_len("items"), 2);
    assert_eq!(second.list_len("items"), 2);
    assert!(first.is_completed() && second.is_completed());
}
