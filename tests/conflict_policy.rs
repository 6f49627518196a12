mod common;
use crate::common::builders::{ScenarioBuilder, names};
use crate::common::scripted::ScriptedStage;
use crate::common::{init_tracing, run_graph};

use serde_json::json;
use stagedag::engine::{EngineConfig, FieldConflict};
use stagedag::errors::{MergeError, RunError};
use stagedag::state::StateUpdate;
use stagedag::types::ConflictPolicy;

/// Both fetches overwrite `plan`; fetchA finishes last.
fn conflicting(a: &str, b: &str) -> ScenarioBuilder {
    ScenarioBuilder::new()
        .fetch_a(
            ScriptedStage::writes(
                StateUpdate::new()
                    .set("plan", a)
                    .append("items", [json!("a")]),
            )
            .delay_ms(40),
        )
        .fetch_b(ScriptedStage::writes(
            StateUpdate::new()
                .set("plan", b)
                .append("items", [json!("b")]),
        ))
}

#[tokio::test]
async fn last_writer_wins_keeps_the_later_declared_stage() {
    init_tracing();

    let report = run_graph(
        conflicting("from a", "from b").build(),
        EngineConfig::default().with_conflict_policy(ConflictPolicy::LastWriterWins),
    )
    .await;

    assert!(report.is_completed());
    assert_eq!(report.state.text("plan"), Some("from b"));
    assert_eq!(
        report.conflicts,
        [FieldConflict {
            field: "plan".into(),
            first: names::FETCH_A.into(),
            second: names::FETCH_B.into(),
            iteration: 0,
        }]
    );
    assert_eq!(report.state.list("items"), [json!("a"), json!("b")]);
}

#[tokio::test]
async fn identical_writes_are_not_a_conflict() {
    init_tracing();

    let report = run_graph(
        conflicting("same", "same").build(),
        EngineConfig::default().with_conflict_policy(ConflictPolicy::Error),
    )
    .await;

    assert!(report.is_completed());
    assert!(report.conflicts.is_empty());
    assert_eq!(report.state.text("plan"), Some("same"));
}

#[tokio::test]
async fn error_policy_fails_the_run_without_merging_the_wave() {
    init_tracing();

    let report = run_graph(
        conflicting("from a", "from b").build(),
        EngineConfig::default().with_conflict_policy(ConflictPolicy::Error),
    )
    .await;

    assert!(!report.is_completed());
    assert_eq!(
        report.error,
        Some(RunError::Merge {
            stage: names::FETCH_B.into(),
            source: MergeError::Conflict {
                field: "plan".into(),
                first: names::FETCH_A.into(),
                second: names::FETCH_B.into(),
            },
        })
    );
    // Wave 1 output survives, wave 2 is not applied at all.
    assert_eq!(report.state.text("plan"), Some("plan for X"));
    assert_eq!(report.list_len("items"), 0);
}

#[tokio::test]
async fn appends_never_conflict() {
    init_tracing();

    let graph = ScenarioBuilder::new()
        .fetch_a(ScriptedStage::writes(
            StateUpdate::new().append("items", [json!(1), json!(2)]),
        ))
        .fetch_b(ScriptedStage::writes(StateUpdate::new().append("items", [json!(3)])))
        .build();

    let report = run_graph(
        graph,
        EngineConfig::default().with_conflict_policy(ConflictPolicy::Error),
    )
    .await;

    assert!(report.is_completed());
    assert_eq!(report.state.list("items"), [json!(1), json!(2), json!(3)]);
}
