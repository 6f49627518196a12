mod common;
use crate::common::builders::ScenarioBuilder;

use stagedag::dag::{ConditionalEdge, StageDef, StageGraph, stage_fn};
use stagedag::errors::GraphError;
use stagedag::state::{FieldSpec, FieldType, StateUpdate};

fn noop(name: &str) -> StageDef {
    StageDef::new(name, stage_fn(|_| async { Ok(StateUpdate::new()) }))
}

#[test]
fn reference_scenario_builds() {
    let graph = ScenarioBuilder::new().build();

    assert_eq!(graph.len(), 6);
    assert_eq!(graph.entry(), "plan");
    assert_eq!(graph.terminal(), "finalize");
    assert_eq!(graph.loop_body(), ["synthesize", "review"]);
    assert!(graph.in_loop("review"));
    assert!(!graph.in_loop("fetchA"));
    assert_eq!(graph.dependents_of("plan"), ["fetchA", "fetchB"]);
    assert_eq!(graph.dependencies_of("synthesize"), ["fetchA", "fetchB"]);
    assert_eq!(graph.position_of("fetchB"), Some(2));
}

#[test]
fn empty_graph_is_rejected() {
    let err = StageGraph::builder().build().unwrap_err();
    assert_eq!(err, GraphError::Empty);
}

#[test]
fn duplicate_stage_is_rejected() {
    let err = StageGraph::builder()
        .stage(noop("a"))
        .stage(noop("a"))
        .build()
        .unwrap_err();
    assert_eq!(err, GraphError::DuplicateStage("a".into()));
}

#[test]
fn unknown_predecessor_is_rejected() {
    let err = StageGraph::builder()
        .stage(noop("a"))
        .stage(noop("b").after(["ghost"]))
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        GraphError::UnknownPredecessor {
            stage: "b".into(),
            predecessor: "ghost".into(),
        }
    );
}

#[test]
fn self_dependency_is_rejected() {
    let err = StageGraph::builder()
        .stage(noop("a"))
        .stage(noop("b").after(["a", "b"]))
        .build()
        .unwrap_err();
    assert_eq!(err, GraphError::SelfDependency("b".into()));
}

#[test]
fn dependency_cycle_is_rejected() {
    let err = StageGraph::builder()
        .stage(noop("a"))
        .stage(noop("b").after(["a", "c"]))
        .stage(noop("c").after(["b"]))
        .stage(noop("d").after(["c"]))
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphError::Cycle(_)), "{err:?}");
}

#[test]
fn multiple_entry_stages_are_rejected() {
    let err = StageGraph::builder()
        .stage(noop("a"))
        .stage(noop("b"))
        .stage(noop("c").after(["a", "b"]))
        .build()
        .unwrap_err();
    assert_eq!(err, GraphError::EntryStage(vec!["a".into(), "b".into()]));
}

#[test]
fn multiple_terminal_stages_are_rejected() {
    let err = StageGraph::builder()
        .stage(noop("a"))
        .stage(noop("b").after(["a"]))
        .stage(noop("c").after(["a"]))
        .build()
        .unwrap_err();
    assert_eq!(err, GraphError::TerminalStage(vec!["b".into(), "c".into()]));
}

#[test]
fn append_policy_requires_a_list_field() {
    let mut spec = FieldSpec::accumulating("items");
    spec.ty = FieldType::Text;

    let err = StageGraph::builder()
        .field(spec)
        .stage(noop("a"))
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphError::Schema(msg) if msg.contains("items")));
}

#[test]
fn duplicate_field_is_rejected() {
    let err = StageGraph::builder()
        .field(FieldSpec::text("draft"))
        .field(FieldSpec::flag("draft"))
        .stage(noop("a"))
        .build()
        .unwrap_err();
    assert!(matches!(err, GraphError::Schema(_)));
}

fn loop_graph(edge: ConditionalEdge) -> Result<StageGraph, GraphError> {
    StageGraph::builder()
        .field(FieldSpec::flag("accepted"))
        .field(FieldSpec::text("draft"))
        .stage(noop("start"))
        .stage(noop("write").after(["start"]))
        .stage(noop("check").after(["write"]))
        .stage(noop("done").after(["check"]))
        .conditional(edge)
        .build()
}

#[test]
fn well_formed_retry_edge_builds() {
    let graph = loop_graph(ConditionalEdge::new("check", "accepted", "done", "write")).unwrap();
    assert_eq!(graph.loop_body(), ["write", "check"]);
    assert_eq!(graph.conditional().map(|e| e.flag.as_str()), Some("accepted"));
}

#[test]
fn retry_edge_with_unknown_stage_is_rejected() {
    let err = loop_graph(ConditionalEdge::new("check", "accepted", "done", "nowhere")).unwrap_err();
    assert!(matches!(err, GraphError::InvalidConditional(msg) if msg.contains("nowhere")));
}

#[test]
fn retry_edge_flag_must_be_a_declared_bool() {
    let err = loop_graph(ConditionalEdge::new("check", "missing", "done", "write")).unwrap_err();
    assert!(matches!(err, GraphError::InvalidConditional(_)));

    let err = loop_graph(ConditionalEdge::new("check", "draft", "done", "write")).unwrap_err();
    assert!(matches!(err, GraphError::InvalidConditional(msg) if msg.contains("bool")));
}

#[test]
fn retry_target_must_lead_back_to_the_source() {
    let err = loop_graph(ConditionalEdge::new("write", "accepted", "check", "check")).unwrap_err();
    assert!(matches!(err, GraphError::InvalidConditional(_)), "{err:?}");
}

#[test]
fn accept_stage_must_follow_the_source_directly() {
    let err = loop_graph(ConditionalEdge::new("check", "accepted", "write", "start")).unwrap_err();
    assert!(matches!(err, GraphError::InvalidConditional(_)));
}
