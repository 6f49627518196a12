// src/dag/validate.rs

//! Structural validation of a stage graph.
//!
//! Everything here runs once, at build time. A graph that passes these checks
//! can be executed without the executor ever having to re-check topology.

use std::collections::HashSet;

use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graphmap::DiGraphMap;

use crate::dag::graph::ConditionalEdge;
use crate::dag::stage::StageDef;
use crate::errors::GraphError;
use crate::state::{FieldType, StateSchema};
use crate::types::{MergePolicy, StageName};

pub(crate) fn validate_stages(stages: &[StageDef]) -> Result<(), GraphError> {
    ensure_has_stages(stages)?;
    ensure_unique_names(stages)?;
    validate_predecessors(stages)?;
    validate_acyclic(stages)?;
    Ok(())
}

fn ensure_has_stages(stages: &[StageDef]) -> Result<(), GraphError> {
    if stages.is_empty() {
        return Err(GraphError::Empty);
    }
    Ok(())
}

fn ensure_unique_names(stages: &[StageDef]) -> Result<(), GraphError> {
    let mut seen = HashSet::new();
    for def in stages {
        if !seen.insert(def.name.as_str()) {
            return Err(GraphError::DuplicateStage(def.name.clone()));
        }
    }
    Ok(())
}

fn validate_predecessors(stages: &[StageDef]) -> Result<(), GraphError> {
    let names: HashSet<&str> = stages.iter().map(|d| d.name.as_str()).collect();

    for def in stages {
        for dep in &def.after {
            if dep == &def.name {
                return Err(GraphError::SelfDependency(def.name.clone()));
            }
            if !names.contains(dep.as_str()) {
                return Err(GraphError::UnknownPredecessor {
                    stage: def.name.clone(),
                    predecessor: dep.clone(),
                });
            }
        }
    }
    Ok(())
}

/// Edge direction: dependency -> dependent.
///
/// The retry edge is not part of this graph; it is carried separately by
/// [`ConditionalEdge`], so a retry loop never shows up as a cycle here.
pub(crate) fn dependency_graph(stages: &[StageDef]) -> DiGraphMap<&str, ()> {
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for def in stages {
        graph.add_node(def.name.as_str());
    }
    for def in stages {
        for dep in &def.after {
            graph.add_edge(dep.as_str(), def.name.as_str(), ());
        }
    }
    graph
}

fn validate_acyclic(stages: &[StageDef]) -> Result<(), GraphError> {
    let graph = dependency_graph(stages);

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(GraphError::Cycle(cycle.node_id().to_string())),
    }
}

/// The single stage with no predecessors.
pub(crate) fn find_entry(stages: &[StageDef]) -> Result<StageName, GraphError> {
    let entries: Vec<StageName> = stages
        .iter()
        .filter(|d| d.after.is_empty())
        .map(|d| d.name.clone())
        .collect();

    match entries.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(GraphError::EntryStage(entries)),
    }
}

/// The single stage no other stage depends on.
pub(crate) fn find_terminal(stages: &[StageDef]) -> Result<StageName, GraphError> {
    let has_dependents: HashSet<&str> = stages
        .iter()
        .flat_map(|d| d.after.iter().map(String::as_str))
        .collect();

    let terminals: Vec<StageName> = stages
        .iter()
        .filter(|d| !has_dependents.contains(d.name.as_str()))
        .map(|d| d.name.clone())
        .collect();

    match terminals.as_slice() {
        [single] => Ok(single.clone()),
        _ => Err(GraphError::TerminalStage(terminals)),
    }
}

/// Validate the retry edge and return the stages of its loop body, in
/// declaration order.
///
/// The loop body is every stage that lies on a path from the retry target to
/// the conditional source (both inclusive). Those are the stages whose
/// completion marks are cleared when the edge takes the retry branch.
pub(crate) fn validate_conditional(
    edge: &ConditionalEdge,
    stages: &[StageDef],
    schema: &StateSchema,
) -> Result<Vec<StageName>, GraphError> {
    let find = |name: &str| stages.iter().find(|d| d.name == name);
    let invalid = |msg: String| Err(GraphError::InvalidConditional(msg));

    let Some(source) = find(&edge.source) else {
        return invalid(format!("unknown source stage '{}'", edge.source));
    };
    let Some(retry) = find(&edge.retry) else {
        return invalid(format!("unknown retry stage '{}'", edge.retry));
    };
    let Some(accept) = find(&edge.accept) else {
        return invalid(format!("unknown accept stage '{}'", edge.accept));
    };

    if accept.after != [edge.source.clone()] {
        return invalid(format!(
            "accept stage '{}' must depend on exactly '{}'",
            edge.accept, edge.source
        ));
    }

    let source_dependents: Vec<&str> = stages
        .iter()
        .filter(|d| d.after.contains(&edge.source))
        .map(|d| d.name.as_str())
        .collect();
    if source_dependents != [edge.accept.as_str()] {
        return invalid(format!(
            "source stage '{}' may only lead to '{}', found {:?}",
            edge.source, edge.accept, source_dependents
        ));
    }

    match schema.get(&edge.flag) {
        Some(spec) if spec.ty == FieldType::Bool && spec.policy == MergePolicy::LastWriterWins => {}
        Some(_) => {
            return invalid(format!(
                "flag '{}' must be a last-writer-wins bool field",
                edge.flag
            ));
        }
        None => return invalid(format!("flag '{}' is not a declared field", edge.flag)),
    }

    let graph = dependency_graph(stages);
    let (retry, source) = (retry.name.as_str(), source.name.as_str());
    if !has_path_connecting(&graph, retry, source, None) {
        return invalid(format!(
            "retry stage '{}' does not lead to source stage '{}'",
            edge.retry, edge.source
        ));
    }

    let loop_body: Vec<StageName> = stages
        .iter()
        .map(|d| d.name.as_str())
        .filter(|&name| {
            has_path_connecting(&graph, retry, name, None)
                && has_path_connecting(&graph, name, source, None)
        })
        .map(str::to_string)
        .collect();

    // A stage outside the loop that hangs off a stage inside it would run
    // once after the first pass and never again.
    for def in stages {
        if loop_body.contains(&def.name) || def.name == edge.accept {
            continue;
        }
        if let Some(dep) = def.after.iter().find(|dep| loop_body.contains(*dep)) {
            return invalid(format!(
                "stage '{}' depends on '{}' inside the retry loop",
                def.name, dep
            ));
        }
    }

    Ok(loop_body)
}
