// src/dag/graph.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::dag::stage::{Stage, StageDef};
use crate::dag::validate;
use crate::errors::GraphError;
use crate::state::{FieldSpec, StateSchema};
use crate::types::StageName;

/// The one sanctioned back-edge of a graph.
///
/// After `source` completes, the executor reads the bool field `flag`:
/// `true` releases `accept`; `false` sends the run back to `retry`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionalEdge {
    pub source: StageName,
    pub flag: String,
    pub accept: StageName,
    pub retry: StageName,
}

impl ConditionalEdge {
    pub fn new(
        source: impl Into<StageName>,
        flag: impl Into<String>,
        accept: impl Into<StageName>,
        retry: impl Into<StageName>,
    ) -> Self {
        Self {
            source: source.into(),
            flag: flag.into(),
            accept: accept.into(),
            retry: retry.into(),
        }
    }
}

/// Internal node structure: stores immediate deps and dependents.
struct StageNode {
    /// Position in declaration order; also the merge order within a wave.
    position: usize,
    deps: Vec<StageName>,
    dependents: Vec<StageName>,
    stage: Arc<dyn Stage>,
    timeout: Option<Duration>,
}

impl fmt::Debug for StageNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageNode")
            .field("position", &self.position)
            .field("deps", &self.deps)
            .field("dependents", &self.dependents)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Validated, immutable stage graph.
///
/// Only [`GraphBuilder::build`] produces one, so holding a `StageGraph` means
/// the topology, the retry edge and the state schema have all been checked.
#[derive(Debug)]
pub struct StageGraph {
    nodes: HashMap<StageName, StageNode>,
    order: Vec<StageName>,
    schema: Arc<StateSchema>,
    conditional: Option<ConditionalEdge>,
    loop_body: Vec<StageName>,
    entry: StageName,
    terminal: StageName,
}

impl StageGraph {
    pub fn builder() -> GraphBuilder {
        GraphBuilder::new()
    }

    /// Stage names in declaration order.
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(|s| s.as_str())
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Immediate dependencies of a stage.
    pub fn dependencies_of(&self, name: &str) -> &[StageName] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a stage.
    pub fn dependents_of(&self, name: &str) -> &[StageName] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    pub fn position_of(&self, name: &str) -> Option<usize> {
        self.nodes.get(name).map(|n| n.position)
    }

    pub fn stage(&self, name: &str) -> Option<Arc<dyn Stage>> {
        self.nodes.get(name).map(|n| Arc::clone(&n.stage))
    }

    /// Timeout declared on the stage itself (config may override it).
    pub fn timeout_of(&self, name: &str) -> Option<Duration> {
        self.nodes.get(name).and_then(|n| n.timeout)
    }

    pub fn schema(&self) -> &Arc<StateSchema> {
        &self.schema
    }

    pub fn conditional(&self) -> Option<&ConditionalEdge> {
        self.conditional.as_ref()
    }

    /// Stages re-run on every pass through the retry loop.
    pub fn loop_body(&self) -> &[StageName] {
        &self.loop_body
    }

    pub fn in_loop(&self, name: &str) -> bool {
        self.loop_body.iter().any(|s| s == name)
    }

    pub fn entry(&self) -> &str {
        &self.entry
    }

    pub fn terminal(&self) -> &str {
        &self.terminal
    }
}

/// Declares fields, stages and the retry edge, then validates them into a
/// [`StageGraph`].
#[derive(Debug, Default)]
pub struct GraphBuilder {
    schema: StateSchema,
    schema_error: Option<GraphError>,
    stages: Vec<StageDef>,
    conditional: Option<ConditionalEdge>,
}

impl GraphBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a state field. Errors are reported by [`GraphBuilder::build`].
    pub fn field(mut self, spec: FieldSpec) -> Self {
        if let Err(err) = self.schema.declare(spec) {
            self.schema_error.get_or_insert(err);
        }
        self
    }

    pub fn stage(mut self, def: StageDef) -> Self {
        self.stages.push(def);
        self
    }

    /// Set the retry edge. A graph has at most one; the last call wins.
    pub fn conditional(mut self, edge: ConditionalEdge) -> Self {
        self.conditional = Some(edge);
        self
    }

    pub fn build(self) -> Result<StageGraph, GraphError> {
        let GraphBuilder {
            schema,
            schema_error,
            stages,
            conditional,
        } = self;

        if let Some(err) = schema_error {
            return Err(err);
        }

        validate::validate_stages(&stages)?;
        let entry = validate::find_entry(&stages)?;
        let terminal = validate::find_terminal(&stages)?;

        let loop_body = match &conditional {
            Some(edge) => validate::validate_conditional(edge, &stages, &schema)?,
            None => Vec::new(),
        };

        let order: Vec<StageName> = stages.iter().map(|d| d.name.clone()).collect();
        let mut nodes: HashMap<StageName, StageNode> = HashMap::new();

        // First pass: create nodes with their dependency lists.
        for (position, def) in stages.into_iter().enumerate() {
            nodes.insert(
                def.name.clone(),
                StageNode {
                    position,
                    deps: def.after,
                    dependents: Vec::new(),
                    stage: def.stage,
                    timeout: def.timeout,
                },
            );
        }

        // Second pass: populate dependents, in declaration order.
        for name in &order {
            let deps = nodes
                .get(name)
                .map(|n| n.deps.clone())
                .unwrap_or_default();

            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(name.clone());
                }
            }
        }

        debug!(
            stages = order.len(),
            fields = schema.len(),
            %entry,
            %terminal,
            ?loop_body,
            "stage graph built"
        );

        Ok(StageGraph {
            nodes,
            order,
            schema: Arc::new(schema),
            conditional,
            loop_body,
            entry,
            terminal,
        })
    }
}
