// src/engine/mod.rs

//! Orchestration engine for stagedag.
//!
//! This module ties together:
//! - the per-run scheduler from [`crate::dag`]
//! - concurrent wave execution ([`wave`])
//! - deterministic merging of wave output into shared state ([`executor`])
//! - progress events and subscribers ([`events`])
//! - the public run entry point ([`controller`])
//!
//! The scheduler is a pure state machine; everything async lives here.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::ConfigFile;
use crate::dag::StageGraph;
use crate::errors::{Result, StagedagError};
use crate::types::{ConflictPolicy, StageName};

pub mod controller;
pub mod events;
pub mod executor;
pub mod report;
mod summary;
mod wave;

pub use controller::{RunController, RunHandle, RunRequest};
pub use events::{
    EventStream, ProgressEmitter, ProgressEvent, ProgressSubscriber, RunEvent, RunFinished,
    StageStatus, TraceLogger, spawn_subscriber,
};
pub use executor::{Executor, FieldConflict};
pub use report::RunReport;

/// Iteration ceiling used when neither config nor caller sets one.
pub const DEFAULT_MAX_ITERATIONS: u32 = 3;

/// Upper bound accepted for the iteration ceiling.
pub const MAX_ITERATIONS_LIMIT: u32 = 100;

/// Runtime options for the engine.
///
/// Passed explicitly to [`RunController::new`]; there is no global config.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Retry-loop ceiling. At this iteration a rejection is forced through.
    pub max_iterations: u32,
    pub conflict_policy: ConflictPolicy,
    /// Applied to stages with no more specific timeout.
    pub default_stage_timeout: Option<Duration>,
    /// Per-stage overrides; win over the stage's own declared timeout.
    pub stage_timeouts: HashMap<StageName, Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            conflict_policy: ConflictPolicy::default(),
            default_stage_timeout: None,
            stage_timeouts: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from a validated config file.
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            max_iterations: cfg.engine.max_iterations,
            conflict_policy: cfg.engine.conflict_policy,
            default_stage_timeout: cfg.engine.stage_timeout,
            stage_timeouts: cfg
                .stage
                .iter()
                .filter_map(|(name, sc)| sc.timeout.map(|t| (name.clone(), t)))
                .collect(),
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_stage_timeout = Some(timeout);
        self
    }

    pub fn with_stage_timeout(mut self, stage: impl Into<StageName>, timeout: Duration) -> Self {
        self.stage_timeouts.insert(stage.into(), timeout);
        self
    }

    /// Check this config against the graph it will drive.
    pub fn for_graph(self, graph: &StageGraph) -> Result<Self> {
        if let Some(unknown) = self.stage_timeouts.keys().find(|name| !graph.contains(name)) {
            return Err(StagedagError::ConfigError(format!(
                "timeout configured for unknown stage '{unknown}'"
            )));
        }
        if self.max_iterations > MAX_ITERATIONS_LIMIT {
            return Err(StagedagError::ConfigError(format!(
                "max_iterations must be <= {MAX_ITERATIONS_LIMIT} (got {})",
                self.max_iterations
            )));
        }
        Ok(self)
    }

    /// Effective timeout for `stage`: config override, then the stage's own
    /// declaration, then the engine default.
    pub fn timeout_for(&self, graph: &StageGraph, stage: &str) -> Option<Duration> {
        self.stage_timeouts
            .get(stage)
            .copied()
            .or_else(|| graph.timeout_of(stage))
            .or(self.default_stage_timeout)
    }
}
