use std::time::Duration;

use serde_json::json;
use stagedag::config::{ConfigFile, RawConfigFile};
use stagedag::config::model::RawStageSection;
use stagedag::dag::{ConditionalEdge, StageDef, StageGraph};
use stagedag::state::{FieldSpec, StateUpdate};
use stagedag::types::ConflictPolicy;

use crate::scripted::{FlagSequence, ScriptedStage};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.config.engine.max_iterations = max;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.config.engine.conflict_policy = policy;
        self
    }

    pub fn with_default_timeout(mut self, timeout: &str) -> Self {
        self.config.engine.stage_timeout = Some(timeout.to_string());
        self
    }

    pub fn with_stage_timeout(mut self, stage: &str, timeout: &str) -> Self {
        self.config.stage.insert(
            stage.to_string(),
            RawStageSection {
                timeout: Some(timeout.to_string()),
            },
        );
        self
    }

    pub fn with_max_keywords(mut self, max: usize) -> Self {
        self.config.pipeline.max_keywords = max;
        self
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Stage names of the reference scenario.
pub mod names {
    pub const PLAN: &str = "plan";
    pub const FETCH_A: &str = "fetchA";
    pub const FETCH_B: &str = "fetchB";
    pub const SYNTHESIZE: &str = "synthesize";
    pub const REVIEW: &str = "review";
    pub const FINALIZE: &str = "finalize";
}

/// The reference scenario graph:
/// `plan -> {fetchA, fetchB} -> synthesize -> review -> finalize`, with
/// review's `accepted` flag looping back to synthesize.
///
/// Fields: `query`, `plan`, `items` (append), `draft`, `accepted`,
/// `final_report`. Every stage can be swapped for a custom one.
pub struct ScenarioBuilder {
    plan: ScriptedStage,
    fetch_a: ScriptedStage,
    fetch_b: ScriptedStage,
    synthesize: ScriptedStage,
    review: FlagSequence,
    finalize: ScriptedStage,
    timeouts: Vec<(&'static str, Duration)>,
}

impl ScenarioBuilder {
    pub fn new() -> Self {
        Self {
            plan: ScriptedStage::producing(|input| {
                let query = input.state.text("query").unwrap_or_default().to_string();
                StateUpdate::new().set("plan", format!("plan for {query}"))
            }),
            fetch_a: ScriptedStage::writes(StateUpdate::new().append("items", [json!("a")])),
            fetch_b: ScriptedStage::writes(StateUpdate::new().append("items", [json!("b")])),
            synthesize: ScriptedStage::producing(|input| {
                StateUpdate::new().set("draft", format!("draft {}", input.iteration))
            }),
            review: FlagSequence::new("accepted", [true]),
            finalize: ScriptedStage::producing(|input| {
                let draft = input.state.text("draft").unwrap_or_default().to_string();
                StateUpdate::new().set("final_report", draft)
            }),
            timeouts: Vec::new(),
        }
    }

    pub fn plan(mut self, stage: ScriptedStage) -> Self {
        self.plan = stage;
        self
    }

    pub fn fetch_a(mut self, stage: ScriptedStage) -> Self {
        self.fetch_a = stage;
        self
    }

    pub fn fetch_b(mut self, stage: ScriptedStage) -> Self {
        self.fetch_b = stage;
        self
    }

    pub fn synthesize(mut self, stage: ScriptedStage) -> Self {
        self.synthesize = stage;
        self
    }

    pub fn review(mut self, stage: FlagSequence) -> Self {
        self.review = stage;
        self
    }

    pub fn finalize(mut self, stage: ScriptedStage) -> Self {
        self.finalize = stage;
        self
    }

    /// Declare a timeout on one of the scenario stages.
    pub fn timeout(mut self, stage: &'static str, timeout: Duration) -> Self {
        self.timeouts.push((stage, timeout));
        self
    }

    pub fn build(self) -> StageGraph {
        use names::*;

        let timeouts = self.timeouts;
        let timed = |name: &'static str, def: StageDef| match timeouts.iter().find(|(n, _)| *n == name) {
            Some((_, t)) => def.timeout(*t),
            None => def,
        };

        StageGraph::builder()
            .field(FieldSpec::text("query"))
            .field(FieldSpec::text("plan"))
            .field(FieldSpec::accumulating("items"))
            .field(FieldSpec::text("draft"))
            .field(FieldSpec::flag("accepted"))
            .field(FieldSpec::text("final_report"))
            .stage(timed(PLAN, StageDef::new(PLAN, self.plan)))
            .stage(timed(FETCH_A, StageDef::new(FETCH_A, self.fetch_a).after([PLAN])))
            .stage(timed(FETCH_B, StageDef::new(FETCH_B, self.fetch_b).after([PLAN])))
            .stage(timed(
                SYNTHESIZE,
                StageDef::new(SYNTHESIZE, self.synthesize).after([FETCH_A, FETCH_B]),
            ))
            .stage(timed(REVIEW, StageDef::new(REVIEW, self.review).after([SYNTHESIZE])))
            .stage(timed(FINALIZE, StageDef::new(FINALIZE, self.finalize).after([REVIEW])))
            .conditional(ConditionalEdge::new(REVIEW, "accepted", FINALIZE, SYNTHESIZE))
            .build()
            .expect("reference scenario graph is valid")
    }
}

impl Default for ScenarioBuilder {
    fn default() -> Self {
        Self::new()
    }
}
