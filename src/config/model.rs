// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

use crate::engine::DEFAULT_MAX_ITERATIONS;
use crate::types::ConflictPolicy;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [engine]
/// max_iterations = 3
/// conflict_policy = "last_writer_wins"
/// stage_timeout = "120s"
///
/// [stage.fetch_patents]
/// timeout = "30s"
///
/// [pipeline]
/// max_keywords = 3
/// ```
///
/// All sections are optional and have reasonable defaults. Durations are
/// still strings here; [`ConfigFile`] holds the parsed form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub engine: RawEngineSection,

    /// Per-stage settings from `[stage.<name>]`.
    #[serde(default)]
    pub stage: BTreeMap<String, RawStageSection>,

    #[serde(default)]
    pub pipeline: PipelineSection,
}

/// `[engine]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawEngineSection {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// `"last_writer_wins"` (default) or `"error"`.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Duration string (e.g. `"120s"`) applied to every stage without its
    /// own timeout.
    #[serde(default)]
    pub stage_timeout: Option<String>,
}

fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}

impl Default for RawEngineSection {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            conflict_policy: ConflictPolicy::default(),
            stage_timeout: None,
        }
    }
}

/// `[stage.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawStageSection {
    #[serde(default)]
    pub timeout: Option<String>,
}

/// `[pipeline]` section: knobs of the analysis pipeline stages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineSection {
    /// How many search keywords the patent stage queries.
    #[serde(default = "default_max_keywords")]
    pub max_keywords: usize,
}

fn default_max_keywords() -> usize {
    3
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            max_keywords: default_max_keywords(),
        }
    }
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>`, so every duration has
/// been parsed and every bound checked.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigFile {
    pub engine: EngineSection,
    pub stage: BTreeMap<String, StageSection>,
    pub pipeline: PipelineSection,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineSection {
    pub max_iterations: u32,
    pub conflict_policy: ConflictPolicy,
    pub stage_timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StageSection {
    pub timeout: Option<Duration>,
}

impl Default for ConfigFile {
    fn default() -> Self {
        Self {
            engine: EngineSection {
                max_iterations: DEFAULT_MAX_ITERATIONS,
                conflict_policy: ConflictPolicy::default(),
                stage_timeout: None,
            },
            stage: BTreeMap::new(),
            pipeline: PipelineSection::default(),
        }
    }
}
