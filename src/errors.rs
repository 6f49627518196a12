// src/errors.rs

//! Crate-wide error types.
//!
//! The taxonomy follows the lifecycle of a run:
//! - [`GraphError`]: the stage graph is structurally invalid (fatal at build time).
//! - [`StageError`]: a stage body failed, timed out, panicked or was cancelled.
//! - [`MergeError`]: a stage returned an update that shared state rejects.
//! - [`RunError`]: why a run ended in `failed`.
//! - [`StagedagError`]: everything that can go wrong outside a run
//!   (config, IO, invalid input).

use std::time::Duration;

use thiserror::Error;

use crate::state::FieldType;
use crate::types::StageName;

/// Structural problems detected while building a stage graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("graph must declare at least one stage")]
    Empty,

    #[error("stage '{0}' is declared more than once")]
    DuplicateStage(StageName),

    #[error("stage '{stage}' has unknown predecessor '{predecessor}'")]
    UnknownPredecessor {
        stage: StageName,
        predecessor: StageName,
    },

    #[error("stage '{0}' cannot depend on itself")]
    SelfDependency(StageName),

    #[error("cycle detected in stage graph involving stage '{0}'")]
    Cycle(StageName),

    #[error("graph must have exactly one entry stage, found {0:?}")]
    EntryStage(Vec<StageName>),

    #[error("graph must have exactly one terminal stage, found {0:?}")]
    TerminalStage(Vec<StageName>),

    #[error("invalid conditional edge: {0}")]
    InvalidConditional(String),

    #[error("invalid state schema: {0}")]
    Schema(String),
}

/// Failure reported by (or imposed on) a single stage invocation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StageError {
    #[error("{0}")]
    Failed(String),

    #[error("timed out after {0:?}")]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("panicked: {0}")]
    Panicked(String),
}

impl StageError {
    /// Convenience for collaborator errors surfaced by stage adapters.
    pub fn failed(err: impl std::fmt::Display) -> Self {
        StageError::Failed(err.to_string())
    }
}

/// A partial update that shared state refuses to merge.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum MergeError {
    #[error("unknown field '{0}'")]
    UnknownField(String),

    #[error("field '{field}' expects {expected}, got {found}")]
    TypeMismatch {
        field: String,
        expected: FieldType,
        found: FieldType,
    },

    #[error("field '{field}' written with different values by '{first}' and '{second}' in the same wave")]
    Conflict {
        field: String,
        first: StageName,
        second: StageName,
    },
}

/// Why a run ended with status `failed`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("stage '{stage}' failed: {source}")]
    Stage {
        stage: StageName,
        #[source]
        source: StageError,
    },

    #[error("output of stage '{stage}' rejected: {source}")]
    Merge {
        stage: StageName,
        #[source]
        source: MergeError,
    },

    #[error("run cancelled")]
    Cancelled,

    #[error("no stage is ready but the terminal stage has not run")]
    Stalled,
}

impl RunError {
    /// Name of the stage the failure originated from, if any.
    pub fn stage(&self) -> Option<&str> {
        match self {
            RunError::Stage { stage, .. } | RunError::Merge { stage, .. } => Some(stage),
            RunError::Cancelled | RunError::Stalled => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum StagedagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid stage graph: {0}")]
    Graph(#[from] GraphError),

    #[error("Invalid run input: {0}")]
    InvalidInput(#[from] MergeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, StagedagError>;
