// src/dag/mod.rs

//! Stage graph representation and scheduling.
//!
//! - [`stage`] defines the stage contract and stage declarations.
//! - [`graph`] holds the validated, immutable stage graph and its builder.
//! - [`validate`] contains the structural checks run at build time.
//! - [`scheduler`] contains the per-run state machine that decides which
//!   stages are ready and evaluates the retry edge.
//! - [`scheduler_step`] defines the result types for scheduler steps.

pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod stage;
mod validate;

pub use graph::{ConditionalEdge, GraphBuilder, StageGraph};
pub use scheduler::Scheduler;
pub use scheduler_step::{BranchDecision, SchedulerStep, StageOutcome, StageRunState};
pub use stage::{BoxFuture, FnStage, Stage, StageDef, StageInput, StageResult, stage_fn};
