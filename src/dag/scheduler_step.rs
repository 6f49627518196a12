// src/dag/scheduler_step.rs

//! Step-by-step result types for the scheduler.

use crate::types::StageName;

/// Per-run state of a single stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageRunState {
    Pending,
    Running,
    Done,
    Failed,
    /// Never ran because something upstream failed.
    Skipped,
}

/// What the executor reports back for a running stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    Failed,
}

/// Tagged outcome of evaluating the retry edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchDecision {
    /// Release the accepting stage. `forced` is set when the iteration
    /// ceiling, not the flag, made the decision.
    Accept { forced: bool },
    /// Re-enter the loop body with this iteration number.
    Retry { next_iteration: u32 },
}

/// Structured result of a single scheduler step.
#[derive(Debug, Clone, Default)]
pub struct SchedulerStep {
    /// Stages that became ready as a result of this step.
    pub newly_ready: Vec<StageName>,
    /// Downstream stages that will never run because of the failure.
    pub newly_skipped: Vec<StageName>,
    /// Whether this step completed the terminal stage.
    pub run_just_finished: bool,
}
