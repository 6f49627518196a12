// src/engine/report.rs

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::engine::events::{ProgressEvent, RunEvent, StageStatus};
use crate::engine::executor::FieldConflict;
use crate::errors::RunError;
use crate::state::StateSnapshot;
use crate::types::{RunStatus, StageName};

/// Everything a caller gets back from a run, successful or not.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub status: RunStatus,
    /// Final state on success; state as of the last fully merged wave
    /// otherwise.
    #[serde(serialize_with = "serialize_snapshot")]
    pub state: StateSnapshot,
    #[serde(serialize_with = "serialize_error")]
    pub error: Option<RunError>,
    pub path: Vec<StageName>,
    pub events: Vec<RunEvent>,
    pub iterations: u32,
    pub forced_pass: bool,
    pub conflicts: Vec<FieldConflict>,
    #[serde(rename = "elapsed_secs", serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

impl RunReport {
    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Stage the failure originated from, if the run failed in a stage.
    pub fn failed_stage(&self) -> Option<&str> {
        self.error.as_ref().and_then(RunError::stage)
    }

    pub fn progress_events(&self) -> impl Iterator<Item = &ProgressEvent> {
        self.events.iter().filter_map(RunEvent::as_progress)
    }

    /// Number of events for `stage` whose output was merged.
    pub fn runs_of(&self, stage: &str) -> usize {
        self.progress_events()
            .filter(|e| e.stage == stage && e.status == StageStatus::Succeeded)
            .count()
    }

    /// Length of a list field, 0 if never written.
    pub fn list_len(&self, field: &str) -> usize {
        self.state.list(field).len()
    }
}

fn serialize_snapshot<S: Serializer>(state: &StateSnapshot, s: S) -> Result<S::Ok, S::Error> {
    state.to_json().serialize(s)
}

fn serialize_error<S: Serializer>(error: &Option<RunError>, s: S) -> Result<S::Ok, S::Error> {
    error.as_ref().map(ToString::to_string).serialize(s)
}

fn serialize_secs<S: Serializer>(elapsed: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(elapsed.as_secs_f64())
}
