use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Canonical stage name type used throughout the engine.
pub type StageName = String;

/// How a stage's write to a field is combined with the value already held
/// in shared state.
///
/// - `LastWriterWins`: the incoming value replaces the current one. When two
///   stages of the same wave write the field, the one applied last (in
///   graph-declaration order) wins.
/// - `Append`: the incoming list is concatenated onto the current list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MergePolicy {
    LastWriterWins,
    Append,
}

/// What to do when two stages of the same wave write *different* values to
/// the same last-writer-wins field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Apply in declared order, log the conflict and record it in the report.
    #[default]
    LastWriterWins,
    /// Fail the run with a merge error; nothing from the wave is applied.
    Error,
}

impl FromStr for ConflictPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "last_writer_wins" | "last-writer-wins" => Ok(ConflictPolicy::LastWriterWins),
            "error" => Ok(ConflictPolicy::Error),
            other => Err(format!(
                "invalid conflict_policy: {other} (expected \"last_writer_wins\" or \"error\")"
            )),
        }
    }
}

/// Lifecycle status of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}
