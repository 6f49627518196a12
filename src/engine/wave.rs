// src/engine/wave.rs

//! Running one wave of stages concurrently.
//!
//! Every stage of the wave is spawned onto a [`JoinSet`]. Results are
//! buffered and handed back sorted by declaration position, so the caller
//! can merge them in a fixed order no matter which stage finished first.

use std::any::Any;
use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::dag::{StageGraph, StageInput, StageResult};
use crate::errors::StageError;
use crate::state::{StateSnapshot, StateUpdate};
use crate::types::StageName;

/// A stage that returned an update.
#[derive(Debug, Clone)]
pub(crate) struct CompletedStage {
    pub position: usize,
    pub name: StageName,
    pub update: StateUpdate,
    pub elapsed: Duration,
}

/// The stage that ended the wave early.
#[derive(Debug, Clone)]
pub(crate) struct FailedStage {
    pub position: usize,
    pub name: StageName,
    pub error: StageError,
    pub elapsed: Duration,
}

#[derive(Debug, Default)]
pub(crate) struct WaveOutcome {
    /// Successful stages, in declaration order.
    pub completed: Vec<CompletedStage>,
    /// First failure observed, if any.
    pub failure: Option<FailedStage>,
    /// The run was cancelled while the wave was in flight.
    pub cancelled: bool,
    /// Stages that were still running when the wave was torn down.
    pub abandoned: Vec<StageName>,
}

impl WaveOutcome {
    /// Whether the wave's updates may be merged.
    pub fn is_clean(&self) -> bool {
        self.failure.is_none() && !self.cancelled
    }
}

struct InFlight {
    position: usize,
    name: StageName,
    started: Instant,
}

/// Run `stages` concurrently against `snapshot`.
///
/// The first failure (error, timeout or panic) or a cancellation of
/// `run_cancel` fires the wave's own token and aborts everything still
/// running. Nothing here touches shared state.
pub(crate) async fn run_wave<F>(
    graph: &StageGraph,
    stages: &[StageName],
    snapshot: &StateSnapshot,
    iteration: u32,
    timeout_for: F,
    run_cancel: &CancellationToken,
) -> WaveOutcome
where
    F: Fn(&str) -> Option<Duration>,
{
    let wave_cancel = run_cancel.child_token();
    let mut set: JoinSet<StageResult> = JoinSet::new();
    let mut in_flight: HashMap<Id, InFlight> = HashMap::new();
    let mut outcome = WaveOutcome::default();

    for name in stages {
        let (Some(stage), Some(position)) = (graph.stage(name), graph.position_of(name)) else {
            // Scheduler only hands out names from the graph.
            warn!(stage = %name, "wave references unknown stage; skipping");
            continue;
        };

        let input = StageInput {
            state: snapshot.clone(),
            iteration,
            cancel: wave_cancel.clone(),
        };
        let timeout = timeout_for(name.as_str());

        let handle = set.spawn(async move {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, stage.run(input)).await {
                    Ok(result) => result,
                    Err(_) => Err(StageError::TimedOut(limit)),
                },
                None => stage.run(input).await,
            }
        });

        debug!(stage = %name, iteration, ?timeout, "stage spawned");
        in_flight.insert(
            handle.id(),
            InFlight {
                position,
                name: name.clone(),
                started: Instant::now(),
            },
        );
    }

    loop {
        tokio::select! {
            biased;

            _ = run_cancel.cancelled() => {
                warn!(running = in_flight.len(), "run cancelled; aborting wave");
                outcome.cancelled = true;
                break;
            }

            joined = set.join_next_with_id() => {
                let Some(joined) = joined else {
                    break;
                };

                let (id, result) = match joined {
                    Ok((id, result)) => (id, result),
                    Err(err) => (err.id(), Err(join_error_to_stage_error(err))),
                };

                let Some(flight) = in_flight.remove(&id) else {
                    continue;
                };
                let elapsed = flight.started.elapsed();

                match result {
                    Ok(update) => {
                        debug!(stage = %flight.name, ?elapsed, fields = update.len(), "stage returned");
                        outcome.completed.push(CompletedStage {
                            position: flight.position,
                            name: flight.name,
                            update,
                            elapsed,
                        });
                    }
                    Err(err) => {
                        error!(stage = %flight.name, ?elapsed, error = %err, "stage failed");
                        outcome.failure = Some(FailedStage {
                            position: flight.position,
                            name: flight.name,
                            error: err,
                            elapsed,
                        });
                        break;
                    }
                }
            }
        }
    }

    if !set.is_empty() {
        wave_cancel.cancel();
        set.shutdown().await;
    }

    let mut abandoned: Vec<InFlight> = in_flight.into_values().collect();
    abandoned.sort_by_key(|f| f.position);
    outcome.abandoned = abandoned.into_iter().map(|f| f.name).collect();
    outcome.completed.sort_by_key(|c| c.position);
    outcome
}

fn join_error_to_stage_error(err: JoinError) -> StageError {
    if err.is_panic() {
        StageError::Panicked(panic_message(err.into_panic()))
    } else {
        StageError::Cancelled
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
