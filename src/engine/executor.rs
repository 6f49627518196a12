// src/engine/executor.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::dag::{BranchDecision, Scheduler, StageGraph, StageOutcome};
use crate::engine::events::{ProgressEmitter, StageStatus};
use crate::engine::report::RunReport;
use crate::engine::summary::summarize;
use crate::engine::wave::{self, CompletedStage, FailedStage, WaveOutcome};
use crate::engine::EngineConfig;
use crate::errors::{MergeError, RunError};
use crate::state::{FieldValue, SharedState};
use crate::types::{ConflictPolicy, MergePolicy, RunStatus, StageName};

/// Two stages of one wave wrote different values to the same
/// last-writer-wins field. `second` is the write that was kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldConflict {
    pub field: String,
    pub first: StageName,
    pub second: StageName,
    pub iteration: u32,
}

/// Drives one run of a [`StageGraph`] to completion.
///
/// The executor exclusively owns the run's [`SharedState`]. Stages see
/// snapshots; only the executor applies their updates, one wave at a time,
/// in declaration order.
pub struct Executor {
    graph: Arc<StageGraph>,
    config: EngineConfig,
    emitter: ProgressEmitter,
    cancel: CancellationToken,
}

impl std::fmt::Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("run_id", &self.emitter.run_id())
            .finish_non_exhaustive()
    }
}

/// Mutable bookkeeping for one run.
struct RunProgress {
    state: SharedState,
    scheduler: Scheduler,
    path: Vec<StageName>,
    conflicts: Vec<FieldConflict>,
    waves: u32,
}

impl Executor {
    pub fn new(
        graph: Arc<StageGraph>,
        config: EngineConfig,
        emitter: ProgressEmitter,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            graph,
            config,
            emitter,
            cancel,
        }
    }

    /// Run the graph from `initial` until the terminal stage completes, a
    /// stage fails, or the run is cancelled.
    ///
    /// Always produces a report; failures are carried in it, never returned
    /// as `Err`.
    pub async fn run(mut self, initial: SharedState, max_iterations: u32) -> RunReport {
        let started = Instant::now();
        let run_id = self.emitter.run_id().to_string();

        info!(
            stages = self.graph.len(),
            max_iterations,
            "run started"
        );

        let mut progress = RunProgress {
            state: initial,
            scheduler: Scheduler::new(Arc::clone(&self.graph)),
            path: Vec::new(),
            conflicts: Vec::new(),
            waves: 0,
        };

        let error = self.drive(&mut progress, max_iterations).await;
        let status = if error.is_none() {
            RunStatus::Completed
        } else {
            RunStatus::Failed
        };
        let elapsed = started.elapsed();

        let RunProgress {
            state,
            path,
            conflicts,
            ..
        } = progress;
        let snapshot = state.snapshot();

        match &error {
            None => info!(
                ?elapsed,
                iterations = snapshot.iteration(),
                forced_pass = snapshot.forced_pass(),
                "run completed"
            ),
            Some(err) => error!(?elapsed, error = %err, "run failed"),
        }

        self.emitter.finish(
            status,
            path.clone(),
            elapsed,
            snapshot.iteration(),
            snapshot.forced_pass(),
            error.as_ref().map(ToString::to_string),
        );

        RunReport {
            run_id,
            status,
            iterations: snapshot.iteration(),
            forced_pass: snapshot.forced_pass(),
            state: snapshot,
            error,
            path,
            events: self.emitter.into_trace(),
            conflicts,
            elapsed,
        }
    }

    async fn drive(&mut self, progress: &mut RunProgress, max_iterations: u32) -> Option<RunError> {
        loop {
            // A cancel that lands after the terminal stage merged is too late.
            if progress.scheduler.is_finished() {
                return None;
            }

            if self.cancel.is_cancelled() {
                warn!("run cancelled before next wave");
                return Some(RunError::Cancelled);
            }

            if progress.scheduler.awaiting_decision() {
                let snapshot = progress.state.snapshot();
                match progress.scheduler.decide_branch(&snapshot, max_iterations) {
                    BranchDecision::Accept { forced } => {
                        if forced {
                            progress.state.mark_forced_pass();
                        }
                    }
                    BranchDecision::Retry { next_iteration } => {
                        progress.state.set_iteration(next_iteration);
                    }
                }
                continue;
            }

            if progress.scheduler.is_stalled() {
                error!("no stage ready and terminal stage not reached");
                return Some(RunError::Stalled);
            }
            let stages = progress.scheduler.start_wave();

            progress.waves += 1;
            let iteration = progress.state.iteration();
            info!(wave = progress.waves, iteration, stages = ?stages, "wave started");

            let snapshot = progress.state.snapshot();
            let graph = Arc::clone(&self.graph);
            let config = &self.config;
            let outcome = wave::run_wave(
                &graph,
                &stages,
                &snapshot,
                iteration,
                |name| config.timeout_for(&graph, name),
                &self.cancel,
            )
            .await;

            if let Some(err) = self.settle_wave(progress, outcome) {
                return Some(err);
            }
        }
    }

    /// Merge a finished wave, or account for a broken one.
    fn settle_wave(&mut self, progress: &mut RunProgress, outcome: WaveOutcome) -> Option<RunError> {
        let iteration = progress.state.iteration();

        if !outcome.is_clean() {
            return Some(self.abandon_wave(progress, outcome, iteration));
        }

        if let Err((stage, err)) = self.check_wave(progress, &outcome.completed, iteration) {
            let failed = outcome
                .completed
                .iter()
                .find(|c| c.name == stage)
                .map(|c| c.elapsed)
                .unwrap_or_default();
            let message = err.to_string();
            let run_err = RunError::Merge {
                stage: stage.clone(),
                source: err,
            };
            error!(stage = %stage, error = %message, "wave output rejected; nothing applied");
            self.reject_wave(progress, outcome.completed, &stage, failed, &message, iteration);
            return Some(run_err);
        }

        let accept_flag = self.graph.conditional().map(|edge| edge.flag.clone());

        for done in outcome.completed {
            // Already validated as a whole; this cannot fail.
            if let Err(err) = progress.state.apply(&done.update) {
                return Some(RunError::Merge {
                    stage: done.name,
                    source: err,
                });
            }
            let step = progress
                .scheduler
                .step_completion(&done.name, StageOutcome::Succeeded);
            if step.run_just_finished {
                info!(stage = %done.name, "terminal stage merged");
            } else if !step.newly_ready.is_empty() {
                debug!(stage = %done.name, ready = ?step.newly_ready, "dependents ready");
            }
            progress.path.push(done.name.clone());

            let summary = summarize(&done.update, accept_flag.as_deref());
            debug!(stage = %done.name, %summary, "stage output merged");
            self.emitter.emit_stage(
                &done.name,
                iteration,
                done.elapsed,
                summary,
                StageStatus::Succeeded,
            );
        }

        None
    }

    /// Schema and conflict checks over the whole wave, before anything is
    /// applied. Returns the offending stage on failure.
    fn check_wave(
        &self,
        progress: &mut RunProgress,
        completed: &[CompletedStage],
        iteration: u32,
    ) -> Result<(), (StageName, MergeError)> {
        for done in completed {
            progress
                .state
                .validate(&done.update)
                .map_err(|err| (done.name.clone(), err))?;
        }

        let schema = progress.state.schema();
        let mut writers: HashMap<&str, (&str, &FieldValue)> = HashMap::new();
        let mut conflicts = Vec::new();

        for done in completed {
            for (field, value) in done.update.iter() {
                let lww = schema
                    .get(field)
                    .is_some_and(|spec| spec.policy == MergePolicy::LastWriterWins);
                if !lww {
                    continue;
                }

                if let Some((first, previous)) = writers.get(field)
                    && *first != done.name
                    && *previous != value
                {
                    match self.config.conflict_policy {
                        ConflictPolicy::Error => {
                            return Err((
                                done.name.clone(),
                                MergeError::Conflict {
                                    field: field.to_string(),
                                    first: first.to_string(),
                                    second: done.name.clone(),
                                },
                            ));
                        }
                        ConflictPolicy::LastWriterWins => {
                            warn!(
                                field,
                                first = %first,
                                second = %done.name,
                                iteration,
                                "conflicting writes in one wave; keeping the later stage's value"
                            );
                            conflicts.push(FieldConflict {
                                field: field.to_string(),
                                first: first.to_string(),
                                second: done.name.clone(),
                                iteration,
                            });
                        }
                    }
                }
                writers.insert(field, (done.name.as_str(), value));
            }
        }

        progress.conflicts.extend(conflicts);
        Ok(())
    }

    /// A stage failed or the run was cancelled mid-wave: report every
    /// finished sibling as discarded and nothing is merged.
    fn abandon_wave(
        &mut self,
        progress: &mut RunProgress,
        outcome: WaveOutcome,
        iteration: u32,
    ) -> RunError {
        let WaveOutcome {
            completed,
            failure,
            abandoned,
            ..
        } = outcome;

        for name in &abandoned {
            progress.scheduler.abandon(name);
        }

        let Some(FailedStage {
            position,
            name,
            error,
            elapsed,
        }) = failure
        else {
            self.discard(progress, completed, iteration);
            return RunError::Cancelled;
        };

        // Events follow declaration order, the failed stage included.
        let (before, after): (Vec<_>, Vec<_>) =
            completed.into_iter().partition(|c| c.position < position);
        self.discard(progress, before, iteration);

        self.fail_stage(progress, &name);
        self.emitter.emit_stage(
            &name,
            iteration,
            elapsed,
            error.to_string(),
            StageStatus::Failed,
        );

        self.discard(progress, after, iteration);

        RunError::Stage {
            stage: name,
            source: error,
        }
    }

    /// Merge-time rejection: the offending stage fails, the rest of the wave
    /// is discarded.
    fn reject_wave(
        &mut self,
        progress: &mut RunProgress,
        completed: Vec<CompletedStage>,
        stage: &str,
        elapsed: Duration,
        message: &str,
        iteration: u32,
    ) {
        for done in completed {
            if done.name == stage {
                self.fail_stage(progress, stage);
                self.emitter
                    .emit_stage(stage, iteration, elapsed, message, StageStatus::Failed);
            } else {
                self.discard(progress, vec![done], iteration);
            }
        }
    }

    fn fail_stage(&self, progress: &mut RunProgress, stage: &str) {
        let step = progress.scheduler.step_completion(stage, StageOutcome::Failed);
        if !step.newly_skipped.is_empty() {
            warn!(stage = %stage, skipped = ?step.newly_skipped, "downstream stages will not run");
        }
        progress.path.push(stage.to_string());
    }

    fn discard(&mut self, progress: &mut RunProgress, stages: Vec<CompletedStage>, iteration: u32) {
        for done in stages {
            progress.scheduler.abandon(&done.name);
            debug!(stage = %done.name, "stage output discarded");
            self.emitter.emit_stage(
                &done.name,
                iteration,
                done.elapsed,
                "discarded",
                StageStatus::Discarded,
            );
        }
    }
}
