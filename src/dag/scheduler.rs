use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::dag::graph::StageGraph;
use crate::dag::scheduler_step::{BranchDecision, SchedulerStep, StageOutcome, StageRunState};
use crate::state::StateSnapshot;
use crate::types::StageName;

/// Whether the retry edge has released its accepting stage in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Branch {
    Undecided,
    Accepted,
}

/// Scheduler holds the immutable graph plus mutable per-run state.
///
/// It is responsible for:
/// - deciding which stages are ready (all predecessors done this iteration)
/// - marking stages as succeeded or failed
/// - skipping everything downstream of a failed stage
/// - evaluating the retry edge and clearing the loop body on retry
///
/// It performs no IO; the executor drives it wave by wave.
#[derive(Debug)]
pub struct Scheduler {
    graph: Arc<StageGraph>,
    stages: HashMap<StageName, StageRunState>,
    branch: Branch,
}

impl Scheduler {
    pub fn new(graph: Arc<StageGraph>) -> Self {
        let stages = graph
            .stages()
            .map(|name| (name.to_string(), StageRunState::Pending))
            .collect();

        Self {
            graph,
            stages,
            branch: Branch::Undecided,
        }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn run_state_of(&self, stage: &str) -> Option<StageRunState> {
        self.stages.get(stage).copied()
    }

    /// Whether every predecessor of `stage` is done in the current iteration.
    ///
    /// Returns `None` if the stage is unknown.
    pub fn deps_satisfied(&self, stage: &str) -> Option<bool> {
        if !self.stages.contains_key(stage) {
            return None;
        }
        Some(
            self.graph
                .dependencies_of(stage)
                .iter()
                .all(|dep| self.run_state_of(dep) == Some(StageRunState::Done)),
        )
    }

    /// Stages that are ready but not yet started, in declaration order.
    pub fn ready_stages(&self) -> Vec<StageName> {
        self.graph
            .stages()
            .filter(|name| self.is_ready(name))
            .map(str::to_string)
            .collect()
    }

    fn is_ready(&self, stage: &str) -> bool {
        if self.run_state_of(stage) != Some(StageRunState::Pending) {
            return false;
        }
        if self.deps_satisfied(stage) != Some(true) {
            return false;
        }
        // The accepting stage waits for the retry edge, not just its predecessor.
        match self.graph.conditional() {
            Some(edge) if edge.accept == stage => self.branch == Branch::Accepted,
            _ => true,
        }
    }

    /// Take every ready stage as the next wave and mark it running.
    pub fn start_wave(&mut self) -> Vec<StageName> {
        let wave = self.ready_stages();
        for name in &wave {
            self.stages.insert(name.clone(), StageRunState::Running);
        }
        if !wave.is_empty() {
            debug!(stages = ?wave, "scheduler: wave started");
        }
        wave
    }

    /// Record the outcome of a running stage.
    pub fn step_completion(&mut self, stage: &str, outcome: StageOutcome) -> SchedulerStep {
        let mut step = SchedulerStep::default();

        match self.stages.get(stage).copied() {
            Some(StageRunState::Running) => {}
            Some(other) => {
                warn!(stage = %stage, state = ?other, "completion for stage that is not running; ignoring");
                return step;
            }
            None => {
                warn!(stage = %stage, "completion for unknown stage; ignoring");
                return step;
            }
        }

        match outcome {
            StageOutcome::Succeeded => {
                self.stages.insert(stage.to_string(), StageRunState::Done);
                debug!(stage = %stage, "stage marked done");
                step.newly_ready = self
                    .graph
                    .dependents_of(stage)
                    .iter()
                    .filter(|dependent| self.is_ready(dependent))
                    .cloned()
                    .collect();
            }
            StageOutcome::Failed => {
                self.stages.insert(stage.to_string(), StageRunState::Failed);
                step.newly_skipped = self.skip_dependents(stage);
                debug!(stage = %stage, "stage marked failed");
            }
        }

        step.run_just_finished = self.is_finished();
        step
    }

    /// Return a running stage to pending without a result, e.g. when its
    /// wave was cancelled.
    pub fn abandon(&mut self, stage: &str) {
        if self.run_state_of(stage) == Some(StageRunState::Running) {
            self.stages.insert(stage.to_string(), StageRunState::Pending);
        }
    }

    fn skip_dependents(&mut self, stage: &str) -> Vec<StageName> {
        let mut skipped = Vec::new();
        let mut stack: Vec<StageName> = self.graph.dependents_of(stage).to_vec();

        while let Some(name) = stack.pop() {
            if self.run_state_of(&name) != Some(StageRunState::Pending) {
                continue;
            }
            self.stages.insert(name.clone(), StageRunState::Skipped);
            stack.extend(self.graph.dependents_of(&name).iter().cloned());
            skipped.push(name);
        }

        skipped
    }

    /// The retry edge's source has completed and the edge has not fired yet.
    pub fn awaiting_decision(&self) -> bool {
        match self.graph.conditional() {
            Some(edge) => {
                self.branch == Branch::Undecided
                    && self.run_state_of(&edge.source) == Some(StageRunState::Done)
            }
            None => false,
        }
    }

    /// Evaluate the retry edge against the merged state.
    ///
    /// An accepted flag releases the accepting stage. A rejection at the
    /// ceiling is forced through as an accept. Any other rejection resets the
    /// loop body to pending and asks for the next iteration.
    pub fn decide_branch(&mut self, state: &StateSnapshot, max_iterations: u32) -> BranchDecision {
        let Some(edge) = self.graph.conditional().cloned() else {
            return BranchDecision::Accept { forced: false };
        };

        let iteration = state.iteration();
        let accepted = state.flag(&edge.flag).unwrap_or(false);

        if accepted {
            self.branch = Branch::Accepted;
            info!(iteration, flag = %edge.flag, "retry edge accepted");
            return BranchDecision::Accept { forced: false };
        }

        if iteration >= max_iterations {
            self.branch = Branch::Accepted;
            warn!(
                iteration,
                max_iterations, "iteration ceiling reached; forcing accepting branch"
            );
            return BranchDecision::Accept { forced: true };
        }

        for name in self.graph.loop_body().to_vec() {
            self.stages.insert(name, StageRunState::Pending);
        }

        let next_iteration = iteration + 1;
        info!(
            iteration,
            next_iteration,
            retry = %edge.retry,
            "retry edge rejected; re-entering loop"
        );
        BranchDecision::Retry { next_iteration }
    }

    /// The terminal stage has completed.
    pub fn is_finished(&self) -> bool {
        self.run_state_of(self.graph.terminal()) == Some(StageRunState::Done)
    }

    /// Nothing is running, nothing is ready, and the run is neither finished
    /// nor waiting on the retry edge.
    pub fn is_stalled(&self) -> bool {
        !self.is_finished()
            && !self.awaiting_decision()
            && !self
                .stages
                .values()
                .any(|s| *s == StageRunState::Running)
            && self.ready_stages().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::dag::graph::ConditionalEdge;
    use crate::dag::stage::{StageDef, stage_fn};
    use crate::state::{FieldSpec, SharedState, StateUpdate};

    fn noop(name: &str) -> StageDef {
        StageDef::new(name, stage_fn(|_| async { Ok(StateUpdate::new()) }))
    }

    fn graph() -> Arc<StageGraph> {
        let graph = StageGraph::builder()
            .field(FieldSpec::flag("accepted"))
            .field(FieldSpec::accumulating("items"))
            .stage(noop("plan"))
            .stage(noop("fetch_a").after(["plan"]))
            .stage(noop("fetch_b").after(["plan"]))
            .stage(noop("synthesize").after(["fetch_a", "fetch_b"]))
            .stage(noop("review").after(["synthesize"]))
            .stage(noop("finalize").after(["review"]))
            .conditional(ConditionalEdge::new("review", "accepted", "finalize", "synthesize"))
            .build()
            .unwrap();
        Arc::new(graph)
    }

    fn complete_wave(s: &mut Scheduler) -> Vec<StageName> {
        let wave = s.start_wave();
        for name in &wave {
            s.step_completion(name, StageOutcome::Succeeded);
        }
        wave
    }

    fn state_with(accepted: bool, iteration: u32) -> StateSnapshot {
        let graph = graph();
        let mut state = SharedState::new(Arc::clone(graph.schema()));
        state
            .apply(&StateUpdate::new().set("accepted", accepted).append("items", [json!(1)]))
            .unwrap();
        state.set_iteration(iteration);
        state.snapshot()
    }

    #[test]
    fn waves_follow_dependencies_in_declaration_order() {
        let mut s = Scheduler::new(graph());

        assert_eq!(complete_wave(&mut s), vec!["plan"]);
        assert_eq!(complete_wave(&mut s), vec!["fetch_a", "fetch_b"]);
        assert_eq!(complete_wave(&mut s), vec!["synthesize"]);
        assert_eq!(complete_wave(&mut s), vec!["review"]);

        // finalize is gated on the retry edge
        assert!(s.start_wave().is_empty());
        assert!(s.awaiting_decision());
        assert!(!s.is_stalled());
    }

    #[test]
    fn acceptance_releases_terminal_stage() {
        let mut s = Scheduler::new(graph());
        for _ in 0..4 {
            complete_wave(&mut s);
        }

        let decision = s.decide_branch(&state_with(true, 0), 3);
        assert_eq!(decision, BranchDecision::Accept { forced: false });
        assert!(!s.awaiting_decision());

        assert_eq!(complete_wave(&mut s), vec!["finalize"]);
        assert!(s.is_finished());
    }

    #[test]
    fn rejection_clears_loop_body() {
        let mut s = Scheduler::new(graph());
        for _ in 0..4 {
            complete_wave(&mut s);
        }

        let decision = s.decide_branch(&state_with(false, 0), 3);
        assert_eq!(decision, BranchDecision::Retry { next_iteration: 1 });
        assert_eq!(s.run_state_of("synthesize"), Some(StageRunState::Pending));
        assert_eq!(s.run_state_of("review"), Some(StageRunState::Pending));
        assert_eq!(s.run_state_of("fetch_a"), Some(StageRunState::Done));

        assert_eq!(complete_wave(&mut s), vec!["synthesize"]);
    }

    #[test]
    fn rejection_at_ceiling_is_forced_through() {
        let mut s = Scheduler::new(graph());
        for _ in 0..4 {
            complete_wave(&mut s);
        }

        let decision = s.decide_branch(&state_with(false, 3), 3);
        assert_eq!(decision, BranchDecision::Accept { forced: true });
        assert_eq!(complete_wave(&mut s), vec!["finalize"]);
    }

    #[test]
    fn failure_skips_everything_downstream() {
        let mut s = Scheduler::new(graph());
        complete_wave(&mut s);

        let wave = s.start_wave();
        assert_eq!(wave, vec!["fetch_a", "fetch_b"]);

        let step = s.step_completion("fetch_a", StageOutcome::Failed);
        assert_eq!(s.run_state_of("fetch_a"), Some(StageRunState::Failed));
        let mut skipped = step.newly_skipped.clone();
        skipped.sort();
        assert_eq!(skipped, vec!["finalize", "review", "synthesize"]);
        assert!(!step.run_just_finished);

        let step = s.step_completion("fetch_b", StageOutcome::Succeeded);
        assert!(step.newly_ready.is_empty());
        assert!(s.is_stalled());
    }

    #[test]
    fn completion_steps_report_readiness_and_the_end_of_the_run() {
        let mut s = Scheduler::new(graph());

        s.start_wave();
        let step = s.step_completion("plan", StageOutcome::Succeeded);
        assert_eq!(step.newly_ready, vec!["fetch_a", "fetch_b"]);

        s.start_wave();
        let step = s.step_completion("fetch_a", StageOutcome::Succeeded);
        assert!(step.newly_ready.is_empty(), "synthesize still waits on fetch_b");
        let step = s.step_completion("fetch_b", StageOutcome::Succeeded);
        assert_eq!(step.newly_ready, vec!["synthesize"]);

        complete_wave(&mut s);
        complete_wave(&mut s);
        s.decide_branch(&state_with(true, 0), 3);

        s.start_wave();
        let step = s.step_completion("finalize", StageOutcome::Succeeded);
        assert!(step.run_just_finished);
        assert!(!s.is_stalled());
    }
}
