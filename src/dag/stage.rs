// src/dag/stage.rs

//! The stage contract.
//!
//! A stage receives a read-only snapshot of shared state and returns a
//! partial update. It never touches orchestration state directly; the
//! executor alone applies what it returns.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::errors::StageError;
use crate::state::{StateSnapshot, StateUpdate};
use crate::types::StageName;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

pub type StageResult = std::result::Result<StateUpdate, StageError>;

/// Everything a stage invocation gets to see.
#[derive(Debug, Clone)]
pub struct StageInput {
    /// Shared state as of the end of the previous wave.
    pub state: StateSnapshot,
    /// Retry-loop iteration this invocation belongs to.
    pub iteration: u32,
    /// Fires when the run is cancelled or a sibling stage in the same wave
    /// fails. Cooperative stages should stop early; the executor aborts the
    /// ones that don't.
    pub cancel: CancellationToken,
}

impl StageInput {
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Trait implemented by every stage body.
///
/// The executor guarantees at most one in-flight invocation per stage within
/// a run.
pub trait Stage: Send + Sync {
    fn run(&self, input: StageInput) -> BoxFuture<'_, StageResult>;
}

/// Adapter turning an async closure into a [`Stage`].
pub struct FnStage<F> {
    f: F,
}

impl<F, Fut> Stage for FnStage<F>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send + 'static,
{
    fn run(&self, input: StageInput) -> BoxFuture<'_, StageResult> {
        Box::pin((self.f)(input))
    }
}

/// Build a stage from an async closure.
pub fn stage_fn<F, Fut>(f: F) -> FnStage<F>
where
    F: Fn(StageInput) -> Fut + Send + Sync,
    Fut: Future<Output = StageResult> + Send + 'static,
{
    FnStage { f }
}

/// Declaration of a stage before the graph is validated.
#[derive(Clone)]
pub struct StageDef {
    pub name: StageName,
    pub after: Vec<StageName>,
    pub stage: Arc<dyn Stage>,
    pub timeout: Option<Duration>,
}

impl StageDef {
    pub fn new(name: impl Into<StageName>, stage: impl Stage + 'static) -> Self {
        Self {
            name: name.into(),
            after: Vec::new(),
            stage: Arc::new(stage),
            timeout: None,
        }
    }

    /// Add predecessors that must complete before this stage is ready.
    pub fn after<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<StageName>,
    {
        self.after.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Debug for StageDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StageDef")
            .field("name", &self.name)
            .field("after", &self.after)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
