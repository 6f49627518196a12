// src/engine/controller.rs

use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info_span, warn};
use uuid::Uuid;

use crate::dag::{BoxFuture, StageGraph};
use crate::engine::events::{
    EventStream, ProgressEmitter, ProgressSubscriber, RunEvent, spawn_subscriber,
};
use crate::engine::executor::Executor;
use crate::engine::report::RunReport;
use crate::engine::{EngineConfig, MAX_ITERATIONS_LIMIT};
use crate::errors::{Result, StagedagError};
use crate::state::{FieldValue, SharedState, StateUpdate};

/// Completion of a spawned subscriber task.
type SubscriberTask = BoxFuture<'static, std::result::Result<(), JoinError>>;

/// Caller parameters for one run.
#[derive(Default)]
pub struct RunRequest {
    run_id: Option<String>,
    initial: StateUpdate,
    max_iterations: Option<u32>,
    streams: Vec<mpsc::UnboundedSender<RunEvent>>,
    subscribers: Vec<Box<dyn FnOnce(EventStream) -> SubscriberTask + Send>>,
}

impl fmt::Debug for RunRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRequest")
            .field("run_id", &self.run_id)
            .field("initial", &self.initial)
            .field("max_iterations", &self.max_iterations)
            .field("subscribers", &(self.streams.len() + self.subscribers.len()))
            .finish()
    }
}

impl RunRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a caller-chosen run id instead of a generated one.
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Seed a field of the initial state.
    pub fn set(mut self, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.initial.insert(field, value);
        self
    }

    /// Seed the initial state from a prepared update.
    pub fn initial(mut self, update: StateUpdate) -> Self {
        for (field, value) in update.iter() {
            self.initial.insert(field, value.clone());
        }
        self
    }

    /// Override the engine's iteration ceiling for this run.
    pub fn max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = Some(max);
        self
    }

    /// Attach a stream subscriber. Events arrive until the terminal event.
    pub fn subscribe(&mut self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.push(tx);
        EventStream::new(rx)
    }

    /// Attach a subscriber that runs in its own task for the life of the run.
    ///
    /// [`RunHandle::join`] waits for it to handle the terminal event.
    pub fn with_subscriber<S>(mut self, subscriber: S) -> Self
    where
        S: ProgressSubscriber + 'static,
    {
        self.subscribers.push(Box::new(move |stream| -> SubscriberTask {
            let handle = spawn_subscriber(stream, subscriber);
            Box::pin(async move { handle.await.map(drop) })
        }));
        self
    }
}

/// Handle to an in-flight run.
pub struct RunHandle {
    run_id: String,
    cancel: CancellationToken,
    task: JoinHandle<RunReport>,
    subscribers: Vec<SubscriberTask>,
}

impl fmt::Debug for RunHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunHandle")
            .field("run_id", &self.run_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl RunHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Cancel the run. Stages of the active wave are aborted and no further
    /// wave starts; the report still arrives through [`RunHandle::join`].
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// A token that cancels this run when fired, e.g. from a signal handler.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for the report, then for every callback subscriber to drain its
    /// queue. The emitter closes all queues after the terminal event, so
    /// this always ends.
    pub async fn join(self) -> Result<RunReport> {
        let report = self.task.await;

        for subscriber in self.subscribers {
            if let Err(err) = subscriber.await {
                warn!(run_id = %self.run_id, error = %err, "subscriber task ended abnormally");
            }
        }

        report.map_err(|err| StagedagError::Other(anyhow!("run task {} aborted: {err}", self.run_id)))
    }
}

/// The entry point for running a graph.
///
/// One controller serves any number of runs; each run gets its own state,
/// scheduler and emitter. Nothing is shared between runs except the
/// immutable graph and config.
#[derive(Debug, Clone)]
pub struct RunController {
    graph: Arc<StageGraph>,
    config: EngineConfig,
}

impl RunController {
    pub fn new(graph: impl Into<Arc<StageGraph>>, config: EngineConfig) -> Self {
        Self {
            graph: graph.into(),
            config,
        }
    }

    pub fn graph(&self) -> &StageGraph {
        &self.graph
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Validate the request and spawn the run onto the current Tokio runtime.
    ///
    /// Invalid initial values are rejected here, before any stage runs.
    pub fn start(&self, request: RunRequest) -> Result<RunHandle> {
        let RunRequest {
            run_id,
            initial,
            max_iterations,
            streams,
            subscribers,
        } = request;

        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let max_iterations = max_iterations.unwrap_or(self.config.max_iterations);
        if max_iterations > MAX_ITERATIONS_LIMIT {
            return Err(StagedagError::ConfigError(format!(
                "max_iterations must be <= {MAX_ITERATIONS_LIMIT} (got {max_iterations})"
            )));
        }

        let mut state = SharedState::new(Arc::clone(self.graph.schema()));
        state.apply(&initial)?;

        let mut emitter = ProgressEmitter::new(run_id.clone());
        for tx in streams {
            emitter.attach(tx);
        }
        let subscribers = subscribers
            .into_iter()
            .map(|attach| attach(emitter.subscribe()))
            .collect();

        let cancel = CancellationToken::new();
        let executor = Executor::new(
            Arc::clone(&self.graph),
            self.config.clone(),
            emitter,
            cancel.clone(),
        );

        debug!(run_id = %run_id, max_iterations, "spawning run");
        let span = info_span!("run", run_id = %run_id);
        let task = tokio::spawn(executor.run(state, max_iterations).instrument(span));

        Ok(RunHandle {
            run_id,
            cancel,
            task,
            subscribers,
        })
    }

    /// Start a run and wait for its report.
    pub async fn run(&self, request: RunRequest) -> Result<RunReport> {
        self.start(request)?.join().await
    }
}
