use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use stagedag::dag::{BoxFuture, Stage, StageInput, StageResult};
use stagedag::errors::StageError;
use stagedag::state::StateUpdate;

type Produce = Arc<dyn Fn(&StageInput) -> StateUpdate + Send + Sync>;

/// Stage with scripted behaviour: optional delay, then an update or a
/// failure.
///
/// By default the delay honours the cancellation token; see
/// [`ScriptedStage::ignore_cancel`].
#[derive(Clone)]
pub struct ScriptedStage {
    produce: Produce,
    delay: Duration,
    failure: Option<String>,
    panics: bool,
    cooperative: bool,
    calls: Arc<AtomicU32>,
}

impl ScriptedStage {
    /// A stage that returns an empty update.
    pub fn new() -> Self {
        Self::producing(|_| StateUpdate::new())
    }

    /// A stage that returns the same update on every call.
    pub fn writes(update: StateUpdate) -> Self {
        Self::producing(move |_| update.clone())
    }

    /// A stage whose update is computed from its input.
    pub fn producing<F>(f: F) -> Self
    where
        F: Fn(&StageInput) -> StateUpdate + Send + Sync + 'static,
    {
        Self {
            produce: Arc::new(f),
            delay: Duration::ZERO,
            failure: None,
            panics: false,
            cooperative: true,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn delay_ms(self, ms: u64) -> Self {
        self.delay(Duration::from_millis(ms))
    }

    /// Fail with `message` after the delay.
    pub fn fails(mut self, message: impl Into<String>) -> Self {
        self.failure = Some(message.into());
        self
    }

    /// Panic after the delay.
    pub fn panics(mut self) -> Self {
        self.panics = true;
        self
    }

    /// Sleep through cancellation; only an abort stops the stage.
    pub fn ignore_cancel(mut self) -> Self {
        self.cooperative = false;
        self
    }

    /// Shared invocation counter, readable after the stage moved into a
    /// graph.
    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

impl Default for ScriptedStage {
    fn default() -> Self {
        Self::new()
    }
}

impl Stage for ScriptedStage {
    fn run(&self, input: StageInput) -> BoxFuture<'_, StageResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        Box::pin(async move {
            if !self.delay.is_zero() {
                if self.cooperative {
                    tokio::select! {
                        _ = tokio::time::sleep(self.delay) => {}
                        _ = input.cancel.cancelled() => return Err(StageError::Cancelled),
                    }
                } else {
                    tokio::time::sleep(self.delay).await;
                }
            }

            if self.panics {
                panic!("scripted panic");
            }
            if let Some(message) = &self.failure {
                return Err(StageError::Failed(message.clone()));
            }
            Ok((self.produce)(&input))
        })
    }
}

/// Writes a scripted sequence of values to a bool flag, one per call. The
/// last value repeats once the sequence is exhausted.
#[derive(Clone)]
pub struct FlagSequence {
    field: String,
    values: Arc<Vec<bool>>,
    calls: Arc<AtomicU32>,
}

impl FlagSequence {
    pub fn new(field: impl Into<String>, values: impl IntoIterator<Item = bool>) -> Self {
        Self {
            field: field.into(),
            values: Arc::new(values.into_iter().collect()),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Rejects forever.
    pub fn always_reject(field: impl Into<String>) -> Self {
        Self::new(field, [false])
    }

    /// Rejects `k - 1` times, then accepts.
    pub fn accept_on(field: impl Into<String>, k: usize) -> Self {
        let mut values = vec![false; k.saturating_sub(1)];
        values.push(true);
        Self::new(field, values)
    }

    pub fn calls(&self) -> Arc<AtomicU32> {
        Arc::clone(&self.calls)
    }
}

impl Stage for FlagSequence {
    fn run(&self, _input: StageInput) -> BoxFuture<'_, StageResult> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let value = self
            .values
            .get(call)
            .or_else(|| self.values.last())
            .copied()
            .unwrap_or(true);
        let field = self.field.clone();

        Box::pin(async move { Ok(StateUpdate::new().set(field, value)) })
    }
}
