// src/engine/events.rs

//! Progress events and their delivery to subscribers.
//!
//! The executor is the only producer. Every subscriber gets its own
//! unbounded queue, so a slow or vanished subscriber can never hold up a
//! wave.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::types::{RunStatus, StageName};

/// How a stage's completion was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    /// Output was merged into shared state.
    Succeeded,
    /// The stage (or the merge of its output) failed the run.
    Failed,
    /// The stage finished but its wave was abandoned, so its output was
    /// thrown away.
    Discarded,
}

/// One stage completion.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub seq: u64,
    pub stage: StageName,
    pub iteration: u32,
    pub elapsed_secs: f64,
    pub summary: String,
    pub status: StageStatus,
    pub timestamp: DateTime<Utc>,
}

/// Final event of every run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunFinished {
    pub seq: u64,
    pub run_id: String,
    pub status: RunStatus,
    /// Stages in the order their completion was recorded, repeats included.
    pub path: Vec<StageName>,
    pub total_elapsed_secs: f64,
    pub iterations: u32,
    pub forced_pass: bool,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    Progress(ProgressEvent),
    Finished(RunFinished),
}

impl RunEvent {
    pub fn seq(&self) -> u64 {
        match self {
            RunEvent::Progress(e) => e.seq,
            RunEvent::Finished(e) => e.seq,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RunEvent::Finished(_))
    }

    pub fn as_progress(&self) -> Option<&ProgressEvent> {
        match self {
            RunEvent::Progress(e) => Some(e),
            RunEvent::Finished(_) => None,
        }
    }
}

/// Fan-out of run events, plus the full trace kept for the run report.
#[derive(Debug)]
pub struct ProgressEmitter {
    run_id: String,
    next_seq: u64,
    subscribers: Vec<mpsc::UnboundedSender<RunEvent>>,
    trace: Vec<RunEvent>,
    finished: bool,
}

impl ProgressEmitter {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            next_seq: 0,
            subscribers: Vec::new(),
            trace: Vec::new(),
            finished: false,
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Attach a new subscriber and return its stream.
    pub fn subscribe(&mut self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach(tx);
        EventStream::new(rx)
    }

    /// Attach an existing channel as a subscriber.
    pub fn attach(&mut self, tx: mpsc::UnboundedSender<RunEvent>) {
        self.subscribers.push(tx);
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    pub fn emit_stage(
        &mut self,
        stage: &str,
        iteration: u32,
        elapsed: Duration,
        summary: impl Into<String>,
        status: StageStatus,
    ) {
        let event = RunEvent::Progress(ProgressEvent {
            seq: self.take_seq(),
            stage: stage.to_string(),
            iteration,
            elapsed_secs: elapsed.as_secs_f64(),
            summary: summary.into(),
            status,
            timestamp: Utc::now(),
        });
        self.publish(event);
    }

    /// Emit the terminal event. Only the first call has any effect.
    pub fn finish(
        &mut self,
        status: RunStatus,
        path: Vec<StageName>,
        total_elapsed: Duration,
        iterations: u32,
        forced_pass: bool,
        error: Option<String>,
    ) {
        if self.finished {
            warn!(run_id = %self.run_id, "terminal event already emitted; ignoring");
            return;
        }
        self.finished = true;

        let event = RunEvent::Finished(RunFinished {
            seq: self.take_seq(),
            run_id: self.run_id.clone(),
            status,
            path,
            total_elapsed_secs: total_elapsed.as_secs_f64(),
            iterations,
            forced_pass,
            error,
            timestamp: Utc::now(),
        });
        self.publish(event);

        // Closing the senders ends every subscriber stream.
        self.subscribers.clear();
    }

    /// Every event emitted so far, in order.
    pub fn trace(&self) -> &[RunEvent] {
        &self.trace
    }

    pub fn into_trace(self) -> Vec<RunEvent> {
        self.trace
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn publish(&mut self, event: RunEvent) {
        let run_id = &self.run_id;
        self.subscribers.retain(|tx| match tx.send(event.clone()) {
            Ok(()) => true,
            Err(_) => {
                warn!(run_id = %run_id, "progress subscriber disconnected; detaching");
                false
            }
        });
        self.trace.push(event);
    }
}

/// Receiving end of one subscription.
#[derive(Debug)]
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<RunEvent>,
}

impl EventStream {
    pub fn new(rx: mpsc::UnboundedReceiver<RunEvent>) -> Self {
        Self { rx }
    }

    /// Next event, or `None` once the run has finished and the queue is
    /// drained.
    pub async fn recv(&mut self) -> Option<RunEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<RunEvent> {
        self.rx.try_recv().ok()
    }

    /// Drain the stream until the terminal event (inclusive).
    pub async fn collect(mut self) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

/// Something that wants to observe a run.
pub trait ProgressSubscriber: Send {
    fn on_event(&mut self, event: &RunEvent);
}

impl<F> ProgressSubscriber for F
where
    F: FnMut(&RunEvent) + Send,
{
    fn on_event(&mut self, event: &RunEvent) {
        self(event)
    }
}

/// Drive a subscriber from its own task until the stream ends.
///
/// The subscriber is handed back when the run's terminal event has been
/// delivered.
pub fn spawn_subscriber<S>(mut stream: EventStream, mut subscriber: S) -> JoinHandle<S>
where
    S: ProgressSubscriber + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = stream.recv().await {
            subscriber.on_event(&event);
            if event.is_terminal() {
                break;
            }
        }
        subscriber
    })
}

/// Renders the run trace through `tracing`: one line per stage and a final
/// path line.
#[derive(Debug, Default, Clone, Copy)]
pub struct TraceLogger;

impl ProgressSubscriber for TraceLogger {
    fn on_event(&mut self, event: &RunEvent) {
        match event {
            RunEvent::Progress(e) => {
                info!(
                    seq = e.seq,
                    stage = %e.stage,
                    iteration = e.iteration,
                    status = ?e.status,
                    "[{}] {:.1}s {}",
                    e.stage,
                    e.elapsed_secs,
                    e.summary
                );
            }
            RunEvent::Finished(e) => {
                info!(
                    run_id = %e.run_id,
                    status = %e.status,
                    iterations = e.iterations,
                    forced_pass = e.forced_pass,
                    "path: {} ({:.1}s)",
                    e.path.join(" -> "),
                    e.total_elapsed_secs
                );
            }
        }
    }
}
