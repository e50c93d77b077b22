//! Cancellable background operations with owner-thread status.
//!
//! A [`BackgroundOperation`] runs a time-sliced loop on the runtime's worker
//! threads while its status, progress and status text are only ever written
//! on the session's owner thread:
//!
//! ```text
//! Idle -> Running -> Completed
//!                 -> Canceled
//!                 -> Faulted(message)
//! ```
//!
//! Starting again cancels the run in flight. The replaced run still winds
//! down to `Canceled`, but its late progress and outcome are ignored.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, info};

use crate::cancel::{OperationSlot, OperationTicket};
use crate::config::WorkConfig;
use crate::error::JobFault;
use crate::executor::SessionExecutor;
use crate::progress::Progress;
use crate::task::TaskHandle;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OperationStatus {
    Idle,
    Running,
    Completed,
    Canceled,
    /// The step failed or panicked; carries the error message.
    Faulted(String),
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Canceled | Self::Faulted(_))
    }
}

struct WorkState {
    status: OperationStatus,
    progress: Option<u32>,
    text: String,
}

pub struct BackgroundOperation {
    executor: Arc<SessionExecutor>,
    runtime: Handle,
    config: WorkConfig,
    slot: OperationSlot,
    state: Mutex<WorkState>,
}

impl BackgroundOperation {
    pub fn new(executor: Arc<SessionExecutor>, runtime: Handle, config: WorkConfig) -> Arc<Self> {
        Arc::new(Self {
            executor,
            runtime,
            config,
            slot: OperationSlot::new(),
            state: Mutex::new(WorkState {
                status: OperationStatus::Idle,
                progress: None,
                text: String::new(),
            }),
        })
    }

    pub fn status(&self) -> OperationStatus {
        self.state.lock().status.clone()
    }

    /// Last progress value reported by the current run.
    pub fn progress(&self) -> Option<u32> {
        self.state.lock().progress
    }

    /// Human-readable status, e.g. `"Started"`, `"7"`, `"2 (Canceled)"`.
    pub fn status_text(&self) -> String {
        self.state.lock().text.clone()
    }

    /// Cancels the run in flight. Returns `false` if nothing was running.
    pub fn cancel(&self) -> bool {
        self.slot.cancel()
    }

    /// Starts a new run, cancelling any previous one. Call on the owner thread.
    ///
    /// `step` runs once per slice on a worker thread; an error or panic
    /// faults the run. The handle resolves to this run's own outcome, even
    /// when a newer run has since taken over the status.
    pub fn start<S>(self: &Arc<Self>, step: S) -> TaskHandle<OperationStatus>
    where
        S: FnMut(u32) -> anyhow::Result<()> + Send + 'static,
    {
        let ticket = self.slot.begin();
        {
            let mut state = self.state.lock();
            state.status = OperationStatus::Running;
            state.progress = None;
            state.text = "Started".to_owned();
        }
        info!(
            session = %self.executor.session(),
            run = ticket.generation(),
            steps = self.config.steps,
            "background operation started"
        );

        let operation = Arc::clone(self);
        self.executor.spawn(async move {
            let outcome = operation.run_steps(&ticket, step).await;
            operation.finish(&ticket, &outcome);
            outcome
        })
    }

    async fn run_steps<S>(self: &Arc<Self>, ticket: &OperationTicket, mut step: S) -> OperationStatus
    where
        S: FnMut(u32) -> anyhow::Result<()> + Send + 'static,
    {
        let progress = {
            let operation = Arc::clone(self);
            let ticket = ticket.clone();
            Progress::new(Arc::clone(&self.executor), move |i: u32| operation.report(&ticket, i))
        };
        let token = ticket.token().clone();
        let interval = self.config.step_interval();
        let steps = self.config.steps;

        let work = self.runtime.spawn(async move {
            for i in 1..=steps {
                tokio::select! {
                    biased;
                    () = token.cancelled() => return OperationStatus::Canceled,
                    () = tokio::time::sleep(interval) => {}
                }
                if let Err(err) = step(i) {
                    return OperationStatus::Faulted(err.to_string());
                }
                progress.report(i);
            }
            OperationStatus::Completed
        });

        match work.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => {
                OperationStatus::Faulted(JobFault::from_panic(err.into_panic()).to_string())
            }
            Err(err) => OperationStatus::Faulted(err.to_string()),
        }
    }

    fn report(&self, ticket: &OperationTicket, value: u32) {
        if !self.slot.is_current(ticket) {
            return;
        }
        let mut state = self.state.lock();
        if state.status == OperationStatus::Running {
            state.progress = Some(value);
            state.text = value.to_string();
        }
    }

    fn finish(&self, ticket: &OperationTicket, outcome: &OperationStatus) {
        if !self.slot.is_current(ticket) {
            debug!(
                session = %self.executor.session(),
                run = ticket.generation(),
                ?outcome,
                "ignoring outcome of a replaced run"
            );
            return;
        }

        self.slot.end(ticket);
        let mut state = self.state.lock();
        let text = match outcome {
            OperationStatus::Completed => "Done".to_owned(),
            OperationStatus::Canceled => format!("{} (Canceled)", state.text),
            OperationStatus::Faulted(message) => format!("{} (error: {message})", state.text),
            OperationStatus::Idle | OperationStatus::Running => state.text.clone(),
        };
        state.text = text;
        state.status = outcome.clone();
        info!(
            session = %self.executor.session(),
            run = ticket.generation(),
            ?outcome,
            "background operation finished"
        );
    }
}
