//! Test doubles for the host services.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::JobFault;
use crate::executor::SessionExecutor;
use crate::session::{ChangeSink, FaultSink, OwnerCallback, SessionId, SessionScheduler};

/// Runs every callback immediately on the calling thread.
#[derive(Default)]
pub(crate) struct InlineScheduler {
    gone: AtomicBool,
}

impl InlineScheduler {
    pub(crate) fn end_session(&self) {
        self.gone.store(true, Ordering::Release);
    }
}

impl SessionScheduler for InlineScheduler {
    fn schedule_on_owner(&self, _session: &SessionId, callback: OwnerCallback, _wait: bool) {
        if !self.gone.load(Ordering::Acquire) {
            callback();
        }
    }
}

/// Parks non-blocking callbacks until the test runs them.
#[derive(Default)]
pub(crate) struct ManualScheduler {
    gone: AtomicBool,
    parked: Mutex<Vec<OwnerCallback>>,
}

impl ManualScheduler {
    pub(crate) fn end_session(&self) {
        self.gone.store(true, Ordering::Release);
    }

    pub(crate) fn parked(&self) -> usize {
        self.parked.lock().len()
    }

    /// Runs parked callbacks, including any parked while running.
    pub(crate) fn run_parked(&self) -> usize {
        let mut ran = 0;
        loop {
            let batch = std::mem::take(&mut *self.parked.lock());
            if batch.is_empty() {
                return ran;
            }
            for callback in batch {
                callback();
                ran += 1;
            }
        }
    }
}

impl SessionScheduler for ManualScheduler {
    fn schedule_on_owner(&self, _session: &SessionId, callback: OwnerCallback, wait: bool) {
        if self.gone.load(Ordering::Acquire) {
            return;
        }
        if wait {
            callback();
        } else {
            self.parked.lock().push(callback);
        }
    }
}

#[derive(Default)]
pub(crate) struct CountingSink {
    count: AtomicUsize,
}

impl CountingSink {
    pub(crate) fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }
}

impl ChangeSink for CountingSink {
    fn state_changed(&self, _session: &SessionId) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
pub(crate) struct RecordingFaults {
    faults: Mutex<Vec<String>>,
}

impl RecordingFaults {
    pub(crate) fn messages(&self) -> Vec<String> {
        self.faults.lock().clone()
    }
}

impl FaultSink for RecordingFaults {
    fn job_faulted(&self, _session: &SessionId, fault: &JobFault) {
        self.faults.lock().push(fault.message().to_owned());
    }
}

pub(crate) struct Fixture<S> {
    pub(crate) scheduler: Arc<S>,
    pub(crate) sink: Arc<CountingSink>,
    pub(crate) faults: Arc<RecordingFaults>,
    pub(crate) executor: Arc<SessionExecutor>,
}

pub(crate) fn fixture<S>() -> Fixture<S>
where
    S: SessionScheduler + Default + 'static,
{
    let scheduler = Arc::new(S::default());
    let sink = Arc::new(CountingSink::default());
    let faults = Arc::new(RecordingFaults::default());
    let executor = SessionExecutor::with_fault_sink(
        SessionId::from("test-session"),
        scheduler.clone(),
        sink.clone(),
        faults.clone(),
    );
    Fixture {
        scheduler,
        sink,
        faults,
        executor,
    }
}
