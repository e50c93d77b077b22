//! Session-affine executor.
//!
//! A [`SessionExecutor`] funnels work that touches session state onto the
//! thread owning the session: either synchronously through
//! [`SessionExecutor::run_blocking`], or queued with
//! [`SessionExecutor::run_deferred`] and drained there in submission order.
//! Futures spawned on it resume through the same queue.

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam::queue::SegQueue;
use futures::channel::oneshot;
use tracing::{debug, trace};

use crate::error::JobFault;
use crate::session::{ChangeSink, FaultSink, SessionId, SessionScheduler, TracingFaultSink};
use crate::task::{Task, TaskHandle};

thread_local! {
    static CURRENT: RefCell<Option<Arc<SessionExecutor>>> = const { RefCell::new(None) };
}

type Callback = Box<dyn FnOnce() + Send + 'static>;

/// One deferred unit of work. Running it consumes it.
struct Job {
    seq: u64,
    callback: Callback,
}

impl Job {
    fn run(self) -> std::thread::Result<()> {
        panic::catch_unwind(AssertUnwindSafe(self.callback))
    }
}

pub struct SessionExecutor {
    session: SessionId,
    scheduler: Arc<dyn SessionScheduler>,
    sink: Arc<dyn ChangeSink>,
    faults: Arc<dyn FaultSink>,
    jobs: SegQueue<Job>,
    next_seq: AtomicU64,
}

impl SessionExecutor {
    /// Creates an executor bound to `session`, reporting job faults via `tracing`.
    pub fn new(
        session: SessionId,
        scheduler: Arc<dyn SessionScheduler>,
        sink: Arc<dyn ChangeSink>,
    ) -> Arc<Self> {
        Self::with_fault_sink(session, scheduler, sink, Arc::new(TracingFaultSink))
    }

    pub fn with_fault_sink(
        session: SessionId,
        scheduler: Arc<dyn SessionScheduler>,
        sink: Arc<dyn ChangeSink>,
        faults: Arc<dyn FaultSink>,
    ) -> Arc<Self> {
        Arc::new(Self {
            session,
            scheduler,
            sink,
            faults,
            jobs: SegQueue::new(),
            next_seq: AtomicU64::new(0),
        })
    }

    pub fn session(&self) -> &SessionId {
        &self.session
    }

    /// Number of jobs waiting for a drain.
    pub fn pending_jobs(&self) -> usize {
        self.jobs.len()
    }

    /// Runs `callback` on the owner thread and blocks until it returns.
    ///
    /// Returns `None` without running the callback when the session is gone.
    /// A panic in the callback is resumed on the calling thread.
    pub fn run_blocking<R, F>(&self, callback: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        self.scheduler.schedule_on_owner(
            &self.session,
            Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(callback));
                let _ = sender.send(outcome);
            }),
            true,
        );

        match futures::executor::block_on(receiver) {
            Ok(Ok(value)) => Some(value),
            Ok(Err(payload)) => panic::resume_unwind(payload),
            Err(oneshot::Canceled) => {
                debug!(session = %self.session, "session gone, blocking callback skipped");
                None
            }
        }
    }

    /// Queues `callback` and asks the owner thread to flush the queue.
    ///
    /// Does not block. If the session is gone the job stays queued and never runs.
    pub fn run_deferred<F>(self: &Arc<Self>, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        self.jobs.push(Job {
            seq,
            callback: Box::new(callback),
        });
        trace!(session = %self.session, job = seq, "job deferred");

        let executor = Arc::clone(self);
        self.scheduler.schedule_on_owner(
            &self.session,
            Box::new(move || {
                executor.flush();
            }),
            false,
        );
    }

    /// Runs the jobs queued when the drain starts, oldest first.
    ///
    /// Must be called on the owner thread. A panicking job is reported to the
    /// fault sink and the drain moves on. Returns whether any job ran.
    pub fn drain(&self) -> bool {
        // Jobs queued while draining have their own flush scheduled.
        let budget = self.jobs.len();
        let mut ran = false;
        for _ in 0..budget {
            let Some(job) = self.jobs.pop() else {
                break;
            };
            let seq = job.seq;
            if let Err(payload) = job.run() {
                let fault = JobFault::from_panic(payload);
                self.faults.job_faulted(&self.session, &fault);
            }
            trace!(session = %self.session, job = seq, "job ran");
            ran = true;
        }
        ran
    }

    /// Drains, then tells the change sink if anything ran.
    pub fn flush(&self) -> bool {
        let ran = self.drain();
        if ran {
            self.sink.state_changed(&self.session);
        }
        ran
    }

    /// Makes this executor current on this thread until the guard drops.
    pub fn enter(self: &Arc<Self>) -> EnterGuard {
        let previous = CURRENT.with(|current| current.replace(Some(Arc::clone(self))));
        EnterGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    /// The executor entered on this thread, if any.
    pub fn current() -> Option<Arc<SessionExecutor>> {
        CURRENT.with(|current| current.borrow().clone())
    }

    /// Spawns `future` as a session task.
    ///
    /// The first poll happens right away on the calling thread, which should
    /// be the owner thread. Every later poll is a deferred job.
    pub fn spawn<F>(self: &Arc<Self>, future: F) -> TaskHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let (task, handle) = Task::new(Arc::clone(self), future);
        debug!(session = %self.session, task = task.id(), "spawning session task");
        task.poll();
        handle
    }
}

/// Restores the previously current executor on drop.
#[must_use = "the executor is only current while the guard is alive"]
pub struct EnterGuard {
    previous: Option<Arc<SessionExecutor>>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for EnterGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // Ignored during thread teardown, when the slot is already gone.
        let _ = CURRENT.try_with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    use parking_lot::Mutex;

    use super::*;
    use crate::testing::{InlineScheduler, ManualScheduler, fixture};

    #[test]
    fn deferred_jobs_run_in_submission_order() {
        let fx = fixture::<ManualScheduler>();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..50 {
            let seen = seen.clone();
            fx.executor.run_deferred(move || seen.lock().push(i));
        }
        assert_eq!(fx.executor.pending_jobs(), 50);

        assert!(fx.executor.drain());
        assert_eq!(*seen.lock(), (0..50).collect::<Vec<_>>());
        assert_eq!(fx.executor.pending_jobs(), 0);
        // drain alone never notifies
        assert_eq!(fx.sink.count(), 0);
    }

    #[test]
    fn deferred_jobs_from_many_threads_keep_per_thread_order() {
        let fx = fixture::<ManualScheduler>();
        let seen = Arc::new(Mutex::new(Vec::new()));

        std::thread::scope(|scope| {
            for producer in 0..4 {
                let executor = fx.executor.clone();
                let seen = seen.clone();
                scope.spawn(move || {
                    for i in 0..100 {
                        let seen = seen.clone();
                        executor.run_deferred(move || seen.lock().push((producer, i)));
                    }
                });
            }
        });
        fx.executor.drain();

        let seen = seen.lock();
        assert_eq!(seen.len(), 400);
        for producer in 0..4 {
            let order: Vec<_> = seen
                .iter()
                .filter(|(p, _)| *p == producer)
                .map(|(_, i)| *i)
                .collect();
            assert_eq!(order, (0..100).collect::<Vec<_>>());
        }
    }

    #[test]
    fn empty_flush_does_not_notify() {
        let fx = fixture::<ManualScheduler>();
        assert!(!fx.executor.drain());
        assert!(!fx.executor.flush());
        assert_eq!(fx.sink.count(), 0);
    }

    #[test]
    fn flush_notifies_once_per_batch() {
        let fx = fixture::<ManualScheduler>();
        let hits = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let hits = hits.clone();
            fx.executor.run_deferred(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(fx.scheduler.parked(), 3);

        // the first flush runs all three, the others find nothing
        assert_eq!(fx.scheduler.run_parked(), 3);
        assert_eq!(hits.load(Ordering::SeqCst), 3);
        assert_eq!(fx.sink.count(), 1);
    }

    #[test]
    fn concurrent_drains_run_each_job_once() {
        let fx = fixture::<ManualScheduler>();
        let counters: Arc<Vec<AtomicUsize>> =
            Arc::new((0..2_000).map(|_| AtomicUsize::new(0)).collect());

        for i in 0..counters.len() {
            let counters = counters.clone();
            fx.executor.run_deferred(move || {
                counters[i].fetch_add(1, Ordering::SeqCst);
            });
        }

        std::thread::scope(|scope| {
            for _ in 0..2 {
                let executor = fx.executor.clone();
                scope.spawn(move || executor.drain());
            }
        });
        fx.executor.drain();

        assert!(counters.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn faulting_job_does_not_stop_the_drain() {
        let fx = fixture::<ManualScheduler>();
        let after = Arc::new(AtomicBool::new(false));

        fx.executor.run_deferred(|| panic!("job exploded"));
        let flag = after.clone();
        fx.executor.run_deferred(move || flag.store(true, Ordering::SeqCst));

        assert!(fx.executor.flush());
        assert!(after.load(Ordering::SeqCst));
        assert_eq!(fx.faults.messages(), vec!["job exploded".to_owned()]);
        assert_eq!(fx.sink.count(), 1);
    }

    #[test]
    fn run_blocking_returns_the_callback_value() {
        let fx = fixture::<InlineScheduler>();
        assert_eq!(fx.executor.run_blocking(|| 6 * 7), Some(42));
    }

    #[test]
    fn run_blocking_on_missing_session_skips_callback() {
        let fx = fixture::<InlineScheduler>();
        fx.scheduler.end_session();
        let ran = Arc::new(AtomicBool::new(false));

        let flag = ran.clone();
        let result = fx
            .executor
            .run_blocking(move || flag.store(true, Ordering::SeqCst));

        assert!(result.is_none());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "blocking boom")]
    fn run_blocking_propagates_panics() {
        let fx = fixture::<InlineScheduler>();
        fx.executor.run_blocking::<(), _>(|| panic!("blocking boom"));
    }

    #[test]
    fn deferred_job_on_missing_session_stays_queued() {
        let fx = fixture::<ManualScheduler>();
        fx.scheduler.end_session();

        fx.executor.run_deferred(|| unreachable!("session is gone"));

        assert_eq!(fx.scheduler.parked(), 0);
        assert_eq!(fx.executor.pending_jobs(), 1);
        assert_eq!(fx.sink.count(), 0);
    }

    #[test]
    fn enter_restores_previous_executor() {
        let outer = fixture::<ManualScheduler>().executor;
        let inner = fixture::<ManualScheduler>().executor;
        assert!(SessionExecutor::current().is_none());

        let outer_guard = outer.enter();
        {
            let _inner_guard = inner.enter();
            let current = SessionExecutor::current().unwrap();
            assert!(Arc::ptr_eq(&current, &inner));
        }
        let current = SessionExecutor::current().unwrap();
        assert!(Arc::ptr_eq(&current, &outer));

        drop(outer_guard);
        assert!(SessionExecutor::current().is_none());
    }

    #[test]
    fn enter_is_restored_when_unwinding() {
        let outer = fixture::<ManualScheduler>().executor;
        let inner = fixture::<ManualScheduler>().executor;
        let _outer_guard = outer.enter();

        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            let _inner_guard = inner.enter();
            panic!("inside scope");
        }));

        assert!(result.is_err());
        let current = SessionExecutor::current().unwrap();
        assert!(Arc::ptr_eq(&current, &outer));
    }
}
