//! Wake implementation for session tasks.
//!
//! Waking never polls on the waking thread: it queues a poll job on the
//! task's executor, so the future resumes on the session's owner thread no
//! matter which worker or timer thread completed the awaited event.
use std::sync::Arc;

use futures::task::ArcWake;

use crate::task::Task;

impl ArcWake for Task {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        let task = Arc::clone(arc_self);
        arc_self.executor.run_deferred(move || task.poll());
    }
}

#[cfg(test)]
mod tests {
    use futures::channel::oneshot;

    use crate::testing::{ManualScheduler, fixture};

    #[test]
    fn every_wake_queues_one_poll() {
        let fx = fixture::<ManualScheduler>();
        let (first_tx, first_rx) = oneshot::channel::<()>();
        let (second_tx, second_rx) = oneshot::channel::<()>();

        let _handle = fx.executor.spawn(async move {
            let _ = first_rx.await;
            let _ = second_rx.await;
        });

        first_tx.send(()).unwrap();
        assert_eq!(fx.executor.pending_jobs(), 1);
        assert_eq!(fx.scheduler.parked(), 1);

        fx.scheduler.run_parked();
        assert_eq!(fx.executor.pending_jobs(), 0);

        second_tx.send(()).unwrap();
        assert_eq!(fx.executor.pending_jobs(), 1);
    }
}
