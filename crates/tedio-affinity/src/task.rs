//! Session tasks and their handles.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::{BoxFuture, Fuse};
use futures::task::waker_ref;
use parking_lot::Mutex;
use pin_project::pin_project;
use tracing::trace;

use crate::error::{AffinityError, Result};
use crate::executor::SessionExecutor;

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// A future pinned to one session; every poll happens under its executor.
pub(crate) struct Task {
    id: u64,
    pub(crate) executor: Arc<SessionExecutor>,
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    /// Set by every poll request, cleared by the thread that services it.
    repoll: AtomicBool,
}

impl Task {
    pub(crate) fn new<T, F>(executor: Arc<SessionExecutor>, fut: F) -> (Arc<Self>, TaskHandle<T>)
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let id = NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed);

        let fut = async move {
            let output = fut.await;
            if sender.send(output).is_err() {
                trace!(task = id, "task handle dropped, output discarded");
            }
        }
        .boxed();

        let task = Arc::new(Self {
            id,
            executor,
            future: Mutex::new(Some(fut)),
            repoll: AtomicBool::new(false),
        });
        (task, TaskHandle::new(receiver))
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Polls the future with its executor entered.
    ///
    /// Every call records a pending wake. Whoever holds the future lock
    /// consumes pending wakes, so a call that finds the task busy leaves its
    /// wake to the holder. A task woken and drained from inside its own poll
    /// is not polled re-entrantly; the outer poll goes round again instead.
    pub(crate) fn poll(self: &Arc<Self>) {
        let _entered = self.executor.enter();
        self.repoll.store(true, Ordering::SeqCst);
        loop {
            let Some(mut slot) = self.future.try_lock() else {
                return;
            };
            if !self.repoll.swap(false, Ordering::SeqCst) {
                drop(slot);
                // a wake may have landed between the swap and the unlock
                if self.repoll.load(Ordering::SeqCst) {
                    continue;
                }
                return;
            }
            if let Some(fut) = slot.as_mut() {
                let waker = waker_ref(self);
                let mut cx = Context::from_waker(&waker);
                if fut.as_mut().poll(&mut cx).is_ready() {
                    *slot = None;
                    trace!(task = self.id, "task finished");
                }
            }
        }
    }
}

/// Resolves to the output of a spawned session task.
///
/// Dropping the handle does not cancel the task.
#[pin_project]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct TaskHandle<T> {
    #[pin]
    receiver: Fuse<oneshot::Receiver<T>>,
}

impl<T> TaskHandle<T> {
    fn new(receiver: oneshot::Receiver<T>) -> Self {
        Self {
            receiver: receiver.fuse(),
        }
    }
}

impl<T> Future for TaskHandle<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        match this.receiver.poll(cx) {
            Poll::Ready(Ok(output)) => Poll::Ready(Ok(output)),
            Poll::Ready(Err(oneshot::Canceled)) => Poll::Ready(Err(AffinityError::TaskDropped)),
            Poll::Pending => Poll::Pending,
        }
    }
}
