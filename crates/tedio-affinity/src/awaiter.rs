//! Property-change awaiter.
//!
//! Bridges push-style "value changed" handlers into single-resolution
//! futures. At most one wait per state identity may be outstanding; a second
//! [`PropertyChangeAwaiter::await_change`] on the same identity is rejected
//! with [`AffinityError::AlreadyAwaited`] until the first resolves or is
//! dropped.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures::FutureExt;
use futures::channel::oneshot;
use futures::future::select_all;
use parking_lot::Mutex;
use pin_project::{pin_project, pinned_drop};
use tracing::trace;

use crate::error::{AffinityError, Result};
use crate::executor::SessionExecutor;
use crate::session::{Handled, HandlerId, ObservableState, SessionId, StateId};

type WaitTable = Arc<Mutex<HashMap<StateId, u64>>>;

/// Removes `identity` from the table only if `registration` still owns it.
fn release(waits: &WaitTable, identity: &StateId, registration: u64) {
    let mut waits = waits.lock();
    if waits.get(identity) == Some(&registration) {
        waits.remove(identity);
    }
}

pub struct PropertyChangeAwaiter<V> {
    executor: Arc<SessionExecutor>,
    observable: Arc<dyn ObservableState<V>>,
    waits: WaitTable,
    next_registration: AtomicU64,
}

impl<V: Send + 'static> PropertyChangeAwaiter<V> {
    pub fn new(executor: Arc<SessionExecutor>, observable: Arc<dyn ObservableState<V>>) -> Self {
        Self {
            executor,
            observable,
            waits: Arc::default(),
            next_registration: AtomicU64::new(0),
        }
    }

    /// Builds an awaiter for the executor entered on this thread.
    pub fn from_current(observable: Arc<dyn ObservableState<V>>) -> Result<Self> {
        let executor = SessionExecutor::current().ok_or(AffinityError::NoActiveExecutor)?;
        Ok(Self::new(executor, observable))
    }

    pub fn executor(&self) -> &Arc<SessionExecutor> {
        &self.executor
    }

    pub fn is_awaiting(&self, identity: &StateId) -> bool {
        self.waits.lock().contains_key(identity)
    }

    /// Returns a future resolving with the next value set on `identity`.
    ///
    /// The handler resolves the future at most once, then drains the
    /// executor so continuations run without another scheduling round trip.
    /// It detaches from the observable after firing; dropping the future
    /// unresolved detaches it too.
    pub fn await_change(&self, identity: impl Into<StateId>) -> Result<ChangeFuture<V>> {
        let identity = identity.into();
        let registration = self.next_registration.fetch_add(1, Ordering::Relaxed);
        {
            let mut waits = self.waits.lock();
            if waits.contains_key(&identity) {
                return Err(AffinityError::AlreadyAwaited(identity));
            }
            waits.insert(identity.clone(), registration);
        }

        let (sender, receiver) = oneshot::channel();
        let mut resolver = Some(sender);
        let executor = Arc::clone(&self.executor);
        let waits = Arc::clone(&self.waits);
        let changed = identity.clone();
        let handler = self.observable.add_change_handler(
            &identity,
            Box::new(move |owner: &SessionId, value: V| {
                let Some(sender) = resolver.take() else {
                    return Handled::Remove;
                };
                release(&waits, &changed, registration);
                if sender.send(value).is_err() {
                    trace!(session = %owner, state = %changed, "change arrived after the wait was dropped");
                    return Handled::Remove;
                }
                trace!(session = %owner, state = %changed, "state wait resolved");
                executor.drain();
                Handled::Remove
            }),
        );

        Ok(ChangeFuture {
            receiver,
            identity,
            registration,
            waits: Arc::clone(&self.waits),
            observable: Arc::clone(&self.observable),
            handler,
            settled: false,
        })
    }

    /// Waits for whichever of `identities` changes first.
    ///
    /// The other waits are dropped, which frees their identities.
    pub async fn await_any<I, S>(&self, identities: I) -> Result<(StateId, V)>
    where
        I: IntoIterator<Item = S>,
        S: Into<StateId>,
    {
        let mut waits = Vec::new();
        for identity in identities {
            let wait = self.await_change(identity)?;
            let identity = wait.identity().clone();
            waits.push(wait.map(move |value| value.map(|value| (identity, value))).boxed());
        }
        if waits.is_empty() {
            return Err(AffinityError::NothingToAwait);
        }
        let (first, _, _rest) = select_all(waits).await;
        first
    }
}

/// Single-resolution future for one pending property wait.
#[pin_project(PinnedDrop)]
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct ChangeFuture<V> {
    #[pin]
    receiver: oneshot::Receiver<V>,
    identity: StateId,
    registration: u64,
    waits: WaitTable,
    observable: Arc<dyn ObservableState<V>>,
    handler: HandlerId,
    settled: bool,
}

impl<V> ChangeFuture<V> {
    pub fn identity(&self) -> &StateId {
        &self.identity
    }
}

impl<V> Future for ChangeFuture<V> {
    type Output = Result<V>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        if *this.settled {
            return Poll::Pending;
        }

        let output = match this.receiver.poll(cx) {
            Poll::Ready(Ok(value)) => Ok(value),
            Poll::Ready(Err(oneshot::Canceled)) => {
                Err(AffinityError::WaitAbandoned(this.identity.clone()))
            }
            Poll::Pending => return Poll::Pending,
        };
        *this.settled = true;
        release(this.waits, this.identity, *this.registration);
        Poll::Ready(output)
    }
}

#[pinned_drop]
impl<V> PinnedDrop for ChangeFuture<V> {
    fn drop(self: Pin<&mut Self>) {
        let this = self.project();
        if !*this.settled {
            release(this.waits, this.identity, *this.registration);
            this.observable.remove_change_handler(this.identity, *this.handler);
        }
    }
}
