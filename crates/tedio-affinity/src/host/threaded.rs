//! One dedicated owner thread per session.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use crossbeam::channel::{self, Sender};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tracing::{debug, error};

use crate::error::{JobFault, Result};
use crate::session::{ChangeSink, OwnerCallback, SessionId, SessionScheduler};

struct OwnerThread {
    sender: Sender<OwnerCallback>,
    thread: ThreadId,
    closed: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

/// Session registry running each session's callbacks on its own thread.
///
/// With a runtime handle, owner threads enter it, so session tasks may
/// create tokio timers and spawn onto the runtime.
#[derive(Default)]
pub struct ThreadedHost {
    sessions: Mutex<HashMap<SessionId, OwnerThread>>,
    pushes: Mutex<HashMap<SessionId, usize>>,
    runtime: Option<Handle>,
}

impl ThreadedHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_runtime(runtime: Handle) -> Self {
        Self {
            sessions: Mutex::default(),
            pushes: Mutex::default(),
            runtime: Some(runtime),
        }
    }

    /// Starts the owner thread for `session`. Opening an open session is a no-op.
    pub fn open_session(&self, session: &SessionId) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.contains_key(session) {
            return Ok(());
        }

        let (sender, receiver) = channel::unbounded::<OwnerCallback>();
        let closed = Arc::new(AtomicBool::new(false));
        let runtime = self.runtime.clone();
        let owner_closed = Arc::clone(&closed);
        let name = session.clone();

        let join = thread::Builder::new()
            .name(format!("session-{session}"))
            .spawn(move || {
                let _runtime = runtime.as_ref().map(Handle::enter);
                for callback in receiver.iter() {
                    if owner_closed.load(Ordering::Acquire) {
                        continue;
                    }
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(callback)) {
                        let fault = JobFault::from_panic(payload);
                        error!(session = %name, error = %fault, "owner callback panicked");
                    }
                }
                debug!(session = %name, "owner thread stopped");
            })?;

        let thread = join.thread().id();
        sessions.insert(
            session.clone(),
            OwnerThread {
                sender,
                thread,
                closed,
                join: Some(join),
            },
        );
        debug!(session = %session, "session opened");
        Ok(())
    }

    /// Ends `session`. Callbacks still queued for it are dropped unrun.
    pub fn close_session(&self, session: &SessionId) -> bool {
        let Some(mut owner) = self.sessions.lock().remove(session) else {
            return false;
        };
        owner.closed.store(true, Ordering::Release);
        drop(owner.sender);
        if let Some(join) = owner.join.take() {
            if join.thread().id() != thread::current().id() {
                let _ = join.join();
            }
        }
        debug!(session = %session, "session closed");
        true
    }

    pub fn is_open(&self, session: &SessionId) -> bool {
        self.sessions.lock().contains_key(session)
    }

    /// Runs `f` on the owner thread of `session`, like a host dispatching input.
    pub fn run_on_owner<R, F>(&self, session: &SessionId, f: F) -> Option<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (sender, receiver) = channel::bounded(1);
        self.schedule_on_owner(
            session,
            Box::new(move || {
                let _ = sender.send(f());
            }),
            true,
        );
        receiver.try_recv().ok()
    }

    /// How many times state changes were pushed for `session`.
    pub fn pushes(&self, session: &SessionId) -> usize {
        self.pushes.lock().get(session).copied().unwrap_or(0)
    }
}

impl SessionScheduler for ThreadedHost {
    fn schedule_on_owner(&self, session: &SessionId, callback: OwnerCallback, wait: bool) {
        let owner = self
            .sessions
            .lock()
            .get(session)
            .map(|owner| (owner.sender.clone(), owner.thread, Arc::clone(&owner.closed)));
        let Some((sender, thread, closed)) = owner else {
            debug!(session = %session, "session gone, callback dropped");
            return;
        };

        if !wait {
            let _ = sender.send(callback);
            return;
        }

        if thread == thread::current().id() {
            if !closed.load(Ordering::Acquire) {
                callback();
            }
            return;
        }

        let (done, finished) = channel::bounded::<()>(1);
        let queued = sender.send(Box::new(move || {
            callback();
            let _ = done.send(());
        }));
        if queued.is_ok() {
            // Errors when the callback was dropped unrun or panicked.
            let _ = finished.recv();
        }
    }
}

impl ChangeSink for ThreadedHost {
    fn state_changed(&self, session: &SessionId) {
        *self.pushes.lock().entry(session.clone()).or_default() += 1;
        debug!(session = %session, "pushing state delta");
    }
}

impl Drop for ThreadedHost {
    fn drop(&mut self) {
        let sessions: Vec<SessionId> = self.sessions.lock().keys().cloned().collect();
        for session in sessions {
            self.close_session(&session);
        }
    }
}
