//! Session identities and the host services an executor is built on.
//!
//! The host owns sessions and their threads. This crate only talks to it
//! through the traits below.

use std::fmt;
use std::sync::Arc;

use tracing::error;

use crate::error::JobFault;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(Arc<str>);

        impl $name {
            pub fn new(id: impl Into<Arc<str>>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.into())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id.into())
            }
        }
    };
}

opaque_id! {
    /// Identity of one client session; the routing key for owner-thread work.
    SessionId
}

opaque_id! {
    /// Name of one observable piece of session state.
    StateId
}

/// Work handed to the thread owning a session.
pub type OwnerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Runs callbacks on the thread that owns a session.
pub trait SessionScheduler: Send + Sync {
    /// Runs `callback` on the owner thread of `session`.
    ///
    /// When the session no longer exists the callback is dropped without
    /// running. With `wait_for_completion` the call returns only once the
    /// callback has finished or has been dropped.
    fn schedule_on_owner(
        &self,
        session: &SessionId,
        callback: OwnerCallback,
        wait_for_completion: bool,
    );
}

/// Told when resumed work changed session state and the delta should be pushed.
pub trait ChangeSink: Send + Sync {
    fn state_changed(&self, session: &SessionId);
}

/// What a change handler wants done with itself after firing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handled {
    Keep,
    Remove,
}

/// Handler invoked with `(owner, new_value)` when a piece of state is set.
pub type ChangeHandler<V> = Box<dyn FnMut(&SessionId, V) -> Handled + Send + 'static>;

/// Registration of one change handler, unique within its observable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct HandlerId(pub u64);

/// Host-side registration of change handlers on named state.
///
/// A handler returning [`Handled::Remove`] is detached after that call and
/// dropped. Removing a handler that already went away is a no-op.
pub trait ObservableState<V>: Send + Sync {
    fn add_change_handler(&self, identity: &StateId, handler: ChangeHandler<V>) -> HandlerId;

    fn remove_change_handler(&self, identity: &StateId, handler: HandlerId);
}

/// Receives faults of deferred jobs.
pub trait FaultSink: Send + Sync {
    fn job_faulted(&self, session: &SessionId, fault: &JobFault);
}

/// Default fault sink, reports through `tracing`.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingFaultSink;

impl FaultSink for TracingFaultSink {
    fn job_faulted(&self, session: &SessionId, fault: &JobFault) {
        error!(session = %session, error = %fault, "unhandled fault in deferred job");
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn ids_compare_by_content() {
        let a = SessionId::from("abc");
        let b = SessionId::from(String::from("abc"));
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "abc");

        let states: HashSet<StateId> = ["Confirm", "Cancel", "Confirm"]
            .into_iter()
            .map(StateId::from)
            .collect();
        assert_eq!(states.len(), 2);
        assert!(states.contains(&StateId::new("Cancel")));
    }
}
