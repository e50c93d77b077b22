//! # Tedio Affinity
//!
//! Session-affine task scheduling: async work may run on any worker thread,
//! but everything it does to a session's visible state happens on the one
//! thread that owns the session.
//!
//! ## Overview
//!
//! - [`SessionExecutor`] queues continuation work for a session and drains
//!   it on the owner thread in submission order, telling the host's
//!   [`ChangeSink`] when something actually ran. Futures spawned on it resume
//!   there too.
//! - [`PropertyChangeAwaiter`] turns "this state changed" handlers into
//!   single-resolution futures, so a dialog flow can simply `.await` the
//!   user's answer.
//! - [`BackgroundOperation`] runs cancellable, time-sliced work on a tokio
//!   runtime and reports progress and its outcome back on the owner thread.
//!
//! The host's session registry and observable state plug in through
//! [`SessionScheduler`] and [`ObservableState`]; [`host`] has small
//! reference implementations.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tedio_affinity::host::ThreadedHost;
//! use tedio_affinity::{SessionExecutor, SessionId};
//!
//! let host = Arc::new(ThreadedHost::new());
//! let session = SessionId::from("session-1");
//! host.open_session(&session)?;
//! let executor = SessionExecutor::new(session.clone(), host.clone(), host.clone());
//!
//! // Any thread may queue work; it runs on the session's owner thread.
//! let worker = executor.clone();
//! std::thread::spawn(move || worker.run_deferred(|| println!("on the owner thread")))
//!     .join()
//!     .unwrap();
//!
//! let owner = executor.run_blocking(|| std::thread::current().name().map(str::to_owned));
//! assert_eq!(owner.flatten().as_deref(), Some("session-session-1"));
//! # Ok::<(), tedio_affinity::AffinityError>(())
//! ```

pub mod awaiter;
pub mod cancel;
pub mod config;
pub mod error;
pub mod executor;
pub mod host;
pub mod operation;
pub mod progress;
pub mod session;
pub mod task;
mod waker;

#[cfg(test)]
mod testing;

// Re-export commonly used items for convenience
pub use awaiter::{ChangeFuture, PropertyChangeAwaiter};
pub use cancel::{OperationSlot, OperationTicket};
pub use config::WorkConfig;
pub use error::{AffinityError, JobFault, Result};
pub use executor::{EnterGuard, SessionExecutor};
pub use operation::{BackgroundOperation, OperationStatus};
pub use progress::Progress;
pub use session::{
    ChangeHandler, ChangeSink, FaultSink, Handled, HandlerId, ObservableState, OwnerCallback,
    SessionId, SessionScheduler, StateId, TracingFaultSink,
};
pub use task::TaskHandle;
