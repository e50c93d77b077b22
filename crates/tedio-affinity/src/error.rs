//! Error types.

use std::any::Any;

use thiserror::Error;

use crate::session::StateId;

/// Result alias used throughout the crate.
pub type Result<T, E = AffinityError> = std::result::Result<T, E>;

/// Errors reported synchronously to callers.
///
/// A session that disappeared is not an error: operations aimed at it are
/// skipped and surface as `None` or a no-op.
#[derive(Debug, Error)]
pub enum AffinityError {
    /// A wait on this state identity is still unresolved.
    #[error("state `{0}` is already being awaited")]
    AlreadyAwaited(StateId),

    /// An awaiting operation was started outside an entered executor.
    #[error("no session executor is active on this thread")]
    NoActiveExecutor,

    /// The host dropped the change handler before the state changed.
    #[error("wait on state `{0}` was abandoned before it changed")]
    WaitAbandoned(StateId),

    /// A wait on any of several states was given none.
    #[error("no state identities to wait on")]
    NothingToAwait,

    /// The task was dropped before producing its output.
    #[error("task was dropped before it completed")]
    TaskDropped,

    #[error("invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for AffinityError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// A panic caught while running a deferred job or background step.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct JobFault {
    message: String,
}

impl JobFault {
    /// Extracts the message from a panic payload.
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_owned(),
                Err(_) => "non-string panic payload".to_owned(),
            },
        };
        Self { message }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}
