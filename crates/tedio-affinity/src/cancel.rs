//! Cancellation slots for restartable background operations.

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct SlotState {
    generation: u64,
    token: Option<CancellationToken>,
}

/// Holds the token of the single active run of one logical operation.
///
/// Starting a run cancels the previous one first. Background code never
/// reads the slot; it works from the [`OperationTicket`] captured at start.
#[derive(Default)]
pub struct OperationSlot {
    state: Mutex<SlotState>,
}

impl OperationSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels any active run and installs a fresh token.
    pub fn begin(&self) -> OperationTicket {
        let mut state = self.state.lock();
        if let Some(previous) = state.token.take() {
            previous.cancel();
        }
        state.generation += 1;
        let token = CancellationToken::new();
        state.token = Some(token.clone());
        OperationTicket {
            generation: state.generation,
            token,
        }
    }

    /// Cancels the active run. Returns `false` if there was none to cancel.
    pub fn cancel(&self) -> bool {
        let state = self.state.lock();
        match &state.token {
            Some(token) if !token.is_cancelled() => {
                token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Marks the run of `ticket` as over so [`cancel`](Self::cancel) has
    /// nothing left to stop. A replaced ticket leaves the slot alone.
    pub fn end(&self, ticket: &OperationTicket) {
        let mut state = self.state.lock();
        if state.generation == ticket.generation {
            state.token = None;
        }
    }

    /// Whether `ticket` belongs to the most recent run.
    pub fn is_current(&self, ticket: &OperationTicket) -> bool {
        self.state.lock().generation == ticket.generation
    }
}

/// Private alias of one run's token, captured before the work leaves the
/// owner thread.
#[derive(Clone, Debug)]
pub struct OperationTicket {
    generation: u64,
    token: CancellationToken,
}

impl OperationTicket {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}
