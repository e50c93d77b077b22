//! In-memory observable state.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::session::{ChangeHandler, Handled, HandlerId, ObservableState, SessionId, StateId};

struct StateCell<V> {
    value: Option<V>,
    handlers: Vec<(HandlerId, ChangeHandler<V>)>,
    firing: bool,
    /// Handlers removed while they were taken out for firing.
    retired: HashSet<HandlerId>,
}

impl<V> Default for StateCell<V> {
    fn default() -> Self {
        Self {
            value: None,
            handlers: Vec::new(),
            firing: false,
            retired: HashSet::new(),
        }
    }
}

/// Named values owned by one session.
///
/// Handlers stay attached after firing unless they return
/// [`Handled::Remove`] or are removed by id.
pub struct StateTable<V> {
    owner: SessionId,
    cells: Mutex<HashMap<StateId, StateCell<V>>>,
    next_handler: AtomicU64,
}

impl<V: Clone + Send + 'static> StateTable<V> {
    pub fn new(owner: SessionId) -> Self {
        Self {
            owner,
            cells: Mutex::default(),
            next_handler: AtomicU64::new(1),
        }
    }

    pub fn get(&self, identity: &StateId) -> Option<V> {
        self.cells.lock().get(identity)?.value.clone()
    }

    /// Stores `value` and fires every handler attached to `identity`.
    ///
    /// Handlers run without the table locked and may attach or remove
    /// handlers, including themselves.
    pub fn set(&self, identity: impl Into<StateId>, value: V) {
        let identity = identity.into();
        let mut firing = {
            let mut cells = self.cells.lock();
            let cell = cells.entry(identity.clone()).or_default();
            cell.value = Some(value.clone());
            cell.firing = true;
            std::mem::take(&mut cell.handlers)
        };

        firing.retain_mut(|(_, handler)| handler(&self.owner, value.clone()) == Handled::Keep);

        let mut cells = self.cells.lock();
        let cell = cells.entry(identity).or_default();
        let retired = std::mem::take(&mut cell.retired);
        firing.retain(|(id, _)| !retired.contains(id));
        firing.append(&mut cell.handlers);
        cell.handlers = firing;
        cell.firing = false;
    }

    pub fn handler_count(&self, identity: &StateId) -> usize {
        self.cells
            .lock()
            .get(identity)
            .map_or(0, |cell| cell.handlers.len())
    }
}

impl<V: Clone + Send + 'static> ObservableState<V> for StateTable<V> {
    fn add_change_handler(&self, identity: &StateId, handler: ChangeHandler<V>) -> HandlerId {
        let id = HandlerId(self.next_handler.fetch_add(1, Ordering::Relaxed));
        self.cells
            .lock()
            .entry(identity.clone())
            .or_default()
            .handlers
            .push((id, handler));
        id
    }

    fn remove_change_handler(&self, identity: &StateId, handler: HandlerId) {
        let mut cells = self.cells.lock();
        let Some(cell) = cells.get_mut(identity) else {
            return;
        };
        let before = cell.handlers.len();
        cell.handlers.retain(|(id, _)| *id != handler);
        if cell.handlers.len() == before && cell.firing {
            cell.retired.insert(handler);
        }
    }
}
