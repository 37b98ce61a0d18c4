//! Per-place value slots keyed by global id.

use std::any::{type_name, Any};
use std::collections::HashMap;

use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::types::GlobalId;

type Value = Box<dyn Any + Send>;

#[derive(Default)]
struct SlotsState {
    values: HashMap<GlobalId, Value>,
    closed: bool,
}

/// Values deposited at this place, waiting to be taken.
///
/// Each slot holds at most one value; a second `put` replaces the first.
#[derive(Default)]
pub(crate) struct ValueSlots {
    state: Mutex<SlotsState>,
    filled: Condvar,
}

fn downcast<T: 'static>(id: GlobalId, value: Value) -> std::result::Result<T, (Value, Error)> {
    value.downcast::<T>().map(|boxed| *boxed).map_err(|value| {
        let err = Error::internal(format!(
            "slot {id} does not hold a {}",
            type_name::<T>()
        ));
        (value, err)
    })
}

impl ValueSlots {
    pub(crate) fn put(&self, id: GlobalId, value: Value) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.values.insert(id, value);
        drop(state);
        self.filled.notify_all();
    }

    /// Blocks until the slot holds a value, then removes it.
    ///
    /// Fails with `Shutdown` once the slots are closed and with `Internal`
    /// if the value is not a `T`, in which case it stays in the slot.
    pub(crate) fn take_blocking<T: 'static>(&self, id: GlobalId) -> Result<T> {
        let mut state = self.state.lock();
        loop {
            if let Some(value) = state.values.remove(&id) {
                return downcast(id, value).map_err(|(value, err)| {
                    state.values.insert(id, value);
                    err
                });
            }
            if state.closed {
                return Err(Error::shutdown());
            }
            self.filled.wait(&mut state);
        }
    }

    /// Removes the slot's value if there is one.
    pub(crate) fn try_take<T: 'static>(&self, id: GlobalId) -> Result<Option<T>> {
        let mut state = self.state.lock();
        match state.values.remove(&id) {
            Some(value) => downcast(id, value).map(Some).map_err(|(value, err)| {
                state.values.insert(id, value);
                err
            }),
            None => Ok(None),
        }
    }

    pub(crate) fn discard(&self, id: GlobalId) {
        self.state.lock().values.remove(&id);
    }

    /// Drops every value and fails current and future waiters.
    pub(crate) fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        state.values.clear();
        drop(state);
        self.filled.notify_all();
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.state.lock().values.len()
    }
}
