//! Durable map holding resilient finish state.
//!
//! Resilient finish scopes keep their counters outside any single place so
//! that the state outlives the place that created it. The runtime only needs
//! a small keyed map with an atomic read-modify-write; [`DurableMap`] is that
//! interface. [`InMemoryDurableMap`] is shared by every place of a
//! [`LocalHub`](crate::LocalHub) and therefore survives the loss of any of
//! them.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::error::Result;
use crate::finish::resilient::ResilientFinishState;
use crate::types::GlobalId;

/// Keyed storage for resilient finish state, shared by all places of a run.
///
/// Implementations must make [`update`](DurableMap::update) atomic with
/// respect to every other operation on the same key.
pub trait DurableMap: Send + Sync {
    /// Stores `state` under `id`, replacing any previous entry.
    fn put(&self, id: GlobalId, state: ResilientFinishState) -> Result<()>;

    /// Returns a copy of the entry under `id`.
    fn get(&self, id: GlobalId) -> Result<Option<ResilientFinishState>>;

    /// Removes and returns the entry under `id`.
    fn remove(&self, id: GlobalId) -> Result<Option<ResilientFinishState>>;

    /// Ids of every stored entry.
    fn keys(&self) -> Result<Vec<GlobalId>>;

    /// Applies `f` to the entry under `id` in one atomic step.
    ///
    /// Returns a copy of the updated entry, or `None` without calling `f`
    /// when no entry exists.
    fn update(
        &self,
        id: GlobalId,
        f: &mut dyn FnMut(&mut ResilientFinishState),
    ) -> Result<Option<ResilientFinishState>>;
}

/// Process-local [`DurableMap`].
#[derive(Default)]
pub struct InMemoryDurableMap {
    entries: Mutex<HashMap<GlobalId, ResilientFinishState>>,
}

impl InMemoryDurableMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Returns true if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

impl DurableMap for InMemoryDurableMap {
    fn put(&self, id: GlobalId, state: ResilientFinishState) -> Result<()> {
        self.entries.lock().insert(id, state);
        Ok(())
    }

    fn get(&self, id: GlobalId) -> Result<Option<ResilientFinishState>> {
        Ok(self.entries.lock().get(&id).cloned())
    }

    fn remove(&self, id: GlobalId) -> Result<Option<ResilientFinishState>> {
        Ok(self.entries.lock().remove(&id))
    }

    fn keys(&self) -> Result<Vec<GlobalId>> {
        let mut keys: Vec<GlobalId> = self.entries.lock().keys().copied().collect();
        keys.sort_unstable();
        Ok(keys)
    }

    fn update(
        &self,
        id: GlobalId,
        f: &mut dyn FnMut(&mut ResilientFinishState),
    ) -> Result<Option<ResilientFinishState>> {
        let mut entries = self.entries.lock();
        Ok(entries.get_mut(&id).map(|state| {
            f(state);
            state.clone()
        }))
    }
}

impl fmt::Debug for InMemoryDurableMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryDurableMap")
            .field("entries", &self.len())
            .finish()
    }
}
