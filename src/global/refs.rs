//! Per-place table of values reachable through global references.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::types::GlobalId;

type Shared = Arc<dyn Any + Send + Sync>;

/// Values registered at this place under a global id.
#[derive(Default)]
pub(crate) struct RefTable {
    values: Mutex<HashMap<GlobalId, Shared>>,
}

impl RefTable {
    pub(crate) fn insert(&self, id: GlobalId, value: Shared) {
        self.values.lock().insert(id, value);
    }

    /// Returns the value under `id` if there is one and it is a `T`.
    pub(crate) fn get<T: Send + Sync + 'static>(&self, id: GlobalId) -> Option<Arc<T>> {
        let value = self.values.lock().get(&id).cloned()?;
        value.downcast::<T>().ok()
    }

    pub(crate) fn remove(&self, id: GlobalId) -> bool {
        self.values.lock().remove(&id).is_some()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.values.lock().len()
    }
}
