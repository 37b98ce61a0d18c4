//! Live set of places.
//!
//! Mutations are serialized by one registry-wide lock; readers get an
//! immutable ordered snapshot that is replaced, never mutated, on change.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::types::Place;

#[derive(Debug, Default)]
struct Members {
    live: BTreeSet<Place>,
    max_id: u32,
}

/// The places currently taking part in the run.
#[derive(Debug)]
pub(crate) struct PlaceRegistry {
    members: Mutex<Members>,
    snapshot: RwLock<Arc<[Place]>>,
}

impl PlaceRegistry {
    pub(crate) fn new() -> Self {
        Self {
            members: Mutex::new(Members::default()),
            snapshot: RwLock::new(Arc::from(Vec::new())),
        }
    }

    /// Adds places; returns the ones that were not already live.
    pub(crate) fn add(&self, ids: &[Place]) -> Vec<Place> {
        let mut members = self.members.lock();
        let added: Vec<Place> = ids
            .iter()
            .copied()
            .filter(|p| members.live.insert(*p))
            .collect();
        for p in &added {
            members.max_id = members.max_id.max(p.id() + 1);
        }
        if !added.is_empty() {
            self.publish(&members);
        }
        added
    }

    /// Removes places; returns the ones that were live.
    pub(crate) fn remove(&self, ids: &[Place]) -> Vec<Place> {
        let mut members = self.members.lock();
        let removed: Vec<Place> = ids
            .iter()
            .copied()
            .filter(|p| members.live.remove(p))
            .collect();
        if !removed.is_empty() {
            self.publish(&members);
        }
        removed
    }

    fn publish(&self, members: &Members) {
        let snapshot: Arc<[Place]> = members.live.iter().copied().collect();
        *self.snapshot.write() = snapshot;
    }

    /// Ordered immutable view of the live places.
    pub(crate) fn snapshot(&self) -> Arc<[Place]> {
        Arc::clone(&self.snapshot.read())
    }

    /// First id never used by any place that joined so far.
    pub(crate) fn max_id(&self) -> u32 {
        self.members.lock().max_id
    }

    pub(crate) fn contains(&self, place: Place) -> bool {
        self.members.lock().live.contains(&place)
    }

    pub(crate) fn len(&self) -> usize {
        self.members.lock().live.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(id: u32) -> Place {
        Place::from_raw(id)
    }

    #[test]
    fn snapshots_are_ordered_and_immutable() {
        let registry = PlaceRegistry::new();
        registry.add(&[p(2), p(0), p(1)]);
        let before = registry.snapshot();
        assert_eq!(&*before, &[p(0), p(1), p(2)]);

        let removed = registry.remove(&[p(1), p(7)]);
        assert_eq!(removed, vec![p(1)]);
        assert_eq!(&*before, &[p(0), p(1), p(2)]);
        assert_eq!(&*registry.snapshot(), &[p(0), p(2)]);
    }

    #[test]
    fn max_id_survives_removal() {
        let registry = PlaceRegistry::new();
        registry.add(&[p(0), p(1), p(2)]);
        registry.remove(&[p(2)]);
        assert_eq!(registry.max_id(), 3);
        assert_eq!(registry.len(), 2);
        assert!(!registry.contains(p(2)));
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let registry = PlaceRegistry::new();
        assert_eq!(registry.add(&[p(0)]), vec![p(0)]);
        assert!(registry.add(&[p(0)]).is_empty());
        assert_eq!(registry.len(), 1);
    }
}
