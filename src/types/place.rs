//! Place identifiers.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A place: one participating process, identified by a non-negative integer.
///
/// Places are totally ordered by id. A `Place` value is immutable; whether the
/// place is still alive is a property of the runtime's registry, not of the
/// value.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Place(u32);

impl Place {
    /// The first place of every run.
    pub const FIRST: Self = Self(0);

    /// Creates a place from a raw id.
    ///
    /// Fails with [`ErrorKind::BadPlace`](crate::ErrorKind::BadPlace) for
    /// negative ids and ids that do not fit the id space. Whether the id is
    /// below the run's first unused id is checked by
    /// [`Runtime::place`](crate::Runtime::place).
    pub fn new(id: i64) -> Result<Self> {
        u32::try_from(id).map(Self).map_err(|_| Error::bad_place(id))
    }

    pub(crate) const fn from_raw(id: u32) -> Self {
        Self(id)
    }

    /// Returns the numeric id of this place.
    #[must_use]
    pub const fn id(self) -> u32 {
        self.0
    }

    /// Returns the id as a slice index.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Place({})", self.0)
    }
}

impl fmt::Display for Place {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "place {}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_id_is_bad_place() {
        let err = Place::new(-1).expect_err("negative id");
        assert!(err.is_bad_place());
    }

    #[test]
    fn oversized_id_is_bad_place() {
        let err = Place::new(i64::from(u32::MAX) + 1).expect_err("too large");
        assert!(err.is_bad_place());
    }

    #[test]
    fn places_order_by_id() {
        let mut places = vec![
            Place::new(3).expect("valid"),
            Place::new(0).expect("valid"),
            Place::new(2).expect("valid"),
        ];
        places.sort();
        let ids: Vec<u32> = places.iter().map(|p| p.id()).collect();
        assert_eq!(ids, vec![0, 2, 3]);
    }

    #[test]
    fn formats() {
        let p = Place::new(7).expect("valid");
        assert_eq!(format!("{p:?}"), "Place(7)");
        assert_eq!(p.to_string(), "place 7");
        assert_eq!(serde_json::to_string(&p).expect("encode"), "7");
    }
}
