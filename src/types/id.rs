//! Run-wide unique identifiers.

use core::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Place;

/// A token that is unique across the whole run.
///
/// A global id is minted at one place (its home) from that place's sequence
/// counter. It addresses finish scopes, value slots and global references.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GlobalId {
    home: Place,
    seq: u64,
}

impl GlobalId {
    pub(crate) const fn from_parts(home: Place, seq: u64) -> Self {
        Self { home, seq }
    }

    /// Returns the place that minted this id.
    #[must_use]
    pub const fn home(self) -> Place {
        self.home
    }

    /// Returns the per-place sequence number.
    #[must_use]
    pub const fn seq(self) -> u64 {
        self.seq
    }
}

impl fmt::Debug for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "GlobalId({}:{})", self.home.id(), self.seq)
    }
}

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}.{}", self.home.id(), self.seq)
    }
}
