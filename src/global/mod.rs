//! Distributed reference utilities.
//!
//! - [`GlobalId`] allocation and the per-place value slots behind
//!   [`GlobalId::put_here`] / [`GlobalId::remove_here`]
//! - [`GlobalRef`]: references to values registered at one place, and
//!   place-local handles with one value per place

mod global_ref;
pub(crate) mod refs;
pub(crate) mod slots;

pub use global_ref::GlobalRef;

use crate::error::Result;
use crate::runtime::context;
use crate::types::GlobalId;

impl GlobalId {
    /// Allocates a fresh id homed at the current place.
    pub fn new() -> Result<Self> {
        context::with_current(|cx| Ok(cx.place.next_global_id()))
    }

    /// Deposits `value` into this id's slot at the current place.
    pub fn put_here<T: Send + 'static>(self, value: T) -> Result<()> {
        context::with_current(|cx| {
            cx.place.slots().put(self, Box::new(value));
            Ok(())
        })
    }

    /// Waits until this id's slot at the current place holds a value, then
    /// removes and returns it.
    ///
    /// A worker waiting here is compensated by the pool. Fails with
    /// `Shutdown` when the place shuts down and with `Internal` if the value
    /// is not a `T`.
    pub fn remove_here<T: Send + 'static>(self) -> Result<T> {
        context::with_current(|cx| {
            let slots = cx.place.slots();
            cx.place.pool().managed_block(|| slots.take_blocking::<T>(self))
        })
    }
}
