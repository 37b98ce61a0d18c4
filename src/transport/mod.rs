//! Transport interface between places.
//!
//! The runtime hands encoded messages to a [`Transport`] and receives
//! traffic and membership changes through the [`Inbound`] callbacks it
//! registers at start. Delivery between any two places is FIFO, and
//! membership events travel in the same stream as data, so a place sees a
//! peer's departure only after everything the peer sent before leaving.
//!
//! [`LocalHub`] connects places living in one process.

pub mod local;

use std::sync::{Arc, Weak};

use crate::error::Result;
use crate::store::DurableMap;
use crate::types::Place;

pub use local::{LocalHub, LocalTransport};

/// Callbacks from a transport into the place runtime it serves.
///
/// Called on the transport's delivery thread, one event at a time.
pub trait Inbound: Send + Sync {
    /// A message from `from` arrived.
    fn deliver(self: Arc<Self>, from: Place, bytes: Vec<u8>);

    /// Places joined the run. The first call lists every current member.
    fn on_join(self: Arc<Self>, places: &[Place]);

    /// Places left the run, normally or not.
    fn on_leave(self: Arc<Self>, places: &[Place]);

    /// This place was removed from the run by force.
    fn on_killed(self: Arc<Self>);
}

/// Message and membership service used by one place.
pub trait Transport: Send + Sync {
    /// Id assigned to this place.
    fn here(&self) -> Place;

    /// First place id never assigned so far.
    fn max_place(&self) -> u32;

    /// Address other places use to join this run.
    fn address(&self) -> String;

    /// Sends `bytes` to `dst`. Fails if `dst` is not a live member.
    fn send(&self, dst: Place, bytes: Vec<u8>) -> Result<()>;

    /// Joins the run and starts delivering to `inbound`.
    fn start(&self, inbound: Weak<dyn Inbound>) -> Result<()>;

    /// Durable map shared by every place of the run.
    fn durable_map(&self) -> Arc<dyn DurableMap>;

    /// Leaves the run and stops delivery. Idempotent.
    fn shutdown(&self);
}
