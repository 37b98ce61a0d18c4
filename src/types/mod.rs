//! Core value types for the APGAS runtime.
//!
//! - [`place`]: place identifiers
//! - [`id`]: run-wide unique identifiers (`GlobalId`)

pub mod id;
pub mod place;

pub use id::GlobalId;
pub use place::Place;
