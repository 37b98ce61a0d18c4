//! APGAS: Asynchronous Partitioned Global Address Space runtime for Rust.
//!
//! # Overview
//!
//! A run is a fixed set of *places*, each a separate runtime with its own
//! worker pool and its own memory. Work is spawned locally with `async_`,
//! shipped to other places with `async_at`, and gathered with `finish`,
//! which waits for every task spawned under it, at every place, however
//! deeply nested.
//!
//! # Core Guarantees
//!
//! - **Exactly-once accounting**: every spawned task is matched by one
//!   completion or one delivery failure in its finish
//! - **No lost failures**: errors and panics of spawned work surface from the
//!   enclosing `finish` as one composite error
//! - **Blocking compensation**: a worker waiting on a finish or a value slot
//!   is replaced by a spare worker, up to `max_threads`
//! - **Resilience** (opt-in): finish state lives in a durable map, so scopes
//!   survive the loss of any place, their own home included
//!
//! # Module Structure
//!
//! - [`constructs`]: `finish`, `async_`, `async_at`, `at`, `at_call`, ...
//! - [`runtime`]: Builder, configuration and the per-place runtime
//! - [`job`]: Named serializable jobs and their registry
//! - [`finish`]: Default and resilient termination detection
//! - [`global`]: Global ids, value slots and global references
//! - [`transport`]: Message and membership interface, in-process hub
//! - [`launcher`]: Starting the other places of a run
//! - [`store`]: Durable map behind resilient finishes
//! - [`serialization`]: Wire formats
//! - [`error`]: Error types
//! - [`types`]: Places and global ids

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::module_inception)]
#![allow(clippy::doc_markdown)]
#![allow(clippy::cast_possible_truncation)]

pub mod constructs;
pub mod error;
pub mod finish;
pub mod global;
pub mod job;
pub mod launcher;
mod remote;
pub mod runtime;
pub mod serialization;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-exports for convenient access to core types
pub use error::{Error, ErrorCategory, ErrorKind, Result, ResultExt};
pub use finish::resilient::ResilientFinishState;
pub use finish::FinishKind;
pub use global::GlobalRef;
pub use job::{JobRegistry, RemoteCall, RemoteJob};
pub use launcher::{InProcessLauncher, LaunchSpec, Launcher};
pub use runtime::{EnterGuard, Factories, Runtime, RuntimeBuilder, RuntimeConfig};
pub use serialization::{DeserializationError, SerializationError, SerializationFormat};
pub use store::{DurableMap, InMemoryDurableMap};
pub use transport::{Inbound, LocalHub, LocalTransport, Transport};
pub use types::{GlobalId, Place};
