//! Runtime state and scheduling.
//!
//! This module contains the per-place runtime machinery:
//!
//! - [`config`]: Runtime configuration types
//! - [`env_config`]: `APGAS_*` environment overrides
//! - [`builder`]: Runtime builder and handles
//! - [`factories`]: Named transport and launcher constructors
//! - `place_runtime`: State of one place and the construct implementations
//! - `scheduler`: Work-stealing worker pool with blocking compensation
//! - `registry`: Live set of places
//! - `context`: Thread-local place and finish of the running code
//! - `task`: Jobs bound to a finish scope
//!
//! # Runtime Builder
//!
//! The runtime is configured with a fluent, move-based builder API. Each
//! builder method consumes `self` and returns an updated builder.
//!
//! ## Quick Start
//!
//! ```ignore
//! use apgas::Runtime;
//!
//! let runtime = Runtime::builder().places(4).build()?;
//! runtime.finish(|| {
//!     for place in apgas::constructs::places()? {
//!         apgas::constructs::async_at(place, Hello)?;
//!     }
//!     Ok(())
//! })?;
//! ```
//!
//! ## Resilient Runs
//!
//! ```ignore
//! let runtime = Runtime::builder()
//!     .places(3)
//!     .resilient(true)
//!     .build()?;
//! runtime.set_place_failure_handler(|place| eprintln!("lost {place}"));
//! ```
//!
//! ## Joining an Existing Run
//!
//! ```ignore
//! let runtime = Runtime::builder().master(address).build()?;
//! ```
//!
//! # Configuration Reference (Defaults + Notes)
//!
//! - `places`: default = 1. The first place launches the other `places - 1`.
//! - `threads`: default = available parallelism (min 1). Unblocked worker target.
//! - `max_threads`: default = 256. Upper bound on spare workers spawned for
//!   blocked ones.
//! - `resilient`: default = false. Selects the resilient finish; place loss is
//!   reported instead of shutting the place down.
//! - `serialization`: default = JSON. Must match at every place.
//! - `thread_name_prefix`: default = `apgas`. Workers are named
//!   `{prefix}-p{place}-worker-{n}`.
//! - `thread_stack_size`: default = 2 MiB.
//! - `idle_timeout`: default = 1 s. How long spare workers linger.

pub mod builder;
pub mod config;
pub(crate) mod context;
pub mod env_config;
pub mod factories;
pub(crate) mod place_runtime;
pub(crate) mod registry;
pub(crate) mod scheduler;
pub(crate) mod task;

pub use builder::{EnterGuard, Runtime, RuntimeBuilder};
pub use config::RuntimeConfig;
pub use factories::{Factories, LauncherFactory, TransportFactory};
pub(crate) use place_runtime::PlaceRuntime;
