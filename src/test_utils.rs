//! Test utilities for the APGAS runtime.
//!
//! Logging setup, the lock serializing `APGAS_*` environment mutation, and
//! small runtime constructors.

use std::sync::{Mutex, MutexGuard, Once, PoisonError};

use crate::runtime::{Runtime, RuntimeBuilder};

static INIT_LOGGING: Once = Once::new();
static ENV_LOCK: Mutex<()> = Mutex::new(());

/// Installs a trace-level test subscriber. Only the first call has effect.
pub(crate) fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_ansi(false)
            .try_init();
    });
}

/// Acquire the global environment lock for tests that mutate env vars.
pub(crate) fn env_lock() -> MutexGuard<'static, ()> {
    ENV_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Builder for a small test run with `places` places and two threads each.
pub(crate) fn test_builder(places: usize) -> RuntimeBuilder {
    Runtime::builder()
        .places(places)
        .threads(2)
        .max_threads(32)
        .thread_name_prefix("apgas-test")
}

/// Builds a test run, panicking on failure.
///
/// Holds the environment lock while `APGAS_*` variables are read so that
/// env-mutating tests do not leak into it.
pub(crate) fn test_runtime(places: usize) -> Runtime {
    let _guard = env_lock();
    test_builder(places).build().expect("test runtime")
}
