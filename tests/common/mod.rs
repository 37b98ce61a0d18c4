#![allow(dead_code)]
#![allow(unused_imports)]
//! Shared integration test utilities.
//!
//! Import with:
//! ```
//! mod common;
//! use common::*;
//! ```

use apgas::{Runtime, RuntimeBuilder};
use std::sync::Once;
use std::time::{Duration, Instant};
use tracing_subscriber::fmt::format::FmtSpan;

static INIT_LOGGING: Once = Once::new();

/// How long tests wait for asynchronous effects before failing.
pub const SETTLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Installs a trace-level test subscriber once per test binary.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::TRACE)
            .with_test_writer()
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_thread_ids(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_ansi(false)
            .try_init();
    });
}

/// Builder for an in-process run of `places` places with small pools.
#[must_use]
pub fn test_builder(places: usize) -> RuntimeBuilder {
    Runtime::builder()
        .places(places)
        .threads(2)
        .max_threads(256)
        .thread_name_prefix("apgas-it")
}

/// Polls `condition` until it holds, panicking after [`SETTLE_TIMEOUT`].
pub fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + SETTLE_TIMEOUT;
    while !condition() {
        assert!(
            Instant::now() < deadline,
            "condition '{description}' not reached within {SETTLE_TIMEOUT:?}"
        );
        std::thread::sleep(Duration::from_millis(2));
    }
    tracing::debug!(description = %description, "condition reached");
}

/// Log a test phase transition with a visual separator.
#[macro_export]
macro_rules! test_phase {
    ($name:expr) => {
        tracing::info!(phase = %$name, "========================================");
        tracing::info!(phase = %$name, "TEST PHASE: {}", $name);
        tracing::info!(phase = %$name, "========================================");
    };
}

/// Log a section within a test phase.
#[macro_export]
macro_rules! test_section {
    ($name:expr) => {
        tracing::debug!(section = %$name, "--- {} ---", $name);
    };
}

/// Log test completion with summary.
#[macro_export]
macro_rules! test_complete {
    ($name:expr) => {
        tracing::info!(test = %$name, "test completed successfully: {}", $name);
    };
    ($name:expr, $($key:ident = $value:expr),* $(,)?) => {
        tracing::info!(
            test = %$name,
            $($key = %$value,)*
            "test completed successfully: {}",
            $name
        );
    };
}

/// Log before assertions for context.
#[macro_export]
macro_rules! assert_with_log {
    ($cond:expr, $msg:expr, $expected:expr, $actual:expr) => {
        tracing::debug!(
            expected = ?$expected,
            actual = ?$actual,
            "Asserting: {}",
            $msg
        );
        assert!($cond, "{}: expected {:?}, got {:?}", $msg, $expected, $actual);
    };
}

/// Assert that a finish failed with exactly one sub-failure of `kind`.
#[macro_export]
macro_rules! assert_single_failure {
    ($result:expr, $kind:expr) => {{
        let err = $result.expect_err("finish should fail");
        assert_eq!(err.kind(), ::apgas::ErrorKind::Multiple, "{err}");
        let kinds: Vec<::apgas::ErrorKind> = err.suppressed().iter().map(|e| e.kind()).collect();
        $crate::assert_with_log!(kinds == vec![$kind], "sub-failure kinds", vec![$kind], kinds);
        err
    }};
}
