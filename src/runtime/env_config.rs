//! Environment variable support for [`RuntimeBuilder`](super::builder::RuntimeBuilder).
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`places(4)`)
//! 2. **Environment variables**: values from `APGAS_*` env vars
//! 3. **Defaults**: built-in defaults from [`RuntimeConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `APGAS_PLACES` | `usize` | `places` |
//! | `APGAS_THREADS` | `usize` | `threads` |
//! | `APGAS_MAX_THREADS` | `usize` | `max_threads` |
//! | `APGAS_RESILIENT` | `bool` | `resilient` |
//! | `APGAS_VERBOSE_SERIALIZATION` | `bool` | `verbose_serialization` |
//! | `APGAS_VERBOSE_LAUNCHER` | `bool` | `verbose_launcher` |
//! | `APGAS_MASTER` | `String` | `master` |
//! | `APGAS_HOSTFILE` | path | `hostfile` |
//! | `APGAS_SERIALIZATION` | `json`/`msgpack`/`bincode` | `serialization` |
//! | `APGAS_FINISH` | `String` | `finish` |
//! | `APGAS_TRANSPORT` | `String` | `transport` |
//! | `APGAS_LAUNCHER` | `String` | `launcher` |

use std::path::PathBuf;

use tracing::warn;

use crate::error::{Error, Result};
use crate::runtime::config::RuntimeConfig;
use crate::serialization::SerializationFormat;

/// Environment variable name for the number of places.
pub const ENV_PLACES: &str = "APGAS_PLACES";
/// Environment variable name for the worker thread target.
pub const ENV_THREADS: &str = "APGAS_THREADS";
/// Environment variable name for the worker thread limit.
pub const ENV_MAX_THREADS: &str = "APGAS_MAX_THREADS";
/// Environment variable name for resilient mode.
pub const ENV_RESILIENT: &str = "APGAS_RESILIENT";
/// Environment variable name for verbose serialization diagnostics.
pub const ENV_VERBOSE_SERIALIZATION: &str = "APGAS_VERBOSE_SERIALIZATION";
/// Environment variable name for verbose launcher diagnostics.
pub const ENV_VERBOSE_LAUNCHER: &str = "APGAS_VERBOSE_LAUNCHER";
/// Environment variable name for the address of the run to join.
pub const ENV_MASTER: &str = "APGAS_MASTER";
/// Environment variable name for the hostfile.
pub const ENV_HOSTFILE: &str = "APGAS_HOSTFILE";
/// Environment variable name for the wire format.
pub const ENV_SERIALIZATION: &str = "APGAS_SERIALIZATION";
/// Environment variable name for the finish factory.
pub const ENV_FINISH: &str = "APGAS_FINISH";
/// Environment variable name for the transport factory.
pub const ENV_TRANSPORT: &str = "APGAS_TRANSPORT";
/// Environment variable name for the launcher factory.
pub const ENV_LAUNCHER: &str = "APGAS_LAUNCHER";

/// Every variable read by [`apply_env_overrides`].
pub const ALL_VARS: &[&str] = &[
    ENV_PLACES,
    ENV_THREADS,
    ENV_MAX_THREADS,
    ENV_RESILIENT,
    ENV_VERBOSE_SERIALIZATION,
    ENV_VERBOSE_LAUNCHER,
    ENV_MASTER,
    ENV_HOSTFILE,
    ENV_SERIALIZATION,
    ENV_FINISH,
    ENV_TRANSPORT,
    ENV_LAUNCHER,
];

/// Apply environment variable overrides to a [`RuntimeConfig`].
///
/// Only variables that are set in the environment are applied.
/// Returns an error if a variable is set but contains an unparseable value.
pub fn apply_env_overrides(config: &mut RuntimeConfig) -> Result<()> {
    if let Some(val) = read_env(ENV_PLACES) {
        config.places = parse_usize(ENV_PLACES, &val)?;
    }
    if let Some(val) = read_env(ENV_THREADS) {
        config.threads = parse_usize(ENV_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_MAX_THREADS) {
        config.max_threads = parse_usize(ENV_MAX_THREADS, &val)?;
    }
    if let Some(val) = read_env(ENV_RESILIENT) {
        config.resilient = parse_bool(ENV_RESILIENT, &val)?;
    }
    if let Some(val) = read_env(ENV_VERBOSE_SERIALIZATION) {
        config.verbose_serialization = parse_bool(ENV_VERBOSE_SERIALIZATION, &val)?;
    }
    if let Some(val) = read_env(ENV_VERBOSE_LAUNCHER) {
        config.verbose_launcher = parse_bool(ENV_VERBOSE_LAUNCHER, &val)?;
    }
    if let Some(val) = read_env(ENV_MASTER) {
        config.master = Some(val);
    }
    if let Some(val) = read_env(ENV_HOSTFILE) {
        config.hostfile = Some(PathBuf::from(val));
    }
    if let Some(val) = read_env(ENV_SERIALIZATION) {
        config.serialization = parse_format(&val);
    }
    if let Some(val) = read_env(ENV_FINISH) {
        config.finish = Some(val);
    }
    if let Some(val) = read_env(ENV_TRANSPORT) {
        config.transport = val;
    }
    if let Some(val) = read_env(ENV_LAUNCHER) {
        config.launcher = val;
    }
    Ok(())
}

/// Read an environment variable, returning `None` if unset or blank.
fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|val| !val.trim().is_empty())
}

fn parse_usize(var_name: &str, val: &str) -> Result<usize> {
    val.trim().parse::<usize>().map_err(|e| {
        Error::config(format!(
            "invalid value for {var_name}: expected unsigned integer, got {val:?} ({e})"
        ))
    })
}

fn parse_bool(var_name: &str, val: &str) -> Result<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!(
            "invalid value for {var_name}: expected bool (true/false/1/0/yes/no), got {val:?}"
        ))),
    }
}

fn parse_format(val: &str) -> SerializationFormat {
    SerializationFormat::from_name(val).unwrap_or_else(|| {
        warn!(
            serialization = %val,
            "unknown serialization framework, using json"
        );
        SerializationFormat::Json
    })
}

// =========================================================================
// Tests
// =========================================================================
