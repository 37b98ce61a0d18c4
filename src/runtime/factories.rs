//! Named constructors for the pluggable parts of a place.
//!
//! The transport and the launcher are selected by name from the
//! configuration. [`Factories`] maps each name to a constructor; the builder
//! accepts additional registrations. An unknown name logs a warning and
//! falls back to the built-in default.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::error::{Error, Result};
use crate::launcher::{InProcessLauncher, Launcher};
use crate::runtime::config::RuntimeConfig;
use crate::transport::{LocalHub, Transport};

/// Name of the built-in in-process transport.
pub const LOCAL_TRANSPORT: &str = "local";
/// Name of the built-in in-process launcher.
pub const INPROCESS_LAUNCHER: &str = "inprocess";

/// Builds the transport of a starting place.
pub type TransportFactory = Arc<dyn Fn(&RuntimeConfig) -> Result<Box<dyn Transport>> + Send + Sync>;

/// Builds the launcher used by the first place of a run.
pub type LauncherFactory = Arc<dyn Fn(&RuntimeConfig) -> Result<Box<dyn Launcher>> + Send + Sync>;

/// Transport and launcher constructors, by name.
#[derive(Clone)]
pub struct Factories {
    transports: BTreeMap<String, TransportFactory>,
    launchers: BTreeMap<String, LauncherFactory>,
}

impl Factories {
    /// Table holding the built-in `local` transport and `inprocess` launcher.
    #[must_use]
    pub fn new() -> Self {
        let mut factories = Self {
            transports: BTreeMap::new(),
            launchers: BTreeMap::new(),
        };
        factories.register_transport(LOCAL_TRANSPORT, local_transport);
        factories.register_launcher(INPROCESS_LAUNCHER, |_| {
            Ok(Box::new(InProcessLauncher::new()) as Box<dyn Launcher>)
        });
        factories
    }

    /// Registers a transport constructor, replacing any under the same name.
    pub fn register_transport<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&RuntimeConfig) -> Result<Box<dyn Transport>> + Send + Sync + 'static,
    {
        self.transports.insert(name.into(), Arc::new(factory));
        self
    }

    /// Registers a launcher constructor, replacing any under the same name.
    pub fn register_launcher<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&RuntimeConfig) -> Result<Box<dyn Launcher>> + Send + Sync + 'static,
    {
        self.launchers.insert(name.into(), Arc::new(factory));
        self
    }

    /// Builds the transport named by `config.transport`.
    pub fn transport(&self, config: &RuntimeConfig) -> Result<Box<dyn Transport>> {
        let factory = lookup(&self.transports, "transport", &config.transport, LOCAL_TRANSPORT)?;
        factory(config)
    }

    /// Builds the launcher named by `config.launcher`.
    pub fn launcher(&self, config: &RuntimeConfig) -> Result<Box<dyn Launcher>> {
        let factory = lookup(&self.launchers, "launcher", &config.launcher, INPROCESS_LAUNCHER)?;
        factory(config)
    }

    /// Registered transport names, sorted.
    #[must_use]
    pub fn transport_names(&self) -> Vec<&str> {
        self.transports.keys().map(String::as_str).collect()
    }

    /// Registered launcher names, sorted.
    #[must_use]
    pub fn launcher_names(&self) -> Vec<&str> {
        self.launchers.keys().map(String::as_str).collect()
    }
}

impl Default for Factories {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Factories {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Factories")
            .field("transports", &self.transport_names())
            .field("launchers", &self.launcher_names())
            .finish()
    }
}

fn lookup<'a, F>(
    table: &'a BTreeMap<String, F>,
    what: &str,
    name: &str,
    fallback: &str,
) -> Result<&'a F> {
    if let Some(factory) = table.get(name) {
        return Ok(factory);
    }
    warn!(kind = %what, name = %name, using = %fallback, "unknown factory, using the default");
    table
        .get(fallback)
        .ok_or_else(|| Error::config(format!("no {what} registered under {fallback:?}")))
}

/// Joins the hub named by `master`, or creates a new hub for a first place.
fn local_transport(config: &RuntimeConfig) -> Result<Box<dyn Transport>> {
    let hub = match config.master.as_deref() {
        Some(address) => LocalHub::lookup(address)
            .ok_or_else(|| Error::config(format!("no local hub at address {address:?}")))?,
        None => LocalHub::create(),
    };
    Ok(Box::new(hub.connect()))
}
