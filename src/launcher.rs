//! Launching the places of a run.
//!
//! The first place of a run (the one started without a master address)
//! launches the other `places - 1` through a [`Launcher`], then waits until
//! they have all joined. Each launched place receives the first place's
//! configuration with `master` set to its address.
//!
//! [`InProcessLauncher`] starts each place as another runtime in the current
//! process.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::Result;
use crate::job::JobRegistry;
use crate::runtime::config::RuntimeConfig;
use crate::runtime::factories::Factories;
use crate::runtime::{Runtime, RuntimeBuilder};

/// Host used when no usable hostfile is configured.
pub const LOCALHOST: &str = "127.0.0.1";

/// Everything a launcher needs to start places that join a run.
#[derive(Clone)]
pub struct LaunchSpec {
    /// Configuration of the new places, `master` included.
    pub config: RuntimeConfig,
    /// Jobs the new places must be able to decode.
    pub jobs: JobRegistry,
    /// Transport and launcher constructors.
    pub factories: Factories,
    /// Hosts to spread the places over, in order.
    pub hosts: Vec<String>,
}

/// Starts additional places.
pub trait Launcher: Send + Sync {
    /// Launches `n` places described by `spec`.
    fn launch(&self, n: usize, spec: &LaunchSpec) -> Result<()>;

    /// False once a launched place failed to start or stopped early.
    fn healthy(&self) -> bool;

    /// Stops every launched place. Idempotent.
    fn shutdown(&self);
}

/// Reads the hostfile, one host per line; blank lines and `#` comments are
/// skipped. Falls back to [`LOCALHOST`] when the file is missing, unreadable
/// or lists no host.
pub fn read_hostfile(path: Option<&Path>) -> Vec<String> {
    let Some(path) = path else {
        return vec![LOCALHOST.to_string()];
    };
    let hosts: Vec<String> = match fs::read_to_string(path) {
        Ok(content) => content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect(),
        Err(err) => {
            warn!(hostfile = %path.display(), error = %err, "unable to read hostfile, using localhost");
            return vec![LOCALHOST.to_string()];
        }
    };
    if hosts.is_empty() {
        warn!(hostfile = %path.display(), "empty hostfile, using localhost");
        return vec![LOCALHOST.to_string()];
    }
    hosts
}

/// Launches places as runtimes inside the current process.
///
/// Hosts are assigned round robin and only reported in logs.
#[derive(Default)]
pub struct InProcessLauncher {
    children: Mutex<Vec<Runtime>>,
    failed: AtomicBool,
}

impl InProcessLauncher {
    /// Creates a launcher with no places.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of places launched and not yet shut down by the launcher.
    #[must_use]
    pub fn launched(&self) -> usize {
        self.children.lock().len()
    }
}

impl Launcher for InProcessLauncher {
    fn launch(&self, n: usize, spec: &LaunchSpec) -> Result<()> {
        for i in 0..n {
            let host = spec
                .hosts
                .get(i % spec.hosts.len().max(1))
                .map_or(LOCALHOST, String::as_str);
            if spec.config.verbose_launcher {
                info!(host = %host, master = ?spec.config.master, "launching place");
            }
            let child = RuntimeBuilder::with_config(spec.config.clone())
                .jobs(spec.jobs.clone())
                .factories(spec.factories.clone())
                .build();
            match child {
                Ok(child) => {
                    if spec.config.verbose_launcher {
                        info!(host = %host, place = %child.here(), "place launched");
                    }
                    self.children.lock().push(child);
                }
                Err(err) => {
                    self.failed.store(true, Ordering::Release);
                    return Err(err.with_message(format!("launching place on {host} failed")));
                }
            }
        }
        Ok(())
    }

    fn healthy(&self) -> bool {
        !self.failed.load(Ordering::Acquire)
            && self.children.lock().iter().all(|child| !child.is_shutdown())
    }

    fn shutdown(&self) {
        let children = std::mem::take(&mut *self.children.lock());
        for child in children {
            child.shutdown();
        }
    }
}
