//! Runtime configuration types.
//!
//! Use [`RuntimeBuilder`](super::builder::RuntimeBuilder) to build a runtime;
//! it starts from [`RuntimeConfig::default()`], applies `APGAS_*`
//! environment variables and then the values set on the builder.
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `places` | 1 |
//! | `threads` | available CPU parallelism |
//! | `max_threads` | 256 |
//! | `resilient` | false |
//! | `serialization` | JSON |
//! | `transport` | `"local"` |
//! | `launcher` | `"inprocess"` |
//! | `thread_name_prefix` | `"apgas"` |
//! | `thread_stack_size` | 2 MiB |
//! | `idle_timeout` | 1 s |

use std::path::PathBuf;
use std::time::Duration;

use crate::finish::FinishKind;
use crate::serialization::SerializationFormat;

/// Default limit on worker threads per place, blocked ones included.
pub const DEFAULT_MAX_THREADS: usize = 256;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Number of places of the run (default: 1).
    pub places: usize,
    /// Target number of unblocked workers per place.
    pub threads: usize,
    /// Hard limit on workers per place.
    pub max_threads: usize,
    /// Tolerate place failures (selects the resilient finish by default).
    pub resilient: bool,
    /// Log job encode and decode failures at `warn` instead of `debug`.
    pub verbose_serialization: bool,
    /// Log every place launch.
    pub verbose_launcher: bool,
    /// Address of the run to join. `None` starts a new run as its first place.
    pub master: Option<String>,
    /// File listing the hosts places are launched on.
    pub hostfile: Option<PathBuf>,
    /// Wire format of jobs and messages.
    pub serialization: SerializationFormat,
    /// Finish implementation; `None` derives it from `resilient`.
    pub finish: Option<String>,
    /// Name of the transport factory.
    pub transport: String,
    /// Name of the launcher factory.
    pub launcher: String,
    /// Name prefix for runtime threads.
    pub thread_name_prefix: String,
    /// Stack size per worker thread (0 for the platform default).
    pub thread_stack_size: usize,
    /// How long a spare worker idles before retiring.
    pub idle_timeout: Duration,
    /// How long the first place waits for the others to join.
    pub startup_timeout: Duration,
}

impl RuntimeConfig {
    /// Normalize configuration values to safe defaults.
    pub fn normalize(&mut self) {
        if self.places == 0 {
            self.places = 1;
        }
        if self.threads == 0 {
            self.threads = 1;
        }
        if self.max_threads < self.threads {
            self.max_threads = self.threads;
        }
        if self.thread_name_prefix.is_empty() {
            self.thread_name_prefix = "apgas".to_string();
        }
        if self.transport.is_empty() {
            self.transport = "local".to_string();
        }
        if self.launcher.is_empty() {
            self.launcher = "inprocess".to_string();
        }
    }

    /// Finish kind new scopes use: the configured one if it names a known
    /// kind, otherwise resilient or default according to `resilient`.
    pub(crate) fn finish_kind(&self) -> FinishKind {
        let fallback = if self.resilient {
            FinishKind::Resilient
        } else {
            FinishKind::Default
        };
        match self.finish.as_deref() {
            None => fallback,
            Some(name) => FinishKind::from_name(name).unwrap_or_else(|| {
                tracing::warn!(
                    finish = %name,
                    using = fallback.name(),
                    "unknown finish factory, using the default"
                );
                fallback
            }),
        }
    }

    pub(crate) fn default_threads() -> usize {
        std::thread::available_parallelism()
            .map_or(1, std::num::NonZeroUsize::get)
            .max(1)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            places: 1,
            threads: Self::default_threads(),
            max_threads: DEFAULT_MAX_THREADS,
            resilient: false,
            verbose_serialization: false,
            verbose_launcher: false,
            master: None,
            hostfile: None,
            serialization: SerializationFormat::default(),
            finish: None,
            transport: "local".to_string(),
            launcher: "inprocess".to_string(),
            thread_name_prefix: "apgas".to_string(),
            thread_stack_size: 2 * 1024 * 1024,
            idle_timeout: Duration::from_secs(1),
            startup_timeout: Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_repairs_zeroes() {
        let mut config = RuntimeConfig {
            places: 0,
            threads: 0,
            max_threads: 0,
            thread_name_prefix: String::new(),
            ..RuntimeConfig::default()
        };
        config.normalize();
        assert_eq!(config.places, 1);
        assert_eq!(config.threads, 1);
        assert_eq!(config.max_threads, 1);
        assert_eq!(config.thread_name_prefix, "apgas");
    }

    #[test]
    fn finish_kind_follows_resilience() {
        let mut config = RuntimeConfig::default();
        assert_eq!(config.finish_kind(), FinishKind::Default);
        config.resilient = true;
        assert_eq!(config.finish_kind(), FinishKind::Resilient);
        config.finish = Some("no.such.Finish".into());
        assert_eq!(config.finish_kind(), FinishKind::Resilient);
        config.finish = Some("default".into());
        assert_eq!(config.finish_kind(), FinishKind::Default);
    }
}
