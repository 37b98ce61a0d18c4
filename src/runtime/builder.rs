//! Runtime builder and handles.

use std::fmt;
use std::path::PathBuf;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::job::{JobRegistry, RemoteCall, RemoteJob};
use crate::launcher::{self, LaunchSpec, Launcher};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::context::{self, Context, ContextGuard};
use crate::runtime::env_config::apply_env_overrides;
use crate::runtime::factories::Factories;
use crate::runtime::place_runtime::PlaceRuntime;
use crate::runtime::registry::PlaceRegistry;
use crate::runtime::scheduler::{PoolConfig, WorkerPool};
use crate::serialization::SerializationFormat;
use crate::transport::{Inbound, Transport};
use crate::types::Place;

type ConfigEdit = Box<dyn FnOnce(&mut RuntimeConfig) + Send>;

/// Builder for a place runtime.
///
/// Values set on the builder win over `APGAS_*` environment variables,
/// which win over [`RuntimeConfig::default()`].
///
/// ```ignore
/// let runtime = Runtime::builder()
///     .places(4)
///     .register_job::<Bump>()
///     .build()?;
/// runtime.finish(|| {
///     for place in apgas::constructs::places()? {
///         apgas::constructs::async_at(place, Bump { counter: counter.clone() })?;
///     }
///     Ok(())
/// })?;
/// ```
pub struct RuntimeBuilder {
    base: RuntimeConfig,
    edits: Vec<ConfigEdit>,
    use_env: bool,
    jobs: JobRegistry,
    factories: Factories,
}

impl RuntimeBuilder {
    /// Create a new builder with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: RuntimeConfig::default(),
            edits: Vec::new(),
            use_env: true,
            jobs: JobRegistry::new(),
            factories: Factories::new(),
        }
    }

    /// Builder that starts from `config` as is, ignoring the environment.
    #[must_use]
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            base: config,
            use_env: false,
            ..Self::new()
        }
    }

    fn edit(mut self, f: impl FnOnce(&mut RuntimeConfig) + Send + 'static) -> Self {
        self.edits.push(Box::new(f));
        self
    }

    /// Set the number of places of the run.
    #[must_use]
    pub fn places(self, n: usize) -> Self {
        self.edit(move |c| c.places = n)
    }

    /// Set the target number of unblocked workers per place.
    #[must_use]
    pub fn threads(self, n: usize) -> Self {
        self.edit(move |c| c.threads = n)
    }

    /// Set the limit on workers per place.
    #[must_use]
    pub fn max_threads(self, n: usize) -> Self {
        self.edit(move |c| c.max_threads = n)
    }

    /// Enable or disable resilience to place failures.
    #[must_use]
    pub fn resilient(self, enable: bool) -> Self {
        self.edit(move |c| c.resilient = enable)
    }

    /// Log job encode and decode failures at `warn`.
    #[must_use]
    pub fn verbose_serialization(self, enable: bool) -> Self {
        self.edit(move |c| c.verbose_serialization = enable)
    }

    /// Log place launches.
    #[must_use]
    pub fn verbose_launcher(self, enable: bool) -> Self {
        self.edit(move |c| c.verbose_launcher = enable)
    }

    /// Join the run at `address` instead of starting a new one.
    #[must_use]
    pub fn master(self, address: impl Into<String>) -> Self {
        let address = address.into();
        self.edit(move |c| c.master = Some(address))
    }

    /// Set the hostfile places are launched from.
    #[must_use]
    pub fn hostfile(self, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        self.edit(move |c| c.hostfile = Some(path))
    }

    /// Set the wire format.
    #[must_use]
    pub fn serialization(self, format: SerializationFormat) -> Self {
        self.edit(move |c| c.serialization = format)
    }

    /// Select the finish implementation by name.
    #[must_use]
    pub fn finish(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.edit(move |c| c.finish = Some(name))
    }

    /// Select the transport by name.
    #[must_use]
    pub fn transport(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.edit(move |c| c.transport = name)
    }

    /// Select the launcher by name.
    #[must_use]
    pub fn launcher(self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.edit(move |c| c.launcher = name)
    }

    /// Set the worker thread name prefix.
    #[must_use]
    pub fn thread_name_prefix(self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.edit(move |c| c.thread_name_prefix = prefix)
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub fn thread_stack_size(self, size: usize) -> Self {
        self.edit(move |c| c.thread_stack_size = size)
    }

    /// Set how long spare workers idle before retiring.
    #[must_use]
    pub fn idle_timeout(self, timeout: Duration) -> Self {
        self.edit(move |c| c.idle_timeout = timeout)
    }

    /// Set how long the first place waits for the others to join.
    #[must_use]
    pub fn startup_timeout(self, timeout: Duration) -> Self {
        self.edit(move |c| c.startup_timeout = timeout)
    }

    /// Register a job type at every place of the run.
    #[must_use]
    pub fn register_job<J: RemoteJob>(mut self) -> Self {
        self.jobs.register_job::<J>();
        self
    }

    /// Register a call type for `at_call`.
    #[must_use]
    pub fn register_call<C: RemoteCall>(mut self) -> Self {
        self.jobs.register_call::<C>();
        self
    }

    /// Register a call type as a place-local initializer.
    #[must_use]
    pub fn register_place_local<C>(mut self) -> Self
    where
        C: RemoteCall,
        C::Output: Sync,
    {
        self.jobs.register_place_local::<C>();
        self
    }

    /// Replace the job registry.
    #[must_use]
    pub fn jobs(mut self, jobs: JobRegistry) -> Self {
        self.jobs = jobs;
        self
    }

    /// Replace the factory table.
    #[must_use]
    pub fn factories(mut self, factories: Factories) -> Self {
        self.factories = factories;
        self
    }

    /// Register a transport constructor.
    #[must_use]
    pub fn register_transport<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&RuntimeConfig) -> Result<Box<dyn Transport>> + Send + Sync + 'static,
    {
        self.factories.register_transport(name, factory);
        self
    }

    /// Register a launcher constructor.
    #[must_use]
    pub fn register_launcher<F>(mut self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&RuntimeConfig) -> Result<Box<dyn Launcher>> + Send + Sync + 'static,
    {
        self.factories.register_launcher(name, factory);
        self
    }

    /// Resolves the configuration this builder would start with.
    pub fn config(&mut self) -> Result<RuntimeConfig> {
        let mut config = self.base.clone();
        if self.use_env {
            apply_env_overrides(&mut config)?;
        }
        for edit in self.edits.drain(..) {
            edit(&mut config);
        }
        config.normalize();
        self.base = config.clone();
        self.use_env = false;
        Ok(config)
    }

    /// Starts the place. The first place of a run also launches the others
    /// and returns once all of them have joined.
    pub fn build(mut self) -> Result<Runtime> {
        let config = self.config()?;
        Runtime::start(config, self.jobs, self.factories)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RuntimeBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeBuilder")
            .field("base", &self.base)
            .field("pending_edits", &self.edits.len())
            .field("use_env", &self.use_env)
            .field("jobs", &self.jobs)
            .finish_non_exhaustive()
    }
}

/// Handle on the runtime of one place.
///
/// Dropping the handle shuts the place down.
pub struct Runtime {
    inner: Arc<PlaceRuntime>,
}

/// Keeps the runtime's context installed on the current thread.
pub struct EnterGuard {
    _guard: ContextGuard,
}

impl Runtime {
    /// Returns a builder with default configuration.
    #[must_use]
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    fn start(config: RuntimeConfig, jobs: JobRegistry, factories: Factories) -> Result<Self> {
        let transport = factories.transport(&config)?;
        let here = transport.here();
        let pool = WorkerPool::new(PoolConfig {
            threads: config.threads,
            max_threads: config.max_threads,
            thread_name_prefix: format!("{}-p{}", config.thread_name_prefix, here.id()),
            thread_stack_size: config.thread_stack_size,
            idle_timeout: config.idle_timeout,
        })?;
        let runtime = Self {
            inner: Arc::new(PlaceRuntime::new(config, jobs, pool, transport)),
        };
        let inbound = Arc::downgrade(&runtime.inner) as Weak<dyn Inbound>;
        runtime.inner.transport().start(inbound)?;
        // Membership arrives on the delivery thread; the place must see itself
        // before any construct can check a place.
        runtime.await_members(None, |registry| registry.contains(here))?;

        let config = runtime.inner.config();
        debug!(
            place = %here,
            address = %runtime.address(),
            finish = runtime.inner.finish_kind().name(),
            serialization = config.serialization.name(),
            "place started"
        );
        if config.master.is_none() && config.places > 1 {
            runtime.launch_places(factories)?;
        }
        if here == Place::FIRST {
            info!(places = runtime.inner.registry().len(), address = %runtime.address(), "run started");
        }
        Ok(runtime)
    }

    /// Launches the other places of a run and waits for them to join.
    fn launch_places(&self, factories: Factories) -> Result<()> {
        let config = self.inner.config();
        let launcher: Arc<dyn Launcher> = Arc::from(factories.launcher(config)?);
        self.inner.set_launcher(Arc::clone(&launcher));
        let spec = LaunchSpec {
            config: RuntimeConfig {
                master: Some(self.address()),
                ..config.clone()
            },
            jobs: self.inner.jobs().clone(),
            factories,
            hosts: launcher::read_hostfile(config.hostfile.as_deref()),
        };
        launcher.launch(config.places - 1, &spec)?;

        let places = config.places;
        self.await_members(Some(&*launcher), |registry| {
            registry.max_id() as usize >= places
        })
    }

    /// Polls the registry until `joined` holds, failing on an unhealthy
    /// launcher or after the startup timeout.
    fn await_members(
        &self,
        launcher: Option<&dyn Launcher>,
        joined: impl Fn(&PlaceRegistry) -> bool,
    ) -> Result<()> {
        let config = self.inner.config();
        let registry = self.inner.registry();
        let deadline = Instant::now() + config.startup_timeout;
        while !joined(registry) {
            if launcher.is_some_and(|launcher| !launcher.healthy()) {
                return Err(Error::config("a launched place failed to start"));
            }
            if Instant::now() >= deadline {
                return Err(Error::config(format!(
                    "{} of {} places joined within {:?}",
                    registry.len(),
                    config.places,
                    config.startup_timeout
                )));
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    /// Runs `f` in this runtime's context, installing a root context (under
    /// the untracked scope) if the thread has none for this runtime.
    fn scoped<R>(&self, f: impl FnOnce(&Context) -> Result<R>) -> Result<R> {
        if let Some(cx) = context::current() {
            if Arc::ptr_eq(&cx.place, &self.inner) {
                return f(&cx);
            }
        }
        let cx = Context::new(Arc::clone(&self.inner), self.inner.untracked());
        let _guard = context::set_current(Some(cx.clone()));
        f(&cx)
    }

    /// Installs this runtime's context on the current thread, so that the
    /// free functions of [`constructs`](crate::constructs) can be used.
    #[must_use]
    pub fn enter(&self) -> EnterGuard {
        let cx = Context::new(Arc::clone(&self.inner), self.inner.untracked());
        EnterGuard {
            _guard: context::set_current(Some(cx)),
        }
    }

    /// Runs `body` and waits for every task it spawned, at any place.
    pub fn finish(&self, body: impl FnOnce() -> Result<()>) -> Result<()> {
        self.finish_with(body)
    }

    /// Like [`finish`](Self::finish), returning the body's value.
    pub fn finish_with<T>(&self, body: impl FnOnce() -> Result<T>) -> Result<T> {
        self.scoped(|cx| cx.place.run_finish(cx, |_| body()))
    }

    /// Spawns `f` here under the current finish.
    pub fn async_(&self, f: impl FnOnce() -> Result<()> + Send + 'static) -> Result<()> {
        self.scoped(|cx| {
            cx.place.spawn_local(&cx.finish, Box::new(f));
            Ok(())
        })
    }

    /// Spawns `job` at `place` under the current finish.
    pub fn async_at<J: RemoteJob>(&self, place: Place, job: J) -> Result<()> {
        self.scoped(|cx| cx.place.async_at(cx, place, job))
    }

    /// Runs `job` at `place` and waits for it and everything it spawns.
    pub fn at<J: RemoteJob>(&self, place: Place, job: J) -> Result<()> {
        self.scoped(|cx| cx.place.at(cx, place, job))
    }

    /// Runs `call` at `place` and returns its output.
    pub fn at_call<C: RemoteCall>(&self, place: Place, call: C) -> Result<C::Output> {
        self.scoped(|cx| cx.place.at_call(cx, place, call))
    }

    /// Spawns `job` at `place` outside any finish.
    pub fn uncounted_async_at<J: RemoteJob>(&self, place: Place, job: J) -> Result<()> {
        self.scoped(|cx| cx.place.uncounted_async_at(place, job))
    }

    /// Runs `job` on the delivery thread of `place`, bypassing its pool.
    pub fn immediate_async_at<J: RemoteJob>(&self, place: Place, job: J) -> Result<()> {
        self.inner.immediate_async_at(place, job)
    }

    /// This place.
    #[must_use]
    pub fn here(&self) -> Place {
        self.inner.here()
    }

    /// Live places, in id order.
    #[must_use]
    pub fn places(&self) -> Vec<Place> {
        self.inner.registry().snapshot().to_vec()
    }

    /// Place with the given id, if it was ever part of the run.
    pub fn place(&self, id: i64) -> Result<Place> {
        let place = Place::new(id)?;
        self.inner.check_place(place)?;
        Ok(place)
    }

    /// Address other places join this run with.
    #[must_use]
    pub fn address(&self) -> String {
        self.inner.transport().address()
    }

    /// Effective configuration of this place.
    #[must_use]
    pub fn config(&self) -> &RuntimeConfig {
        self.inner.config()
    }

    /// Registers the callback run once per lost place in resilient mode.
    pub fn set_place_failure_handler(&self, handler: impl Fn(Place) + Send + Sync + 'static) {
        self.inner.set_failure_handler(Some(Arc::new(handler)));
    }

    /// Removes the place failure handler.
    pub fn clear_place_failure_handler(&self) {
        self.inner.set_failure_handler(None);
    }

    /// True once the place is shutting down.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.inner.is_dying()
    }

    /// Shuts the place down, and every place it launched. Idempotent.
    pub fn shutdown(&self) {
        self.inner.shutdown();
        self.inner.pool().join();
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("here", &self.inner.here())
            .field("places", &self.inner.registry().len())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl fmt::Debug for EnterGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnterGuard").finish_non_exhaustive()
    }
}
