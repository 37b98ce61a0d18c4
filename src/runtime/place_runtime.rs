//! Per-place runtime state.
//!
//! A [`PlaceRuntime`] is everything one place owns: its worker pool, its
//! transport endpoint, the place registry, the finish table, value slots and
//! global references. Tasks, finish proxies and the transport's delivery
//! thread all reach it through an `Arc` (or a `Weak` for long-lived holders).

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::finish::{
    resilient, DefaultFinish, DefaultFinishProxy, Finish, FinishKind, FinishRef, FinishTable,
    ResilientFinish, UntrackedFinish,
};
use crate::global::refs::RefTable;
use crate::global::slots::ValueSlots;
use crate::job::{call_name, BoxedJob, CallEnvelope, JobPayload, JobRegistry, RemoteCall, RemoteJob};
use crate::launcher::Launcher;
use crate::remote::{self, Message};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::context::{self, Context};
use crate::runtime::registry::PlaceRegistry;
use crate::runtime::scheduler::{panic_message, WorkerPool};
use crate::runtime::task::Task;
use crate::serialization::SerializationFormat;
use crate::store::DurableMap;
use crate::transport::{Inbound, Transport};
use crate::types::{GlobalId, Place};

/// Callback invoked once per place lost in resilient mode.
pub(crate) type FailureHandler = Arc<dyn Fn(Place) + Send + Sync>;

/// State of one place.
pub(crate) struct PlaceRuntime {
    here: Place,
    config: RuntimeConfig,
    finish_kind: FinishKind,
    jobs: JobRegistry,
    pool: WorkerPool,
    transport: Box<dyn Transport>,
    store: Arc<dyn DurableMap>,
    registry: PlaceRegistry,
    finishes: FinishTable,
    slots: ValueSlots,
    refs: RefTable,
    next_seq: AtomicU64,
    untracked: Arc<dyn Finish>,
    failure_handler: RwLock<Option<FailureHandler>>,
    launcher: Mutex<Option<Arc<dyn Launcher>>>,
    dying: AtomicBool,
}

impl PlaceRuntime {
    pub(crate) fn new(
        config: RuntimeConfig,
        jobs: JobRegistry,
        pool: WorkerPool,
        transport: Box<dyn Transport>,
    ) -> Self {
        let here = transport.here();
        let store = transport.durable_map();
        let finish_kind = config.finish_kind();
        Self {
            here,
            config,
            finish_kind,
            jobs,
            pool,
            transport,
            store,
            registry: PlaceRegistry::new(),
            finishes: FinishTable::default(),
            slots: ValueSlots::default(),
            refs: RefTable::default(),
            next_seq: AtomicU64::new(1),
            untracked: Arc::new(UntrackedFinish::new(here)),
            failure_handler: RwLock::new(None),
            launcher: Mutex::new(None),
            dying: AtomicBool::new(false),
        }
    }

    pub(crate) const fn here(&self) -> Place {
        self.here
    }

    pub(crate) const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub(crate) const fn format(&self) -> SerializationFormat {
        self.config.serialization
    }

    pub(crate) const fn finish_kind(&self) -> FinishKind {
        self.finish_kind
    }

    pub(crate) const fn jobs(&self) -> &JobRegistry {
        &self.jobs
    }

    pub(crate) const fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub(crate) const fn finishes(&self) -> &FinishTable {
        &self.finishes
    }

    pub(crate) const fn registry(&self) -> &PlaceRegistry {
        &self.registry
    }

    pub(crate) const fn store(&self) -> &Arc<dyn DurableMap> {
        &self.store
    }

    pub(crate) const fn slots(&self) -> &ValueSlots {
        &self.slots
    }

    pub(crate) const fn refs(&self) -> &RefTable {
        &self.refs
    }

    pub(crate) fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub(crate) fn untracked(&self) -> Arc<dyn Finish> {
        Arc::clone(&self.untracked)
    }

    pub(crate) fn is_dying(&self) -> bool {
        self.dying.load(Ordering::Acquire)
    }

    pub(crate) fn set_failure_handler(&self, handler: Option<FailureHandler>) {
        *self.failure_handler.write() = handler;
    }

    pub(crate) fn set_launcher(&self, launcher: Arc<dyn Launcher>) {
        *self.launcher.lock() = Some(launcher);
    }

    /// Mints a run-wide unique id homed here.
    pub(crate) fn next_global_id(&self) -> GlobalId {
        GlobalId::from_parts(self.here, self.next_seq.fetch_add(1, Ordering::Relaxed))
    }

    /// Fails with `BadPlace` for ids never assigned in this run.
    pub(crate) fn check_place(&self, place: Place) -> Result<()> {
        if place.id() < self.registry.max_id() || place == self.here {
            Ok(())
        } else {
            Err(Error::bad_place(i64::from(place.id())).with_place(self.here))
        }
    }

    pub(crate) fn send_message(&self, dst: Place, message: &Message) -> Result<()> {
        let bytes = self.format().encode(message)?;
        self.transport.send(dst, bytes)
    }

    /// Hands a task to the pool. After shutdown the task is dropped; its
    /// finish has been released by then.
    pub(crate) fn submit(self: &Arc<Self>, task: Task) {
        if self.pool.execute(task.into_runnable(Arc::clone(self))).is_err() {
            debug!(place = %self.here, "pool is shut down, task dropped");
        }
    }

    /// Resolves the scope named by an inbound message.
    pub(crate) fn resolve_finish(self: &Arc<Self>, reference: FinishRef) -> Arc<dyn Finish> {
        match reference {
            FinishRef::Untracked => self.untracked(),
            FinishRef::Default(id) if id.home() == self.here => match self.finishes.home(id) {
                Some(home) => home as Arc<dyn Finish>,
                None => {
                    debug!(place = %self.here, finish = %id, "task for a finish that already returned");
                    self.untracked()
                }
            },
            FinishRef::Default(id) => {
                let weak = Arc::downgrade(self);
                let here = self.here;
                self.finishes
                    .proxy(id, || DefaultFinishProxy::new(id, here, weak))
            }
            FinishRef::Resilient(id) => Arc::new(ResilientFinish::handle(self, id)),
        }
    }

    /// Opens a scope homed here, nested in `parent`.
    fn make_finish(self: &Arc<Self>, parent: FinishRef) -> Result<Arc<dyn Finish>> {
        let id = self.next_global_id();
        match self.finish_kind {
            FinishKind::Default => {
                let finish = Arc::new(DefaultFinish::new(id));
                self.finishes.register_home(Arc::clone(&finish))?;
                Ok(finish as Arc<dyn Finish>)
            }
            FinishKind::Resilient => {
                let parent = match parent {
                    FinishRef::Resilient(parent) => Some(parent),
                    FinishRef::Untracked | FinishRef::Default(_) => None,
                };
                Ok(Arc::new(ResilientFinish::create(self, id, parent)?))
            }
        }
    }

    /// Runs `body` as the first task of a new scope, then waits for the
    /// scope to drain.
    pub(crate) fn run_finish<T>(
        self: &Arc<Self>,
        cx: &Context,
        body: impl FnOnce(&Context) -> Result<T>,
    ) -> Result<T> {
        let finish = self.make_finish(cx.finish.reference())?;
        let scope = Context::new(Arc::clone(self), Arc::clone(&finish));
        let outcome = {
            let _guard = context::set_current(Some(scope.clone()));
            panic::catch_unwind(AssertUnwindSafe(|| body(&scope)))
        };
        let (value, failure) = match outcome {
            Ok(Ok(value)) => (Some(value), None),
            Ok(Err(err)) => (None, Some(err)),
            Err(payload) => (
                None,
                Some(Error::panicked(panic_message(payload.as_ref())).with_place(self.here)),
            ),
        };
        finish.terminate(failure);
        let failures = self.pool.managed_block(|| finish.wait());
        self.finishes.forget(finish.reference());
        if !failures.is_empty() {
            return Err(Error::multiple(failures));
        }
        value.ok_or_else(|| Error::internal("finish body failed without a recorded failure"))
    }

    /// Spawns a closure here under `finish`.
    pub(crate) fn spawn_local(self: &Arc<Self>, finish: &Arc<dyn Finish>, job: BoxedJob) {
        finish.spawn(self.here);
        self.submit(Task::new(Arc::clone(finish), job, self.here));
    }

    /// Spawns a named job at `dst` under `finish`.
    ///
    /// Locally the value is turned into a job directly; remotely it is
    /// encoded and shipped under `name`.
    pub(crate) fn spawn_at<V: Serialize>(
        self: &Arc<Self>,
        finish: &Arc<dyn Finish>,
        dst: Place,
        name: &str,
        value: V,
        into_job: impl FnOnce(V) -> BoxedJob,
    ) -> Result<()> {
        self.check_place(dst)?;
        if dst == self.here {
            self.spawn_local(finish, into_job(value));
        } else {
            let payload = match JobPayload::encode(self.format(), name, &value) {
                // Nobody waits on an untracked task, so its caller hears of it.
                Err(err) if matches!(finish.reference(), FinishRef::Untracked) => {
                    remote::log_wire_failure(self, name, &err);
                    return Err(err);
                }
                payload => payload,
            };
            remote::ship(self, finish, dst, name, payload);
        }
        Ok(())
    }

    pub(crate) fn async_at<J: RemoteJob>(self: &Arc<Self>, cx: &Context, dst: Place, job: J) -> Result<()> {
        self.spawn_at(&cx.finish, dst, J::NAME, job, |job| Box::new(move || job.run()))
    }

    /// Runs `job` at `dst` in a finish of its own.
    pub(crate) fn at<J: RemoteJob>(self: &Arc<Self>, cx: &Context, dst: Place, job: J) -> Result<()> {
        self.check_place(dst)?;
        self.run_finish(cx, |scope| scope.place.async_at(scope, dst, job))
    }

    pub(crate) fn uncounted_async_at<J: RemoteJob>(self: &Arc<Self>, dst: Place, job: J) -> Result<()> {
        let untracked = self.untracked();
        self.spawn_at(&untracked, dst, J::NAME, job, |job| Box::new(move || job.run()))
    }

    /// Sends `job` as a control message run on the destination's delivery
    /// thread, outside any pool or finish.
    pub(crate) fn immediate_async_at<J: RemoteJob>(&self, dst: Place, job: J) -> Result<()> {
        self.check_place(dst)?;
        let payload = JobPayload::encode(self.format(), J::NAME, &job).map_err(|err| {
            remote::log_wire_failure(self, J::NAME, &err);
            err
        })?;
        self.send_message(
            dst,
            &Message::Immediate {
                origin: self.here,
                payload,
            },
        )
    }

    /// Runs `call` at `dst` and brings its output back.
    pub(crate) fn at_call<C: RemoteCall>(self: &Arc<Self>, cx: &Context, dst: Place, call: C) -> Result<C::Output> {
        self.check_place(dst)?;
        if dst == self.here {
            return self.run_finish(cx, |_| call.call());
        }
        let reply_to = self.next_global_id();
        let name = call_name::<C>();
        let format = self.format();
        let outcome = self.run_finish(cx, |scope| {
            scope.place.spawn_at(
                &scope.finish,
                dst,
                &name,
                CallEnvelope { call, reply_to },
                move |envelope| envelope.into_job(format),
            )
        });
        if let Err(err) = outcome {
            self.slots.discard(reply_to);
            return Err(err);
        }
        let bytes = self.slots.try_take::<Vec<u8>>(reply_to)?.ok_or_else(|| {
            Error::internal(format!("no result delivered for {name} from {dst}")).with_place(self.here)
        })?;
        // The reply is decoded after the finish returned; a failure still
        // surfaces as the composite error of the call.
        format
            .decode(&bytes)
            .map_err(|err| Error::multiple(vec![Error::from(err).with_place(self.here)]))
    }

    /// Stops the place. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.dying.swap(true, Ordering::AcqRel) {
            return;
        }
        info!(place = %self.here, "place shutting down");
        let launcher = self.launcher.lock().take();
        if let Some(launcher) = launcher {
            launcher.shutdown();
        }
        self.pool.shutdown();
        self.finishes.close(&Error::shutdown().with_place(self.here));
        self.slots.close();
        self.transport.shutdown();
    }

    /// Purges the state of lost places, then reports each to the handler.
    fn handle_place_failures(self: &Arc<Self>, dead: Vec<Place>) {
        let runtime = Arc::clone(self);
        let job: BoxedJob = Box::new(move || {
            for &place in &dead {
                resilient::purge_dead_place(&runtime, place);
            }
            let handler = runtime.failure_handler.read().clone();
            if let Some(handler) = handler {
                for &place in &dead {
                    handler(place);
                }
            }
            Ok(())
        });
        self.spawn_local(&self.untracked(), job);
    }
}

impl Inbound for PlaceRuntime {
    fn deliver(self: Arc<Self>, from: Place, bytes: Vec<u8>) {
        remote::deliver(&self, from, &bytes);
    }

    fn on_join(self: Arc<Self>, places: &[Place]) {
        let added = self.registry.add(places);
        if !added.is_empty() {
            debug!(place = %self.here, joined = ?added, "places joined");
        }
    }

    fn on_leave(self: Arc<Self>, places: &[Place]) {
        let removed = self.registry.remove(places);
        if removed.is_empty() || self.is_dying() {
            return;
        }
        if self.config.resilient {
            warn!(place = %self.here, lost = ?removed, "places left the run");
            self.handle_place_failures(removed);
        } else {
            warn!(place = %self.here, lost = ?removed, "place lost without resilience, shutting down");
            self.shutdown();
        }
    }

    fn on_killed(self: Arc<Self>) {
        warn!(place = %self.here, "place was removed from the run");
        self.shutdown();
    }
}
