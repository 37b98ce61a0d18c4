//! Work-stealing worker pool of a place.
//!
//! Each worker owns a LIFO deque. Work submitted from outside the pool goes
//! through a shared FIFO injector, and idle workers steal FIFO from their
//! peers starting at a random victim.
//!
//! A worker that blocks (waiting for a finish scope or for a value slot)
//! does so through [`WorkerPool::managed_block`]. While it is blocked the
//! pool may spawn a spare worker so that the number of unblocked workers
//! stays at the configured `threads`, up to `max_threads` workers in total.
//! Spares retire again after an idle timeout once enough workers are
//! unblocked.

pub(crate) mod global_queue;
pub(crate) mod local_queue;
pub(crate) mod stealing;
pub(crate) mod worker;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use global_queue::GlobalQueue;
use local_queue::Stealer;
use worker::{Worker, WorkerId};

/// A unit of work executed by the pool.
pub(crate) type Runnable = Box<dyn FnOnce() + Send + 'static>;

static NEXT_POOL_ID: AtomicUsize = AtomicUsize::new(1);

/// Worker pool sizing and thread options.
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    /// Target number of unblocked workers.
    pub threads: usize,
    /// Hard limit on workers, blocked or not.
    pub max_threads: usize,
    /// Prefix of worker thread names.
    pub thread_name_prefix: String,
    /// Worker stack size in bytes (0 for the platform default).
    pub thread_stack_size: usize,
    /// How long a spare worker idles before retiring.
    pub idle_timeout: Duration,
}

/// Shared state of a pool.
pub(crate) struct PoolInner {
    id: usize,
    config: PoolConfig,
    global: GlobalQueue<Runnable>,
    stealers: RwLock<Vec<Stealer<Runnable>>>,
    spawned: AtomicUsize,
    blocked: AtomicUsize,
    next_worker: AtomicUsize,
    sleep: Mutex<()>,
    wakeup: Condvar,
    shutdown: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to a place's worker pool.
#[derive(Clone)]
pub(crate) struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Creates a pool and eagerly starts `threads` workers.
    pub(crate) fn new(config: PoolConfig) -> Result<Self> {
        let threads = config.threads.max(1);
        let max_threads = config.max_threads.max(threads);
        let inner = Arc::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            config: PoolConfig {
                threads,
                max_threads,
                ..config
            },
            global: GlobalQueue::new(),
            stealers: RwLock::new(Vec::with_capacity(threads)),
            spawned: AtomicUsize::new(0),
            blocked: AtomicUsize::new(0),
            next_worker: AtomicUsize::new(0),
            sleep: Mutex::new(()),
            wakeup: Condvar::new(),
            shutdown: AtomicBool::new(false),
            handles: Mutex::new(Vec::with_capacity(max_threads)),
        });

        for _ in 0..threads {
            inner.spawned.fetch_add(1, Ordering::AcqRel);
            if let Err(err) = spawn_worker(&inner) {
                inner.shutdown.store(true, Ordering::Release);
                return Err(err);
            }
        }
        Ok(Self { inner })
    }

    /// Schedules a runnable.
    ///
    /// A worker of this pool pushes onto its own deque; any other thread
    /// goes through the injector. Returns the runnable if the pool is shut
    /// down.
    pub(crate) fn execute(&self, runnable: Runnable) -> std::result::Result<(), Runnable> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Err(runnable);
        }
        if let Err(runnable) = worker::push_local(self.inner.id, runnable) {
            self.inner.global.push(runnable);
        }
        self.inner.notify_one();
        Ok(())
    }

    /// Runs a blocking wait, compensating for the blocked worker.
    ///
    /// Called from a non-worker thread this simply runs `wait`.
    pub(crate) fn managed_block<R>(&self, wait: impl FnOnce() -> R) -> R {
        if !worker::is_worker_of(self.inner.id) {
            return wait();
        }
        let _blocked = BlockedGuard::enter(&self.inner);
        self.inner.compensate();
        self.inner.notify_all();
        wait()
    }

    /// Stops the pool. Workers exit at their next scheduling point and queued
    /// runnables are dropped. Idempotent.
    pub(crate) fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.notify_all();
        while self.inner.global.pop().is_some() {}
    }

    pub(crate) fn is_shutdown(&self) -> bool {
        self.inner.shutdown.load(Ordering::Acquire)
    }

    /// Joins every worker thread that has exited or is exiting.
    ///
    /// Must not be called from one of the pool's own workers.
    pub(crate) fn join(&self) {
        let handles = std::mem::take(&mut *self.inner.handles.lock());
        for handle in handles {
            if handle.thread().id() == thread::current().id() {
                continue;
            }
            if handle.join().is_err() {
                warn!(pool = self.inner.id, "worker thread panicked");
            }
        }
    }

    /// Number of workers currently alive (blocked or not).
    pub(crate) fn workers(&self) -> usize {
        self.inner.spawned.load(Ordering::Acquire)
    }

    /// Number of workers currently inside [`managed_block`](Self::managed_block).
    pub(crate) fn blocked_workers(&self) -> usize {
        self.inner.blocked.load(Ordering::Acquire)
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("id", &self.inner.id)
            .field("config", &self.inner.config)
            .field("workers", &self.workers())
            .field("blocked", &self.blocked_workers())
            .field("shutdown", &self.is_shutdown())
            .finish()
    }
}

impl PoolInner {
    fn notify_one(&self) {
        let _guard = self.sleep.lock();
        self.wakeup.notify_one();
    }

    fn notify_all(&self) {
        let _guard = self.sleep.lock();
        self.wakeup.notify_all();
    }

    fn park(&self, timeout: Duration) {
        let mut guard = self.sleep.lock();
        if self.shutdown.load(Ordering::Acquire) || !self.global.is_empty() {
            return;
        }
        let _ = self.wakeup.wait_for(&mut guard, timeout);
    }

    /// Spawns a spare worker if too few workers are unblocked.
    fn compensate(self: &Arc<Self>) {
        loop {
            let spawned = self.spawned.load(Ordering::Acquire);
            let blocked = self.blocked.load(Ordering::Acquire);
            if spawned.saturating_sub(blocked) >= self.config.threads {
                return;
            }
            if spawned >= self.config.max_threads {
                debug!(
                    pool = self.id,
                    spawned, blocked, "worker pool saturated, cannot compensate"
                );
                return;
            }
            if self
                .spawned
                .compare_exchange(spawned, spawned + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                if let Err(err) = spawn_worker(self) {
                    error!(pool = self.id, error = %err, "failed to spawn spare worker");
                }
                return;
            }
        }
    }

    /// Retires the calling worker if enough others remain unblocked.
    fn try_retire(&self) -> bool {
        loop {
            let spawned = self.spawned.load(Ordering::Acquire);
            let blocked = self.blocked.load(Ordering::Acquire);
            if spawned.saturating_sub(blocked) <= self.config.threads {
                return false;
            }
            if self
                .spawned
                .compare_exchange(spawned, spawned - 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }

    fn remove_stealer(&self, owner: WorkerId) {
        self.stealers.write().retain(|s| s.owner() != owner);
    }
}

struct BlockedGuard<'a> {
    inner: &'a PoolInner,
}

impl<'a> BlockedGuard<'a> {
    fn enter(inner: &'a PoolInner) -> Self {
        inner.blocked.fetch_add(1, Ordering::AcqRel);
        Self { inner }
    }
}

impl Drop for BlockedGuard<'_> {
    fn drop(&mut self) {
        self.inner.blocked.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Starts one worker thread. The caller has already counted it in `spawned`.
fn spawn_worker(inner: &Arc<PoolInner>) -> Result<()> {
    let id = inner.next_worker.fetch_add(1, Ordering::Relaxed);
    let worker = Worker::new(id, Arc::clone(inner));
    inner.stealers.write().push(worker.local().stealer());

    let mut builder =
        thread::Builder::new().name(format!("{}-worker-{id}", inner.config.thread_name_prefix));
    if inner.config.thread_stack_size > 0 {
        builder = builder.stack_size(inner.config.thread_stack_size);
    }
    match builder.spawn(move || worker.run_loop()) {
        Ok(handle) => {
            inner.handles.lock().push(handle);
            Ok(())
        }
        Err(err) => {
            inner.spawned.fetch_sub(1, Ordering::AcqRel);
            inner.remove_stealer(id);
            Err(Error::internal(format!("failed to spawn worker thread: {err}")).with_source(err))
        }
    }
}

/// Renders a panic payload for logs and `Panicked` errors.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
