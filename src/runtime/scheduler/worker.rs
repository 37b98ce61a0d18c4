//! Worker thread logic.

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, trace};

use super::local_queue::LocalQueue;
use super::stealing::{self, StealRng};
use super::{PoolInner, Runnable};

/// Identifier for a worker within its pool.
pub(crate) type WorkerId = usize;

/// How long an idle worker sleeps before re-scanning the queues.
const PARK_INTERVAL: Duration = Duration::from_millis(10);

struct CurrentWorker {
    pool: usize,
    local: Arc<LocalQueue<Runnable>>,
}

thread_local! {
    static CURRENT_WORKER: RefCell<Option<CurrentWorker>> = const { RefCell::new(None) };
}

/// Pushes onto the calling worker's own deque if it belongs to `pool`.
///
/// Hands the runnable back when the caller is not one of the pool's workers.
pub(crate) fn push_local(pool: usize, runnable: Runnable) -> Result<(), Runnable> {
    CURRENT_WORKER.with(|slot| match slot.borrow().as_ref() {
        Some(worker) if worker.pool == pool => {
            worker.local.push(runnable);
            Ok(())
        }
        _ => Err(runnable),
    })
}

/// Returns true if the calling thread is a worker of `pool`.
pub(crate) fn is_worker_of(pool: usize) -> bool {
    CURRENT_WORKER.with(|slot| slot.borrow().as_ref().is_some_and(|w| w.pool == pool))
}

/// A worker thread that executes runnables.
pub(crate) struct Worker {
    id: WorkerId,
    local: Arc<LocalQueue<Runnable>>,
    pool: Arc<PoolInner>,
    rng: StealRng,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, pool: Arc<PoolInner>) -> Self {
        Self {
            id,
            local: Arc::new(LocalQueue::new(id)),
            pool,
            rng: StealRng::new(id as u64 + 1),
        }
    }

    pub(crate) fn local(&self) -> &LocalQueue<Runnable> {
        &self.local
    }

    /// Runs the worker scheduling loop until shutdown or retirement.
    pub(crate) fn run_loop(mut self) {
        CURRENT_WORKER.with(|slot| {
            *slot.borrow_mut() = Some(CurrentWorker {
                pool: self.pool.id,
                local: Arc::clone(&self.local),
            });
        });
        trace!(pool = self.pool.id, worker_id = self.id, "worker started");

        let mut idle_since: Option<Instant> = None;
        while !self.pool.shutdown.load(Ordering::Acquire) {
            if let Some(runnable) = self.next_runnable() {
                idle_since = None;
                self.execute(runnable);
                continue;
            }

            let now = Instant::now();
            let since = *idle_since.get_or_insert(now);
            if now.duration_since(since) >= self.pool.config.idle_timeout && self.pool.try_retire()
            {
                trace!(pool = self.pool.id, worker_id = self.id, "spare worker retired");
                break;
            }
            self.pool.park(PARK_INTERVAL);
        }

        self.pool.remove_stealer(self.id);
        CURRENT_WORKER.with(|slot| slot.borrow_mut().take());
    }

    fn next_runnable(&mut self) -> Option<Runnable> {
        // 1. Own deque (LIFO)
        if let Some(runnable) = self.local.pop() {
            return Some(runnable);
        }
        // 2. Injector
        if let Some(runnable) = self.pool.global.pop() {
            return Some(runnable);
        }
        // 3. Peers, starting at a random victim
        let stealers = self.pool.stealers.read();
        stealing::steal_task(&stealers, &mut self.rng)
    }

    fn execute(&self, runnable: Runnable) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(runnable)) {
            error!(
                pool = self.pool.id,
                worker_id = self.id,
                panic = %super::panic_message(payload.as_ref()),
                "runnable panicked outside task accounting"
            );
        }
    }
}
