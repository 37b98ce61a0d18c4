//! Finish scopes: distributed termination detection.
//!
//! A finish scope counts every task spawned under it, at any place, and is
//! quiescent once all of them have completed. Three kinds exist:
//!
//! - [`untracked`]: the sentinel used outside any `finish`; counts nothing
//! - [`default`]: per-place counters at the home place, fed by delta
//!   messages from proxies at the other places
//! - [`resilient`]: counters held in a durable map, so that the scope
//!   survives the death of any place, its own home included
//!
//! All kinds are driven through the [`Finish`] trait. Every place that
//! handles a task of a scope sees the scope as an `Arc<dyn Finish>`: the home
//! object itself at the home place, a proxy or a durable-map handle
//! elsewhere.

pub(crate) mod default;
pub(crate) mod resilient;
pub(crate) mod untracked;

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{GlobalId, Place};

pub(crate) use default::{DefaultFinish, DefaultFinishProxy};
pub(crate) use resilient::ResilientFinish;
pub(crate) use untracked::UntrackedFinish;

/// Counting interface shared by every finish kind.
///
/// `spawn` is always called at the spawning place before the task is queued
/// or shipped, so a completion can never be observed before its spawn.
pub(crate) trait Finish: Send + Sync {
    /// Wire reference that lets other places resolve this scope.
    fn reference(&self) -> FinishRef;

    /// A task was created here for `dst`.
    fn spawn(&self, dst: Place);

    /// A task shipped by `src` reached this place. `false` means the task
    /// must be discarded without running.
    fn arrive(&self, src: Place) -> bool;

    /// A task that ran here completed, with its failure if any.
    fn terminate(&self, failure: Option<Error>);

    /// A task spawned here for `dst` never got there.
    fn undeliverable(&self, dst: Place, failure: Error);

    /// Blocks until the scope is quiescent; returns the recorded failures.
    ///
    /// Only meaningful at the home place.
    fn wait(&self) -> Vec<Error>;
}

/// How a finish scope is named on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) enum FinishRef {
    /// Outside any finish: nothing is counted.
    Untracked,
    /// A counting finish homed at `id.home()`.
    Default(GlobalId),
    /// A finish whose state lives in the durable map.
    Resilient(GlobalId),
}


impl fmt::Display for FinishRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Untracked => write!(f, "untracked"),
            Self::Default(id) => write!(f, "finish {id}"),
            Self::Resilient(id) => write!(f, "resilient finish {id}"),
        }
    }
}

/// Which finish implementation new scopes use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FinishKind {
    /// Counting finish, lost with any place.
    Default,
    /// Durable finish, tolerates place failures.
    Resilient,
}

impl FinishKind {
    /// Looks up a finish factory by name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "default" => Some(Self::Default),
            "resilient" => Some(Self::Resilient),
            _ => None,
        }
    }

    /// Name of the factory.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Resilient => "resilient",
        }
    }
}

/// How often a waiter re-checks state it is told about by messages.
const RECHECK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct LatchState {
    epoch: u64,
    aborted: Option<Error>,
}

/// Wake-up channel for a home waiter whose state lives elsewhere.
///
/// Each notification bumps an epoch, so a notification racing with the
/// waiter's check is never lost.
#[derive(Default)]
pub(crate) struct Latch {
    state: Mutex<LatchState>,
    cond: Condvar,
}

impl Latch {
    pub(crate) fn notify(&self) {
        self.state.lock().epoch += 1;
        self.cond.notify_all();
    }

    pub(crate) fn abort(&self, err: Error) {
        self.state.lock().aborted.get_or_insert(err);
        self.cond.notify_all();
    }

    /// Repeats `check` after every notification until it yields a value.
    pub(crate) fn wait_for<R>(&self, mut check: impl FnMut() -> Option<R>) -> Result<R> {
        loop {
            let seen = {
                let state = self.state.lock();
                if let Some(err) = &state.aborted {
                    return Err(err.clone());
                }
                state.epoch
            };
            if let Some(value) = check() {
                return Ok(value);
            }
            let mut state = self.state.lock();
            if state.epoch == seen && state.aborted.is_none() {
                let _ = self.cond.wait_for(&mut state, RECHECK_INTERVAL);
            }
        }
    }
}

/// Per-place index of the finish scopes with local state.
#[derive(Default)]
pub(crate) struct FinishTable {
    homes: Mutex<HashMap<GlobalId, Arc<DefaultFinish>>>,
    proxies: Mutex<HashMap<GlobalId, Arc<DefaultFinishProxy>>>,
    latches: Mutex<HashMap<GlobalId, Arc<Latch>>>,
    closed: AtomicBool,
}

impl FinishTable {
    pub(crate) fn register_home(&self, finish: Arc<DefaultFinish>) -> Result<()> {
        let mut homes = self.homes.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::shutdown());
        }
        homes.insert(finish.id(), finish);
        Ok(())
    }

    pub(crate) fn home(&self, id: GlobalId) -> Option<Arc<DefaultFinish>> {
        self.homes.lock().get(&id).cloned()
    }

    /// Returns the proxy for `id`, creating it on first use.
    pub(crate) fn proxy(
        &self,
        id: GlobalId,
        make: impl FnOnce() -> DefaultFinishProxy,
    ) -> Arc<DefaultFinishProxy> {
        Arc::clone(
            self.proxies
                .lock()
                .entry(id)
                .or_insert_with(|| Arc::new(make())),
        )
    }

    /// Drops the table's entry for a proxy that just flushed, unless a newer
    /// proxy already replaced it.
    pub(crate) fn retire_proxy(&self, id: GlobalId, proxy: &DefaultFinishProxy) {
        let mut proxies = self.proxies.lock();
        if proxies
            .get(&id)
            .is_some_and(|current| std::ptr::eq(Arc::as_ptr(current), proxy))
        {
            proxies.remove(&id);
        }
    }

    pub(crate) fn register_latch(&self, id: GlobalId) -> Result<Arc<Latch>> {
        let mut latches = self.latches.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::shutdown());
        }
        Ok(Arc::clone(latches.entry(id).or_default()))
    }

    pub(crate) fn latch(&self, id: GlobalId) -> Option<Arc<Latch>> {
        self.latches.lock().get(&id).cloned()
    }

    pub(crate) fn wake(&self, id: GlobalId) {
        if let Some(latch) = self.latch(id) {
            latch.notify();
        }
    }

    pub(crate) fn wake_all(&self) {
        let latches: Vec<Arc<Latch>> = self.latches.lock().values().cloned().collect();
        for latch in latches {
            latch.notify();
        }
    }

    /// Removes the local state of a scope whose construct returned.
    pub(crate) fn forget(&self, reference: FinishRef) {
        match reference {
            FinishRef::Untracked => {}
            FinishRef::Default(id) => {
                self.homes.lock().remove(&id);
            }
            FinishRef::Resilient(id) => {
                self.latches.lock().remove(&id);
            }
        }
    }

    /// Releases every local waiter with `err` and refuses new scopes.
    pub(crate) fn close(&self, err: &Error) {
        let homes: Vec<Arc<DefaultFinish>> = {
            let homes = self.homes.lock();
            self.closed.store(true, Ordering::Release);
            homes.values().cloned().collect()
        };
        for home in homes {
            home.abort(err.clone());
        }
        let latches: Vec<Arc<Latch>> = {
            let latches = self.latches.lock();
            latches.values().cloned().collect()
        };
        for latch in latches {
            latch.abort(err.clone());
        }
        self.proxies.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn open_scopes(&self) -> usize {
        self.homes.lock().len() + self.latches.lock().len()
    }
}
