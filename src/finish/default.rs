//! Counting finish.
//!
//! The home place keeps one pending counter per place. Each other place that
//! runs tasks of the scope keeps a proxy: a count of its live tasks, plus a
//! vector of counter deltas it has not yet reported. A spawn from `x` to `y`
//! adds one to `y`'s delta at `x`; a completion at `y` subtracts one from
//! `y`'s delta at `y`. When the proxy's live count drops to zero it ships its
//! deltas and failures to the home in one message and starts over.
//!
//! The home declares quiescence when every counter is zero, not when their
//! sum is: a completion that overtakes the delta carrying its spawn leaves a
//! negative counter behind, and the scope stays open until the spawn shows
//! up.

use std::collections::HashMap;
use std::sync::Weak;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace};

use super::{Finish, FinishRef};
use crate::error::Error;
use crate::remote::Message;
use crate::runtime::PlaceRuntime;
use crate::types::{GlobalId, Place};

/// Per-place counters at the home. Zero entries are dropped.
#[derive(Debug, Default)]
pub(crate) struct HomeCounts {
    counts: HashMap<Place, i64>,
}

impl HomeCounts {
    pub(crate) fn add(&mut self, place: Place, delta: i64) {
        let count = self.counts.entry(place).or_insert(0);
        *count += delta;
        if *count == 0 {
            self.counts.remove(&place);
        }
    }

    pub(crate) fn apply(&mut self, deltas: &[(Place, i64)]) {
        for &(place, delta) in deltas {
            self.add(place, delta);
        }
    }

    pub(crate) fn is_quiescent(&self) -> bool {
        self.counts.is_empty()
    }
}

/// Deltas and failures a proxy owes its home.
#[derive(Debug)]
pub(crate) struct Flush {
    pub deltas: Vec<(Place, i64)>,
    pub failures: Vec<Error>,
}

/// Unreported state of a scope at a non-home place.
#[derive(Debug)]
pub(crate) struct ProxyCounts {
    here: Place,
    live: u64,
    deltas: HashMap<Place, i64>,
    failures: Vec<Error>,
}

impl ProxyCounts {
    pub(crate) fn new(here: Place) -> Self {
        Self {
            here,
            live: 0,
            deltas: HashMap::new(),
            failures: Vec::new(),
        }
    }

    fn add(&mut self, place: Place, delta: i64) {
        let value = self.deltas.entry(place).or_insert(0);
        *value += delta;
        if *value == 0 {
            self.deltas.remove(&place);
        }
    }

    pub(crate) fn spawn(&mut self, dst: Place) {
        self.add(dst, 1);
        if dst == self.here {
            self.live += 1;
        }
    }

    pub(crate) fn arrive(&mut self) {
        self.live += 1;
    }

    /// Records a completion; returns the flush once no task is live here.
    pub(crate) fn terminate(&mut self, failure: Option<Error>) -> Option<Flush> {
        self.add(self.here, -1);
        self.live = self.live.saturating_sub(1);
        self.failures.extend(failure);
        (self.live == 0).then(|| self.take())
    }

    pub(crate) fn undeliverable(&mut self, dst: Place, failure: Error) {
        self.add(dst, -1);
        self.failures.push(failure);
    }

    fn take(&mut self) -> Flush {
        let mut deltas: Vec<(Place, i64)> = self.deltas.drain().collect();
        deltas.sort_unstable_by_key(|(place, _)| *place);
        Flush {
            deltas,
            failures: std::mem::take(&mut self.failures),
        }
    }
}

#[derive(Debug)]
struct HomeState {
    counts: HomeCounts,
    failures: Vec<Error>,
    aborted: bool,
}

/// A counting finish at its home place.
#[derive(Debug)]
pub(crate) struct DefaultFinish {
    id: GlobalId,
    state: Mutex<HomeState>,
    quiescent: Condvar,
}

impl DefaultFinish {
    /// Creates a scope whose body already counts as one task at home.
    pub(crate) fn new(id: GlobalId) -> Self {
        let mut counts = HomeCounts::default();
        counts.add(id.home(), 1);
        Self {
            id,
            state: Mutex::new(HomeState {
                counts,
                failures: Vec::new(),
                aborted: false,
            }),
            quiescent: Condvar::new(),
        }
    }

    pub(crate) const fn id(&self) -> GlobalId {
        self.id
    }

    fn update(&self, f: impl FnOnce(&mut HomeState)) {
        let mut state = self.state.lock();
        f(&mut state);
        if state.counts.is_quiescent() || state.aborted {
            self.quiescent.notify_all();
        }
    }

    /// Applies a flush received from another place.
    pub(crate) fn apply(&self, from: Place, deltas: &[(Place, i64)], failures: Vec<Error>) {
        trace!(finish = %self.id, from = %from, ?deltas, failures = failures.len(), "finish delta");
        self.update(|state| {
            state.counts.apply(deltas);
            state.failures.extend(failures);
        });
    }

    /// Releases the waiter with `failure` regardless of outstanding tasks.
    pub(crate) fn abort(&self, failure: Error) {
        self.update(|state| {
            state.aborted = true;
            state.failures.push(failure);
        });
    }
}

impl Finish for DefaultFinish {
    fn reference(&self) -> FinishRef {
        FinishRef::Default(self.id)
    }

    fn spawn(&self, dst: Place) {
        self.update(|state| state.counts.add(dst, 1));
    }

    fn arrive(&self, _src: Place) -> bool {
        // Counted by the spawner's delta.
        true
    }

    fn terminate(&self, failure: Option<Error>) {
        let home = self.id.home();
        self.update(|state| {
            state.counts.add(home, -1);
            state.failures.extend(failure);
        });
    }

    fn undeliverable(&self, dst: Place, failure: Error) {
        self.update(|state| {
            state.counts.add(dst, -1);
            state.failures.push(failure);
        });
    }

    fn wait(&self) -> Vec<Error> {
        let mut state = self.state.lock();
        while !state.counts.is_quiescent() && !state.aborted {
            self.quiescent.wait(&mut state);
        }
        std::mem::take(&mut state.failures)
    }
}

/// A counting finish seen from a place other than its home.
pub(crate) struct DefaultFinishProxy {
    id: GlobalId,
    counts: Mutex<ProxyCounts>,
    runtime: Weak<PlaceRuntime>,
}

impl DefaultFinishProxy {
    pub(crate) fn new(id: GlobalId, here: Place, runtime: Weak<PlaceRuntime>) -> Self {
        Self {
            id,
            counts: Mutex::new(ProxyCounts::new(here)),
            runtime,
        }
    }

    /// Ships a flush home. Runs under the counts lock so that flushes of one
    /// proxy leave in order.
    fn ship(&self, runtime: &PlaceRuntime, flush: Flush) {
        let message = Message::FinishDelta {
            finish: self.id,
            from: runtime.here(),
            deltas: flush.deltas,
            failures: flush.failures,
        };
        if let Err(err) = runtime.send_message(self.id.home(), &message) {
            debug!(finish = %self.id, error = %err, "finish delta not delivered");
        }
    }
}

impl Finish for DefaultFinishProxy {
    fn reference(&self) -> FinishRef {
        FinishRef::Default(self.id)
    }

    fn spawn(&self, dst: Place) {
        self.counts.lock().spawn(dst);
    }

    fn arrive(&self, _src: Place) -> bool {
        self.counts.lock().arrive();
        true
    }

    fn terminate(&self, failure: Option<Error>) {
        let Some(runtime) = self.runtime.upgrade() else {
            return;
        };
        let flushed = {
            let mut counts = self.counts.lock();
            match counts.terminate(failure) {
                Some(flush) => {
                    self.ship(&runtime, flush);
                    true
                }
                None => false,
            }
        };
        if flushed {
            runtime.finishes().retire_proxy(self.id, self);
        }
    }

    fn undeliverable(&self, dst: Place, failure: Error) {
        self.counts.lock().undeliverable(dst, failure);
    }

    fn wait(&self) -> Vec<Error> {
        vec![Error::internal(format!(
            "finish {} cannot be awaited away from its home",
            self.id
        ))]
    }
}
