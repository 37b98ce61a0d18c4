//! Resilient finish.
//!
//! The counters of a resilient scope live in the [`DurableMap`], keyed by the
//! scope's id, and every place updates them directly. Each transition is a
//! single atomic update of the entry; the local effect of a transition
//! (waking the home waiter, releasing it by message, handing an orphan over)
//! only happens after the update is stored.
//!
//! Counts are split into live tasks per place and tasks in transit per
//! (source, destination) pair. When a place dies, [`purge_dead_place`] drops
//! everything attributed to it. A task still in transit from or to a dead
//! place is refused on arrival, because its transit count is gone.
//!
//! Scopes whose home died are adopted by their resilient parent: the orphan
//! is listed in the parent's `adopted` set before any count is purged, so the
//! parent cannot become quiescent while the orphan still has work. The
//! orphan keeps counting on its own; once quiescent it is removed and its
//! failures are moved to the parent.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Weak};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use super::{Finish, FinishRef};
use crate::error::{Error, Result};
use crate::remote::Message;
use crate::runtime::PlaceRuntime;
use crate::store::DurableMap;
use crate::types::{GlobalId, Place};

/// Place-independent state of one resilient finish scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilientFinishState {
    home: Place,
    parent: Option<GlobalId>,
    live: BTreeMap<Place, u64>,
    /// Source place, then destination place.
    transit: BTreeMap<Place, BTreeMap<Place, u64>>,
    failures: Vec<Error>,
    dead: BTreeSet<Place>,
    adopted: BTreeSet<GlobalId>,
    adopted_by: Option<GlobalId>,
    orphaned: bool,
}

fn decrement<K: Ord + Copy>(map: &mut BTreeMap<K, u64>, key: K) -> bool {
    match map.get_mut(&key) {
        Some(count) if *count > 1 => {
            *count -= 1;
            true
        }
        Some(_) => {
            map.remove(&key);
            true
        }
        None => false,
    }
}

impl ResilientFinishState {
    /// Fresh state of a scope whose body is running at `home`.
    #[must_use]
    pub fn new(home: Place, parent: Option<GlobalId>) -> Self {
        Self {
            home,
            parent,
            live: BTreeMap::from([(home, 1)]),
            transit: BTreeMap::new(),
            failures: Vec::new(),
            dead: BTreeSet::new(),
            adopted: BTreeSet::new(),
            adopted_by: None,
            orphaned: false,
        }
    }

    /// Place the scope was created at.
    #[must_use]
    pub const fn home(&self) -> Place {
        self.home
    }

    /// Enclosing resilient scope at creation time.
    #[must_use]
    pub const fn parent(&self) -> Option<GlobalId> {
        self.parent
    }

    /// Scope that took this one over after its home died.
    #[must_use]
    pub const fn adopted_by(&self) -> Option<GlobalId> {
        self.adopted_by
    }

    /// True if the home died and no parent could adopt the scope.
    #[must_use]
    pub const fn is_orphaned(&self) -> bool {
        self.orphaned
    }

    /// Failures recorded so far.
    #[must_use]
    pub fn failures(&self) -> &[Error] {
        &self.failures
    }

    /// Orphans whose completion this scope is waiting for.
    pub fn adopted(&self) -> impl Iterator<Item = GlobalId> + '_ {
        self.adopted.iter().copied()
    }

    /// Places already purged from the counters.
    pub fn dead_places(&self) -> impl Iterator<Item = Place> + '_ {
        self.dead.iter().copied()
    }

    /// Tasks running at `place` plus tasks on their way to it.
    #[must_use]
    pub fn pending_at(&self, place: Place) -> u64 {
        let live = self.live.get(&place).copied().unwrap_or(0);
        let incoming: u64 = self
            .transit
            .values()
            .filter_map(|dsts| dsts.get(&place))
            .sum();
        live + incoming
    }

    /// True once no task is live, in transit, or pending in an adopted scope.
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.live.is_empty() && self.transit.is_empty() && self.adopted.is_empty()
    }

    pub(crate) fn spawn(&mut self, src: Place, dst: Place) {
        if self.dead.contains(&src) || self.dead.contains(&dst) {
            return;
        }
        if src == dst {
            *self.live.entry(dst).or_insert(0) += 1;
        } else {
            *self
                .transit
                .entry(src)
                .or_default()
                .entry(dst)
                .or_insert(0) += 1;
        }
    }

    /// Moves a task from transit to live. `false` if its count was purged.
    pub(crate) fn arrive(&mut self, src: Place, dst: Place) -> bool {
        if self.dead.contains(&dst) {
            return false;
        }
        if !self.take_transit(src, dst) {
            return false;
        }
        *self.live.entry(dst).or_insert(0) += 1;
        true
    }

    pub(crate) fn terminate(&mut self, at: Place, failure: Option<Error>) {
        if self.dead.contains(&at) {
            return;
        }
        decrement(&mut self.live, at);
        self.failures.extend(failure);
    }

    pub(crate) fn undeliverable(&mut self, src: Place, dst: Place, failure: Error) {
        if self.dead.contains(&dst) {
            // A purged destination is reported as failed once, not per send.
            if !self.failures.iter().any(|f| f.is_place_failed() && f.place() == Some(dst)) {
                self.failures.push(Error::place_failed(dst));
            }
            return;
        }
        self.take_transit(src, dst);
        self.failures.push(failure);
    }

    /// Drops every count attributed to `place`. Returns false if the place
    /// was already purged.
    pub(crate) fn purge(&mut self, place: Place) -> bool {
        if !self.dead.insert(place) {
            return false;
        }
        let mut lost = self.live.remove(&place).unwrap_or(0);
        if let Some(outgoing) = self.transit.remove(&place) {
            lost += outgoing.values().sum::<u64>();
        }
        self.transit.retain(|_, dsts| {
            lost += dsts.remove(&place).unwrap_or(0);
            !dsts.is_empty()
        });
        if lost > 0 {
            self.failures.push(Error::place_failed(place));
        }
        true
    }

    fn take_transit(&mut self, src: Place, dst: Place) -> bool {
        let Some(dsts) = self.transit.get_mut(&src) else {
            return false;
        };
        let taken = decrement(dsts, dst);
        if dsts.is_empty() {
            self.transit.remove(&src);
        }
        taken
    }
}

/// Handle on a resilient scope, usable at any place.
pub(crate) struct ResilientFinish {
    id: GlobalId,
    here: Place,
    store: Arc<dyn DurableMap>,
    runtime: Weak<PlaceRuntime>,
}

impl ResilientFinish {
    /// Handle on an existing scope.
    pub(crate) fn handle(runtime: &Arc<PlaceRuntime>, id: GlobalId) -> Self {
        Self {
            id,
            here: runtime.here(),
            store: Arc::clone(runtime.store()),
            runtime: Arc::downgrade(runtime),
        }
    }

    /// Stores the state of a new scope homed here and registers its waiter.
    pub(crate) fn create(
        runtime: &Arc<PlaceRuntime>,
        id: GlobalId,
        parent: Option<GlobalId>,
    ) -> Result<Self> {
        let store = runtime.store();
        store.put(id, ResilientFinishState::new(runtime.here(), parent))?;
        if let Err(err) = runtime.finishes().register_latch(id) {
            if let Err(cleanup) = store.remove(id) {
                warn!(finish = %id, error = %cleanup, "dropping state of a scope that never opened failed");
            }
            return Err(err);
        }
        Ok(Self::handle(runtime, id))
    }

    fn transition(&self, mut f: impl FnMut(&mut ResilientFinishState)) -> Option<ResilientFinishState> {
        // A departing place no longer reports; survivors purge its counts.
        if self.runtime.upgrade().map_or(true, |runtime| runtime.is_dying()) {
            debug!(finish = %self.id, place = %self.here, "transition skipped at a departing place");
            return None;
        }
        match self.store.update(self.id, &mut f) {
            Ok(state) => state,
            Err(err) => {
                error!(finish = %self.id, place = %self.here, error = %err, "resilient finish update failed");
                None
            }
        }
    }

    fn settle_if_quiescent(&self, state: Option<ResilientFinishState>) {
        if let (Some(state), Some(runtime)) = (state, self.runtime.upgrade()) {
            if state.is_quiescent() {
                settle(&runtime, self.id, &state);
            }
        }
    }
}

impl Finish for ResilientFinish {
    fn reference(&self) -> FinishRef {
        FinishRef::Resilient(self.id)
    }

    fn spawn(&self, dst: Place) {
        let here = self.here;
        self.transition(|state| state.spawn(here, dst));
    }

    fn arrive(&self, src: Place) -> bool {
        let here = self.here;
        let mut accepted = false;
        self.transition(|state| accepted = state.arrive(src, here));
        if !accepted {
            debug!(finish = %self.id, place = %here, src = %src, "task refused: transit count purged");
        }
        accepted
    }

    fn terminate(&self, failure: Option<Error>) {
        let here = self.here;
        let mut failure = failure;
        let state = self.transition(|state| state.terminate(here, failure.take()));
        self.settle_if_quiescent(state);
    }

    fn undeliverable(&self, dst: Place, failure: Error) {
        let here = self.here;
        let mut failure = Some(failure);
        let state = self.transition(|state| {
            if let Some(failure) = failure.take() {
                state.undeliverable(here, dst, failure);
            }
        });
        self.settle_if_quiescent(state);
    }

    fn wait(&self) -> Vec<Error> {
        let Some(runtime) = self.runtime.upgrade() else {
            return vec![Error::shutdown()];
        };
        let Some(latch) = runtime.finishes().latch(self.id) else {
            return vec![Error::internal(format!(
                "no waiter registered for {}",
                self.reference()
            ))];
        };
        let outcome = latch.wait_for(|| match self.store.get(self.id) {
            Ok(Some(state)) if state.is_quiescent() => Some(Ok(())),
            Ok(Some(_)) => None,
            Ok(None) => Some(Err(Error::internal(format!(
                "state of {} vanished",
                self.reference()
            )))),
            Err(err) => Some(Err(err)),
        });
        match outcome.and_then(|checked| checked) {
            Ok(()) => match self.store.remove(self.id) {
                Ok(Some(state)) => state.failures,
                Ok(None) => Vec::new(),
                Err(err) => vec![err],
            },
            Err(err) => vec![err],
        }
    }
}

/// Acts on a scope that just became quiescent.
///
/// A scope with a live home gets its waiter released. An adopted orphan is
/// removed and merged into its parent; a detached one is removed and its
/// failures are logged.
fn settle(runtime: &Arc<PlaceRuntime>, id: GlobalId, state: &ResilientFinishState) {
    if let Some(parent) = state.adopted_by {
        handover(runtime, id, parent);
    } else if state.orphaned {
        match runtime.store().remove(id) {
            Ok(Some(state)) => {
                for failure in &state.failures {
                    warn!(finish = %id, error = %failure, "failure in detached orphan finish");
                }
                info!(finish = %id, failures = state.failures.len(), "detached orphan finish completed");
            }
            Ok(None) => {}
            Err(err) => error!(finish = %id, error = %err, "cannot remove orphan finish"),
        }
    } else if id.home() == runtime.here() {
        runtime.finishes().wake(id);
    } else if let Err(err) =
        runtime.send_message(id.home(), &Message::FinishRelease { finish: id })
    {
        // The home may be dying; adoption settles the scope again.
        debug!(finish = %id, error = %err, "finish release not delivered");
    }
}

fn handover(runtime: &Arc<PlaceRuntime>, orphan: GlobalId, parent: GlobalId) {
    let store = runtime.store();
    let removed = match store.remove(orphan) {
        Ok(Some(state)) => state,
        Ok(None) => return,
        Err(err) => {
            error!(finish = %orphan, error = %err, "cannot remove adopted finish");
            return;
        }
    };
    let mut failures = Some(removed.failures);
    let updated = store.update(parent, &mut |state| {
        state.adopted.remove(&orphan);
        state.failures.extend(failures.take().unwrap_or_default());
    });
    debug!(finish = %orphan, parent = %parent, "adopted finish handed over");
    match updated {
        Ok(Some(state)) if state.is_quiescent() => settle(runtime, parent, &state),
        Ok(_) => {}
        Err(err) => error!(finish = %parent, error = %err, "cannot hand orphan over"),
    }
}

/// Removes a dead place from every resilient scope.
///
/// Orphans of the dead place are adopted first, then counts are purged, then
/// scopes that became quiescent are settled. Safe to run at several places
/// concurrently and more than once.
pub(crate) fn purge_dead_place(runtime: &Arc<PlaceRuntime>, dead: Place) {
    let store = runtime.store();
    let keys = match store.keys() {
        Ok(keys) => keys,
        Err(err) => {
            error!(place = %runtime.here(), dead = %dead, error = %err, "cannot list resilient finishes");
            return;
        }
    };

    for &id in &keys {
        if id.home() == dead {
            adopt(runtime, id);
        }
    }

    for &id in &keys {
        let mut changed = false;
        let state = store.update(id, &mut |state| changed = state.purge(dead));
        match state {
            Ok(Some(state)) if changed && state.is_quiescent() => settle(runtime, id, &state),
            Ok(_) => {}
            Err(err) => error!(finish = %id, dead = %dead, error = %err, "purge failed"),
        }
    }

    runtime.finishes().wake_all();
}

fn adopt(runtime: &Arc<PlaceRuntime>, orphan: GlobalId) {
    let store = runtime.store();
    let state = match store.get(orphan) {
        Ok(Some(state)) => state,
        Ok(None) => return,
        Err(err) => {
            error!(finish = %orphan, error = %err, "cannot read orphan finish");
            return;
        }
    };
    if state.adopted_by.is_some() || state.orphaned {
        return;
    }

    let adopted = match state.parent {
        Some(parent) => matches!(
            store.update(parent, &mut |p| {
                p.adopted.insert(orphan);
            }),
            Ok(Some(_))
        )
        .then_some(parent),
        None => None,
    };

    let marked = store.update(orphan, &mut |state| match adopted {
        Some(parent) => state.adopted_by = Some(parent),
        None => state.orphaned = true,
    });

    match (&marked, adopted) {
        (Ok(None), Some(parent)) => {
            // Orphan completed meanwhile; nothing to wait for.
            let undone = store.update(parent, &mut |p| {
                p.adopted.remove(&orphan);
            });
            if let Ok(Some(state)) = undone {
                if state.is_quiescent() {
                    settle(runtime, parent, &state);
                }
            }
            return;
        }
        (Ok(Some(_)), Some(parent)) => {
            info!(finish = %orphan, parent = %parent, "orphan finish adopted");
        }
        (Ok(Some(_)), None) => {
            warn!(finish = %orphan, "orphan finish has no resilient parent, detached");
        }
        (Ok(None), None) => return,
        (Err(err), _) => {
            error!(finish = %orphan, error = %err, "cannot mark orphan finish");
            return;
        }
    }

    // The orphan may have gone quiescent before it was marked, in which case
    // its own settle went to the dead home.
    if let Ok(Some(state)) = marked {
        if state.is_quiescent() {
            settle(runtime, orphan, &state);
        }
    }
}
