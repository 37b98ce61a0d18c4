//! Place failure tests on in-process runs.
//!
//! Places are killed through the run's [`LocalHub`]. Jobs block on gates so
//! that the kill lands while work is known to be pending.

#[macro_use]
mod common;

use common::*;

use apgas::{constructs, DurableMap, ErrorKind, LocalHub, Place, RemoteJob, Result, Runtime};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

struct Gate {
    started: AtomicBool,
    released: AtomicBool,
    done: AtomicBool,
}

impl Gate {
    const fn new() -> Self {
        Self {
            started: AtomicBool::new(false),
            released: AtomicBool::new(false),
            done: AtomicBool::new(false),
        }
    }

    fn started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const CLOSED: Gate = Gate::new();

// One gate per test, so tests running in parallel do not interfere.
static GATES: [Gate; 6] = [CLOSED; 6];

const LOST_WORK: usize = 0;
const COMPLETED_WORK: usize = 1;
const ORPHAN: usize = 2;
const NON_RESILIENT: usize = 3;
const NO_FAILURE: usize = 4;

/// Blocks its worker until the gate is released.
#[derive(Serialize, Deserialize)]
struct Stall {
    gate: usize,
}

impl RemoteJob for Stall {
    const NAME: &'static str = "it.stall";

    fn run(self) -> Result<()> {
        let gate = &GATES[self.gate];
        gate.started.store(true, Ordering::SeqCst);
        while !gate.released.load(Ordering::SeqCst) {
            thread::sleep(Duration::from_millis(1));
        }
        gate.done.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[allow(clippy::declare_interior_mutable_const)]
const NOT_RUN: AtomicBool = AtomicBool::new(false);

static QUICK_RAN: [AtomicBool; 6] = [NOT_RUN; 6];

#[derive(Serialize, Deserialize)]
struct Quick {
    flag: usize,
}

impl RemoteJob for Quick {
    const NAME: &'static str = "it.quick";

    fn run(self) -> Result<()> {
        QUICK_RAN[self.flag].store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// Opens a finish where it runs and stalls a job at `stall_at` under it.
#[derive(Serialize, Deserialize)]
struct Nested {
    stall_at: Place,
    gate: usize,
}

impl RemoteJob for Nested {
    const NAME: &'static str = "it.nested";

    fn run(self) -> Result<()> {
        let stall = Stall { gate: self.gate };
        constructs::finish(|| constructs::async_at(self.stall_at, stall))
    }
}

fn run(places: usize, resilient: bool) -> Runtime {
    init_test_logging();
    test_builder(places)
        .resilient(resilient)
        .register_job::<Stall>()
        .register_job::<Quick>()
        .register_job::<Nested>()
        .build()
        .expect("runtime")
}

fn hub_of(runtime: &Runtime) -> Arc<LocalHub> {
    LocalHub::lookup(&runtime.address()).expect("hub of the run")
}

/// Installs a handler recording every failed place it is told about.
fn record_failures(runtime: &Runtime) -> Arc<Mutex<Vec<Place>>> {
    let failed = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&failed);
    runtime.set_place_failure_handler(move |place| seen.lock().expect("lock").push(place));
    failed
}

fn reported(failed: &Mutex<Vec<Place>>, place: Place) -> bool {
    failed.lock().expect("lock").contains(&place)
}

#[test]
fn resilient_finish_without_failures_completes() {
    let runtime = run(3, true);
    let gate = &GATES[NO_FAILURE];
    gate.release();
    runtime
        .finish(|| {
            for place in constructs::places()? {
                constructs::async_at(place, Stall { gate: NO_FAILURE })?;
            }
            Ok(())
        })
        .expect("finish");
    assert!(gate.done());
    let hub = hub_of(&runtime);
    assert!(hub.store().is_empty(), "returned scopes leave no durable state");
}

#[test]
fn work_lost_with_its_place_is_reported_once() {
    test_phase!("work_lost_with_its_place_is_reported_once");
    let runtime = run(3, true);
    let failed = record_failures(&runtime);
    let p2 = runtime.place(2).expect("p2");
    let hub = hub_of(&runtime);
    let gate = &GATES[LOST_WORK];

    let killer = thread::spawn(move || {
        wait_until("stall started at p2", || gate.started());
        assert!(hub.kill(p2));
    });

    let err = assert_single_failure!(
        runtime.finish(|| constructs::async_at(p2, Stall { gate: LOST_WORK })),
        ErrorKind::PlaceFailed
    );
    assert_eq!(err.suppressed()[0].place(), Some(p2));
    killer.join().expect("killer thread");
    gate.release();

    wait_until("handler saw p2", || reported(&failed, p2));
    assert!(!runtime.is_shutdown());
    assert_eq!(runtime.places().len(), 2);

    test_section!("run keeps working without p2");
    let p1 = runtime.place(1).expect("p1");
    runtime.at(p1, Quick { flag: LOST_WORK }).expect("work at a survivor");
    assert!(QUICK_RAN[LOST_WORK].load(Ordering::SeqCst));
    test_complete!("work_lost_with_its_place_is_reported_once");
}

#[test]
fn completed_work_at_a_dead_place_is_not_a_failure() {
    test_phase!("completed_work_at_a_dead_place_is_not_a_failure");
    let runtime = run(3, true);
    let failed = record_failures(&runtime);
    let p1 = runtime.place(1).expect("p1");
    let p2 = runtime.place(2).expect("p2");
    let hub = hub_of(&runtime);
    let gate = &GATES[COMPLETED_WORK];

    let killer = {
        let failed = Arc::clone(&failed);
        thread::spawn(move || {
            let store = hub.store();
            wait_until("quick ran at p2 and was counted", || {
                QUICK_RAN[COMPLETED_WORK].load(Ordering::SeqCst)
                    && store.keys().expect("keys").into_iter().all(|id| {
                        store
                            .get(id)
                            .expect("get")
                            .map_or(true, |state| state.pending_at(p2) == 0)
                    })
            });
            assert!(hub.kill(p2));
            wait_until("handler saw p2", || reported(&failed, p2));
            gate.release();
        })
    };

    runtime
        .finish(|| {
            constructs::async_at(p1, Stall { gate: COMPLETED_WORK })?;
            constructs::async_at(p2, Quick { flag: COMPLETED_WORK })
        })
        .expect("nothing was lost");
    killer.join().expect("killer thread");
    assert!(gate.done());
    test_complete!("completed_work_at_a_dead_place_is_not_a_failure");
}

#[test]
fn orphaned_scope_is_adopted_by_its_parent() {
    test_phase!("orphaned_scope_is_adopted_by_its_parent");
    let runtime = run(3, true);
    let failed = record_failures(&runtime);
    let p1 = runtime.place(1).expect("p1");
    let p2 = runtime.place(2).expect("p2");
    let hub = hub_of(&runtime);
    let gate = &GATES[ORPHAN];

    let killer = {
        let failed = Arc::clone(&failed);
        thread::spawn(move || {
            wait_until("nested stall started at p2", || gate.started());
            assert!(hub.kill(p1));
            wait_until("handler saw p1", || reported(&failed, p1));
            // Let the other survivor purge p1 as well.
            thread::sleep(Duration::from_millis(50));
            gate.release();
        })
    };

    let err = runtime
        .finish(|| {
            constructs::async_at(
                p1,
                Nested {
                    stall_at: p2,
                    gate: ORPHAN,
                },
            )
        })
        .expect_err("p1 died with work");
    killer.join().expect("killer thread");

    assert!(gate.done(), "finish waited for the adopted scope's task");
    assert_eq!(err.kind(), ErrorKind::Multiple);
    let failures = err.suppressed();
    assert_with_log!(!failures.is_empty(), "sub-failures", "at least one", failures.len());
    for failure in failures {
        assert_eq!(failure.kind(), ErrorKind::PlaceFailed, "{failure}");
        assert_eq!(failure.place(), Some(p1), "{failure}");
    }
    assert!(hub_of(&runtime).store().is_empty());
    test_complete!("orphaned_scope_is_adopted_by_its_parent", failures = failures.len());
}

#[test]
fn losing_a_place_shuts_a_non_resilient_run_down() {
    test_phase!("losing_a_place_shuts_a_non_resilient_run_down");
    let runtime = run(3, false);
    let p1 = runtime.place(1).expect("p1");
    let hub = hub_of(&runtime);
    let gate = &GATES[NON_RESILIENT];

    let err = thread::scope(|scope| {
        scope.spawn(|| {
            wait_until("stall started at p1", || gate.started());
            assert!(hub.kill(p1));
            // p0 joins p1's workers while going down, so the stall must end.
            wait_until("p0 is shutting down", || runtime.is_shutdown());
            gate.release();
        });
        runtime
            .finish(|| constructs::async_at(p1, Stall { gate: NON_RESILIENT }))
            .expect_err("run went down")
    });

    assert_eq!(err.kind(), ErrorKind::Multiple);
    assert!(
        err.suppressed()
            .iter()
            .any(|failure| failure.kind() == ErrorKind::Shutdown),
        "{err}"
    );
    assert!(runtime.is_shutdown());
    assert_eq!(
        runtime.finish(|| Ok(())).expect_err("shut down").kind(),
        ErrorKind::Shutdown
    );
    test_complete!("losing_a_place_shuts_a_non_resilient_run_down");
}
