//! End-to-end tests of the APGAS constructs on an in-process run.

#[macro_use]
mod common;

use common::*;

use apgas::{
    constructs, Error, ErrorKind, GlobalId, GlobalRef, Place, RemoteCall, RemoteJob, Result,
    Runtime,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

// === Jobs ===

#[derive(Serialize, Deserialize)]
struct Bump {
    counter: GlobalRef<AtomicU64>,
    amount: u64,
}

impl RemoteJob for Bump {
    const NAME: &'static str = "it.bump";

    fn run(self) -> Result<()> {
        self.counter.get()?.fetch_add(self.amount, Ordering::SeqCst);
        Ok(())
    }
}

/// Runs away from the counter's home and bumps it through a second hop.
#[derive(Serialize, Deserialize)]
struct Relay {
    counter: GlobalRef<AtomicU64>,
    amount: u64,
}

impl RemoteJob for Relay {
    const NAME: &'static str = "it.relay";

    fn run(self) -> Result<()> {
        let home = self.counter.home();
        constructs::async_at(
            home,
            Bump {
                counter: self.counter,
                amount: self.amount,
            },
        )
    }
}

#[derive(Serialize, Deserialize)]
struct ReadDirectly {
    counter: GlobalRef<AtomicU64>,
}

impl RemoteJob for ReadDirectly {
    const NAME: &'static str = "it.read_directly";

    fn run(self) -> Result<()> {
        self.counter.get().map(|_| ())
    }
}

#[derive(Serialize, Deserialize)]
struct Fail {
    message: String,
}

impl RemoteJob for Fail {
    const NAME: &'static str = "it.fail";

    fn run(self) -> Result<()> {
        Err(Error::user(self.message))
    }
}

#[derive(Serialize, Deserialize)]
struct Explode;

impl RemoteJob for Explode {
    const NAME: &'static str = "it.explode";

    fn run(self) -> Result<()> {
        panic!("explode job panicked on purpose");
    }
}

/// Refuses to be encoded.
#[derive(Debug, Deserialize)]
struct Unserializable;

impl Serialize for Unserializable {
    fn serialize<S: Serializer>(&self, _: S) -> std::result::Result<S::Ok, S::Error> {
        Err(<S::Error as serde::ser::Error>::custom("unserializable on purpose"))
    }
}

impl RemoteJob for Unserializable {
    const NAME: &'static str = "it.unserializable";

    fn run(self) -> Result<()> {
        Ok(())
    }
}

/// Encodes fine but refuses to be decoded.
#[derive(Debug, Serialize)]
struct Undeserializable;

impl<'de> Deserialize<'de> for Undeserializable {
    fn deserialize<D: Deserializer<'de>>(_: D) -> std::result::Result<Self, D::Error> {
        Err(<D::Error as serde::de::Error>::custom("undeserializable on purpose"))
    }
}

impl RemoteJob for Undeserializable {
    const NAME: &'static str = "it.undeserializable";

    fn run(self) -> Result<()> {
        Ok(())
    }
}

/// Never registered with the runtime.
#[derive(Serialize, Deserialize)]
struct Unregistered;

impl RemoteJob for Unregistered {
    const NAME: &'static str = "it.unregistered";

    fn run(self) -> Result<()> {
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct Deposit {
    id: GlobalId,
    value: u64,
}

impl RemoteJob for Deposit {
    const NAME: &'static str = "it.deposit";

    fn run(self) -> Result<()> {
        self.id.put_here(self.value)
    }
}

/// Answers with its place id through an uncounted hop.
#[derive(Serialize, Deserialize)]
struct EchoHere {
    id: GlobalId,
}

impl RemoteJob for EchoHere {
    const NAME: &'static str = "it.echo_here";

    fn run(self) -> Result<()> {
        let here = constructs::here()?;
        constructs::uncounted_async_at(
            self.id.home(),
            Deposit {
                id: self.id,
                value: u64::from(here.id()),
            },
        )
    }
}

/// Answers with its place id through an immediate control message.
#[derive(Serialize, Deserialize)]
struct ImmediateEcho {
    id: GlobalId,
}

impl RemoteJob for ImmediateEcho {
    const NAME: &'static str = "it.immediate_echo";

    fn run(self) -> Result<()> {
        let here = constructs::here()?;
        constructs::immediate_async_at(
            self.id.home(),
            Deposit {
                id: self.id,
                value: u64::from(here.id()) + 100,
            },
        )
    }
}

// === Calls ===

#[derive(Clone, Serialize, Deserialize)]
struct WhereAmI;

impl RemoteCall for WhereAmI {
    const NAME: &'static str = "it.where_am_i";
    type Output = u32;

    fn call(self) -> Result<u32> {
        Ok(constructs::here()?.id())
    }
}

/// Fibonacci with `finish` and `async_`, spread over the run.
#[derive(Serialize, Deserialize)]
struct Fib {
    n: u64,
}

impl RemoteCall for Fib {
    const NAME: &'static str = "it.fib";
    type Output = u64;

    fn call(self) -> Result<u64> {
        fib(self.n)
    }
}

fn fib(n: u64) -> Result<u64> {
    if n < 2 {
        return Ok(n);
    }
    let left = Arc::new(AtomicU64::new(0));
    let right = constructs::finish_with(|| {
        let left = Arc::clone(&left);
        constructs::async_(move || {
            left.store(fib(n - 1)?, Ordering::SeqCst);
            Ok(())
        })?;
        fib(n - 2)
    })?;
    Ok(left.load(Ordering::SeqCst) + right)
}

#[derive(Serialize, Deserialize)]
struct UndeserializableResult;

impl RemoteCall for UndeserializableResult {
    const NAME: &'static str = "it.undeserializable_result";
    type Output = Undeserializable;

    fn call(self) -> Result<Undeserializable> {
        Ok(Undeserializable)
    }
}

#[derive(Serialize, Deserialize)]
struct UnserializableResult;

impl RemoteCall for UnserializableResult {
    const NAME: &'static str = "it.unserializable_result";
    type Output = Unserializable;

    fn call(self) -> Result<Unserializable> {
        Ok(Unserializable)
    }
}

/// Reads the value a place-local handle holds at the calling place.
#[derive(Serialize, Deserialize)]
struct ReadLocal {
    handle: GlobalRef<u32>,
}

impl RemoteCall for ReadLocal {
    const NAME: &'static str = "it.read_local";
    type Output = u32;

    fn call(self) -> Result<u32> {
        Ok(*self.handle.get()?)
    }
}

fn run(places: usize) -> Runtime {
    init_test_logging();
    test_builder(places)
        .register_job::<Bump>()
        .register_job::<Relay>()
        .register_job::<ReadDirectly>()
        .register_job::<Fail>()
        .register_job::<Explode>()
        .register_job::<Unserializable>()
        .register_job::<Undeserializable>()
        .register_job::<Deposit>()
        .register_job::<EchoHere>()
        .register_job::<ImmediateEcho>()
        .register_call::<WhereAmI>()
        .register_call::<Fib>()
        .register_call::<UnserializableResult>()
        .register_call::<UndeserializableResult>()
        .register_call::<ReadLocal>()
        .register_place_local::<WhereAmI>()
        .build()
        .expect("runtime")
}

fn place(runtime: &Runtime, id: i64) -> Place {
    runtime.place(id).expect("place of the run")
}

// === Tests ===

#[test]
fn places_are_numbered_from_zero() {
    test_phase!("places_are_numbered_from_zero");
    let runtime = run(3);
    let ids: Vec<u32> = runtime.places().iter().map(|p| p.id()).collect();
    assert_with_log!(ids == vec![0, 1, 2], "place ids", vec![0, 1, 2], ids);
    assert_eq!(runtime.here(), Place::FIRST);

    let _cx = runtime.enter();
    assert_eq!(constructs::places().expect("places").len(), 3);
    assert_eq!(constructs::here().expect("here"), Place::FIRST);
    test_complete!("places_are_numbered_from_zero");
}

#[test]
fn at_call_runs_at_the_target() {
    let runtime = run(3);
    for target in runtime.places() {
        let id = runtime.at_call(target, WhereAmI).expect("call");
        assert_eq!(id, target.id());
    }
}

#[test]
fn finish_waits_for_local_and_remote_work() {
    test_phase!("finish_waits_for_local_and_remote_work");
    let runtime = run(3);
    let _cx = runtime.enter();
    let counter = GlobalRef::new(AtomicU64::new(0)).expect("global ref");

    runtime
        .finish(|| {
            for _ in 0..5 {
                let counter = counter.clone();
                constructs::async_(move || {
                    counter.get()?.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                })?;
            }
            for target in constructs::places()? {
                constructs::async_at(
                    target,
                    Relay {
                        counter: counter.clone(),
                        amount: 10,
                    },
                )?;
            }
            Ok(())
        })
        .expect("finish");

    let total = counter.get().expect("home read").load(Ordering::SeqCst);
    assert_with_log!(total == 35, "counter after finish", 35, total);
    test_complete!("finish_waits_for_local_and_remote_work", total = total);
}

#[test]
fn global_ref_cannot_be_read_away_from_home() {
    let runtime = run(2);
    let _cx = runtime.enter();
    let counter = GlobalRef::new(AtomicU64::new(0)).expect("global ref");
    let err = assert_single_failure!(
        runtime.at(place(&runtime, 1), ReadDirectly { counter: counter.clone() }),
        ErrorKind::BadPlace
    );
    assert_eq!(err.suppressed()[0].place(), Some(place(&runtime, 1)));

    runtime
        .at(place(&runtime, 1), Relay { counter: counter.clone(), amount: 4 })
        .expect("relay");
    assert_eq!(counter.get().expect("home").load(Ordering::SeqCst), 4);
    counter.free().expect("free");
}

#[test]
fn place_local_handle_reads_each_places_value() {
    let runtime = run(3);
    let _cx = runtime.enter();
    let places = runtime.places();
    let handle = GlobalRef::place_local(&places, WhereAmI).expect("place local");
    assert!(handle.is_place_local());
    for target in places {
        let seen = runtime
            .at_call(target, ReadLocal { handle: handle.clone() })
            .expect("read");
        assert_eq!(seen, target.id());
    }
    handle.free().expect("free");
}

#[test]
fn bad_place_fails_synchronously() {
    let runtime = run(2);
    let _cx = runtime.enter();
    let counter = GlobalRef::new(AtomicU64::new(0)).expect("global ref");
    let nowhere = Place::new(7).expect("well-formed id");

    let err = runtime
        .async_at(nowhere, Bump { counter: counter.clone(), amount: 1 })
        .expect_err("no place 7");
    assert_eq!(err.kind(), ErrorKind::BadPlace);
    let err = runtime.at_call(nowhere, WhereAmI).expect_err("no place 7");
    assert_eq!(err.kind(), ErrorKind::BadPlace);
    assert_eq!(runtime.place(-3).expect_err("negative").kind(), ErrorKind::BadPlace);
    assert_eq!(constructs::place(2).expect_err("not yet").kind(), ErrorKind::BadPlace);
}

#[test]
fn each_failure_surfaces_exactly_once() {
    test_phase!("each_failure_surfaces_exactly_once");
    let runtime = run(2);
    let remote = place(&runtime, 1);

    test_section!("body");
    assert_single_failure!(
        runtime.finish(|| Err(Error::user("body failed"))),
        ErrorKind::User
    );

    test_section!("local async");
    assert_single_failure!(
        runtime.finish(|| constructs::async_(|| Err(Error::user("local task failed")))),
        ErrorKind::User
    );

    test_section!("remote async");
    assert_single_failure!(
        runtime.finish(|| constructs::async_at(
            remote,
            Fail {
                message: "remote task failed".into()
            }
        )),
        ErrorKind::User
    );

    test_section!("remote panic");
    assert_single_failure!(runtime.at(remote, Explode), ErrorKind::Panicked);

    test_section!("local panic");
    assert_single_failure!(
        runtime.finish(|| constructs::async_(|| panic!("local task panicked on purpose"))),
        ErrorKind::Panicked
    );
    test_complete!("each_failure_surfaces_exactly_once");
}

#[test]
fn wire_failures_are_recorded_against_the_finish() {
    let runtime = run(2);
    let remote = place(&runtime, 1);

    assert_single_failure!(runtime.at(remote, Unserializable), ErrorKind::Serialization);
    assert_single_failure!(
        runtime.at(remote, Undeserializable),
        ErrorKind::Deserialization
    );
    assert_single_failure!(runtime.at(remote, Unregistered), ErrorKind::Deserialization);
    // Nothing is encoded for local work.
    runtime.at(Place::FIRST, Unserializable).expect("local run");

    // Outside any finish the sender is the only one left to tell.
    let err = runtime
        .async_at(remote, Unserializable)
        .expect_err("untracked send cannot encode");
    assert_eq!(err.kind(), ErrorKind::Serialization);
    let err = runtime
        .uncounted_async_at(remote, Unserializable)
        .expect_err("uncounted send cannot encode");
    assert_eq!(err.kind(), ErrorKind::Serialization);

    let err = runtime
        .at_call(remote, UnserializableResult)
        .expect_err("result cannot travel");
    assert_eq!(err.kind(), ErrorKind::Multiple);
    assert_eq!(err.suppressed().len(), 1);
    assert_eq!(err.suppressed()[0].kind(), ErrorKind::Serialization);

    let err = assert_single_failure!(
        runtime.at_call(remote, UndeserializableResult),
        ErrorKind::Deserialization
    );
    assert_eq!(err.suppressed()[0].place(), Some(Place::FIRST));
}

#[test]
fn recursive_fib_across_places() {
    test_phase!("recursive_fib_across_places");
    let runtime = run(2);
    let local = runtime.finish_with(|| fib(10)).expect("local fib");
    assert_with_log!(local == 55, "fib(10) here", 55, local);
    let remote = runtime
        .at_call(place(&runtime, 1), Fib { n: 10 })
        .expect("remote fib");
    assert_with_log!(remote == 55, "fib(10) at place 1", 55, remote);
    test_complete!("recursive_fib_across_places");
}

#[test]
fn uncounted_and_immediate_work_report_through_value_slots() {
    let runtime = run(2);
    let remote = place(&runtime, 1);
    let _cx = runtime.enter();

    let id = GlobalId::new().expect("id");
    runtime
        .uncounted_async_at(remote, EchoHere { id })
        .expect("uncounted");
    assert_eq!(id.remove_here::<u64>().expect("echo"), 1);

    let id = GlobalId::new().expect("id");
    runtime
        .immediate_async_at(remote, ImmediateEcho { id })
        .expect("immediate");
    assert_eq!(id.remove_here::<u64>().expect("immediate echo"), 101);
}

#[test]
fn value_slot_type_mismatch_is_internal() {
    let runtime = run(1);
    let _cx = runtime.enter();
    let id = GlobalId::new().expect("id");
    id.put_here(7_u64).expect("put");
    assert_eq!(
        id.remove_here::<String>().expect_err("wrong type").kind(),
        ErrorKind::Internal
    );
    assert_eq!(id.remove_here::<u64>().expect("right type"), 7);
}
