//! In-process transport.
//!
//! A [`LocalHub`] is a run whose places all live in the current process.
//! Each member owns a channel drained by a dedicated delivery thread, so
//! delivery is asynchronous and FIFO per receiver, as with a real network.
//! Hubs are found by name through a process-wide directory; the name is the
//! address a new place joins with.
//!
//! [`LocalHub::kill`] removes a member by force: the victim is told it was
//! killed and every survivor sees it leave. Messages still queued for the
//! victim are lost.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tracing::{debug, info, trace};

use super::{Inbound, Transport};
use crate::error::{Error, Result};
use crate::store::{DurableMap, InMemoryDurableMap};
use crate::types::Place;

enum Envelope {
    Data { from: Place, bytes: Vec<u8> },
    Joined(Vec<Place>),
    Left(Vec<Place>),
    Killed,
    Stop,
}

fn directory() -> &'static Mutex<BTreeMap<String, Weak<LocalHub>>> {
    static HUBS: OnceLock<Mutex<BTreeMap<String, Weak<LocalHub>>>> = OnceLock::new();
    HUBS.get_or_init(|| Mutex::new(BTreeMap::new()))
}

static NEXT_HUB: AtomicU64 = AtomicU64::new(1);

#[derive(Default)]
struct HubState {
    members: BTreeMap<Place, Sender<Envelope>>,
    next_id: u32,
}

/// A set of places connected inside one process.
pub struct LocalHub {
    name: String,
    store: Arc<InMemoryDurableMap>,
    state: Mutex<HubState>,
}

impl LocalHub {
    /// Creates an empty hub under a fresh name.
    #[must_use]
    pub fn create() -> Arc<Self> {
        let name = format!("local-hub-{}", NEXT_HUB.fetch_add(1, Ordering::Relaxed));
        let hub = Arc::new(Self {
            name: name.clone(),
            store: Arc::new(InMemoryDurableMap::new()),
            state: Mutex::new(HubState::default()),
        });
        let mut hubs = directory().lock();
        hubs.retain(|_, hub| hub.strong_count() > 0);
        hubs.insert(name, Arc::downgrade(&hub));
        hub
    }

    /// Finds a live hub by address.
    #[must_use]
    pub fn lookup(address: &str) -> Option<Arc<Self>> {
        directory().lock().get(address).and_then(Weak::upgrade)
    }

    /// The hub's address.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Reserves the next place id and returns the transport for it. The
    /// place becomes a member when the transport is started.
    #[must_use]
    pub fn connect(self: &Arc<Self>) -> LocalTransport {
        let here = {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            Place::from_raw(id)
        };
        let (sender, receiver) = mpsc::channel();
        LocalTransport {
            hub: Arc::clone(self),
            here,
            sender,
            receiver: Mutex::new(Some(receiver)),
            delivery: Mutex::new(None),
        }
    }

    /// Current members, in id order.
    #[must_use]
    pub fn members(&self) -> Vec<Place> {
        self.state.lock().members.keys().copied().collect()
    }

    /// The durable map shared by the hub's places.
    #[must_use]
    pub fn store(&self) -> Arc<InMemoryDurableMap> {
        Arc::clone(&self.store)
    }

    /// Removes `place` by force. Returns false if it was not a member.
    pub fn kill(&self, place: Place) -> bool {
        let mut state = self.state.lock();
        let Some(victim) = state.members.remove(&place) else {
            return false;
        };
        info!(hub = %self.name, place = %place, "killing place");
        let _ = victim.send(Envelope::Killed);
        broadcast(&state, &|| Envelope::Left(vec![place]));
        true
    }

    fn join(&self, place: Place, sender: Sender<Envelope>) {
        let mut state = self.state.lock();
        broadcast(&state, &|| Envelope::Joined(vec![place]));
        state.members.insert(place, sender.clone());
        let everyone: Vec<Place> = state.members.keys().copied().collect();
        let _ = sender.send(Envelope::Joined(everyone));
        debug!(hub = %self.name, place = %place, members = state.members.len(), "place joined");
    }

    fn leave(&self, place: Place) -> bool {
        let mut state = self.state.lock();
        if state.members.remove(&place).is_none() {
            return false;
        }
        broadcast(&state, &|| Envelope::Left(vec![place]));
        debug!(hub = %self.name, place = %place, "place left");
        true
    }

    fn send(&self, from: Place, dst: Place, bytes: Vec<u8>) -> Result<()> {
        let state = self.state.lock();
        if !state.members.contains_key(&from) {
            return Err(Error::transport(dst, format!("{from} is not a member of {}", self.name)));
        }
        let target = state
            .members
            .get(&dst)
            .ok_or_else(|| Error::transport(dst, format!("{dst} is unreachable")))?;
        target
            .send(Envelope::Data { from, bytes })
            .map_err(|_| Error::transport(dst, format!("{dst} stopped receiving")))
    }

    fn max_place(&self) -> u32 {
        self.state.lock().next_id
    }
}

fn broadcast(state: &HubState, make: &dyn Fn() -> Envelope) {
    for sender in state.members.values() {
        let _ = sender.send(make());
    }
}

impl fmt::Debug for LocalHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalHub")
            .field("name", &self.name)
            .field("members", &self.members())
            .finish()
    }
}

/// One place's connection to a [`LocalHub`].
pub struct LocalTransport {
    hub: Arc<LocalHub>,
    here: Place,
    sender: Sender<Envelope>,
    receiver: Mutex<Option<Receiver<Envelope>>>,
    delivery: Mutex<Option<JoinHandle<()>>>,
}

impl LocalTransport {
    /// The hub this transport belongs to.
    #[must_use]
    pub fn hub(&self) -> &Arc<LocalHub> {
        &self.hub
    }
}

fn run_delivery(receiver: &Receiver<Envelope>, inbound: &Weak<dyn Inbound>, here: Place) {
    while let Ok(envelope) = receiver.recv() {
        let Some(target) = inbound.upgrade() else {
            break;
        };
        match envelope {
            Envelope::Data { from, bytes } => target.deliver(from, bytes),
            Envelope::Joined(places) => target.on_join(&places),
            Envelope::Left(places) => target.on_leave(&places),
            Envelope::Killed => {
                target.on_killed();
                break;
            }
            Envelope::Stop => break,
        }
    }
    trace!(place = %here, "delivery thread exiting");
}

impl Transport for LocalTransport {
    fn here(&self) -> Place {
        self.here
    }

    fn max_place(&self) -> u32 {
        self.hub.max_place()
    }

    fn address(&self) -> String {
        self.hub.name.clone()
    }

    fn send(&self, dst: Place, bytes: Vec<u8>) -> Result<()> {
        self.hub.send(self.here, dst, bytes)
    }

    fn start(&self, inbound: Weak<dyn Inbound>) -> Result<()> {
        let receiver = self
            .receiver
            .lock()
            .take()
            .ok_or_else(|| Error::internal(format!("transport of {} already started", self.here)))?;
        let here = self.here;
        let handle = thread::Builder::new()
            .name(format!("{}-p{}-delivery", self.hub.name, here.id()))
            .spawn(move || run_delivery(&receiver, &inbound, here))
            .map_err(|err| {
                Error::internal(format!("cannot start delivery thread: {err}")).with_source(err)
            })?;
        *self.delivery.lock() = Some(handle);
        self.hub.join(here, self.sender.clone());
        Ok(())
    }

    fn durable_map(&self) -> Arc<dyn DurableMap> {
        self.hub.store() as Arc<dyn DurableMap>
    }

    fn shutdown(&self) {
        self.hub.leave(self.here);
        let _ = self.sender.send(Envelope::Stop);
        let handle = self.delivery.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl fmt::Debug for LocalTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalTransport")
            .field("hub", &self.hub.name)
            .field("here", &self.here)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Debug, PartialEq)]
    enum Event {
        Data(Place, Vec<u8>),
        Join(Vec<Place>),
        Leave(Vec<Place>),
        Killed,
    }

    struct Recorder {
        events: Mutex<Vec<Event>>,
        tx: Mutex<mpsc::Sender<()>>,
    }

    impl Recorder {
        fn new() -> (Arc<Self>, mpsc::Receiver<()>) {
            let (tx, rx) = mpsc::channel();
            let recorder = Arc::new(Self {
                events: Mutex::new(Vec::new()),
                tx: Mutex::new(tx),
            });
            (recorder, rx)
        }

        fn record(&self, event: Event) {
            self.events.lock().push(event);
            let _ = self.tx.lock().send(());
        }
    }

    impl Inbound for Recorder {
        fn deliver(self: Arc<Self>, from: Place, bytes: Vec<u8>) {
            self.record(Event::Data(from, bytes));
        }

        fn on_join(self: Arc<Self>, places: &[Place]) {
            self.record(Event::Join(places.to_vec()));
        }

        fn on_leave(self: Arc<Self>, places: &[Place]) {
            self.record(Event::Leave(places.to_vec()));
        }

        fn on_killed(self: Arc<Self>) {
            self.record(Event::Killed);
        }
    }

    fn wait_events(rx: &mpsc::Receiver<()>, n: usize) {
        for _ in 0..n {
            rx.recv_timeout(Duration::from_secs(5)).expect("event");
        }
    }

    fn p(id: u32) -> Place {
        Place::from_raw(id)
    }

    #[test]
    fn hub_is_found_by_address() {
        let hub = LocalHub::create();
        let transport = hub.connect();
        let found = LocalHub::lookup(&transport.address()).expect("registered");
        assert!(Arc::ptr_eq(&found, &hub));
        assert!(LocalHub::lookup("no-such-hub").is_none());
    }

    #[test]
    fn members_see_joins_data_and_kills_in_order() {
        let hub = LocalHub::create();
        let t0 = hub.connect();
        let t1 = hub.connect();
        let (r0, rx0) = Recorder::new();
        let (r1, rx1) = Recorder::new();
        let weak0: Weak<dyn Inbound> = Arc::downgrade(&r0) as Weak<dyn Inbound>;
        let weak1: Weak<dyn Inbound> = Arc::downgrade(&r1) as Weak<dyn Inbound>;
        t0.start(weak0).expect("start 0");
        t1.start(weak1).expect("start 1");
        assert_eq!(t0.max_place(), 2);

        t1.send(p(0), vec![7]).expect("send");
        assert!(hub.kill(p(1)));
        wait_events(&rx0, 4);
        wait_events(&rx1, 2);

        assert_eq!(
            *r0.events.lock(),
            vec![
                Event::Join(vec![p(0)]),
                Event::Join(vec![p(1)]),
                Event::Data(p(1), vec![7]),
                Event::Leave(vec![p(1)]),
            ]
        );
        assert_eq!(
            *r1.events.lock(),
            vec![Event::Join(vec![p(0), p(1)]), Event::Killed]
        );
        assert!(t0.send(p(1), vec![1]).is_err());
        assert!(t1.send(p(0), vec![1]).is_err());
        assert_eq!(hub.members(), vec![p(0)]);
        t0.shutdown();
        t1.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let hub = LocalHub::create();
        let t0 = hub.connect();
        let (r0, _rx0) = Recorder::new();
        t0.start(Arc::downgrade(&r0) as Weak<dyn Inbound>).expect("start");
        t0.shutdown();
        t0.shutdown();
        assert!(hub.members().is_empty());
        let err = t0.send(p(0), vec![]).expect_err("left");
        assert_eq!(err.kind(), crate::ErrorKind::Transport);
    }
}
