use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::Arc;
use std::time::Duration;

use eibd_core::lpdu::{Busmonitor, LData, Lpdu};
use eibd_core::{Destination, GroupAddress, IndividualAddress};
use eibd_datalink::{DataLinkError, Flag, Flagpole, Layer2Interface, Mailbox, Worker};

use crate::Layer3Error;

const EVENT: Flag = Flag::new(1);
const REPLY_POLL: Duration = Duration::from_millis(100);

pub type SubscriptionId = u64;

/// Receiver of `L_Data` frames routed to one subscription.
///
/// Called on the dispatch thread; implementations should only queue.
pub trait LDataSink: Send + Sync {
    fn deliver(&self, frame: LData);
    /// The medium is gone; no further frames will arrive.
    fn on_medium_lost(&self) {}
}

pub trait BusmonitorSink: Send + Sync {
    fn deliver(&self, frame: Busmonitor);
    fn on_medium_lost(&self) {}
}

/// Whether an individual subscription claims its peer address exclusively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndividualLock {
    None,
    Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Broadcast,
    /// Group 0 receives every group frame.
    Group(GroupAddress),
    Individual {
        source: IndividualAddress,
        dest: IndividualAddress,
        lock: IndividualLock,
    },
}

impl Route {
    fn matches(&self, frame: &LData) -> bool {
        match (*self, frame.destination) {
            (Self::Broadcast, Destination::Group(g)) => g.is_broadcast(),
            (Self::Group(want), Destination::Group(g)) => {
                !g.is_broadcast() && (want.is_broadcast() || want == g)
            }
            (Self::Individual { source, dest, .. }, Destination::Individual(d)) => {
                dest == d && (source.is_unset() || source == frame.source)
            }
            _ => false,
        }
    }
}

type Reply = SyncSender<Result<(), Layer3Error>>;

enum Event {
    Subscribe {
        id: SubscriptionId,
        route: Route,
        sink: Arc<dyn LDataSink>,
        reply: Reply,
    },
    Monitor {
        id: SubscriptionId,
        is_virtual: bool,
        sink: Arc<dyn BusmonitorSink>,
        reply: Reply,
    },
    Unsubscribe(SubscriptionId),
    Frame(Lpdu),
    MediumLost,
}

struct Shared {
    medium: Arc<dyn Layer2Interface>,
    events: Mailbox<Event>,
    next_id: AtomicU64,
    running: AtomicBool,
}

/// Dispatch layer owning one medium.
///
/// A pump thread pulls frames from the medium; a dispatch thread owns the
/// subscriber registry and routes every frame to the matching
/// subscriptions. Everything else talks to it through [`Layer3Handle`].
pub struct Layer3 {
    handle: Layer3Handle,
    pump: Option<Worker>,
    dispatch: Option<Worker>,
}

impl Layer3 {
    pub fn new(medium: Arc<dyn Layer2Interface>) -> Result<Self, Layer3Error> {
        medium.open()?;
        let pole = Arc::new(Flagpole::new());
        let shared = Arc::new(Shared {
            medium: Arc::clone(&medium),
            events: Mailbox::new(Arc::clone(&pole), EVENT),
            next_id: AtomicU64::new(1),
            running: AtomicBool::new(true),
        });

        let registry = Registry {
            medium,
            subscribers: Vec::new(),
            monitors: Vec::new(),
        };
        let dispatch_shared = Arc::clone(&shared);
        let dispatch = Worker::spawn("layer3", pole, move |pole| {
            dispatch_loop(&dispatch_shared, registry, &pole)
        })
        .map_err(DataLinkError::from)?;

        let pump_shared = Arc::clone(&shared);
        let pump = Worker::spawn("layer3-pump", Arc::new(Flagpole::new()), move |pole| {
            pump_loop(&pump_shared, &pole)
        })
        .map_err(DataLinkError::from)?;

        Ok(Self {
            handle: Layer3Handle { shared },
            pump: Some(pump),
            dispatch: Some(dispatch),
        })
    }

    pub fn handle(&self) -> Layer3Handle {
        self.handle.clone()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(pump) = self.pump.take() {
            pump.stop();
        }
        let Some(dispatch) = self.dispatch.take() else {
            return;
        };
        dispatch.stop();
        self.handle.shared.running.store(false, Ordering::SeqCst);
        if let Err(e) = self.handle.shared.medium.close() {
            log::debug!("closing medium: {e}");
        }
    }
}

impl Drop for Layer3 {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Cloneable access to a running [`Layer3`].
#[derive(Clone)]
pub struct Layer3Handle {
    shared: Arc<Shared>,
}

impl fmt::Debug for Layer3Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Layer3Handle")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Layer3Handle {
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn default_address(&self) -> IndividualAddress {
        self.shared.medium.default_address()
    }

    pub fn send_queue_empty(&self) -> bool {
        self.shared.medium.send_queue_empty()
    }

    /// Sends a frame, filling in the medium's address when the source is unset.
    pub fn send(&self, mut frame: LData) -> Result<(), Layer3Error> {
        if !self.is_running() {
            return Err(Layer3Error::Stopped);
        }
        if frame.source.is_unset() {
            frame.source = self.default_address();
        }
        log::debug!("send {frame}");
        self.shared.medium.send(frame)?;
        Ok(())
    }

    /// Frames to group 0/0/0.
    pub fn register_broadcast(
        &self,
        sink: Arc<dyn LDataSink>,
    ) -> Result<SubscriptionId, Layer3Error> {
        self.subscribe(Route::Broadcast, sink)
    }

    /// Frames to `group`, or to any group when `group` is 0.
    pub fn register_group(
        &self,
        sink: Arc<dyn LDataSink>,
        group: GroupAddress,
    ) -> Result<SubscriptionId, Layer3Error> {
        self.subscribe(Route::Group(group), sink)
    }

    /// Frames from `source` (any when 0) to `dest` (0 is this device).
    pub fn register_individual(
        &self,
        sink: Arc<dyn LDataSink>,
        source: IndividualAddress,
        dest: IndividualAddress,
        lock: IndividualLock,
    ) -> Result<SubscriptionId, Layer3Error> {
        self.subscribe(Route::Individual { source, dest, lock }, sink)
    }

    pub fn register_busmonitor(
        &self,
        sink: Arc<dyn BusmonitorSink>,
    ) -> Result<SubscriptionId, Layer3Error> {
        self.request(|id, reply| Event::Monitor {
            id,
            is_virtual: false,
            sink,
            reply,
        })
    }

    pub fn register_vbusmonitor(
        &self,
        sink: Arc<dyn BusmonitorSink>,
    ) -> Result<SubscriptionId, Layer3Error> {
        self.request(|id, reply| Event::Monitor {
            id,
            is_virtual: true,
            sink,
            reply,
        })
    }

    pub fn deregister(&self, id: SubscriptionId) {
        if self.is_running() {
            self.shared.events.push(Event::Unsubscribe(id));
        }
    }

    fn subscribe(
        &self,
        route: Route,
        sink: Arc<dyn LDataSink>,
    ) -> Result<SubscriptionId, Layer3Error> {
        self.request(|id, reply| Event::Subscribe {
            id,
            route,
            sink,
            reply,
        })
    }

    fn request<F>(&self, event: F) -> Result<SubscriptionId, Layer3Error>
    where
        F: FnOnce(SubscriptionId, Reply) -> Event,
    {
        if !self.is_running() {
            return Err(Layer3Error::Stopped);
        }
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::sync_channel(1);
        self.shared.events.push(event(id, tx));
        loop {
            match rx.recv_timeout(REPLY_POLL) {
                Ok(result) => return result.map(|()| id),
                Err(RecvTimeoutError::Timeout) if self.is_running() => {}
                Err(_) => return Err(Layer3Error::Stopped),
            }
        }
    }
}

struct Subscriber {
    id: SubscriptionId,
    route: Route,
    sink: Arc<dyn LDataSink>,
}

struct Monitor {
    id: SubscriptionId,
    is_virtual: bool,
    sink: Arc<dyn BusmonitorSink>,
}

/// Subscriber lists; only the dispatch thread touches them.
struct Registry {
    medium: Arc<dyn Layer2Interface>,
    subscribers: Vec<Subscriber>,
    monitors: Vec<Monitor>,
}

impl Registry {
    fn tracks_group(&self, group: GroupAddress) -> bool {
        self.subscribers
            .iter()
            .any(|s| s.route == Route::Group(group))
    }

    fn tracks_individual(&self, addr: IndividualAddress) -> bool {
        self.subscribers
            .iter()
            .any(|s| matches!(s.route, Route::Individual { dest, .. } if dest == addr))
    }

    fn has_busmonitor(&self, is_virtual: bool) -> bool {
        self.monitors.iter().any(|m| m.is_virtual == is_virtual)
    }

    fn subscribe(
        &mut self,
        id: SubscriptionId,
        route: Route,
        sink: Arc<dyn LDataSink>,
    ) -> Result<(), Layer3Error> {
        if self.has_busmonitor(false) {
            return Err(Layer3Error::BusmonitorActive);
        }
        match route {
            Route::Group(group) if !group.is_broadcast() && !self.tracks_group(group) => {
                self.medium.add_group_address(group)?;
            }
            Route::Individual { source, dest, lock } => {
                if lock == IndividualLock::Connection
                    && self.subscribers.iter().any(|s| {
                        matches!(
                            s.route,
                            Route::Individual { source: held, lock: IndividualLock::Connection, .. }
                                if held == source
                        )
                    })
                {
                    return Err(Layer3Error::AddressLocked);
                }
                if !dest.is_unset() && !self.tracks_individual(dest) {
                    self.medium.add_address(dest)?;
                }
            }
            _ => {}
        }
        log::debug!("subscription {id}: {route:?}");
        self.subscribers.push(Subscriber { id, route, sink });
        Ok(())
    }

    fn monitor(
        &mut self,
        id: SubscriptionId,
        is_virtual: bool,
        sink: Arc<dyn BusmonitorSink>,
    ) -> Result<(), Layer3Error> {
        if is_virtual {
            if !self.has_busmonitor(true) {
                self.medium.open_vbusmonitor()?;
                log::info!("virtual busmonitor opened");
            }
        } else {
            if !self.subscribers.is_empty() {
                return Err(Layer3Error::NormalModeActive);
            }
            if !self.has_busmonitor(false) {
                self.medium.close()?;
                if let Err(e) = self.medium.enter_busmonitor() {
                    if let Err(reopen) = self.medium.open() {
                        log::error!("cannot return to normal mode: {reopen}");
                    }
                    return Err(e.into());
                }
                log::info!("busmonitor mode entered");
            }
        }
        self.monitors.push(Monitor {
            id,
            is_virtual,
            sink,
        });
        Ok(())
    }

    fn unsubscribe(&mut self, id: SubscriptionId) {
        if let Some(pos) = self.subscribers.iter().position(|s| s.id == id) {
            let removed = self.subscribers.remove(pos);
            let result = match removed.route {
                Route::Group(group) if !group.is_broadcast() && !self.tracks_group(group) => {
                    self.medium.remove_group_address(group)
                }
                Route::Individual { dest, .. }
                    if !dest.is_unset() && !self.tracks_individual(dest) =>
                {
                    self.medium.remove_address(dest)
                }
                _ => Ok(()),
            };
            if let Err(e) = result {
                log::warn!("removing address filter: {e}");
            }
            return;
        }
        let Some(pos) = self.monitors.iter().position(|m| m.id == id) else {
            return;
        };
        let removed = self.monitors.remove(pos);
        if self.has_busmonitor(removed.is_virtual) {
            return;
        }
        let result = if removed.is_virtual {
            self.medium.close_vbusmonitor()
        } else {
            log::info!("busmonitor mode left");
            self.medium
                .leave_busmonitor()
                .and_then(|()| self.medium.open())
        };
        if let Err(e) = result {
            log::error!("leaving busmonitor: {e}");
        }
    }

    fn dispatch(&self, frame: Lpdu) {
        match frame {
            Lpdu::Busmonitor(capture) => {
                for m in &self.monitors {
                    m.sink.deliver(capture.clone());
                }
            }
            Lpdu::Data(mut frame) => {
                log::debug!("recv {frame}");
                if frame.destination == Destination::Individual(self.medium.default_address()) {
                    frame.destination = Destination::Individual(IndividualAddress::UNSET);
                }
                for s in self.subscribers.iter().filter(|s| s.route.matches(&frame)) {
                    s.sink.deliver(frame.clone());
                }
            }
            other => log::trace!("not dispatched: {other}"),
        }
    }

    fn medium_lost(&self) {
        for s in &self.subscribers {
            s.sink.on_medium_lost();
        }
        for m in &self.monitors {
            m.sink.on_medium_lost();
        }
    }
}

fn dispatch_loop(shared: &Shared, mut registry: Registry, pole: &Flagpole) {
    'run: loop {
        if pole.wait(&[EVENT]).stopped() {
            break;
        }
        while let Some(event) = shared.events.pop() {
            match event {
                Event::Subscribe {
                    id,
                    route,
                    sink,
                    reply,
                } => {
                    let _ = reply.send(registry.subscribe(id, route, sink));
                }
                Event::Monitor {
                    id,
                    is_virtual,
                    sink,
                    reply,
                } => {
                    let _ = reply.send(registry.monitor(id, is_virtual, sink));
                }
                Event::Unsubscribe(id) => registry.unsubscribe(id),
                Event::Frame(frame) => registry.dispatch(frame),
                Event::MediumLost => {
                    registry.medium_lost();
                    break 'run;
                }
            }
        }
    }
    shared.running.store(false, Ordering::SeqCst);
}

fn pump_loop(shared: &Shared, stop: &Flagpole) {
    loop {
        match shared.medium.receive(stop) {
            Some(frame) => {
                shared.events.push(Event::Frame(frame));
            }
            None if stop.stopped() => break,
            None if shared.medium.connection_lost() => {
                log::error!("connection to the medium lost");
                shared.events.push(Event::MediumLost);
                break;
            }
            None => {}
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use eibd_datalink::Loopback;
    use std::sync::Mutex;
    use std::time::Instant;

    /// Collects delivered frames in a mailbox.
    pub(crate) struct Collect<T> {
        pub queue: Mailbox<T>,
        pub lost: AtomicBool,
    }

    impl<T> Collect<T> {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                queue: Mailbox::new(Arc::new(Flagpole::new()), Flag::new(1)),
                lost: AtomicBool::new(false),
            })
        }

        pub fn next(&self) -> Option<T> {
            self.queue
                .pop_wait(Some(Instant::now() + Duration::from_secs(2)))
        }

        pub fn quiet(&self) -> bool {
            self.queue
                .pop_wait(Some(Instant::now() + Duration::from_millis(100)))
                .is_none()
        }
    }

    impl LDataSink for Collect<LData> {
        fn deliver(&self, frame: LData) {
            self.queue.push(frame);
        }
        fn on_medium_lost(&self) {
            self.lost.store(true, Ordering::SeqCst);
        }
    }

    impl BusmonitorSink for Collect<Busmonitor> {
        fn deliver(&self, frame: Busmonitor) {
            self.queue.push(frame);
        }
    }

    /// Loopback that records the filter and mode calls made on it.
    pub(crate) struct Recording {
        pub inner: Loopback,
        pub calls: Mutex<Vec<String>>,
    }

    impl Recording {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: Loopback::new(IndividualAddress::new(0, 0, 1)),
                calls: Mutex::new(Vec::new()),
            })
        }

        fn note(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Layer2Interface for Recording {
        fn open(&self) -> Result<(), DataLinkError> {
            self.note("open".into());
            Ok(())
        }
        fn close(&self) -> Result<(), DataLinkError> {
            self.note("close".into());
            Ok(())
        }
        fn send(&self, frame: LData) -> Result<(), DataLinkError> {
            self.inner.send(frame)
        }
        fn receive(&self, stop: &Flagpole) -> Option<Lpdu> {
            self.inner.receive(stop)
        }
        fn enter_busmonitor(&self) -> Result<(), DataLinkError> {
            self.note("enter_busmonitor".into());
            self.inner.enter_busmonitor()
        }
        fn leave_busmonitor(&self) -> Result<(), DataLinkError> {
            self.note("leave_busmonitor".into());
            self.inner.leave_busmonitor()
        }
        fn open_vbusmonitor(&self) -> Result<(), DataLinkError> {
            self.note("open_vbusmonitor".into());
            self.inner.open_vbusmonitor()
        }
        fn close_vbusmonitor(&self) -> Result<(), DataLinkError> {
            self.note("close_vbusmonitor".into());
            self.inner.close_vbusmonitor()
        }
        fn add_address(&self, addr: IndividualAddress) -> Result<(), DataLinkError> {
            self.note(format!("add {addr}"));
            Ok(())
        }
        fn remove_address(&self, addr: IndividualAddress) -> Result<(), DataLinkError> {
            self.note(format!("remove {addr}"));
            Ok(())
        }
        fn add_group_address(&self, addr: GroupAddress) -> Result<(), DataLinkError> {
            self.note(format!("add {addr}"));
            Ok(())
        }
        fn remove_group_address(&self, addr: GroupAddress) -> Result<(), DataLinkError> {
            self.note(format!("remove {addr}"));
            Ok(())
        }
        fn default_address(&self) -> IndividualAddress {
            self.inner.default_address()
        }
        fn connection_lost(&self) -> bool {
            self.inner.connection_lost()
        }
        fn send_queue_empty(&self) -> bool {
            true
        }
    }

    fn group_frame(group: GroupAddress) -> LData {
        LData::new(Destination::Group(group), vec![0x00, 0x80])
    }

    /// Waits until the dispatch thread has handled everything queued so far.
    fn settle(l3: &Layer3Handle) {
        let probe = Collect::<LData>::new();
        let id = l3.register_broadcast(probe).unwrap();
        l3.deregister(id);
    }

    #[test]
    fn busmonitor_excludes_normal_subscribers() {
        let medium = Recording::new();
        let l3 = Layer3::new(medium.clone()).unwrap();
        let h = l3.handle();

        let monitor = h.register_busmonitor(Collect::<Busmonitor>::new()).unwrap();
        assert!(matches!(
            h.register_group(Collect::<LData>::new(), GroupAddress::new(1, 2, 3)),
            Err(Layer3Error::BusmonitorActive)
        ));
        // A second busmonitor shares the mode.
        let second = h.register_busmonitor(Collect::<Busmonitor>::new()).unwrap();
        h.deregister(monitor);
        h.deregister(second);

        let group = h
            .register_group(Collect::<LData>::new(), GroupAddress::new(1, 2, 3))
            .unwrap();
        assert!(matches!(
            h.register_busmonitor(Collect::<Busmonitor>::new()),
            Err(Layer3Error::NormalModeActive)
        ));
        // The virtual busmonitor coexists with normal traffic.
        h.register_vbusmonitor(Collect::<Busmonitor>::new()).unwrap();
        h.deregister(group);
        settle(&h);

        assert_eq!(
            medium.calls(),
            [
                "open",
                "close",
                "enter_busmonitor",
                "leave_busmonitor",
                "open",
                "add 1/2/3",
                "open_vbusmonitor",
                "remove 1/2/3",
            ]
        );
    }

    #[test]
    fn busmonitor_receives_captures() {
        let medium = Arc::new(Loopback::new(IndividualAddress::new(0, 0, 1)));
        let l3 = Layer3::new(medium.clone()).unwrap();
        let monitor = Collect::<Busmonitor>::new();
        l3.handle().register_busmonitor(monitor.clone()).unwrap();
        medium.inject(Lpdu::Data(group_frame(GroupAddress::new(1, 2, 3))));
        let capture = monitor.next().unwrap();
        assert!(matches!(capture.decode(), Lpdu::Data(_)));
    }

    #[test]
    fn group_and_broadcast_routing() {
        let medium = Arc::new(Loopback::new(IndividualAddress::new(0, 0, 1)));
        let l3 = Layer3::new(medium.clone()).unwrap();
        let h = l3.handle();
        let exact = Collect::<LData>::new();
        let other = Collect::<LData>::new();
        let all = Collect::<LData>::new();
        let broadcast = Collect::<LData>::new();
        h.register_group(exact.clone(), GroupAddress::new(1, 2, 3)).unwrap();
        h.register_group(other.clone(), GroupAddress::new(1, 2, 4)).unwrap();
        h.register_group(all.clone(), GroupAddress(0)).unwrap();
        h.register_broadcast(broadcast.clone()).unwrap();

        h.send(group_frame(GroupAddress::new(1, 2, 3))).unwrap();
        let got = exact.next().unwrap();
        assert_eq!(got.source, IndividualAddress::new(0, 0, 1));
        assert!(all.next().is_some());
        assert!(other.quiet());
        assert!(broadcast.quiet());

        h.send(group_frame(GroupAddress(0))).unwrap();
        assert!(broadcast.next().is_some());
        assert!(all.quiet());
    }

    #[test]
    fn individual_routing_clears_own_address() {
        let medium = Arc::new(Loopback::new(IndividualAddress::new(1, 1, 1)));
        let l3 = Layer3::new(medium.clone()).unwrap();
        let h = l3.handle();
        let any = Collect::<LData>::new();
        let from_peer = Collect::<LData>::new();
        h.register_individual(any.clone(), IndividualAddress::UNSET, IndividualAddress::UNSET, IndividualLock::None)
            .unwrap();
        h.register_individual(
            from_peer.clone(),
            IndividualAddress::new(1, 1, 9),
            IndividualAddress::UNSET,
            IndividualLock::Connection,
        )
        .unwrap();

        let mut frame = LData::new(
            Destination::Individual(IndividualAddress::new(1, 1, 1)),
            vec![0x80],
        );
        frame.source = IndividualAddress::new(1, 1, 5);
        medium.inject(Lpdu::Data(frame));
        let got = any.next().unwrap();
        assert_eq!(got.destination, Destination::Individual(IndividualAddress::UNSET));
        assert!(from_peer.quiet());
    }

    #[test]
    fn connection_lock_is_exclusive() {
        let medium = Arc::new(Loopback::new(IndividualAddress::new(1, 1, 1)));
        let l3 = Layer3::new(medium).unwrap();
        let h = l3.handle();
        let peer = IndividualAddress::new(1, 1, 9);
        let first = h
            .register_individual(Collect::<LData>::new(), peer, IndividualAddress::UNSET, IndividualLock::Connection)
            .unwrap();
        assert!(matches!(
            h.register_individual(Collect::<LData>::new(), peer, IndividualAddress::UNSET, IndividualLock::Connection),
            Err(Layer3Error::AddressLocked)
        ));
        h.deregister(first);
        h.register_individual(Collect::<LData>::new(), peer, IndividualAddress::UNSET, IndividualLock::Connection)
            .unwrap();
    }

    #[test]
    fn medium_loss_notifies_subscribers() {
        let medium = Arc::new(Loopback::new(IndividualAddress::new(0, 0, 1)));
        let l3 = Layer3::new(medium.clone()).unwrap();
        let h = l3.handle();
        let sink = Collect::<LData>::new();
        h.register_group(sink.clone(), GroupAddress(0)).unwrap();
        medium.disconnect();
        let deadline = Instant::now() + Duration::from_secs(2);
        while h.is_running() {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(sink.lost.load(Ordering::SeqCst));
        assert!(matches!(
            h.send(group_frame(GroupAddress::new(1, 2, 3))),
            Err(Layer3Error::Stopped)
        ));
        assert!(matches!(
            h.register_broadcast(Collect::<LData>::new()),
            Err(Layer3Error::Stopped)
        ));
    }
}
