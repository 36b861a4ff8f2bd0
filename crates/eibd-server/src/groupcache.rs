use std::sync::mpsc::{self, SyncSender};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use eibd_core::apdu::Apdu;
use eibd_core::lpdu::LData;
use eibd_core::{Destination, GroupAddress, IndividualAddress, Tpdu};
use eibd_datalink::{DataLinkError, Flag, Flagpole, Mailbox, Worker};

use crate::layer3::{LDataSink, Layer3Handle, SubscriptionId};
use crate::Layer3Error;

const EVENT: Flag = Flag::new(1);

#[derive(Debug, Clone)]
pub struct GroupCacheConfig {
    /// Longest the cache loop sleeps while readers are blocked.
    pub poll_interval: Duration,
}

impl Default for GroupCacheConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Last value seen for one group address.
///
/// An entry with `src == 0` stands for "unknown": nothing answered a read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCacheEntry {
    pub dst: GroupAddress,
    pub src: IndividualAddress,
    /// APDU of the last `GroupValue_Write` / `GroupValue_Response`.
    pub apdu: Vec<u8>,
    pub received: Instant,
}

impl GroupCacheEntry {
    fn unknown(dst: GroupAddress) -> Self {
        Self {
            dst,
            src: IndividualAddress::UNSET,
            apdu: Vec::new(),
            received: Instant::now(),
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.src.is_unset()
    }

    pub fn value(&self) -> Option<Apdu> {
        Apdu::decode(&self.apdu).ok()
    }
}

enum Event {
    Observed(GroupCacheEntry),
    Read {
        dst: GroupAddress,
        timeout: Duration,
        max_age: Duration,
        reply: SyncSender<GroupCacheEntry>,
    },
    Remove(GroupAddress),
    Clear,
    Snapshot(SyncSender<Vec<GroupCacheEntry>>),
}

struct Observer(Arc<Mailbox<Event>>);

impl LDataSink for Observer {
    fn deliver(&self, frame: LData) {
        let Destination::Group(dst) = frame.destination else {
            return;
        };
        let Ok(Tpdu::DataUnnumbered(apdu)) = Tpdu::decode(&frame.data) else {
            return;
        };
        if matches!(
            Apdu::decode(&apdu),
            Ok(Apdu::GroupValueWrite(_) | Apdu::GroupValueResponse(_))
        ) {
            self.0.push(Event::Observed(GroupCacheEntry {
                dst,
                src: frame.source,
                apdu,
                received: Instant::now(),
            }));
        }
    }
}

/// Cache of group values seen on the bus.
///
/// A loop thread owns the entries; reads, updates and maintenance reach it
/// through its event queue.
pub struct GroupCache {
    layer3: Layer3Handle,
    events: Arc<Mailbox<Event>>,
    subscription: Mutex<Option<SubscriptionId>>,
    worker: Option<Worker>,
}

impl GroupCache {
    /// Creates a disabled cache.
    pub fn new(layer3: Layer3Handle, config: GroupCacheConfig) -> Result<Self, Layer3Error> {
        let pole = Arc::new(Flagpole::new());
        let events = Arc::new(Mailbox::new(Arc::clone(&pole), EVENT));
        let mut state = CacheLoop {
            layer3: layer3.clone(),
            events: Arc::clone(&events),
            config,
            entries: Vec::new(),
            waiting: Vec::new(),
        };
        let worker = Worker::spawn("groupcache", pole, move |pole| state.run(&pole))
            .map_err(DataLinkError::from)?;
        Ok(Self {
            layer3,
            events,
            subscription: Mutex::new(None),
            worker: Some(worker),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Starts observing group traffic.
    pub fn enable(&self) -> Result<(), Layer3Error> {
        let mut subscription = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if subscription.is_none() {
            let observer = Arc::new(Observer(Arc::clone(&self.events)));
            *subscription = Some(self.layer3.register_group(observer, GroupAddress(0))?);
            log::info!("group cache enabled");
        }
        Ok(())
    }

    /// Stops observing and forgets every entry.
    pub fn disable(&self) {
        let id = self
            .subscription
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(id) = id {
            self.layer3.deregister(id);
            self.clear();
            log::info!("group cache disabled");
        }
    }

    /// Cached value of `dst`.
    ///
    /// Without an entry (or with one older than a non-zero `max_age`) a
    /// zero `timeout` answers "unknown" at once; otherwise a
    /// `GroupValue_Read` goes out and the call waits up to `timeout` for
    /// the answer, caching "unknown" if none arrives.
    pub fn read(&self, dst: GroupAddress, timeout: Duration, max_age: Duration) -> GroupCacheEntry {
        if !self.is_enabled() {
            return GroupCacheEntry::unknown(GroupAddress(0));
        }
        let (reply, answer) = mpsc::sync_channel(1);
        self.events.push(Event::Read {
            dst,
            timeout,
            max_age,
            reply,
        });
        answer
            .recv()
            .unwrap_or_else(|_| GroupCacheEntry::unknown(dst))
    }

    pub fn remove(&self, dst: GroupAddress) {
        self.events.push(Event::Remove(dst));
    }

    pub fn clear(&self) {
        self.events.push(Event::Clear);
    }

    /// Entries sorted by group address.
    pub fn entries(&self) -> Vec<GroupCacheEntry> {
        let (reply, answer) = mpsc::sync_channel(1);
        self.events.push(Event::Snapshot(reply));
        answer.recv().unwrap_or_default()
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.disable();
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }
}

impl Drop for GroupCache {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Waiter {
    dst: GroupAddress,
    deadline: Instant,
    reply: SyncSender<GroupCacheEntry>,
}

struct CacheLoop {
    layer3: Layer3Handle,
    events: Arc<Mailbox<Event>>,
    config: GroupCacheConfig,
    /// Sorted by `dst`.
    entries: Vec<GroupCacheEntry>,
    waiting: Vec<Waiter>,
}

impl CacheLoop {
    fn run(&mut self, pole: &Flagpole) {
        loop {
            let mut deadline = Instant::now() + self.config.poll_interval;
            for w in &self.waiting {
                deadline = deadline.min(w.deadline);
            }
            if pole.wait_until(&[EVENT], deadline).stopped() {
                break;
            }
            while let Some(event) = self.events.pop() {
                self.handle(event);
            }
            self.expire(Instant::now());
        }
        // Dropping the waiters' senders wakes their readers.
        self.waiting.clear();
    }

    fn find(&self, dst: GroupAddress) -> Result<usize, usize> {
        self.entries.binary_search_by_key(&dst, |e| e.dst)
    }

    fn insert(&mut self, entry: GroupCacheEntry) {
        match self.find(entry.dst) {
            Ok(pos) => self.entries[pos] = entry,
            Err(pos) => self.entries.insert(pos, entry),
        }
    }

    fn fresh(&self, dst: GroupAddress, max_age: Duration) -> Option<&GroupCacheEntry> {
        let entry = &self.entries[self.find(dst).ok()?];
        if !max_age.is_zero() && entry.received.elapsed() > max_age {
            return None;
        }
        Some(entry)
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Observed(entry) => {
                log::debug!("group cache update {} from {}", entry.dst, entry.src);
                let dst = entry.dst;
                self.waiting.retain(|w| {
                    if w.dst == dst {
                        let _ = w.reply.send(entry.clone());
                        false
                    } else {
                        true
                    }
                });
                self.insert(entry);
            }
            Event::Read {
                dst,
                timeout,
                max_age,
                reply,
            } => {
                if let Some(entry) = self.fresh(dst, max_age) {
                    let _ = reply.send(entry.clone());
                    return;
                }
                if timeout.is_zero() {
                    let _ = reply.send(GroupCacheEntry::unknown(dst));
                    return;
                }
                if let Err(e) = self.request(dst) {
                    log::warn!("group cache read of {dst} not sent: {e}");
                }
                self.waiting.push(Waiter {
                    dst,
                    deadline: Instant::now() + timeout,
                    reply,
                });
            }
            Event::Remove(dst) => {
                if let Ok(pos) = self.find(dst) {
                    self.entries.remove(pos);
                }
            }
            Event::Clear => self.entries.clear(),
            Event::Snapshot(reply) => {
                let _ = reply.send(self.entries.clone());
            }
        }
    }

    fn request(&self, dst: GroupAddress) -> Result<(), Layer3Error> {
        let tpdu = Tpdu::DataUnnumbered(Apdu::GroupValueRead.to_bytes()?);
        self.layer3
            .send(LData::new(Destination::Group(dst), tpdu.to_bytes()?))
    }

    fn expire(&mut self, now: Instant) {
        let mut expired = Vec::new();
        self.waiting.retain(|w| {
            if now >= w.deadline {
                expired.push((w.dst, w.reply.clone()));
                false
            } else {
                true
            }
        });
        // A stale entry nobody refreshed in time is replaced too.
        for (dst, reply) in expired {
            let entry = GroupCacheEntry::unknown(dst);
            self.insert(entry.clone());
            let _ = reply.send(entry);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer3::Layer3;
    use crate::layer4::TGroup;
    use eibd_core::lpdu::Lpdu;
    use eibd_datalink::Loopback;
    use std::thread;

    const ADDR: GroupAddress = GroupAddress::new(1, 2, 3);

    fn setup() -> (Arc<Loopback>, Layer3, GroupCache) {
        let medium = Arc::new(Loopback::new(IndividualAddress::new(1, 1, 1)));
        let l3 = Layer3::new(medium.clone()).unwrap();
        let config = GroupCacheConfig {
            poll_interval: Duration::from_millis(50),
        };
        let cache = GroupCache::new(l3.handle(), config).unwrap();
        cache.enable().unwrap();
        (medium, l3, cache)
    }

    fn write_from(src: IndividualAddress, value: u8) -> Lpdu {
        let mut frame = LData::new(Destination::Group(ADDR), vec![0x00, 0x80 | value]);
        frame.source = src;
        Lpdu::Data(frame)
    }

    #[test]
    fn empty_cache_answers_unknown_immediately() {
        let (_medium, _l3, cache) = setup();
        let started = Instant::now();
        let entry = cache.read(ADDR, Duration::ZERO, Duration::ZERO);
        assert!(entry.is_unknown());
        assert_eq!(entry.dst, ADDR);
        assert!(started.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn observed_writes_are_cached() {
        let (medium, _l3, cache) = setup();
        medium.inject(write_from(IndividualAddress::new(1, 1, 9), 1));
        let deadline = Instant::now() + Duration::from_secs(2);
        while cache.entries().is_empty() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(10));
        }
        let entry = cache.read(ADDR, Duration::ZERO, Duration::ZERO);
        assert_eq!(entry.src, IndividualAddress::new(1, 1, 9));
        assert_eq!(entry.apdu, [0x00, 0x81]);
        assert!(matches!(entry.value(), Some(Apdu::GroupValueWrite(_))));

        cache.remove(ADDR);
        assert!(cache.read(ADDR, Duration::ZERO, Duration::ZERO).is_unknown());
    }

    #[test]
    fn blocked_read_gets_the_answer() {
        let (medium, l3, cache) = setup();
        // A device that answers reads on the group.
        let device = TGroup::open(l3.handle(), ADDR, false).unwrap();
        let responder = thread::spawn(move || {
            let request = device.get_timeout(Duration::from_secs(2)).unwrap();
            assert_eq!(request.data, [0x00, 0x00]);
            let mut answer = LData::new(Destination::Group(ADDR), vec![0x00, 0x45]);
            answer.source = IndividualAddress::new(1, 1, 30);
            medium.inject(Lpdu::Data(answer));
        });
        let entry = cache.read(ADDR, Duration::from_secs(2), Duration::ZERO);
        responder.join().unwrap();
        assert_eq!(entry.src, IndividualAddress::new(1, 1, 30));
        assert!(matches!(entry.value(), Some(Apdu::GroupValueResponse(_))));
    }

    #[test]
    fn unanswered_read_caches_unknown() {
        let (_medium, _l3, cache) = setup();
        let started = Instant::now();
        let entry = cache.read(ADDR, Duration::from_millis(150), Duration::ZERO);
        assert!(entry.is_unknown());
        let waited = started.elapsed();
        assert!(waited >= Duration::from_millis(150));
        assert!(waited < Duration::from_secs(2));
        // The unknown entry now answers without waiting.
        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_unknown());
    }

    #[test]
    fn max_age_forces_refresh() {
        let (medium, _l3, cache) = setup();
        medium.inject(write_from(IndividualAddress::new(1, 1, 9), 0));
        let deadline = Instant::now() + Duration::from_secs(2);
        while cache.entries().is_empty() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(60));
        let stale = cache.read(ADDR, Duration::ZERO, Duration::from_millis(20));
        assert!(stale.is_unknown());
        let cached = cache.read(ADDR, Duration::ZERO, Duration::ZERO);
        assert!(!cached.is_unknown());
    }

    #[test]
    fn stale_entry_turns_unknown_when_unanswered() {
        let (medium, _l3, cache) = setup();
        medium.inject(write_from(IndividualAddress::new(1, 1, 9), 1));
        let deadline = Instant::now() + Duration::from_secs(2);
        while cache.entries().is_empty() {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(60));

        let entry = cache.read(ADDR, Duration::from_millis(150), Duration::from_millis(20));
        assert!(entry.is_unknown());
        assert_eq!(entry.dst, ADDR);
        let entries = cache.entries();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].is_unknown());
    }

    #[test]
    fn disabled_cache_ignores_the_bus() {
        let (medium, _l3, cache) = setup();
        cache.disable();
        assert!(!cache.is_enabled());
        medium.inject(write_from(IndividualAddress::new(1, 1, 9), 1));
        let entry = cache.read(ADDR, Duration::from_secs(1), Duration::ZERO);
        assert_eq!(entry.dst, GroupAddress(0));
        assert!(entry.is_unknown());
    }
}
