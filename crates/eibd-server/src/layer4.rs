use std::sync::Arc;
use std::time::{Duration, Instant};

use eibd_core::lpdu::LData;
use eibd_core::{Destination, GroupAddress, IndividualAddress, Tpdu};
use eibd_datalink::{Flag, Flagpole, Mailbox};

use crate::layer3::{IndividualLock, LDataSink, Layer3Handle, SubscriptionId};
use crate::Layer3Error;

const READY: Flag = Flag::new(1);
/// Frames kept per socket before the oldest are dropped.
pub const QUEUE_DEPTH: usize = 256;

/// Broadcast APDU and its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BroadcastComm {
    pub data: Vec<u8>,
    pub source: IndividualAddress,
}

/// Group APDU received by a [`TGroup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupComm {
    pub data: Vec<u8>,
    pub source: IndividualAddress,
}

/// Group APDU with its destination, as seen by a [`GroupSocket`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupApduComm {
    pub data: Vec<u8>,
    pub source: IndividualAddress,
    pub dest: GroupAddress,
}

/// Raw transport unit exchanged through a [`TTpdu`]; `addr` is the peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpduComm {
    pub data: Vec<u8>,
    pub addr: IndividualAddress,
}

/// Queue fed by a Layer3 subscription through `map`.
struct Feed<T, F> {
    queue: Arc<Mailbox<T>>,
    map: F,
}

impl<T, F> LDataSink for Feed<T, F>
where
    T: Send,
    F: Fn(LData) -> Option<T> + Send + Sync,
{
    fn deliver(&self, frame: LData) {
        if let Some(item) = (self.map)(frame) {
            if !self.queue.push(item) {
                log::warn!("socket queue full, oldest frame dropped");
            }
        }
    }

    fn on_medium_lost(&self) {
        self.queue.pole().raise(Flag::STOP);
    }
}

/// APDU of an unnumbered data frame.
fn unnumbered(frame: &LData) -> Option<Vec<u8>> {
    match Tpdu::decode(&frame.data) {
        Ok(Tpdu::DataUnnumbered(apdu)) => Some(apdu),
        _ => None,
    }
}

fn data_frame(dest: Destination, apdu: Vec<u8>) -> Result<LData, Layer3Error> {
    Ok(LData::new(dest, Tpdu::DataUnnumbered(apdu).to_bytes()?))
}

/// Subscription plus receive queue shared by every connectionless socket.
/// Dropping it deregisters from Layer3.
struct Endpoint<T> {
    layer3: Layer3Handle,
    queue: Arc<Mailbox<T>>,
    subscription: Option<SubscriptionId>,
}

impl<T: Send + 'static> Endpoint<T> {
    fn write_only(layer3: Layer3Handle) -> Self {
        Self {
            layer3,
            queue: Arc::new(Mailbox::new(Arc::new(Flagpole::new()), READY)),
            subscription: None,
        }
    }

    fn open<F, R>(layer3: Layer3Handle, map: F, register: R) -> Result<Self, Layer3Error>
    where
        F: Fn(LData) -> Option<T> + Send + Sync + 'static,
        R: FnOnce(&Layer3Handle, Arc<dyn LDataSink>) -> Result<SubscriptionId, Layer3Error>,
    {
        let queue = Arc::new(Mailbox::bounded(
            Arc::new(Flagpole::new()),
            READY,
            QUEUE_DEPTH,
        ));
        let feed = Arc::new(Feed {
            queue: Arc::clone(&queue),
            map,
        });
        let subscription = register(&layer3, feed)?;
        Ok(Self {
            layer3,
            queue,
            subscription: Some(subscription),
        })
    }

    fn get(&self) -> Option<T> {
        self.queue.pop_wait(None)
    }

    fn get_timeout(&self, timeout: Duration) -> Option<T> {
        self.queue.pop_wait(Some(Instant::now() + timeout))
    }
}

impl<T> Drop for Endpoint<T> {
    fn drop(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.layer3.deregister(id);
        }
    }
}

/// Connectionless broadcast communication.
pub struct TBroadcast {
    endpoint: Endpoint<BroadcastComm>,
}

impl TBroadcast {
    pub fn open(layer3: Layer3Handle, write_only: bool) -> Result<Self, Layer3Error> {
        let endpoint = if write_only {
            Endpoint::write_only(layer3)
        } else {
            Endpoint::open(
                layer3,
                |frame: LData| {
                    unnumbered(&frame).map(|data| BroadcastComm {
                        data,
                        source: frame.source,
                    })
                },
                |l3, sink| l3.register_broadcast(sink),
            )?
        };
        Ok(Self { endpoint })
    }

    pub fn send(&self, apdu: Vec<u8>) -> Result<(), Layer3Error> {
        let frame = data_frame(Destination::Group(GroupAddress(0)), apdu)?;
        self.endpoint.layer3.send(frame)
    }

    /// Blocks until a frame arrives; `None` once the medium is gone.
    pub fn get(&self) -> Option<BroadcastComm> {
        self.endpoint.get()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Option<BroadcastComm> {
        self.endpoint.get_timeout(timeout)
    }
}

/// Connectionless communication on one group address.
pub struct TGroup {
    group: GroupAddress,
    endpoint: Endpoint<GroupComm>,
}

impl TGroup {
    pub fn open(
        layer3: Layer3Handle,
        group: GroupAddress,
        write_only: bool,
    ) -> Result<Self, Layer3Error> {
        let endpoint = if write_only {
            Endpoint::write_only(layer3)
        } else {
            Endpoint::open(
                layer3,
                |frame: LData| {
                    unnumbered(&frame).map(|data| GroupComm {
                        data,
                        source: frame.source,
                    })
                },
                |l3, sink| l3.register_group(sink, group),
            )?
        };
        Ok(Self { group, endpoint })
    }

    pub fn group(&self) -> GroupAddress {
        self.group
    }

    pub fn send(&self, apdu: Vec<u8>) -> Result<(), Layer3Error> {
        let frame = data_frame(Destination::Group(self.group), apdu)?;
        self.endpoint.layer3.send(frame)
    }

    pub fn get(&self) -> Option<GroupComm> {
        self.endpoint.get()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Option<GroupComm> {
        self.endpoint.get_timeout(timeout)
    }
}

/// Connectionless point-to-point communication with one device.
pub struct TIndividual {
    peer: IndividualAddress,
    endpoint: Endpoint<Vec<u8>>,
}

impl TIndividual {
    pub fn open(
        layer3: Layer3Handle,
        peer: IndividualAddress,
        write_only: bool,
    ) -> Result<Self, Layer3Error> {
        let endpoint = if write_only {
            Endpoint::write_only(layer3)
        } else {
            Endpoint::open(
                layer3,
                |frame: LData| unnumbered(&frame),
                |l3, sink| {
                    l3.register_individual(sink, peer, IndividualAddress::UNSET, IndividualLock::None)
                },
            )?
        };
        Ok(Self { peer, endpoint })
    }

    pub fn peer(&self) -> IndividualAddress {
        self.peer
    }

    pub fn send(&self, apdu: Vec<u8>) -> Result<(), Layer3Error> {
        let frame = data_frame(Destination::Individual(self.peer), apdu)?;
        self.endpoint.layer3.send(frame)
    }

    pub fn get(&self) -> Option<Vec<u8>> {
        self.endpoint.get()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.endpoint.get_timeout(timeout)
    }
}

/// Raw transport access: every individual frame addressed to `local`
/// (0 for this device), from any sender.
pub struct TTpdu {
    endpoint: Endpoint<TpduComm>,
}

impl TTpdu {
    pub fn open(layer3: Layer3Handle, local: IndividualAddress) -> Result<Self, Layer3Error> {
        let endpoint = Endpoint::open(
            layer3,
            |frame: LData| {
                Some(TpduComm {
                    data: frame.data,
                    addr: frame.source,
                })
            },
            |l3, sink| l3.register_individual(sink, IndividualAddress::UNSET, local, IndividualLock::None),
        )?;
        Ok(Self { endpoint })
    }

    /// Sends raw TPDU bytes to `tpdu.addr`.
    pub fn send(&self, tpdu: TpduComm) -> Result<(), Layer3Error> {
        let frame = LData::new(Destination::Individual(tpdu.addr), tpdu.data);
        self.endpoint.layer3.send(frame)
    }

    pub fn get(&self) -> Option<TpduComm> {
        self.endpoint.get()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Option<TpduComm> {
        self.endpoint.get_timeout(timeout)
    }
}

/// Every group frame, with its destination.
pub struct GroupSocket {
    endpoint: Endpoint<GroupApduComm>,
}

impl GroupSocket {
    pub fn open(layer3: Layer3Handle, write_only: bool) -> Result<Self, Layer3Error> {
        let endpoint = if write_only {
            Endpoint::write_only(layer3)
        } else {
            Endpoint::open(
                layer3,
                |frame: LData| {
                    let Destination::Group(dest) = frame.destination else {
                        return None;
                    };
                    unnumbered(&frame).map(|data| GroupApduComm {
                        data,
                        source: frame.source,
                        dest,
                    })
                },
                |l3, sink| l3.register_group(sink, GroupAddress(0)),
            )?
        };
        Ok(Self { endpoint })
    }

    pub fn send(&self, dest: GroupAddress, apdu: Vec<u8>) -> Result<(), Layer3Error> {
        let frame = data_frame(Destination::Group(dest), apdu)?;
        self.endpoint.layer3.send(frame)
    }

    pub fn get(&self) -> Option<GroupApduComm> {
        self.endpoint.get()
    }

    pub fn get_timeout(&self, timeout: Duration) -> Option<GroupApduComm> {
        self.endpoint.get_timeout(timeout)
    }
}
