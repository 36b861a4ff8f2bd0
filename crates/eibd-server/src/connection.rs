use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eibd_core::lpdu::{LData, Priority};
use eibd_core::{Destination, IndividualAddress, Tpdu};
use eibd_datalink::{DataLinkError, Flag, Flagpole, Mailbox, Worker};

use crate::layer3::{IndividualLock, LDataSink, Layer3Handle, SubscriptionId};
use crate::Layer3Error;

const FRAME: Flag = Flag::new(1);
const SEND: Flag = Flag::new(2);
const OUT_READY: Flag = Flag::new(1);

#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Idle time after which the connection is dropped.
    pub inactivity: Duration,
    pub retransmit: Duration,
    pub max_retries: u8,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            inactivity: Duration::from_secs(6),
            retransmit: Duration::from_secs(3),
            max_retries: 3,
        }
    }
}

struct Shared {
    incoming: Mailbox<LData>,
    outgoing: Mailbox<Vec<u8>>,
    delivered: Mailbox<Vec<u8>>,
    closed: AtomicBool,
    sendno: AtomicU8,
    recvno: AtomicU8,
}

impl Shared {
    fn closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Feeds frames from the peer into the connection loop.
struct PeerFeed(Arc<Shared>);

impl LDataSink for PeerFeed {
    fn deliver(&self, frame: LData) {
        self.0.incoming.push(frame);
    }

    fn on_medium_lost(&self) {
        self.0.incoming.pole().raise(Flag::STOP);
    }
}

/// Connection-oriented transport to one device (`T_Connection`).
///
/// A loop thread owns the protocol state; APDUs go through the send
/// queue and received ones come out of [`get`](TConnection::get). Once the
/// connection closes, reads return `None`.
pub struct TConnection {
    peer: IndividualAddress,
    shared: Arc<Shared>,
    worker: Option<Worker>,
}

impl TConnection {
    pub fn open(
        layer3: Layer3Handle,
        peer: IndividualAddress,
        config: ConnectionConfig,
    ) -> Result<Self, Layer3Error> {
        let pole = Arc::new(Flagpole::new());
        let shared = Arc::new(Shared {
            incoming: Mailbox::new(Arc::clone(&pole), FRAME),
            outgoing: Mailbox::new(Arc::clone(&pole), SEND),
            delivered: Mailbox::new(Arc::new(Flagpole::new()), OUT_READY),
            closed: AtomicBool::new(false),
            sendno: AtomicU8::new(0),
            recvno: AtomicU8::new(0),
        });
        let subscription = layer3.register_individual(
            Arc::new(PeerFeed(Arc::clone(&shared))),
            peer,
            IndividualAddress::UNSET,
            IndividualLock::Connection,
        )?;

        let mut session = Session {
            layer3,
            peer,
            subscription,
            config,
            shared: Arc::clone(&shared),
            state: State::Idle,
            sendno: 0,
            recvno: 0,
            idle_deadline: Instant::now(),
        };
        if let Err(e) = session.transmit(Tpdu::Connect, Priority::System) {
            session.layer3.deregister(subscription);
            return Err(e);
        }
        log::info!("connection to {peer} opened");
        let worker = Worker::spawn(format!("t-connection-{peer}"), pole, move |pole| {
            session.run(&pole)
        })
        .map_err(DataLinkError::from)?;
        Ok(Self {
            peer,
            shared,
            worker: Some(worker),
        })
    }

    pub fn peer(&self) -> IndividualAddress {
        self.peer
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed()
    }

    /// Queues an APDU for transmission.
    pub fn send(&self, apdu: Vec<u8>) -> Result<(), Layer3Error> {
        if self.shared.closed() {
            return Err(Layer3Error::ConnectionClosed);
        }
        self.shared.outgoing.push(apdu);
        Ok(())
    }

    /// Next received APDU; `None` once the connection is closed and drained.
    pub fn get(&self) -> Option<Vec<u8>> {
        self.shared.delivered.pop_wait(None)
    }

    pub fn get_timeout(&self, timeout: Duration) -> Option<Vec<u8>> {
        self.shared
            .delivered
            .pop_wait(Some(Instant::now() + timeout))
    }

    pub fn sendno(&self) -> u8 {
        self.shared.sendno.load(Ordering::SeqCst)
    }

    pub fn recvno(&self) -> u8 {
        self.shared.recvno.load(Ordering::SeqCst)
    }

    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
    }
}

impl Drop for TConnection {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Debug)]
enum State {
    Idle,
    AckWait {
        apdu: Vec<u8>,
        retries: u8,
        deadline: Instant,
    },
}

struct Session {
    layer3: Layer3Handle,
    peer: IndividualAddress,
    subscription: SubscriptionId,
    config: ConnectionConfig,
    shared: Arc<Shared>,
    state: State,
    sendno: u8,
    recvno: u8,
    idle_deadline: Instant,
}

impl Session {
    fn transmit(&self, tpdu: Tpdu, priority: Priority) -> Result<(), Layer3Error> {
        let mut frame = LData::new(Destination::Individual(self.peer), tpdu.to_bytes()?);
        frame.priority = priority;
        self.layer3.send(frame)
    }

    /// Sends or logs; returns `false` when the medium refused the frame.
    fn transmit_or_log(&self, tpdu: Tpdu) -> bool {
        match self.transmit(tpdu, Priority::Low) {
            Ok(()) => true,
            Err(e) => {
                log::warn!("connection to {}: send failed: {e}", self.peer);
                false
            }
        }
    }

    fn refresh(&mut self) {
        self.idle_deadline = Instant::now() + self.config.inactivity;
    }

    fn run(&mut self, pole: &Flagpole) {
        self.refresh();
        loop {
            let (flags, deadline): (&[Flag], Instant) = match &self.state {
                State::Idle => (&[FRAME, SEND], self.idle_deadline),
                State::AckWait { deadline, .. } => (&[FRAME], *deadline),
            };
            if pole.wait_until(flags, deadline).stopped() {
                break;
            }
            if !self.pump() {
                break;
            }
        }
        self.teardown();
    }

    /// One loop turn; `false` closes the connection.
    fn pump(&mut self) -> bool {
        while let Some(frame) = self.shared.incoming.pop() {
            if !self.on_frame(frame) {
                return false;
            }
        }
        let now = Instant::now();
        // Inactivity only counts while nothing awaits an ACK.
        if matches!(self.state, State::Idle) && now >= self.idle_deadline {
            log::info!("connection to {} timed out", self.peer);
            return false;
        }
        if let State::AckWait {
            apdu,
            retries,
            deadline,
        } = &mut self.state
        {
            if now >= *deadline {
                if *retries >= self.config.max_retries {
                    log::warn!("connection to {}: no ACK after {retries} retries", self.peer);
                    return false;
                }
                *retries += 1;
                *deadline = now + self.config.retransmit;
                let tpdu = Tpdu::DataConnected {
                    sequence: self.sendno,
                    apdu: apdu.clone(),
                };
                if !self.transmit_or_log(tpdu) {
                    return false;
                }
            }
            return true;
        }
        if let Some(apdu) = self.shared.outgoing.pop() {
            let tpdu = Tpdu::DataConnected {
                sequence: self.sendno,
                apdu: apdu.clone(),
            };
            if !self.transmit_or_log(tpdu) {
                return false;
            }
            self.state = State::AckWait {
                apdu,
                retries: 0,
                deadline: now + self.config.retransmit,
            };
            self.refresh();
        }
        true
    }

    fn on_frame(&mut self, frame: LData) -> bool {
        let tpdu = match Tpdu::decode(&frame.data) {
            Ok(tpdu) => tpdu,
            Err(e) => {
                log::debug!("connection to {}: undecodable TPDU: {e}", self.peer);
                return true;
            }
        };
        match tpdu {
            Tpdu::DataConnected { sequence, apdu } => {
                if sequence == self.recvno {
                    self.shared.delivered.push(apdu);
                    self.recvno = (self.recvno + 1) & 0x0f;
                    self.shared.recvno.store(self.recvno, Ordering::SeqCst);
                } else if sequence != (self.recvno + 15) & 0x0f {
                    log::warn!(
                        "connection to {}: sequence {sequence}, expected {}",
                        self.peer,
                        self.recvno
                    );
                    return false;
                }
                self.refresh();
                self.transmit_or_log(Tpdu::Ack(sequence))
            }
            Tpdu::Ack(sequence) => match self.state {
                State::AckWait { .. } if sequence == self.sendno => {
                    self.sendno = (self.sendno + 1) & 0x0f;
                    self.shared.sendno.store(self.sendno, Ordering::SeqCst);
                    self.state = State::Idle;
                    self.refresh();
                    true
                }
                _ => {
                    log::warn!("connection to {}: unexpected ACK {sequence}", self.peer);
                    false
                }
            },
            Tpdu::Nack(sequence) => {
                let max_retries = self.config.max_retries;
                let retransmit = self.config.retransmit;
                let State::AckWait {
                    apdu,
                    retries,
                    deadline,
                } = &mut self.state
                else {
                    log::warn!("connection to {}: unexpected NACK", self.peer);
                    return false;
                };
                if sequence != self.sendno || *retries >= max_retries {
                    log::warn!("connection to {}: NACK {sequence} rejected", self.peer);
                    return false;
                }
                *retries += 1;
                *deadline = Instant::now() + retransmit;
                let tpdu = Tpdu::DataConnected {
                    sequence,
                    apdu: apdu.clone(),
                };
                self.transmit_or_log(tpdu)
            }
            Tpdu::Disconnect => {
                log::info!("connection to {} closed by peer", self.peer);
                false
            }
            Tpdu::Connect => {
                log::info!("connection to {}: peer reconnected, closing", self.peer);
                false
            }
            other => {
                log::debug!("connection to {}: ignoring {other:?}", self.peer);
                true
            }
        }
    }

    fn teardown(&mut self) {
        if let Err(e) = self.transmit(Tpdu::Disconnect, Priority::Low) {
            log::debug!("connection to {}: disconnect not sent: {e}", self.peer);
        }
        self.layer3.deregister(self.subscription);
        self.state = State::Idle;
        self.shared.outgoing.clear();
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.delivered.pole().raise(Flag::STOP);
        log::info!("connection to {} closed", self.peer);
    }
}
