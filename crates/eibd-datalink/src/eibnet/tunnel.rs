use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eibd_core::lpdu::{LData, Lpdu};
use eibd_core::{CemiFrame, GroupAddress, IndividualAddress, MessageCode};

use crate::flagpole::{Flag, Flagpole};
use crate::mailbox::Mailbox;
use crate::mode::MonitorMode;
use crate::thread::Worker;
use crate::{DataLinkError, Layer2Interface};

use super::messages::{
    status, ChannelRequest, ChannelResponse, ConnectRequest, ConnectResponse, TunnelAck,
    TunnelRequest,
};
use super::packet::{EibnetPacket, ServiceType};
use super::socket::{source_address_for, EibnetSocket, Received, SourceFilter};

const SEND: Flag = Flag::new(1);
const NET: Flag = Flag::new(2);
const RECEIVED: Flag = Flag::new(1);
const SLICE: Duration = Duration::from_millis(50);

/// Timers and limits of a tunnel connection.
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    pub ack_timeout: Duration,
    pub send_attempts: u8,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub heartbeat_failures: u8,
    pub reconnect_interval: Duration,
    /// Local UDP port; 0 picks one.
    pub local_port: u16,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(1),
            send_attempts: 3,
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_timeout: Duration::from_secs(10),
            heartbeat_failures: 5,
            reconnect_interval: Duration::from_secs(10),
            local_port: 0,
        }
    }
}

#[derive(Debug)]
struct Shared {
    inbox: Mailbox<Lpdu>,
    outbox: Mailbox<LData>,
    from_net: Arc<Mailbox<Received>>,
    modes: MonitorMode,
    address: AtomicU16,
    connected: AtomicBool,
    channel: AtomicU8,
    in_flight: AtomicBool,
    stopped: AtomicBool,
}

/// EIBnet/IP tunneling client acting as a medium.
///
/// Connects to a gateway, keeps the connection alive with heartbeats and
/// reconnects after failures. Frames sent while disconnected wait in the
/// send queue.
#[derive(Debug)]
pub struct EibnetTunnel {
    shared: Arc<Shared>,
    socket: Option<Arc<EibnetSocket>>,
    worker: Option<Worker>,
}

impl EibnetTunnel {
    pub fn connect(gateway: SocketAddrV4, config: TunnelConfig) -> Result<Self, DataLinkError> {
        let pole = Arc::new(Flagpole::new());
        let from_net = Arc::new(Mailbox::new(Arc::clone(&pole), NET));
        let shared = Arc::new(Shared {
            inbox: Mailbox::new(Arc::new(Flagpole::new()), RECEIVED),
            outbox: Mailbox::new(Arc::clone(&pole), SEND),
            from_net: Arc::clone(&from_net),
            modes: MonitorMode::default(),
            address: AtomicU16::new(0),
            connected: AtomicBool::new(false),
            channel: AtomicU8::new(0),
            in_flight: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        });

        let control = SocketAddr::V4(gateway);
        let socket = Arc::new(EibnetSocket::bind(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.local_port)),
            SourceFilter::Peer(vec![control]),
            from_net,
        )?);
        let ip = source_address_for(*gateway.ip())?;
        let local = SocketAddrV4::new(ip, socket.local_addr()?.port());
        log::info!("tunnel to {gateway} from {local}");

        let mut session = TunnelLoop {
            shared: Arc::clone(&shared),
            socket: Arc::clone(&socket),
            control: gateway,
            local,
            config,
            link: Link::Disconnected {
                retry_at: Instant::now(),
            },
        };
        let worker = Worker::spawn(format!("tunnel-{gateway}"), pole, move |pole| {
            session.run(&pole)
        })?;
        Ok(Self {
            shared,
            socket: Some(socket),
            worker: Some(worker),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }

    /// Channel id of the current connection, if any.
    pub fn channel(&self) -> Option<u8> {
        self.is_connected()
            .then(|| self.shared.channel.load(Ordering::SeqCst))
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.socket = None;
        self.shared.stopped.store(true, Ordering::SeqCst);
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.inbox.pole().raise(Flag::STOP);
    }
}

impl Drop for EibnetTunnel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Layer2Interface for EibnetTunnel {
    fn open(&self) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn close(&self) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn send(&self, frame: LData) -> Result<(), DataLinkError> {
        if self.shared.stopped.load(Ordering::SeqCst) {
            return Err(DataLinkError::Stopped);
        }
        log::debug!("tunnel send {frame}");
        self.shared.outbox.push(frame);
        Ok(())
    }

    fn receive(&self, stop: &Flagpole) -> Option<Lpdu> {
        self.shared.inbox.pop_until_stopped(stop, SLICE)
    }

    fn enter_busmonitor(&self) -> Result<(), DataLinkError> {
        self.shared.modes.set_busmonitor(true);
        Ok(())
    }

    fn leave_busmonitor(&self) -> Result<(), DataLinkError> {
        self.shared.modes.set_busmonitor(false);
        Ok(())
    }

    fn open_vbusmonitor(&self) -> Result<(), DataLinkError> {
        self.shared.modes.set_vbusmonitor(true);
        Ok(())
    }

    fn close_vbusmonitor(&self) -> Result<(), DataLinkError> {
        self.shared.modes.set_vbusmonitor(false);
        Ok(())
    }

    fn add_address(&self, _addr: IndividualAddress) -> Result<(), DataLinkError> {
        Err(DataLinkError::Unsupported("individual address filter"))
    }

    fn remove_address(&self, _addr: IndividualAddress) -> Result<(), DataLinkError> {
        Err(DataLinkError::Unsupported("individual address filter"))
    }

    fn add_group_address(&self, _addr: GroupAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn remove_group_address(&self, _addr: GroupAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn default_address(&self) -> IndividualAddress {
        IndividualAddress(self.shared.address.load(Ordering::SeqCst))
    }

    fn connection_lost(&self) -> bool {
        self.shared.stopped.load(Ordering::SeqCst)
    }

    fn send_queue_empty(&self) -> bool {
        self.shared.outbox.is_empty() && !self.shared.in_flight.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
struct Pending {
    packet: EibnetPacket,
    sent_at: Instant,
    attempts: u8,
}

#[derive(Debug)]
struct Session {
    channel: u8,
    data: SocketAddr,
    sno: u8,
    rno: u8,
    pending: Option<Pending>,
    heartbeat_at: Instant,
    heartbeat_deadline: Option<Instant>,
    failures: u8,
}

#[derive(Debug)]
enum Link {
    Disconnected { retry_at: Instant },
    Connecting { deadline: Instant },
    Connected(Session),
}

struct TunnelLoop {
    shared: Arc<Shared>,
    socket: Arc<EibnetSocket>,
    control: SocketAddrV4,
    local: SocketAddrV4,
    config: TunnelConfig,
    link: Link,
}

impl TunnelLoop {
    fn run(&mut self, pole: &Flagpole) {
        loop {
            let can_send = matches!(&self.link, Link::Connected(s) if s.pending.is_none());
            let flags: &[Flag] = if can_send { &[SEND, NET] } else { &[NET] };
            let raised = pole.wait_until(flags, self.next_deadline());
            if raised.stopped() {
                break;
            }
            while let Some(received) = self.shared.from_net.pop() {
                self.on_packet(received);
            }
            self.on_timers(Instant::now());
            self.pump_send();
        }
        if let Link::Connected(session) = &self.link {
            self.send_disconnect(session.channel);
        }
        self.drop_pending();
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    fn next_deadline(&self) -> Instant {
        match &self.link {
            Link::Disconnected { retry_at } => *retry_at,
            Link::Connecting { deadline } => *deadline,
            Link::Connected(s) => {
                let mut next = s.heartbeat_deadline.unwrap_or(s.heartbeat_at);
                if let Some(p) = &s.pending {
                    next = next.min(p.sent_at + self.config.ack_timeout);
                }
                next
            }
        }
    }

    fn send(&self, packet: &EibnetPacket, to: SocketAddr) {
        if let Err(e) = self.socket.send_to(packet, to) {
            log::error!("tunnel send to {to} failed: {e}");
        }
    }

    fn send_connect(&mut self, now: Instant) {
        let request = ConnectRequest::tunnel(self.local, self.local);
        match request.to_packet() {
            Ok(packet) => self.send(&packet, SocketAddr::V4(self.control)),
            Err(e) => log::error!("cannot encode connect request: {e}"),
        }
        self.link = Link::Connecting {
            deadline: now + self.config.reconnect_interval,
        };
    }

    fn send_disconnect(&self, channel: u8) {
        let request = ChannelRequest {
            channel,
            control: self.local,
        };
        match request.to_packet(ServiceType::DisconnectRequest) {
            Ok(packet) => self.send(&packet, SocketAddr::V4(self.control)),
            Err(e) => log::error!("cannot encode disconnect request: {e}"),
        }
    }

    fn drop_pending(&mut self) {
        if let Link::Connected(s) = &mut self.link {
            s.pending = None;
        }
        self.shared.in_flight.store(false, Ordering::SeqCst);
    }

    /// Tears the connection down and schedules a reconnect at `retry_at`.
    fn reset(&mut self, retry_at: Instant) {
        self.drop_pending();
        self.link = Link::Disconnected { retry_at };
        self.shared.connected.store(false, Ordering::SeqCst);
    }

    fn on_packet(&mut self, received: Received) {
        let Received { packet, from } = received;
        match packet.service {
            ServiceType::ConnectionResponse => self.on_connect_response(&packet, from),
            ServiceType::ConnectionStateResponse => {
                let Ok(resp) = ChannelResponse::parse(&packet, ServiceType::ConnectionStateResponse)
                else {
                    log::debug!("malformed connection state response");
                    return;
                };
                if let Link::Connected(s) = &mut self.link {
                    if resp.channel == s.channel && resp.status == status::E_NO_ERROR {
                        s.failures = 0;
                        s.heartbeat_deadline = None;
                    } else {
                        log::warn!("heartbeat rejected with status {:#04x}", resp.status);
                    }
                }
            }
            ServiceType::TunnelRequest => self.on_tunnel_request(&packet),
            ServiceType::TunnelResponse => {
                let Ok(ack) = TunnelAck::parse(&packet) else {
                    log::debug!("malformed tunnel ack");
                    return;
                };
                if let Link::Connected(s) = &mut self.link {
                    if ack.channel == s.channel && ack.sequence == s.sno && s.pending.is_some() {
                        s.sno = s.sno.wrapping_add(1);
                        s.pending = None;
                        self.shared.in_flight.store(false, Ordering::SeqCst);
                    }
                }
            }
            ServiceType::DisconnectRequest => {
                let Ok(req) = ChannelRequest::parse(&packet, ServiceType::DisconnectRequest) else {
                    return;
                };
                let Link::Connected(s) = &self.link else {
                    return;
                };
                if req.channel != s.channel {
                    return;
                }
                let resp = ChannelResponse {
                    channel: req.channel,
                    status: status::E_NO_ERROR,
                };
                self.send(&resp.to_packet(ServiceType::DisconnectResponse), from);
                log::warn!("gateway closed channel {}", req.channel);
                self.reset(Instant::now() + self.config.reconnect_interval);
            }
            other => log::debug!("tunnel ignoring {other:?}"),
        }
    }

    fn on_connect_response(&mut self, packet: &EibnetPacket, from: SocketAddr) {
        if !matches!(self.link, Link::Connecting { .. }) {
            return;
        }
        let resp = match ConnectResponse::parse(packet) {
            Ok(resp) => resp,
            Err(e) => {
                log::warn!("malformed connect response: {e}");
                return;
            }
        };
        let now = Instant::now();
        if resp.status != status::E_NO_ERROR {
            log::warn!("gateway refused connection: status {:#04x}", resp.status);
            self.link = Link::Disconnected {
                retry_at: now + self.config.reconnect_interval,
            };
            return;
        }
        let data = if resp.data.ip().is_unspecified() || resp.data.port() == 0 {
            from
        } else {
            SocketAddr::V4(resp.data)
        };
        if let Some(addr) = resp.assigned_address() {
            self.shared.address.store(addr.raw(), Ordering::SeqCst);
        }
        self.socket.set_filter(SourceFilter::Peer(vec![
            SocketAddr::V4(self.control),
            data,
        ]));
        self.shared.channel.store(resp.channel, Ordering::SeqCst);
        self.shared.connected.store(true, Ordering::SeqCst);
        log::info!(
            "tunnel connected on channel {} as {}",
            resp.channel,
            IndividualAddress(self.shared.address.load(Ordering::SeqCst))
        );
        self.link = Link::Connected(Session {
            channel: resp.channel,
            data,
            sno: 0,
            rno: 0,
            pending: None,
            heartbeat_at: now + self.config.heartbeat_interval,
            heartbeat_deadline: None,
            failures: 0,
        });
    }

    fn on_tunnel_request(&mut self, packet: &EibnetPacket) {
        let Link::Connected(s) = &mut self.link else {
            return;
        };
        let req = match TunnelRequest::parse(packet) {
            Ok(req) => req,
            Err(e) => {
                log::debug!("malformed tunnel request: {e}");
                return;
            }
        };
        if req.channel != s.channel || req.sequence != s.rno {
            log::debug!(
                "dropping tunnel request channel {} seq {} (expected {})",
                req.channel,
                req.sequence,
                s.rno
            );
            return;
        }
        let ack = TunnelAck {
            channel: req.channel,
            sequence: req.sequence,
            status: status::E_NO_ERROR,
        };
        s.rno = s.rno.wrapping_add(1);
        let data = s.data;
        self.send(&ack.to_packet(), data);

        let frame = match CemiFrame::decode(&req.cemi) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("undecodable cEMI from gateway: {e}");
                return;
            }
        };
        match frame.code {
            MessageCode::DataInd => {
                log::debug!("tunnel recv {}", frame.data);
                for f in self.shared.modes.frames_for(frame.data, true) {
                    self.shared.inbox.push(f);
                }
            }
            MessageCode::DataCon => {}
            other => log::debug!("tunnel ignoring cEMI {other}"),
        }
    }

    fn on_timers(&mut self, now: Instant) {
        match &mut self.link {
            Link::Disconnected { retry_at } => {
                if now >= *retry_at {
                    self.send_connect(now);
                }
            }
            Link::Connecting { deadline } => {
                if now >= *deadline {
                    log::warn!("no connect response from {}", self.control);
                    self.send_connect(now);
                }
            }
            Link::Connected(s) => {
                let channel = s.channel;
                let data = s.data;
                let mut resend = None;
                let mut give_up = false;
                if let Some(p) = &mut s.pending {
                    if now >= p.sent_at + self.config.ack_timeout {
                        if p.attempts >= self.config.send_attempts {
                            log::warn!("tunnel request {} not acknowledged, dropping", s.sno);
                            give_up = true;
                        } else {
                            p.attempts += 1;
                            p.sent_at = now;
                            resend = Some(p.packet.clone());
                        }
                    }
                }
                let mut heartbeat = false;
                match s.heartbeat_deadline {
                    Some(deadline) if now >= deadline => {
                        s.failures += 1;
                        log::debug!("heartbeat {} unanswered", s.failures);
                        if s.failures >= self.config.heartbeat_failures {
                            log::warn!("gateway stopped answering heartbeats");
                            give_up = true;
                        } else {
                            heartbeat = true;
                        }
                    }
                    None if now >= s.heartbeat_at => heartbeat = true,
                    _ => {}
                }
                if heartbeat {
                    s.heartbeat_deadline = Some(now + self.config.heartbeat_timeout);
                    s.heartbeat_at = now + self.config.heartbeat_interval;
                }

                if give_up {
                    self.send_disconnect(channel);
                    self.reset(now + self.config.reconnect_interval);
                    return;
                }
                if let Some(packet) = resend {
                    self.send(&packet, data);
                }
                if heartbeat {
                    let request = ChannelRequest {
                        channel,
                        control: self.local,
                    };
                    match request.to_packet(ServiceType::ConnectionStateRequest) {
                        Ok(packet) => self.send(&packet, SocketAddr::V4(self.control)),
                        Err(e) => log::error!("cannot encode heartbeat: {e}"),
                    }
                }
            }
        }
    }

    fn pump_send(&mut self) {
        let Link::Connected(s) = &mut self.link else {
            return;
        };
        if s.pending.is_some() {
            return;
        }
        self.shared.in_flight.store(true, Ordering::SeqCst);
        let Some(frame) = self.shared.outbox.pop() else {
            self.shared.in_flight.store(false, Ordering::SeqCst);
            return;
        };
        let cemi = match CemiFrame::new(MessageCode::DataReq, frame).to_bytes() {
            Ok(cemi) => cemi,
            Err(e) => {
                log::warn!("cannot encode frame for tunnel: {e}");
                self.shared.in_flight.store(false, Ordering::SeqCst);
                return;
            }
        };
        let packet = TunnelRequest {
            channel: s.channel,
            sequence: s.sno,
            cemi,
        }
        .to_packet();
        let data = s.data;
        s.pending = Some(Pending {
            packet: packet.clone(),
            sent_at: Instant::now(),
            attempts: 1,
        });
        self.send(&packet, data);
    }
}
