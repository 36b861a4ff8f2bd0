use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use eibd_core::lpdu::LData;
use eibd_core::{CemiFrame, GroupAddress, IndividualAddress, MessageCode};
use eibd_datalink::eibnet::messages::{
    status, ChannelRequest, ChannelResponse, ConnectRequest, ConnectResponse, DescriptionResponse,
    DeviceInfo, EndpointRequest, SearchResponse, ServiceFamily, TunnelAck, TunnelRequest,
    FAMILY_CORE, FAMILY_ROUTING, FAMILY_TUNNELING, TUNNEL_CONNECTION,
};
use eibd_datalink::eibnet::socket::{source_address_for, v4};
use eibd_datalink::{
    EibnetPacket, EibnetSocket, Flag, Flagpole, Mailbox, Received, ServiceType, SourceFilter,
    Worker,
};

use crate::layer3::{IndividualLock, LDataSink, Layer3Handle, SubscriptionId};
use crate::ServerError;

const NET: Flag = Flag::new(1);
const BUS: Flag = Flag::new(2);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub multicast: Ipv4Addr,
    /// UDP port served; 0 picks one.
    pub port: u16,
    pub tunnel: bool,
    pub route: bool,
    pub discover: bool,
    /// Friendly name in search and description responses.
    pub name: String,
    /// A channel without activity for this long is dropped.
    pub channel_timeout: Duration,
    pub send_retry: Duration,
    pub send_attempts: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            multicast: Ipv4Addr::new(224, 0, 23, 12),
            port: 3671,
            tunnel: false,
            route: false,
            discover: false,
            name: "eibd".to_owned(),
            channel_timeout: Duration::from_secs(120),
            send_retry: Duration::from_secs(1),
            send_attempts: 10,
        }
    }
}

struct BusFeed(Arc<Mailbox<LData>>);

impl LDataSink for BusFeed {
    fn deliver(&self, frame: LData) {
        self.0.push(frame);
    }

    fn on_medium_lost(&self) {
        self.0.pole().raise(Flag::STOP);
    }
}

/// EIBnet/IP server bridging UDP to Layer3.
///
/// Depending on its configuration it answers discovery, routes `L_Data`
/// as multicast routing indications and serves tunneling clients. One
/// loop thread owns the channel table.
pub struct EibnetServer {
    layer3: Layer3Handle,
    subscriptions: Vec<SubscriptionId>,
    local: SocketAddr,
    channels: Arc<AtomicUsize>,
    socket: Option<Arc<EibnetSocket>>,
    worker: Option<Worker>,
}

impl EibnetServer {
    pub fn start(layer3: Layer3Handle, config: ServerConfig) -> Result<Self, ServerError> {
        let pole = Arc::new(Flagpole::new());
        let from_net = Arc::new(Mailbox::new(Arc::clone(&pole), NET));
        let from_bus = Arc::new(Mailbox::new(Arc::clone(&pole), BUS));

        let socket = Arc::new(EibnetSocket::bind(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port)),
            SourceFilter::All,
            Arc::clone(&from_net),
        )?);
        let port = socket.local_addr()?.port();
        if config.multicast.is_multicast() {
            if let Err(e) = socket.join_multicast(config.multicast) {
                log::warn!("cannot join {}: {e}", config.multicast);
            }
        }
        let own = SocketAddr::from((source_address_for(config.multicast)?, port));
        socket.set_filter(SourceFilter::AllButSelf(own));

        let mut subscriptions = Vec::new();
        if config.route || config.tunnel {
            let feed: Arc<dyn LDataSink> = Arc::new(BusFeed(Arc::clone(&from_bus)));
            let registered = layer3
                .register_broadcast(Arc::clone(&feed))
                .and_then(|id| {
                    subscriptions.push(id);
                    layer3.register_group(Arc::clone(&feed), GroupAddress(0))
                })
                .and_then(|id| {
                    subscriptions.push(id);
                    layer3.register_individual(
                        feed,
                        IndividualAddress::UNSET,
                        IndividualAddress::UNSET,
                        IndividualLock::None,
                    )
                });
            match registered {
                Ok(id) => subscriptions.push(id),
                Err(e) => {
                    for id in subscriptions {
                        layer3.deregister(id);
                    }
                    return Err(e.into());
                }
            }
        }

        log::info!(
            "EIBnet/IP server on port {port} (tunnel {}, route {}, discover {})",
            config.tunnel,
            config.route,
            config.discover
        );
        let channels = Arc::new(AtomicUsize::new(0));
        let mut server = ServerLoop {
            layer3: layer3.clone(),
            socket: Arc::clone(&socket),
            from_net,
            from_bus,
            group: SocketAddr::from((config.multicast, port)),
            port,
            config,
            table: Vec::new(),
            count: Arc::clone(&channels),
        };
        let worker = Worker::spawn(format!("eibnet-server-{port}"), pole, move |pole| {
            server.run(&pole)
        })?;
        Ok(Self {
            layer3,
            subscriptions,
            local: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
            channels,
            socket: Some(socket),
            worker: Some(worker),
        })
    }

    /// Loopback address of the served port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }

    /// Number of open tunnel channels.
    pub fn channel_count(&self) -> usize {
        self.channels.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.layer3.deregister(id);
        }
        if let Some(worker) = self.worker.take() {
            worker.stop();
        }
        self.socket = None;
    }
}

impl Drop for EibnetServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Channel {
    id: u8,
    control: SocketAddr,
    data: SocketAddr,
    sno: u8,
    rno: u8,
    /// cEMI frames waiting for delivery; the front one is in flight.
    out: VecDeque<Vec<u8>>,
    /// Transmissions of the front frame so far; 0 when idle.
    attempts: u32,
    sent_at: Instant,
    expires: Instant,
}

struct ServerLoop {
    layer3: Layer3Handle,
    socket: Arc<EibnetSocket>,
    from_net: Arc<Mailbox<Received>>,
    from_bus: Arc<Mailbox<LData>>,
    group: SocketAddr,
    port: u16,
    config: ServerConfig,
    table: Vec<Channel>,
    count: Arc<AtomicUsize>,
}

/// Where to answer: the endpoint named in the request, or the sender when
/// the request asks for that (route-back HPAI `0.0.0.0:0`).
fn reply_to(hpai: SocketAddrV4, from: SocketAddr) -> SocketAddr {
    if hpai.ip().is_unspecified() || hpai.port() == 0 {
        from
    } else {
        SocketAddr::V4(hpai)
    }
}

impl ServerLoop {
    fn run(&mut self, pole: &Flagpole) {
        loop {
            let raised = pole.wait_until(&[NET, BUS], self.next_deadline());
            if raised.stopped() {
                break;
            }
            while let Some(received) = self.from_net.pop() {
                self.on_packet(received);
            }
            while let Some(frame) = self.from_bus.pop() {
                self.on_bus(frame);
            }
            let now = Instant::now();
            self.expire(now);
            self.pump(now);
        }
        for channel in std::mem::take(&mut self.table) {
            self.send_disconnect(&channel);
        }
        self.count.store(0, Ordering::SeqCst);
    }

    fn next_deadline(&self) -> Instant {
        let mut next = Instant::now() + self.config.channel_timeout;
        for c in &self.table {
            next = next.min(c.expires);
            if c.attempts > 0 {
                next = next.min(c.sent_at + self.config.send_retry);
            }
        }
        next
    }

    fn send(&self, packet: &EibnetPacket, to: SocketAddr) {
        if let Err(e) = self.socket.send_to(packet, to) {
            log::error!("send to {to} failed: {e}");
        }
    }

    /// Our address as seen from `peer`, on the served port.
    fn local_for(&self, peer: SocketAddr) -> Option<SocketAddrV4> {
        let ip = *v4(peer)?.ip();
        match source_address_for(ip) {
            Ok(local) => Some(SocketAddrV4::new(local, self.port)),
            Err(e) => {
                log::warn!("no route to {peer}: {e}");
                None
            }
        }
    }

    fn position(&self, id: u8) -> Option<usize> {
        self.table.iter().position(|c| c.id == id)
    }

    fn publish_count(&self) {
        self.count.store(self.table.len(), Ordering::SeqCst);
    }

    fn on_packet(&mut self, received: Received) {
        let Received { packet, from } = received;
        log::trace!("server recv {:?} from {from}: {:02x?}", packet.service, packet.data);
        match packet.service {
            ServiceType::SearchRequest if self.config.discover => self.on_search(&packet, from),
            ServiceType::DescriptionRequest if self.config.discover => {
                self.on_description(&packet, from)
            }
            ServiceType::RoutingIndication if self.config.route => self.on_routing(&packet),
            ServiceType::ConnectionRequest if self.config.tunnel => {
                self.on_connect(&packet, from)
            }
            ServiceType::ConnectionStateRequest if self.config.tunnel => {
                self.on_connection_state(&packet, from)
            }
            ServiceType::DisconnectRequest if self.config.tunnel => {
                self.on_disconnect(&packet, from)
            }
            ServiceType::TunnelRequest if self.config.tunnel => self.on_tunnel_request(&packet),
            ServiceType::TunnelResponse if self.config.tunnel => self.on_tunnel_ack(&packet),
            other => log::debug!("server ignoring {other:?} from {from}"),
        }
    }

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            multicast: self.config.multicast,
            name: self.config.name.clone(),
            ..DeviceInfo::default()
        }
    }

    fn services(&self) -> Vec<ServiceFamily> {
        [
            (FAMILY_CORE, self.config.discover),
            (FAMILY_TUNNELING, self.config.tunnel),
            (FAMILY_ROUTING, self.config.route),
        ]
        .into_iter()
        .filter(|(_, enabled)| *enabled)
        .map(|(family, _)| ServiceFamily { family, version: 1 })
        .collect()
    }

    fn on_search(&self, packet: &EibnetPacket, from: SocketAddr) {
        let Ok(req) = EndpointRequest::parse(packet, ServiceType::SearchRequest) else {
            log::debug!("malformed search request from {from}");
            return;
        };
        let to = reply_to(req.endpoint, from);
        let Some(control) = self.local_for(to) else {
            return;
        };
        log::debug!("search from {to}");
        let resp = SearchResponse {
            control,
            device: self.device_info(),
            services: self.services(),
        };
        match resp.to_packet() {
            Ok(p) => self.send(&p, to),
            Err(e) => log::error!("cannot encode search response: {e}"),
        }
    }

    fn on_description(&self, packet: &EibnetPacket, from: SocketAddr) {
        let Ok(req) = EndpointRequest::parse(packet, ServiceType::DescriptionRequest) else {
            log::debug!("malformed description request from {from}");
            return;
        };
        let to = reply_to(req.endpoint, from);
        log::debug!("description for {to}");
        let resp = DescriptionResponse {
            device: self.device_info(),
            services: self.services(),
            optional: Vec::new(),
        };
        match resp.to_packet() {
            Ok(p) => self.send(&p, to),
            Err(e) => log::error!("cannot encode description response: {e}"),
        }
    }

    fn on_routing(&self, packet: &EibnetPacket) {
        if packet.data.len() < 2 || packet.data[0] != MessageCode::DataInd.to_u8() {
            return;
        }
        match CemiFrame::decode(&packet.data) {
            Ok(frame) => {
                log::debug!("route recv {}", frame.data);
                if let Err(e) = self.layer3.send(frame.data) {
                    log::error!("cannot forward routed frame: {e}");
                }
            }
            Err(e) => log::debug!("undecodable routing indication: {e}"),
        }
    }

    fn free_channel_id(&self) -> Option<u8> {
        (1..=u8::MAX).find(|id| self.position(*id).is_none())
    }

    fn on_connect(&mut self, packet: &EibnetPacket, from: SocketAddr) {
        let req = match ConnectRequest::parse(packet) {
            Ok(req) => req,
            Err(e) => {
                log::debug!("malformed connect request from {from}: {e}");
                return;
            }
        };
        let control = reply_to(req.control, from);
        let Some(data_endpoint) = self.local_for(control) else {
            return;
        };
        let mut resp = ConnectResponse {
            channel: 0,
            status: status::E_CONNECTION_TYPE,
            data: data_endpoint,
            crd: vec![TUNNEL_CONNECTION, 0x00, 0x00],
        };
        if req.is_link_layer_tunnel() {
            match self.free_channel_id() {
                Some(id) => {
                    let now = Instant::now();
                    self.table.push(Channel {
                        id,
                        control,
                        data: reply_to(req.data, from),
                        sno: 0,
                        rno: 0,
                        out: VecDeque::new(),
                        attempts: 0,
                        sent_at: now,
                        expires: now + self.config.channel_timeout,
                    });
                    self.publish_count();
                    log::info!("tunnel channel {id} opened for {control}");
                    resp.channel = id;
                    resp.status = status::E_NO_ERROR;
                }
                None => {
                    log::warn!("no free tunnel channel for {control}");
                    resp.status = status::E_NO_MORE_CONNECTIONS;
                }
            }
        } else {
            log::debug!("unsupported connection type {:02x?} from {control}", req.cri);
        }
        match resp.to_packet() {
            Ok(p) => self.send(&p, control),
            Err(e) => log::error!("cannot encode connect response: {e}"),
        }
    }

    fn on_connection_state(&mut self, packet: &EibnetPacket, from: SocketAddr) {
        let Ok(req) = ChannelRequest::parse(packet, ServiceType::ConnectionStateRequest) else {
            return;
        };
        let timeout = self.config.channel_timeout;
        let status = match self.position(req.channel) {
            Some(pos) => {
                self.table[pos].expires = Instant::now() + timeout;
                status::E_NO_ERROR
            }
            None => status::E_CONNECTION_ID,
        };
        let resp = ChannelResponse {
            channel: req.channel,
            status,
        };
        self.send(
            &resp.to_packet(ServiceType::ConnectionStateResponse),
            reply_to(req.control, from),
        );
    }

    fn on_disconnect(&mut self, packet: &EibnetPacket, from: SocketAddr) {
        let Ok(req) = ChannelRequest::parse(packet, ServiceType::DisconnectRequest) else {
            return;
        };
        let status = match self.position(req.channel) {
            Some(pos) => {
                self.table.remove(pos);
                self.publish_count();
                log::info!("tunnel channel {} closed by client", req.channel);
                status::E_NO_ERROR
            }
            None => status::E_CONNECTION_ID,
        };
        let resp = ChannelResponse {
            channel: req.channel,
            status,
        };
        self.send(
            &resp.to_packet(ServiceType::DisconnectResponse),
            reply_to(req.control, from),
        );
    }

    fn on_tunnel_request(&mut self, packet: &EibnetPacket) {
        let req = match TunnelRequest::parse(packet) {
            Ok(req) => req,
            Err(e) => {
                log::debug!("malformed tunnel request: {e}");
                return;
            }
        };
        let Some(pos) = self.position(req.channel) else {
            log::debug!("tunnel request for unknown channel {}", req.channel);
            return;
        };
        let (rno, data) = (self.table[pos].rno, self.table[pos].data);
        let mut ack = TunnelAck {
            channel: req.channel,
            sequence: req.sequence,
            status: status::E_NO_ERROR,
        };
        if req.sequence.wrapping_add(1) == rno {
            // Our previous ACK got lost.
            self.send(&ack.to_packet(), data);
            return;
        }
        if req.sequence != rno {
            log::debug!("wrong sequence {} (expected {rno})", req.sequence);
            return;
        }
        match CemiFrame::decode(&req.cemi) {
            Ok(frame) => {
                log::debug!("tunnel {} recv {}", req.channel, frame.data);
                if frame.code == MessageCode::DataReq {
                    match CemiFrame::new(MessageCode::DataCon, frame.data.clone()).to_bytes() {
                        Ok(con) => self.table[pos].out.push_back(con),
                        Err(e) => log::error!("cannot encode confirmation: {e}"),
                    }
                }
                if matches!(frame.code, MessageCode::DataReq | MessageCode::DataInd) {
                    if let Err(e) = self.layer3.send(frame.data) {
                        log::error!("cannot forward tunnelled frame: {e}");
                    }
                }
            }
            Err(e) => {
                log::debug!("undecodable cEMI on channel {}: {e}", req.channel);
                ack.status = status::E_TUNNELLING_LAYER;
            }
        }
        let channel = &mut self.table[pos];
        channel.rno = channel.rno.wrapping_add(1);
        channel.expires = Instant::now() + self.config.channel_timeout;
        self.send(&ack.to_packet(), data);
    }

    fn on_tunnel_ack(&mut self, packet: &EibnetPacket) {
        let Ok(ack) = TunnelAck::parse(packet) else {
            log::debug!("malformed tunnel ack");
            return;
        };
        let Some(pos) = self.position(ack.channel) else {
            return;
        };
        let channel = &mut self.table[pos];
        if ack.sequence != channel.sno {
            log::debug!("wrong sequence {} (expected {})", ack.sequence, channel.sno);
            return;
        }
        if ack.status != status::E_NO_ERROR {
            log::debug!("tunnel ack with status {:#04x}", ack.status);
            return;
        }
        if channel.attempts == 0 {
            log::debug!("unexpected tunnel ack on channel {}", channel.id);
            return;
        }
        channel.sno = channel.sno.wrapping_add(1);
        channel.attempts = 0;
        channel.out.pop_front();
    }

    fn on_bus(&mut self, frame: LData) {
        let cemi = match CemiFrame::new(MessageCode::DataInd, frame).to_bytes() {
            Ok(cemi) => cemi,
            Err(e) => {
                log::error!("cannot encode bus frame: {e}");
                return;
            }
        };
        if self.config.route {
            let packet = EibnetPacket::new(ServiceType::RoutingIndication, cemi.clone());
            self.send(&packet, self.group);
        }
        for channel in &mut self.table {
            channel.out.push_back(cemi.clone());
        }
    }

    fn expire(&mut self, now: Instant) {
        let before = self.table.len();
        self.table.retain(|c| {
            let alive = now < c.expires;
            if !alive {
                log::warn!("tunnel channel {} timed out", c.id);
            }
            alive
        });
        if self.table.len() != before {
            self.publish_count();
        }
    }

    fn pump(&mut self, now: Instant) {
        let retry = self.config.send_retry;
        let limit = self.config.send_attempts;
        let mut outgoing = Vec::new();
        for channel in &mut self.table {
            let due = if channel.attempts > 0 {
                now >= channel.sent_at + retry
            } else {
                !channel.out.is_empty()
            };
            if !due {
                continue;
            }
            channel.attempts += 1;
            if channel.attempts > limit {
                log::warn!("channel {} dropping unacknowledged frame", channel.id);
                channel.out.pop_front();
                channel.attempts = 0;
                continue;
            }
            let Some(cemi) = channel.out.front() else {
                channel.attempts = 0;
                continue;
            };
            channel.sent_at = now;
            let req = TunnelRequest {
                channel: channel.id,
                sequence: channel.sno,
                cemi: cemi.clone(),
            };
            outgoing.push((req.to_packet(), channel.data));
        }
        for (packet, to) in outgoing {
            self.send(&packet, to);
        }
    }

    fn send_disconnect(&self, channel: &Channel) {
        let Some(control) = self.local_for(channel.control) else {
            return;
        };
        let req = ChannelRequest {
            channel: channel.id,
            control,
        };
        match req.to_packet(ServiceType::DisconnectRequest) {
            Ok(p) => self.send(&p, channel.control),
            Err(e) => log::error!("cannot encode disconnect request: {e}"),
        }
    }
}
