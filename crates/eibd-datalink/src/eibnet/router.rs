use std::collections::VecDeque;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use eibd_core::lpdu::{LData, Lpdu};
use eibd_core::{CemiFrame, GroupAddress, IndividualAddress, MessageCode};

use crate::flagpole::{Flag, Flagpole};
use crate::mailbox::Mailbox;
use crate::mode::MonitorMode;
use crate::{DataLinkError, Layer2Interface};

use super::packet::{EibnetPacket, ServiceType};
use super::socket::{source_address_for, EibnetSocket, Received, SourceFilter};

const NET: Flag = Flag::new(1);
const SLICE: Duration = Duration::from_millis(50);

pub const DEFAULT_MULTICAST: Ipv4Addr = Ipv4Addr::new(224, 0, 23, 12);
pub const DEFAULT_PORT: u16 = 3671;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Routing multicast group (or a unicast peer).
    pub multicast: Ipv4Addr,
    /// Port routing indications are sent to.
    pub port: u16,
    /// Port bound locally; usually the same as `port`.
    pub listen_port: u16,
    pub address: IndividualAddress,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            multicast: DEFAULT_MULTICAST,
            port: DEFAULT_PORT,
            listen_port: DEFAULT_PORT,
            address: IndividualAddress::new(0, 0, 1),
        }
    }
}

/// EIBnet/IP routing medium: `L_Data` frames travel as multicast
/// `ROUTING_INDICATION`s.
#[derive(Debug)]
pub struct EibnetRouter {
    socket: Option<EibnetSocket>,
    target: SocketAddr,
    address: IndividualAddress,
    from_net: Arc<Mailbox<Received>>,
    pending: Mutex<VecDeque<Lpdu>>,
    modes: MonitorMode,
    stopped: AtomicBool,
}

impl EibnetRouter {
    pub fn bind(config: RouterConfig) -> Result<Self, DataLinkError> {
        let from_net = Arc::new(Mailbox::new(Arc::new(Flagpole::new()), NET));
        let socket = EibnetSocket::bind(
            SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.listen_port)),
            SourceFilter::All,
            Arc::clone(&from_net),
        )?;
        if config.multicast.is_multicast() {
            socket.join_multicast(config.multicast)?;
        }
        let own = SocketAddr::V4(SocketAddrV4::new(
            source_address_for(config.multicast)?,
            socket.local_addr()?.port(),
        ));
        socket.set_filter(SourceFilter::AllButSelf(own));
        log::info!(
            "routing to {}:{} as {}",
            config.multicast,
            config.port,
            config.address
        );
        Ok(Self {
            socket: Some(socket),
            target: SocketAddr::V4(SocketAddrV4::new(config.multicast, config.port)),
            address: config.address,
            from_net,
            pending: Mutex::new(VecDeque::new()),
            modes: MonitorMode::default(),
            stopped: AtomicBool::new(false),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DataLinkError> {
        self.socket
            .as_ref()
            .ok_or(DataLinkError::Stopped)?
            .local_addr()
    }

    pub fn stop(&mut self) {
        self.stopped.store(true, Ordering::SeqCst);
        if let Some(socket) = self.socket.take() {
            socket.stop();
        }
        self.from_net.pole().raise(Flag::STOP);
    }

    fn convert(&self, received: Received) -> Vec<Lpdu> {
        let Received { packet, from } = received;
        if packet.service != ServiceType::RoutingIndication
            || packet.data.first() != Some(&MessageCode::DataInd.to_u8())
        {
            log::debug!("router ignoring {:?} from {from}", packet.service);
            return Vec::new();
        }
        match CemiFrame::decode(&packet.data) {
            Ok(frame) => {
                log::debug!("router recv {}", frame.data);
                self.modes.frames_for(frame.data, false)
            }
            Err(e) => {
                log::warn!("undecodable routing indication from {from}: {e}");
                Vec::new()
            }
        }
    }
}

impl Drop for EibnetRouter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Layer2Interface for EibnetRouter {
    fn open(&self) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn close(&self) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn send(&self, frame: LData) -> Result<(), DataLinkError> {
        let socket = self.socket.as_ref().ok_or(DataLinkError::Stopped)?;
        log::debug!("router send {frame}");
        let cemi = CemiFrame::new(MessageCode::DataInd, frame).to_bytes()?;
        socket.send_to(
            &EibnetPacket::new(ServiceType::RoutingIndication, cemi),
            self.target,
        )
    }

    fn receive(&self, stop: &Flagpole) -> Option<Lpdu> {
        loop {
            if let Some(frame) = self
                .pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .pop_front()
            {
                return Some(frame);
            }
            let received = self.from_net.pop_until_stopped(stop, SLICE)?;
            let frames = self.convert(received);
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .extend(frames);
        }
    }

    fn enter_busmonitor(&self) -> Result<(), DataLinkError> {
        self.modes.set_busmonitor(true);
        Ok(())
    }

    fn leave_busmonitor(&self) -> Result<(), DataLinkError> {
        self.modes.set_busmonitor(false);
        Ok(())
    }

    fn open_vbusmonitor(&self) -> Result<(), DataLinkError> {
        self.modes.set_vbusmonitor(true);
        Ok(())
    }

    fn close_vbusmonitor(&self) -> Result<(), DataLinkError> {
        self.modes.set_vbusmonitor(false);
        Ok(())
    }

    fn add_address(&self, _addr: IndividualAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn remove_address(&self, _addr: IndividualAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn add_group_address(&self, _addr: GroupAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn remove_group_address(&self, _addr: GroupAddress) -> Result<(), DataLinkError> {
        Ok(())
    }

    fn default_address(&self) -> IndividualAddress {
        self.address
    }

    fn connection_lost(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn send_queue_empty(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eibd_core::Destination;
    use std::net::UdpSocket;

    fn peer_and_router() -> (UdpSocket, EibnetRouter) {
        let peer = UdpSocket::bind("127.0.0.1:0").unwrap();
        peer.set_read_timeout(Some(Duration::from_secs(3))).unwrap();
        let config = RouterConfig {
            multicast: Ipv4Addr::LOCALHOST,
            port: peer.local_addr().unwrap().port(),
            listen_port: 0,
            address: IndividualAddress::new(1, 1, 200),
        };
        (peer, EibnetRouter::bind(config).unwrap())
    }

    fn frame() -> LData {
        let mut l = LData::new(Destination::Group(GroupAddress::new(2, 0, 1)), vec![0x00, 0x80]);
        l.source = IndividualAddress::new(1, 1, 200);
        l
    }

    #[test]
    fn sent_frames_become_routing_indications() {
        let (peer, router) = peer_and_router();
        router.send(frame()).unwrap();
        let mut buf = [0u8; 512];
        let (n, _) = peer.recv_from(&mut buf).unwrap();
        let packet = EibnetPacket::from_bytes(&buf[..n]).unwrap();
        assert_eq!(packet.service, ServiceType::RoutingIndication);
        let cemi = CemiFrame::decode(&packet.data).unwrap();
        assert_eq!(cemi.code, MessageCode::DataInd);
        assert_eq!(cemi.data, frame());
    }

    #[test]
    fn received_indications_are_delivered() {
        let (peer, router) = peer_and_router();
        router.open_vbusmonitor().unwrap();
        let to = SocketAddr::from((Ipv4Addr::LOCALHOST, router.local_addr().unwrap().port()));
        let confirm = CemiFrame::new(MessageCode::DataCon, frame()).to_bytes().unwrap();
        let indication = CemiFrame::new(MessageCode::DataInd, frame()).to_bytes().unwrap();
        for cemi in [confirm, indication] {
            let packet = EibnetPacket::new(ServiceType::RoutingIndication, cemi);
            peer.send_to(&packet.to_bytes().unwrap(), to).unwrap();
        }
        let stop = Flagpole::new();
        assert!(matches!(router.receive(&stop), Some(Lpdu::Busmonitor(_))));
        assert_eq!(router.receive(&stop), Some(Lpdu::Data(frame())));
        assert_eq!(router.default_address(), IndividualAddress::new(1, 1, 200));
    }

    #[test]
    fn stop_ends_receive() {
        let (_peer, mut router) = peer_and_router();
        router.stop();
        assert!(router.connection_lost());
        assert_eq!(router.receive(&Flagpole::new()), None);
        assert!(router.send(frame()).is_err());
    }
}
