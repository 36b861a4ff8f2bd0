use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::flagpole::{Flag, Flagpole};
use crate::mailbox::Mailbox;
use crate::thread::Worker;
use crate::DataLinkError;

use super::packet::{EibnetPacket, MAX_PACKET_LEN};

const READ_SLICE: Duration = Duration::from_millis(50);

/// Which remote endpoints a socket accepts datagrams from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceFilter {
    /// Only the listed endpoints.
    Peer(Vec<SocketAddr>),
    All,
    /// Everything except the socket's own multicast echo.
    AllButSelf(SocketAddr),
}

impl SourceFilter {
    pub fn accepts(&self, from: SocketAddr) -> bool {
        match self {
            Self::Peer(peers) => peers.contains(&from),
            Self::All => true,
            Self::AllButSelf(own) => *own != from,
        }
    }
}

/// A decoded datagram and its sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub packet: EibnetPacket,
    pub from: SocketAddr,
}

/// UDP socket with a receive thread that decodes EIBnet/IP datagrams and
/// queues the accepted ones in the owner's mailbox.
#[derive(Debug)]
pub struct EibnetSocket {
    socket: Arc<UdpSocket>,
    filter: Arc<Mutex<SourceFilter>>,
    pump: Option<Worker>,
}

impl EibnetSocket {
    pub fn bind(
        addr: SocketAddr,
        filter: SourceFilter,
        inbox: Arc<Mailbox<Received>>,
    ) -> Result<Self, DataLinkError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_read_timeout(Some(READ_SLICE))?;
        let socket = Arc::new(socket);
        let filter = Arc::new(Mutex::new(filter));
        let local = socket.local_addr()?;

        let pump_socket = Arc::clone(&socket);
        let pump_filter = Arc::clone(&filter);
        let pump = Worker::spawn(
            format!("eibnet-{}", local.port()),
            Arc::new(Flagpole::new()),
            move |pole| pump_loop(&pump_socket, &pump_filter, &inbox, &pole),
        )?;
        log::debug!("eibnet socket bound to {local}");
        Ok(Self {
            socket,
            filter,
            pump: Some(pump),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DataLinkError> {
        self.socket.local_addr().map_err(DataLinkError::Io)
    }

    pub fn set_filter(&self, filter: SourceFilter) {
        *self.filter.lock().unwrap_or_else(PoisonError::into_inner) = filter;
    }

    pub fn join_multicast(&self, group: Ipv4Addr) -> Result<(), DataLinkError> {
        self.socket
            .join_multicast_v4(&group, &Ipv4Addr::UNSPECIFIED)?;
        log::info!("joined multicast group {group}");
        Ok(())
    }

    pub fn send_to(&self, packet: &EibnetPacket, to: SocketAddr) -> Result<(), DataLinkError> {
        let bytes = packet.to_bytes()?;
        log::trace!("eibnet send to {to}: {bytes:02X?}");
        self.socket.send_to(&bytes, to)?;
        Ok(())
    }

    /// Stops the receive thread. Also done on drop.
    pub fn stop(mut self) {
        if let Some(pump) = self.pump.take() {
            pump.stop();
        }
    }
}

fn pump_loop(
    socket: &UdpSocket,
    filter: &Mutex<SourceFilter>,
    inbox: &Mailbox<Received>,
    pole: &Flagpole,
) {
    let mut buf = [0u8; MAX_PACKET_LEN];
    while !pole.stopped() {
        let (n, from) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                continue;
            }
            Err(e) => {
                log::debug!("eibnet receive failed: {e}");
                pole.wait_timeout(&[Flag::STOP], READ_SLICE);
                continue;
            }
        };
        let raw = &buf[..n];
        log::trace!("eibnet recv from {from}: {raw:02X?}");
        let packet = match EibnetPacket::from_bytes(raw) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("dropping malformed datagram from {from}: {e}");
                continue;
            }
        };
        let accepted = filter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .accepts(from);
        if accepted {
            inbox.push(Received { packet, from });
        }
    }
}

/// Local address the kernel would use to reach `dest`.
pub fn source_address_for(dest: Ipv4Addr) -> io::Result<Ipv4Addr> {
    let probe = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))?;
    probe.connect(SocketAddrV4::new(dest, 3671))?;
    match probe.local_addr()? {
        SocketAddr::V4(local) => Ok(*local.ip()),
        SocketAddr::V6(_) => Err(io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            "no IPv4 source address",
        )),
    }
}

pub fn v4(addr: SocketAddr) -> Option<SocketAddrV4> {
    match addr {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eibnet::packet::ServiceType;
    use std::time::Instant;

    const NET: Flag = Flag::new(1);

    fn localhost() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[test]
    fn filter_rules() {
        let a: SocketAddr = "10.0.0.1:3671".parse().unwrap();
        let b: SocketAddr = "10.0.0.2:3671".parse().unwrap();
        assert!(SourceFilter::All.accepts(a));
        assert!(SourceFilter::Peer(vec![a]).accepts(a));
        assert!(!SourceFilter::Peer(vec![a]).accepts(b));
        assert!(!SourceFilter::AllButSelf(a).accepts(a));
        assert!(SourceFilter::AllButSelf(a).accepts(b));
    }

    #[test]
    fn pump_delivers_accepted_packets() {
        let inbox = Arc::new(Mailbox::new(Arc::new(Flagpole::new()), NET));
        let socket = EibnetSocket::bind(localhost(), SourceFilter::All, Arc::clone(&inbox)).unwrap();
        let peer = UdpSocket::bind(localhost()).unwrap();

        peer.send_to(&[0x06, 0x10, 0x02], socket.local_addr().unwrap())
            .unwrap();
        let packet = EibnetPacket::new(ServiceType::SearchRequest, vec![1, 2]);
        peer.send_to(&packet.to_bytes().unwrap(), socket.local_addr().unwrap())
            .unwrap();

        let got = inbox
            .pop_wait(Some(Instant::now() + Duration::from_secs(2)))
            .unwrap();
        assert_eq!(got.packet, packet);
        assert_eq!(got.from, peer.local_addr().unwrap());
        assert!(inbox.is_empty());
        socket.stop();
    }

    #[test]
    fn peer_filter_drops_strangers() {
        let inbox = Arc::new(Mailbox::new(Arc::new(Flagpole::new()), NET));
        let trusted = UdpSocket::bind(localhost()).unwrap();
        let stranger = UdpSocket::bind(localhost()).unwrap();
        let socket = EibnetSocket::bind(
            localhost(),
            SourceFilter::Peer(vec![trusted.local_addr().unwrap()]),
            Arc::clone(&inbox),
        )
        .unwrap();
        let to = socket.local_addr().unwrap();
        let bytes = EibnetPacket::new(ServiceType::SearchRequest, Vec::new())
            .to_bytes()
            .unwrap();
        stranger.send_to(&bytes, to).unwrap();
        trusted.send_to(&bytes, to).unwrap();

        let got = inbox
            .pop_wait(Some(Instant::now() + Duration::from_secs(2)))
            .unwrap();
        assert_eq!(got.from, trusted.local_addr().unwrap());
    }

    #[test]
    fn source_address_for_loopback() {
        assert_eq!(
            source_address_for(Ipv4Addr::LOCALHOST).unwrap(),
            Ipv4Addr::LOCALHOST
        );
    }
}
