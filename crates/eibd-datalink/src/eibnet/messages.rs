use std::net::{Ipv4Addr, SocketAddrV4};

use eibd_core::encoding::{encode_to_vec, reader::Reader, writer::Writer};
use eibd_core::{DecodeError, EncodeError, IndividualAddress};

use super::packet::{EibnetPacket, ServiceType};

/// EIBnet/IP status codes.
pub mod status {
    pub const E_NO_ERROR: u8 = 0x00;
    pub const E_CONNECTION_ID: u8 = 0x21;
    pub const E_CONNECTION_TYPE: u8 = 0x22;
    pub const E_CONNECTION_OPTION: u8 = 0x23;
    pub const E_NO_MORE_CONNECTIONS: u8 = 0x24;
    pub const E_DATA_CONNECTION: u8 = 0x26;
    pub const E_KNX_CONNECTION: u8 = 0x27;
    pub const E_TUNNELLING_LAYER: u8 = 0x29;
}

pub const HPAI_LEN: usize = 8;
pub const IPV4_UDP: u8 = 0x01;

pub const TUNNEL_CONNECTION: u8 = 0x04;
pub const TUNNEL_LINKLAYER: u8 = 0x02;
/// CRI body (without its length byte) requesting a link-layer tunnel.
pub const TUNNEL_LINKLAYER_CRI: [u8; 3] = [TUNNEL_CONNECTION, TUNNEL_LINKLAYER, 0x00];

pub const DIB_DEVICE_INFO: u8 = 0x01;
pub const DIB_SUPP_SVC_FAMILIES: u8 = 0x02;
pub const DEVICE_INFO_LEN: usize = 54;
pub const MEDIUM_TP1: u8 = 0x02;
const NAME_LEN: usize = 30;

pub const FAMILY_CORE: u8 = 0x02;
pub const FAMILY_TUNNELING: u8 = 0x04;
pub const FAMILY_ROUTING: u8 = 0x05;

const TUNNEL_HEADER_LEN: u8 = 0x04;

fn expect(packet: &EibnetPacket, service: ServiceType) -> Result<(), DecodeError> {
    if packet.service != service {
        return Err(DecodeError::InvalidValue);
    }
    Ok(())
}

fn exact(data: &[u8], len: usize) -> Result<(), DecodeError> {
    if data.len() != len {
        return Err(DecodeError::InvalidLength);
    }
    Ok(())
}

pub fn write_hpai(w: &mut Writer<'_>, addr: SocketAddrV4) -> Result<(), EncodeError> {
    w.write_u8(HPAI_LEN as u8)?;
    w.write_u8(IPV4_UDP)?;
    w.write_all(&addr.ip().octets())?;
    w.write_be_u16(addr.port())
}

pub fn read_hpai(r: &mut Reader<'_>) -> Result<SocketAddrV4, DecodeError> {
    if r.read_u8()? != HPAI_LEN as u8 || r.read_u8()? != IPV4_UDP {
        return Err(DecodeError::InvalidValue);
    }
    let ip: [u8; 4] = r.read_array()?;
    let port = r.read_be_u16()?;
    Ok(SocketAddrV4::new(Ipv4Addr::from(ip), port))
}

fn packet<F>(service: ServiceType, len: usize, body: F) -> Result<EibnetPacket, EncodeError>
where
    F: FnOnce(&mut Writer<'_>) -> Result<(), EncodeError>,
{
    Ok(EibnetPacket::new(service, encode_to_vec(len, body)?))
}

fn counted_block(len_byte: u8, rest: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if usize::from(len_byte) != rest.len() + 1 {
        return Err(DecodeError::InvalidLength);
    }
    Ok(rest.to_vec())
}

fn block_len(body: &[u8]) -> Result<u8, EncodeError> {
    u8::try_from(body.len() + 1).map_err(|_| EncodeError::InvalidLength)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub control: SocketAddrV4,
    pub data: SocketAddrV4,
    /// Connection request information without its length byte.
    pub cri: Vec<u8>,
}

impl ConnectRequest {
    pub fn tunnel(control: SocketAddrV4, data: SocketAddrV4) -> Self {
        Self {
            control,
            data,
            cri: TUNNEL_LINKLAYER_CRI.to_vec(),
        }
    }

    pub fn is_link_layer_tunnel(&self) -> bool {
        self.cri.len() == 3 && self.cri[0] == TUNNEL_CONNECTION && self.cri[1] == TUNNEL_LINKLAYER
    }

    pub fn to_packet(&self) -> Result<EibnetPacket, EncodeError> {
        let len = 2 * HPAI_LEN + 1 + self.cri.len();
        packet(ServiceType::ConnectionRequest, len, |w| {
            write_hpai(w, self.control)?;
            write_hpai(w, self.data)?;
            w.write_u8(block_len(&self.cri)?)?;
            w.write_all(&self.cri)
        })
    }

    pub fn parse(packet: &EibnetPacket) -> Result<Self, DecodeError> {
        expect(packet, ServiceType::ConnectionRequest)?;
        if packet.data.len() < 18 {
            return Err(DecodeError::UnexpectedEof);
        }
        let mut r = Reader::new(&packet.data);
        let control = read_hpai(&mut r)?;
        let data = read_hpai(&mut r)?;
        let len = r.read_u8()?;
        let cri = counted_block(len, r.read_rest())?;
        Ok(Self { control, data, cri })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectResponse {
    pub channel: u8,
    pub status: u8,
    pub data: SocketAddrV4,
    /// Connection response data block without its length byte.
    pub crd: Vec<u8>,
}

impl ConnectResponse {
    pub fn rejected(status: u8) -> Self {
        Self {
            channel: 0,
            status,
            data: SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0),
            crd: Vec::new(),
        }
    }

    /// Individual address the server assigned to a tunnel connection.
    pub fn assigned_address(&self) -> Option<IndividualAddress> {
        match self.crd.as_slice() {
            [TUNNEL_CONNECTION, hi, lo] => Some(IndividualAddress(u16::from_be_bytes([*hi, *lo]))),
            _ => None,
        }
    }

    pub fn to_packet(&self) -> Result<EibnetPacket, EncodeError> {
        let len = 2 + HPAI_LEN + 1 + self.crd.len();
        packet(ServiceType::ConnectionResponse, len, |w| {
            w.write_u8(self.channel)?;
            w.write_u8(self.status)?;
            write_hpai(w, self.data)?;
            w.write_u8(block_len(&self.crd)?)?;
            w.write_all(&self.crd)
        })
    }

    /// Parses a response. Rejections may stop after the status byte; a
    /// successful response must carry the data endpoint and CRD.
    pub fn parse(packet: &EibnetPacket) -> Result<Self, DecodeError> {
        expect(packet, ServiceType::ConnectionResponse)?;
        let mut r = Reader::new(&packet.data);
        let channel = r.read_u8()?;
        let status = r.read_u8()?;
        if status != status::E_NO_ERROR && r.remaining() < HPAI_LEN + 2 {
            return Ok(Self {
                channel,
                ..Self::rejected(status)
            });
        }
        if packet.data.len() < 12 {
            return Err(DecodeError::UnexpectedEof);
        }
        let data = read_hpai(&mut r)?;
        let len = r.read_u8()?;
        let crd = counted_block(len, r.read_rest())?;
        Ok(Self {
            channel,
            status,
            data,
            crd,
        })
    }
}

/// Body shared by CONNECTIONSTATE_REQUEST and DISCONNECT_REQUEST.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelRequest {
    pub channel: u8,
    pub control: SocketAddrV4,
}

impl ChannelRequest {
    pub fn to_packet(&self, service: ServiceType) -> Result<EibnetPacket, EncodeError> {
        packet(service, 2 + HPAI_LEN, |w| {
            w.write_u8(self.channel)?;
            w.write_u8(0)?;
            write_hpai(w, self.control)
        })
    }

    pub fn parse(packet: &EibnetPacket, service: ServiceType) -> Result<Self, DecodeError> {
        expect(packet, service)?;
        exact(&packet.data, 2 + HPAI_LEN)?;
        let mut r = Reader::new(&packet.data);
        let channel = r.read_u8()?;
        r.skip(1)?;
        Ok(Self {
            channel,
            control: read_hpai(&mut r)?,
        })
    }
}

/// Body shared by CONNECTIONSTATE_RESPONSE and DISCONNECT_RESPONSE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelResponse {
    pub channel: u8,
    pub status: u8,
}

impl ChannelResponse {
    pub fn to_packet(&self, service: ServiceType) -> EibnetPacket {
        EibnetPacket::new(service, vec![self.channel, self.status])
    }

    pub fn parse(packet: &EibnetPacket, service: ServiceType) -> Result<Self, DecodeError> {
        expect(packet, service)?;
        exact(&packet.data, 2)?;
        Ok(Self {
            channel: packet.data[0],
            status: packet.data[1],
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelRequest {
    pub channel: u8,
    pub sequence: u8,
    pub cemi: Vec<u8>,
}

impl TunnelRequest {
    pub fn to_packet(&self) -> EibnetPacket {
        let mut data = Vec::with_capacity(4 + self.cemi.len());
        data.extend_from_slice(&[TUNNEL_HEADER_LEN, self.channel, self.sequence, 0]);
        data.extend_from_slice(&self.cemi);
        EibnetPacket::new(ServiceType::TunnelRequest, data)
    }

    pub fn parse(packet: &EibnetPacket) -> Result<Self, DecodeError> {
        expect(packet, ServiceType::TunnelRequest)?;
        if packet.data.len() < 6 {
            return Err(DecodeError::UnexpectedEof);
        }
        if packet.data[0] != TUNNEL_HEADER_LEN {
            return Err(DecodeError::InvalidValue);
        }
        Ok(Self {
            channel: packet.data[1],
            sequence: packet.data[2],
            cemi: packet.data[4..].to_vec(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TunnelAck {
    pub channel: u8,
    pub sequence: u8,
    pub status: u8,
}

impl TunnelAck {
    pub fn to_packet(&self) -> EibnetPacket {
        EibnetPacket::new(
            ServiceType::TunnelResponse,
            vec![TUNNEL_HEADER_LEN, self.channel, self.sequence, self.status],
        )
    }

    pub fn parse(packet: &EibnetPacket) -> Result<Self, DecodeError> {
        expect(packet, ServiceType::TunnelResponse)?;
        exact(&packet.data, 4)?;
        if packet.data[0] != TUNNEL_HEADER_LEN {
            return Err(DecodeError::InvalidValue);
        }
        Ok(Self {
            channel: packet.data[1],
            sequence: packet.data[2],
            status: packet.data[3],
        })
    }
}

/// SEARCH_REQUEST / DESCRIPTION_REQUEST body: the endpoint to answer to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointRequest {
    pub endpoint: SocketAddrV4,
}

impl EndpointRequest {
    pub fn to_packet(&self, service: ServiceType) -> Result<EibnetPacket, EncodeError> {
        packet(service, HPAI_LEN, |w| write_hpai(w, self.endpoint))
    }

    pub fn parse(packet: &EibnetPacket, service: ServiceType) -> Result<Self, DecodeError> {
        expect(packet, service)?;
        exact(&packet.data, HPAI_LEN)?;
        Ok(Self {
            endpoint: read_hpai(&mut Reader::new(&packet.data))?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceFamily {
    pub family: u8,
    pub version: u8,
}

/// Device information DIB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub medium: u8,
    pub status: u8,
    pub address: IndividualAddress,
    pub install_id: u16,
    pub serial: [u8; 6],
    pub multicast: Ipv4Addr,
    pub mac: [u8; 6],
    /// At most 29 bytes go on the wire.
    pub name: String,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            medium: MEDIUM_TP1,
            status: 0,
            address: IndividualAddress::UNSET,
            install_id: 0,
            serial: [0; 6],
            multicast: Ipv4Addr::UNSPECIFIED,
            mac: [0; 6],
            name: String::new(),
        }
    }
}

impl DeviceInfo {
    fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        w.write_u8(DEVICE_INFO_LEN as u8)?;
        w.write_u8(DIB_DEVICE_INFO)?;
        w.write_u8(self.medium)?;
        w.write_u8(self.status)?;
        w.write_be_u16(self.address.raw())?;
        w.write_be_u16(self.install_id)?;
        w.write_all(&self.serial)?;
        w.write_all(&self.multicast.octets())?;
        w.write_all(&self.mac)?;
        let mut name = [0u8; NAME_LEN];
        let raw = self.name.as_bytes();
        let n = raw.len().min(NAME_LEN - 1);
        name[..n].copy_from_slice(&raw[..n]);
        w.write_all(&name)
    }

    fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        if usize::from(r.read_u8()?) != DEVICE_INFO_LEN || r.read_u8()? != DIB_DEVICE_INFO {
            return Err(DecodeError::InvalidValue);
        }
        let medium = r.read_u8()?;
        let status = r.read_u8()?;
        let address = IndividualAddress(r.read_be_u16()?);
        let install_id = r.read_be_u16()?;
        let serial = r.read_array()?;
        let multicast = Ipv4Addr::from(r.read_array::<4>()?);
        let mac = r.read_array()?;
        let raw = r.read_exact(NAME_LEN)?;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(NAME_LEN - 1);
        Ok(Self {
            medium,
            status,
            address,
            install_id,
            serial,
            multicast,
            mac,
            name: String::from_utf8_lossy(&raw[..end.min(NAME_LEN - 1)]).into_owned(),
        })
    }
}

fn families_len(services: &[ServiceFamily]) -> usize {
    2 + 2 * services.len()
}

fn write_families(w: &mut Writer<'_>, services: &[ServiceFamily]) -> Result<(), EncodeError> {
    let len = u8::try_from(families_len(services)).map_err(|_| EncodeError::InvalidLength)?;
    w.write_u8(len)?;
    w.write_u8(DIB_SUPP_SVC_FAMILIES)?;
    for s in services {
        w.write_u8(s.family)?;
        w.write_u8(s.version)?;
    }
    Ok(())
}

fn read_families(r: &mut Reader<'_>) -> Result<Vec<ServiceFamily>, DecodeError> {
    let len = usize::from(r.read_u8()?);
    if r.read_u8()? != DIB_SUPP_SVC_FAMILIES {
        return Err(DecodeError::InvalidValue);
    }
    if len % 2 != 0 || len < 2 {
        return Err(DecodeError::InvalidLength);
    }
    let body = r.read_exact(len - 2)?;
    Ok(body
        .chunks_exact(2)
        .map(|c| ServiceFamily {
            family: c[0],
            version: c[1],
        })
        .collect())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchResponse {
    pub control: SocketAddrV4,
    pub device: DeviceInfo,
    pub services: Vec<ServiceFamily>,
}

impl SearchResponse {
    pub fn to_packet(&self) -> Result<EibnetPacket, EncodeError> {
        let len = HPAI_LEN + DEVICE_INFO_LEN + families_len(&self.services);
        packet(ServiceType::SearchResponse, len, |w| {
            write_hpai(w, self.control)?;
            self.device.encode(w)?;
            write_families(w, &self.services)
        })
    }

    pub fn parse(packet: &EibnetPacket) -> Result<Self, DecodeError> {
        expect(packet, ServiceType::SearchResponse)?;
        let mut r = Reader::new(&packet.data);
        let control = read_hpai(&mut r)?;
        let device = DeviceInfo::decode(&mut r)?;
        let services = read_families(&mut r)?;
        Ok(Self {
            control,
            device,
            services,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptionResponse {
    pub device: DeviceInfo,
    pub services: Vec<ServiceFamily>,
    /// Further DIBs, kept undecoded.
    pub optional: Vec<u8>,
}

impl DescriptionResponse {
    pub fn to_packet(&self) -> Result<EibnetPacket, EncodeError> {
        let len = DEVICE_INFO_LEN + families_len(&self.services) + self.optional.len();
        packet(ServiceType::DescriptionResponse, len, |w| {
            self.device.encode(w)?;
            write_families(w, &self.services)?;
            w.write_all(&self.optional)
        })
    }

    pub fn parse(packet: &EibnetPacket) -> Result<Self, DecodeError> {
        expect(packet, ServiceType::DescriptionResponse)?;
        let mut r = Reader::new(&packet.data);
        let device = DeviceInfo::decode(&mut r)?;
        let services = read_families(&mut r)?;
        Ok(Self {
            device,
            services,
            optional: r.read_rest().to_vec(),
        })
    }
}
