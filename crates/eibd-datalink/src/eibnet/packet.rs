use eibd_core::encoding::{encode_to_vec, reader::Reader, writer::Writer};
use eibd_core::{DecodeError, EncodeError};

pub const HEADER_LEN: usize = 6;
pub const HEADER_SIZE_10: u8 = 0x06;
pub const PROTOCOL_VERSION_10: u8 = 0x10;

/// Largest datagram an EIBnet/IP socket accepts.
pub const MAX_PACKET_LEN: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    SearchRequest,
    SearchResponse,
    DescriptionRequest,
    DescriptionResponse,
    ConnectionRequest,
    ConnectionResponse,
    ConnectionStateRequest,
    ConnectionStateResponse,
    DisconnectRequest,
    DisconnectResponse,
    DeviceConfigurationRequest,
    DeviceConfigurationResponse,
    TunnelRequest,
    TunnelResponse,
    RoutingIndication,
    Unknown(u16),
}

impl ServiceType {
    pub const fn from_u16(value: u16) -> Self {
        match value {
            0x0201 => Self::SearchRequest,
            0x0202 => Self::SearchResponse,
            0x0203 => Self::DescriptionRequest,
            0x0204 => Self::DescriptionResponse,
            0x0205 => Self::ConnectionRequest,
            0x0206 => Self::ConnectionResponse,
            0x0207 => Self::ConnectionStateRequest,
            0x0208 => Self::ConnectionStateResponse,
            0x0209 => Self::DisconnectRequest,
            0x020A => Self::DisconnectResponse,
            0x0310 => Self::DeviceConfigurationRequest,
            0x0311 => Self::DeviceConfigurationResponse,
            0x0420 => Self::TunnelRequest,
            0x0421 => Self::TunnelResponse,
            0x0530 => Self::RoutingIndication,
            v => Self::Unknown(v),
        }
    }

    pub const fn to_u16(self) -> u16 {
        match self {
            Self::SearchRequest => 0x0201,
            Self::SearchResponse => 0x0202,
            Self::DescriptionRequest => 0x0203,
            Self::DescriptionResponse => 0x0204,
            Self::ConnectionRequest => 0x0205,
            Self::ConnectionResponse => 0x0206,
            Self::ConnectionStateRequest => 0x0207,
            Self::ConnectionStateResponse => 0x0208,
            Self::DisconnectRequest => 0x0209,
            Self::DisconnectResponse => 0x020A,
            Self::DeviceConfigurationRequest => 0x0310,
            Self::DeviceConfigurationResponse => 0x0311,
            Self::TunnelRequest => 0x0420,
            Self::TunnelResponse => 0x0421,
            Self::RoutingIndication => 0x0530,
            Self::Unknown(v) => v,
        }
    }
}

/// One EIBnet/IP datagram: header plus service body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EibnetPacket {
    pub service: ServiceType,
    pub data: Vec<u8>,
}

impl EibnetPacket {
    pub fn new(service: ServiceType, data: Vec<u8>) -> Self {
        Self { service, data }
    }

    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.data.len()
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let total = u16::try_from(self.encoded_len()).map_err(|_| EncodeError::InvalidLength)?;
        w.write_u8(HEADER_SIZE_10)?;
        w.write_u8(PROTOCOL_VERSION_10)?;
        w.write_be_u16(self.service.to_u16())?;
        w.write_be_u16(total)?;
        w.write_all(&self.data)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_to_vec(self.encoded_len(), |w| self.encode(w))
    }

    /// Parses a datagram; the header's total length must equal `bytes.len()`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        if r.read_u8()? != HEADER_SIZE_10 || r.read_u8()? != PROTOCOL_VERSION_10 {
            return Err(DecodeError::InvalidValue);
        }
        let service = ServiceType::from_u16(r.read_be_u16()?);
        let total = usize::from(r.read_be_u16()?);
        if total != bytes.len() {
            return Err(DecodeError::InvalidLength);
        }
        Ok(Self {
            service,
            data: r.read_rest().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{EibnetPacket, ServiceType};
    use eibd_core::DecodeError;
    use proptest::prelude::*;

    #[test]
    fn header_layout() {
        let p = EibnetPacket::new(ServiceType::ConnectionStateResponse, vec![0x01, 0x00]);
        assert_eq!(p.to_bytes().unwrap(), [0x06, 0x10, 0x02, 0x08, 0x00, 0x08, 0x01, 0x00]);
    }

    #[test]
    fn rejects_short_bad_magic_and_length() {
        assert_eq!(
            EibnetPacket::from_bytes(&[0x06, 0x10, 0x02]),
            Err(DecodeError::UnexpectedEof)
        );
        assert_eq!(
            EibnetPacket::from_bytes(&[0x06, 0x11, 0x02, 0x08, 0x00, 0x06]),
            Err(DecodeError::InvalidValue)
        );
        assert_eq!(
            EibnetPacket::from_bytes(&[0x06, 0x10, 0x02, 0x08, 0x00, 0x08, 0x01]),
            Err(DecodeError::InvalidLength)
        );
    }

    #[test]
    fn unknown_service_survives() {
        let bytes = [0x06, 0x10, 0x09, 0x99, 0x00, 0x06];
        let p = EibnetPacket::from_bytes(&bytes).unwrap();
        assert_eq!(p.service, ServiceType::Unknown(0x0999));
        assert_eq!(p.to_bytes().unwrap(), bytes);
    }

    proptest! {
        #[test]
        fn packet_roundtrip(
            code in any::<u16>(),
            data in proptest::collection::vec(any::<u8>(), 0..256usize),
        ) {
            let p = EibnetPacket::new(ServiceType::from_u16(code), data);
            let bytes = p.to_bytes().unwrap();
            prop_assert_eq!(EibnetPacket::from_bytes(&bytes).unwrap(), p);
        }
    }
}
