use alloc::vec::Vec;
use core::fmt;

use crate::apdu::Apdu;
use crate::encoding::{encode_to_vec, writer::Writer, Hex};
use crate::{DecodeError, EncodeError};

const CONNECT: u8 = 0x80;
const DISCONNECT: u8 = 0x81;

/// Transport layer unit carried in an `L_Data` payload.
///
/// The data variants hold the APDU bytes. The two low bits of the first
/// byte belong to the APCI and are kept there; the TPCI bits are not.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Tpdu {
    /// `T_Data_Broadcast`/`T_Data_Group`/`T_Data_Individual`; which one follows
    /// from the frame's destination.
    DataUnnumbered(Vec<u8>),
    DataConnected { sequence: u8, apdu: Vec<u8> },
    Connect,
    Disconnect,
    Ack(u8),
    Nack(u8),
    Unknown(Vec<u8>),
}

fn control_only(bytes: &[u8], pdu: Tpdu) -> Result<Tpdu, DecodeError> {
    if bytes.len() != 1 {
        return Err(DecodeError::InvalidLength);
    }
    Ok(pdu)
}

impl Tpdu {
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let c0 = *bytes.first().ok_or(DecodeError::UnexpectedEof)?;
        if c0 & 0xfc == 0 {
            return Ok(Self::DataUnnumbered(bytes.to_vec()));
        }
        match c0 {
            CONNECT => return control_only(bytes, Self::Connect),
            DISCONNECT => return control_only(bytes, Self::Disconnect),
            _ => {}
        }
        let sequence = (c0 >> 2) & 0x0f;
        match c0 & 0xc3 {
            0xc2 => return control_only(bytes, Self::Ack(sequence)),
            0xc3 => return control_only(bytes, Self::Nack(sequence)),
            _ => {}
        }
        if c0 & 0xc0 == 0x40 {
            let mut apdu = bytes.to_vec();
            apdu[0] &= 0x03;
            return Ok(Self::DataConnected { sequence, apdu });
        }
        Ok(Self::Unknown(bytes.to_vec()))
    }

    /// Decodes like the bus does: anything malformed is kept as `Unknown`.
    pub fn decode_lossy(bytes: &[u8]) -> Self {
        Self::decode(bytes).unwrap_or_else(|_| Self::Unknown(bytes.to_vec()))
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::DataUnnumbered(apdu) | Self::DataConnected { apdu, .. } => apdu.len(),
            Self::Unknown(raw) => raw.len(),
            _ => 1,
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::DataUnnumbered(apdu) => write_data(w, 0x00, apdu),
            Self::DataConnected { sequence, apdu } => {
                write_data(w, 0x40 | (sequence_bits(*sequence)? << 2), apdu)
            }
            Self::Connect => w.write_u8(CONNECT),
            Self::Disconnect => w.write_u8(DISCONNECT),
            Self::Ack(seq) => w.write_u8(0xc2 | (sequence_bits(*seq)? << 2)),
            Self::Nack(seq) => w.write_u8(0xc3 | (sequence_bits(*seq)? << 2)),
            Self::Unknown(raw) => w.write_all(raw),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_to_vec(self.encoded_len(), |w| self.encode(w))
    }
}

fn sequence_bits(seq: u8) -> Result<u8, EncodeError> {
    if seq > 0x0f {
        return Err(EncodeError::ValueOutOfRange);
    }
    Ok(seq)
}

fn write_data(w: &mut Writer<'_>, tpci: u8, apdu: &[u8]) -> Result<(), EncodeError> {
    let (first, rest) = apdu.split_first().ok_or(EncodeError::InvalidLength)?;
    w.write_u8(tpci | (first & 0x03))?;
    w.write_all(rest)
}

impl fmt::Display for Tpdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataUnnumbered(apdu) => {
                write!(f, "T_DATA_XXX_REQ {}", Apdu::decode_lossy(apdu))
            }
            Self::DataConnected { sequence, apdu } => write!(
                f,
                "T_DATA_CONNECTED_REQ serno:{sequence} {}",
                Apdu::decode_lossy(apdu)
            ),
            Self::Connect => f.write_str("T_CONNECT_REQ"),
            Self::Disconnect => f.write_str("T_DISCONNECT_REQ"),
            Self::Ack(seq) => write!(f, "T_ACK serno:{seq}"),
            Self::Nack(seq) => write!(f, "T_NACK serno:{seq}"),
            Self::Unknown(raw) if raw.is_empty() => f.write_str("empty TPDU"),
            Self::Unknown(raw) => write!(f, "Unknown TPDU: {}", Hex(raw)),
        }
    }
}
