use alloc::vec::Vec;
use core::fmt;

use crate::address::{Destination, IndividualAddress};
use crate::encoding::{encode_to_vec, reader::Reader, writer::Writer};
use crate::lpdu::{LData, Priority, MAX_PAYLOAD};
use crate::{DecodeError, EncodeError};

/// cEMI message codes used for `L_Data` services.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MessageCode {
    DataReq,
    DataCon,
    DataInd,
    BusmonInd,
    Unknown(u8),
}

impl MessageCode {
    pub const fn from_u8(value: u8) -> Self {
        match value {
            0x11 => Self::DataReq,
            0x2e => Self::DataCon,
            0x29 => Self::DataInd,
            0x2b => Self::BusmonInd,
            other => Self::Unknown(other),
        }
    }

    pub const fn to_u8(self) -> u8 {
        match self {
            Self::DataReq => 0x11,
            Self::DataCon => 0x2e,
            Self::DataInd => 0x29,
            Self::BusmonInd => 0x2b,
            Self::Unknown(v) => v,
        }
    }
}

impl fmt::Display for MessageCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DataReq => f.write_str("L_Data.req"),
            Self::DataCon => f.write_str("L_Data.con"),
            Self::DataInd => f.write_str("L_Data.ind"),
            Self::BusmonInd => f.write_str("L_Busmon.ind"),
            Self::Unknown(v) => write!(f, "cEMI 0x{v:02X}"),
        }
    }
}

/// An `L_Data` message in cEMI framing.
///
/// Additional info blocks are skipped on decode and never emitted.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CemiFrame {
    pub code: MessageCode,
    pub data: LData,
}

impl CemiFrame {
    pub fn new(code: MessageCode, data: LData) -> Self {
        Self { code, data }
    }

    pub fn encoded_len(&self) -> usize {
        9 + self.data.data.len()
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let l = &self.data;
        if l.data.is_empty() || l.data.len() > MAX_PAYLOAD - 1 {
            return Err(EncodeError::InvalidLength);
        }
        if l.hop_count > 7 {
            return Err(EncodeError::ValueOutOfRange);
        }
        let standard = if l.is_standard() { 0x80 } else { 0x00 };
        let repeat = if l.repeated { 0x00 } else { 0x20 };
        let group = if l.destination.is_group() { 0x80 } else { 0x00 };
        w.write_u8(self.code.to_u8())?;
        w.write_u8(0)?;
        w.write_u8(0x10 | repeat | (l.priority.to_bits() << 2) | standard)?;
        w.write_u8(group | (l.hop_count << 4))?;
        w.write_be_u16(l.source.raw())?;
        w.write_be_u16(l.destination.raw())?;
        w.write_u8((l.data.len() - 1) as u8)?;
        w.write_all(&l.data)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_to_vec(self.encoded_len(), |w| self.encode(w))
    }

    /// Decodes a cEMI `L_Data` message. The NPDU length field must account
    /// for every byte after the header.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(bytes);
        let code = MessageCode::from_u8(r.read_u8()?);
        let info_len = r.read_u8()?;
        r.skip(usize::from(info_len))?;
        let ctrl1 = r.read_u8()?;
        let ctrl2 = r.read_u8()?;
        let source = r.read_be_u16()?;
        let dest = r.read_be_u16()?;
        let npdu_len = usize::from(r.read_u8()?);
        if r.remaining() != npdu_len + 1 {
            return Err(DecodeError::InvalidLength);
        }
        if ctrl1 & 0x80 == 0 && ctrl2 & 0x0f != 0 {
            return Err(DecodeError::Unsupported);
        }
        let payload = r.read_rest().to_vec();
        Ok(Self {
            code,
            data: LData {
                priority: Priority::from_bits(ctrl1 >> 2),
                repeated: ctrl1 & 0x20 == 0,
                source: IndividualAddress(source),
                destination: Destination::from_raw(dest, ctrl2 & 0x80 != 0),
                hop_count: (ctrl2 >> 4) & 0x07,
                data: payload,
                valid_checksum: true,
                valid_length: true,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{CemiFrame, MessageCode};
    use crate::address::{Destination, GroupAddress, IndividualAddress};
    use crate::lpdu::{LData, Priority};
    use crate::DecodeError;
    use alloc::vec;
    use alloc::vec::Vec;
    use proptest::prelude::*;

    fn write_on_1_2_3() -> LData {
        let mut l = LData::new(Destination::Group(GroupAddress::new(1, 2, 3)), vec![0x00, 0x81]);
        l.source = IndividualAddress::new(1, 1, 10);
        l
    }

    #[test]
    fn data_ind_layout() {
        let frame = CemiFrame::new(MessageCode::DataInd, write_on_1_2_3());
        let bytes = frame.to_bytes().unwrap();
        assert_eq!(
            bytes,
            [0x29, 0x00, 0xBC, 0xE0, 0x11, 0x0A, 0x0A, 0x03, 0x01, 0x00, 0x81]
        );
        assert_eq!(CemiFrame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn additional_info_is_skipped() {
        let bytes = [
            0x29, 0x02, 0xAA, 0xBB, 0xBC, 0xE0, 0x11, 0x0A, 0x0A, 0x03, 0x01, 0x00, 0x81,
        ];
        let frame = CemiFrame::decode(&bytes).unwrap();
        assert_eq!(frame.data, write_on_1_2_3());
    }

    #[test]
    fn length_must_be_exact() {
        let mut bytes = CemiFrame::new(MessageCode::DataReq, write_on_1_2_3())
            .to_bytes()
            .unwrap();
        bytes.push(0x00);
        assert_eq!(CemiFrame::decode(&bytes), Err(DecodeError::InvalidLength));
        bytes.truncate(bytes.len() - 2);
        assert_eq!(CemiFrame::decode(&bytes), Err(DecodeError::InvalidLength));
        assert_eq!(CemiFrame::decode(&[0x29]), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn repeated_flag_clears_bit() {
        let mut l = write_on_1_2_3();
        l.repeated = true;
        l.priority = Priority::System;
        let bytes = CemiFrame::new(MessageCode::DataReq, l).to_bytes().unwrap();
        assert_eq!(bytes[2], 0x90);
    }

    #[test]
    fn extended_addressing_rejected() {
        let bytes = [0x29, 0x00, 0x3C, 0xE5, 0x11, 0x0A, 0x0A, 0x03, 0x01, 0x00, 0x81];
        assert_eq!(CemiFrame::decode(&bytes), Err(DecodeError::Unsupported));
    }

    #[test]
    fn message_codes() {
        assert_eq!(MessageCode::from_u8(0x2E), MessageCode::DataCon);
        assert_eq!(MessageCode::from_u8(0x42), MessageCode::Unknown(0x42));
        assert_eq!(MessageCode::BusmonInd.to_u8(), 0x2B);
    }

    proptest! {
        #[test]
        fn cemi_roundtrip(
            prio in 0u8..4,
            repeated in any::<bool>(),
            source in any::<u16>(),
            dest in any::<u16>(),
            group in any::<bool>(),
            hops in 0u8..8,
            data in proptest::collection::vec(any::<u8>(), 1..64usize),
        ) {
            let l = LData {
                priority: Priority::from_bits(prio),
                repeated,
                source: IndividualAddress(source),
                destination: if group {
                    Destination::Group(GroupAddress(dest))
                } else {
                    Destination::Individual(IndividualAddress(dest))
                },
                hop_count: hops,
                data: data.clone(),
                valid_checksum: true,
                valid_length: true,
            };
            let frame = CemiFrame::new(MessageCode::DataInd, l);
            let bytes: Vec<u8> = frame.to_bytes().unwrap();
            prop_assert_eq!(CemiFrame::decode(&bytes).unwrap(), frame);
        }
    }
}
