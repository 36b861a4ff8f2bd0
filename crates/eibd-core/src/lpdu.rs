use alloc::vec::Vec;
use core::fmt;

use crate::address::{Destination, IndividualAddress};
use crate::encoding::{encode_to_vec, reader::Reader, writer::Writer, xor_checksum, Hex};
use crate::tpdu::Tpdu;
use crate::EncodeError;

const ACK: u8 = 0xCC;
const NACK: u8 = 0x0C;
const BUSY: u8 = 0xC0;

/// Largest payload an `L_Data` frame can carry.
pub const MAX_PAYLOAD: usize = 255;
/// Payloads up to this length fit the standard frame format.
pub const MAX_STANDARD_PAYLOAD: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Priority {
    System,
    Normal,
    Urgent,
    #[default]
    Low,
}

impl Priority {
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => Self::System,
            1 => Self::Normal,
            2 => Self::Urgent,
            _ => Self::Low,
        }
    }

    pub const fn to_bits(self) -> u8 {
        match self {
            Self::System => 0,
            Self::Normal => 1,
            Self::Urgent => 2,
            Self::Low => 3,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::System => "system",
            Self::Normal => "normal",
            Self::Urgent => "urgent",
            Self::Low => "low",
        })
    }
}

/// A decoded `L_Data` frame.
///
/// `valid_checksum` and `valid_length` describe the wire frame this value was
/// decoded from; frames built locally carry `true` for both.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LData {
    pub priority: Priority,
    pub repeated: bool,
    pub source: IndividualAddress,
    pub destination: Destination,
    pub hop_count: u8,
    pub data: Vec<u8>,
    pub valid_checksum: bool,
    pub valid_length: bool,
}

impl LData {
    /// Low priority, hop count 6, source left unset for Layer3 to fill in.
    pub fn new(destination: Destination, data: Vec<u8>) -> Self {
        Self {
            priority: Priority::Low,
            repeated: false,
            source: IndividualAddress::UNSET,
            destination,
            hop_count: 6,
            data,
            valid_checksum: true,
            valid_length: true,
        }
    }

    pub fn is_standard(&self) -> bool {
        self.data.len() <= MAX_STANDARD_PAYLOAD
    }

    pub fn encoded_len(&self) -> usize {
        if self.is_standard() {
            self.data.len() + 7
        } else {
            self.data.len() + 8
        }
    }

    fn control(&self, standard: bool) -> u8 {
        let frame_type = if standard { 0x90 } else { 0x10 };
        let repeat = if self.repeated { 0x00 } else { 0x20 };
        frame_type | repeat | (self.priority.to_bits() << 2)
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        let len = self.data.len();
        if len == 0 || len > MAX_PAYLOAD {
            return Err(EncodeError::InvalidLength);
        }
        if self.hop_count > 7 {
            return Err(EncodeError::ValueOutOfRange);
        }
        let group = if self.destination.is_group() { 0x80 } else { 0x00 };
        let start = w.position();
        if self.is_standard() {
            w.write_u8(self.control(true))?;
            w.write_be_u16(self.source.raw())?;
            w.write_be_u16(self.destination.raw())?;
            w.write_u8(group | (self.hop_count << 4) | (len - 1) as u8)?;
        } else {
            w.write_u8(self.control(false))?;
            w.write_u8(group | (self.hop_count << 4))?;
            w.write_be_u16(self.source.raw())?;
            w.write_be_u16(self.destination.raw())?;
            w.write_u8((len - 1) as u8)?;
        }
        w.write_all(&self.data)?;
        let check = xor_checksum(&w.as_written()[start..]);
        w.write_u8(check)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_to_vec(self.encoded_len(), |w| self.encode(w))
    }

    fn decode(frame: &[u8]) -> Option<Self> {
        let mut r = Reader::new(frame);
        let ctrl = r.read_u8().ok()?;
        let standard = ctrl & 0x80 != 0;
        let (hops_byte, source, dest, declared, header) = if standard {
            let source = r.read_be_u16().ok()?;
            let dest = r.read_be_u16().ok()?;
            let npci = r.read_u8().ok()?;
            (npci, source, dest, usize::from(npci & 0x0f) + 1, 6)
        } else {
            let npci = r.read_u8().ok()?;
            if npci & 0x0f != 0 {
                return None;
            }
            let source = r.read_be_u16().ok()?;
            let dest = r.read_be_u16().ok()?;
            let len = r.read_u8().ok()?;
            (npci, source, dest, usize::from(len) + 1, 7)
        };
        // header, at least one payload byte, check byte
        let available = frame.len().checked_sub(header + 1).filter(|n| *n > 0)?;
        let taken = declared.min(available);
        let data = r.read_exact(taken).ok()?.to_vec();
        let (body, check) = frame.split_at(frame.len() - 1);
        Some(Self {
            priority: Priority::from_bits(ctrl >> 2),
            repeated: ctrl & 0x20 == 0,
            source: IndividualAddress(source),
            destination: Destination::from_raw(dest, hops_byte & 0x80 != 0),
            hop_count: (hops_byte >> 4) & 0x07,
            data,
            valid_checksum: xor_checksum(body) == check[0],
            valid_length: declared == available,
        })
    }
}

impl fmt::Display for LData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("L_Data")?;
        if !self.valid_length {
            f.write_str(" (incomplete)")?;
        }
        if self.repeated {
            f.write_str(" (repeated)")?;
        }
        write!(f, " {}", self.priority)?;
        if !self.valid_checksum {
            f.write_str(" INVALID CHECKSUM")?;
        }
        write!(
            f,
            " from {} to {} hops: {:02X} ",
            self.source, self.destination, self.hop_count
        )?;
        match Tpdu::decode(&self.data) {
            Ok(tpdu) => write!(f, "{tpdu}"),
            Err(_) => write!(f, "{}", Hex(&self.data)),
        }
    }
}

/// Raw frame captured while the medium is in (virtual) busmonitor mode.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Busmonitor {
    pub frame: Vec<u8>,
}

impl Busmonitor {
    pub fn new(frame: Vec<u8>) -> Self {
        Self { frame }
    }

    /// Capture of a locally known frame, as drivers report it in busmonitor mode.
    pub fn capture(data: &LData) -> Result<Self, EncodeError> {
        data.to_bytes().map(Self::new)
    }

    pub fn decode(&self) -> Lpdu {
        decode_lpdu(&self.frame)
    }
}

impl fmt::Display for Busmonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L_Busmonitor: {}: {}", Hex(&self.frame), self.decode())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Lpdu {
    Data(LData),
    Busmonitor(Busmonitor),
    Ack,
    Nack,
    Busy,
    Unknown(Vec<u8>),
}

impl Lpdu {
    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        match self {
            Self::Data(data) => data.to_bytes(),
            Self::Busmonitor(b) => Ok(b.frame.clone()),
            Self::Ack => Ok(alloc::vec![ACK]),
            Self::Nack => Ok(alloc::vec![NACK]),
            Self::Busy => Ok(alloc::vec![BUSY]),
            Self::Unknown(raw) => Ok(raw.clone()),
        }
    }
}

impl fmt::Display for Lpdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Data(data) => write!(f, "{data}"),
            Self::Busmonitor(b) => write!(f, "{b}"),
            Self::Ack => f.write_str("ACK"),
            Self::Nack => f.write_str("NACK"),
            Self::Busy => f.write_str("BUSY"),
            Self::Unknown(raw) if raw.is_empty() => f.write_str("empty LPDU"),
            Self::Unknown(raw) => write!(f, "Unknown LPDU: {}", Hex(raw)),
        }
    }
}

/// Decodes one TP1 frame. Never fails: unparsable input becomes
/// [`Lpdu::Unknown`] so busmonitor traces stay lossless.
pub fn decode_lpdu(frame: &[u8]) -> Lpdu {
    match frame {
        [ACK] => return Lpdu::Ack,
        [NACK] => return Lpdu::Nack,
        [BUSY] => return Lpdu::Busy,
        _ => {}
    }
    let is_data = frame.first().is_some_and(|c| c & 0x53 == 0x10);
    if is_data {
        if let Some(data) = LData::decode(frame) {
            return Lpdu::Data(data);
        }
    }
    Lpdu::Unknown(frame.to_vec())
}

/// Encodes `pdu` to its wire bytes.
pub fn encode_lpdu(pdu: &Lpdu) -> Result<Vec<u8>, EncodeError> {
    pdu.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::{decode_lpdu, encode_lpdu, LData, Lpdu, Priority};
    use crate::address::{Destination, GroupAddress, IndividualAddress};
    use alloc::string::ToString;
    use alloc::vec;
    use alloc::vec::Vec;
    use proptest::prelude::*;

    fn group_write() -> LData {
        let mut data = LData::new(Destination::Group(GroupAddress::new(1, 2, 3)), vec![0x00, 0x80]);
        data.source = IndividualAddress::new(1, 1, 1);
        data
    }

    #[test]
    fn standard_frame_layout() {
        let bytes = group_write().to_bytes().unwrap();
        assert_eq!(bytes, [0xBC, 0x11, 0x01, 0x0A, 0x03, 0xE1, 0x00, 0x80, 0x3B]);
    }

    #[test]
    fn extended_frame_chosen_above_sixteen_bytes() {
        let mut data = group_write();
        data.data = vec![0u8; 17];
        let bytes = data.to_bytes().unwrap();
        assert_eq!(bytes.len(), 17 + 8);
        assert_eq!(bytes[0] & 0x80, 0);
        assert_eq!(bytes[1], 0xE0);
        assert_eq!(bytes[6], 16);
        assert_eq!(decode_lpdu(&bytes), Lpdu::Data(data));
    }

    #[test]
    fn single_byte_acknowledgements() {
        assert_eq!(decode_lpdu(&[0xCC]), Lpdu::Ack);
        assert_eq!(decode_lpdu(&[0x0C]), Lpdu::Nack);
        assert_eq!(decode_lpdu(&[0xC0]), Lpdu::Busy);
        assert_eq!(encode_lpdu(&Lpdu::Busy).unwrap(), [0xC0]);
    }

    #[test]
    fn garbage_is_preserved_as_unknown() {
        assert_eq!(decode_lpdu(&[0x01, 0x02]), Lpdu::Unknown(vec![0x01, 0x02]));
        assert_eq!(decode_lpdu(&[]), Lpdu::Unknown(Vec::new()));
        // discriminator ok but truncated header
        assert_eq!(decode_lpdu(&[0xBC, 0x11]), Lpdu::Unknown(vec![0xBC, 0x11]));
    }

    #[test]
    fn length_mismatch_is_flagged_not_rejected() {
        let mut bytes = group_write().to_bytes().unwrap();
        bytes.insert(8, 0x55);
        match decode_lpdu(&bytes) {
            Lpdu::Data(d) => {
                assert!(!d.valid_length);
                assert_eq!(d.data, [0x00, 0x80]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn repeated_flag_is_inverted_on_wire() {
        let mut data = group_write();
        data.repeated = true;
        let bytes = data.to_bytes().unwrap();
        assert_eq!(bytes[0] & 0x20, 0);
        assert_eq!(decode_lpdu(&bytes), Lpdu::Data(data));
    }

    #[test]
    fn encode_rejects_bad_fields() {
        let mut data = group_write();
        data.hop_count = 8;
        assert!(data.to_bytes().is_err());
        data.hop_count = 7;
        data.data.clear();
        assert!(data.to_bytes().is_err());
        data.data = vec![0; 256];
        assert!(data.to_bytes().is_err());
    }

    #[test]
    fn description_text() {
        let text = group_write().to_string();
        assert!(text.starts_with("L_Data low from 1.1.1 to 1/2/3 hops: 06 "), "{text}");
        assert!(text.contains("A_GroupValue_Write"), "{text}");
    }

    fn priority() -> impl Strategy<Value = Priority> {
        prop_oneof![
            Just(Priority::System),
            Just(Priority::Normal),
            Just(Priority::Urgent),
            Just(Priority::Low),
        ]
    }

    fn l_data() -> impl Strategy<Value = LData> {
        (
            priority(),
            any::<bool>(),
            any::<u16>(),
            any::<u16>(),
            any::<bool>(),
            0u8..=7,
            proptest::collection::vec(any::<u8>(), 1..=255),
        )
            .prop_map(|(priority, repeated, src, dst, group, hop_count, data)| LData {
                priority,
                repeated,
                source: IndividualAddress(src),
                destination: if group {
                    Destination::Group(GroupAddress(dst))
                } else {
                    Destination::Individual(IndividualAddress(dst))
                },
                hop_count,
                data,
                valid_checksum: true,
                valid_length: true,
            })
    }

    proptest! {
        #[test]
        fn l_data_roundtrip(frame in l_data()) {
            let bytes = frame.to_bytes().unwrap();
            prop_assert_eq!(decode_lpdu(&bytes), Lpdu::Data(frame));
        }

        #[test]
        fn corrupted_byte_fails_checksum(frame in l_data(), pos in any::<prop::sample::Index>(), flip in 1u8..=255) {
            let mut bytes = frame.to_bytes().unwrap();
            let pos = pos.index(bytes.len());
            bytes[pos] ^= flip;
            if let Lpdu::Data(decoded) = decode_lpdu(&bytes) {
                prop_assert!(!decoded.valid_checksum);
            }
        }
    }
}
