use alloc::vec::Vec;

use crate::address::IndividualAddress;
use crate::encoding::{encode_to_vec, reader::Reader, writer::Writer};
use crate::{DecodeError, EncodeError};

mod correlate;
mod describe;

/// Largest value the 6-bit ("small") group value encoding can carry.
pub const SMALL_VALUE_MAX: u8 = 0x3f;

/// Payload of a `GroupValue_Write` / `GroupValue_Response`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum GroupValue {
    /// Up to 6 bits packed into the APCI byte.
    Small(u8),
    /// One or more bytes following the APCI.
    Long(Vec<u8>),
}

impl GroupValue {
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            Self::Small(v) => alloc::vec![*v],
            Self::Long(data) => data.clone(),
        }
    }
}

/// Selector of an interface-object property element range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PropertyRef {
    pub object: u8,
    pub property: u8,
    /// Number of elements, 4 bits.
    pub count: u8,
    /// First element index, 12 bits.
    pub start: u16,
}

/// Application layer unit.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Apdu {
    GroupValueRead,
    GroupValueResponse(GroupValue),
    GroupValueWrite(GroupValue),
    IndividualAddressWrite {
        address: IndividualAddress,
    },
    IndividualAddressRead,
    IndividualAddressResponse,
    AdcRead {
        channel: u8,
        count: u8,
    },
    AdcResponse {
        channel: u8,
        count: u8,
        value: u16,
    },
    MemoryRead {
        count: u8,
        address: u16,
    },
    MemoryResponse {
        address: u16,
        data: Vec<u8>,
    },
    MemoryWrite {
        address: u16,
        data: Vec<u8>,
    },
    UserMemoryRead {
        extension: u8,
        count: u8,
        address: u16,
    },
    UserMemoryResponse {
        extension: u8,
        address: u16,
        data: Vec<u8>,
    },
    UserMemoryWrite {
        extension: u8,
        address: u16,
        data: Vec<u8>,
    },
    UserMemoryBitWrite {
        address: u16,
        and_mask: Vec<u8>,
        xor_mask: Vec<u8>,
    },
    UserManufacturerInfoRead,
    UserManufacturerInfoResponse {
        manufacturer: u8,
        data: u16,
    },
    DeviceDescriptorRead {
        descriptor_type: u8,
    },
    DeviceDescriptorResponse {
        descriptor_type: u8,
        descriptor: u16,
    },
    Restart,
    MemoryBitWrite {
        address: u16,
        and_mask: Vec<u8>,
        xor_mask: Vec<u8>,
    },
    AuthorizeRequest {
        key: [u8; 4],
    },
    AuthorizeResponse {
        level: u8,
    },
    KeyWrite {
        level: u8,
        key: [u8; 4],
    },
    KeyResponse {
        level: u8,
    },
    PropertyValueRead(PropertyRef),
    PropertyValueResponse {
        target: PropertyRef,
        data: Vec<u8>,
    },
    PropertyValueWrite {
        target: PropertyRef,
        data: Vec<u8>,
    },
    PropertyDescriptionRead {
        object: u8,
        property: u8,
        index: u8,
    },
    PropertyDescriptionResponse {
        object: u8,
        property: u8,
        index: u8,
        property_type: u8,
        max_elements: u16,
        access: u8,
    },
    SerialNumberRead {
        serial: [u8; 6],
    },
    SerialNumberResponse {
        serial: [u8; 6],
        address: IndividualAddress,
    },
    SerialNumberWrite {
        serial: [u8; 6],
        address: IndividualAddress,
    },
    ServiceInformationIndicationWrite {
        verify_mode: bool,
        duplicate_address: bool,
        application_stopped: bool,
    },
    DomainAddressWrite {
        domain: u16,
    },
    DomainAddressRead,
    DomainAddressResponse {
        domain: u16,
    },
    DomainAddressSelectiveRead {
        domain: u16,
        address: IndividualAddress,
        range: u8,
    },
    Unknown(Vec<u8>),
}

fn exact(bytes: &[u8], len: usize) -> Result<(), DecodeError> {
    if bytes.len() != len {
        return Err(DecodeError::InvalidLength);
    }
    Ok(())
}

fn at_least(bytes: &[u8], len: usize) -> Result<(), DecodeError> {
    if bytes.len() < len {
        return Err(DecodeError::UnexpectedEof);
    }
    Ok(())
}

fn group_value(bytes: &[u8]) -> GroupValue {
    if bytes.len() == 2 {
        GroupValue::Small(bytes[1] & SMALL_VALUE_MAX)
    } else {
        GroupValue::Long(bytes[2..].to_vec())
    }
}

fn counted_data(declared: u8, data: &[u8]) -> Result<Vec<u8>, DecodeError> {
    if data.len() != usize::from(declared) {
        return Err(DecodeError::InvalidLength);
    }
    Ok(data.to_vec())
}

fn bit_masks(bytes: &[u8]) -> Result<(u16, Vec<u8>, Vec<u8>), DecodeError> {
    at_least(bytes, 5)?;
    let mut r = Reader::new(&bytes[2..]);
    let count = usize::from(r.read_u8()?);
    let address = r.read_be_u16()?;
    if r.remaining() != count * 2 {
        return Err(DecodeError::InvalidLength);
    }
    let and_mask = r.read_exact(count)?.to_vec();
    let xor_mask = r.read_exact(count)?.to_vec();
    Ok((address, and_mask, xor_mask))
}

fn property_ref(r: &mut Reader<'_>) -> Result<PropertyRef, DecodeError> {
    let object = r.read_u8()?;
    let property = r.read_u8()?;
    let packed = r.read_be_u16()?;
    Ok(PropertyRef {
        object,
        property,
        count: (packed >> 12) as u8,
        start: packed & 0x0fff,
    })
}

impl Apdu {
    /// Decodes an APDU. Length mismatches are errors; bit patterns that name
    /// no known service decode to [`Apdu::Unknown`].
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        at_least(bytes, 2)?;
        let (c0, c1) = (bytes[0], bytes[1]);
        let mut r = Reader::new(&bytes[2..]);
        let pdu = match (c0 & 0x03, c1 & 0xc0) {
            (0, 0x00) => {
                exact(bytes, 2)?;
                Self::GroupValueRead
            }
            (0, 0x40) => Self::GroupValueResponse(group_value(bytes)),
            (0, 0x80) => Self::GroupValueWrite(group_value(bytes)),
            (0, _) => {
                exact(bytes, 4)?;
                Self::IndividualAddressWrite {
                    address: IndividualAddress(r.read_be_u16()?),
                }
            }
            (1, 0x00) => {
                exact(bytes, 2)?;
                Self::IndividualAddressRead
            }
            (1, 0x40) => {
                exact(bytes, 2)?;
                Self::IndividualAddressResponse
            }
            (1, 0x80) => {
                exact(bytes, 3)?;
                Self::AdcRead {
                    channel: c1 & 0x3f,
                    count: r.read_u8()?,
                }
            }
            (1, _) => {
                exact(bytes, 5)?;
                Self::AdcResponse {
                    channel: c1 & 0x3f,
                    count: r.read_u8()?,
                    value: r.read_be_u16()?,
                }
            }
            (2, 0x00) => {
                exact(bytes, 4)?;
                Self::MemoryRead {
                    count: c1 & 0x0f,
                    address: r.read_be_u16()?,
                }
            }
            (2, 0x40) => {
                at_least(bytes, 4)?;
                let address = r.read_be_u16()?;
                Self::MemoryResponse {
                    address,
                    data: counted_data(c1 & 0x0f, r.read_rest())?,
                }
            }
            (2, 0x80) => {
                at_least(bytes, 4)?;
                let address = r.read_be_u16()?;
                Self::MemoryWrite {
                    address,
                    data: counted_data(c1 & 0x0f, r.read_rest())?,
                }
            }
            (2, _) => Self::decode_user(c1, bytes, &mut r)?,
            (3, 0x00) => {
                exact(bytes, 2)?;
                Self::DeviceDescriptorRead {
                    descriptor_type: c1 & 0x3f,
                }
            }
            (3, 0x40) => {
                exact(bytes, 4)?;
                Self::DeviceDescriptorResponse {
                    descriptor_type: c1 & 0x3f,
                    descriptor: r.read_be_u16()?,
                }
            }
            (3, 0x80) => {
                exact(bytes, 2)?;
                Self::Restart
            }
            _ => Self::decode_management(c1, bytes, &mut r)?,
        };
        Ok(pdu)
    }

    fn decode_user(c1: u8, bytes: &[u8], r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let pdu = match c1 {
            0xc0 => {
                exact(bytes, 5)?;
                let packed = r.read_u8()?;
                Self::UserMemoryRead {
                    extension: packed >> 4,
                    count: packed & 0x0f,
                    address: r.read_be_u16()?,
                }
            }
            0xc1 | 0xc2 => {
                at_least(bytes, 5)?;
                let packed = r.read_u8()?;
                let address = r.read_be_u16()?;
                let data = counted_data(packed & 0x0f, r.read_rest())?;
                let extension = packed >> 4;
                if c1 == 0xc1 {
                    Self::UserMemoryResponse {
                        extension,
                        address,
                        data,
                    }
                } else {
                    Self::UserMemoryWrite {
                        extension,
                        address,
                        data,
                    }
                }
            }
            0xc4 => {
                let (address, and_mask, xor_mask) = bit_masks(bytes)?;
                Self::UserMemoryBitWrite {
                    address,
                    and_mask,
                    xor_mask,
                }
            }
            0xc5 => {
                exact(bytes, 2)?;
                Self::UserManufacturerInfoRead
            }
            0xc6 => {
                exact(bytes, 5)?;
                Self::UserManufacturerInfoResponse {
                    manufacturer: r.read_u8()?,
                    data: r.read_be_u16()?,
                }
            }
            _ => Self::Unknown(bytes.to_vec()),
        };
        Ok(pdu)
    }

    fn decode_management(c1: u8, bytes: &[u8], r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let pdu = match c1 {
            0xd0 => {
                let (address, and_mask, xor_mask) = bit_masks(bytes)?;
                Self::MemoryBitWrite {
                    address,
                    and_mask,
                    xor_mask,
                }
            }
            0xd1 => {
                exact(bytes, 7)?;
                r.skip(1)?;
                Self::AuthorizeRequest {
                    key: r.read_array()?,
                }
            }
            0xd2 => {
                exact(bytes, 3)?;
                Self::AuthorizeResponse { level: r.read_u8()? }
            }
            0xd3 => {
                exact(bytes, 7)?;
                Self::KeyWrite {
                    level: r.read_u8()?,
                    key: r.read_array()?,
                }
            }
            0xd4 => {
                exact(bytes, 3)?;
                Self::KeyResponse { level: r.read_u8()? }
            }
            0xd5 => {
                exact(bytes, 6)?;
                Self::PropertyValueRead(property_ref(r)?)
            }
            0xd6 | 0xd7 => {
                at_least(bytes, 6)?;
                let target = property_ref(r)?;
                let data = r.read_rest().to_vec();
                if c1 == 0xd6 {
                    Self::PropertyValueResponse { target, data }
                } else {
                    Self::PropertyValueWrite { target, data }
                }
            }
            0xd8 => {
                exact(bytes, 5)?;
                Self::PropertyDescriptionRead {
                    object: r.read_u8()?,
                    property: r.read_u8()?,
                    index: r.read_u8()?,
                }
            }
            0xd9 => {
                exact(bytes, 9)?;
                Self::PropertyDescriptionResponse {
                    object: r.read_u8()?,
                    property: r.read_u8()?,
                    index: r.read_u8()?,
                    property_type: r.read_u8()?,
                    max_elements: r.read_be_u16()?,
                    access: r.read_u8()?,
                }
            }
            0xdc => {
                exact(bytes, 8)?;
                Self::SerialNumberRead {
                    serial: r.read_array()?,
                }
            }
            0xdd => {
                exact(bytes, 12)?;
                Self::SerialNumberResponse {
                    serial: r.read_array()?,
                    address: IndividualAddress(r.read_be_u16()?),
                }
            }
            0xde => {
                exact(bytes, 14)?;
                Self::SerialNumberWrite {
                    serial: r.read_array()?,
                    address: IndividualAddress(r.read_be_u16()?),
                }
            }
            0xdf => {
                exact(bytes, 5)?;
                let info = r.read_u8()?;
                Self::ServiceInformationIndicationWrite {
                    verify_mode: info & 0x04 != 0,
                    duplicate_address: info & 0x02 != 0,
                    application_stopped: info & 0x01 != 0,
                }
            }
            0xe0 => {
                exact(bytes, 4)?;
                Self::DomainAddressWrite {
                    domain: r.read_be_u16()?,
                }
            }
            0xe1 => {
                exact(bytes, 2)?;
                Self::DomainAddressRead
            }
            0xe2 => {
                exact(bytes, 4)?;
                Self::DomainAddressResponse {
                    domain: r.read_be_u16()?,
                }
            }
            0xe3 => {
                exact(bytes, 7)?;
                Self::DomainAddressSelectiveRead {
                    domain: r.read_be_u16()?,
                    address: IndividualAddress(r.read_be_u16()?),
                    range: r.read_u8()?,
                }
            }
            _ => Self::Unknown(bytes.to_vec()),
        };
        Ok(pdu)
    }

    /// Decodes, preserving malformed input as [`Apdu::Unknown`].
    pub fn decode_lossy(bytes: &[u8]) -> Self {
        Self::decode(bytes).unwrap_or_else(|_| Self::Unknown(bytes.to_vec()))
    }

    pub fn encoded_len(&self) -> usize {
        match self {
            Self::GroupValueResponse(GroupValue::Long(d)) | Self::GroupValueWrite(GroupValue::Long(d)) => {
                2 + d.len()
            }
            Self::MemoryResponse { data, .. } | Self::MemoryWrite { data, .. } => 4 + data.len(),
            Self::UserMemoryResponse { data, .. } | Self::UserMemoryWrite { data, .. } => {
                5 + data.len()
            }
            Self::UserMemoryBitWrite { and_mask, .. } | Self::MemoryBitWrite { and_mask, .. } => {
                5 + 2 * and_mask.len()
            }
            Self::PropertyValueResponse { data, .. } | Self::PropertyValueWrite { data, .. } => {
                6 + data.len()
            }
            Self::IndividualAddressWrite { .. }
            | Self::MemoryRead { .. }
            | Self::DeviceDescriptorResponse { .. }
            | Self::DomainAddressWrite { .. }
            | Self::DomainAddressResponse { .. } => 4,
            Self::AdcRead { .. } | Self::AuthorizeResponse { .. } | Self::KeyResponse { .. } => 3,
            Self::AdcResponse { .. }
            | Self::UserMemoryRead { .. }
            | Self::UserManufacturerInfoResponse { .. }
            | Self::PropertyDescriptionRead { .. }
            | Self::ServiceInformationIndicationWrite { .. } => 5,
            Self::PropertyValueRead(_) => 6,
            Self::AuthorizeRequest { .. } | Self::KeyWrite { .. } | Self::DomainAddressSelectiveRead { .. } => 7,
            Self::SerialNumberRead { .. } => 8,
            Self::PropertyDescriptionResponse { .. } => 9,
            Self::SerialNumberResponse { .. } => 12,
            Self::SerialNumberWrite { .. } => 14,
            Self::Unknown(raw) => raw.len(),
            _ => 2,
        }
    }

    pub fn encode(&self, w: &mut Writer<'_>) -> Result<(), EncodeError> {
        match self {
            Self::GroupValueRead => header(w, 0x00, 0x00),
            Self::GroupValueResponse(value) => write_group_value(w, 0x40, value),
            Self::GroupValueWrite(value) => write_group_value(w, 0x80, value),
            Self::IndividualAddressWrite { address } => {
                header(w, 0x00, 0xc0)?;
                w.write_be_u16(address.raw())
            }
            Self::IndividualAddressRead => header(w, 0x01, 0x00),
            Self::IndividualAddressResponse => header(w, 0x01, 0x40),
            Self::AdcRead { channel, count } => {
                header(w, 0x01, 0x80 | six_bits(*channel)?)?;
                w.write_u8(*count)
            }
            Self::AdcResponse {
                channel,
                count,
                value,
            } => {
                header(w, 0x01, 0xc0 | six_bits(*channel)?)?;
                w.write_u8(*count)?;
                w.write_be_u16(*value)
            }
            Self::MemoryRead { count, address } => {
                header(w, 0x02, four_bits(*count)?)?;
                w.write_be_u16(*address)
            }
            Self::MemoryResponse { address, data } => write_memory(w, 0x40, *address, data),
            Self::MemoryWrite { address, data } => write_memory(w, 0x80, *address, data),
            Self::UserMemoryRead {
                extension,
                count,
                address,
            } => {
                header(w, 0x02, 0xc0)?;
                w.write_u8(four_bits(*extension)? << 4 | four_bits(*count)?)?;
                w.write_be_u16(*address)
            }
            Self::UserMemoryResponse {
                extension,
                address,
                data,
            } => write_user_memory(w, 0xc1, *extension, *address, data),
            Self::UserMemoryWrite {
                extension,
                address,
                data,
            } => write_user_memory(w, 0xc2, *extension, *address, data),
            Self::UserMemoryBitWrite {
                address,
                and_mask,
                xor_mask,
            } => write_bit_masks(w, 0x02, 0xc4, *address, and_mask, xor_mask),
            Self::UserManufacturerInfoRead => header(w, 0x02, 0xc5),
            Self::UserManufacturerInfoResponse { manufacturer, data } => {
                header(w, 0x02, 0xc6)?;
                w.write_u8(*manufacturer)?;
                w.write_be_u16(*data)
            }
            Self::DeviceDescriptorRead { descriptor_type } => {
                header(w, 0x03, six_bits(*descriptor_type)?)
            }
            Self::DeviceDescriptorResponse {
                descriptor_type,
                descriptor,
            } => {
                header(w, 0x03, 0x40 | six_bits(*descriptor_type)?)?;
                w.write_be_u16(*descriptor)
            }
            Self::Restart => header(w, 0x03, 0x80),
            Self::MemoryBitWrite {
                address,
                and_mask,
                xor_mask,
            } => write_bit_masks(w, 0x03, 0xd0, *address, and_mask, xor_mask),
            Self::AuthorizeRequest { key } => {
                header(w, 0x03, 0xd1)?;
                w.write_u8(0)?;
                w.write_all(key)
            }
            Self::AuthorizeResponse { level } => {
                header(w, 0x03, 0xd2)?;
                w.write_u8(*level)
            }
            Self::KeyWrite { level, key } => {
                header(w, 0x03, 0xd3)?;
                w.write_u8(*level)?;
                w.write_all(key)
            }
            Self::KeyResponse { level } => {
                header(w, 0x03, 0xd4)?;
                w.write_u8(*level)
            }
            Self::PropertyValueRead(target) => {
                header(w, 0x03, 0xd5)?;
                write_property_ref(w, target)
            }
            Self::PropertyValueResponse { target, data } => {
                header(w, 0x03, 0xd6)?;
                write_property_ref(w, target)?;
                w.write_all(data)
            }
            Self::PropertyValueWrite { target, data } => {
                header(w, 0x03, 0xd7)?;
                write_property_ref(w, target)?;
                w.write_all(data)
            }
            Self::PropertyDescriptionRead {
                object,
                property,
                index,
            } => {
                header(w, 0x03, 0xd8)?;
                w.write_all(&[*object, *property, *index])
            }
            Self::PropertyDescriptionResponse {
                object,
                property,
                index,
                property_type,
                max_elements,
                access,
            } => {
                header(w, 0x03, 0xd9)?;
                w.write_all(&[*object, *property, *index, *property_type])?;
                w.write_be_u16(*max_elements)?;
                w.write_u8(*access)
            }
            Self::SerialNumberRead { serial } => {
                header(w, 0x03, 0xdc)?;
                w.write_all(serial)
            }
            Self::SerialNumberResponse { serial, address } => {
                header(w, 0x03, 0xdd)?;
                w.write_all(serial)?;
                w.write_be_u16(address.raw())?;
                w.write_all(&[0; 2])
            }
            Self::SerialNumberWrite { serial, address } => {
                header(w, 0x03, 0xde)?;
                w.write_all(serial)?;
                w.write_be_u16(address.raw())?;
                w.write_all(&[0; 4])
            }
            Self::ServiceInformationIndicationWrite {
                verify_mode,
                duplicate_address,
                application_stopped,
            } => {
                header(w, 0x03, 0xdf)?;
                let mut info = 0u8;
                if *verify_mode {
                    info |= 0x04;
                }
                if *duplicate_address {
                    info |= 0x02;
                }
                if *application_stopped {
                    info |= 0x01;
                }
                w.write_all(&[info, 0, 0])
            }
            Self::DomainAddressWrite { domain } => {
                header(w, 0x03, 0xe0)?;
                w.write_be_u16(*domain)
            }
            Self::DomainAddressRead => header(w, 0x03, 0xe1),
            Self::DomainAddressResponse { domain } => {
                header(w, 0x03, 0xe2)?;
                w.write_be_u16(*domain)
            }
            Self::DomainAddressSelectiveRead {
                domain,
                address,
                range,
            } => {
                header(w, 0x03, 0xe3)?;
                w.write_be_u16(*domain)?;
                w.write_be_u16(address.raw())?;
                w.write_u8(*range)
            }
            Self::Unknown(raw) => w.write_all(raw),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> {
        encode_to_vec(self.encoded_len(), |w| self.encode(w))
    }
}

fn header(w: &mut Writer<'_>, c0: u8, c1: u8) -> Result<(), EncodeError> {
    w.write_u8(c0)?;
    w.write_u8(c1)
}

fn six_bits(v: u8) -> Result<u8, EncodeError> {
    if v > 0x3f {
        return Err(EncodeError::ValueOutOfRange);
    }
    Ok(v)
}

fn four_bits(v: u8) -> Result<u8, EncodeError> {
    if v > 0x0f {
        return Err(EncodeError::ValueOutOfRange);
    }
    Ok(v)
}

fn data_count(data: &[u8]) -> Result<u8, EncodeError> {
    if data.len() > 0x0f {
        return Err(EncodeError::InvalidLength);
    }
    Ok(data.len() as u8)
}

fn write_group_value(w: &mut Writer<'_>, apci: u8, value: &GroupValue) -> Result<(), EncodeError> {
    match value {
        GroupValue::Small(v) => header(w, 0x00, apci | six_bits(*v)?),
        GroupValue::Long(data) => {
            if data.is_empty() {
                return Err(EncodeError::InvalidLength);
            }
            header(w, 0x00, apci)?;
            w.write_all(data)
        }
    }
}

fn write_memory(w: &mut Writer<'_>, apci: u8, address: u16, data: &[u8]) -> Result<(), EncodeError> {
    header(w, 0x02, apci | data_count(data)?)?;
    w.write_be_u16(address)?;
    w.write_all(data)
}

fn write_user_memory(
    w: &mut Writer<'_>,
    c1: u8,
    extension: u8,
    address: u16,
    data: &[u8],
) -> Result<(), EncodeError> {
    header(w, 0x02, c1)?;
    w.write_u8(four_bits(extension)? << 4 | data_count(data)?)?;
    w.write_be_u16(address)?;
    w.write_all(data)
}

fn write_bit_masks(
    w: &mut Writer<'_>,
    c0: u8,
    c1: u8,
    address: u16,
    and_mask: &[u8],
    xor_mask: &[u8],
) -> Result<(), EncodeError> {
    if and_mask.len() != xor_mask.len() || and_mask.len() > usize::from(u8::MAX) {
        return Err(EncodeError::InvalidLength);
    }
    header(w, c0, c1)?;
    w.write_u8(and_mask.len() as u8)?;
    w.write_be_u16(address)?;
    w.write_all(and_mask)?;
    w.write_all(xor_mask)
}

fn write_property_ref(w: &mut Writer<'_>, target: &PropertyRef) -> Result<(), EncodeError> {
    if target.start > 0x0fff {
        return Err(EncodeError::ValueOutOfRange);
    }
    w.write_u8(target.object)?;
    w.write_u8(target.property)?;
    w.write_be_u16(u16::from(four_bits(target.count)?) << 12 | target.start)
}

#[cfg(test)]
mod tests {
    use super::{Apdu, GroupValue, PropertyRef};
    use crate::address::IndividualAddress;
    use crate::DecodeError;
    use alloc::vec;

    #[test]
    fn small_group_write() {
        let apdu = Apdu::decode(&[0x00, 0x80]).unwrap();
        assert_eq!(apdu, Apdu::GroupValueWrite(GroupValue::Small(0)));
        assert_eq!(Apdu::GroupValueWrite(GroupValue::Small(1)).to_bytes().unwrap(), [0x00, 0x81]);
    }

    #[test]
    fn long_group_response() {
        let apdu = Apdu::decode(&[0x00, 0x40, 0x0C, 0x1A]).unwrap();
        assert_eq!(apdu, Apdu::GroupValueResponse(GroupValue::Long(vec![0x0C, 0x1A])));
        assert_eq!(apdu.to_bytes().unwrap(), [0x00, 0x40, 0x0C, 0x1A]);
    }

    #[test]
    fn group_read_must_be_exact() {
        assert_eq!(Apdu::decode(&[0x00, 0x00]).unwrap(), Apdu::GroupValueRead);
        assert_eq!(Apdu::decode(&[0x00, 0x00, 0x01]), Err(DecodeError::InvalidLength));
        assert_eq!(Apdu::decode(&[0x00]), Err(DecodeError::UnexpectedEof));
    }

    #[test]
    fn memory_response_count_must_match() {
        let ok = [0x02, 0x42, 0x10, 0x00, 0xAA, 0xBB];
        assert_eq!(
            Apdu::decode(&ok).unwrap(),
            Apdu::MemoryResponse {
                address: 0x1000,
                data: vec![0xAA, 0xBB]
            }
        );
        assert_eq!(
            Apdu::decode(&[0x02, 0x43, 0x10, 0x00, 0xAA, 0xBB]),
            Err(DecodeError::InvalidLength)
        );
    }

    #[test]
    fn property_value_read_packs_count_and_start() {
        let apdu = Apdu::PropertyValueRead(PropertyRef {
            object: 0,
            property: 0x0b,
            count: 1,
            start: 0x123,
        });
        let bytes = apdu.to_bytes().unwrap();
        assert_eq!(bytes, [0x03, 0xD5, 0x00, 0x0B, 0x11, 0x23]);
        assert_eq!(Apdu::decode(&bytes).unwrap(), apdu);
    }

    #[test]
    fn serial_number_write_uses_own_code() {
        let apdu = Apdu::SerialNumberWrite {
            serial: [0, 1, 2, 3, 4, 5],
            address: IndividualAddress::new(1, 1, 20),
        };
        let bytes = apdu.to_bytes().unwrap();
        assert_eq!(bytes.len(), 14);
        assert_eq!(bytes[1], 0xDE);
        assert_eq!(Apdu::decode(&bytes).unwrap(), apdu);
    }

    #[test]
    fn domain_selective_read_keeps_all_fields() {
        let apdu = Apdu::DomainAddressSelectiveRead {
            domain: 0x1234,
            address: IndividualAddress(0x1101),
            range: 9,
        };
        let bytes = apdu.to_bytes().unwrap();
        assert_eq!(bytes, [0x03, 0xE3, 0x12, 0x34, 0x11, 0x01, 0x09]);
        assert_eq!(Apdu::decode(&bytes).unwrap(), apdu);
    }

    #[test]
    fn device_descriptor_response_code() {
        let apdu = Apdu::DeviceDescriptorResponse {
            descriptor_type: 0,
            descriptor: 0x0012,
        };
        assert_eq!(apdu.to_bytes().unwrap(), [0x03, 0x40, 0x00, 0x12]);
    }

    #[test]
    fn bit_write_masks_must_pair() {
        let bytes = [0x03, 0xD0, 0x01, 0x01, 0x00, 0xF0, 0x0F];
        assert_eq!(
            Apdu::decode(&bytes).unwrap(),
            Apdu::MemoryBitWrite {
                address: 0x0100,
                and_mask: vec![0xF0],
                xor_mask: vec![0x0F]
            }
        );
        assert_eq!(Apdu::decode(&bytes[..6]), Err(DecodeError::InvalidLength));
    }

    #[test]
    fn unassigned_codes_are_unknown() {
        assert_eq!(Apdu::decode(&[0x03, 0xDA]).unwrap(), Apdu::Unknown(vec![0x03, 0xDA]));
        assert_eq!(Apdu::decode(&[0x02, 0xC3]).unwrap(), Apdu::Unknown(vec![0x02, 0xC3]));
        assert_eq!(Apdu::decode_lossy(&[0x01]), Apdu::Unknown(vec![0x01]));
    }

    #[test]
    fn encoded_len_matches_output() {
        let samples = [
            Apdu::Restart,
            Apdu::AdcResponse {
                channel: 3,
                count: 8,
                value: 0x0400,
            },
            Apdu::UserMemoryWrite {
                extension: 1,
                address: 0x0200,
                data: vec![1, 2, 3],
            },
            Apdu::PropertyDescriptionResponse {
                object: 0,
                property: 1,
                index: 2,
                property_type: 4,
                max_elements: 1,
                access: 0x32,
            },
            Apdu::ServiceInformationIndicationWrite {
                verify_mode: true,
                duplicate_address: true,
                application_stopped: false,
            },
            Apdu::KeyWrite {
                level: 2,
                key: [0xFF; 4],
            },
        ];
        for apdu in samples {
            let bytes = apdu.to_bytes().unwrap();
            assert_eq!(bytes.len(), apdu.encoded_len());
            assert_eq!(Apdu::decode(&bytes).unwrap(), apdu);
        }
    }
}
