use core::fmt;

use super::{Apdu, GroupValue, PropertyRef};
use crate::encoding::Hex;

impl fmt::Display for GroupValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Small(v) => write!(f, "(small) {v:02X}"),
            Self::Long(data) => write!(f, "{}", Hex(data)),
        }
    }
}

impl fmt::Display for PropertyRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Obj:{:02} Prop:{:02} start:{:04} max_nr:{:02}",
            self.object, self.property, self.start, self.count
        )
    }
}

impl fmt::Display for Apdu {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::GroupValueRead => f.write_str("A_GroupValue_Read"),
            Self::GroupValueResponse(v) => write!(f, "A_GroupValue_Response {v}"),
            Self::GroupValueWrite(v) => write!(f, "A_GroupValue_Write {v}"),
            Self::IndividualAddressWrite { address } => {
                write!(f, "A_IndividualAddress_Write {address}")
            }
            Self::IndividualAddressRead => f.write_str("A_IndividualAddress_Read"),
            Self::IndividualAddressResponse => f.write_str("A_IndividualAddress_Response"),
            Self::AdcRead { channel, count } => {
                write!(f, "A_ADC_Read Channel: {channel:02} Count: {count:02}")
            }
            Self::AdcResponse {
                channel,
                count,
                value,
            } => write!(
                f,
                "A_ADC_Response Channel: {channel:02} Count: {count:02} Value: {value:04X}"
            ),
            Self::MemoryRead { count, address } => {
                write!(f, "A_Memory_Read Len: {count:02} Addr: {address:04X}")
            }
            Self::MemoryResponse { address, data } => write!(
                f,
                "A_Memory_Response Len: {:02} Addr: {address:04X} Data: {}",
                data.len(),
                Hex(data)
            ),
            Self::MemoryWrite { address, data } => write!(
                f,
                "A_Memory_Write Len: {:02} Addr: {address:04X} Data: {}",
                data.len(),
                Hex(data)
            ),
            Self::UserMemoryRead {
                extension,
                count,
                address,
            } => write!(
                f,
                "A_UserMemory_Read Len: {count:02} Addr: {extension:X}{address:04X}"
            ),
            Self::UserMemoryResponse {
                extension,
                address,
                data,
            } => write!(
                f,
                "A_UserMemory_Response Len: {:02} Addr: {extension:X}{address:04X} Data: {}",
                data.len(),
                Hex(data)
            ),
            Self::UserMemoryWrite {
                extension,
                address,
                data,
            } => write!(
                f,
                "A_UserMemory_Write Len: {:02} Addr: {extension:X}{address:04X} Data: {}",
                data.len(),
                Hex(data)
            ),
            Self::UserMemoryBitWrite {
                address,
                and_mask,
                xor_mask,
            } => write!(
                f,
                "A_UserMemoryBit_Write Addr: {address:04X} And: {} Xor: {}",
                Hex(and_mask),
                Hex(xor_mask)
            ),
            Self::UserManufacturerInfoRead => f.write_str("A_UserManufacturerInfo_Read"),
            Self::UserManufacturerInfoResponse { manufacturer, data } => write!(
                f,
                "A_UserManufacturerInfo_Response Manufacturer: {manufacturer:02X} Data: {data:04X}"
            ),
            Self::DeviceDescriptorRead { descriptor_type } => {
                write!(f, "A_DeviceDescriptor_Read Type: {descriptor_type:02}")
            }
            Self::DeviceDescriptorResponse {
                descriptor_type,
                descriptor,
            } => write!(
                f,
                "A_DeviceDescriptor_Response Type: {descriptor_type:02} Descriptor: {descriptor:04X}"
            ),
            Self::Restart => f.write_str("A_Restart"),
            Self::MemoryBitWrite {
                address,
                and_mask,
                xor_mask,
            } => write!(
                f,
                "A_MemoryBit_Write Addr: {address:04X} And: {} Xor: {}",
                Hex(and_mask),
                Hex(xor_mask)
            ),
            Self::AuthorizeRequest { key } => write!(f, "A_Authorize_Request Key: {}", Hex(key)),
            Self::AuthorizeResponse { level } => {
                write!(f, "A_Authorize_Response Level: {level:02}")
            }
            Self::KeyWrite { level, key } => {
                write!(f, "A_Key_Write Level: {level:02} Key: {}", Hex(key))
            }
            Self::KeyResponse { level } => write!(f, "A_Key_Response Level: {level:02}"),
            Self::PropertyValueRead(target) => write!(f, "A_PropertyValue_Read {target}"),
            Self::PropertyValueResponse { target, data } => {
                write!(f, "A_PropertyValue_Response {target} Data: {}", Hex(data))
            }
            Self::PropertyValueWrite { target, data } => {
                write!(f, "A_PropertyValue_Write {target} Data: {}", Hex(data))
            }
            Self::PropertyDescriptionRead {
                object,
                property,
                index,
            } => write!(
                f,
                "A_PropertyDescription_Read Obj:{object:02} Prop:{property:02} Index:{index:02}"
            ),
            Self::PropertyDescriptionResponse {
                object,
                property,
                index,
                property_type,
                max_elements,
                access,
            } => write!(
                f,
                "A_PropertyDescription_Response Obj:{object:02} Prop:{property:02} Index:{index:02} \
                 Type:{property_type:02} Max_Nr:{max_elements:04} Access:{access:02X}"
            ),
            Self::SerialNumberRead { serial } => {
                write!(f, "A_SerialNumber_Read Serial: {}", Hex(serial))
            }
            Self::SerialNumberResponse { serial, address } => write!(
                f,
                "A_SerialNumber_Response Serial: {} Addr: {address}",
                Hex(serial)
            ),
            Self::SerialNumberWrite { serial, address } => write!(
                f,
                "A_SerialNumber_Write Serial: {} Addr: {address}",
                Hex(serial)
            ),
            Self::ServiceInformationIndicationWrite {
                verify_mode,
                duplicate_address,
                application_stopped,
            } => {
                f.write_str("A_ServiceInformation_Indication_Write")?;
                if *verify_mode {
                    f.write_str(" verify mode")?;
                }
                if *duplicate_address {
                    f.write_str(" duplicate address")?;
                }
                if *application_stopped {
                    f.write_str(" application stopped")?;
                }
                Ok(())
            }
            Self::DomainAddressWrite { domain } => {
                write!(f, "A_DomainAddress_Write Domain: {domain:04X}")
            }
            Self::DomainAddressRead => f.write_str("A_DomainAddress_Read"),
            Self::DomainAddressResponse { domain } => {
                write!(f, "A_DomainAddress_Response Domain: {domain:04X}")
            }
            Self::DomainAddressSelectiveRead {
                domain,
                address,
                range,
            } => write!(
                f,
                "A_DomainAddressSelective_Read Domain: {domain:04X} Addr: {address} Range: {range:02X}"
            ),
            Self::Unknown(raw) => write!(f, "Unknown APDU: {}", Hex(raw)),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::apdu::{Apdu, GroupValue};
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn group_value_text() {
        assert_eq!(
            Apdu::GroupValueWrite(GroupValue::Small(0)).to_string(),
            "A_GroupValue_Write (small) 00"
        );
        assert_eq!(
            Apdu::GroupValueResponse(GroupValue::Long(vec![0x0C, 0x1A])).to_string(),
            "A_GroupValue_Response 0C 1A"
        );
    }

    #[test]
    fn memory_read_text() {
        let apdu = Apdu::MemoryRead {
            count: 1,
            address: 0x0060,
        };
        assert_eq!(apdu.to_string(), "A_Memory_Read Len: 01 Addr: 0060");
    }
}
