use super::Apdu;

impl Apdu {
    /// Whether `self` answers `request`.
    pub fn is_response_to(&self, request: &Apdu) -> bool {
        match (self, request) {
            (Self::GroupValueResponse(_), Self::GroupValueRead)
            | (Self::IndividualAddressResponse, Self::IndividualAddressRead)
            | (Self::UserManufacturerInfoResponse { .. }, Self::UserManufacturerInfoRead)
            | (Self::AuthorizeResponse { .. }, Self::AuthorizeRequest { .. })
            | (Self::DomainAddressResponse { .. }, Self::DomainAddressRead)
            | (Self::DomainAddressResponse { .. }, Self::DomainAddressSelectiveRead { .. }) => true,
            (Self::SerialNumberResponse { serial, .. }, Self::SerialNumberRead { serial: asked }) => {
                serial == asked
            }
            (Self::PropertyValueResponse { target, .. }, Self::PropertyValueRead(asked))
            | (Self::PropertyValueResponse { target, .. }, Self::PropertyValueWrite { target: asked, .. }) => {
                target == asked
            }
            (
                Self::PropertyDescriptionResponse { object, .. },
                Self::PropertyDescriptionRead { object: asked, .. },
            ) => object == asked,
            (
                Self::DeviceDescriptorResponse { descriptor_type, .. },
                Self::DeviceDescriptorRead {
                    descriptor_type: asked,
                },
            ) => descriptor_type == asked,
            (
                Self::AdcResponse { channel, count, .. },
                Self::AdcRead {
                    channel: ch,
                    count: n,
                },
            ) => channel == ch && count == n,
            (
                Self::MemoryResponse { address, data },
                Self::MemoryRead {
                    address: asked,
                    count,
                },
            ) => address == asked && data.len() == usize::from(*count),
            (
                Self::UserMemoryResponse {
                    extension,
                    address,
                    data,
                },
                Self::UserMemoryRead {
                    extension: ext,
                    address: asked,
                    count,
                },
            ) => extension == ext && address == asked && data.len() == usize::from(*count),
            (Self::KeyResponse { level }, Self::KeyWrite { level: asked, .. }) => level == asked,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::apdu::{Apdu, GroupValue, PropertyRef};
    use alloc::vec;

    #[test]
    fn group_response_matches_read() {
        let resp = Apdu::GroupValueResponse(GroupValue::Small(1));
        assert!(resp.is_response_to(&Apdu::GroupValueRead));
        assert!(!resp.is_response_to(&Apdu::GroupValueWrite(GroupValue::Small(1))));
    }

    #[test]
    fn memory_response_must_echo_request() {
        let read = Apdu::MemoryRead {
            count: 2,
            address: 0x0100,
        };
        let good = Apdu::MemoryResponse {
            address: 0x0100,
            data: vec![1, 2],
        };
        let short = Apdu::MemoryResponse {
            address: 0x0100,
            data: vec![1],
        };
        assert!(good.is_response_to(&read));
        assert!(!short.is_response_to(&read));
    }

    #[test]
    fn property_response_matches_write() {
        let target = PropertyRef {
            object: 1,
            property: 2,
            count: 1,
            start: 1,
        };
        let resp = Apdu::PropertyValueResponse {
            target,
            data: vec![0],
        };
        assert!(resp.is_response_to(&Apdu::PropertyValueWrite {
            target,
            data: vec![0]
        }));
        let other = PropertyRef { start: 2, ..target };
        assert!(!resp.is_response_to(&Apdu::PropertyValueRead(other)));
    }

    #[test]
    fn serial_response_checks_serial() {
        let resp = Apdu::SerialNumberResponse {
            serial: [1; 6],
            address: crate::IndividualAddress(0x1105),
        };
        assert!(resp.is_response_to(&Apdu::SerialNumberRead { serial: [1; 6] }));
        assert!(!resp.is_response_to(&Apdu::SerialNumberRead { serial: [2; 6] }));
    }
}
