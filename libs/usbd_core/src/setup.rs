//! The 8-byte SETUP packet and the chapter 9 request vocabulary.

use num_enum::TryFromPrimitive;

use crate::UsbDirection;

/// `wValue` selector for CLEAR_FEATURE / SET_FEATURE on an endpoint.
pub const FEATURE_ENDPOINT_HALT: u16 = 0;
/// `wValue` selector for CLEAR_FEATURE / SET_FEATURE on the device.
pub const FEATURE_DEVICE_REMOTE_WAKEUP: u16 = 1;

/// Request type bits 6..5 of `bmRequestType`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum RequestKind {
    Standard = 0,
    Class = 1,
    Vendor = 2,
    Reserved = 3,
}

/// Recipient bits 4..0 of `bmRequestType`. Values above `Other` are
/// reserved and mapped to `Other` during parsing.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum Recipient {
    Device = 0,
    Interface = 1,
    Endpoint = 2,
    Other = 3,
}

/// Standard request codes (USB 2.0 table 9-4).
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum StandardRequest {
    GetStatus = 0x00,
    ClearFeature = 0x01,
    SetFeature = 0x03,
    SetAddress = 0x05,
    GetDescriptor = 0x06,
    SetDescriptor = 0x07,
    GetConfiguration = 0x08,
    SetConfiguration = 0x09,
    GetInterface = 0x0a,
    SetInterface = 0x0b,
    SynchFrame = 0x0c,
}

/// Descriptor type codes (USB 2.0 table 9-5, plus BOS types from USB 3.x
/// that full-speed hosts still probe for).
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum DescriptorType {
    Device = 1,
    Configuration = 2,
    String = 3,
    Interface = 4,
    Endpoint = 5,
    DeviceQualifier = 6,
    OtherSpeedConfiguration = 7,
    InterfacePower = 8,
    Otg = 9,
    Debug = 10,
    InterfaceAssociation = 11,
    Bos = 15,
    DeviceCapability = 16,
}

/// A parsed SETUP packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct SetupPacket {
    pub direction: UsbDirection,
    pub kind: RequestKind,
    pub recipient: Recipient,
    pub request: u8,
    pub value: u16,
    pub index: u16,
    pub length: u16,
}

impl SetupPacket {
    /// Decode the raw 8 bytes the controller latched.
    pub fn parse(raw: &[u8; 8]) -> Self {
        let bm_request_type = raw[0];
        let direction = if bm_request_type & 0x80 != 0 { UsbDirection::In } else { UsbDirection::Out };
        // Bits 6..5; all four values are covered.
        let kind = RequestKind::try_from((bm_request_type >> 5) & 0x03).unwrap_or(RequestKind::Reserved);
        let recipient = match bm_request_type & 0x1f {
            0 => Recipient::Device,
            1 => Recipient::Interface,
            2 => Recipient::Endpoint,
            _ => Recipient::Other,
        };
        SetupPacket {
            direction,
            kind,
            recipient,
            request: raw[1],
            value: u16::from_le_bytes([raw[2], raw[3]]),
            index: u16::from_le_bytes([raw[4], raw[5]]),
            length: u16::from_le_bytes([raw[6], raw[7]]),
        }
    }

    /// Descriptor type byte of a GET_DESCRIPTOR request (high byte of
    /// `wValue`).
    pub fn descriptor_type(&self) -> u8 {
        (self.value >> 8) as u8
    }

    /// Descriptor index of a GET_DESCRIPTOR request (low byte of `wValue`).
    pub fn descriptor_index(&self) -> u8 {
        self.value as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_get_descriptor() {
        // GET_DESCRIPTOR(DEVICE), wLength = 8
        let pkt = SetupPacket::parse(&[0x80, 0x06, 0x00, 0x01, 0x00, 0x00, 0x08, 0x00]);
        assert_eq!(pkt.direction, UsbDirection::In);
        assert_eq!(pkt.kind, RequestKind::Standard);
        assert_eq!(pkt.recipient, Recipient::Device);
        assert_eq!(StandardRequest::try_from(pkt.request), Ok(StandardRequest::GetDescriptor));
        assert_eq!(pkt.descriptor_type(), DescriptorType::Device as u8);
        assert_eq!(pkt.descriptor_index(), 0);
        assert_eq!(pkt.length, 8);
    }

    #[test]
    fn parses_class_interface_request() {
        // SET_LINE_CODING to interface 1
        let pkt = SetupPacket::parse(&[0x21, 0x20, 0x00, 0x00, 0x01, 0x00, 0x07, 0x00]);
        assert_eq!(pkt.direction, UsbDirection::Out);
        assert_eq!(pkt.kind, RequestKind::Class);
        assert_eq!(pkt.recipient, Recipient::Interface);
        assert_eq!(pkt.index, 1);
        assert_eq!(pkt.length, 7);
    }
}
