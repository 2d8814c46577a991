//! Response blocks the device serves. LBA and counts are big-endian.

use packing::{Packed, PackedSize};

use super::{ResponseCode, SenseKey};

/// Standard INQUIRY data (36 bytes): direct-access, removable, plus the
/// vendor/product/revision ASCII fields.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct InquiryResponse {
    #[pkd(7, 5, 0, 0)]
    pub peripheral_qualifier: u8,

    #[pkd(4, 0, 0, 0)]
    pub peripheral_device_type: u8,

    #[pkd(7, 7, 1, 1)]
    pub removable_media: bool,

    #[pkd(7, 0, 2, 2)]
    pub version: u8,

    #[pkd(3, 0, 3, 3)]
    pub response_data_format: u8,

    /// Number of bytes following this one, i.e. total size - 5.
    #[pkd(7, 0, 4, 4)]
    pub additional_length: u8,

    #[pkd(7, 0, 5, 5)]
    pub flags1: u8,

    #[pkd(7, 0, 6, 6)]
    pub flags2: u8,

    #[pkd(7, 0, 7, 7)]
    pub flags3: u8,

    #[pkd(7, 0, 8, 15)]
    pub vendor_id: [u8; 8],

    #[pkd(7, 0, 16, 31)]
    pub product_id: [u8; 16],

    #[pkd(7, 0, 32, 35)]
    pub product_rev: [u8; 4],
}

impl Default for InquiryResponse {
    fn default() -> Self {
        InquiryResponse {
            peripheral_qualifier: 0, // connected to this LUN
            peripheral_device_type: 0, // SBC direct access
            removable_media: true,
            version: 0, // no standard claimed
            response_data_format: 2,
            additional_length: Self::BYTES as u8 - 5,
            flags1: 0,
            flags2: 0,
            flags3: 0,
            vendor_id: [b' '; 8],
            product_id: [b' '; 16],
            product_rev: [b' '; 4],
        }
    }
}

fn fill_padded(field: &mut [u8], s: &str) {
    field.fill(b' ');
    let n = s.len().min(field.len());
    field[..n].copy_from_slice(&s.as_bytes()[..n]);
}

impl InquiryResponse {
    /// ASCII vendor identification, truncated/space-padded to 8 bytes.
    pub fn set_vendor_id(&mut self, s: &str) {
        if s.len() > self.vendor_id.len() {
            log::warn!("SCSI vendor id too long, truncated");
        }
        fill_padded(&mut self.vendor_id, s);
    }

    /// ASCII product identification, truncated/space-padded to 16 bytes.
    pub fn set_product_id(&mut self, s: &str) {
        if s.len() > self.product_id.len() {
            log::warn!("SCSI product id too long, truncated");
        }
        fill_padded(&mut self.product_id, s);
    }

    /// ASCII product revision, truncated/space-padded to 4 bytes.
    pub fn set_product_rev(&mut self, s: &str) {
        if s.len() > self.product_rev.len() {
            log::warn!("SCSI product rev too long, truncated");
        }
        fill_padded(&mut self.product_rev, s);
    }
}

/// Fixed-format sense data (18 bytes), latched between commands and
/// served on REQUEST SENSE.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct RequestSenseResponse {
    #[pkd(7, 7, 0, 0)]
    pub valid: bool,

    #[pkd(6, 0, 0, 0)]
    pub response_code: ResponseCode,

    #[pkd(7, 0, 1, 1)]
    pub obsolete: u8,

    #[pkd(3, 0, 2, 2)]
    pub sense_key: SenseKey,

    #[pkd(7, 0, 3, 6)]
    pub information: u32,

    /// Number of bytes following this one, i.e. total size - 8.
    #[pkd(7, 0, 7, 7)]
    pub additional_sense_length: u8,

    #[pkd(7, 0, 8, 11)]
    pub command_specific_information: u32,

    #[pkd(7, 0, 12, 12)]
    pub additional_sense_code: u8,

    #[pkd(7, 0, 13, 13)]
    pub additional_sense_qualifier: u8,

    #[pkd(7, 0, 14, 14)]
    pub field_replaceable_unit_code: u8,

    #[pkd(7, 0, 15, 17)]
    pub sense_key_specific: [u8; 3],
}

impl Default for RequestSenseResponse {
    fn default() -> Self {
        RequestSenseResponse {
            valid: true,
            response_code: ResponseCode::CurrentError,
            obsolete: 0,
            sense_key: SenseKey::NoSense,
            information: 0,
            additional_sense_length: Self::BYTES as u8 - 8,
            command_specific_information: 0,
            additional_sense_code: 0,
            additional_sense_qualifier: 0,
            field_replaceable_unit_code: 0,
            sense_key_specific: [0; 3],
        }
    }
}

impl RequestSenseResponse {
    pub fn set(&mut self, key: SenseKey, (asc, ascq): (u8, u8)) {
        self.sense_key = key;
        self.additional_sense_code = asc;
        self.additional_sense_qualifier = ascq;
    }

    pub fn reset(&mut self) {
        self.set(SenseKey::NoSense, (0, 0));
    }
}

/// READ CAPACITY (10): last addressable LBA and the block size, both
/// big-endian.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default, Packed)]
#[packed(big_endian, lsb0)]
pub struct ReadCapacity10Response {
    #[pkd(7, 0, 0, 3)]
    pub last_lba: u32,

    #[pkd(7, 0, 4, 7)]
    pub block_size: u32,
}

/// READ FORMAT CAPACITIES: the current/maximum capacity descriptor.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Default, Packed)]
#[packed(big_endian, lsb0)]
pub struct ReadFormatCapacitiesResponse {
    /// Length of the descriptor list that follows the 4-byte header.
    #[pkd(7, 0, 3, 3)]
    pub capacity_list_length: u8,

    #[pkd(7, 0, 4, 7)]
    pub number_of_blocks: u32,

    /// 1 = unformatted, 2 = formatted, 3 = no medium.
    #[pkd(1, 0, 8, 8)]
    pub descriptor_code: u8,

    #[pkd(7, 0, 9, 11)]
    pub block_length: u32,
}

/// MODE SENSE (6) header with no block descriptors or pages.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct ModeSense6Response {
    /// Bytes following this one, i.e. total size - 1.
    #[pkd(7, 0, 0, 0)]
    pub mode_data_length: u8,

    #[pkd(7, 0, 1, 1)]
    pub medium_type: u8,

    #[pkd(7, 7, 2, 2)]
    pub write_protect: bool,

    #[pkd(7, 0, 3, 3)]
    pub block_descriptor_length: u8,
}

impl Default for ModeSense6Response {
    fn default() -> Self {
        ModeSense6Response {
            mode_data_length: Self::BYTES as u8 - 1,
            medium_type: 0,
            write_protect: false,
            block_descriptor_length: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inquiry_response_is_36_bytes() {
        let mut resp = InquiryResponse::default();
        resp.set_vendor_id("ACME");
        resp.set_product_id("Pocket Disk");
        resp.set_product_rev("1.0");

        let mut raw = [0u8; InquiryResponse::BYTES];
        resp.pack(&mut raw).unwrap();
        assert_eq!(raw.len(), 36);
        assert_eq!(raw[0], 0x00);
        assert_eq!(raw[1], 0x80); // removable
        assert_eq!(raw[3], 0x02);
        assert_eq!(raw[4], 31); // additional_length = 36 - 5
        assert_eq!(&raw[8..12], b"ACME");
        assert_eq!(raw[12], b' ');
        assert_eq!(&raw[16..27], b"Pocket Disk");
    }

    #[test]
    fn sense_response_is_18_bytes() {
        let mut sense = RequestSenseResponse::default();
        sense.set(SenseKey::DataProtect, super::super::additional_sense::WRITE_PROTECTED);

        let mut raw = [0u8; RequestSenseResponse::BYTES];
        sense.pack(&mut raw).unwrap();
        assert_eq!(raw.len(), 18);
        assert_eq!(raw[0], 0xf0); // valid + current error
        assert_eq!(raw[2], 0x07);
        assert_eq!(raw[7], 10); // additional_sense_length = 18 - 8
        assert_eq!(raw[12], 0x27);
        assert_eq!(raw[13], 0x00);
    }

    #[test]
    fn read_capacity_is_big_endian() {
        let resp = ReadCapacity10Response { last_lba: 0x0001_0000, block_size: 512 };
        let mut raw = [0u8; ReadCapacity10Response::BYTES];
        resp.pack(&mut raw).unwrap();
        assert_eq!(&raw[..4], &[0x00, 0x01, 0x00, 0x00]);
        assert_eq!(&raw[4..], &[0x00, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn format_capacities_layout() {
        let resp = ReadFormatCapacitiesResponse {
            capacity_list_length: 8,
            number_of_blocks: 1024,
            descriptor_code: 2,
            block_length: 512,
        };
        let mut raw = [0u8; ReadFormatCapacitiesResponse::BYTES];
        resp.pack(&mut raw).unwrap();
        assert_eq!(raw.len(), 12);
        assert_eq!(raw[3], 8);
        assert_eq!(&raw[4..8], &[0, 0, 4, 0]);
        assert_eq!(raw[8], 2);
        assert_eq!(&raw[9..12], &[0, 2, 0]);
    }
}
