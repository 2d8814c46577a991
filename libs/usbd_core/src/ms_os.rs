//! WebUSB and Microsoft OS 2.0 platform descriptors.
//!
//! These are pure data containers: the BOS capabilities advertise a vendor
//! request code, and the stack serves the assembled descriptor set (or the
//! WebUSB landing-page URL) when that vendor request arrives on endpoint 0.

use heapless::Vec;

use crate::config::MS_OS_20_MAX_SIZE;
use crate::descriptor::DeviceCapability;
use crate::{Result, UsbError};

/// `wIndex` of the vendor request that fetches the MS OS 2.0 set.
pub const MS_OS_20_DESCRIPTOR_INDEX: u16 = 7;
/// `wIndex` of the WebUSB GET_URL vendor request.
pub const WEBUSB_REQUEST_GET_URL: u16 = 2;

const CAP_PLATFORM: u8 = 0x05;
const DESC_DEVICE_CAPABILITY: u8 = 0x10;

/// WebUSB platform capability UUID {3408b638-09a9-47a0-8bfd-a0768815b665}.
const WEBUSB_UUID: [u8; 16] = [
    0x38, 0xb6, 0x08, 0x34, 0xa9, 0x09, 0xa0, 0x47, 0x8b, 0xfd, 0xa0, 0x76, 0x88, 0x15, 0xb6, 0x65,
];

/// MS OS 2.0 platform capability UUID {d8dd60df-4589-4cc7-9cd2-659d9e648a9f}.
const MS_OS_20_UUID: [u8; 16] = [
    0xdf, 0x60, 0xdd, 0xd8, 0x89, 0x45, 0xc7, 0x4c, 0x9c, 0xd2, 0x65, 0x9d, 0x9e, 0x64, 0x8a, 0x9f,
];

/// Windows 8.1, the first version that reads MS OS 2.0 descriptors.
const WINDOWS_VERSION_8_1: u32 = 0x06030000;

// MS OS 2.0 descriptor set wDescriptorType values.
const MS_DESC_HEADER: u16 = 0;
const MS_DESC_CONFIG_SUBSET: u16 = 1;
const MS_DESC_FUNC_SUBSET: u16 = 2;
const MS_DESC_COMPAT_ID: u16 = 3;
const MS_DESC_REG_PROP: u16 = 4;

const REG_MULTI_SZ: u16 = 7;

/// WebUSB platform capability (24 bytes).
pub struct WebUsbCapability {
    /// bRequest value the host uses for WebUSB vendor requests.
    pub vendor_code: u8,
    /// String index of the landing-page URL (0 = none).
    pub landing_page: u8,
}

impl DeviceCapability for WebUsbCapability {
    fn byte_length(&self) -> usize {
        24
    }

    fn bytes(&self, buf: &mut [u8]) -> usize {
        buf[0] = 24;
        buf[1] = DESC_DEVICE_CAPABILITY;
        buf[2] = CAP_PLATFORM;
        buf[3] = 0; // bReserved
        buf[4..20].copy_from_slice(&WEBUSB_UUID);
        buf[20..22].copy_from_slice(&0x0100u16.to_le_bytes()); // bcdVersion 1.00
        buf[22] = self.vendor_code;
        buf[23] = self.landing_page;
        24
    }
}

/// MS OS 2.0 platform capability (28 bytes). `total_length` must match the
/// assembled [`MsOs20DescriptorSet`].
pub struct MsOs20Capability {
    pub total_length: u16,
    pub vendor_code: u8,
    pub alt_enum_code: u8,
}

impl DeviceCapability for MsOs20Capability {
    fn byte_length(&self) -> usize {
        28
    }

    fn bytes(&self, buf: &mut [u8]) -> usize {
        buf[0] = 28;
        buf[1] = DESC_DEVICE_CAPABILITY;
        buf[2] = CAP_PLATFORM;
        buf[3] = 0;
        buf[4..20].copy_from_slice(&MS_OS_20_UUID);
        buf[20..24].copy_from_slice(&WINDOWS_VERSION_8_1.to_le_bytes());
        buf[24..26].copy_from_slice(&self.total_length.to_le_bytes());
        buf[26] = self.vendor_code;
        buf[27] = self.alt_enum_code;
        28
    }
}

/// Render a WebUSB URL descriptor (`[bLength, 0x03, bScheme, utf8…]`).
/// `scheme`: 0 = http, 1 = https, 255 = scheme included in the string.
pub fn url_descriptor(url: &str, scheme: u8, buf: &mut [u8]) -> Result<usize> {
    let len = url.len() + 3;
    let out = buf.get_mut(..len).ok_or(UsbError::BufferOverflow)?;
    out[0] = len as u8;
    out[1] = 0x03; // URL descriptor type
    out[2] = scheme;
    out[3..].copy_from_slice(url.as_bytes());
    Ok(len)
}

/// The assembled MS OS 2.0 descriptor set: header, one configuration
/// subset, one function subset, a compatible-ID and optional registry
/// properties, emitted as a single linear blob.
pub struct MsOs20DescriptorSet {
    buf: Vec<u8, MS_OS_20_MAX_SIZE>,
    config_subset_at: usize,
    func_subset_at: usize,
}

impl MsOs20DescriptorSet {
    /// Build the fixed part of the set for one function starting at
    /// `first_interface` in configuration `configuration_value`, with the
    /// `WINUSB` compatible ID.
    pub fn new(configuration_value: u8, first_interface: u8) -> Result<Self> {
        let mut set = MsOs20DescriptorSet { buf: Vec::new(), config_subset_at: 0, func_subset_at: 0 };

        // Set header: wLength, wDescriptorType, dwWindowsVersion, wTotalLength.
        set.push_u16(10)?;
        set.push_u16(MS_DESC_HEADER)?;
        set.push_u32(WINDOWS_VERSION_8_1)?;
        set.push_u16(0)?; // patched by update_lengths

        // Configuration subset header. The value here is the configuration
        // *index* as Windows sees it, i.e. bConfigurationValue - 1.
        set.config_subset_at = set.buf.len();
        set.push_u16(8)?;
        set.push_u16(MS_DESC_CONFIG_SUBSET)?;
        set.push_u8(configuration_value.saturating_sub(1))?;
        set.push_u8(0)?;
        set.push_u16(0)?;

        // Function subset header.
        set.func_subset_at = set.buf.len();
        set.push_u16(8)?;
        set.push_u16(MS_DESC_FUNC_SUBSET)?;
        set.push_u8(first_interface)?;
        set.push_u8(0)?;
        set.push_u16(0)?;

        // Compatible ID: WINUSB, no sub-compatible ID.
        set.push_u16(20)?;
        set.push_u16(MS_DESC_COMPAT_ID)?;
        let mut compat = [0u8; 16];
        compat[..6].copy_from_slice(b"WINUSB");
        for b in compat {
            set.push_u8(b)?;
        }

        set.update_lengths();
        Ok(set)
    }

    /// Append a REG_MULTI_SZ registry property. `name` and `value` are
    /// encoded as null-terminated UTF-16LE; the value gets the extra
    /// terminator REG_MULTI_SZ requires.
    pub fn add_registry_property(&mut self, name: &str, value: &str) -> Result<()> {
        let name_len = (name.len() + 1) * 2;
        let value_len = (value.len() + 2) * 2;
        let total = 10 + name_len + value_len;

        self.push_u16(total as u16)?;
        self.push_u16(MS_DESC_REG_PROP)?;
        self.push_u16(REG_MULTI_SZ)?;
        self.push_u16(name_len as u16)?;
        self.push_utf16z(name)?;
        self.push_u16(value_len as u16)?;
        self.push_utf16z(value)?;
        self.push_u16(0)?; // second terminator of the multi-sz

        self.update_lengths();
        Ok(())
    }

    /// The `wTotalLength` to advertise in the BOS capability.
    pub fn total_length(&self) -> u16 {
        self.buf.len() as u16
    }

    pub fn bytes(&self) -> &[u8] {
        &self.buf
    }

    fn update_lengths(&mut self) {
        let total = (self.buf.len() as u16).to_le_bytes();
        self.buf[8..10].copy_from_slice(&total);

        let config_total = ((self.buf.len() - self.config_subset_at) as u16).to_le_bytes();
        let at = self.config_subset_at + 6;
        self.buf[at..at + 2].copy_from_slice(&config_total);

        let func_total = ((self.buf.len() - self.func_subset_at) as u16).to_le_bytes();
        let at = self.func_subset_at + 6;
        self.buf[at..at + 2].copy_from_slice(&func_total);
    }

    fn push_u8(&mut self, v: u8) -> Result<()> {
        self.buf.push(v).map_err(|_| UsbError::CapacityExceeded)
    }

    fn push_u16(&mut self, v: u16) -> Result<()> {
        for b in v.to_le_bytes() {
            self.push_u8(b)?;
        }
        Ok(())
    }

    fn push_u32(&mut self, v: u32) -> Result<()> {
        for b in v.to_le_bytes() {
            self.push_u8(b)?;
        }
        Ok(())
    }

    fn push_utf16z(&mut self, s: &str) -> Result<()> {
        for unit in s.encode_utf16() {
            self.push_u16(unit)?;
        }
        self.push_u16(0)
    }
}
