//! Descriptor string table.
//!
//! Strings are inserted once during tree construction (no deduplication)
//! and rendered on demand. Index 0 is reserved for the language-ID
//! descriptor; the table only reports US English.

use heapless::Vec;

use crate::config::MAX_STRINGS;
use crate::setup::DescriptorType;
use crate::{Result, UsbError};

/// US English, the only language the table reports.
pub const LANGUAGE_ID: u16 = 0x0409;

pub struct StringTable {
    // Index 0 is the language-ID entry, leaving MAX_STRINGS - 1 slots.
    entries: Vec<&'static str, { MAX_STRINGS - 1 }>,
}

impl StringTable {
    pub const fn new() -> Self {
        StringTable { entries: Vec::new() }
    }

    /// Store a string and return its descriptor index. Index 0 is the
    /// language-ID entry, so the first stored string gets index 1.
    pub fn add(&mut self, s: &'static str) -> Result<u8> {
        self.entries.push(s).map_err(|_| UsbError::CapacityExceeded)?;
        Ok(self.entries.len() as u8)
    }

    pub fn get(&self, index: u8) -> Option<&'static str> {
        if index == 0 {
            return None;
        }
        self.entries.get(index as usize - 1).copied()
    }

    /// Render the standard UTF-16LE string descriptor for `index` into
    /// `buf` and return its length. Index 0 yields the language-ID
    /// descriptor `[0x04, 0x03, 0x09, 0x04]`.
    pub fn descriptor_utf16(&self, index: u8, buf: &mut [u8]) -> Result<usize> {
        if index == 0 {
            let lang = LANGUAGE_ID.to_le_bytes();
            let desc = [4, DescriptorType::String as u8, lang[0], lang[1]];
            let out = buf.get_mut(..4).ok_or(UsbError::BufferOverflow)?;
            out.copy_from_slice(&desc);
            return Ok(4);
        }
        let s = self.get(index).ok_or(UsbError::InvalidParameter)?;
        let mut len = 2;
        for unit in s.encode_utf16() {
            let bytes = unit.to_le_bytes();
            *buf.get_mut(len).ok_or(UsbError::BufferOverflow)? = bytes[0];
            *buf.get_mut(len + 1).ok_or(UsbError::BufferOverflow)? = bytes[1];
            len += 2;
        }
        buf[0] = len as u8;
        buf[1] = DescriptorType::String as u8;
        Ok(len)
    }

    /// Render a UTF-8 string descriptor, the variant some Microsoft
    /// vendor descriptors (e.g. the WebUSB URL payload) use.
    pub fn descriptor_utf8(&self, index: u8, buf: &mut [u8]) -> Result<usize> {
        let s = self.get(index).ok_or(UsbError::InvalidParameter)?;
        let bytes = s.as_bytes();
        let len = bytes.len() + 2;
        let out = buf.get_mut(..len).ok_or(UsbError::BufferOverflow)?;
        out[0] = len as u8;
        out[1] = DescriptorType::String as u8;
        out[2..].copy_from_slice(bytes);
        Ok(len)
    }
}
