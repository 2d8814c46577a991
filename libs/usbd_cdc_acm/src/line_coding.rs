//! The 7-byte line coding block of SET_LINE_CODING / GET_LINE_CODING.

use packing::Packed;

/// Stop bit encoding of `bCharFormat`.
pub const STOP_BITS_1: u8 = 0;
pub const STOP_BITS_1_5: u8 = 1;
pub const STOP_BITS_2: u8 = 2;

/// Parity encoding of `bParityType`.
pub const PARITY_NONE: u8 = 0;
pub const PARITY_ODD: u8 = 1;
pub const PARITY_EVEN: u8 = 2;

/// Virtual UART parameters; the wire format is little-endian.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(little_endian, lsb0)]
pub struct LineCoding {
    #[pkd(7, 0, 0, 3)]
    pub data_rate: u32,

    #[pkd(7, 0, 4, 4)]
    pub stop_bits: u8,

    #[pkd(7, 0, 5, 5)]
    pub parity: u8,

    #[pkd(7, 0, 6, 6)]
    pub data_bits: u8,
}

impl Default for LineCoding {
    fn default() -> Self {
        LineCoding { data_rate: 115_200, stop_bits: STOP_BITS_1, parity: PARITY_NONE, data_bits: 8 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use packing::PackedSize;

    #[test]
    fn seven_bytes_little_endian() {
        let lc = LineCoding { data_rate: 9600, stop_bits: STOP_BITS_2, parity: PARITY_EVEN, data_bits: 7 };
        let mut raw = [0u8; LineCoding::BYTES];
        lc.pack(&mut raw).unwrap();
        assert_eq!(raw, [0x80, 0x25, 0x00, 0x00, 0x02, 0x02, 0x07]);
        assert_eq!(LineCoding::unpack(&raw).unwrap(), lc);
    }
}
