//! Command descriptor blocks, parsed out of `CBWCB`. Multi-byte fields
//! are big-endian per SCSI.

use packing::Packed;

#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct Read10Command {
    #[pkd(7, 0, 0, 0)]
    pub op_code: u8,

    #[pkd(7, 5, 1, 1)]
    pub rd_protect: u8,

    #[pkd(4, 4, 1, 1)]
    pub dpo: bool,

    #[pkd(3, 3, 1, 1)]
    pub fua: bool,

    #[pkd(7, 0, 2, 5)]
    pub lba: u32,

    #[pkd(4, 0, 6, 6)]
    pub group_number: u8,

    #[pkd(7, 0, 7, 8)]
    pub transfer_length: u16,

    #[pkd(7, 0, 9, 9)]
    pub control: u8,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct Write10Command {
    #[pkd(7, 0, 0, 0)]
    pub op_code: u8,

    #[pkd(7, 5, 1, 1)]
    pub wr_protect: u8,

    #[pkd(4, 4, 1, 1)]
    pub dpo: bool,

    #[pkd(3, 3, 1, 1)]
    pub fua: bool,

    #[pkd(7, 0, 2, 5)]
    pub lba: u32,

    #[pkd(4, 0, 6, 6)]
    pub group_number: u8,

    #[pkd(7, 0, 7, 8)]
    pub transfer_length: u16,

    #[pkd(7, 0, 9, 9)]
    pub control: u8,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct ModeSense6Command {
    #[pkd(7, 0, 0, 0)]
    pub op_code: u8,

    #[pkd(3, 3, 1, 1)]
    pub disable_block_descriptors: bool,

    #[pkd(7, 6, 2, 2)]
    pub page_control: u8,

    #[pkd(5, 0, 2, 2)]
    pub page_code: u8,

    #[pkd(7, 0, 3, 3)]
    pub subpage_code: u8,

    #[pkd(7, 0, 4, 4)]
    pub allocation_length: u8,

    #[pkd(7, 0, 5, 5)]
    pub control: u8,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct StartStopUnitCommand {
    #[pkd(7, 0, 0, 0)]
    pub op_code: u8,

    #[pkd(0, 0, 1, 1)]
    pub immediate: bool,

    #[pkd(3, 0, 3, 3)]
    pub power_condition_modifier: u8,

    #[pkd(7, 4, 4, 4)]
    pub power_condition: u8,

    #[pkd(2, 2, 4, 4)]
    pub no_flush: bool,

    /// Load/eject: together with `start` selects load (1,1) or eject (1,0).
    #[pkd(1, 1, 4, 4)]
    pub load_eject: bool,

    #[pkd(0, 0, 4, 4)]
    pub start: bool,

    #[pkd(7, 0, 5, 5)]
    pub control: u8,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct PreventAllowMediumRemovalCommand {
    #[pkd(7, 0, 0, 0)]
    pub op_code: u8,

    #[pkd(1, 0, 4, 4)]
    pub prevent: u8,

    #[pkd(7, 0, 5, 5)]
    pub control: u8,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct InquiryCommand {
    #[pkd(7, 0, 0, 0)]
    pub op_code: u8,

    #[pkd(0, 0, 1, 1)]
    pub enable_vital_product_data: bool,

    #[pkd(7, 0, 2, 2)]
    pub page_code: u8,

    #[pkd(7, 0, 3, 4)]
    pub allocation_length: u16,

    #[pkd(7, 0, 5, 5)]
    pub control: u8,
}

#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(big_endian, lsb0)]
pub struct RequestSenseCommand {
    #[pkd(7, 0, 0, 0)]
    pub op_code: u8,

    #[pkd(0, 0, 1, 1)]
    pub descriptor_format: bool,

    #[pkd(7, 0, 4, 4)]
    pub allocation_length: u8,

    #[pkd(7, 0, 5, 5)]
    pub control: u8,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read10_parses_big_endian_lba_and_length() {
        // READ(10), LBA 7, 2 blocks: the canonical wire example.
        let raw = [0x28, 0x00, 0x00, 0x00, 0x00, 0x07, 0x00, 0x00, 0x02, 0x00];
        let cmd = Read10Command::unpack(&raw).unwrap();
        assert_eq!(cmd.op_code, 0x28);
        assert_eq!(cmd.lba, 7);
        assert_eq!(cmd.transfer_length, 2);
    }

    #[test]
    fn write10_parses_big_endian_fields() {
        let raw = [0x2a, 0x00, 0x12, 0x34, 0x56, 0x78, 0x00, 0x01, 0x00, 0x00];
        let cmd = Write10Command::unpack(&raw).unwrap();
        assert_eq!(cmd.lba, 0x12345678);
        assert_eq!(cmd.transfer_length, 0x100);
    }

    #[test]
    fn start_stop_unit_flags() {
        // LOEJ + START = load.
        let raw = [0x1b, 0x00, 0x00, 0x00, 0x03, 0x00];
        let cmd = StartStopUnitCommand::unpack(&raw).unwrap();
        assert!(cmd.start);
        assert!(cmd.load_eject);
        assert!(!cmd.no_flush);
    }

    #[test]
    fn mode_sense6_page_fields() {
        let raw = [0x1a, 0x00, 0x3f, 0x00, 0xc0, 0x00];
        let cmd = ModeSense6Command::unpack(&raw).unwrap();
        assert_eq!(cmd.page_control, 0);
        assert_eq!(cmd.page_code, 0x3f);
        assert_eq!(cmd.allocation_length, 0xc0);
    }
}
