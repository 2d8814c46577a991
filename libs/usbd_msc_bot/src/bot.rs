//! Bulk-Only Transport framing: the Command Block Wrapper and Command
//! Status Wrapper, both little-endian with fixed signatures.

use packing::{Packed, PackedSize};

/// Signature that identifies a packet as CBW.
pub const CBW_SIGNATURE: u32 = 0x43425355;
/// Signature that identifies a packet as CSW.
pub const CSW_SIGNATURE: u32 = 0x53425355;

/// The status of a command, as reported in the CSW.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
pub enum CommandStatus {
    /// Command completed successfully.
    CommandOk = 0x00,
    /// Command failed; the host will issue REQUEST SENSE for details.
    CommandError = 0x01,
    /// The transport state machine is out of step; the host performs
    /// reset recovery.
    PhaseError = 0x02,
}

/// Transport state, advanced by the foreground poll.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum BotState {
    ReceiveCbw,
    DataRead,
    DataWrite,
    SendCsw,
}

/// The 31-byte command wrapper the host sends on the OUT pipe. It names
/// the SCSI command and the direction and size of the data stage that
/// follows. Little endian.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(little_endian, lsb0)]
pub struct CommandBlockWrapper {
    /// Must contain [`CBW_SIGNATURE`].
    #[pkd(7, 0, 0, 3)]
    pub signature: u32,

    /// Tag sent by the host; echoed back in the CSW so the host can
    /// associate status with the command that produced it.
    #[pkd(7, 0, 4, 7)]
    pub tag: u32,

    /// Number of bytes the host expects to transfer during the data
    /// stage. Zero means the CSW follows immediately.
    #[pkd(7, 0, 8, 11)]
    pub data_transfer_length: u32,

    /// Bit 7: 0 = OUT (host to device), 1 = IN (device to host).
    #[pkd(7, 0, 12, 12)]
    pub flags: u8,

    /// Logical unit number; single-LUN devices still apply commands to
    /// LUN 0 rather than ignoring the field.
    #[pkd(7, 0, 13, 13)]
    pub lun: u8,

    /// The number of valid bytes in the command block.
    #[pkd(7, 0, 14, 14)]
    pub cb_length: u8,

    /// The command set specific data for this command.
    #[pkd(7, 0, 15, 30)]
    pub cb: [u8; 16],
}

impl Default for CommandBlockWrapper {
    fn default() -> Self {
        Self {
            signature: CBW_SIGNATURE,
            tag: 0,
            data_transfer_length: 0,
            flags: 0,
            lun: 0,
            cb_length: 0,
            cb: [0; 16],
        }
    }
}

impl CommandBlockWrapper {
    /// Whether the data stage flows device to host.
    pub fn is_data_in(&self) -> bool {
        self.flags & 0x80 != 0
    }

    /// A CBW is only meaningful when exactly 31 bytes arrived and the
    /// signature matches.
    pub fn is_valid(raw: &[u8]) -> bool {
        raw.len() == Self::BYTES && raw[..4] == CBW_SIGNATURE.to_le_bytes()
    }
}

/// The status wrapper closing every command. Little endian.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
#[packed(little_endian, lsb0)]
pub struct CommandStatusWrapper {
    /// Must contain [`CSW_SIGNATURE`].
    #[pkd(7, 0, 0, 3)]
    pub signature: u32,

    /// Copied from the CBW tag field.
    #[pkd(7, 0, 4, 7)]
    pub tag: u32,

    /// Difference between the host's expected data length and the amount
    /// actually transferred.
    #[pkd(7, 0, 8, 11)]
    pub data_residue: u32,

    #[pkd(7, 0, 12, 12)]
    pub status: CommandStatus,
}

impl Default for CommandStatusWrapper {
    fn default() -> Self {
        Self {
            signature: CSW_SIGNATURE,
            tag: 0,
            data_residue: 0,
            status: CommandStatus::CommandOk,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cbw_unpacks_little_endian() {
        let mut raw = [0u8; 31];
        raw[..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        raw[4..8].copy_from_slice(&0xdeadbeefu32.to_le_bytes());
        raw[8..12].copy_from_slice(&1024u32.to_le_bytes());
        raw[12] = 0x80;
        raw[14] = 10;
        raw[15] = 0x28;

        assert!(CommandBlockWrapper::is_valid(&raw));
        let cbw = CommandBlockWrapper::unpack(&raw).unwrap();
        assert_eq!(cbw.signature, CBW_SIGNATURE);
        assert_eq!(cbw.tag, 0xdeadbeef);
        assert_eq!(cbw.data_transfer_length, 1024);
        assert!(cbw.is_data_in());
        assert_eq!(cbw.cb_length, 10);
        assert_eq!(cbw.cb[0], 0x28);
    }

    #[test]
    fn cbw_rejects_bad_signature_and_length() {
        let mut raw = [0u8; 31];
        raw[..4].copy_from_slice(&CBW_SIGNATURE.to_le_bytes());
        assert!(CommandBlockWrapper::is_valid(&raw));
        raw[0] ^= 1;
        assert!(!CommandBlockWrapper::is_valid(&raw));
        let short = [0u8; 30];
        assert!(!CommandBlockWrapper::is_valid(&short));
    }

    #[test]
    fn csw_packs_thirteen_bytes() {
        let csw = CommandStatusWrapper {
            tag: 0x1234_5678,
            data_residue: 7,
            status: CommandStatus::CommandError,
            ..Default::default()
        };
        let mut raw = [0u8; CommandStatusWrapper::BYTES];
        csw.pack(&mut raw).unwrap();
        assert_eq!(raw.len(), 13);
        assert_eq!(&raw[..4], &CSW_SIGNATURE.to_le_bytes());
        assert_eq!(&raw[4..8], &0x1234_5678u32.to_le_bytes());
        assert_eq!(&raw[8..12], &7u32.to_le_bytes());
        assert_eq!(raw[12], 0x01);
    }
}
