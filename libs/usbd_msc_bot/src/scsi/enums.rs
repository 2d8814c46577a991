//! SCSI vocabulary: opcodes, sense keys and fixed codes.

use num_enum::TryFromPrimitive;
use packing::Packed;

/// Command operation codes the device implements.
#[derive(Clone, Copy, PartialEq, Eq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum OpCode {
    TestUnitReady = 0x00,
    RequestSense = 0x03,
    Inquiry = 0x12,
    ModeSense6 = 0x1a,
    StartStopUnit = 0x1b,
    PreventAllowMediumRemoval = 0x1e,
    ReadFormatCapacities = 0x23,
    ReadCapacity10 = 0x25,
    Read10 = 0x28,
    Write10 = 0x2a,
}

/// Fixed-format sense response codes.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
pub enum ResponseCode {
    CurrentError = 0x70,
    DeferredError = 0x71,
}

impl Default for ResponseCode {
    fn default() -> Self {
        ResponseCode::CurrentError
    }
}

/// Sense keys the device reports.
#[derive(Clone, Copy, Eq, PartialEq, Debug, Packed)]
pub enum SenseKey {
    /// Nothing to report; the previous command succeeded.
    NoSense = 0x0,
    /// The logical unit is not accessible.
    NotReady = 0x2,
    /// Non-recovered error caused by the medium or recorded data.
    MediumError = 0x3,
    /// Non-recoverable hardware failure.
    HardwareError = 0x4,
    /// Illegal parameter in the CDB or an unsupported command.
    IllegalRequest = 0x5,
    /// A command touched a write-protected block.
    DataProtect = 0x7,
}

impl Default for SenseKey {
    fn default() -> Self {
        SenseKey::NoSense
    }
}

/// Additional sense codes paired with their qualifiers.
pub mod additional_sense {
    /// LOGICAL UNIT NOT READY.
    pub const NOT_READY: (u8, u8) = (0x04, 0x00);
    /// INVALID COMMAND OPERATION CODE.
    pub const INVALID_COMMAND: (u8, u8) = (0x20, 0x00);
    /// INVALID FIELD IN CDB.
    pub const INVALID_FIELD_IN_CDB: (u8, u8) = (0x24, 0x00);
    /// WRITE PROTECTED.
    pub const WRITE_PROTECTED: (u8, u8) = (0x27, 0x00);
    /// MEDIUM NOT PRESENT.
    pub const MEDIUM_NOT_PRESENT: (u8, u8) = (0x3a, 0x00);
}
