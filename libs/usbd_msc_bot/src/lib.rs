//! USB Mass Storage Class, Bulk-Only Transport.
//!
//! Frames a SCSI transparent command subset over one bulk IN / bulk OUT
//! endpoint pair: CBWs arrive on the OUT pipe, data flows in whichever
//! direction the command dictates, and every command ends with a CSW
//! echoing the host's tag.
//!
//! Interrupt context only latches incoming packets; the state machine
//! advances in [`MscBot::handle_request`], which the application calls
//! from its foreground loop.

#![no_std]

pub mod bot;
pub mod scsi;

mod block_device;
mod device;

pub use block_device::{BlockDevice, BlockDeviceError};
pub use device::MscBot;

/// Block size the transport buffers are sized for.
pub const MSC_BLOCK_SIZE: usize = 512;

/// Interface class/subclass/protocol triple of an MSC BOT function.
pub const INTERFACE_CLASS_MSC: u8 = 0x08;
pub const INTERFACE_SUBCLASS_SCSI_TRANSPARENT: u8 = 0x06;
pub const INTERFACE_PROTOCOL_BOT: u8 = 0x50;

/// Class-specific interface requests.
pub const REQUEST_BOT_RESET: u8 = 0xff;
pub const REQUEST_GET_MAX_LUN: u8 = 0xfe;
