//! Device-side USB 2.0 protocol stack for microcontrollers whose USB
//! controller exposes packet buffers in a shared dual-port RAM.
//!
//! The crate is split along the seams of the protocol:
//!
//! * [`UsbDriver`] is the contract the hardware layer implements: register
//!   pokes, DPRAM copies and interrupt entry live below it.
//! * [`descriptor`] holds the descriptor tree (device, configurations,
//!   interfaces, endpoints, BOS) which is built eagerly before the bus
//!   pull-up is enabled and serialized on demand.
//! * [`UsbStack`] owns the driver and the tree, answers the chapter 9
//!   standard requests on endpoint 0 and routes class/vendor requests to
//!   [`UsbClass`] implementations.
//! * [`transfer`] is the pure multi-packet fragmentation engine shared by
//!   both endpoint directions.
//!
//! Class drivers (CDC-ACM, MSC) live in sibling crates and talk to the
//! stack exclusively through [`UsbStack`] endpoint operations and the
//! [`UsbClass`] event trait.

#![no_std]

pub mod config;
pub mod descriptor;
pub mod testing;
pub mod transfer;

mod class;
mod driver;
mod endpoint;
mod ms_os;
mod setup;
mod stack;
mod strings;

pub use class::UsbClass;
pub use driver::{DriverError, PollResult, UsbDriver};
pub use endpoint::Endpoint;
pub use ms_os::{
    url_descriptor, MsOs20Capability, MsOs20DescriptorSet, WebUsbCapability,
    MS_OS_20_DESCRIPTOR_INDEX, WEBUSB_REQUEST_GET_URL,
};
pub use setup::{
    DescriptorType, Recipient, RequestKind, SetupPacket, StandardRequest,
    FEATURE_DEVICE_REMOTE_WAKEUP, FEATURE_ENDPOINT_HALT,
};
pub use stack::UsbStack;
pub use strings::StringTable;

/// Transfer pipe direction, encoded as the MSB of an endpoint address.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum UsbDirection {
    /// Host to device.
    Out = 0x00,
    /// Device to host.
    In = 0x80,
}

/// Endpoint transfer type, as encoded in `bmAttributes`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[repr(u8)]
pub enum EndpointType {
    Control = 0,
    Isochronous = 1,
    Bulk = 2,
    Interrupt = 3,
}

/// A (index, direction) pair packed the way the wire encodes it:
/// bits 3..0 are the index, bit 7 is set for IN.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct EndpointAddress(u8);

impl EndpointAddress {
    pub const fn new(index: u8, direction: UsbDirection) -> Self {
        EndpointAddress((index & 0x0f) | direction as u8)
    }

    pub const fn from_byte(raw: u8) -> Self {
        EndpointAddress(raw & 0x8f)
    }

    pub const fn index(&self) -> u8 {
        self.0 & 0x0f
    }

    pub const fn is_in(&self) -> bool {
        self.0 & 0x80 != 0
    }

    pub const fn direction(&self) -> UsbDirection {
        if self.is_in() { UsbDirection::In } else { UsbDirection::Out }
    }

    pub const fn to_byte(&self) -> u8 {
        self.0
    }
}

/// Errors surfaced by the stack.
///
/// Protocol-level failures seen in interrupt context are never propagated
/// through this type; they are latched as STALL bits or class status and
/// reported through the next recovery request the host drives. `UsbError`
/// covers construction-time capacity exhaustion and misuse of the transfer
/// API.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UsbError {
    /// The operation cannot proceed right now (e.g. a transfer is already
    /// in flight on this endpoint direction).
    WouldBlock,
    /// A caller-supplied buffer or a staging buffer is too small.
    BufferOverflow,
    /// A fixed-capacity table (configurations, interfaces, endpoints,
    /// strings, BOS capabilities) is full.
    CapacityExceeded,
    /// The endpoint address does not refer to a created endpoint.
    InvalidEndpoint,
    /// A parameter is outside the range the protocol allows.
    InvalidParameter,
}

pub type Result<T> = core::result::Result<T, UsbError>;
