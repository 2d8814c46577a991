//! The contract between the protocol stack and the hardware layer.
//!
//! An implementation wraps one USB device controller: its registers, its
//! packet-buffer DPRAM and the interrupt status. The stack never touches
//! hardware directly; every register poke goes through this trait.

use crate::{EndpointAddress, EndpointType};

/// Errors a driver can report while claiming hardware resources.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DriverError {
    /// No DPRAM left for another endpoint buffer.
    BufferMemoryExhausted,
    /// The (index, direction) pair is already claimed.
    EndpointTaken,
    /// The controller cannot realize this endpoint (bad index or type).
    Unsupported,
}

/// Events drained from the controller by one [`UsbDriver::poll`] call.
///
/// `ep_in_complete` / `ep_out_complete` carry one bit per endpoint index;
/// bit n set means the controller finished the buffer the stack armed on
/// index n in that direction. The received length of an OUT buffer is
/// obtained through [`UsbDriver::read_packet`].
#[derive(Clone, Copy, Default, Debug)]
pub struct PollResult {
    pub bus_reset: bool,
    pub setup: Option<[u8; 8]>,
    pub ep_in_complete: u16,
    pub ep_out_complete: u16,
}

/// Device controller driver.
///
/// Buffer-copy width is a hardware property: controllers that fault on
/// unaligned word access to DPRAM (e.g. RP2350) must copy byte-by-byte
/// inside `write_packet` / `read_packet`; the stack does not care.
pub trait UsbDriver {
    /// Claim DPRAM and registers for one endpoint direction. Endpoint 0
    /// must be claimed once per direction like any other endpoint.
    fn alloc_endpoint(
        &mut self,
        addr: EndpointAddress,
        kind: EndpointType,
        max_packet: u16,
    ) -> Result<(), DriverError>;

    /// Copy `data` into the IN packet buffer of `index`. Called before
    /// `arm_in`; `data` never exceeds the endpoint's max packet size.
    fn write_packet(&mut self, index: u8, data: &[u8]);

    /// Copy the received OUT packet of `index` into `buf` and return its
    /// length. Valid between an `ep_out_complete` event and the next
    /// `arm_out`.
    fn read_packet(&mut self, index: u8, buf: &mut [u8]) -> usize;

    /// Hand the filled IN buffer to the controller with the given DATA0/1
    /// toggle; `len` bytes will be sent on the next IN token.
    fn arm_in(&mut self, index: u8, pid: u8, len: u16);

    /// Arm the OUT buffer to accept up to `len` bytes with the given
    /// expected toggle.
    fn arm_out(&mut self, index: u8, pid: u8, len: u16);

    /// Force or clear the STALL handshake on one endpoint direction.
    fn set_stall(&mut self, addr: EndpointAddress, stalled: bool);

    fn is_stalled(&self, addr: EndpointAddress) -> bool;

    /// Pause (`true`) or resume (`false`) an endpoint direction with NAK.
    /// The host retries while NAK is asserted; no data is lost.
    fn set_nak(&mut self, addr: EndpointAddress, nak: bool);

    /// Make the endpoint respond to traffic at all. Disabled endpoints
    /// ignore tokens.
    fn enable_endpoint(&mut self, addr: EndpointAddress, enabled: bool);

    /// Commit a device address to the controller. The stack calls this
    /// only after the SET_ADDRESS status stage completed; the driver may
    /// write the register immediately.
    fn set_address(&mut self, address: u8);

    /// Return to the default address 0 (bus reset).
    fn reset_address(&mut self);

    /// Connect or disconnect the D+ pull-up.
    fn pullup_enable(&mut self, enabled: bool);

    /// Gate the controller interrupt.
    fn irq_enable(&mut self, enabled: bool);

    /// Drain pending controller events. Called from the IRQ entry via
    /// [`UsbStack::poll`](crate::UsbStack::poll); must not block.
    fn poll(&mut self) -> PollResult;
}
