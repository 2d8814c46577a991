//! The seam between the stack and class drivers.

use crate::driver::UsbDriver;
use crate::setup::SetupPacket;
use crate::stack::UsbStack;
use crate::EndpointAddress;

/// Event interface a class driver implements.
///
/// All methods run in interrupt context, are invoked at most once per
/// event and must not block. Class drivers live at the application level;
/// the stack borrows them only for the duration of one
/// [`UsbStack::poll`](crate::UsbStack::poll) call.
pub trait UsbClass<D: UsbDriver> {
    /// The bus was reset; transient class state is gone.
    fn on_reset(&mut self, _usb: &mut UsbStack<D>) {}

    /// A configuration containing this class's interfaces was activated.
    /// The usual place to arm the first OUT reception.
    fn on_configured(&mut self, _usb: &mut UsbStack<D>) {}

    /// A class or vendor SETUP addressed to an interface or endpoint (or,
    /// for device-recipient vendor requests the stack does not consume,
    /// the device). Return `true` to claim the request; unclaimed
    /// requests stall endpoint 0.
    ///
    /// For an OUT request with a data stage, the claiming class must call
    /// [`UsbStack::control_accept_out`]; the payload is delivered later
    /// through [`UsbClass::setup_out`]. OUT requests without a data stage
    /// are status-acknowledged by the stack after the claim.
    fn setup(&mut self, _usb: &mut UsbStack<D>, _setup: &SetupPacket) -> bool {
        false
    }

    /// Data stage of a claimed control OUT request.
    fn setup_out(&mut self, _usb: &mut UsbStack<D>, _setup: &SetupPacket, _data: &[u8]) -> bool {
        false
    }

    /// An IN transfer of `len` bytes on one of this class's endpoints
    /// finished.
    fn on_in_complete(&mut self, _usb: &mut UsbStack<D>, _addr: EndpointAddress, _len: u16) {}

    /// An OUT transfer on one of this class's endpoints finished; the
    /// payload is available through [`UsbStack::received`] until the
    /// endpoint is rearmed.
    fn on_out_complete(&mut self, _usb: &mut UsbStack<D>, _addr: EndpointAddress, _len: u16) {}
}
