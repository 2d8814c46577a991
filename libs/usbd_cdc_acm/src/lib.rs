//! CDC Abstract Control Model: a virtual serial port.
//!
//! One interface association groups a communication interface (interrupt
//! IN notifications plus the Header / Call Management / ACM / Union
//! functional descriptors) with a data interface carrying a bulk endpoint
//! pair. Application data moves through two byte FIFOs: the OUT pipe fills
//! the RX FIFO under NAK-based flow control, and the TX FIFO drains onto
//! the IN pipe one packet at a time, delimited by a ZLP when a message
//! ends exactly on a packet boundary.

#![no_std]

mod line_coding;

pub use line_coding::{
    LineCoding, PARITY_EVEN, PARITY_NONE, PARITY_ODD, STOP_BITS_1, STOP_BITS_1_5, STOP_BITS_2,
};

use heapless::Deque;
use packing::{Packed, PackedSize};

use usbd_core::config::{DEFAULT_PACKET_SIZE, DEFAULT_POLL_INTERVAL};
use usbd_core::descriptor::{Interface, InterfaceAssociation};
use usbd_core::{
    EndpointAddress, EndpointType, Recipient, SetupPacket, UsbClass, UsbDirection, UsbDriver,
    UsbStack,
};

/// Capacity of each data FIFO.
pub const CDC_ACM_FIFO_SIZE: usize = 256;

pub const INTERFACE_CLASS_COMM: u8 = 0x02;
pub const INTERFACE_SUBCLASS_ACM: u8 = 0x02;
pub const INTERFACE_CLASS_DATA: u8 = 0x0a;

/// Class-specific interface requests (CDC 1.2 table 19).
pub const REQUEST_SET_LINE_CODING: u8 = 0x20;
pub const REQUEST_GET_LINE_CODING: u8 = 0x21;
pub const REQUEST_SET_CONTROL_LINE_STATE: u8 = 0x22;

/// SERIAL_STATE notification code.
pub const NOTIFICATION_SERIAL_STATE: u8 = 0x20;

/// SERIAL_STATE bits.
pub const SERIAL_STATE_DCD: u16 = 1 << 0;
pub const SERIAL_STATE_DSR: u16 = 1 << 1;
pub const SERIAL_STATE_RING: u16 = 1 << 3;

const CS_INTERFACE: u8 = 0x24;
const FUNC_HEADER: u8 = 0x00;
const FUNC_CALL_MANAGEMENT: u8 = 0x01;
const FUNC_ACM: u8 = 0x02;
const FUNC_UNION: u8 = 0x06;

/// bcdCDC version advertised in the header functional descriptor.
const CDC_VERSION: u16 = 0x0120;

/// A CDC-ACM function.
pub struct CdcAcm {
    comm_interface: u8,
    data_interface: u8,
    ep_notify: EndpointAddress,
    ep_in: EndpointAddress,
    ep_out: EndpointAddress,
    max_packet: u16,

    rx: Deque<u8, CDC_ACM_FIFO_SIZE>,
    tx: Deque<u8, CDC_ACM_FIFO_SIZE>,
    /// RX reception paused because the FIFO cannot take a full packet.
    rx_paused: bool,
    /// Length of the packet currently on the IN pipe; a full-sized final
    /// packet is chased by a ZLP.
    last_sent: u16,

    line_coding: LineCoding,
    /// DTR in bit 0, RTS in bit 1, as set by the host.
    control_line_state: u16,
    serial_state: u16,
}

impl CdcAcm {
    /// Attach a CDC-ACM function to the configuration at
    /// `config_position`: the association, both interfaces, the
    /// functional descriptor chain and all three endpoints.
    pub fn new<D: UsbDriver>(usb: &mut UsbStack<D>, config_position: u8) -> usbd_core::Result<Self> {
        let (comm_interface, data_interface) = {
            let config = usb
                .device_mut()
                .configuration_mut(config_position)
                .ok_or(usbd_core::UsbError::InvalidParameter)?;

            let assoc = config.add_association(InterfaceAssociation::new(
                INTERFACE_CLASS_COMM,
                INTERFACE_SUBCLASS_ACM,
                0x00,
            ))?;
            let comm = config.add_interface_to_association(
                Interface::new(INTERFACE_CLASS_COMM, INTERFACE_SUBCLASS_ACM, 0x00),
                assoc,
            )?;
            let data = config.add_interface_to_association(
                Interface::new(INTERFACE_CLASS_DATA, 0x00, 0x00),
                assoc,
            )?;

            let version = CDC_VERSION.to_le_bytes();
            let iface = config.interface_mut(comm).ok_or(usbd_core::UsbError::InvalidParameter)?;
            iface.add_functional_descriptor(&[0x05, CS_INTERFACE, FUNC_HEADER, version[0], version[1]])?;
            // Call management handled over the data interface.
            iface.add_functional_descriptor(&[0x05, CS_INTERFACE, FUNC_CALL_MANAGEMENT, 0x00, data])?;
            // Capabilities: line coding + serial state.
            iface.add_functional_descriptor(&[0x04, CS_INTERFACE, FUNC_ACM, 0x06])?;
            iface.add_functional_descriptor(&[0x05, CS_INTERFACE, FUNC_UNION, comm, data])?;
            (comm, data)
        };

        let ep_notify = usb.create_endpoint(
            config_position,
            comm_interface,
            UsbDirection::In,
            EndpointType::Interrupt,
            16,
            DEFAULT_POLL_INTERVAL,
        )?;
        let ep_in = usb.create_endpoint(
            config_position,
            data_interface,
            UsbDirection::In,
            EndpointType::Bulk,
            DEFAULT_PACKET_SIZE,
            0,
        )?;
        let ep_out = usb.create_endpoint(
            config_position,
            data_interface,
            UsbDirection::Out,
            EndpointType::Bulk,
            DEFAULT_PACKET_SIZE,
            0,
        )?;

        Ok(CdcAcm {
            comm_interface,
            data_interface,
            ep_notify,
            ep_in,
            ep_out,
            max_packet: DEFAULT_PACKET_SIZE,
            rx: Deque::new(),
            tx: Deque::new(),
            rx_paused: false,
            last_sent: 0,
            line_coding: LineCoding::default(),
            control_line_state: 0,
            serial_state: 0,
        })
    }

    /// Interface number of the communication interface.
    pub fn comm_interface(&self) -> u8 {
        self.comm_interface
    }

    /// Interface number of the data interface.
    pub fn data_interface(&self) -> u8 {
        self.data_interface
    }

    pub fn line_coding(&self) -> &LineCoding {
        &self.line_coding
    }

    /// DTR as last set by the host.
    pub fn dtr(&self) -> bool {
        self.control_line_state & 0x01 != 0
    }

    /// RTS as last set by the host.
    pub fn rts(&self) -> bool {
        self.control_line_state & 0x02 != 0
    }

    /// Bytes waiting in the RX FIFO.
    pub fn available(&self) -> usize {
        self.rx.len()
    }

    /// Drain up to `buf.len()` bytes from the RX FIFO. Reopens the OUT
    /// pipe when enough room for a full packet exists again.
    pub fn read<D: UsbDriver>(&mut self, usb: &mut UsbStack<D>, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        if self.rx_paused && self.rx_free() >= self.max_packet as usize {
            self.rx_paused = false;
            usb.send_nak(self.ep_out, false);
            if !usb.is_active(self.ep_out) {
                let _ = usb.start_receive(self.ep_out, self.max_packet);
            }
        }
        n
    }

    /// Append to the TX FIFO and start draining if the IN pipe is idle.
    /// Returns how many bytes were queued.
    pub fn write<D: UsbDriver>(&mut self, usb: &mut UsbStack<D>, data: &[u8]) -> usize {
        let mut n = 0;
        for byte in data {
            if self.tx.push_back(*byte).is_err() {
                break;
            }
            n += 1;
        }
        if !usb.is_active(self.ep_in) {
            self.kick_tx(usb);
        }
        n
    }

    /// Update the SERIAL_STATE bitmap; a change is pushed to the host on
    /// the notification endpoint.
    pub fn set_serial_state<D: UsbDriver>(&mut self, usb: &mut UsbStack<D>, state: u16) {
        if state == self.serial_state {
            return;
        }
        self.serial_state = state;
        self.send_serial_state(usb);
    }

    fn send_serial_state<D: UsbDriver>(&mut self, usb: &mut UsbStack<D>) {
        // Notification header (8 bytes) followed by the 2-byte bitmap.
        let iface = (self.comm_interface as u16).to_le_bytes();
        let state = self.serial_state.to_le_bytes();
        let packet = [
            0xa1,
            NOTIFICATION_SERIAL_STATE,
            0,
            0,
            iface[0],
            iface[1],
            2,
            0,
            state[0],
            state[1],
        ];
        if usb.start_transfer(self.ep_notify, &packet).is_err() {
            log::warn!("SERIAL_STATE notification dropped");
        }
    }

    fn rx_free(&self) -> usize {
        CDC_ACM_FIFO_SIZE - self.rx.len()
    }

    fn kick_tx<D: UsbDriver>(&mut self, usb: &mut UsbStack<D>) {
        let len = self.tx.len().min(self.max_packet as usize);
        if len == 0 {
            return;
        }
        let mut packet = [0u8; DEFAULT_PACKET_SIZE as usize];
        for slot in packet.iter_mut().take(len) {
            *slot = self.tx.pop_front().unwrap_or(0);
        }
        if usb.start_transfer(self.ep_in, &packet[..len]).is_ok() {
            self.last_sent = len as u16;
        }
    }
}

impl<D: UsbDriver> UsbClass<D> for CdcAcm {
    fn on_reset(&mut self, _usb: &mut UsbStack<D>) {
        self.rx.clear();
        self.tx.clear();
        self.rx_paused = false;
        self.last_sent = 0;
        self.control_line_state = 0;
    }

    fn on_configured(&mut self, usb: &mut UsbStack<D>) {
        let _ = usb.start_receive(self.ep_out, self.max_packet);
    }

    fn setup(&mut self, usb: &mut UsbStack<D>, setup: &SetupPacket) -> bool {
        if setup.recipient != Recipient::Interface || setup.index != self.comm_interface as u16 {
            return false;
        }
        match setup.request {
            REQUEST_SET_LINE_CODING => {
                let _ = usb.control_accept_out(setup);
                true
            }
            REQUEST_GET_LINE_CODING => {
                let mut raw = [0u8; LineCoding::BYTES];
                let _ = self.line_coding.pack(&mut raw);
                let _ = usb.control_in(setup, &raw);
                true
            }
            REQUEST_SET_CONTROL_LINE_STATE => {
                self.control_line_state = setup.value;
                log::info!("CDC control line state: DTR={} RTS={}", self.dtr(), self.rts());
                true
            }
            _ => {
                log::warn!("Unsupported CDC request 0x{:02x}", setup.request);
                false
            }
        }
    }

    fn setup_out(&mut self, _usb: &mut UsbStack<D>, setup: &SetupPacket, data: &[u8]) -> bool {
        if setup.recipient != Recipient::Interface
            || setup.index != self.comm_interface as u16
            || setup.request != REQUEST_SET_LINE_CODING
        {
            return false;
        }
        if data.len() >= LineCoding::BYTES {
            if let Ok(lc) = LineCoding::unpack(&data[..LineCoding::BYTES]) {
                log::info!("CDC line coding: {} baud, {} data bits", lc.data_rate, lc.data_bits);
                self.line_coding = lc;
            }
        }
        true
    }

    fn on_in_complete(&mut self, usb: &mut UsbStack<D>, addr: EndpointAddress, _len: u16) {
        if addr != self.ep_in {
            return;
        }
        if !self.tx.is_empty() {
            self.kick_tx(usb);
        } else if self.last_sent == self.max_packet {
            // Message ended exactly on a packet boundary: delimit it.
            self.last_sent = 0;
            let _ = usb.start_transfer(self.ep_in, &[]);
        } else {
            self.last_sent = 0;
        }
    }

    fn on_out_complete(&mut self, usb: &mut UsbStack<D>, addr: EndpointAddress, _len: u16) {
        if addr != self.ep_out {
            return;
        }
        for byte in usb.received(addr) {
            if self.rx.push_back(*byte).is_err() {
                log::warn!("CDC RX overflow, byte dropped");
                break;
            }
        }
        if self.rx_free() >= self.max_packet as usize {
            let _ = usb.start_receive(addr, self.max_packet);
        } else {
            // No room for another full packet: hold the host off until
            // the application drains the FIFO.
            self.rx_paused = true;
            usb.send_nak(addr, true);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serial_state_packet_layout() {
        // The notification is bmRequestType 0xA1, code 0x20, wIndex =
        // interface, wLength = 2, then the bitmap.
        let iface = 0u16.to_le_bytes();
        let state = (SERIAL_STATE_DCD | SERIAL_STATE_DSR).to_le_bytes();
        let packet = [0xa1, 0x20, 0, 0, iface[0], iface[1], 2, 0, state[0], state[1]];
        assert_eq!(packet.len(), 10);
        assert_eq!(packet[8], 0x03);
    }
}
