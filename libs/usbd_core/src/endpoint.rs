//! Runtime endpoint state: one instance per active (index, direction).
//!
//! The endpoint couples the pure [`TransferState`] fragmentation machine to
//! the driver and owns a staging buffer so transfers survive across
//! interrupts without borrowing caller memory. IN transfers copy the
//! payload into staging once and feed it out packet by packet; OUT
//! transfers accumulate packets into staging until the expected length or a
//! short packet ends the message.

use crate::config::MAX_TRANSFER_SIZE;
use crate::driver::UsbDriver;
use crate::transfer::{OutProgress, TransferState};
use crate::{EndpointAddress, EndpointType, Result, UsbError};

pub struct Endpoint {
    address: EndpointAddress,
    kind: EndpointType,
    max_packet: u16,
    interval: u8,
    transfer: TransferState,
    staging: [u8; MAX_TRANSFER_SIZE],
    staged_len: u16,
}

impl Endpoint {
    pub(crate) fn new(address: EndpointAddress, kind: EndpointType, max_packet: u16, interval: u8) -> Self {
        Endpoint {
            address,
            kind,
            max_packet,
            interval,
            transfer: TransferState::new(),
            staging: [0; MAX_TRANSFER_SIZE],
            staged_len: 0,
        }
    }

    pub fn address(&self) -> EndpointAddress {
        self.address
    }

    pub fn kind(&self) -> EndpointType {
        self.kind
    }

    pub fn max_packet(&self) -> u16 {
        self.max_packet
    }

    pub fn interval(&self) -> u8 {
        self.interval
    }

    pub fn is_active(&self) -> bool {
        self.transfer.is_active()
    }

    pub fn next_pid(&self) -> u8 {
        self.transfer.next_pid()
    }

    /// Send `data` through this IN endpoint, fragmenting as needed.
    /// Fails with `WouldBlock` while a transfer is in flight.
    pub fn start_transfer<D: UsbDriver>(&mut self, driver: &mut D, data: &[u8]) -> Result<()> {
        debug_assert!(self.address.is_in());
        if self.transfer.is_active() {
            return Err(UsbError::WouldBlock);
        }
        if data.len() > MAX_TRANSFER_SIZE {
            return Err(UsbError::BufferOverflow);
        }
        self.staging[..data.len()].copy_from_slice(data);
        self.staged_len = data.len() as u16;

        let chunk = self.transfer.start_in(self.staged_len, self.max_packet);
        driver.write_packet(self.address.index(), &self.staging[..chunk as usize]);
        driver.arm_in(self.address.index(), self.transfer.take_pid(), chunk);
        Ok(())
    }

    /// Accept up to `len` bytes on this OUT endpoint. The message ends at
    /// `len` bytes or at the first short packet.
    pub fn start_receive<D: UsbDriver>(&mut self, driver: &mut D, len: u16) -> Result<()> {
        debug_assert!(!self.address.is_in());
        if self.transfer.is_active() {
            return Err(UsbError::WouldBlock);
        }
        if len as usize > MAX_TRANSFER_SIZE {
            return Err(UsbError::BufferOverflow);
        }
        self.staged_len = 0;
        let chunk = self.transfer.start_out(len, self.max_packet);
        driver.arm_out(self.address.index(), self.transfer.take_pid(), chunk);
        Ok(())
    }

    /// The payload gathered by the last completed OUT transfer.
    pub fn received(&self) -> &[u8] {
        &self.staging[..self.staged_len as usize]
    }

    /// An IN buffer completion arrived. Arms the next chunk if the
    /// transfer continues; returns the total length once it is done.
    pub(crate) fn handle_in_complete<D: UsbDriver>(&mut self, driver: &mut D) -> Option<u16> {
        match self.transfer.in_complete(self.max_packet) {
            Some((offset, len)) => {
                let (start, end) = (offset as usize, (offset + len) as usize);
                driver.write_packet(self.address.index(), &self.staging[start..end]);
                driver.arm_in(self.address.index(), self.transfer.take_pid(), len);
                None
            }
            None => Some(self.staged_len),
        }
    }

    /// An OUT buffer completion arrived. Copies the packet out of the
    /// hardware buffer, rearms if more is expected, and returns the total
    /// received length once the message is complete.
    pub(crate) fn handle_out_complete<D: UsbDriver>(&mut self, driver: &mut D) -> Option<u16> {
        let offset = self.transfer.out_offset() as usize;
        let actual = driver.read_packet(self.address.index(), &mut self.staging[offset..]) as u16;
        match self.transfer.out_complete(actual, self.max_packet) {
            OutProgress::Done { received } => {
                self.staged_len = received;
                Some(received)
            }
            OutProgress::Continue { next_chunk } => {
                driver.arm_out(self.address.index(), self.transfer.take_pid(), next_chunk);
                None
            }
        }
    }

    /// Queue a zero-length packet with the toggle forced to DATA1, the
    /// status-stage handshake of a control transaction. Works on both
    /// directions: IN sends the ZLP, OUT arms for its reception.
    pub fn send_zlp_data1<D: UsbDriver>(&mut self, driver: &mut D) {
        self.transfer.abort();
        self.transfer.force_pid(1);
        if self.address.is_in() {
            self.staged_len = 0;
            self.transfer.start_in(0, self.max_packet);
            driver.write_packet(self.address.index(), &[]);
            driver.arm_in(self.address.index(), self.transfer.take_pid(), 0);
        } else {
            self.staged_len = 0;
            self.transfer.start_out(0, self.max_packet);
            driver.arm_out(self.address.index(), self.transfer.take_pid(), 0);
        }
    }

    /// Set or clear the STALL handshake. Entering and leaving a stall both
    /// leave the toggle at DATA0, and a stall aborts any in-flight
    /// transfer.
    pub fn send_stall<D: UsbDriver>(&mut self, driver: &mut D, stalled: bool) {
        self.transfer.abort();
        self.transfer.force_pid(0);
        driver.set_stall(self.address, stalled);
    }

    pub fn is_stalled<D: UsbDriver>(&self, driver: &D) -> bool {
        driver.is_stalled(self.address)
    }

    /// Pause or resume this direction with NAK handshakes.
    pub fn send_nak<D: UsbDriver>(&mut self, driver: &mut D, nak: bool) {
        driver.set_nak(self.address, nak);
    }

    /// Return to the post-SETUP state: stall and NAK cleared, no transfer,
    /// toggle at DATA1.
    pub fn reset<D: UsbDriver>(&mut self, driver: &mut D) {
        driver.set_stall(self.address, false);
        driver.set_nak(self.address, false);
        self.transfer.reset();
    }

    /// Clear transfer state after a bus reset; data endpoints restart
    /// their toggle at DATA0.
    pub(crate) fn clear_after_bus_reset(&mut self) {
        self.transfer.abort();
        self.transfer.force_pid(if self.address.index() == 0 { 1 } else { 0 });
    }

    pub fn enable<D: UsbDriver>(&mut self, driver: &mut D, enabled: bool) {
        driver.enable_endpoint(self.address, enabled);
    }

    pub(crate) fn matches(&self, address: EndpointAddress) -> bool {
        self.address == address
    }
}
