//! A scripted, fully in-memory [`UsbDriver`] for host-side tests.
//!
//! The mock plays both roles of the wire: tests act as the host
//! (`host_setup`, `host_write_out`, `host_read_in`, `host_bus_reset`) and
//! the stack consumes the resulting events through `poll`. Buffer copies
//! are performed byte by byte, matching controllers that forbid unaligned
//! DPRAM access. A journal records address writes and host observations so
//! tests can assert ordering contracts such as the deferred SET_ADDRESS
//! commit.

use heapless::{Deque, Vec};

use crate::driver::{DriverError, PollResult, UsbDriver};
use crate::{EndpointAddress, EndpointType};

const NUM_INDEXES: usize = 16;
const PACKET_SIZE: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum MockOp {
    SetAddress(u8),
    ResetAddress,
    /// The host collected an IN packet of this length from this index.
    HostReadIn(u8, usize),
    HostSetup,
}

#[derive(Clone, Copy, Debug)]
enum MockEvent {
    BusReset,
    Setup([u8; 8]),
    InComplete(u8),
    OutComplete(u8),
}

#[derive(Clone, Copy)]
struct DirState {
    allocated: bool,
    stalled: bool,
    nak: bool,
    enabled: bool,
    armed: bool,
    pid: u8,
    armed_len: u16,
    buf: [u8; PACKET_SIZE],
    len: usize,
}

impl DirState {
    const fn new() -> Self {
        DirState {
            allocated: false,
            stalled: false,
            nak: false,
            enabled: false,
            armed: false,
            pid: 0,
            armed_len: 0,
            buf: [0; PACKET_SIZE],
            len: 0,
        }
    }
}

pub struct MockDriver {
    // [index][0] = OUT, [index][1] = IN.
    eps: [[DirState; 2]; NUM_INDEXES],
    events: Deque<MockEvent, 32>,
    pub address: u8,
    pub pullup: bool,
    pub irq: bool,
    pub journal: Vec<MockOp, 64>,
}

fn dir_slot(addr: EndpointAddress) -> usize {
    if addr.is_in() { 1 } else { 0 }
}

impl MockDriver {
    pub fn new() -> Self {
        MockDriver {
            eps: [[DirState::new(); 2]; NUM_INDEXES],
            events: Deque::new(),
            address: 0,
            pullup: false,
            irq: false,
            journal: Vec::new(),
        }
    }

    fn note(&mut self, op: MockOp) {
        let _ = self.journal.push(op);
    }

    // Host-side controls.

    pub fn host_bus_reset(&mut self) {
        let _ = self.events.push_back(MockEvent::BusReset);
    }

    pub fn host_setup(&mut self, raw: [u8; 8]) {
        // A SETUP token clears a control stall in hardware.
        self.eps[0][0].stalled = false;
        self.eps[0][1].stalled = false;
        self.note(MockOp::HostSetup);
        let _ = self.events.push_back(MockEvent::Setup(raw));
    }

    /// Collect the armed IN packet on `index`, as the host would on an IN
    /// token. Returns the toggle it was sent with and the payload.
    pub fn host_read_in(&mut self, index: u8) -> Option<(u8, Vec<u8, PACKET_SIZE>)> {
        let ep = &mut self.eps[index as usize][1];
        if !ep.armed || ep.stalled {
            return None;
        }
        ep.armed = false;
        let mut data = Vec::new();
        let _ = data.extend_from_slice(&ep.buf[..ep.len]);
        let pid = ep.pid;
        self.note(MockOp::HostReadIn(index, data.len()));
        let _ = self.events.push_back(MockEvent::InComplete(index));
        Some((pid, data))
    }

    /// Deliver an OUT packet to `index`. Refused (as a retried NAK would
    /// be on the wire) while the endpoint is not armed, stalled or NAKing.
    pub fn host_write_out(&mut self, index: u8, data: &[u8]) -> bool {
        let ep = &mut self.eps[index as usize][0];
        if !ep.armed || ep.stalled || ep.nak {
            return false;
        }
        ep.armed = false;
        ep.len = data.len().min(PACKET_SIZE);
        ep.buf[..ep.len].copy_from_slice(&data[..ep.len]);
        let _ = self.events.push_back(MockEvent::OutComplete(index));
        true
    }

    pub fn out_armed(&self, index: u8) -> bool {
        self.eps[index as usize][0].armed
    }

    pub fn in_armed(&self, index: u8) -> bool {
        self.eps[index as usize][1].armed
    }

    pub fn is_nak(&self, addr: EndpointAddress) -> bool {
        self.eps[addr.index() as usize][dir_slot(addr)].nak
    }

    pub fn is_enabled(&self, addr: EndpointAddress) -> bool {
        self.eps[addr.index() as usize][dir_slot(addr)].enabled
    }
}

impl UsbDriver for MockDriver {
    fn alloc_endpoint(
        &mut self,
        addr: EndpointAddress,
        _kind: EndpointType,
        max_packet: u16,
    ) -> Result<(), DriverError> {
        if max_packet as usize > PACKET_SIZE {
            return Err(DriverError::Unsupported);
        }
        let ep = &mut self.eps[addr.index() as usize][dir_slot(addr)];
        if ep.allocated {
            return Err(DriverError::EndpointTaken);
        }
        ep.allocated = true;
        Ok(())
    }

    fn write_packet(&mut self, index: u8, data: &[u8]) {
        let ep = &mut self.eps[index as usize][1];
        ep.len = data.len();
        for (to, from) in ep.buf.iter_mut().zip(data) {
            *to = *from;
        }
    }

    fn read_packet(&mut self, index: u8, buf: &mut [u8]) -> usize {
        let ep = &self.eps[index as usize][0];
        let len = ep.len.min(buf.len());
        for (to, from) in buf.iter_mut().zip(&ep.buf[..len]) {
            *to = *from;
        }
        len
    }

    fn arm_in(&mut self, index: u8, pid: u8, len: u16) {
        let ep = &mut self.eps[index as usize][1];
        ep.armed = true;
        ep.pid = pid;
        ep.armed_len = len;
        ep.len = len as usize;
    }

    fn arm_out(&mut self, index: u8, pid: u8, len: u16) {
        let ep = &mut self.eps[index as usize][0];
        ep.armed = true;
        ep.pid = pid;
        ep.armed_len = len;
    }

    fn set_stall(&mut self, addr: EndpointAddress, stalled: bool) {
        let ep = &mut self.eps[addr.index() as usize][dir_slot(addr)];
        ep.stalled = stalled;
        if stalled {
            ep.armed = false;
        }
    }

    fn is_stalled(&self, addr: EndpointAddress) -> bool {
        self.eps[addr.index() as usize][dir_slot(addr)].stalled
    }

    fn set_nak(&mut self, addr: EndpointAddress, nak: bool) {
        self.eps[addr.index() as usize][dir_slot(addr)].nak = nak;
    }

    fn enable_endpoint(&mut self, addr: EndpointAddress, enabled: bool) {
        self.eps[addr.index() as usize][dir_slot(addr)].enabled = enabled;
    }

    fn set_address(&mut self, address: u8) {
        self.address = address;
        self.note(MockOp::SetAddress(address));
    }

    fn reset_address(&mut self) {
        self.address = 0;
        self.note(MockOp::ResetAddress);
    }

    fn pullup_enable(&mut self, enabled: bool) {
        self.pullup = enabled;
    }

    fn irq_enable(&mut self, enabled: bool) {
        self.irq = enabled;
    }

    fn poll(&mut self) -> PollResult {
        let mut result = PollResult::default();
        while let Some(event) = self.events.pop_front() {
            match event {
                MockEvent::BusReset => result.bus_reset = true,
                MockEvent::Setup(raw) => {
                    if result.setup.is_some() {
                        // One SETUP per poll; leave the rest queued.
                        let _ = self.events.push_front(MockEvent::Setup(raw));
                        break;
                    }
                    result.setup = Some(raw);
                }
                MockEvent::InComplete(index) => result.ep_in_complete |= 1 << index,
                MockEvent::OutComplete(index) => result.ep_out_complete |= 1 << index,
            }
        }
        result
    }
}
