//! Pure multi-packet transfer state machine.
//!
//! One instance tracks one endpoint direction. The machine fragments a
//! transfer into max-packet-size chunks, alternates the DATA0/DATA1 toggle
//! and decides when an OUT transfer terminates early on a short packet. It
//! never touches hardware, which keeps the invariants testable on the host.

/// Progress of an OUT transfer after absorbing one received packet.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum OutProgress {
    /// The transfer ended; the payload is `received` bytes long. Triggered
    /// by receiving everything that was asked for or by a short packet.
    Done { received: u16 },
    /// More data is expected; rearm for a chunk of `next_chunk` bytes.
    Continue { next_chunk: u16 },
}

/// Per-direction transfer bookkeeping.
///
/// While `active` is false the cursor fields are meaningless. While active,
/// `pos` bytes are in flight or done and `total - pos` remain. An active IN
/// transfer with `pos == total` has its last chunk in flight.
#[derive(Clone, Copy, Debug)]
pub struct TransferState {
    total: u16,
    pos: u16,
    current_chunk: u16,
    next_pid: u8,
    active: bool,
}

impl TransferState {
    pub const fn new() -> Self {
        TransferState { total: 0, pos: 0, current_chunk: 0, next_pid: 0, active: false }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn next_pid(&self) -> u8 {
        self.next_pid
    }

    /// Abandon any in-flight transfer and restart the toggle at DATA1,
    /// the first data stage value after a SETUP token.
    pub fn reset(&mut self) {
        self.active = false;
        self.next_pid = 1;
    }

    /// Force the toggle. STALL handling clears it to DATA0.
    pub fn force_pid(&mut self, pid: u8) {
        self.next_pid = pid & 1;
    }

    /// Drop the active flag without touching the toggle.
    pub fn abort(&mut self) {
        self.active = false;
    }

    /// Consume the toggle for the chunk about to be armed.
    pub fn take_pid(&mut self) -> u8 {
        let pid = self.next_pid;
        self.next_pid ^= 1;
        pid
    }

    /// Begin an IN transfer of `total` bytes. Returns the length of the
    /// first chunk, which the caller must copy out and arm.
    pub fn start_in(&mut self, total: u16, max_packet: u16) -> u16 {
        debug_assert!(!self.active);
        self.active = true;
        self.total = total;
        self.current_chunk = total.min(max_packet);
        self.pos = self.current_chunk;
        self.current_chunk
    }

    /// The armed IN chunk went out. Returns the `(offset, len)` of the next
    /// chunk to arm, or `None` when the transfer is complete.
    pub fn in_complete(&mut self, max_packet: u16) -> Option<(u16, u16)> {
        debug_assert!(self.active);
        if self.pos >= self.total {
            self.active = false;
            return None;
        }
        let offset = self.pos;
        let len = (self.total - self.pos).min(max_packet);
        self.current_chunk = len;
        self.pos += len;
        Some((offset, len))
    }

    /// Begin an OUT transfer expecting up to `total` bytes. Returns the
    /// length to arm for the first packet.
    pub fn start_out(&mut self, total: u16, max_packet: u16) -> u16 {
        debug_assert!(!self.active);
        self.active = true;
        self.total = total;
        self.pos = 0;
        self.current_chunk = total.min(max_packet);
        self.current_chunk
    }

    /// Offset at which the next received OUT chunk lands.
    pub fn out_offset(&self) -> u16 {
        self.pos
    }

    /// Absorb a received packet of `actual` bytes. A packet shorter than
    /// the armed chunk terminates the transfer (end-of-message for bulk
    /// and control OUT).
    pub fn out_complete(&mut self, actual: u16, max_packet: u16) -> OutProgress {
        debug_assert!(self.active);
        let short = actual < self.current_chunk;
        self.pos += actual;
        if short || self.pos >= self.total {
            self.active = false;
            return OutProgress::Done { received: self.pos };
        }
        let next = (self.total - self.pos).min(max_packet);
        self.current_chunk = next;
        OutProgress::Continue { next_chunk: next }
    }

    /// Engine invariant: processed + remaining always equals the transfer
    /// size, and no chunk exceeds the packet size.
    #[cfg(test)]
    fn check(&self, max_packet: u16) {
        if self.active {
            assert!(self.pos <= self.total);
            assert!(self.current_chunk <= max_packet);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_transfer_fragments_and_alternates_pid() {
        let mut t = TransferState::new();
        t.reset();
        let pre_pid = t.next_pid();

        // 130 bytes over a 64-byte pipe: 64 + 64 + 2.
        let first = t.start_in(130, 64);
        assert_eq!(first, 64);
        let mut pids = heapless::Vec::<u8, 8>::new();
        pids.push(t.take_pid()).unwrap();
        t.check(64);

        let mut chunks = heapless::Vec::<u16, 8>::new();
        chunks.push(first).unwrap();
        while let Some((offset, len)) = t.in_complete(64) {
            assert_eq!(offset as usize, chunks.iter().map(|c| *c as usize).sum::<usize>());
            chunks.push(len).unwrap();
            pids.push(t.take_pid()).unwrap();
            t.check(64);
        }
        assert!(!t.is_active());
        assert_eq!(chunks.as_slice(), &[64, 64, 2]);
        // ceil(130 / 64) packets with alternating PID from the initial one.
        for (i, pid) in pids.iter().enumerate() {
            assert_eq!(*pid, (pre_pid as usize + i) as u8 & 1);
        }
    }

    #[test]
    fn in_transfer_exact_multiple_has_no_trailing_chunk() {
        let mut t = TransferState::new();
        t.reset();
        assert_eq!(t.start_in(128, 64), 64);
        assert_eq!(t.in_complete(64), Some((64, 64)));
        assert_eq!(t.in_complete(64), None);
        assert!(!t.is_active());
    }

    #[test]
    fn zero_length_in_completes_immediately() {
        let mut t = TransferState::new();
        t.reset();
        assert_eq!(t.start_in(0, 64), 0);
        assert_eq!(t.in_complete(64), None);
        assert!(!t.is_active());
    }

    #[test]
    fn out_transfer_terminates_on_short_packet() {
        let mut t = TransferState::new();
        t.reset();
        assert_eq!(t.start_out(512, 64), 64);
        assert_eq!(t.out_complete(64, 64), OutProgress::Continue { next_chunk: 64 });
        // 31-byte packet while 64 were armed: end of message.
        assert_eq!(t.out_complete(31, 64), OutProgress::Done { received: 95 });
        assert!(!t.is_active());
    }

    #[test]
    fn out_transfer_runs_to_expected_length() {
        let mut t = TransferState::new();
        t.reset();
        assert_eq!(t.start_out(128, 64), 64);
        assert_eq!(t.out_complete(64, 64), OutProgress::Continue { next_chunk: 64 });
        assert_eq!(t.out_complete(64, 64), OutProgress::Done { received: 128 });
    }

    #[test]
    fn reset_restores_data1() {
        let mut t = TransferState::new();
        t.start_in(10, 64);
        t.take_pid();
        t.reset();
        assert!(!t.is_active());
        assert_eq!(t.next_pid(), 1);
    }

    #[test]
    fn force_pid_zero_matches_stall_discipline() {
        let mut t = TransferState::new();
        t.reset();
        t.force_pid(0);
        assert_eq!(t.take_pid(), 0);
        assert_eq!(t.take_pid(), 1);
    }
}
