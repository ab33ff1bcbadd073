//! Fixed-capacity circular byte buffers for the send and receive paths.
//!
//! Both buffers index their contents by sequence number, so the connection
//! layer never touches raw ring indices.  Capacity is fixed at construction;
//! a write that does not fit is truncated and the caller told how much was
//! taken.
//!
//! # Send side
//!
//! ```text
//!   acked        sent      high_water     written  (+1 if FIN queued)
//!     │ in flight  │ rewound  │   unsent     │
//!  ───┼────────────┼──────────┼──────────────┼──▶ seq space
//! ```
//!
//! `sent` moves back to `acked` when a retransmission rewinds the stream;
//! `high_water` never moves back, so a segment starting below it is a
//! retransmission.
//!
//! # Receive side
//!
//! ```text
//!   read       delivered == expected
//!     │ readable  │
//!  ───┼───────────┼──────────────▶ seq space
//! ```

use crate::seq::{seq_diff, seq_le, seq_lt, seq_max};

/// Byte storage shared by both buffer kinds.
#[derive(Debug)]
struct Ring {
    storage: Box<[u8]>,
    start: usize,
    len: usize,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            storage: vec![0u8; capacity].into_boxed_slice(),
            start: 0,
            len: 0,
        }
    }

    fn capacity(&self) -> usize {
        self.storage.len()
    }

    fn free(&self) -> usize {
        self.capacity() - self.len
    }

    /// Append as much of `data` as fits; returns the count taken.
    fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free());
        let cap = self.capacity();
        let tail = (self.start + self.len) % cap;
        let first = n.min(cap - tail);
        self.storage[tail..tail + first].copy_from_slice(&data[..first]);
        self.storage[..n - first].copy_from_slice(&data[first..n]);
        self.len += n;
        n
    }

    /// Copy bytes starting `offset` bytes after the head into `out`.
    fn copy_out(&self, offset: usize, out: &mut [u8]) -> usize {
        if offset >= self.len {
            return 0;
        }
        let n = out.len().min(self.len - offset);
        let cap = self.capacity();
        let from = (self.start + offset) % cap;
        let first = n.min(cap - from);
        out[..first].copy_from_slice(&self.storage[from..from + first]);
        out[first..n].copy_from_slice(&self.storage[..n - first]);
        n
    }

    /// Drop `n` bytes from the head.
    fn discard(&mut self, n: usize) {
        let n = n.min(self.len);
        self.start = (self.start + n) % self.capacity();
        self.len -= n;
    }

    fn truncate(&mut self, len: usize) {
        self.len = self.len.min(len);
    }

    fn clear(&mut self) {
        self.start = 0;
        self.len = 0;
    }
}

// ---------------------------------------------------------------------------
// SendBuffer
// ---------------------------------------------------------------------------

/// Outbound bytes from application write until cumulative acknowledgement.
#[derive(Debug)]
pub struct SendBuffer {
    ring: Ring,
    /// Oldest unacknowledged sequence number.
    acked: u32,
    /// Next sequence number to put on the wire.
    sent: u32,
    /// One past the highest sequence number ever put on the wire.
    high_water: u32,
    /// Sequence number of the first byte held in the ring.
    data_start: u32,
    /// Sequence number occupied by our FIN, once queued.
    fin: Option<u32>,
}

impl SendBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Ring::new(capacity),
            acked: 0,
            sent: 0,
            high_water: 0,
            data_start: 1,
            fin: None,
        }
    }

    /// Start a fresh stream whose SYN occupies `iss`; data begins at `iss + 1`.
    pub fn reset(&mut self, iss: u32) {
        self.ring.clear();
        self.acked = iss;
        self.sent = iss;
        self.high_water = iss;
        self.data_start = iss.wrapping_add(1);
        self.fin = None;
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Room left for application writes.
    pub fn free(&self) -> usize {
        self.ring.free()
    }

    /// Bytes held: in flight plus not yet sent.
    pub fn len(&self) -> usize {
        self.ring.len
    }

    pub fn is_empty(&self) -> bool {
        self.ring.len == 0
    }

    pub fn acked(&self) -> u32 {
        self.acked
    }

    pub fn sent(&self) -> u32 {
        self.sent
    }

    pub fn high_water(&self) -> u32 {
        self.high_water
    }

    /// Sequence number the next application byte will receive.
    pub fn written(&self) -> u32 {
        self.data_start.wrapping_add(self.ring.len as u32)
    }

    pub fn fin_seq(&self) -> Option<u32> {
        self.fin
    }

    /// Append application bytes; returns how many fit.  Nothing is accepted
    /// once a FIN has been queued.
    pub fn write(&mut self, data: &[u8]) -> usize {
        if self.fin.is_some() {
            return 0;
        }
        self.ring.push(data)
    }

    /// Bytes between `acked` and `sent`.
    pub fn in_flight(&self) -> u32 {
        seq_diff(self.acked, self.sent)
    }

    /// Data bytes at or after `sent` that have not been put on the wire since
    /// the last rewind.
    pub fn unsent(&self) -> u32 {
        let from = seq_max(self.sent, self.data_start);
        let written = self.written();
        if seq_lt(from, written) {
            seq_diff(from, written)
        } else {
            0
        }
    }

    /// Copy the stored bytes in `[lo, hi)` without consuming them.  The range
    /// is clipped to what the buffer holds.
    pub fn peek_range(&self, lo: u32, hi: u32) -> Vec<u8> {
        let lo = seq_max(lo, self.data_start);
        let hi = if seq_le(hi, self.written()) { hi } else { self.written() };
        if !seq_lt(lo, hi) {
            return Vec::new();
        }
        let mut out = vec![0u8; seq_diff(lo, hi) as usize];
        let n = self.ring.copy_out(seq_diff(self.data_start, lo) as usize, &mut out);
        out.truncate(n);
        out
    }

    /// Record that everything before `upto` has been transmitted.
    pub fn mark_sent(&mut self, upto: u32) {
        self.sent = upto;
        self.high_water = seq_max(self.high_water, upto);
    }

    /// Extend `high_water` over a window probe without moving `sent`.
    pub fn mark_probed(&mut self, upto: u32) {
        self.high_water = seq_max(self.high_water, upto);
    }

    /// Go back to the oldest unacknowledged byte.
    pub fn rewind(&mut self) {
        self.sent = self.acked;
    }

    /// Apply a cumulative acknowledgement.  Returns the number of newly
    /// acknowledged sequence numbers; `0` for stale or out-of-range values.
    pub fn ack_advance(&mut self, ack: u32) -> u32 {
        if !seq_lt(self.acked, ack) || !seq_le(ack, self.high_water) {
            return 0;
        }
        let newly = seq_diff(self.acked, ack);
        let data_end = if seq_le(ack, self.written()) { ack } else { self.written() };
        if seq_lt(self.data_start, data_end) {
            let n = seq_diff(self.data_start, data_end);
            self.ring.discard(n as usize);
            self.data_start = data_end;
        }
        self.acked = ack;
        if seq_lt(self.sent, ack) {
            self.sent = ack;
        }
        newly
    }

    /// Queue a FIN after the last written byte.
    pub fn queue_fin(&mut self) -> u32 {
        let seq = self.written();
        self.fin = Some(seq);
        seq
    }

    /// Drop bytes that were never transmitted.  Returns how many were dropped.
    pub fn discard_unsent(&mut self) -> usize {
        let keep = if seq_lt(self.data_start, self.high_water) {
            seq_diff(self.data_start, self.high_water) as usize
        } else {
            0
        };
        let before = self.ring.len;
        self.ring.truncate(keep);
        before - self.ring.len
    }

    /// `true` once the queued FIN has been acknowledged.
    pub fn fin_acked(&self) -> bool {
        self.fin.is_some_and(|f| seq_lt(f, self.acked))
    }

    /// `true` when nothing transmitted remains unacknowledged.
    pub fn all_acked(&self) -> bool {
        self.acked == self.high_water
    }
}

// ---------------------------------------------------------------------------
// RecvBuffer
// ---------------------------------------------------------------------------

/// Result of offering a segment's payload to the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    /// Payload started at the next expected byte; `taken` of `offered` bytes
    /// fit in the free space.
    InOrder { taken: usize, offered: usize },
    /// Every byte was already received.
    Duplicate,
    /// Payload starts beyond the next expected byte; dropped.
    OutOfOrder,
}

/// Inbound bytes from in-order arrival until the application reads them.
#[derive(Debug)]
pub struct RecvBuffer {
    ring: Ring,
    /// Sequence number of the first unread byte.
    read: u32,
    /// Bytes before this are visible to the application.
    delivered: u32,
    /// Next in-order sequence number expected from the peer.
    expected: u32,
}

impl RecvBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: Ring::new(capacity),
            read: 0,
            delivered: 0,
            expected: 0,
        }
    }

    /// Start a fresh stream after the peer's SYN at `irs`.
    pub fn reset(&mut self, irs: u32) {
        let first = irs.wrapping_add(1);
        self.ring.clear();
        self.read = first;
        self.delivered = first;
        self.expected = first;
    }

    /// Free space, i.e. the window to advertise.
    pub fn free(&self) -> usize {
        self.ring.free()
    }

    pub fn expected(&self) -> u32 {
        self.expected
    }

    /// Bytes the application can read right now.
    pub fn available(&self) -> usize {
        seq_diff(self.read, self.delivered) as usize
    }

    /// Offer a segment payload starting at `seq`.
    ///
    /// Only data contiguous with `expected` is stored; leading bytes already
    /// received are trimmed and trailing bytes beyond the free space dropped.
    pub fn accept(&mut self, seq: u32, payload: &[u8]) -> Accepted {
        let end = seq.wrapping_add(payload.len() as u32);
        if seq_le(end, self.expected) {
            return Accepted::Duplicate;
        }
        if seq_lt(self.expected, seq) {
            return Accepted::OutOfOrder;
        }
        let skip = seq_diff(seq, self.expected) as usize;
        let fresh = &payload[skip..];
        let taken = self.ring.push(fresh);
        self.expected = self.expected.wrapping_add(taken as u32);
        self.deliver_advance(self.expected);
        Accepted::InOrder {
            taken,
            offered: fresh.len(),
        }
    }

    /// Make received bytes before `seq` visible to the application.
    pub fn deliver_advance(&mut self, seq: u32) {
        if seq_lt(self.delivered, seq) && seq_le(seq, self.expected) {
            self.delivered = seq;
        }
    }

    /// Append bytes produced locally straight into the readable region.
    pub fn push_local(&mut self, data: &[u8]) -> usize {
        let n = self.ring.push(data);
        self.expected = self.expected.wrapping_add(n as u32);
        self.deliver_advance(self.expected);
        n
    }

    /// Copy up to `buf.len()` readable bytes into `buf` and consume them.
    pub fn read(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.available());
        let copied = self.ring.copy_out(0, &mut buf[..n]);
        self.ring.discard(copied);
        self.read = self.read.wrapping_add(copied as u32);
        copied
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_is_bounded_by_free_space() {
        let mut s = SendBuffer::new(8);
        s.reset(0);
        assert_eq!(s.write(b"hello"), 5);
        assert_eq!(s.write(b"world"), 3);
        assert_eq!(s.free(), 0);
        assert_eq!(s.write(b"!"), 0);
        assert_eq!(s.written(), 9);
    }

    #[test]
    fn peek_does_not_consume() {
        let mut s = SendBuffer::new(16);
        s.reset(99);
        s.write(b"abcdef");
        assert_eq!(s.peek_range(102, 105), b"cde");
        assert_eq!(s.peek_range(100, 200), b"abcdef");
        assert_eq!(s.len(), 6);
    }

    #[test]
    fn ack_advance_frees_space_and_wraps_ring() {
        let mut s = SendBuffer::new(8);
        s.reset(0);
        s.write(b"abcdefgh");
        s.mark_sent(9);
        assert_eq!(s.ack_advance(6), 6);
        assert_eq!(s.free(), 5);
        assert_eq!(s.write(b"XYZ"), 3);
        assert_eq!(s.peek_range(6, 12), b"fghXYZ");
    }

    #[test]
    fn ack_outside_sent_range_ignored() {
        let mut s = SendBuffer::new(8);
        s.reset(10);
        s.write(b"abcd");
        s.mark_sent(13);
        assert_eq!(s.ack_advance(14), 0, "beyond high water");
        assert_eq!(s.ack_advance(10), 0, "not past acked");
        assert_eq!(s.ack_advance(12), 2);
        assert_eq!(s.ack_advance(11), 0, "stale");
    }

    #[test]
    fn rewind_keeps_high_water() {
        let mut s = SendBuffer::new(16);
        s.reset(0);
        s.write(b"0123456789");
        s.mark_sent(11);
        s.ack_advance(3);
        s.rewind();
        assert_eq!(s.sent(), 3);
        assert_eq!(s.high_water(), 11);
        assert_eq!(s.unsent(), 8);
    }

    #[test]
    fn fin_occupies_one_sequence_number() {
        let mut s = SendBuffer::new(8);
        s.reset(0);
        s.write(b"ab");
        s.mark_sent(3);
        assert_eq!(s.queue_fin(), 3);
        assert_eq!(s.write(b"more"), 0);
        s.mark_sent(4);
        assert!(!s.fin_acked());
        assert_eq!(s.ack_advance(4), 4, "SYN, two bytes and FIN");
        assert!(s.fin_acked());
        assert!(s.is_empty());
    }

    #[test]
    fn discard_unsent_keeps_transmitted_bytes() {
        let mut s = SendBuffer::new(16);
        s.reset(0);
        s.write(b"abcdefgh");
        s.mark_sent(5);
        s.rewind();
        assert_eq!(s.discard_unsent(), 4);
        assert_eq!(s.written(), 5);
        assert_eq!(s.peek_range(1, 5), b"abcd");
    }

    #[test]
    fn receive_in_order_then_read() {
        let mut r = RecvBuffer::new(16);
        r.reset(41);
        assert_eq!(
            r.accept(42, b"hello"),
            Accepted::InOrder { taken: 5, offered: 5 }
        );
        assert_eq!(r.expected(), 47);
        assert_eq!(r.free(), 11);
        let mut buf = [0u8; 3];
        assert_eq!(r.read(&mut buf), 3);
        assert_eq!(&buf, b"hel");
        assert_eq!(r.available(), 2);
        assert_eq!(r.free(), 14);
    }

    #[test]
    fn receive_gap_and_duplicate_dropped() {
        let mut r = RecvBuffer::new(16);
        r.reset(0);
        assert_eq!(r.accept(5, b"later"), Accepted::OutOfOrder);
        r.accept(1, b"abc");
        assert_eq!(r.accept(1, b"abc"), Accepted::Duplicate);
        assert_eq!(r.expected(), 4);
        assert_eq!(r.available(), 3);
    }

    #[test]
    fn receive_trims_overlap_and_overflow() {
        let mut r = RecvBuffer::new(6);
        r.reset(0);
        r.accept(1, b"ab");
        assert_eq!(
            r.accept(2, b"bcdefgh"),
            Accepted::InOrder { taken: 4, offered: 6 }
        );
        let mut buf = [0u8; 8];
        let n = r.read(&mut buf);
        assert_eq!(&buf[..n], b"abcdef");
    }

    #[test]
    fn receive_across_sequence_wrap() {
        let mut r = RecvBuffer::new(16);
        r.reset(u32::MAX - 2);
        assert!(matches!(
            r.accept(u32::MAX - 1, b"wrapping"),
            Accepted::InOrder { taken: 8, .. }
        ));
        assert_eq!(r.expected(), 6);
    }
}
