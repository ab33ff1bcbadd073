//! Wire-format definitions for transport segments.
//!
//! Every datagram handed to the network layer carries exactly one
//! [`Segment`].  This module is responsible for:
//! - Defining the on-wire binary layout (ports, sequence fields, flags,
//!   window, checksum, payload).
//! - Serialising a [`Segment`] into a byte buffer ready for transmission.
//! - Deserialising a raw byte slice back into a [`Segment`], returning errors
//!   for truncated, oversized, or corrupted input.
//!
//! No I/O happens here — this is pure data transformation.
//!
//! # Wire format
//!
//! All multi-byte integers are **big-endian**.  Sequence and acknowledgement
//! numbers are 2 bytes wide in the [`WireProfile::Narrow`] profile and 4 bytes
//! wide in [`WireProfile::Wide`].
//!
//! ```text
//! +----------+----------+---------+---------+-------+--------+----------+---------+
//! | src port | dst port |   seq   |   ack   | flags | window | checksum | payload |
//! |    1     |    1     |  2 | 4  |  2 | 4  |   1   |   2    |    2     |  0..N   |
//! +----------+----------+---------+---------+-------+--------+----------+---------+
//! ```
//!
//! There is no length field: the payload is everything after the header.
//! The checksum covers header and payload with the checksum field zeroed.

use crate::error::PacketError;

/// Bit-flag constants for the `flags` header field.
pub mod flags {
    /// Synchronise sequence numbers (handshake).
    pub const SYN: u8 = 0b0000_0001;
    /// Acknowledgement field is valid.
    pub const ACK: u8 = 0b0000_0010;
    /// Sender has no more data to send.
    pub const FIN: u8 = 0b0000_0100;
    /// Payload is present.
    pub const DATA: u8 = 0b0000_1000;
    /// Reset the connection.
    pub const RST: u8 = 0b0001_0000;
}

/// Largest payload the codec accepts, independent of the configured MSS.
pub const MAX_PAYLOAD: usize = 128;

/// Width of the sequence and acknowledgement fields on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WireProfile {
    /// 16-bit sequence fields; 11-byte header.
    #[default]
    Narrow,
    /// 32-bit sequence fields; 15-byte header.
    Wide,
}

impl WireProfile {
    /// Byte width of one sequence field.
    pub const fn seq_width(self) -> usize {
        match self {
            WireProfile::Narrow => 2,
            WireProfile::Wide => 4,
        }
    }

    /// Byte length of the fixed header.
    pub const fn header_len(self) -> usize {
        // ports(2) + seq + ack + flags(1) + window(2) + checksum(2)
        2 + 2 * self.seq_width() + 5
    }

    /// Recover the full 32-bit sequence number closest to `reference` whose
    /// low bits match the value read off the wire.
    pub fn lift(self, wire: u32, reference: u32) -> u32 {
        match self {
            WireProfile::Wide => wire,
            WireProfile::Narrow => {
                let delta = (wire as u16).wrapping_sub(reference as u16) as i16;
                reference.wrapping_add(delta as i32 as u32)
            }
        }
    }

    fn off_ack(self) -> usize {
        2 + self.seq_width()
    }

    fn off_flags(self) -> usize {
        2 + 2 * self.seq_width()
    }

    fn off_window(self) -> usize {
        self.off_flags() + 1
    }

    fn off_checksum(self) -> usize {
        self.off_window() + 2
    }

    fn put_seq(self, buf: &mut [u8], value: u32) {
        match self {
            WireProfile::Narrow => buf.copy_from_slice(&(value as u16).to_be_bytes()),
            WireProfile::Wide => buf.copy_from_slice(&value.to_be_bytes()),
        }
    }

    fn get_seq(self, buf: &[u8]) -> u32 {
        match self {
            WireProfile::Narrow => u32::from(u16::from_be_bytes([buf[0], buf[1]])),
            WireProfile::Wide => u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
        }
    }
}

/// Fixed-size segment header.
///
/// Fields are in host byte order.  After [`Segment::decode`] with the narrow
/// profile, `seq` and `ack` hold only the 16 wire bits; callers lift them with
/// [`WireProfile::lift`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub src_port: u8,
    pub dst_port: u8,
    /// Sequence number of the first payload byte (or of the SYN/FIN).
    pub seq: u32,
    /// Next sequence number expected from the peer.
    pub ack: u32,
    /// Bitmask of [`flags`] constants.
    pub flags: u8,
    /// Free receive-buffer space of the sender of this segment.
    pub window: u16,
    /// Ones'-complement checksum; written by encode, verified by decode.
    pub checksum: u16,
}

/// A complete transport segment: header + payload bytes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segment {
    pub header: Header,
    pub payload: Vec<u8>,
}

impl Segment {
    /// `true` when every bit of `mask` is set.
    pub fn has(&self, mask: u8) -> bool {
        self.header.flags & mask == mask
    }

    /// Sequence space occupied by this segment: payload plus SYN and FIN.
    pub fn seq_len(&self) -> u32 {
        let mut len = self.payload.len() as u32;
        if self.has(flags::SYN) {
            len += 1;
        }
        if self.has(flags::FIN) {
            len += 1;
        }
        len
    }

    /// Serialise this segment into a newly allocated byte vector.
    ///
    /// The DATA flag and the checksum are derived from the payload; whatever
    /// the header holds for them is ignored.
    pub fn encode(&self, profile: WireProfile) -> Result<Vec<u8>, PacketError> {
        if self.payload.len() > MAX_PAYLOAD {
            return Err(PacketError::Oversized);
        }
        let hlen = profile.header_len();
        let w = profile.seq_width();
        let mut buf = vec![0u8; hlen + self.payload.len()];

        buf[0] = self.header.src_port;
        buf[1] = self.header.dst_port;
        profile.put_seq(&mut buf[2..2 + w], self.header.seq);
        profile.put_seq(&mut buf[profile.off_ack()..profile.off_ack() + w], self.header.ack);

        let mut f = self.header.flags & !flags::DATA;
        if !self.payload.is_empty() {
            f |= flags::DATA;
        }
        buf[profile.off_flags()] = f;

        let ow = profile.off_window();
        buf[ow..ow + 2].copy_from_slice(&self.header.window.to_be_bytes());
        buf[hlen..].copy_from_slice(&self.payload);

        // Checksum field is still zero here.
        let csum = checksum(&buf);
        let oc = profile.off_checksum();
        buf[oc..oc + 2].copy_from_slice(&csum.to_be_bytes());

        Ok(buf)
    }

    /// Parse a [`Segment`] from a raw byte slice.
    ///
    /// Returns [`Err`] if:
    /// - `buf` is shorter than the profile's header,
    /// - the payload exceeds [`MAX_PAYLOAD`], or
    /// - the checksum does not verify.
    pub fn decode(buf: &[u8], profile: WireProfile) -> Result<Self, PacketError> {
        let hlen = profile.header_len();
        if buf.len() < hlen {
            return Err(PacketError::Truncated);
        }
        if buf.len() - hlen > MAX_PAYLOAD {
            return Err(PacketError::Oversized);
        }

        let w = profile.seq_width();
        let oc = profile.off_checksum();
        let ow = profile.off_window();
        let stored = u16::from_be_bytes([buf[oc], buf[oc + 1]]);

        // Verify checksum: zero the stored field, recompute, compare.
        let mut scratch = buf.to_vec();
        scratch[oc..oc + 2].fill(0);
        if checksum(&scratch) != stored {
            return Err(PacketError::ChecksumInvalid);
        }

        Ok(Segment {
            header: Header {
                src_port: buf[0],
                dst_port: buf[1],
                seq: profile.get_seq(&buf[2..2 + w]),
                ack: profile.get_seq(&buf[profile.off_ack()..profile.off_ack() + w]),
                flags: buf[profile.off_flags()],
                window: u16::from_be_bytes([buf[ow], buf[ow + 1]]),
                checksum: stored,
            },
            payload: buf[hlen..].to_vec(),
        })
    }
}

/// Ones'-complement sum of 16-bit big-endian words (RFC 1071).
///
/// An odd trailing byte is padded with zero on the right.  The caller must
/// zero any checksum field within `data` first.
pub fn checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;
    let mut words = data.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }

    while sum >> 16 != 0 {
        sum = (sum & 0xffff) + (sum >> 16);
    }

    !(sum as u16)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_segment(seq: u32, ack: u32, f: u8, window: u16, payload: &[u8]) -> Segment {
        Segment {
            header: Header {
                src_port: 41,
                dst_port: 130,
                seq,
                ack,
                flags: f,
                window,
                checksum: 0, // overwritten by encode
            },
            payload: payload.to_vec(),
        }
    }

    #[test]
    fn header_lengths_per_profile() {
        assert_eq!(WireProfile::Narrow.header_len(), 11);
        assert_eq!(WireProfile::Wide.header_len(), 15);
    }

    #[test]
    fn wide_encode_decode_preserves_fields() {
        let seg = make_segment(0x0102_0304, 0x0506_0708, flags::ACK, 96, b"hello");
        let decoded = Segment::decode(&seg.encode(WireProfile::Wide).unwrap(), WireProfile::Wide)
            .unwrap();
        assert_eq!(decoded.header.src_port, 41);
        assert_eq!(decoded.header.dst_port, 130);
        assert_eq!(decoded.header.seq, 0x0102_0304);
        assert_eq!(decoded.header.ack, 0x0506_0708);
        assert_eq!(decoded.header.flags, flags::ACK | flags::DATA);
        assert_eq!(decoded.header.window, 96);
        assert_eq!(decoded.payload, b"hello");
    }

    #[test]
    fn narrow_profile_keeps_low_sixteen_bits() {
        let seg = make_segment(0x0001_ABCD, 0x0002_1234, flags::ACK, 0, b"");
        let bytes = seg.encode(WireProfile::Narrow).unwrap();
        assert_eq!(&bytes[2..4], &[0xAB, 0xCD]);
        assert_eq!(&bytes[4..6], &[0x12, 0x34]);
        let decoded = Segment::decode(&bytes, WireProfile::Narrow).unwrap();
        assert_eq!(decoded.header.seq, 0xABCD);
    }

    #[test]
    fn data_flag_follows_payload() {
        let empty = make_segment(0, 0, flags::DATA | flags::ACK, 0, b"").encode(WireProfile::Narrow);
        assert_eq!(empty.unwrap()[6], flags::ACK);
        let full = make_segment(0, 0, flags::ACK, 0, b"x").encode(WireProfile::Narrow);
        assert_eq!(full.unwrap()[6], flags::ACK | flags::DATA);
    }

    #[test]
    fn decode_empty_buffer_is_truncated() {
        assert_eq!(
            Segment::decode(&[], WireProfile::Narrow),
            Err(PacketError::Truncated)
        );
    }

    #[test]
    fn decode_short_header_is_truncated() {
        assert_eq!(
            Segment::decode(&[0u8; 12], WireProfile::Wide),
            Err(PacketError::Truncated)
        );
    }

    #[test]
    fn corrupt_byte_fails_checksum() {
        let mut bytes = make_segment(99, 0, flags::SYN, 128, b"test")
            .encode(WireProfile::Narrow)
            .unwrap();
        bytes[2] ^= 0xff;
        assert_eq!(
            Segment::decode(&bytes, WireProfile::Narrow),
            Err(PacketError::ChecksumInvalid)
        );
    }

    #[test]
    fn dropped_payload_byte_fails_checksum() {
        let mut bytes = make_segment(7, 0, flags::ACK, 0, b"data")
            .encode(WireProfile::Narrow)
            .unwrap();
        bytes.pop();
        assert_eq!(
            Segment::decode(&bytes, WireProfile::Narrow),
            Err(PacketError::ChecksumInvalid)
        );
    }

    #[test]
    fn oversized_payload_rejected_both_ways() {
        let seg = make_segment(0, 0, 0, 0, &[0u8; MAX_PAYLOAD + 1]);
        assert_eq!(seg.encode(WireProfile::Narrow), Err(PacketError::Oversized));
        let raw = vec![0u8; WireProfile::Narrow.header_len() + MAX_PAYLOAD + 1];
        assert_eq!(
            Segment::decode(&raw, WireProfile::Narrow),
            Err(PacketError::Oversized)
        );
    }

    #[test]
    fn checksum_matches_rfc1071_example() {
        // RFC 1071 §3 sample words: 0001 f203 f4f5 f6f7 -> sum ddf2, checksum 220d
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(checksum(&data), 0x220d);
    }

    #[test]
    fn odd_length_checksum_pads_right() {
        assert_eq!(checksum(&[0xAB]), !0xAB00u16);
    }

    #[test]
    fn seq_len_counts_syn_and_fin() {
        let syn = make_segment(0, 0, flags::SYN, 0, b"");
        assert_eq!(syn.seq_len(), 1);
        let fin_data = make_segment(0, 0, flags::FIN | flags::ACK, 0, b"abc");
        assert_eq!(fin_data.seq_len(), 4);
    }

    #[test]
    fn lift_recovers_nearest_value() {
        let p = WireProfile::Narrow;
        assert_eq!(p.lift(0x0005, 0x0001_FFF0), 0x0002_0005);
        assert_eq!(p.lift(0xFFF0, 0x0002_0005), 0x0001_FFF0);
        assert_eq!(p.lift(0x1234, 0x0000_1200), 0x1234);
        assert_eq!(WireProfile::Wide.lift(77, 1_000_000), 77);
    }
}
