//! Error types shared across the crate.
//!
//! Only terminal or caller-visible conditions live in [`TransportError`].
//! Local recovery (retransmission, duplicate ACKs, malformed segments) is
//! handled inside the engine and never surfaces here.

use thiserror::Error;

/// Errors that can arise when parsing or building a wire segment.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketError {
    /// Buffer shorter than the fixed header for the active wire profile.
    #[error("segment truncated: shorter than the fixed header")]
    Truncated,
    /// Payload longer than the largest payload the codec accepts.
    #[error("segment payload exceeds the maximum payload size")]
    Oversized,
    /// Checksum did not match the recomputed value.
    #[error("segment checksum verification failed")]
    ChecksumInvalid,
}

/// The network layer refused or failed to transmit a datagram.
///
/// The engine treats this exactly like a lost segment.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("datagram to node {dest_addr} could not be sent: {reason}")]
pub struct SendFailed {
    pub dest_addr: u16,
    pub reason: String,
}

/// Errors reported through the application-facing socket API.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// Every socket slot is in use.
    #[error("no free socket slots")]
    NoFreeSlots,
    /// The handle is unknown, released, or reserved.
    #[error("invalid socket handle")]
    InvalidHandle,
    /// Another live handle already owns this port/endpoint tuple.
    #[error("address already in use")]
    AddressInUse,
    /// Retry ceiling exceeded or the peer reset the connection.
    #[error("connection reset")]
    ConnectionReset,
    /// Operation not permitted in the connection's current state.
    #[error("operation not valid in the current connection state")]
    BadState,
    /// Peer closed its side and every delivered byte has been read.
    #[error("end of stream")]
    Eof,
}

/// Rejected [`crate::config::TransportConfig`] values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("mss must be between 1 and {max} bytes, got {got}")]
    Mss { got: usize, max: usize },
    #[error("buffer size must be between mss and 65535 bytes, got {0}")]
    BufferSize(usize),
    #[error("socket table needs between 2 and 255 slots, got {0}")]
    SocketSlots(usize),
    #[error("rto bounds must satisfy min <= initial <= max")]
    RtoBounds,
    #[error("delayed-ack delay must be shorter than the minimum rto")]
    DelayedAck,
    #[error("retry ceiling must be at least 1")]
    Retries,
}

/// A control-channel message that could not be parsed as a command.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    #[error("empty control message")]
    Empty,
    #[error("unknown control command code {0}")]
    UnknownCode(u8),
}
