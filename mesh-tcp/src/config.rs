//! Tunable transport parameters.
//!
//! The defaults describe a mote-class node: 128-byte socket buffers, tiny
//! segments, and second-scale timers.

use std::time::Duration;

use crate::error::ConfigError;
use crate::packet::{WireProfile, MAX_PAYLOAD};

/// Default per-connection send/receive buffer capacity in bytes.
pub const SOCKET_BUFFER_SIZE: usize = 128;
/// Default number of socket slots, including the reserved control slot.
pub const MAX_NUM_OF_SOCKETS: usize = 10;

/// Adjustable transport parameters. One instance is shared by every socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Capacity of each send and receive ring buffer.
    pub buffer_size: usize,
    /// Largest payload placed in a single segment.
    pub mss: usize,
    /// Socket table size; slot 0 is the control socket.
    pub max_sockets: usize,
    /// Width of sequence/ack fields on the wire.
    pub profile: WireProfile,
    /// RTO used before the first RTT sample.
    pub initial_rto: Duration,
    pub min_rto: Duration,
    pub max_rto: Duration,
    /// Consecutive retransmissions tolerated before the connection is reset.
    pub max_retries: u32,
    /// Longest an in-order segment waits for a coalesced ACK.
    pub delayed_ack: Duration,
    /// Interval between zero-window probes.
    pub persist_interval: Duration,
    /// Maximum segment lifetime; time-wait lasts twice this.
    pub msl: Duration,
    /// Slow-start threshold at connection start, in bytes.
    pub initial_ssthresh: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            buffer_size: SOCKET_BUFFER_SIZE,
            mss: 16,
            max_sockets: MAX_NUM_OF_SOCKETS,
            profile: WireProfile::Narrow,
            initial_rto: Duration::from_millis(1000),
            min_rto: Duration::from_millis(200),
            max_rto: Duration::from_secs(60),
            max_retries: 6,
            delayed_ack: Duration::from_millis(100),
            persist_interval: Duration::from_millis(2000),
            msl: Duration::from_millis(2000),
            initial_ssthresh: 0xFFFF,
        }
    }
}

impl TransportConfig {
    /// Check the parameters for internal consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mss == 0 || self.mss > MAX_PAYLOAD {
            return Err(ConfigError::Mss {
                got: self.mss,
                max: MAX_PAYLOAD,
            });
        }
        if self.buffer_size < self.mss || self.buffer_size > u16::MAX as usize {
            return Err(ConfigError::BufferSize(self.buffer_size));
        }
        if !(2..=255).contains(&self.max_sockets) {
            return Err(ConfigError::SocketSlots(self.max_sockets));
        }
        if self.min_rto > self.initial_rto || self.initial_rto > self.max_rto {
            return Err(ConfigError::RtoBounds);
        }
        if self.delayed_ack >= self.min_rto {
            return Err(ConfigError::DelayedAck);
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Retries);
        }
        Ok(())
    }

    /// How long a connection lingers in time-wait.
    pub fn time_wait(&self) -> Duration {
        self.msl * 2
    }

    pub(crate) fn mss_u32(&self) -> u32 {
        self.mss as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(TransportConfig::default().validate(), Ok(()));
    }

    #[test]
    fn time_wait_is_twice_msl() {
        let cfg = TransportConfig::default();
        assert_eq!(cfg.time_wait(), Duration::from_millis(4000));
    }

    #[test]
    fn rejects_oversized_mss() {
        let cfg = TransportConfig {
            mss: MAX_PAYLOAD + 1,
            ..TransportConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::Mss { .. })));
    }

    #[test]
    fn rejects_buffer_smaller_than_mss() {
        let cfg = TransportConfig {
            buffer_size: 8,
            ..TransportConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::BufferSize(8)));
    }

    #[test]
    fn rejects_delayed_ack_not_below_min_rto() {
        let cfg = TransportConfig {
            delayed_ack: Duration::from_millis(200),
            min_rto: Duration::from_millis(200),
            ..TransportConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::DelayedAck));
    }

    #[test]
    fn rejects_single_slot_table() {
        let cfg = TransportConfig {
            max_sockets: 1,
            ..TransportConfig::default()
        };
        assert_eq!(cfg.validate(), Err(ConfigError::SocketSlots(1)));
    }
}
