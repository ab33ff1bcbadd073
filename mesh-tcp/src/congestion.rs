//! Sender-side congestion control: slow start, congestion avoidance, and
//! fast retransmit / fast recovery (Reno-style AIMD).
//!
//! All windows are in bytes; one "segment" is the configured MSS.
//!
//! ```text
//!  SlowStart ──cwnd ≥ ssthresh──▶ CongestionAvoidance
//!      ▲  │                              │
//!      │  └──────3 dup ACKs──────┐       │ 3 dup ACKs
//!      │                         ▼       ▼
//!   timeout (any phase)       FastRecovery ──new ACK──▶ CongestionAvoidance
//! ```

use crate::config::TransportConfig;

/// Upper bound for `cwnd`; the peer can never advertise more than this.
const MAX_CWND: u32 = u16::MAX as u32;

/// Duplicate ACKs that signal a lost segment.
pub const DUP_ACK_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CongestionPhase {
    SlowStart,
    CongestionAvoidance,
    FastRecovery,
}

/// Congestion window state for one connection.
#[derive(Debug, Clone)]
pub struct CongestionController {
    mss: u32,
    cwnd: u32,
    ssthresh: u32,
    phase: CongestionPhase,
    dup_acks: u32,
}

impl CongestionController {
    pub fn new(config: &TransportConfig) -> Self {
        let mss = config.mss_u32();
        Self {
            mss,
            cwnd: mss,
            ssthresh: config.initial_ssthresh.max(2 * mss),
            phase: CongestionPhase::SlowStart,
            dup_acks: 0,
        }
    }

    pub fn cwnd(&self) -> u32 {
        self.cwnd
    }

    pub fn ssthresh(&self) -> u32 {
        self.ssthresh
    }

    pub fn phase(&self) -> CongestionPhase {
        self.phase
    }

    pub fn dup_acks(&self) -> u32 {
        self.dup_acks
    }

    /// Bytes the sender may have outstanding given the peer's window.
    pub fn send_window(&self, peer_window: u32) -> u32 {
        self.cwnd.min(peer_window)
    }

    /// A cumulative ACK acknowledged new data.
    pub fn on_ack(&mut self) {
        self.dup_acks = 0;
        match self.phase {
            CongestionPhase::FastRecovery => {
                self.cwnd = self.ssthresh;
                self.phase = CongestionPhase::CongestionAvoidance;
                log::debug!("[cc] recovery done cwnd={}", self.cwnd);
            }
            CongestionPhase::SlowStart => {
                self.cwnd = (self.cwnd + self.mss).min(MAX_CWND);
                if self.cwnd >= self.ssthresh {
                    self.phase = CongestionPhase::CongestionAvoidance;
                    log::debug!("[cc] slow start → avoidance cwnd={}", self.cwnd);
                }
            }
            CongestionPhase::CongestionAvoidance => {
                // mss²/cwnd per ACK adds roughly one segment per window.
                let inc = (self.mss * self.mss / self.cwnd).max(1);
                self.cwnd = (self.cwnd + inc).min(MAX_CWND);
            }
        }
    }

    /// An ACK repeated the previous acknowledgement number while data was in
    /// flight.  Returns `true` exactly once per loss event, when the caller
    /// must retransmit the oldest unacknowledged segment.
    pub fn on_dup_ack(&mut self) -> bool {
        self.dup_acks += 1;
        if self.dup_acks != DUP_ACK_THRESHOLD || self.phase == CongestionPhase::FastRecovery {
            return false;
        }
        self.ssthresh = self.halved();
        self.cwnd = self.ssthresh + DUP_ACK_THRESHOLD * self.mss;
        self.phase = CongestionPhase::FastRecovery;
        log::debug!(
            "[cc] fast retransmit ssthresh={} cwnd={}",
            self.ssthresh,
            self.cwnd
        );
        true
    }

    /// The retransmission timer expired.
    pub fn on_timeout(&mut self) {
        self.ssthresh = self.halved();
        self.cwnd = self.mss;
        self.dup_acks = 0;
        self.phase = CongestionPhase::SlowStart;
        log::debug!("[cc] timeout ssthresh={} cwnd={}", self.ssthresh, self.cwnd);
    }

    /// Half the current window, never below two segments.
    fn halved(&self) -> u32 {
        (self.cwnd / 2).max(2 * self.mss)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
