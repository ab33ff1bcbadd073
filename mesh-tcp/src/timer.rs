//! Retransmission timing and per-connection deadlines.
//!
//! Reliable delivery requires that unacknowledged segments are re-sent if no
//! ACK arrives within a bounded time.  This module provides:
//! - [`RttEstimator`] — smoothed RTT, variance, and the retransmission
//!   timeout (RTO), following Jacobson's algorithm (RFC 6298):
//!   `RTO = SRTT + 4 × RTTVAR`, doubling on each timeout up to a maximum.
//! - [`Timers`] — the absolute wake times of one connection.  Nothing here
//!   sleeps; the scheduler asks for the nearest deadline and calls back when
//!   it has passed.

use std::time::{Duration, Instant};

use crate::config::TransportConfig;
use crate::seq::seq_le;

// ---------------------------------------------------------------------------
// RttEstimator
// ---------------------------------------------------------------------------

/// RTT estimate and RTO for one connection.
#[derive(Debug, Clone)]
pub struct RttEstimator {
    min_rto: Duration,
    max_rto: Duration,
    initial_rto: Duration,
    /// Current RTO, including any back-off.
    rto: Duration,
    /// Smoothed RTT estimate (SRTT).
    srtt: Option<Duration>,
    /// RTT variance estimate (RTTVAR).
    rttvar: Option<Duration>,
    /// End sequence and send time of the one segment being timed.
    timed: Option<(u32, Instant)>,
}

impl RttEstimator {
    pub fn new(config: &TransportConfig) -> Self {
        Self {
            min_rto: config.min_rto,
            max_rto: config.max_rto,
            initial_rto: config.initial_rto,
            rto: config.initial_rto,
            srtt: None,
            rttvar: None,
            timed: None,
        }
    }

    pub fn rto(&self) -> Duration {
        self.rto
    }

    pub fn srtt(&self) -> Option<Duration> {
        self.srtt
    }

    pub fn rttvar(&self) -> Option<Duration> {
        self.rttvar
    }

    /// Start timing a first transmission ending at `end_seq`, unless another
    /// segment is already being timed.
    pub fn start_timing(&mut self, end_seq: u32, now: Instant) {
        if self.timed.is_none() {
            self.timed = Some((end_seq, now));
        }
    }

    /// Forget the timed segment.  Called on every retransmission, since an
    /// ACK can no longer be matched to a single transmission (Karn).
    pub fn discard_timing(&mut self) {
        self.timed = None;
    }

    pub fn is_timing(&self) -> bool {
        self.timed.is_some()
    }

    /// Feed a fresh cumulative ACK.  Takes a sample when it covers the timed
    /// segment and returns it.
    pub fn on_ack(&mut self, ack: u32, now: Instant) -> Option<Duration> {
        let (end, sent_at) = self.timed?;
        if !seq_le(end, ack) {
            return None;
        }
        self.timed = None;
        let sample = now.saturating_duration_since(sent_at);
        self.record_sample(sample);
        Some(sample)
    }

    /// Update SRTT / RTTVAR / RTO from one measurement (RFC 6298 §2).
    ///
    /// On the first sample:  SRTT = R,  RTTVAR = R/2.
    /// Subsequent samples:   RTTVAR = 3/4·RTTVAR + 1/4·|SRTT − R|
    ///                       SRTT   = 7/8·SRTT   + 1/8·R
    pub fn record_sample(&mut self, sample: Duration) {
        match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => {
                let diff = sample.abs_diff(srtt);
                self.rttvar = Some(rttvar * 3 / 4 + diff / 4);
                self.srtt = Some(srtt * 7 / 8 + sample / 8);
            }
            _ => {
                self.srtt = Some(sample);
                self.rttvar = Some(sample / 2);
            }
        }
        self.reset_backoff();
    }

    /// Double the RTO after a timeout, capped at the configured maximum.
    pub fn back_off(&mut self) -> Duration {
        self.rto = (self.rto * 2).min(self.max_rto);
        self.rto
    }

    /// Recompute the RTO from the estimates, dropping any back-off.
    ///
    /// Falls back to the initial RTO before the first sample.
    pub fn reset_backoff(&mut self) {
        self.rto = match (self.srtt, self.rttvar) {
            (Some(srtt), Some(rttvar)) => (srtt + rttvar * 4).clamp(self.min_rto, self.max_rto),
            _ => self.initial_rto,
        };
    }
}

// ---------------------------------------------------------------------------
// Timers
// ---------------------------------------------------------------------------

/// The deadlines a connection may have running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Retransmit,
    Persist,
    DelayedAck,
    TimeWait,
}

impl TimerKind {
    const ALL: [TimerKind; 4] = [
        TimerKind::Retransmit,
        TimerKind::Persist,
        TimerKind::DelayedAck,
        TimerKind::TimeWait,
    ];

    fn slot(self) -> usize {
        self as usize
    }
}

/// Absolute wake times for one connection; `None` means not running.
#[derive(Debug, Clone, Default)]
pub struct Timers {
    deadlines: [Option<Instant>; 4],
}

impl Timers {
    /// Arm `kind` to fire at `at`, replacing any earlier setting.
    pub fn arm(&mut self, kind: TimerKind, at: Instant) {
        self.deadlines[kind.slot()] = Some(at);
    }

    /// Arm `kind` only if it is not already running.
    pub fn arm_if_idle(&mut self, kind: TimerKind, at: Instant) {
        self.deadlines[kind.slot()].get_or_insert(at);
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.deadlines[kind.slot()] = None;
    }

    pub fn cancel_all(&mut self) {
        self.deadlines = [None; 4];
    }

    pub fn deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.deadlines[kind.slot()]
    }

    pub fn is_armed(&self, kind: TimerKind) -> bool {
        self.deadlines[kind.slot()].is_some()
    }

    /// Nearest running deadline.
    pub fn next(&self) -> Option<Instant> {
        self.deadlines.iter().flatten().min().copied()
    }

    /// Disarm and return one timer whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now: Instant) -> Option<TimerKind> {
        let kind = TimerKind::ALL
            .into_iter()
            .find(|k| self.deadlines[k.slot()].is_some_and(|at| at <= now))?;
        self.cancel(kind);
        Some(kind)
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
