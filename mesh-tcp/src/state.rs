//! Connection finite-state machine (FSM) states.
//!
//! The transitions themselves live in [`crate::connection`]; this module only
//! names the states and answers questions about them.
//!
//! ```text
//!  CLOSED ──open──▶ SYN_SENT ──SYN+ACK──▶ ESTABLISHED ◀──ACK── SYN_RCVD ◀──SYN── LISTEN
//!                                          │        │
//!                               close/FIN  │        │  FIN/ACK
//!                                          ▼        ▼
//!                                   FIN_WAIT_1    CLOSE_WAIT
//!                              ACK │      │ FIN       │ close/FIN
//!                                  ▼      ▼           ▼
//!                          FIN_WAIT_2   CLOSING     LAST_ACK
//!                              FIN │      │ ACK       │ ACK
//!                                  ▼      ▼           ▼
//!                                 TIME_WAIT ──2×MSL──▶ CLOSED
//! ```

use std::fmt;

/// All possible states of the connection FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists.
    #[default]
    Closed,
    /// Passively waiting for a SYN.
    Listen,
    /// SYN sent; waiting for SYN+ACK.
    SynSent,
    /// SYN received and SYN+ACK sent; waiting for ACK.
    SynReceived,
    /// Handshake complete; data flows both ways.
    Established,
    /// Local FIN sent; waiting for its ACK.
    FinWait1,
    /// Local FIN acknowledged; waiting for the peer's FIN.
    FinWait2,
    /// Both sides sent FIN; waiting for the ACK of ours.
    Closing,
    /// Waiting 2×MSL so stale segments die out.
    TimeWait,
    /// Peer's FIN received; waiting for the local close.
    CloseWait,
    /// Local FIN sent after the peer's; waiting for its ACK.
    LastAck,
}

impl ConnectionState {
    /// States in which the application may still queue outbound data.
    /// Bytes written during the handshake go out once it completes.
    pub fn can_send(self) -> bool {
        matches!(
            self,
            Self::SynSent | Self::SynReceived | Self::Established | Self::CloseWait
        )
    }

    /// States in which the peer may still send us data.
    pub fn can_receive(self) -> bool {
        matches!(self, Self::Established | Self::FinWait1 | Self::FinWait2)
    }

    /// States past the handshake, where sequence numbers are synchronised.
    pub fn is_synchronized(self) -> bool {
        !matches!(
            self,
            Self::Closed | Self::Listen | Self::SynSent | Self::SynReceived
        )
    }

}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::Listen => "LISTEN",
            Self::SynSent => "SYN_SENT",
            Self::SynReceived => "SYN_RCVD",
            Self::Established => "ESTABLISHED",
            Self::FinWait1 => "FIN_WAIT_1",
            Self::FinWait2 => "FIN_WAIT_2",
            Self::Closing => "CLOSING",
            Self::TimeWait => "TIME_WAIT",
            Self::CloseWait => "CLOSE_WAIT",
            Self::LastAck => "LAST_ACK",
        };
        f.write_str(name)
    }
}
