//! Per-connection record and state machine.
//!
//! A [`Connection`] owns everything one endpoint pair needs:
//! - the FSM state (see [`crate::state`]),
//! - send and receive ring buffers (see [`crate::ring`]),
//! - congestion control (see [`crate::congestion`]),
//! - RTT estimation and its deadlines (see [`crate::timer`]).
//!
//! It never blocks and never owns I/O.  Every entry point takes the current
//! time and a [`Network`] to emit segments through; inbound segments arrive
//! already decoded.  The socket table owns each record exclusively.

use std::sync::Arc;
use std::time::Instant;

use crate::config::TransportConfig;
use crate::congestion::{CongestionController, CongestionPhase};
use crate::error::TransportError;
use crate::network::{Network, NodeAddr, Port};
use crate::packet::{flags, Header, Segment};
use crate::ring::{Accepted, RecvBuffer, SendBuffer};
use crate::seq::seq_lt;
use crate::state::ConnectionState;
use crate::timer::{RttEstimator, TimerKind, Timers};

/// One transport connection.
#[derive(Debug)]
pub struct Connection {
    state: ConnectionState,
    config: Arc<TransportConfig>,
    local_port: Port,
    remote_addr: NodeAddr,
    remote_port: Port,
    /// Opened by `listen`; a reset during the handshake returns to LISTEN.
    passive: bool,
    /// Local-only record that never touches the network.
    loopback: bool,
    iss: u32,
    send: SendBuffer,
    recv: RecvBuffer,
    cc: CongestionController,
    rtt: RttEstimator,
    timers: Timers,
    /// Consecutive retransmission timeouts without progress.
    retries: u32,
    /// Window most recently advertised by the peer.
    peer_window: u32,
    /// The peer's FIN has been received in order.
    peer_fin: bool,
    /// Terminal failure latched for the application.
    error: Option<TransportError>,
}

impl Connection {
    /// Create a record in [`ConnectionState::Closed`] bound to `local_port`.
    pub fn new(local_port: Port, config: Arc<TransportConfig>) -> Self {
        Self {
            state: ConnectionState::Closed,
            local_port,
            remote_addr: 0,
            remote_port: 0,
            passive: false,
            loopback: false,
            iss: 0,
            send: SendBuffer::new(config.buffer_size),
            recv: RecvBuffer::new(config.buffer_size),
            cc: CongestionController::new(&config),
            rtt: RttEstimator::new(&config),
            timers: Timers::default(),
            retries: 0,
            peer_window: 0,
            peer_fin: false,
            error: None,
            config,
        }
    }

    /// A record that starts out established with a local endpoint and never
    /// sends segments.  Used for the control channel.
    pub fn loopback(addr: NodeAddr, port: Port, config: Arc<TransportConfig>) -> Self {
        let mut conn = Self::new(port, config);
        conn.remote_addr = addr;
        conn.remote_port = port;
        conn.loopback = true;
        conn.send.reset(0);
        conn.recv.reset(0);
        conn.state = ConnectionState::Established;
        conn
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn local_port(&self) -> Port {
        self.local_port
    }

    pub fn remote(&self) -> (NodeAddr, Port) {
        (self.remote_addr, self.remote_port)
    }

    pub fn error(&self) -> Option<TransportError> {
        self.error
    }

    pub fn highest_seq_acked(&self) -> u32 {
        self.send.acked()
    }

    /// One past the last byte the application wrote, counting a queued FIN.
    pub fn next_seq_to_send(&self) -> u32 {
        match self.send.fin_seq() {
            Some(fin) => fin.wrapping_add(1),
            None => self.send.written(),
        }
    }

    /// One past the highest sequence number ever put on the wire.
    pub fn last_seq_sent(&self) -> u32 {
        self.send.high_water()
    }

    pub fn next_seq_expected(&self) -> u32 {
        self.recv.expected()
    }

    /// Free receive space, as advertised to the peer.
    pub fn advertised_window(&self) -> u16 {
        self.recv.free().min(u16::MAX as usize) as u16
    }

    pub fn peer_window(&self) -> u32 {
        self.peer_window
    }

    pub fn cwnd(&self) -> u32 {
        self.cc.cwnd()
    }

    pub fn ssthresh(&self) -> u32 {
        self.cc.ssthresh()
    }

    pub fn congestion_phase(&self) -> CongestionPhase {
        self.cc.phase()
    }

    pub fn dup_ack_count(&self) -> u32 {
        self.cc.dup_acks()
    }

    pub fn retry_count(&self) -> u32 {
        self.retries
    }

    pub fn rtt(&self) -> &RttEstimator {
        &self.rtt
    }

    pub fn timer_deadline(&self, kind: TimerKind) -> Option<Instant> {
        self.timers.deadline(kind)
    }

    /// Nearest instant at which [`Connection::poll`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next()
    }

    /// Bytes accepted from the application but not yet acknowledged.
    pub fn unacked(&self) -> usize {
        self.send.len()
    }

    /// Free space for application writes.
    pub fn send_capacity(&self) -> usize {
        self.send.free()
    }

    /// Bytes ready for the application to read.
    pub fn readable(&self) -> usize {
        self.recv.available()
    }

    /// `true` when this record has reached CLOSED without a latched error and
    /// its slot can be reclaimed.
    pub fn is_finished(&self) -> bool {
        self.state == ConnectionState::Closed && self.error.is_none()
    }

    /// `true` when an inbound segment from `(addr, port)` to `local_port`
    /// belongs to this record.
    pub fn matches(&self, addr: NodeAddr, port: Port, local_port: Port) -> bool {
        self.local_port == local_port
            && self.state != ConnectionState::Listen
            && self.state != ConnectionState::Closed
            && self.remote_addr == addr
            && self.remote_port == port
    }

    fn rcv_nxt(&self) -> u32 {
        self.recv.expected().wrapping_add(u32::from(self.peer_fin))
    }

    fn set_state(&mut self, next: ConnectionState) {
        if self.state != next {
            log::debug!(
                "[tcp] port {} {} → {}",
                self.local_port,
                self.state,
                next
            );
            self.state = next;
        }
    }

    // -----------------------------------------------------------------------
    // Application operations
    // -----------------------------------------------------------------------

    /// Passive open: wait for a SYN.  `iss` is used for our SYN+ACK.
    pub fn listen(&mut self, iss: u32) {
        self.passive = true;
        self.iss = iss;
        self.set_state(ConnectionState::Listen);
    }

    /// Active open: send SYN to `(remote_addr, remote_port)`.
    pub fn connect<N: Network>(
        &mut self,
        remote_addr: NodeAddr,
        remote_port: Port,
        iss: u32,
        now: Instant,
        net: &mut N,
    ) {
        self.remote_addr = remote_addr;
        self.remote_port = remote_port;
        self.passive = false;
        self.iss = iss;
        self.send.reset(iss);
        self.set_state(ConnectionState::SynSent);
        self.send_syn(now, net);
    }

    /// Queue application bytes.  Returns how many fit in the send buffer;
    /// data written during the handshake goes out once it completes.
    pub fn write<N: Network>(
        &mut self,
        data: &[u8],
        now: Instant,
        net: &mut N,
    ) -> Result<usize, TransportError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        if !self.state.can_send() {
            return Err(TransportError::BadState);
        }
        let n = self.send.write(data);
        if n < data.len() {
            log::trace!("[tcp] send buffer full, took {}/{}", n, data.len());
        }
        self.transmit(now, net);
        Ok(n)
    }

    /// Read delivered bytes into `buf`.
    ///
    /// Returns `Ok(0)` when nothing is buffered yet and
    /// [`TransportError::Eof`] once the peer's FIN has been reached.
    pub fn read<N: Network>(
        &mut self,
        buf: &mut [u8],
        net: &mut N,
    ) -> Result<usize, TransportError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let before = self.recv.free();
        let n = self.recv.read(buf);
        if n == 0 {
            return if self.peer_fin {
                Err(TransportError::Eof)
            } else {
                Ok(0)
            };
        }
        // Reopened a window the peer may be stalled on.
        let mss = self.config.mss;
        if self.state.can_receive() && before < mss && self.recv.free() >= mss {
            log::trace!("[tcp] window update wnd={}", self.recv.free());
            self.send_ack(net);
        }
        Ok(n)
    }

    /// Append locally produced bytes to the readable stream.
    pub fn deliver_local(&mut self, data: &[u8]) -> usize {
        self.recv.push_local(data)
    }

    /// Graceful close.  Bytes never transmitted are discarded; a FIN follows
    /// whatever is still in flight.  Closing twice is a no-op.
    pub fn close<N: Network>(&mut self, now: Instant, net: &mut N) {
        match self.state {
            ConnectionState::Listen | ConnectionState::SynSent => {
                self.timers.cancel_all();
                self.set_state(ConnectionState::Closed);
            }
            ConnectionState::SynReceived => {
                self.abort_with(None, true, net);
            }
            ConnectionState::Established => self.begin_close(ConnectionState::FinWait1, now, net),
            ConnectionState::CloseWait => self.begin_close(ConnectionState::LastAck, now, net),
            _ => {}
        }
    }

    /// Explicit reset: notify the peer and drop everything.
    pub fn abort<N: Network>(&mut self, net: &mut N) {
        let notify = self.state != ConnectionState::Listen;
        self.abort_with(None, notify, net);
    }

    fn begin_close<N: Network>(&mut self, next: ConnectionState, now: Instant, net: &mut N) {
        let dropped = self.send.discard_unsent();
        if dropped > 0 {
            log::debug!("[tcp] close discarded {} unsent bytes", dropped);
        }
        self.timers.cancel(TimerKind::Persist);
        self.send.queue_fin();
        self.set_state(next);
        self.transmit(now, net);
    }

    fn abort_with<N: Network>(
        &mut self,
        error: Option<TransportError>,
        notify_peer: bool,
        net: &mut N,
    ) {
        if notify_peer && self.state != ConnectionState::Closed {
            let seq = self.send.high_water();
            self.emit(flags::RST | flags::ACK, seq, Vec::new(), net);
        }
        self.timers.cancel_all();
        self.send.reset(self.iss);
        self.recv.reset(0);
        self.peer_fin = false;
        self.error = error;
        self.set_state(ConnectionState::Closed);
    }

    // -----------------------------------------------------------------------
    // Timers
    // -----------------------------------------------------------------------

    /// Fire every timer whose deadline has passed.
    pub fn poll<N: Network>(&mut self, now: Instant, net: &mut N) {
        while let Some(kind) = self.timers.take_expired(now) {
            match kind {
                TimerKind::Retransmit => self.on_retransmit_timeout(now, net),
                TimerKind::Persist => self.on_persist_timeout(now, net),
                TimerKind::DelayedAck => self.send_ack(net),
                TimerKind::TimeWait => {
                    log::debug!("[tcp] port {} time-wait expired", self.local_port);
                    self.timers.cancel_all();
                    self.set_state(ConnectionState::Closed);
                }
            }
        }
    }

    fn on_retransmit_timeout<N: Network>(&mut self, now: Instant, net: &mut N) {
        if matches!(
            self.state,
            ConnectionState::Closed | ConnectionState::Listen | ConnectionState::TimeWait
        ) {
            return;
        }
        if self.state.is_synchronized() && self.send.all_acked() {
            return;
        }
        self.retries += 1;
        if self.retries > self.config.max_retries {
            log::warn!(
                "[tcp] port {} gave up after {} retransmissions",
                self.local_port,
                self.config.max_retries
            );
            self.abort_with(Some(TransportError::ConnectionReset), true, net);
            return;
        }
        let rto = self.rtt.back_off();
        self.rtt.discard_timing();
        log::debug!(
            "[tcp] port {} timeout #{}; rto → {:?}",
            self.local_port,
            self.retries,
            rto
        );

        self.cc.on_timeout();
        match self.state {
            ConnectionState::SynSent | ConnectionState::SynReceived => self.send_syn(now, net),
            _ => {
                self.send.rewind();
                if self.transmit(now, net) > 0 {
                    self.timers.arm(TimerKind::Retransmit, now + rto);
                }
            }
        }
    }

    fn on_persist_timeout<N: Network>(&mut self, now: Instant, net: &mut N) {
        if !self.state.is_synchronized()
            || self.peer_window != 0
            || self.send.unsent() == 0
            || self.send.in_flight() != 0
        {
            return;
        }
        let seq = self.send.sent();
        let probe = self.send.peek_range(seq, seq.wrapping_add(1));
        log::debug!("[tcp] → window probe seq={}", seq);
        self.send.mark_probed(seq.wrapping_add(1));
        self.emit(flags::ACK, seq, probe, net);
        self.timers
            .arm(TimerKind::Persist, now + self.config.persist_interval);
    }

    // -----------------------------------------------------------------------
    // Inbound segments
    // -----------------------------------------------------------------------

    /// Process one decoded segment from `src_addr`.
    pub fn on_segment<N: Network>(
        &mut self,
        src_addr: NodeAddr,
        seg: &Segment,
        now: Instant,
        net: &mut N,
    ) {
        match self.state {
            ConnectionState::Closed => {}
            ConnectionState::Listen => self.on_segment_listen(src_addr, seg, now, net),
            ConnectionState::SynSent => self.on_segment_syn_sent(seg, now, net),
            _ => self.on_segment_synchronized(seg, now, net),
        }
    }

    fn on_segment_listen<N: Network>(
        &mut self,
        src_addr: NodeAddr,
        seg: &Segment,
        now: Instant,
        net: &mut N,
    ) {
        if !seg.has(flags::SYN) || seg.has(flags::ACK) || seg.has(flags::RST) {
            return;
        }
        self.remote_addr = src_addr;
        self.remote_port = seg.header.src_port;
        self.recv.reset(seg.header.seq);
        self.send.reset(self.iss);
        self.peer_window = u32::from(seg.header.window);
        log::debug!(
            "[tcp] ← SYN from {}:{} seq={}",
            src_addr,
            seg.header.src_port,
            seg.header.seq
        );
        self.set_state(ConnectionState::SynReceived);
        self.send_syn(now, net);
    }

    fn on_segment_syn_sent<N: Network>(&mut self, seg: &Segment, now: Instant, net: &mut N) {
        let profile = self.config.profile;
        let syn_ack = self.iss.wrapping_add(1);
        let ack = profile.lift(seg.header.ack, self.iss);

        if seg.has(flags::RST) {
            if seg.has(flags::ACK) && ack == syn_ack {
                log::debug!("[tcp] ← RST; connection refused");
                self.abort_with(Some(TransportError::ConnectionReset), false, net);
            }
            return;
        }
        if !seg.has(flags::SYN) {
            return;
        }

        self.recv.reset(seg.header.seq);
        self.peer_window = u32::from(seg.header.window);

        if !seg.has(flags::ACK) {
            // Simultaneous open.
            self.set_state(ConnectionState::SynReceived);
            self.send_syn(now, net);
            return;
        }
        if ack != syn_ack {
            return;
        }
        self.send.ack_advance(ack);
        self.rtt.on_ack(ack, now);
        self.timers.cancel(TimerKind::Retransmit);
        self.retries = 0;
        log::debug!("[tcp] ← SYN+ACK seq={} ack={}", seg.header.seq, ack);
        self.set_state(ConnectionState::Established);
        self.send_ack(net);
        self.transmit(now, net);
    }

    fn on_segment_synchronized<N: Network>(&mut self, seg: &Segment, now: Instant, net: &mut N) {
        let profile = self.config.profile;
        let h = &seg.header;

        if seg.has(flags::RST) {
            let rcv_nxt = self.rcv_nxt();
            let seq = profile.lift(h.seq, rcv_nxt);
            let window_end = rcv_nxt.wrapping_add(self.recv.free().max(1) as u32);
            if seq_lt(seq, rcv_nxt) || !seq_lt(seq, window_end) {
                log::debug!("[tcp] ← RST seq={} outside window; ignored", seq);
                return;
            }
            if self.state == ConnectionState::SynReceived && self.passive {
                log::debug!("[tcp] ← RST during handshake; back to LISTEN");
                self.timers.cancel_all();
                self.send.reset(self.iss);
                self.set_state(ConnectionState::Listen);
            } else {
                log::debug!("[tcp] ← RST; connection reset by peer");
                self.abort_with(Some(TransportError::ConnectionReset), false, net);
            }
            return;
        }

        if seg.has(flags::SYN) {
            if self.state == ConnectionState::SynReceived {
                if !seg.has(flags::ACK) {
                    // Our SYN+ACK was lost; the peer retried its SYN.
                    self.send_syn(now, net);
                    return;
                }
            } else {
                // Our handshake ACK was lost.
                self.send_ack(net);
                return;
            }
        }

        if !seg.has(flags::ACK) {
            return;
        }

        let ack = profile.lift(h.ack, self.send.acked());
        if self.state == ConnectionState::SynReceived {
            let syn_ack = self.iss.wrapping_add(1);
            if ack != syn_ack {
                return;
            }
            self.send.ack_advance(ack);
            self.rtt.on_ack(ack, now);
            self.timers.cancel(TimerKind::Retransmit);
            self.retries = 0;
            self.set_state(ConnectionState::Established);
        }

        if seq_lt(self.send.high_water(), ack) {
            // Acknowledges something never sent.
            self.send_ack(net);
            return;
        }

        let window = u32::from(h.window);
        if seq_lt(self.send.acked(), ack) {
            self.peer_window = window;
            self.on_new_ack(ack, now);
        } else if ack == self.send.acked() {
            let duplicate = seg.payload.is_empty()
                && !seg.has(flags::FIN)
                && self.send.in_flight() > 0
                && window == self.peer_window;
            self.peer_window = window;
            if duplicate && self.cc.on_dup_ack() {
                self.fast_retransmit(now, net);
            }
        }
        if self.peer_window > 0 {
            self.timers.cancel(TimerKind::Persist);
        }
        if self.state == ConnectionState::Closed {
            return;
        }

        let mut ack_now = false;
        let mut ack_later = false;
        let seq = profile.lift(h.seq, self.rcv_nxt());

        if !seg.payload.is_empty() {
            if self.state.can_receive() {
                match self.recv.accept(seq, &seg.payload) {
                    Accepted::InOrder { taken, offered } => {
                        log::trace!("[tcp] ← DATA seq={} len={} took={}", seq, offered, taken);
                        if taken < offered {
                            ack_now = true;
                        } else {
                            ack_later = true;
                        }
                    }
                    Accepted::Duplicate => {
                        log::trace!("[tcp] ← duplicate seq={}", seq);
                        ack_now = true;
                    }
                    Accepted::OutOfOrder => {
                        log::trace!(
                            "[tcp] ← out-of-order seq={} expected={}",
                            seq,
                            self.recv.expected()
                        );
                        ack_now = true;
                    }
                }
            } else {
                ack_now = true;
            }
        }

        if seg.has(flags::FIN) {
            ack_now = true;
            let fin_seq = seq.wrapping_add(seg.payload.len() as u32);
            if self.peer_fin {
                if self.state == ConnectionState::TimeWait {
                    self.enter_time_wait(now);
                }
            } else if self.state.can_receive() && fin_seq == self.recv.expected() {
                self.peer_fin = true;
                log::debug!("[tcp] ← FIN seq={}", fin_seq);
                match self.state {
                    ConnectionState::Established => self.set_state(ConnectionState::CloseWait),
                    ConnectionState::FinWait1 => self.set_state(ConnectionState::Closing),
                    ConnectionState::FinWait2 => self.enter_time_wait(now),
                    _ => {}
                }
            }
        }

        if ack_now {
            self.send_ack(net);
        }
        let sent = self.transmit(now, net);
        if ack_later && sent == 0 {
            self.schedule_ack(now, net);
        }
    }

    /// A cumulative ACK covered new sequence space.
    fn on_new_ack(&mut self, ack: u32, now: Instant) {
        let newly = self.send.ack_advance(ack);
        if let Some(sample) = self.rtt.on_ack(ack, now) {
            log::trace!("[tcp] rtt sample {:?} → rto {:?}", sample, self.rtt.rto());
        }
        log::trace!("[tcp] ← ACK ack={} (+{})", ack, newly);
        self.retries = 0;
        self.cc.on_ack();

        if self.send.all_acked() {
            self.timers.cancel(TimerKind::Retransmit);
        } else {
            self.timers
                .arm(TimerKind::Retransmit, now + self.rtt.rto());
        }

        if self.send.fin_acked() {
            match self.state {
                ConnectionState::FinWait1 => self.set_state(ConnectionState::FinWait2),
                ConnectionState::Closing => self.enter_time_wait(now),
                ConnectionState::LastAck => {
                    self.timers.cancel_all();
                    self.set_state(ConnectionState::Closed);
                }
                _ => {}
            }
        }
    }

    fn fast_retransmit<N: Network>(&mut self, now: Instant, net: &mut N) {
        log::debug!(
            "[tcp] port {} fast retransmit seq={}",
            self.local_port,
            self.send.acked()
        );
        self.rtt.discard_timing();
        self.send.rewind();
        self.transmit(now, net);
        self.timers
            .arm(TimerKind::Retransmit, now + self.rtt.rto());
    }

    fn enter_time_wait(&mut self, now: Instant) {
        self.timers.cancel_all();
        self.timers
            .arm(TimerKind::TimeWait, now + self.config.time_wait());
        self.set_state(ConnectionState::TimeWait);
    }

    // -----------------------------------------------------------------------
    // Outbound segments
    // -----------------------------------------------------------------------

    /// Send as much queued data (and a pending FIN) as the congestion and
    /// peer windows allow.  Returns the number of segments emitted.
    fn transmit<N: Network>(&mut self, now: Instant, net: &mut N) -> usize {
        if self.loopback
            || !matches!(
                self.state,
                ConnectionState::Established
                    | ConnectionState::CloseWait
                    | ConnectionState::FinWait1
                    | ConnectionState::Closing
                    | ConnectionState::LastAck
            )
        {
            return 0;
        }

        let mss = self.config.mss_u32();
        let mut count = 0;
        loop {
            let window = self.cc.send_window(self.peer_window);
            let room = window.saturating_sub(self.send.in_flight());
            let unsent = self.send.unsent();
            let len = unsent.min(room).min(mss);
            let seq = self.send.sent();
            let end = seq.wrapping_add(len);
            let fin = len == unsent && self.send.fin_seq() == Some(end);
            if len == 0 && !fin {
                break;
            }

            let payload = self.send.peek_range(seq, end);
            let end = end.wrapping_add(u32::from(fin));
            if seq_lt(seq, self.send.high_water()) {
                self.rtt.discard_timing();
            } else {
                self.rtt.start_timing(end, now);
            }
            self.send.mark_sent(end);

            let mut f = flags::ACK;
            if fin {
                f |= flags::FIN;
            }
            log::trace!("[tcp] → seq={} len={} fin={}", seq, len, fin);
            self.emit(f, seq, payload, net);
            self.timers
                .arm_if_idle(TimerKind::Retransmit, now + self.rtt.rto());
            count += 1;
            if fin {
                break;
            }
        }

        if self.peer_window == 0 && self.send.unsent() > 0 && self.send.in_flight() == 0 {
            self.timers
                .arm_if_idle(TimerKind::Persist, now + self.config.persist_interval);
        }
        count
    }

    /// Send (or resend) our SYN, with ACK once the peer's SYN is known.
    fn send_syn<N: Network>(&mut self, now: Instant, net: &mut N) {
        let syn_end = self.iss.wrapping_add(1);
        if self.send.high_water() == self.iss {
            self.rtt.start_timing(syn_end, now);
        } else {
            self.rtt.discard_timing();
        }
        self.send.mark_sent(syn_end);

        let f = if self.state == ConnectionState::SynReceived {
            flags::SYN | flags::ACK
        } else {
            flags::SYN
        };
        log::debug!("[tcp] → SYN seq={} ack={}", self.iss, f & flags::ACK != 0);
        self.emit(f, self.iss, Vec::new(), net);
        self.timers
            .arm(TimerKind::Retransmit, now + self.rtt.rto());
    }

    fn send_ack<N: Network>(&mut self, net: &mut N) {
        let seq = self.send.sent();
        self.emit(flags::ACK, seq, Vec::new(), net);
    }

    /// Delay the ACK for an in-order segment; the second one in a row is
    /// acknowledged immediately.
    fn schedule_ack<N: Network>(&mut self, now: Instant, net: &mut N) {
        if self.timers.is_armed(TimerKind::DelayedAck) {
            self.send_ack(net);
        } else {
            self.timers
                .arm(TimerKind::DelayedAck, now + self.config.delayed_ack);
        }
    }

    fn emit<N: Network>(&mut self, f: u8, seq: u32, payload: Vec<u8>, net: &mut N) {
        if self.loopback {
            return;
        }
        if f & flags::ACK != 0 {
            self.timers.cancel(TimerKind::DelayedAck);
        }
        let seg = Segment {
            header: Header {
                src_port: self.local_port,
                dst_port: self.remote_port,
                seq,
                ack: if f & flags::ACK != 0 { self.rcv_nxt() } else { 0 },
                flags: f,
                window: self.advertised_window(),
                checksum: 0,
            },
            payload,
        };
        let bytes = match seg.encode(self.config.profile) {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("[tcp] dropping unencodable segment: {e}");
                return;
            }
        };
        if let Err(e) =
            net.send_datagram(self.remote_addr, self.remote_port, self.local_port, &bytes)
        {
            // Recovered like any other loss.
            log::warn!("[tcp] {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
