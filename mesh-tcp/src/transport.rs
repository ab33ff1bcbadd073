//! Application-facing socket API and inbound demultiplexing.
//!
//! [`Transport`] is the single owner of the socket table and of the network
//! collaborator.  Everything runs on the caller's thread: the node loop feeds
//! it datagrams and clock ticks, the application calls `open`/`write`/`read`
//! and friends, and each call runs to completion.
//!
//! ```text
//!   application ──open/listen/write/read/close──┐
//!                                                ▼
//!   network ──on_datagram──▶ demux ──▶ SocketTable[handle] ──▶ Connection
//!   clock   ──poll(now)────────────────────────┘                  │
//!                                                       send_datagram
//!                                                                  ▼
//!                                                               network
//! ```

use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::control::{self, CommandHandler, EchoHandler};
use crate::error::{ConfigError, TransportError};
use crate::network::{Network, NodeAddr, Port};
use crate::packet::{flags, Header, Segment, WireProfile};
use crate::socket::{Handle, SocketTable, CONTROL_HANDLE};
use crate::state::ConnectionState;

/// Reserved port of the control channel.
pub const ROOT_PORT: Port = 255;
/// Reserved address the control record is bound to.
pub const ROOT_ADDR: NodeAddr = 255;
/// Local ports handed out to active opens.
pub const EPHEMERAL_PORTS: RangeInclusive<Port> = 128..=254;

/// The transport engine of one node.
pub struct Transport<N: Network> {
    net: N,
    config: Arc<TransportConfig>,
    table: SocketTable,
    handler: Box<dyn CommandHandler + Send>,
    /// Reply bytes that did not fit in the control record yet.
    control_backlog: Vec<u8>,
    rng: StdRng,
}

impl<N: Network> Transport<N> {
    /// Engine with a randomly seeded ISN generator and the echo control
    /// handler.
    pub fn new(net: N, config: TransportConfig) -> Result<Self, ConfigError> {
        Self::with_rng(net, config, StdRng::from_os_rng())
    }

    /// Engine whose initial sequence numbers are reproducible from `seed`.
    pub fn with_seed(net: N, config: TransportConfig, seed: u64) -> Result<Self, ConfigError> {
        Self::with_rng(net, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(net: N, config: TransportConfig, rng: StdRng) -> Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let mut table = SocketTable::new(config.max_sockets);
        table.install_control(Connection::loopback(ROOT_ADDR, ROOT_PORT, config.clone()));
        Ok(Self {
            net,
            config,
            table,
            handler: Box::new(EchoHandler),
            control_backlog: Vec::new(),
            rng,
        })
    }

    /// Replace the control-channel command handler.
    pub fn set_handler(&mut self, handler: impl CommandHandler + Send + 'static) {
        self.handler = Box::new(handler);
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn local_addr(&self) -> NodeAddr {
        self.net.local_addr()
    }

    pub fn net(&self) -> &N {
        &self.net
    }

    pub fn net_mut(&mut self) -> &mut N {
        &mut self.net
    }

    /// Read-only view of a connection record.
    pub fn connection(&self, handle: Handle) -> Result<&Connection, TransportError> {
        self.table.get(handle)
    }

    /// Number of occupied socket slots, the control slot included.
    pub fn live_sockets(&self) -> usize {
        self.table.live()
    }

    fn next_iss(&mut self) -> u32 {
        match self.config.profile {
            WireProfile::Narrow => u32::from(self.rng.random::<u16>()),
            WireProfile::Wide => self.rng.random(),
        }
    }

    // -----------------------------------------------------------------------
    // Socket API
    // -----------------------------------------------------------------------

    /// Active open towards `(remote_addr, remote_port)` from an ephemeral
    /// local port.
    pub fn open(
        &mut self,
        remote_addr: NodeAddr,
        remote_port: Port,
        now: Instant,
    ) -> Result<Handle, TransportError> {
        let local_port = EPHEMERAL_PORTS
            .into_iter()
            .find(|&p| self.table.find(|c| c.local_port() == p).is_none())
            .ok_or(TransportError::NoFreeSlots)?;
        let iss = self.next_iss();
        let handle = self
            .table
            .allocate(Connection::new(local_port, self.config.clone()))?;
        log::info!(
            "[tcp] {} open {}:{} → {}:{}",
            handle,
            self.net.local_addr(),
            local_port,
            remote_addr,
            remote_port
        );
        self.table
            .lookup(handle)?
            .connect(remote_addr, remote_port, iss, now, &mut self.net);
        Ok(handle)
    }

    /// Passive open on `local_port`.
    pub fn listen(&mut self, local_port: Port) -> Result<Handle, TransportError> {
        if local_port == ROOT_PORT
            || self
                .table
                .find(|c| c.local_port() == local_port && c.state() == ConnectionState::Listen)
                .is_some()
        {
            return Err(TransportError::AddressInUse);
        }
        let iss = self.next_iss();
        let mut conn = Connection::new(local_port, self.config.clone());
        conn.listen(iss);
        let handle = self.table.allocate(conn)?;
        log::info!("[tcp] {} listening on port {}", handle, local_port);
        Ok(handle)
    }

    /// Queue bytes on `handle`.  Returns how many were accepted.
    ///
    /// On the control handle each call carries one command; its reply becomes
    /// readable on the same handle.  While an earlier reply is still waiting
    /// to be read the command is not taken and `Ok(0)` is returned.
    pub fn write(
        &mut self,
        handle: Handle,
        data: &[u8],
        now: Instant,
    ) -> Result<usize, TransportError> {
        if handle == CONTROL_HANDLE {
            if !self.control_backlog.is_empty() {
                return Ok(0);
            }
            self.run_command(data)?;
            return Ok(data.len());
        }
        self.table.lookup(handle)?.write(data, now, &mut self.net)
    }

    /// Read delivered bytes.  `Ok(0)` means nothing yet;
    /// [`TransportError::Eof`] means the peer has finished sending.
    pub fn read(&mut self, handle: Handle, buf: &mut [u8]) -> Result<usize, TransportError> {
        let n = self.table.lookup(handle)?.read(buf, &mut self.net)?;
        if handle == CONTROL_HANDLE && !self.control_backlog.is_empty() {
            self.flush_control_backlog()?;
        }
        Ok(n)
    }

    /// Begin an orderly close.  A record that already failed, or has
    /// nothing left to do, is released at once.
    pub fn close(&mut self, handle: Handle, now: Instant) -> Result<(), TransportError> {
        if handle == CONTROL_HANDLE {
            return Err(TransportError::BadState);
        }
        let conn = self.table.lookup(handle)?;
        conn.close(now, &mut self.net);
        if conn.state() == ConnectionState::Closed {
            self.table.release(handle)?;
        }
        Ok(())
    }

    /// Reset the connection and release its slot.
    pub fn abort(&mut self, handle: Handle) -> Result<(), TransportError> {
        if handle == CONTROL_HANDLE {
            return Err(TransportError::BadState);
        }
        self.table.lookup(handle)?.abort(&mut self.net);
        self.table.release(handle)?;
        Ok(())
    }

    pub fn status(&self, handle: Handle) -> Result<ConnectionState, TransportError> {
        Ok(self.table.get(handle)?.state())
    }

    /// Bytes written on `handle` that the peer has not acknowledged yet.
    pub fn unacked(&self, handle: Handle) -> Result<usize, TransportError> {
        Ok(self.table.get(handle)?.unacked())
    }

    fn run_command(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let reply = control::dispatch(self.handler.as_mut(), bytes);
        self.control_backlog = reply;
        self.flush_control_backlog()
    }

    /// Move as much of the pending reply as fits into the control record.
    fn flush_control_backlog(&mut self) -> Result<(), TransportError> {
        let taken = self
            .table
            .lookup(CONTROL_HANDLE)?
            .deliver_local(&self.control_backlog);
        self.control_backlog.drain(..taken);
        if !self.control_backlog.is_empty() {
            log::trace!("[ctl] {} reply bytes wait for a read", self.control_backlog.len());
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Network and clock entry points
    // -----------------------------------------------------------------------

    /// Hand one inbound datagram to the engine.
    pub fn on_datagram(
        &mut self,
        src_addr: NodeAddr,
        src_port: Port,
        dst_port: Port,
        payload: &[u8],
        now: Instant,
    ) {
        if dst_port == ROOT_PORT {
            log::debug!("[tcp] control datagram from {}:{}", src_addr, src_port);
            if !self.control_backlog.is_empty() {
                log::debug!("[ctl] busy; command from {} dropped", src_addr);
                return;
            }
            if let Err(e) = self.run_command(payload) {
                log::warn!("[ctl] {e}");
            }
            return;
        }

        let seg = match Segment::decode(payload, self.config.profile) {
            Ok(seg) => seg,
            Err(e) => {
                log::debug!("[tcp] drop datagram from {}: {}", src_addr, e);
                return;
            }
        };
        let (from_port, to_port) = (seg.header.src_port, seg.header.dst_port);
        if (from_port, to_port) != (src_port, dst_port) {
            log::debug!(
                "[tcp] drop segment with mismatched ports {}→{} (net {}→{})",
                from_port,
                to_port,
                src_port,
                dst_port
            );
            return;
        }

        let target = self
            .table
            .find(|c| c.matches(src_addr, from_port, to_port))
            .or_else(|| {
                self.table.find(|c| {
                    c.local_port() == to_port && c.state() == ConnectionState::Listen
                })
            });

        match target {
            Some(handle) => {
                if let Ok(conn) = self.table.lookup(handle) {
                    conn.on_segment(src_addr, &seg, now, &mut self.net);
                }
                self.reap(handle);
            }
            None => self.refuse(src_addr, &seg),
        }
    }

    /// Fire expired timers on every record and free finished slots.
    pub fn poll(&mut self, now: Instant) {
        let mut finished = Vec::new();
        for (handle, conn) in self.table.iter_mut() {
            conn.poll(now, &mut self.net);
            if handle != CONTROL_HANDLE && conn.is_finished() {
                finished.push(handle);
            }
        }
        for handle in finished {
            self.reap(handle);
        }
    }

    /// Nearest deadline over all records.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.table.iter().filter_map(|(_, c)| c.next_deadline()).min()
    }

    fn reap(&mut self, handle: Handle) {
        if handle == CONTROL_HANDLE {
            return;
        }
        if self.table.get(handle).is_ok_and(Connection::is_finished)
            && self.table.release(handle).is_ok()
        {
            log::debug!("[tcp] {} finished", handle);
        }
    }

    /// Answer a segment that matches no record with RST.
    fn refuse(&mut self, src_addr: NodeAddr, seg: &Segment) {
        if seg.has(flags::RST) {
            return;
        }
        log::debug!(
            "[tcp] no socket for {}:{} → port {}; sending RST",
            src_addr,
            seg.header.src_port,
            seg.header.dst_port
        );
        let rst = Segment {
            header: Header {
                src_port: seg.header.dst_port,
                dst_port: seg.header.src_port,
                seq: seg.header.ack,
                ack: seg.header.seq.wrapping_add(seg.seq_len()),
                flags: flags::RST | flags::ACK,
                window: 0,
                checksum: 0,
            },
            payload: Vec::new(),
        };
        match rst.encode(self.config.profile) {
            Ok(bytes) => {
                if let Err(e) = self.net.send_datagram(
                    src_addr,
                    seg.header.src_port,
                    seg.header.dst_port,
                    &bytes,
                ) {
                    log::warn!("[tcp] {e}");
                }
            }
            Err(e) => log::warn!("[tcp] could not build RST: {e}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
