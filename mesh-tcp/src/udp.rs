//! Network-layer emulation over real UDP sockets.
//!
//! Each emulated node owns one `tokio::net::UdpSocket`.  A datagram carries a
//! small network header in front of the transport segment:
//!
//! ```text
//!  0       2       4        5        6
//! ┌───────┬───────┬────────┬────────┬──────────────┐
//! │ src   │ dst   │ dst    │ src    │  segment …   │
//! │ addr  │ addr  │ port   │ port   │              │
//! └───────┴───────┴────────┴────────┴──────────────┘
//! ```
//!
//! Node addresses map to socket addresses through a static peer table; there
//! is no routing.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

use crate::error::{PacketError, SendFailed};
use crate::network::{Network, NodeAddr, Port};

/// Length of the network header.
pub const NET_HEADER_LEN: usize = 6;

/// Largest datagram a node reads.
pub const MAX_DATAGRAM: usize = 2048;

/// Addressing carried in front of every segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetHeader {
    pub src_addr: NodeAddr,
    pub dst_addr: NodeAddr,
    pub dst_port: Port,
    pub src_port: Port,
}

impl NetHeader {
    /// Prefix `payload` with this header.
    pub fn frame(&self, payload: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(NET_HEADER_LEN + payload.len());
        buf.extend_from_slice(&self.src_addr.to_be_bytes());
        buf.extend_from_slice(&self.dst_addr.to_be_bytes());
        buf.push(self.dst_port);
        buf.push(self.src_port);
        buf.extend_from_slice(payload);
        buf
    }

    /// Split a received datagram into header and segment bytes.
    pub fn unframe(buf: &[u8]) -> Result<(Self, &[u8]), PacketError> {
        if buf.len() < NET_HEADER_LEN {
            return Err(PacketError::Truncated);
        }
        let header = Self {
            src_addr: u16::from_be_bytes([buf[0], buf[1]]),
            dst_addr: u16::from_be_bytes([buf[2], buf[3]]),
            dst_port: buf[4],
            src_port: buf[5],
        };
        Ok((header, &buf[NET_HEADER_LEN..]))
    }
}

/// [`Network`] implementation that writes framed datagrams to a UDP socket.
#[derive(Debug, Clone)]
pub struct UdpNetwork {
    addr: NodeAddr,
    socket: Arc<UdpSocket>,
    peers: HashMap<NodeAddr, SocketAddr>,
}

impl UdpNetwork {
    pub fn new(addr: NodeAddr, socket: Arc<UdpSocket>, peers: HashMap<NodeAddr, SocketAddr>) -> Self {
        Self {
            addr,
            socket,
            peers,
        }
    }

    pub fn add_peer(&mut self, addr: NodeAddr, socket_addr: SocketAddr) {
        self.peers.insert(addr, socket_addr);
    }
}

impl Network for UdpNetwork {
    fn local_addr(&self) -> NodeAddr {
        self.addr
    }

    fn send_datagram(
        &mut self,
        dest_addr: NodeAddr,
        dest_port: Port,
        src_port: Port,
        payload: &[u8],
    ) -> Result<(), SendFailed> {
        let target = self.peers.get(&dest_addr).ok_or_else(|| SendFailed {
            dest_addr,
            reason: "no route".into(),
        })?;
        let bytes = NetHeader {
            src_addr: self.addr,
            dst_addr: dest_addr,
            dst_port: dest_port,
            src_port,
        }
        .frame(payload);
        // Never wait for socket readiness; a full send buffer is a lost packet.
        self.socket
            .try_send_to(&bytes, *target)
            .map_err(|e| SendFailed {
                dest_addr,
                reason: e.to_string(),
            })?;
        log::trace!("[udp] → node {} ({}) {} bytes", dest_addr, target, bytes.len());
        Ok(())
    }
}
