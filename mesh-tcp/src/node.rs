//! Async scheduler loop for one emulated node.
//!
//! [`Node`] drives a [`Transport`] from a single task:
//!
//! ```text
//!          ┌──────────── select! ────────────┐
//!          │                                 │
//!   socket.recv_from()            sleep_until(next_deadline)
//!          │                                 │
//!   on_datagram(…)                       poll(now)
//!          └──────────────┬──────────────────┘
//!                         ▼
//!                 application check
//! ```
//!
//! Between wake-ups the caller's closure gets `&mut Transport` to issue
//! socket calls and decide when to stop.  Nothing else touches the
//! transport, so no locking is needed.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::net::UdpSocket;

use crate::config::TransportConfig;
use crate::error::ConfigError;
use crate::network::NodeAddr;
use crate::transport::Transport;
use crate::udp::{NetHeader, UdpNetwork, MAX_DATAGRAM};

/// Upper bound on how long the loop sleeps with no timer armed, so the
/// application closure is consulted regularly.
const IDLE_TICK: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum NodeError {
    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid transport configuration: {0}")]
    Config(#[from] ConfigError),
}

/// One node: a UDP socket plus the transport engine fed from it.
pub struct Node {
    socket: Arc<UdpSocket>,
    transport: Transport<UdpNetwork>,
}

impl Node {
    /// Bind `bind` and serve node address `addr`.  `peers` maps the other
    /// nodes' addresses to their sockets.
    pub async fn bind(
        addr: NodeAddr,
        bind: SocketAddr,
        peers: HashMap<NodeAddr, SocketAddr>,
        config: TransportConfig,
    ) -> Result<Self, NodeError> {
        config.validate()?;
        let socket = Arc::new(UdpSocket::bind(bind).await?);
        log::info!("[node] {} bound to {}", addr, socket.local_addr()?);
        let net = UdpNetwork::new(addr, Arc::clone(&socket), peers);
        Ok(Self {
            socket,
            transport: Transport::new(net, config)?,
        })
    }

    pub fn socket_addr(&self) -> Result<SocketAddr, NodeError> {
        Ok(self.socket.local_addr()?)
    }

    pub fn transport(&mut self) -> &mut Transport<UdpNetwork> {
        &mut self.transport
    }

    /// Run the event loop until `done` returns `true`.
    ///
    /// `done` is called once before the first wait and again after every
    /// inbound datagram or timer wake-up.
    pub async fn run_until<F>(&mut self, mut done: F) -> Result<(), NodeError>
    where
        F: FnMut(&mut Transport<UdpNetwork>, Instant) -> bool,
    {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let timer = tokio::time::sleep(IDLE_TICK);
        tokio::pin!(timer);

        loop {
            if done(&mut self.transport, Instant::now()) {
                return Ok(());
            }

            let wake = self
                .transport
                .next_deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_TICK)
                .min(Instant::now() + IDLE_TICK);
            timer
                .as_mut()
                .reset(tokio::time::Instant::from_std(wake));

            tokio::select! {
                result = self.socket.recv_from(&mut buf) => {
                    let (n, from) = result?;
                    match NetHeader::unframe(&buf[..n]) {
                        Ok((h, segment)) if h.dst_addr == self.transport.local_addr() => {
                            self.transport.on_datagram(
                                h.src_addr,
                                h.src_port,
                                h.dst_port,
                                segment,
                                Instant::now(),
                            );
                        }
                        Ok((h, _)) => {
                            log::debug!("[node] datagram for node {} ignored", h.dst_addr);
                        }
                        Err(e) => log::debug!("[node] bad datagram from {}: {}", from, e),
                    }
                }
                () = &mut timer => {
                    self.transport.poll(Instant::now());
                }
            }
        }
    }
}
