//! Entry point for `mesh-tcp`.
//!
//! Runs one emulated mesh node over UDP and dispatches into either
//! **server** or **client** mode, the same roles the test-server and
//! test-client control commands trigger.  `main.rs` owns only process setup
//! (logging, argument parsing); all protocol work lives in the library.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mesh_tcp::{
    config::TransportConfig,
    error::TransportError,
    network::{NodeAddr, Port},
    node::Node,
    packet::WireProfile,
};

/// Reliable byte streams between emulated mesh nodes.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Address of this node on the mesh.
    #[arg(short, long)]
    addr: NodeAddr,

    /// Local UDP socket to bind.
    #[arg(short, long, default_value = "127.0.0.1:9000")]
    bind: SocketAddr,

    /// Peer node, as `ADDR=IP:PORT`.  Repeatable.
    #[arg(short, long = "peer", value_parser = parse_peer)]
    peers: Vec<(NodeAddr, SocketAddr)>,

    /// Largest payload per segment.
    #[arg(long, default_value_t = 16)]
    mss: usize,

    /// Send/receive buffer size per socket.
    #[arg(long, default_value_t = 128)]
    buffer: usize,

    /// Use 32-bit sequence numbers on the wire.
    #[arg(long)]
    wide: bool,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Listen on a port and print received bytes until the peer closes.
    Server {
        #[arg(short, long, default_value_t = 41)]
        port: Port,
    },
    /// Connect to a server and stream bytes to it.
    Client {
        /// Destination node address.
        #[arg(long)]
        to: NodeAddr,
        #[arg(short, long, default_value_t = 41)]
        port: Port,
        /// Send this many test bytes (0, 1, 2, …) instead of reading stdin.
        #[arg(long)]
        count: Option<usize>,
    },
}

fn parse_peer(s: &str) -> Result<(NodeAddr, SocketAddr), String> {
    let (addr, sock) = s
        .split_once('=')
        .ok_or_else(|| format!("expected ADDR=IP:PORT, got {s:?}"))?;
    let addr = addr.parse().map_err(|e| format!("bad node address: {e}"))?;
    let sock = sock.parse().map_err(|e| format!("bad socket address: {e}"))?;
    Ok((addr, sock))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let config = TransportConfig {
        mss: cli.mss,
        buffer_size: cli.buffer,
        profile: if cli.wide {
            WireProfile::Wide
        } else {
            WireProfile::Narrow
        },
        ..TransportConfig::default()
    };
    let peers: HashMap<_, _> = cli.peers.into_iter().collect();
    let mut node = Node::bind(cli.addr, cli.bind, peers, config)
        .await
        .context("starting node")?;

    match cli.mode {
        Mode::Server { port } => run_server(&mut node, port).await,
        Mode::Client { to, port, count } => {
            let data = match count {
                Some(n) => (0..n).map(|i| i as u8).collect(),
                None => {
                    let mut buf = Vec::new();
                    std::io::stdin().read_to_end(&mut buf)?;
                    buf
                }
            };
            run_client(&mut node, to, port, data).await
        }
    }
}

async fn run_server(node: &mut Node, port: Port) -> Result<()> {
    let handle = node.transport().listen(port)?;
    log::info!("Listening on port {port}");

    let mut stdout = std::io::stdout();
    let mut failure = None;
    let mut total = 0usize;
    node.run_until(|t, _| {
        let mut buf = [0u8; 128];
        loop {
            match t.read(handle, &mut buf) {
                Ok(0) => return false,
                Ok(n) => {
                    total += n;
                    if let Err(e) = stdout.write_all(&buf[..n]) {
                        failure = Some(anyhow::Error::from(e));
                        return true;
                    }
                }
                Err(TransportError::Eof) => return true,
                Err(e) => {
                    failure = Some(e.into());
                    return true;
                }
            }
        }
    })
    .await?;
    stdout.flush()?;
    if let Some(e) = failure {
        return Err(e);
    }
    log::info!("Received {total} bytes");

    let now = std::time::Instant::now();
    node.transport().close(handle, now)?;
    linger(node, handle).await
}

async fn run_client(node: &mut Node, to: NodeAddr, port: Port, data: Vec<u8>) -> Result<()> {
    let now = std::time::Instant::now();
    let handle = node.transport().open(to, port, now)?;
    log::info!("Connecting to {to}:{port}");

    let mut offset = 0;
    let mut failure = None;
    node.run_until(|t, now| {
        if offset < data.len() {
            match t.write(handle, &data[offset..], now) {
                Ok(n) => offset += n,
                Err(e) => {
                    failure = Some(e);
                    return true;
                }
            }
        }
        match t.unacked(handle) {
            Ok(pending) => offset == data.len() && pending == 0,
            Err(e) => {
                failure = Some(e);
                true
            }
        }
    })
    .await?;
    if let Some(e) = failure {
        bail!("transfer failed after {offset} bytes: {e}");
    }
    log::info!("Sent {} bytes", data.len());

    node.transport().close(handle, std::time::Instant::now())?;
    linger(node, handle).await
}

/// Keep serving the socket until the close handshake frees the slot.
async fn linger(node: &mut Node, handle: mesh_tcp::socket::Handle) -> Result<()> {
    let done = tokio::time::timeout(
        Duration::from_secs(30),
        node.run_until(|t, _| t.status(handle).is_err()),
    )
    .await;
    match done {
        Ok(result) => Ok(result?),
        Err(_) => bail!("close did not complete in time"),
    }
}
