//! `mesh-tcp` — reliable, ordered, flow- and congestion-controlled byte
//! streams for memory-constrained mesh nodes.
//!
//! # Architecture
//!
//! ```text
//!  application ──▶ ┌──────────────────────────────────────┐
//!                  │              Transport               │
//!                  │  socket API · demux · control chan.  │
//!                  └────┬─────────────────────────────────┘
//!                       │ handle
//!                  ┌────▼──────────────────────────────────┐
//!                  │        SocketTable[0..N]              │
//!                  └────┬──────────────────────────────────┘
//!                       │
//!                  ┌────▼──────────────────────────────────┐
//!                  │            Connection (FSM)           │
//!                  │ SendBuffer · RecvBuffer · Congestion  │
//!                  │ RttEstimator · Timers                 │
//!                  └────┬──────────────────────────────────┘
//!                       │ Segment::encode / decode
//!                  ┌────▼──────┐
//!                  │  Network  │  (simulator, UDP emulation, …)
//!                  └───────────┘
//! ```
//!
//! The engine is sans-IO: every operation takes the current time and runs to
//! completion.  [`node`] wraps it in a tokio loop over a UDP socket and
//! [`simulator`] runs several engines on a virtual clock.
//!
//! Each module has a single responsibility:
//! - [`packet`]      — wire format (serialise / deserialise, checksum)
//! - [`seq`]         — wrap-around sequence arithmetic
//! - [`ring`]        — fixed-capacity send and receive buffers
//! - [`timer`]       — RTT estimation, RTO, per-connection deadlines
//! - [`congestion`]  — slow start, congestion avoidance, fast recovery
//! - [`state`]       — finite-state-machine types
//! - [`connection`]  — per-connection state machine
//! - [`socket`]      — handle table
//! - [`transport`]   — socket API, demultiplexing, scheduling entry points
//! - [`control`]     — diagnostic command channel
//! - [`network`]     — network-layer boundary
//! - [`simulator`]   — deterministic lossy network for testing
//! - [`udp`]         — network-layer emulation over UDP
//! - [`node`]        — async event loop

pub mod config;
pub mod congestion;
pub mod connection;
pub mod control;
pub mod error;
pub mod network;
pub mod node;
pub mod packet;
pub mod ring;
pub mod seq;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod timer;
pub mod transport;
pub mod udp;
