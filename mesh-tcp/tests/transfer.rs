//! Integration tests for data transfer: flow control, loss recovery,
//! congestion control and the retry ceiling.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use mesh_tcp::{
    config::TransportConfig,
    error::TransportError,
    packet::{Segment, WireProfile},
    seq::seq_le,
    simulator::{Datagram, NodeId, Simulator, SimulatorConfig},
    socket::Handle,
    state::ConnectionState,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const CLIENT: u16 = 1;
const SERVER: u16 = 7;
const PORT: u8 = 41;
const PROFILE: WireProfile = WireProfile::Narrow;

struct Pair {
    sim: Simulator,
    client: NodeId,
    server: NodeId,
    hc: Handle,
    hs: Handle,
}

/// Two established endpoints on a simulated network.
fn connected(sim_config: SimulatorConfig) -> Pair {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut sim = Simulator::new(sim_config);
    let client = sim.add_node(CLIENT, TransportConfig::default()).unwrap();
    let server = sim.add_node(SERVER, TransportConfig::default()).unwrap();
    let hs = sim.node(server).listen(PORT).unwrap();
    let now = sim.now();
    let hc = sim.node(client).open(SERVER, PORT, now).unwrap();
    let ok = sim.run_until(Duration::from_secs(30), |sim| {
        sim.node(client).status(hc) == Ok(ConnectionState::Established)
            && sim.node(server).status(hs) == Ok(ConnectionState::Established)
    });
    assert!(ok, "handshake did not complete");
    Pair {
        sim,
        client,
        server,
        hc,
        hs,
    }
}

/// Drain everything readable on `handle` into `out`.
fn drain(sim: &mut Simulator, node: NodeId, handle: Handle, out: &mut Vec<u8>) {
    let mut buf = [0u8; 64];
    while let Ok(n) = sim.node(node).read(handle, &mut buf) {
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
}

fn decode(d: &Datagram) -> Segment {
    Segment::decode(&d.payload, PROFILE).expect("simulated segments are well formed")
}

/// Push `data` from client to server, reading on the server as it arrives.
/// Returns what the server read.
fn stream(p: &mut Pair, data: &[u8], limit: Duration) -> Vec<u8> {
    let (client, server, hc, hs) = (p.client, p.server, p.hc, p.hs);
    let mut offset = 0;
    let mut received = Vec::new();
    p.sim.run_until(limit, |sim| {
        if offset < data.len() {
            let now = sim.now();
            offset += sim.node(client).write(hc, &data[offset..], now).unwrap();
        }
        drain(sim, server, hs, &mut received);
        received.len() == data.len()
    });
    received
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

/// A 200-byte write into a 128-byte buffer is accepted in two parts, and the
/// reader sees every byte in order.
#[test]
fn write_larger_than_buffer() {
    let mut p = connected(SimulatorConfig::default());
    let data: Vec<u8> = (0..200u16).map(|i| i as u8).collect();
    let (client, server, hc, hs) = (p.client, p.server, p.hc, p.hs);

    let now = p.sim.now();
    assert_eq!(p.sim.node(client).write(hc, &data, now), Ok(128));

    let mut received = Vec::new();
    let acked = p.sim.run_until(Duration::from_secs(10), |sim| {
        drain(sim, server, hs, &mut received);
        sim.node(client).unacked(hc) == Ok(0)
    });
    assert!(acked);

    let now = p.sim.now();
    assert_eq!(p.sim.node(client).write(hc, &data[128..], now), Ok(72));
    p.sim.run_until(Duration::from_secs(10), |sim| {
        drain(sim, server, hs, &mut received);
        received.len() == data.len()
    });
    assert_eq!(received, data);
}

/// Losing the 2nd of 5 segments costs exactly one retransmission of it, and
/// all five arrive in order.
#[test]
fn single_loss_is_retransmitted_once() {
    let mut p = connected(SimulatorConfig::default());
    let (client, server, hc, hs) = (p.client, p.server, p.hc, p.hs);

    let data_segments = Rc::new(RefCell::new(0));
    let seen = Rc::clone(&data_segments);
    p.sim.set_drop_hook(move |d| {
        if d.src_addr != CLIENT || decode(d).payload.is_empty() {
            return false;
        }
        *seen.borrow_mut() += 1;
        *seen.borrow() == 2
    });

    let data: Vec<u8> = (0..80u8).collect();
    let now = p.sim.now();
    assert_eq!(p.sim.node(client).write(hc, &data, now), Ok(80));

    let mut received = Vec::new();
    assert!(p.sim.run_until(Duration::from_secs(10), |sim| {
        drain(sim, server, hs, &mut received);
        received.len() == data.len()
    }));
    assert_eq!(received, data);

    let sends: Vec<_> = p
        .sim
        .transmissions()
        .into_iter()
        .filter(|t| t.datagram.src_addr == CLIENT)
        .map(|t| (t.at, decode(&t.datagram), t.dropped))
        .filter(|(_, seg, _)| !seg.payload.is_empty())
        .collect();
    let first_seq = sends[0].1.header.seq as u16;
    let lost_seq = u32::from(first_seq.wrapping_add(16));

    let copies: Vec<_> = sends
        .iter()
        .filter(|(_, seg, _)| seg.header.seq == lost_seq)
        .collect();
    assert_eq!(copies.len(), 2, "original plus exactly one retransmission");
    assert!(copies[0].2, "first copy was the dropped one");
    let gap = copies[1].0 - copies[0].0;
    assert!(gap <= TransportConfig::default().initial_rto, "retransmitted after {gap:?}");
}

/// Random loss, duplication and reordering never corrupt the byte stream.
#[test]
fn stream_survives_lossy_network() {
    for seed in [1, 2, 3] {
        let mut p = connected(SimulatorConfig {
            loss_rate: 0.1,
            duplicate_rate: 0.1,
            reorder_rate: 0.1,
            seed,
            ..SimulatorConfig::default()
        });
        let data: Vec<u8> = (0..1000u32).map(|i| (i * 7 % 251) as u8).collect();
        let received = stream(&mut p, &data, Duration::from_secs(300));
        assert_eq!(received.len(), data.len(), "seed {seed}");
        assert_eq!(received, data, "seed {seed}");
        assert_eq!(p.sim.node(p.client).status(p.hc), Ok(ConnectionState::Established));
    }
}

/// Oldest-unacked, highest-sent and next-to-send stay ordered through loss,
/// duplication, reordering, retransmission and close.
#[test]
fn sequence_markers_stay_ordered_under_loss() {
    for seed in [4, 5] {
        let mut p = connected(SimulatorConfig {
            loss_rate: 0.1,
            duplicate_rate: 0.1,
            reorder_rate: 0.1,
            seed,
            ..SimulatorConfig::default()
        });
        let (client, server, hc, hs) = (p.client, p.server, p.hc, p.hs);
        let data: Vec<u8> = (0..600u32).map(|i| (i % 199) as u8).collect();
        let mut offset = 0;
        let mut received = Vec::new();
        let mut closed = false;

        let done = p.sim.run_until(Duration::from_secs(300), |sim| {
            let now = sim.now();
            if offset < data.len() {
                offset += sim.node(client).write(hc, &data[offset..], now).unwrap();
            } else if !closed && sim.node(client).unacked(hc) == Ok(0) {
                sim.node(client).close(hc, now).unwrap();
                closed = true;
            }
            if let Ok(c) = sim.node(client).connection(hc) {
                let (acked, sent, next) =
                    (c.highest_seq_acked(), c.last_seq_sent(), c.next_seq_to_send());
                assert!(
                    seq_le(acked, sent) && seq_le(sent, next),
                    "seed {seed}: acked={acked} last_sent={sent} next_to_send={next}"
                );
            }
            drain(sim, server, hs, &mut received);
            closed && received.len() == data.len()
        });
        assert!(done, "seed {seed}");
        assert_eq!(received, data, "seed {seed}");
    }
}

/// A receiver that stops reading closes its window; the sender probes and
/// resumes as soon as the window reopens.
#[test]
fn zero_window_is_probed_until_reopened() {
    let mut p = connected(SimulatorConfig::default());
    let (client, server, hc, hs) = (p.client, p.server, p.hc, p.hs);

    let first = vec![1u8; 128];
    let now = p.sim.now();
    assert_eq!(p.sim.node(client).write(hc, &first, now), Ok(128));
    assert!(p.sim.run_until(Duration::from_secs(10), |sim| {
        sim.node(client).unacked(hc) == Ok(0)
    }));
    assert_eq!(p.sim.node(client).connection(hc).unwrap().peer_window(), 0);

    let now = p.sim.now();
    assert_eq!(p.sim.node(client).write(hc, &[2u8; 32], now), Ok(32));
    p.sim.run_for(Duration::from_secs(5));
    let probes = p
        .sim
        .transmissions()
        .iter()
        .filter(|t| t.datagram.src_addr == CLIENT && decode(&t.datagram).payload.len() == 1)
        .count();
    assert!(probes >= 1, "no window probe sent");
    assert_eq!(p.sim.node(client).connection(hc).unwrap().retry_count(), 0);

    let mut received = Vec::new();
    assert!(p.sim.run_until(Duration::from_secs(10), |sim| {
        drain(sim, server, hs, &mut received);
        received.len() == 160
    }));
    assert_eq!(&received[..128], &first[..]);
    assert!(received[128..].iter().all(|&b| b == 2));
}

/// Retransmission timeouts shrink the congestion window to one segment and
/// back off the RTO.
#[test]
fn timeout_collapses_congestion_window() {
    let mut p = connected(SimulatorConfig::default());
    let (client, server, hc, hs) = (p.client, p.server, p.hc, p.hs);

    // Grow the window with a clean transfer first.
    let data = vec![5u8; 96];
    let received = stream(&mut p, &data, Duration::from_secs(10));
    assert_eq!(received.len(), 96);
    assert!(p.sim.run_until(Duration::from_secs(10), |sim| {
        sim.node(client).unacked(hc) == Ok(0)
    }));
    let grown = p.sim.node(client).connection(hc).unwrap().cwnd();
    assert!(grown > 16);

    p.sim.set_drop_hook(|d| d.src_addr == SERVER);
    let now = p.sim.now();
    p.sim.node(client).write(hc, &[6u8; 16], now).unwrap();
    let rto = p.sim.node(client).connection(hc).unwrap().rtt().rto();
    p.sim.run_for(rto + Duration::from_millis(1));

    let conn = p.sim.node(client).connection(hc).unwrap();
    assert_eq!(conn.retry_count(), 1);
    assert_eq!(conn.cwnd(), 16);
    assert_eq!(conn.ssthresh(), (grown / 2).max(32));
    assert_eq!(conn.rtt().rto(), (rto * 2).min(Duration::from_secs(60)));

    p.sim.clear_drop_hook();
    let mut rest = Vec::new();
    assert!(p.sim.run_until(Duration::from_secs(10), |sim| {
        drain(sim, server, hs, &mut rest);
        rest.len() == 16
    }));
}

/// When the peer disappears, the sender gives up after the retry ceiling and
/// the application sees a reset.
#[test]
fn retry_ceiling_resets_connection() {
    let mut p = connected(SimulatorConfig::default());
    let (client, hc) = (p.client, p.hc);
    p.sim.set_drop_hook(|_| true);

    let now = p.sim.now();
    p.sim.node(client).write(hc, b"into the void", now).unwrap();
    assert!(p.sim.run_until(Duration::from_secs(600), |sim| {
        sim.node(client).status(hc) == Ok(ConnectionState::Closed)
    }));

    let mut buf = [0u8; 8];
    assert_eq!(
        p.sim.node(client).read(hc, &mut buf),
        Err(TransportError::ConnectionReset)
    );
    let now = p.sim.now();
    assert_eq!(
        p.sim.node(client).write(hc, b"more", now),
        Err(TransportError::ConnectionReset)
    );

    // One original plus six retransmissions of the data, then the RST.
    let data_sends = p
        .sim
        .transmissions()
        .iter()
        .filter(|t| t.datagram.src_addr == CLIENT && !decode(&t.datagram).payload.is_empty())
        .count();
    assert_eq!(data_sends, 7);

    let now = p.sim.now();
    assert_eq!(p.sim.node(client).close(hc, now), Ok(()));
    assert_eq!(p.sim.node(client).live_sockets(), 1);
}

/// After close, in-flight data is still delivered before the FIN, and bytes
/// written after close are refused.
#[test]
fn close_flushes_in_flight_data() {
    let mut p = connected(SimulatorConfig::default());
    let (client, server, hc, hs) = (p.client, p.server, p.hc, p.hs);

    let now = p.sim.now();
    p.sim.node(client).write(hc, b"last words", now).unwrap();
    p.sim.node(client).close(hc, now).unwrap();
    assert_eq!(
        p.sim.node(client).write(hc, b"too late", now),
        Err(TransportError::BadState)
    );

    let mut received = Vec::new();
    let mut eof = false;
    assert!(p.sim.run_until(Duration::from_secs(10), |sim| {
        let mut buf = [0u8; 32];
        loop {
            match sim.node(server).read(hs, &mut buf) {
                Ok(0) => break,
                Ok(n) => received.extend_from_slice(&buf[..n]),
                Err(TransportError::Eof) => {
                    eof = true;
                    break;
                }
                Err(e) => panic!("unexpected {e}"),
            }
        }
        eof
    }));
    assert_eq!(received, b"last words");
}
