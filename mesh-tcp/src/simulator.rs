//! Deterministic in-memory network for testing.
//!
//! Real networks drop, reorder, and duplicate packets.  To exercise the
//! reliability mechanisms without depending on actual network conditions,
//! [`Simulator`] runs several [`Transport`]s on a virtual clock and carries
//! their datagrams through a configurable fault model:
//!
//! | Fault         | Description                                          |
//! |---------------|------------------------------------------------------|
//! | Latency       | Every datagram arrives `latency` after it was sent.  |
//! | Packet loss   | Drop a datagram with probability `loss_rate`.        |
//! | Reordering    | Delay a datagram by an extra `reorder_delay`, letting |
//! |               | later datagrams overtake it.                         |
//! | Duplication   | Deliver a datagram twice.                            |
//! | Drop hook     | Caller-supplied predicate for targeted loss.         |
//!
//! All randomness comes from a seeded [`StdRng`], so a failing run replays
//! exactly.  Every send is recorded in a transmission log.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::TransportConfig;
use crate::error::{ConfigError, SendFailed};
use crate::network::{Network, NodeAddr, Port};
use crate::transport::Transport;

/// Configuration for the fault-injection model.
///
/// All probabilities are in the range `[0.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// One-way delay applied to every datagram.
    pub latency: Duration,
    /// Probability that any given datagram is silently dropped.
    pub loss_rate: f64,
    /// Probability that a datagram is held back by `reorder_delay`.
    pub reorder_rate: f64,
    /// Extra delay applied to reordered datagrams.
    pub reorder_delay: Duration,
    /// Probability that a datagram is delivered twice.
    pub duplicate_rate: f64,
    /// Seed for the fault model and for every node's ISN generator.
    pub seed: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        // No faults by default; the simulator is a plain delay line.
        Self {
            latency: Duration::from_millis(10),
            loss_rate: 0.0,
            reorder_rate: 0.0,
            reorder_delay: Duration::from_millis(25),
            duplicate_rate: 0.0,
            seed: 0,
        }
    }
}

/// One datagram as handed to the network layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    pub src_addr: NodeAddr,
    pub dst_addr: NodeAddr,
    pub src_port: Port,
    pub dst_port: Port,
    pub payload: Vec<u8>,
}

/// Log entry for one send.
#[derive(Debug, Clone)]
pub struct Transmission {
    pub at: Instant,
    pub datagram: Datagram,
    /// Lost to the drop hook or to random loss.
    pub dropped: bool,
}

type DropHook = Box<dyn FnMut(&Datagram) -> bool>;

#[derive(Debug)]
struct Pending {
    deliver_at: Instant,
    order: u64,
    datagram: Datagram,
}

/// State shared by every node's [`SimNetwork`].
struct Wire {
    config: SimulatorConfig,
    rng: StdRng,
    now: Instant,
    queue: Vec<Pending>,
    next_order: u64,
    log: Vec<Transmission>,
    drop_hook: Option<DropHook>,
}

impl Wire {
    fn send(&mut self, datagram: Datagram) {
        let hooked = self.drop_hook.as_mut().is_some_and(|hook| hook(&datagram));
        let dropped = hooked || self.rng.random_bool(self.config.loss_rate);
        self.log.push(Transmission {
            at: self.now,
            datagram: datagram.clone(),
            dropped,
        });
        if dropped {
            log::trace!(
                "[sim] drop {}:{} → {}:{}",
                datagram.src_addr,
                datagram.src_port,
                datagram.dst_addr,
                datagram.dst_port
            );
            return;
        }

        let mut delay = self.config.latency;
        if self.rng.random_bool(self.config.reorder_rate) {
            delay += self.config.reorder_delay;
            log::trace!("[sim] hold back datagram by {:?}", self.config.reorder_delay);
        }
        if self.rng.random_bool(self.config.duplicate_rate) {
            log::trace!("[sim] duplicate datagram");
            self.enqueue(self.config.latency, datagram.clone());
        }
        self.enqueue(delay, datagram);
    }

    fn enqueue(&mut self, delay: Duration, datagram: Datagram) {
        self.queue.push(Pending {
            deliver_at: self.now + delay,
            order: self.next_order,
            datagram,
        });
        self.next_order += 1;
    }

    /// Remove and return every datagram due at or before `now`, in arrival
    /// order.
    fn take_due(&mut self, now: Instant) -> Vec<Datagram> {
        let (mut due, rest): (Vec<Pending>, Vec<Pending>) =
            self.queue.drain(..).partition(|p| p.deliver_at <= now);
        self.queue = rest;
        due.sort_by_key(|p| (p.deliver_at, p.order));
        due.into_iter().map(|p| p.datagram).collect()
    }

    fn next_arrival(&self) -> Option<Instant> {
        self.queue.iter().map(|p| p.deliver_at).min()
    }
}

/// The [`Network`] a simulated node's transport sends through.
pub struct SimNetwork {
    addr: NodeAddr,
    wire: Rc<RefCell<Wire>>,
}

impl Network for SimNetwork {
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
        self.wire.borrow_mut().send(Datagram {
            src_addr: self.addr,
            dst_addr: dest_addr,
            src_port,
            dst_port: dest_port,
            payload: payload.to_vec(),
        });
        Ok(())
    }
}

/// Index of a node inside a [`Simulator`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeId(usize);

/// A set of transports sharing one simulated network and virtual clock.
pub struct Simulator {
    wire: Rc<RefCell<Wire>>,
    nodes: Vec<Transport<SimNetwork>>,
}

impl Simulator {
    pub fn new(config: SimulatorConfig) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        Self {
            wire: Rc::new(RefCell::new(Wire {
                config,
                rng,
                now: Instant::now(),
                queue: Vec::new(),
                next_order: 0,
                log: Vec::new(),
                drop_hook: None,
            })),
            nodes: Vec::new(),
        }
    }

    /// Current virtual time.
    pub fn now(&self) -> Instant {
        self.wire.borrow().now
    }

    /// Attach a node with address `addr`.
    pub fn add_node(
        &mut self,
        addr: NodeAddr,
        config: TransportConfig,
    ) -> Result<NodeId, ConfigError> {
        let seed = self.wire.borrow().config.seed ^ u64::from(addr);
        let net = SimNetwork {
            addr,
            wire: Rc::clone(&self.wire),
        };
        self.nodes.push(Transport::with_seed(net, config, seed)?);
        Ok(NodeId(self.nodes.len() - 1))
    }

    pub fn node(&mut self, id: NodeId) -> &mut Transport<SimNetwork> {
        &mut self.nodes[id.0]
    }

    /// Install a predicate that drops every datagram it returns `true` for.
    pub fn set_drop_hook(&mut self, hook: impl FnMut(&Datagram) -> bool + 'static) {
        self.wire.borrow_mut().drop_hook = Some(Box::new(hook));
    }

    pub fn clear_drop_hook(&mut self) {
        self.wire.borrow_mut().drop_hook = None;
    }

    /// Change the random fault rates mid-run.
    pub fn set_faults(&mut self, loss_rate: f64, duplicate_rate: f64, reorder_rate: f64) {
        let mut wire = self.wire.borrow_mut();
        wire.config.loss_rate = loss_rate;
        wire.config.duplicate_rate = duplicate_rate;
        wire.config.reorder_rate = reorder_rate;
    }

    /// Copy of every send so far.
    pub fn transmissions(&self) -> Vec<Transmission> {
        self.wire.borrow().log.clone()
    }

    /// Earliest pending arrival or timer deadline.
    pub fn next_event(&self) -> Option<Instant> {
        let arrival = self.wire.borrow().next_arrival();
        self.nodes
            .iter()
            .filter_map(Transport::next_deadline)
            .chain(arrival)
            .min()
    }

    /// Jump to the next event, deliver what is due and fire expired timers.
    /// Returns `false` when nothing is scheduled.
    pub fn step(&mut self) -> bool {
        let Some(at) = self.next_event() else {
            return false;
        };
        let now = at.max(self.now());
        self.advance_to(now);
        true
    }

    /// Run every event up to `now() + duration`, then set the clock there.
    pub fn run_for(&mut self, duration: Duration) {
        let end = self.now() + duration;
        while self.next_event().is_some_and(|at| at <= end) {
            self.step();
        }
        self.advance_to(end);
    }

    /// Step until `done` holds or `limit` of virtual time has passed.
    /// Returns whether `done` was reached.
    pub fn run_until(
        &mut self,
        limit: Duration,
        mut done: impl FnMut(&mut Simulator) -> bool,
    ) -> bool {
        let end = self.now() + limit;
        loop {
            if done(self) {
                return true;
            }
            match self.next_event() {
                Some(at) if at <= end => {
                    self.step();
                }
                _ => {
                    self.advance_to(end);
                    return done(self);
                }
            }
        }
    }

    fn advance_to(&mut self, now: Instant) {
        let due = {
            let mut wire = self.wire.borrow_mut();
            wire.now = now;
            wire.take_due(now)
        };
        for d in due {
            match self.nodes.iter_mut().find(|n| n.local_addr() == d.dst_addr) {
                Some(node) => node.on_datagram(d.src_addr, d.src_port, d.dst_port, &d.payload, now),
                None => log::trace!("[sim] no node at address {}", d.dst_addr),
            }
        }
        for node in &mut self.nodes {
            node.poll(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ConnectionState;

    #[test]
    fn delay_line_delivers_after_latency() {
        let mut sim = Simulator::new(SimulatorConfig::default());
        let a = sim.add_node(1, TransportConfig::default()).unwrap();
        let b = sim.add_node(7, TransportConfig::default()).unwrap();
        sim.node(b).listen(41).unwrap();
        let start = sim.now();
        let h = sim.node(a).open(7, 41, start).unwrap();

        assert!(sim.step());
        assert_eq!(sim.now(), start + Duration::from_millis(10));
        assert_eq!(sim.transmissions().len(), 2, "SYN then SYN+ACK");
        sim.run_for(Duration::from_millis(50));
        assert_eq!(sim.node(a).status(h), Ok(ConnectionState::Established));
    }

    #[test]
    fn drop_hook_records_loss() {
        let mut sim = Simulator::new(SimulatorConfig::default());
        let a = sim.add_node(1, TransportConfig::default()).unwrap();
        sim.add_node(7, TransportConfig::default()).unwrap();
        sim.set_drop_hook(|_| true);
        let now = sim.now();
        sim.node(a).open(7, 41, now).unwrap();
        sim.run_for(Duration::from_millis(100));
        let log = sim.transmissions();
        assert_eq!(log.len(), 1);
        assert!(log[0].dropped);
    }

    #[test]
    fn same_seed_same_schedule() {
        let run = || {
            let cfg = SimulatorConfig {
                loss_rate: 0.3,
                duplicate_rate: 0.2,
                reorder_rate: 0.2,
                seed: 42,
                ..SimulatorConfig::default()
            };
            let mut sim = Simulator::new(cfg);
            let a = sim.add_node(1, TransportConfig::default()).unwrap();
            let b = sim.add_node(7, TransportConfig::default()).unwrap();
            sim.node(b).listen(41).unwrap();
            let now = sim.now();
            sim.node(a).open(7, 41, now).unwrap();
            sim.run_for(Duration::from_secs(5));
            sim.transmissions()
                .into_iter()
                .map(|t| (t.datagram.payload, t.dropped))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn invalid_node_config_is_rejected() {
        let mut sim = Simulator::new(SimulatorConfig::default());
        let config = TransportConfig {
            buffer_size: 0,
            ..TransportConfig::default()
        };
        assert_eq!(sim.add_node(1, config), Err(ConfigError::BufferSize(0)));
    }
}
