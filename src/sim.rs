//! The deterministic network simulator: components A (Event Queue), B
//! (Node), C (Network) and D (NAT) composed into one driver that advances
//! [`crate::peer::Peer`] instances synchronously under a seeded PRNG.
//!
//! Composed the way the teacher crate's `test::simulator::Simulation` +
//! `test::peer::Service` drive a `service::Service`: a single object owns
//! an arena of nodes and an [`crate::queue::EventQueue`], and a `step`/
//! `run_until` loop is the only thing that ever calls into a `Peer`. The
//! peer never touches this module directly — it is driven purely through
//! [`crate::transport::Transport`], which [`SimTransport`] implements.
pub mod nat;
pub mod node;

use std::collections::{HashMap, VecDeque};
use std::io;
use std::net::Ipv4Addr;
use std::ops::Range;

use localtime::{LocalDuration, LocalTime};
use log::trace;

use crate::peer::{self, Event, Peer, PeerId};
use crate::queue::EventQueue;
use crate::transport::Transport;

pub use nat::{Endpoint, Keying, NatState, PortAlloc};
pub use node::{Node, NodeId, NodeKind};

/// One input the simulator delivers to a node: a packet, or a previously
/// armed wakeup firing. Both are subject to the same sleep/wake rules
/// (spec.md §4.B).
#[derive(Debug, Clone)]
pub enum SimEvent {
    /// A UDP datagram arriving at `target` on `to.1`, having traveled from
    /// `origin` (the leaf host it was sent from — kept around purely to let
    /// a [`NodeKind::Nat`] distinguish a hairpin delivery from a genuine
    /// external one) and carrying the source endpoint `src` as it appears
    /// after any translation already applied along the path.
    Deliver {
        target: NodeId,
        to: (Ipv4Addr, u16),
        data: Vec<u8>,
        src: Endpoint,
        origin: NodeId,
    },
    /// A wakeup previously armed via [`Transport::timer`] on behalf of
    /// `node`'s peer has fired.
    Timer { node: NodeId },
}

/// Tunable randomness the simulator applies on every local delivery
/// (spec.md §4.C: "Delivery scheduling must use the Queue's PRNG for
/// latency and loss decisions").
#[derive(Debug, Clone)]
pub struct SimOptions {
    /// Range of simulated one-hop latency, in milliseconds.
    pub latency_ms: Range<u64>,
    /// Probability, in `[0, 1]`, that a given local delivery is dropped.
    pub drop_probability: f64,
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            latency_ms: 1..5,
            drop_probability: 0.0,
        }
    }
}

/// Components A–D wired together: the event-driven model of addresses,
/// NATs and message loss/reordering that drives [`Peer`] instances
/// synchronously and reproducibly under a single seeded PRNG.
pub struct Simulation {
    queue: EventQueue<SimEvent>,
    nodes: Vec<Node>,
    /// Observability events drained from each host's peer, bucketed by
    /// node so a test can inspect one peer's feed without disturbing
    /// another's (mirrors the teacher's own
    /// `test::simulator::Simulation::events`).
    events: HashMap<NodeId, VecDeque<Event>>,
    rng: fastrand::Rng,
    opts: SimOptions,
    start: LocalTime,
}

impl Simulation {
    /// Create an empty simulation. Nodes are added with
    /// [`Simulation::add_network`]/[`add_nat`](Simulation::add_nat)/
    /// [`add_host`](Simulation::add_host); peers are brought up on a host
    /// with [`Simulation::spawn_peer`].
    pub fn new(start: LocalTime, rng: fastrand::Rng, opts: SimOptions) -> Self {
        Self {
            queue: EventQueue::new(start),
            nodes: Vec::new(),
            events: HashMap::new(),
            rng,
            opts,
            start,
        }
    }

    /// Current simulation time.
    pub fn now(&self) -> LocalTime {
        self.queue.now()
    }

    /// The current simulation time as the `Peer`-level millisecond counter
    /// elapsed since genesis — the same `Timestamp` a [`Peer`] living in
    /// this simulation sees in its own methods, useful for a driver/test
    /// correlating against [`PeerRecord::liveness`](crate::peer::PeerRecord::liveness)
    /// or similar.
    pub fn elapsed_ms(&self) -> peer::Timestamp {
        self.ts(self.queue.now())
    }

    /// Convert a [`LocalTime`] into the `Peer`-level millisecond counter
    /// (elapsed since this simulation's genesis), the `Timestamp` carried
    /// on the wire and in every `Peer` method (spec.md §3: "milliseconds
    /// elapsed since this peer's simulation/process genesis").
    fn ts(&self, at: LocalTime) -> peer::Timestamp {
        (at - self.start).as_millis() as u64
    }

    /// Add a root or nested routing node with no port translation
    /// (spec.md §4.C).
    pub fn add_network(&mut self, address: Ipv4Addr, parent: Option<NodeId>) -> NodeId {
        self.push_node(Node::network(address, parent), parent)
    }

    /// Add a NAT device (spec.md §4.D).
    pub fn add_nat(&mut self, address: Ipv4Addr, parent: NodeId, nat: NatState) -> NodeId {
        self.push_node(Node::nat(address, Some(parent), nat), Some(parent))
    }

    /// Add a leaf host, with no peer running on it yet.
    pub fn add_host(&mut self, address: Ipv4Addr, parent: NodeId) -> NodeId {
        self.push_node(Node::host(address, Some(parent)), Some(parent))
    }

    fn push_node(&mut self, node: Node, parent: Option<NodeId>) -> NodeId {
        let address = node.address;
        let id = NodeId(self.nodes.len());
        self.nodes.push(node);
        if let Some(parent) = parent {
            if let Some(subnet) = self.nodes[parent.0].subnet_mut() {
                subnet.insert(address, id);
            }
        }
        id
    }

    /// This node's address as it appears in its parent's subnet.
    pub fn address_of(&self, node: NodeId) -> Ipv4Addr {
        self.nodes[node.0].address
    }

    fn is_descendant(&self, mut node: NodeId, ancestor: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes[node.0].parent {
                Some(parent) => node = parent,
                None => return false,
            }
        }
    }

    /// Bring a [`Peer`] up on `node` (spec.md §4.F "Initial sequence"),
    /// binding its `local_port`/`test_port` and draining the initial
    /// outbox (the first NAT-evaluation pings, and the first keepalive
    /// wakeup) into the simulator.
    pub fn spawn_peer(
        &mut self,
        node: NodeId,
        id: PeerId,
        config: peer::Config,
        now: LocalTime,
    ) -> Result<(), crate::Error> {
        let ts = self.ts(now);
        let peer_rng = fastrand::Rng::with_seed(self.rng.u64(..));
        let mut transport = SimTransport { sim: self, node };
        let mut peer = Peer::new(&mut transport, id, config, peer_rng, ts)?;
        self.drain_peer_io(node, &mut peer, now);

        match &mut self.nodes[node.0].kind {
            NodeKind::Host { peer: slot, .. } => *slot = Some(peer),
            _ => panic!("spawn_peer: {node:?} is not a host"),
        }
        Ok(())
    }

    /// Read-only access to the peer running on `node`, if any.
    pub fn peer(&self, node: NodeId) -> Option<&Peer> {
        match &self.nodes[node.0].kind {
            NodeKind::Host { peer, .. } => peer.as_ref(),
            _ => None,
        }
    }

    /// Drive the peer living on `node` directly — e.g. [`Peer::intro`],
    /// [`Peer::join_swarm`], [`Peer::add_peer`] — instead of only reacting
    /// to inbound packets and timers. Whatever I/O and events the call
    /// produces are drained into this simulation exactly as a normal
    /// dispatch would (spec.md §8's literal scenarios are phrased as the
    /// test driver calling these directly, e.g. "`A.intro(B.id)`").
    ///
    /// # Panics
    /// Panics if `node` is not a host with a peer spawned on it.
    pub fn call_peer<R>(
        &mut self,
        node: NodeId,
        f: impl FnOnce(&mut Peer, peer::Timestamp) -> R,
    ) -> R {
        let now = self.queue.now();
        let taken = match &mut self.nodes[node.0].kind {
            NodeKind::Host { peer, .. } => peer.take(),
            _ => None,
        };
        let mut peer = taken.expect("call_peer: no peer spawned on this node");
        let ts = self.ts(now);
        let result = f(&mut peer, ts);
        self.drain_peer_io(node, &mut peer, now);
        if let NodeKind::Host { peer: slot, .. } = &mut self.nodes[node.0].kind {
            *slot = Some(peer);
        }
        result
    }

    /// Drain observability events emitted by the peer on `node` since the
    /// last drain.
    pub fn events(&mut self, node: NodeId) -> impl Iterator<Item = Event> + '_ {
        self.events.entry(node).or_default().drain(..)
    }

    /// Put `node` to sleep: subsequent deliveries and timer firings are
    /// buffered in FIFO order instead of reaching its peer (spec.md §4.B).
    pub fn sleep(&mut self, node: NodeId) {
        self.nodes[node.0].sleeping = true;
    }

    /// Wake `node`, draining whatever was buffered while it slept. Every
    /// buffered input is replayed at `now` rather than its original
    /// scheduled time — from the peer's point of view it is as if the
    /// datagrams and the single collapsed timer had all just arrived,
    /// which is exactly the "one invocation catches up" rule spec.md §4.B
    /// requires for a repeat timer on a suspended host.
    pub fn wake(&mut self, node: NodeId, now: LocalTime) {
        self.nodes[node.0].sleeping = false;
        loop {
            if self.nodes[node.0].sleeping {
                break;
            }
            let Some(ev) = self.nodes[node.0].awaken.pop_front() else {
                break;
            };
            self.dispatch_immediate(ev, now);
        }
    }

    /// Run the simulation forward, processing every event scheduled at or
    /// before `upto`.
    pub fn run_until(&mut self, upto: LocalTime) {
        loop {
            let Some(next) = self.queue.peek_time() else {
                break;
            };
            if next > upto {
                break;
            }
            let Some((ts, ev)) = self.queue.pop(upto) else {
                break;
            };
            self.dispatch(ev, ts);
        }
    }

    /// Whether there is nothing left to process.
    pub fn is_done(&self) -> bool {
        self.queue.is_empty()
    }

    fn dispatch(&mut self, ev: SimEvent, ts: LocalTime) {
        let node = match &ev {
            SimEvent::Deliver { target, .. } => *target,
            SimEvent::Timer { node } => *node,
        };
        if self.nodes[node.0].sleeping {
            self.nodes[node.0].awaken.push_back(ev);
            return;
        }
        self.dispatch_immediate(ev, ts);
    }

    fn dispatch_immediate(&mut self, ev: SimEvent, ts: LocalTime) {
        match ev {
            SimEvent::Deliver {
                target,
                to,
                data,
                src,
                origin,
            } => self.process_deliver(target, to, data, src, origin, ts),
            SimEvent::Timer { node } => self.fire_timer(node, ts),
        }
    }

    fn fire_timer(&mut self, node: NodeId, ts: LocalTime) {
        self.with_peer(node, ts, |peer, now| peer.on_timer(now));
    }

    /// Handle a packet arriving at `target`: final delivery to a
    /// [`NodeKind::Host`], or NAT-table reversal on a [`NodeKind::Nat`]
    /// (spec.md §4.D "Inbound").
    fn process_deliver(
        &mut self,
        target: NodeId,
        to: (Ipv4Addr, u16),
        data: Vec<u8>,
        src: Endpoint,
        origin: NodeId,
        ts: LocalTime,
    ) {
        match &self.nodes[target.0].kind {
            NodeKind::Host { bound_ports, .. } => {
                if !bound_ports.contains(&to.1) {
                    trace!(target: "sim", "drop: port {} not bound on {:?}", to.1, target);
                    return;
                }
                self.with_peer(target, ts, |peer, now| {
                    peer.receive(&data, (src.address, src.port), to.1, now)
                });
            }
            NodeKind::Network { .. } => {
                trace!(target: "sim", "drop: {:?} has no addressable host", target);
            }
            NodeKind::Nat(_) => {
                let internal = self.is_descendant(origin, target);
                let hairpinning = match &self.nodes[target.0].kind {
                    NodeKind::Nat(nat) => nat.hairpinning,
                    _ => unreachable!(),
                };
                if internal && !hairpinning {
                    trace!(target: "sim", "drop: hairpin to {:?} disabled", target);
                    return;
                }
                let reversed = match &mut self.nodes[target.0].kind {
                    NodeKind::Nat(nat) => nat.reverse(to.1, ts),
                    _ => unreachable!(),
                };
                let Some(inner) = reversed else {
                    trace!(target: "sim", "drop: no mapping for inbound port {} on {:?}", to.1, target);
                    return;
                };
                let Some(&child) = (match &self.nodes[target.0].kind {
                    NodeKind::Nat(nat) => nat.subnet.get(&inner.address),
                    _ => unreachable!(),
                }) else {
                    trace!(target: "sim", "drop: mapping for {:?} points at an unknown child", target);
                    return;
                };
                self.schedule_delivery(child, (inner.address, inner.port), data, src, origin);
            }
        }
    }

    /// Call `f` with the [`Peer`] living on `node` and the `Timestamp`
    /// corresponding to `ts`, then drain whatever I/O and events that call
    /// produced. `node`'s peer is temporarily taken out of the arena so
    /// `f` and the subsequent drain can both hold `&mut self`.
    fn with_peer(&mut self, node: NodeId, ts: LocalTime, f: impl FnOnce(&mut Peer, peer::Timestamp)) {
        let taken = match &mut self.nodes[node.0].kind {
            NodeKind::Host { peer, .. } => peer.take(),
            _ => None,
        };
        let Some(mut peer) = taken else {
            return;
        };
        let now = self.ts(ts);
        f(&mut peer, now);
        self.drain_peer_io(node, &mut peer, ts);
        if let NodeKind::Host { peer: slot, .. } = &mut self.nodes[node.0].kind {
            *slot = Some(peer);
        }
    }

    /// Drain `peer`'s outbox (sends become scheduled deliveries, wakeups
    /// become scheduled timers) and its event feed, into this simulation.
    fn drain_peer_io(&mut self, node: NodeId, peer: &mut Peer, ts: LocalTime) {
        while let Some(io) = peer.outbox().next() {
            match io {
                peer::Io::Send {
                    msg,
                    address,
                    port,
                    from_port,
                } => {
                    let data = msg.encode();
                    self.enqueue_send(node, data, (address, port), from_port);
                }
                peer::Io::Wakeup(after) => {
                    self.queue.add(ts + after, SimEvent::Timer { node });
                }
            }
        }
        let drained: Vec<Event> = peer.events().collect();
        if !drained.is_empty() {
            self.events.entry(node).or_default().extend(drained);
        }
    }

    /// A UDP socket implicitly binds to whatever ephemeral port it first
    /// sends from, the same way a real OS stack does: the birthday-paradox
    /// hard side never calls `bind` before sending from each of its 256
    /// fresh ports (spec.md §4.F), so the first send from a port is what
    /// registers it as bound here.
    fn enqueue_send(&mut self, node: NodeId, data: Vec<u8>, to: (Ipv4Addr, u16), from_port: u16) {
        if let NodeKind::Host { bound_ports, .. } = &mut self.nodes[node.0].kind {
            bound_ports.insert(from_port);
        }
        let src = Endpoint::new(self.nodes[node.0].address, from_port);
        self.send_from(node, to, src, data);
    }

    /// Walk up from `origin` applying each ancestor's routing policy
    /// (spec.md §4.C "Network", §4.D "NAT: Outbound") until the
    /// destination is found in some ancestor's subnet, a NAT escalates the
    /// flow upward rewriting its source, or the walk runs off the root
    /// (unreachable — dropped).
    fn send_from(&mut self, origin: NodeId, to: (Ipv4Addr, u16), mut src: Endpoint, data: Vec<u8>) {
        let mut current = origin;
        loop {
            let Some(parent) = self.nodes[current.0].parent else {
                trace!(target: "sim", "drop: {to:?} unreachable from {origin:?}");
                return;
            };

            match &self.nodes[parent.0].kind {
                NodeKind::Host { .. } => {
                    trace!(target: "sim", "drop: {:?} routed through a host", parent);
                    return;
                }
                NodeKind::Network { subnet } => {
                    if let Some(&child) = subnet.get(&to.0) {
                        self.schedule_delivery(child, to, data, src, origin);
                    } else {
                        trace!(target: "sim", "drop: {:?} unreachable from network {:?}", to, parent);
                    }
                    return;
                }
                NodeKind::Nat(nat) => {
                    if let Some(&child) = nat.subnet.get(&to.0) {
                        // Same NAT, no translation needed: this is plain
                        // local routing between two of its own children.
                        self.schedule_delivery(child, to, data, src, origin);
                        return;
                    }
                }
            }

            // Escalate through the NAT at `parent`, rewriting our source to
            // its public endpoint, and keep climbing from there.
            let now = self.queue.now();
            let port = {
                let nat = match &mut self.nodes[parent.0].kind {
                    NodeKind::Nat(nat) => nat,
                    _ => unreachable!("matched above"),
                };
                nat.allocate_or_reuse(src, Endpoint::new(to.0, to.1), now, &mut self.rng)
            };
            let public_address = self.nodes[parent.0].address;
            src = Endpoint::new(public_address, port);
            current = parent;
        }
    }

    /// Schedule `data` for delivery to `target`, applying the simulator's
    /// configured one-hop latency and drop probability (spec.md §4.C:
    /// "schedule delivery to that child at time `Queue.ts + random_latency()`
    /// with configurable drop probability").
    fn schedule_delivery(
        &mut self,
        target: NodeId,
        to: (Ipv4Addr, u16),
        data: Vec<u8>,
        src: Endpoint,
        origin: NodeId,
    ) {
        if self.opts.drop_probability > 0.0 && self.rng.f64() < self.opts.drop_probability {
            trace!(target: "sim", "drop: simulated loss en route to {:?}", target);
            return;
        }
        let latency_ms = if self.opts.latency_ms.is_empty() {
            self.opts.latency_ms.start
        } else {
            self.rng.u64(self.opts.latency_ms.clone())
        };
        let at = self.queue.now() + LocalDuration::from_millis(latency_ms as u128);
        self.queue.add(
            at,
            SimEvent::Deliver {
                target,
                to,
                data,
                src,
                origin,
            },
        );
    }
}

/// [`Transport`] backed by a [`Simulation`]'s node arena. Constructed only
/// transiently, for the duration of [`Peer::new`]'s `bind`/`local_address`
/// calls during [`Simulation::spawn_peer`] — every later effect of the
/// peer flows back through [`Simulation::drain_peer_io`] instead, since
/// `Peer` never holds a `Transport` past construction (spec.md §4.E, §9:
/// "A Peer takes a transport adapter").
struct SimTransport<'a> {
    sim: &'a mut Simulation,
    node: NodeId,
}

impl Transport for SimTransport<'_> {
    fn bind(&mut self, port: u16) -> io::Result<()> {
        match &mut self.sim.nodes[self.node.0].kind {
            NodeKind::Host { bound_ports, .. } => {
                if bound_ports.insert(port) {
                    Ok(())
                } else {
                    Err(io::Error::new(
                        io::ErrorKind::AddrInUse,
                        format!("port {port} already bound"),
                    ))
                }
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "not a host node",
            )),
        }
    }

    fn local_address(&self) -> Ipv4Addr {
        self.sim.address_of(self.node)
    }

    fn send(&mut self, bytes: &[u8], to: (Ipv4Addr, u16), from_port: u16) {
        self.sim.enqueue_send(self.node, bytes.to_vec(), to, from_port);
    }

    fn timer(&mut self, after: LocalDuration) {
        let at = self.sim.queue.now() + after;
        self.sim.queue.add(at, SimEvent::Timer { node: self.node });
    }
}
