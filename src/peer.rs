//! Component F: the NAT-traversal peer.
//!
//! [`Peer`] is a reactive state machine (spec.md §9's design note: "the
//! source description reads imperatively... the implementation must be
//! reactive"). It never blocks and never touches a transport directly —
//! every effect of a state transition is an [`reactor::Io`] value pushed to
//! its [`reactor::Outbox`], mirroring the split the teacher crate draws
//! between `service::Service` (pure state) and `service::reactor::Reactor`
//! (the drained intent queue). A driver — [`crate::sim::Simulation`] in
//! this crate — owns the only two entry points that advance it:
//! [`Peer::receive`] (an inbound packet) and [`Peer::on_timer`] (an armed
//! wakeup firing).
pub mod config;
pub mod events;
pub mod ids;
pub mod reactor;
pub mod record;
pub mod swarm;

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::net::Ipv4Addr;

use log::{debug, trace, warn};

pub use config::{Config, Introducer};
pub use events::Event;
pub use ids::{PeerId, SwarmId};
pub use reactor::{Io, Outbox};
pub use record::{Liveness, NatType, PeerRecord, PongState, Timestamp};
pub use swarm::Swarm;

use crate::transport::Transport;
use crate::wire::Message;

/// How long NAT evaluation waits for both introducers to answer before
/// deciding from whatever it has (spec.md §4.F: "or a timeout elapses").
/// The source is silent on the exact value; chosen well inside
/// `KEEP_ALIVE_TIMEOUT` so evaluation settles long before the first
/// keepalive tick. See `DESIGN.md`.
pub const NAT_EVAL_TIMEOUT_MS: u64 = 2_000;

/// Partial state accumulated while NAT evaluation is in flight.
#[derive(Debug, Clone, Copy)]
struct NatEval {
    started: Timestamp,
    responded: [bool; 2],
    seen_port: [Option<u16>; 2],
    test_received: bool,
}

/// Progress of the easy side of a birthday-paradox traversal (spec.md
/// §4.F, `(S=Easy, R=Hard)`).
#[derive(Debug, Clone, Default)]
struct EasyBdp {
    sent: u32,
    next_send: Timestamp,
    used_ports: HashSet<u16>,
}

/// The state machine of NAT traversal (spec.md §4.F).
#[derive(Debug)]
pub struct Peer {
    id: PeerId,
    config: Config,
    /// This host's own address within its local network, as reported by
    /// the driver at construction (spec.md §4.F "Receiving MsgConnect":
    /// the same-NAT case needs it to announce a `local` endpoint).
    local_address: Ipv4Addr,
    rng: fastrand::Rng,
    restart: Timestamp,

    nat: NatType,
    public_address: Option<Ipv4Addr>,
    public_port: Option<u16>,
    pong: Option<PongState>,

    /// `BTreeMap`, not `HashMap`: iterated to produce outbound sends
    /// (keepalive re-pings, BDP retries) whose order must be reproducible
    /// from the seed alone (spec.md §8 "Determinism") — a `HashMap`'s
    /// iteration order is seeded from its own per-process random state, not
    /// from `Peer::rng`.
    peers: BTreeMap<PeerId, PeerRecord>,
    swarms: BTreeMap<SwarmId, Swarm>,

    nat_eval: Option<NatEval>,
    bdp_easy: BTreeMap<PeerId, EasyBdp>,
    last_idle: Option<Timestamp>,

    outbox: Outbox,
    events: VecDeque<Event>,
}

impl Peer {
    /// Bind `config.local_port`/`config.test_port` through `transport` and
    /// construct a peer, immediately entering NAT evaluation (spec.md §4.F
    /// "Initial sequence"). The only fatal error in this crate (spec.md
    /// §7): a bind failure here is surfaced to the caller and the peer
    /// never comes into being.
    pub fn new<T: Transport>(
        transport: &mut T,
        id: PeerId,
        config: Config,
        rng: fastrand::Rng,
        now: Timestamp,
    ) -> Result<Self, crate::Error> {
        transport
            .bind(config.local_port)
            .map_err(|source| crate::Error::Bind {
                port: config.local_port,
                source,
            })?;
        transport
            .bind(config.test_port)
            .map_err(|source| crate::Error::Bind {
                port: config.test_port,
                source,
            })?;

        let mut peer = Self {
            id,
            local_address: transport.local_address(),
            rng,
            restart: now,
            nat: NatType::Unknown,
            public_address: None,
            public_port: None,
            pong: None,
            peers: BTreeMap::new(),
            swarms: BTreeMap::new(),
            nat_eval: None,
            bdp_easy: BTreeMap::new(),
            last_idle: Some(now),
            outbox: Outbox::default(),
            config,
            events: VecDeque::new(),
        };
        if let Some(interval) = peer.config.keep_alive {
            peer.outbox.wakeup(interval);
        }
        peer.enter_nat_evaluation(now);

        Ok(peer)
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn nat(&self) -> NatType {
        self.nat
    }

    pub fn public_endpoint(&self) -> Option<(Ipv4Addr, u16)> {
        Some((self.public_address?, self.public_port?))
    }

    pub fn peer(&self, id: &PeerId) -> Option<&PeerRecord> {
        self.peers.get(id)
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn swarm(&self, id: &SwarmId) -> Option<&Swarm> {
        self.swarms.get(id)
    }

    /// Drain the queue of effects (sends, wakeups) produced since the last
    /// drain.
    pub fn outbox(&mut self) -> &mut Outbox {
        &mut self.outbox
    }

    /// Drain observability events produced since the last drain.
    pub fn events(&mut self) -> impl Iterator<Item = Event> + '_ {
        self.events.drain(..)
    }

    /// Manually register a peer (e.g. a statically configured contact),
    /// without waiting to hear from it first.
    pub fn add_peer(&mut self, id: PeerId, address: Ipv4Addr, port: u16, now: Timestamp) {
        self.peers
            .entry(id)
            .or_insert_with(|| PeerRecord::new(id, address, port, 0));
        self.retry_ping(id, now);
    }

    /// The network interface changed: clear our NAT class and re-evaluate
    /// it from scratch (spec.md §4.F step 2).
    pub fn network_changed(&mut self, now: Timestamp) {
        self.enter_nat_evaluation(now);
    }

    /// Request an introduction to `target`, optionally as part of `swarm`
    /// (spec.md §4.F "Introduction and connection").
    pub fn intro(&mut self, target: PeerId, swarm: Option<SwarmId>) {
        let introducer = self.config.introducers[0];
        self.outbox.send(
            Message::Intro {
                id: self.id,
                target,
                swarm,
            },
            introducer.address,
            introducer.port,
            self.config.local_port,
        );
    }

    /// Join `swarm`, asking the introducer to fan out up to
    /// `peers_wanted` introductions (spec.md §4.F "MsgJoin").
    pub fn join_swarm(&mut self, swarm: SwarmId, peers_wanted: u32, now: Timestamp) {
        self.swarms.entry(swarm).or_insert_with(|| Swarm::new(now));
        let introducer = self.config.introducers[0];
        self.outbox.send(
            Message::Join {
                id: self.id,
                swarm,
                nat: self.nat,
                peers: peers_wanted,
            },
            introducer.address,
            introducer.port,
            self.config.local_port,
        );
    }

    /// Handle an inbound packet (spec.md §4.E `onMessage`). Malformed
    /// payloads and unrecognized tags are silently dropped (spec.md §7).
    pub fn receive(&mut self, data: &[u8], src: (Ipv4Addr, u16), recv_port: u16, now: Timestamp) {
        let Some(msg) = Message::decode(data) else {
            trace!(target: "peer", "dropping unrecognized message from {}:{}", src.0, src.1);
            return;
        };
        trace!(target: "peer", "recv {msg} from {}:{} on port {recv_port}", src.0, src.1);

        match msg {
            Message::Ping { id, nat, restart } => self.on_ping(id, nat, restart, src, recv_port, now),
            Message::Pong {
                id,
                address,
                port,
                nat,
                restart,
                timestamp,
            } => self.on_pong(id, address, port, nat, restart, timestamp, src, now),
            Message::Test {
                address, port, nat, ..
            } => self.on_test(address, port, nat, now),
            Message::Intro { id, target, swarm } => self.on_intro(id, target, swarm, src, now),
            Message::IntroError { id, target, call } => self.on_intro_error(id, target, call),
            Message::Connect {
                target,
                address,
                port,
                nat,
                swarm,
                ..
            } => self.on_connect(target, address, port, nat, swarm, now),
            Message::Local { id, address, port } => self.on_local(id, address, port, now),
            Message::Join {
                id,
                swarm,
                nat,
                peers,
            } => self.on_join(id, swarm, nat, peers, src, now),
            Message::JoinError { swarm, call, .. } => self.on_join_error(swarm, call),
            Message::Relay { target, content } => self.on_relay(target, *content, now),
        }
    }

    /// Handle a previously armed wakeup firing (spec.md §4.E `timer`).
    /// Reactive by construction: every periodic behavior here re-arms its
    /// own next wakeup rather than being driven by a repeating timer, so
    /// that a sleeping host which misses several firings catches up with
    /// exactly one invocation once woken (spec.md §4.B).
    pub fn on_timer(&mut self, now: Timestamp) {
        if let Some(eval) = &self.nat_eval {
            if now.saturating_sub(eval.started) >= NAT_EVAL_TIMEOUT_MS {
                self.finish_nat_evaluation();
            }
        }

        if let Some(interval) = self.config.keep_alive {
            let interval_ms = interval.as_millis() as u64;
            let last = self.last_idle.unwrap_or(now);
            let elapsed = now.saturating_sub(last);

            if elapsed >= interval_ms {
                self.run_keepalive_tick(now, elapsed, interval_ms);
                self.last_idle = Some(now);
                self.outbox.wakeup(interval);
            }
        }

        self.drive_bdp_easy(now);
        if !self.bdp_easy.is_empty() {
            self.outbox.wakeup(self.config.bdp_interval);
        }
    }

    // -- NAT evaluation ----------------------------------------------------

    fn enter_nat_evaluation(&mut self, now: Timestamp) {
        self.public_address = None;
        self.public_port = None;
        self.nat = NatType::Unknown;
        self.pong = None;
        self.nat_eval = Some(NatEval {
            started: now,
            responded: [false, false],
            seen_port: [None, None],
            test_received: false,
        });

        for introducer in self.config.introducers {
            self.outbox.send(
                Message::Ping {
                    id: self.id,
                    nat: self.nat,
                    restart: self.restart,
                },
                introducer.address,
                introducer.port,
                self.config.local_port,
            );
        }
        self.outbox
            .wakeup(localtime::LocalDuration::from_millis(NAT_EVAL_TIMEOUT_MS as u128));
    }

    fn introducer_index(&self, address: Ipv4Addr, port: u16) -> Option<usize> {
        self.config
            .introducers
            .iter()
            .position(|i| i.address == address && i.port == port)
    }

    fn finish_nat_evaluation(&mut self) {
        let Some(eval) = self.nat_eval.take() else {
            return;
        };

        self.nat = if eval.test_received {
            NatType::Static
        } else {
            match (eval.seen_port[0], eval.seen_port[1]) {
                (Some(a), Some(b)) if a == b => NatType::Easy,
                // Either the two introducers disagree (address-and-port-
                // dependent mapping observed), or fewer than two answered
                // before the timeout: in both cases we can't establish
                // endpoint-independence, so we assume the stricter class.
                _ => NatType::Hard,
            }
        };
        self.events.push_back(Event::NatDetermined(self.nat));
        trace!(target: "peer", "nat evaluation complete: {:?}", self.nat);
    }

    // -- Keepalive -----------------------------------------------------------

    fn run_keepalive_tick(&mut self, now: Timestamp, elapsed: u64, interval_ms: u64) {
        // More than one full period elapsed: we were almost certainly
        // suspended. Collapse the missed ticks into a single wakeup pass.
        if elapsed >= interval_ms.saturating_mul(2) {
            self.events.push_back(Event::Wakeup);
            let peer_ids: Vec<PeerId> = self.peers.keys().copied().collect();
            for id in peer_ids {
                self.send_ping(id, now);
            }
            let swarm_ids: Vec<SwarmId> = self.swarms.keys().copied().collect();
            for swarm in swarm_ids {
                if let Some(sw) = self.swarms.get(&swarm) {
                    let stale = sw
                        .members_by_liveness(&self.peers, now)
                        .filter(|(_, liveness)| !matches!(liveness, Liveness::Active))
                        .count();
                    if stale > 0 {
                        debug!(target: "peer", "{stale} stale member(s) in swarm {swarm}, rejoining");
                    }
                }
                let introducer = self.config.introducers[0];
                self.outbox.send(
                    Message::Join {
                        id: self.id,
                        swarm,
                        nat: self.nat,
                        peers: self.config.join_fanout,
                    },
                    introducer.address,
                    introducer.port,
                    self.config.local_port,
                );
            }
        }

        for (id, record) in self.peers.iter() {
            self.events.push_back(Event::PeerLiveness {
                id: *id,
                liveness: record.liveness(now),
            });
        }
    }

    fn send_ping(&mut self, target: PeerId, now: Timestamp) {
        let Some(record) = self.peers.get_mut(&target) else {
            return;
        };
        record.last_sent = Some(now);
        let (address, port) = (record.address, record.port);
        self.outbox.send(
            Message::Ping {
                id: self.id,
                nat: self.nat,
                restart: self.restart,
            },
            address,
            port,
            self.config.local_port,
        );
    }

    /// Idempotent: a ping within the last [`config::RETRY_PING_INTERVAL_MS`]
    /// is a no-op (spec.md §4.F "retryPing").
    fn retry_ping(&mut self, target: PeerId, now: Timestamp) {
        let Some(record) = self.peers.get(&target) else {
            return;
        };
        if let Some(last_sent) = record.last_sent {
            if now.saturating_sub(last_sent) < config::RETRY_PING_INTERVAL_MS {
                return;
            }
        }
        if let Some(record) = self.peers.get_mut(&target) {
            record.connecting_since.get_or_insert(now);
        }
        self.send_ping(target, now);
    }

    // -- Birthday-paradox traversal -------------------------------------------

    fn start_bdp_easy(&mut self, target: PeerId, now: Timestamp) {
        if let Some(record) = self.peers.get_mut(&target) {
            record.connecting_since = Some(now);
        }
        self.bdp_easy.insert(
            target,
            EasyBdp {
                sent: 0,
                next_send: now,
                used_ports: HashSet::new(),
            },
        );
        self.events.push_back(Event::TraversalStarted { target });
        self.drive_bdp_easy(now);
        self.outbox.wakeup(self.config.bdp_interval);
    }

    fn drive_bdp_easy(&mut self, now: Timestamp) {
        let targets: Vec<PeerId> = self.bdp_easy.keys().copied().collect();

        for target in targets {
            if self
                .peers
                .get(&target)
                .is_some_and(|r| r.recently_active(now))
            {
                self.bdp_easy.remove(&target);
                continue;
            }
            let Some(address) = self.peers.get(&target).map(|r| r.address) else {
                self.bdp_easy.remove(&target);
                continue;
            };

            let exhausted = {
                let Some(state) = self.bdp_easy.get(&target) else {
                    continue;
                };
                if now < state.next_send {
                    continue;
                }
                state.sent >= self.config.bdp_max_packets
            };
            if exhausted {
                self.bdp_easy.remove(&target);
                warn!(target: "peer", "bdp exhausted without a pong from {target}");
                self.events.push_back(Event::TraversalFailed { target });
                continue;
            }

            let dest_port = loop {
                let candidate = self.rng.u16(self.config.bdp_port_range.clone());
                if candidate == self.config.local_port || candidate == self.config.test_port {
                    continue;
                }
                let in_use = self
                    .bdp_easy
                    .get(&target)
                    .is_some_and(|s| s.used_ports.contains(&candidate));
                if !in_use {
                    break candidate;
                }
            };

            if let Some(state) = self.bdp_easy.get_mut(&target) {
                state.used_ports.insert(dest_port);
                state.sent += 1;
                state.next_send = now + self.config.bdp_interval.as_millis() as u64;
            }
            self.outbox.send(
                Message::Ping {
                    id: self.id,
                    nat: self.nat,
                    restart: self.restart,
                },
                address,
                dest_port,
                self.config.local_port,
            );
        }
    }

    /// The hard side of BDP: open up to 256 fresh local ports and fire a
    /// single ping from each, with no inter-packet delay (spec.md §4.F).
    fn start_bdp_hard(&mut self, target: PeerId, address: Ipv4Addr, port: u16, now: Timestamp) {
        if let Some(record) = self.peers.get_mut(&target) {
            record.connecting_since = Some(now);
        }
        self.events.push_back(Event::TraversalStarted { target });

        let mut last_port = None;
        let mut used = HashSet::new();
        for _ in 0..config::HARD_BDP_PORTS {
            let from_port = loop {
                let candidate = self.rng.u16(self.config.bdp_port_range.clone());
                if candidate != self.config.local_port
                    && candidate != self.config.test_port
                    && used.insert(candidate)
                {
                    break candidate;
                }
            };
            self.outbox.send(
                Message::Ping {
                    id: self.id,
                    nat: self.nat,
                    restart: self.restart,
                },
                address,
                port,
                from_port,
            );
            last_port = Some(from_port);
        }
        if let (Some(record), Some(from_port)) = (self.peers.get_mut(&target), last_port) {
            record.outport = Some(from_port);
        }
    }

    // -- Message handlers ------------------------------------------------------

    fn touch_peer(
        &mut self,
        id: PeerId,
        address: Ipv4Addr,
        port: u16,
        restart_ts: Timestamp,
        now: Timestamp,
    ) {
        let record = self
            .peers
            .entry(id)
            .or_insert_with(|| PeerRecord::new(id, address, port, restart_ts));
        if record.restart_ts != restart_ts {
            trace!(target: "peer", "peer {id} restarted");
            record.restart_ts = restart_ts;
        }
        record.update_address(address, port);
        record.last_recv = Some(now);
    }

    fn on_ping(
        &mut self,
        id: PeerId,
        nat: NatType,
        restart: Timestamp,
        src: (Ipv4Addr, u16),
        recv_port: u16,
        now: Timestamp,
    ) {
        self.touch_peer(id, src.0, src.1, restart, now);
        if let Some(record) = self.peers.get_mut(&id) {
            record.nat = nat;
        }
        self.outbox.send(
            Message::Pong {
                id: self.id,
                address: src.0,
                port: src.1,
                nat: self.nat,
                restart: self.restart,
                timestamp: now,
            },
            src.0,
            src.1,
            recv_port,
        );
        if self.config.is_introducer {
            self.outbox.send(
                Message::Test {
                    id: self.id,
                    address: src.0,
                    port: src.1,
                    nat: self.nat,
                },
                src.0,
                self.config.test_port,
                self.config.test_port,
            );
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn on_pong(
        &mut self,
        id: PeerId,
        address: Ipv4Addr,
        port: u16,
        nat: NatType,
        restart: Timestamp,
        timestamp: Timestamp,
        src: (Ipv4Addr, u16),
        now: Timestamp,
    ) {
        self.touch_peer(id, src.0, src.1, restart, now);
        if let Some(record) = self.peers.get_mut(&id) {
            record.nat = nat;
            record.pong = Some(PongState {
                timestamp,
                address,
                port,
            });
        }
        if self.bdp_easy.remove(&id).is_some() {
            self.events
                .push_back(Event::PeerLiveness { id, liveness: Liveness::Active });
        }

        if let Some(idx) = self.introducer_index(src.0, src.1) {
            if let Some(eval) = self.nat_eval.as_mut() {
                eval.responded[idx] = true;
                eval.seen_port[idx] = Some(port);
            }
            self.pong = Some(PongState {
                timestamp,
                address,
                port,
            });
            if self.public_address.is_none() {
                self.public_address = Some(address);
                self.public_port = Some(port);
            }
            if let Some(eval) = &self.nat_eval {
                if eval.responded[0] && eval.responded[1] {
                    self.finish_nat_evaluation();
                }
            }
        }
    }

    fn on_test(&mut self, address: Ipv4Addr, port: u16, _nat: NatType, now: Timestamp) {
        self.nat = NatType::Static;
        self.pong = Some(PongState {
            timestamp: now,
            address,
            port,
        });
        if self.public_address.is_none() {
            self.public_address = Some(address);
            self.public_port = Some(port);
        }
        if let Some(eval) = self.nat_eval.as_mut() {
            eval.test_received = true;
        }
        self.events.push_back(Event::NatDetermined(self.nat));
    }

    fn on_intro(
        &mut self,
        id: PeerId,
        target: PeerId,
        swarm: Option<SwarmId>,
        src: (Ipv4Addr, u16),
        now: Timestamp,
    ) {
        let restart = self.peers.get(&id).map(|r| r.restart_ts).unwrap_or(0);
        self.touch_peer(id, src.0, src.1, restart, now);
        let requester = self.peers.get(&id).cloned().expect("just inserted");

        if let Some(t) = self.peers.get(&target).cloned() {
            self.outbox.send(
                Message::Connect {
                    id: self.id,
                    target,
                    address: t.address,
                    port: t.port,
                    nat: t.nat,
                    swarm,
                },
                requester.address,
                requester.port,
                self.config.local_port,
            );
            self.outbox.send(
                Message::Connect {
                    id: self.id,
                    target: id,
                    address: requester.address,
                    port: requester.port,
                    nat: requester.nat,
                    swarm,
                },
                t.address,
                t.port,
                self.config.local_port,
            );
        } else {
            self.outbox.send(
                Message::IntroError {
                    id: self.id,
                    target,
                    call: "intro".to_string(),
                },
                src.0,
                src.1,
                self.config.local_port,
            );
        }
    }

    fn on_intro_error(&mut self, id: PeerId, target: PeerId, call: String) {
        warn!(target: "peer", "introError from {id} for target {target}: {call}");
        self.events.push_back(Event::IntroFailed { target });
    }

    fn on_connect(
        &mut self,
        target: PeerId,
        address: Ipv4Addr,
        port: u16,
        nat: NatType,
        swarm: Option<SwarmId>,
        now: Timestamp,
    ) {
        {
            let record = self
                .peers
                .entry(target)
                .or_insert_with(|| PeerRecord::new(target, address, port, 0));
            record.update_address(address, port);
            record.nat = nat;
        }
        if let Some(sid) = swarm {
            self.swarms
                .entry(sid)
                .or_insert_with(|| Swarm::new(now))
                .add(target, now);
        }

        let record = self.peers.get(&target).expect("just inserted");
        if record.is_connecting(now) || record.exchanged_within_keep_alive(now) {
            self.retry_ping(target, now);
            return;
        }

        if Some(address) == self.public_address {
            // Both peers sit behind the same NAT: ask the introducer to
            // relay our local endpoint so the pair can connect directly.
            let introducer = self.config.introducers[0];
            self.outbox.send(
                Message::Relay {
                    target,
                    content: Box::new(Message::Local {
                        id: self.id,
                        address: self.local_address,
                        port: self.config.local_port,
                    }),
                },
                introducer.address,
                introducer.port,
                self.config.local_port,
            );
            return;
        }

        match (self.nat, nat) {
            (NatType::Easy | NatType::Static, NatType::Easy | NatType::Static) => {
                self.retry_ping(target, now);
            }
            (NatType::Easy, NatType::Hard) => {
                self.start_bdp_easy(target, now);
            }
            (NatType::Hard, NatType::Easy | NatType::Static) => {
                self.start_bdp_hard(target, address, port, now);
            }
            (NatType::Hard, NatType::Hard) => {
                warn!(target: "peer", "cannot traverse Hard/Hard pairing with {target}");
                self.events.push_back(Event::TraversalFailed { target });
            }
            _ => {
                // Our own class (or the remote's) isn't settled yet; a
                // plain ping is the safest default and will be retried
                // once both sides know more.
                self.retry_ping(target, now);
            }
        }
    }

    fn on_local(&mut self, id: PeerId, address: Ipv4Addr, port: u16, now: Timestamp) {
        let record = self
            .peers
            .entry(id)
            .or_insert_with(|| PeerRecord::new(id, address, port, 0));
        record.update_address(address, port);
        self.retry_ping(id, now);
    }

    fn on_join(
        &mut self,
        id: PeerId,
        swarm: SwarmId,
        nat: NatType,
        peers_requested: u32,
        src: (Ipv4Addr, u16),
        now: Timestamp,
    ) {
        {
            let record = self
                .peers
                .entry(id)
                .or_insert_with(|| PeerRecord::new(id, src.0, src.1, 0));
            record.update_address(src.0, src.1);
            record.nat = nat;
        }
        let sw = self.swarms.entry(swarm).or_insert_with(|| Swarm::new(now));
        sw.add(id, now);

        if sw.len() <= 1 {
            self.outbox.send(
                Message::JoinError {
                    id: self.id,
                    swarm,
                    peers: 1,
                    call: "join".to_string(),
                },
                src.0,
                src.1,
                self.config.local_port,
            );
            return;
        }

        let mut candidates: Vec<PeerId> = sw.members.iter().copied().filter(|m| *m != id).collect();
        self.rng.shuffle(&mut candidates);
        if nat == NatType::Hard {
            let same_address = src.0;
            candidates.retain(|c| {
                self.peers
                    .get(c)
                    .is_some_and(|r| r.nat != NatType::Hard || r.address == same_address)
            });
        }
        candidates.truncate(peers_requested as usize);

        for p in candidates {
            let Some(prec) = self.peers.get(&p).cloned() else {
                continue;
            };
            self.outbox.send(
                Message::Connect {
                    id: self.id,
                    target: id,
                    address: src.0,
                    port: src.1,
                    nat,
                    swarm: Some(swarm),
                },
                prec.address,
                prec.port,
                self.config.local_port,
            );
            self.outbox.send(
                Message::Connect {
                    id: self.id,
                    target: p,
                    address: prec.address,
                    port: prec.port,
                    nat: prec.nat,
                    swarm: Some(swarm),
                },
                src.0,
                src.1,
                self.config.local_port,
            );
        }
    }

    fn on_join_error(&mut self, swarm: SwarmId, call: String) {
        warn!(target: "peer", "joinError for swarm {swarm}: {call}");
        self.events.push_back(Event::JoinFailed { swarm });
    }

    fn on_relay(&mut self, target: PeerId, content: Message, _now: Timestamp) {
        if let Some(record) = self.peers.get(&target) {
            let (address, port) = (record.address, record.port);
            self.outbox
                .send(content, address, port, self.config.local_port);
        } else {
            trace!(target: "peer", "dropping relay to unknown target {target}");
        }
    }
}
