//! Shared test-only plumbing: a pretty logger (opt-in, mirrors the
//! teacher's own `test::logger`) and a small [`World`] builder for the
//! literal end-to-end scenarios in `tests/scenarios.rs`.
#![allow(dead_code)]
use std::net::Ipv4Addr;

use nat_traverse::peer::{self, Config, Introducer, PeerId};
use nat_traverse::sim::{Keying, NatState, NodeId, PortAlloc, SimOptions, Simulation};
use nat_traverse::{LocalDuration, LocalTime};

/// The two public, statically reachable introducers every scenario in
/// spec.md §8 assumes: `I0@1.0.0.1:3456`, `I1@1.0.0.2:3456`, both `Static`.
pub const I0_ADDR: Ipv4Addr = Ipv4Addr::new(1, 0, 0, 1);
pub const I1_ADDR: Ipv4Addr = Ipv4Addr::new(1, 0, 0, 2);

/// If you want to see what a scenario actually did, add this line at the
/// top of the test and run with `cargo test -- --nocapture`:
///
///     common::logger::init(log::Level::Trace);
pub mod logger {
    use log::{Level, Log, Metadata, Record};

    struct Logger {
        level: Level,
    }

    impl Log for Logger {
        fn enabled(&self, metadata: &Metadata) -> bool {
            metadata.level() <= self.level
        }

        fn log(&self, record: &Record) {
            use colored::Colorize;
            if !self.enabled(record.metadata()) {
                return;
            }
            let line = format!("{:>5} {}", record.target(), record.args());
            match record.level() {
                Level::Warn => println!("{}", line.yellow()),
                Level::Error => println!("{}", line.red()),
                _ => println!("{}", line.dimmed()),
            }
        }

        fn flush(&self) {}
    }

    #[allow(dead_code)]
    pub fn init(level: Level) {
        let logger = Logger { level };
        log::set_boxed_logger(Box::new(logger)).ok();
        log::set_max_level(level.to_level_filter());
    }
}

fn introducers() -> [Introducer; 2] {
    [
        Introducer {
            address: I0_ADDR,
            port: peer::config::LOCAL_PORT,
        },
        Introducer {
            address: I1_ADDR,
            port: peer::config::LOCAL_PORT,
        },
    ]
}

/// A bare [`peer::Config`] pointed at this world's two introducers, with
/// the keepalive tick disabled (scenarios drive traversal explicitly and
/// don't need the noise of periodic re-pings) and a narrowed
/// [`Config::bdp_port_range`] so the birthday-paradox scenarios converge
/// in a bounded number of simulated milliseconds instead of depending on
/// the full 64k ephemeral range.
pub fn leaf_config() -> Config {
    Config {
        introducers: introducers(),
        is_introducer: false,
        keep_alive: None,
        bdp_port_range: 20_000..=20_400,
        ..Config::default()
    }
}

/// A world with the two introducers already spawned on the public
/// network. Build topology on top of it with [`World::easy_nat`]/
/// [`World::hard_nat`]/[`World::host`], bring a peer up on a leaf with
/// [`World::spawn`], and drive time forward with [`World::run_ms`].
pub struct World {
    pub sim: Simulation,
    pub public: NodeId,
    rng: fastrand::Rng,
}

impl World {
    pub fn new(seed: u64) -> Self {
        let mut seed_rng = fastrand::Rng::with_seed(seed);
        let start = LocalTime::default();
        let mut sim = Simulation::new(start, fastrand::Rng::with_seed(seed_rng.u64(..)), SimOptions::default());
        let public = sim.add_network(Ipv4Addr::UNSPECIFIED, None);

        let i0 = sim.add_host(I0_ADDR, public);
        let i1 = sim.add_host(I1_ADDR, public);
        for node in [i0, i1] {
            let id = PeerId::generate(&mut seed_rng);
            let config = Config {
                is_introducer: true,
                keep_alive: None,
                ..Config::default()
            };
            sim.spawn_peer(node, id, config, start)
                .expect("introducer bind cannot fail");
        }

        Self {
            sim,
            public,
            rng: seed_rng,
        }
    }

    /// Add an endpoint-independent (Easy) NAT directly off the public
    /// network, with its own public address.
    pub fn easy_nat(&mut self, public_addr: Ipv4Addr) -> NodeId {
        let parent = self.public;
        self.sim.add_nat(
            public_addr,
            parent,
            NatState::new(Keying::Independent, PortAlloc::Random, LocalDuration::from_mins(5), false),
        )
    }

    /// Add an address-and-port-dependent (Hard) NAT directly off the
    /// public network.
    pub fn hard_nat(&mut self, public_addr: Ipv4Addr) -> NodeId {
        let parent = self.public;
        self.sim.add_nat(
            public_addr,
            parent,
            NatState::new(Keying::Dependent, PortAlloc::Random, LocalDuration::from_mins(5), false),
        )
    }

    /// Add a leaf host under `parent` (a NAT or the public network itself,
    /// for a `Static` peer).
    pub fn host(&mut self, parent: NodeId, address: Ipv4Addr) -> NodeId {
        self.sim.add_host(address, parent)
    }

    /// Bring a peer up on `node` with a fresh random id, returning that id.
    pub fn spawn(&mut self, node: NodeId, config: Config) -> PeerId {
        let id = PeerId::generate(&mut self.rng);
        let now = self.sim.now();
        self.sim
            .spawn_peer(node, id, config, now)
            .expect("bind cannot fail against the simulator");
        id
    }

    /// Advance the simulation `ms` milliseconds from its current time.
    pub fn run_ms(&mut self, ms: u64) {
        let upto = self.sim.now() + LocalDuration::from_millis(ms as u128);
        self.sim.run_until(upto);
    }
}
