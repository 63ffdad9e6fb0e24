//! Peer configuration and protocol constants.
use localtime::LocalDuration;
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;

/// Default local port a peer binds for its main traffic.
pub const LOCAL_PORT: u16 = 3456;
/// Default port a peer binds to receive `test` probes used for static-NAT
/// detection.
pub const TEST_PORT: u16 = 3457;
/// Birthday-paradox send cadence, in milliseconds.
pub const BDP_MS: u64 = 10;
/// Maximum number of ping packets the easy side of a BDP traversal sends.
pub const BDP_MAX_PACKETS: u32 = 1000;
/// Guard window, in milliseconds, during which a new connection attempt to
/// the same target is suppressed; equal to `BDP_MS * BDP_MAX_PACKETS`.
pub const CONNECTING_MAX_TIME_MS: u64 = BDP_MS * BDP_MAX_PACKETS as u64;
/// A peer record with no traffic for this long (milliseconds) is
/// considered, in order, Inactive, Missing, then Forgotten (see
/// [`crate::peer::record::Liveness`]).
pub const KEEP_ALIVE_TIMEOUT_MS: u64 = 29_000;
/// Maximum number of fresh local ports the hard side of a BDP traversal
/// opens.
pub const HARD_BDP_PORTS: u16 = 256;
/// Minimum time between two `retryPing`s to the same peer, in
/// milliseconds.
pub const RETRY_PING_INTERVAL_MS: u64 = 1_000;

/// [`BDP_MS`] as a [`LocalDuration`].
pub fn bdp() -> LocalDuration {
    LocalDuration::from_millis(BDP_MS as u128)
}

/// [`CONNECTING_MAX_TIME_MS`] as a [`LocalDuration`].
pub fn connecting_max_time() -> LocalDuration {
    LocalDuration::from_millis(CONNECTING_MAX_TIME_MS as u128)
}

/// [`KEEP_ALIVE_TIMEOUT_MS`] as a [`LocalDuration`].
pub fn keep_alive_timeout() -> LocalDuration {
    LocalDuration::from_millis(KEEP_ALIVE_TIMEOUT_MS as u128)
}

/// [`RETRY_PING_INTERVAL_MS`] as a [`LocalDuration`].
pub fn retry_ping_interval() -> LocalDuration {
    LocalDuration::from_millis(RETRY_PING_INTERVAL_MS as u128)
}

/// An introducer this peer should contact during NAT evaluation and use
/// for `intro`/`join` requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Introducer {
    pub address: Ipv4Addr,
    pub port: u16,
}

/// Peer configuration. Parsing this from a file or CLI arguments is out of
/// scope (spec.md §1); this struct is the in-memory surface a host process
/// or test harness constructs directly, mirroring `radicle-node`'s own
/// `service::config::Config`.
#[derive(Debug, Clone)]
pub struct Config {
    /// The two introducers contacted during NAT evaluation (`iA`, `iB`).
    pub introducers: [Introducer; 2],
    /// Whether this peer itself plays the introducer role (spec.md §4.G):
    /// statically reachable, services `ping`/`intro`/`join` for all peers
    /// it knows.
    pub is_introducer: bool,
    /// Keepalive interval. `None` disables the periodic tick entirely.
    pub keep_alive: Option<LocalDuration>,
    /// Override for the local port (defaults to [`LOCAL_PORT`]).
    pub local_port: u16,
    /// Override for the test port (defaults to [`TEST_PORT`]).
    pub test_port: u16,
    /// Maximum number of pending BDP probe packets on the easy side.
    pub bdp_max_packets: u32,
    /// Cadence between successive BDP probe packets on the easy side.
    pub bdp_interval: LocalDuration,
    /// Default number of peers requested in a `join` fan-out.
    pub join_fanout: u32,
    /// Ephemeral port range BDP draws its candidate ports from, both the
    /// easy side's randomly guessed destinations and the hard side's fresh
    /// local ports (spec.md is silent on the exact range; defaults to the
    /// conventional non-privileged range). Narrowing this in a test shrinks
    /// the birthday-paradox search space without changing the algorithm,
    /// trading realism for a bounded, fast-converging test. Must contain at
    /// least [`HARD_BDP_PORTS`] values distinct from `local_port`/
    /// `test_port`, or the hard side's unique-port search never terminates.
    pub bdp_port_range: RangeInclusive<u16>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            introducers: [
                Introducer {
                    address: Ipv4Addr::new(1, 0, 0, 1),
                    port: LOCAL_PORT,
                },
                Introducer {
                    address: Ipv4Addr::new(1, 0, 0, 2),
                    port: LOCAL_PORT,
                },
            ],
            is_introducer: false,
            keep_alive: Some(keep_alive_timeout()),
            local_port: LOCAL_PORT,
            test_port: TEST_PORT,
            bdp_max_packets: BDP_MAX_PACKETS,
            bdp_interval: bdp(),
            join_fanout: 3,
            bdp_port_range: 1024..=65535,
        }
    }
}
