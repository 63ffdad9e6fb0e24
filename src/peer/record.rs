//! Per-peer state: [`NatType`], [`PongState`], [`PeerRecord`], and the
//! [`Liveness`] classification derived from it.
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use super::config;
use super::ids::PeerId;

/// Milliseconds elapsed since this peer's simulation/process genesis. Not
/// wall-clock epoch time — keeps the whole stack deterministic and
/// replayable under the simulator.
pub type Timestamp = u64;

/// A peer or NAT device's reachability class.
///
/// `Unknown` is a peer's own self-assessment before NAT evaluation
/// completes; it is never used to configure a simulated NAT device (those
/// are always definitively `Easy` or `Hard`-keyed, or `Static` meaning "no
/// NAT at all").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NatType {
    /// Not yet determined.
    Unknown,
    /// Publicly reachable; no translation.
    Static,
    /// Endpoint-independent mapping: one external port per
    /// (internal address, internal port), regardless of destination.
    Easy,
    /// Address-and-port-dependent mapping: a fresh external port per
    /// destination.
    Hard,
}

impl NatType {
    pub fn is_known(&self) -> bool {
        !matches!(self, NatType::Unknown)
    }
}

/// The most recently observed self-view, learned from any `pong`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PongState {
    pub timestamp: Timestamp,
    pub address: Ipv4Addr,
    pub port: u16,
}

/// Liveness classification of a [`PeerRecord`], derived purely from
/// `now - last_recv` against the keepalive timeout (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// `delta < 1.5 * KEEP_ALIVE_TIMEOUT`
    Active,
    /// `1.5 * T <= delta < 3 * T`
    Inactive,
    /// `3 * T <= delta < 5 * T`
    Missing,
    /// `delta >= 5 * T`
    Forgotten,
}

impl Liveness {
    /// Classify a peer given the elapsed time (ms) since it was last heard
    /// from, and the configured keepalive timeout (ms).
    pub fn classify(delta_ms: u64, keep_alive_timeout_ms: u64) -> Liveness {
        let t = keep_alive_timeout_ms;
        if delta_ms < t.saturating_mul(3) / 2 {
            Liveness::Active
        } else if delta_ms < t.saturating_mul(3) {
            Liveness::Inactive
        } else if delta_ms < t.saturating_mul(5) {
            Liveness::Missing
        } else {
            Liveness::Forgotten
        }
    }
}

/// What we know about one remote peer.
#[derive(Debug, Clone)]
pub struct PeerRecord {
    pub id: PeerId,
    pub address: Ipv4Addr,
    pub port: u16,
    pub nat: NatType,
    /// Local port used for birthday-paradox binding toward this peer; may
    /// differ from our main local port. `None` until a BDP attempt opens
    /// one.
    pub outport: Option<u16>,
    /// Timestamp this peer last reported as its process/device restart
    /// time — lets us detect a remote restart (a changed value implies
    /// the remote's in-memory state, including its view of us, was lost).
    pub restart_ts: Timestamp,
    pub last_sent: Option<Timestamp>,
    pub last_recv: Option<Timestamp>,
    pub pong: Option<PongState>,
    /// Set while a connection attempt toward this peer is underway; records
    /// when it started, so [`config::connecting_max_time`] can be enforced.
    pub connecting_since: Option<Timestamp>,
}

impl PeerRecord {
    pub fn new(id: PeerId, address: Ipv4Addr, port: u16, restart_ts: Timestamp) -> Self {
        Self {
            id,
            address,
            port,
            nat: NatType::Unknown,
            outport: None,
            restart_ts,
            last_sent: None,
            last_recv: None,
            pong: None,
            connecting_since: None,
        }
    }

    /// Liveness classification as of `now`. A record we have never actually
    /// heard from (e.g. just created from a `connect`/`join`, before any
    /// reply arrived) classifies as [`Liveness::Forgotten`] rather than
    /// [`Liveness::Active`] — "no data yet" is not the same claim as
    /// "heard from moments ago", and `on_connect`'s "already talking to
    /// this peer" guard (spec.md §4.F) depends on this distinction to avoid
    /// treating a brand new peer as already reachable before a single
    /// packet has been exchanged.
    pub fn liveness(&self, now: Timestamp) -> Liveness {
        let delta = self
            .last_recv
            .map(|t| now.saturating_sub(t))
            .unwrap_or(u64::MAX);
        Liveness::classify(delta, config::KEEP_ALIVE_TIMEOUT_MS)
    }

    /// Whether a connection attempt to this peer is still within the
    /// `CONNECTING_MAX_TIME` guard window.
    pub fn is_connecting(&self, now: Timestamp) -> bool {
        self.connecting_since
            .is_some_and(|since| now.saturating_sub(since) < config::CONNECTING_MAX_TIME_MS)
    }

    /// Whether we exchanged any message with this peer within
    /// `KEEP_ALIVE_TIMEOUT`.
    pub fn recently_active(&self, now: Timestamp) -> bool {
        matches!(self.liveness(now), Liveness::Active)
    }

    /// Whether a message was sent to or received from this peer within
    /// `KEEP_ALIVE_TIMEOUT` (spec.md §4.F "Receiving MsgConnect": "...or a
    /// message was exchanged with T within KEEP_ALIVE_TIMEOUT"). Distinct
    /// from [`PeerRecord::recently_active`], which reports
    /// [`Liveness::Active`] — a 1.5x wider window — and is used for the
    /// unrelated "has BDP already succeeded" check.
    pub fn exchanged_within_keep_alive(&self, now: Timestamp) -> bool {
        let within = |t: Option<Timestamp>| {
            t.is_some_and(|t| now.saturating_sub(t) < config::KEEP_ALIVE_TIMEOUT_MS)
        };
        within(self.last_recv) || within(self.last_sent)
    }

    /// Update the record from a received `pong`/`connect`-style identity,
    /// clearing its cached `pong` if the address changed underneath it
    /// (spec.md §4.F, "Receiving MsgConnect").
    pub fn update_address(&mut self, address: Ipv4Addr, port: u16) {
        if self.address != address || self.port != port {
            self.pong = None;
        }
        self.address = address;
        self.port = port;
    }
}
