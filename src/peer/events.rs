//! Observability events emitted alongside a [`super::Peer`]'s outbound I/O.
//!
//! Purely additive: nothing here feeds back into the state machine. A host
//! process (or a test) drains [`super::Peer::events`] the same way it drains
//! the [`super::reactor::Outbox`], modeled on `radicle-node`'s own
//! `service::events::Event`.
use super::ids::{PeerId, SwarmId};
use super::record::{Liveness, NatType};

/// Something the state machine wants to tell the world about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// NAT evaluation completed (or was redone after a network change).
    NatDetermined(NatType),
    /// The keepalive tick detected the process/device had been suspended
    /// (the elapsed time since the previous tick exceeded one period) and
    /// re-pinged every known peer and re-joined every swarm.
    Wakeup,
    /// A peer's liveness classification as of the most recent keepalive
    /// tick (spec.md §4.F step 2: "reclassify each PeerRecord").
    PeerLiveness { id: PeerId, liveness: Liveness },
    /// A hole-punching attempt toward `target` began.
    TraversalStarted { target: PeerId },
    /// A hole-punching attempt toward `target` could not succeed: BDP
    /// exhausted its packet budget, or the pairing was Hard/Hard.
    TraversalFailed { target: PeerId },
    /// `target` replied with an `introError`.
    IntroFailed { target: PeerId },
    /// A `joinError` was received for `swarm`.
    JoinFailed { swarm: SwarmId },
}
