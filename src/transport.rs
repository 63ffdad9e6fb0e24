//! Component E: the transport adapter.
//!
//! A [`crate::peer::Peer`] never touches a socket directly. Its every
//! effect — a message to send, a wakeup to arm — is an [`crate::peer::reactor::Io`]
//! value pushed onto its own [`crate::peer::reactor::Outbox`] (the same split
//! the teacher crate draws between its `Service` and `service::reactor::Reactor`:
//! the state machine only ever produces intent, never performs I/O). What
//! drives the peer — [`crate::sim::Simulation`] in this crate, or a real
//! UDP-socket event loop in a production binding — drains that outbox and
//! is the one thing that needs to satisfy this trait.
//!
//! `Transport` is therefore narrow by design (spec.md §4.E, §1: the concrete
//! OS socket binding is out of scope, only this contract is specified): it
//! covers the one-time setup a driver performs before control passes to the
//! peer (`bind`, `local_address`), plus the two primitives — `send`,
//! `timer` — a driver uses to realize a drained [`crate::peer::reactor::Io`].
//! The matching inbound hook, `onMessage` in spec.md's vocabulary, has no
//! method here: it is simply a driver calling [`crate::peer::Peer::receive`]
//! (or [`crate::peer::Peer::on_timer`] for a fired `timer`) directly.
use std::io;
use std::net::Ipv4Addr;

use localtime::LocalDuration;

/// The narrow socket/timer interface a [`crate::peer::Peer`] is driven
/// through. Implemented by both [`crate::sim`]'s simulated hosts (for
/// deterministic tests) and, in principle, a real UDP-socket binding — which
/// this crate does not ship (spec.md §1).
pub trait Transport {
    /// Bind a UDP port. The one fatal condition in this crate (spec.md §7)
    /// is a bind failure here for `LOCAL_PORT`/`TEST_PORT` at startup.
    fn bind(&mut self, port: u16) -> io::Result<()>;

    /// This host's address as it appears in outbound packets before any NAT
    /// translation.
    fn local_address(&self) -> Ipv4Addr;

    /// Send `bytes` to `to`, sourced from the local port `from_port` (which
    /// must already be bound).
    fn send(&mut self, bytes: &[u8], to: (Ipv4Addr, u16), from_port: u16);

    /// Arm a one-shot wakeup `after` elapses. Periodic behavior is the
    /// peer's own responsibility (it re-arms on every tick); this trait
    /// only ever schedules a single firing (spec.md §4.B: the collapsing
    /// of repeat timers on a sleeping host is the driver's responsibility,
    /// not the transport's).
    fn timer(&mut self, after: LocalDuration);
}
