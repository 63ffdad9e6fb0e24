//! The peer's outbound I/O queue. The state machine never touches the
//! transport directly — every effect of a state transition (a message to
//! send, a timer to arm) is pushed here and drained by whoever drives the
//! peer (the real transport's event loop, or [`crate::sim`]).
use std::collections::VecDeque;
use std::net::Ipv4Addr;

use localtime::LocalDuration;
use log::trace;

use crate::wire::Message;

/// One effect of a [`super::Peer`] state transition.
#[derive(Debug)]
pub enum Io {
    /// Send `msg` to `(address, port)`, from local port `from_port`.
    Send {
        msg: Message,
        address: Ipv4Addr,
        port: u16,
        from_port: u16,
    },
    /// Ask for a wakeup in `after`, passed back in as a timer firing.
    Wakeup(LocalDuration),
}

/// Outgoing I/O queue, populated by the state machine, drained by the
/// driver.
#[derive(Debug, Default)]
pub struct Outbox {
    io: VecDeque<Io>,
}

impl Outbox {
    pub fn send(&mut self, msg: Message, address: Ipv4Addr, port: u16, from_port: u16) {
        trace!(target: "peer", "send {msg} to {address}:{port} (from {from_port})");
        self.io.push_back(Io::Send {
            msg,
            address,
            port,
            from_port,
        });
    }

    pub fn wakeup(&mut self, after: LocalDuration) {
        self.io.push_back(Io::Wakeup(after));
    }

    pub fn is_empty(&self) -> bool {
        self.io.is_empty()
    }
}

impl Iterator for Outbox {
    type Item = Io;

    fn next(&mut self) -> Option<Self::Item> {
        self.io.pop_front()
    }
}
