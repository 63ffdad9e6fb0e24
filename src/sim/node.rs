//! Components B/C: Node and Network — the addressable tree the simulator
//! routes packets through.
//!
//! Node/Network/NAT are modeled as one tagged variant rather than a class
//! hierarchy, and parent links are non-owning arena indices rather than
//! `Rc<RefCell<_>>` back-edges, per spec.md §9's own design note against
//! deep inheritance and reference cycles.
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::net::Ipv4Addr;

use crate::peer::Peer;

use super::nat::NatState;
use super::SimEvent;

/// Arena index into [`super::Simulation`]'s node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(pub usize);

/// What a node in the tree actually is.
#[derive(Debug)]
pub enum NodeKind {
    /// A leaf hosting at most one simulated peer. Tracks which local ports
    /// that peer has bound, so a double-bind fails the way a real socket
    /// bind would. `peer` is `None` between [`Node::host`] being added to
    /// the tree and [`super::Simulation::spawn_peer`] bringing a [`Peer`]
    /// up on it — a host is a place a peer *can* live, not one that always
    /// has one (an address the peer hasn't been constructed on yet, or a
    /// pure traffic source/sink in a test).
    Host {
        bound_ports: HashSet<u16>,
        peer: Option<Peer>,
    },
    /// Routes to children by address; no port translation (spec.md §4.C).
    Network { subnet: BTreeMap<Ipv4Addr, NodeId> },
    /// A [`NodeKind::Network`] plus port translation (spec.md §4.D).
    Nat(NatState),
}

/// One node in the address tree.
#[derive(Debug)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    /// This node's address as it appears in its parent's subnet. Root
    /// nodes carry whatever address they were created with; it is never
    /// consulted since they have no parent to route through.
    pub address: Ipv4Addr,
    pub sleeping: bool,
    /// Message/timer inputs that arrived while `sleeping`; drained FIFO on
    /// wake (spec.md §4.B).
    pub awaken: VecDeque<SimEvent>,
}

impl Node {
    pub fn host(address: Ipv4Addr, parent: Option<NodeId>) -> Self {
        Self {
            kind: NodeKind::Host {
                bound_ports: HashSet::new(),
                peer: None,
            },
            parent,
            address,
            sleeping: false,
            awaken: VecDeque::new(),
        }
    }

    pub fn network(address: Ipv4Addr, parent: Option<NodeId>) -> Self {
        Self {
            kind: NodeKind::Network {
                subnet: BTreeMap::new(),
            },
            parent,
            address,
            sleeping: false,
            awaken: VecDeque::new(),
        }
    }

    pub fn nat(address: Ipv4Addr, parent: Option<NodeId>, nat: NatState) -> Self {
        Self {
            kind: NodeKind::Nat(nat),
            parent,
            address,
            sleeping: false,
            awaken: VecDeque::new(),
        }
    }

    pub fn subnet(&self) -> Option<&BTreeMap<Ipv4Addr, NodeId>> {
        match &self.kind {
            NodeKind::Network { subnet } => Some(subnet),
            NodeKind::Nat(nat) => Some(&nat.subnet),
            NodeKind::Host { .. } => None,
        }
    }

    pub fn subnet_mut(&mut self) -> Option<&mut BTreeMap<Ipv4Addr, NodeId>> {
        match &mut self.kind {
            NodeKind::Network { subnet } => Some(subnet),
            NodeKind::Nat(nat) => Some(&mut nat.subnet),
            NodeKind::Host { .. } => None,
        }
    }
}
