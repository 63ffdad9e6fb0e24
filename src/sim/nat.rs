//! Component D: a [`super::node::Network`] plus port translation.
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use localtime::{LocalDuration, LocalTime};

use super::node::NodeId;

/// An endpoint as seen on one side of a NAT mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Endpoint {
    pub address: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(address: Ipv4Addr, port: u16) -> Self {
        Self { address, port }
    }
}

/// The mapping key policy a NAT uses (spec.md §4.D `keyOf`): endpoint
/// independent for an Easy NAT, destination-dependent for a Hard one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MappingKey {
    Independent { src: Endpoint },
    Dependent { src: Endpoint, dst: Endpoint },
}

/// Whether this NAT's mapping depends on the destination endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keying {
    /// Easy NAT: one external port per (internal address, internal port).
    Independent,
    /// Hard NAT: a fresh external port per destination.
    Dependent,
}

/// How a NAT picks the external port for a fresh mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortAlloc {
    /// Uniform-random over the ephemeral range, retrying on collision.
    Random,
    /// Smallest unused port, starting from 1024.
    Sequential,
}

#[derive(Debug, Clone, Copy)]
struct Mapping {
    key: MappingKey,
    source: Endpoint,
    expires: LocalTime,
}

/// Component D: port translation state for one NAT device. `map`/`unmap`
/// are kept as strict inverses for any unexpired entry (spec.md §3
/// invariant).
#[derive(Debug)]
pub struct NatState {
    /// Children addressed behind this NAT.
    pub subnet: BTreeMap<Ipv4Addr, NodeId>,
    pub keying: Keying,
    pub alloc: PortAlloc,
    pub ttl: LocalDuration,
    pub hairpinning: bool,
    map: BTreeMap<MappingKey, u16>,
    by_port: BTreeMap<u16, Mapping>,
    next_sequential: u16,
}

impl NatState {
    pub fn new(keying: Keying, alloc: PortAlloc, ttl: LocalDuration, hairpinning: bool) -> Self {
        Self {
            subnet: BTreeMap::new(),
            keying,
            alloc,
            ttl,
            hairpinning,
            map: BTreeMap::new(),
            by_port: BTreeMap::new(),
            next_sequential: 1024,
        }
    }

    fn key_of(&self, src: Endpoint, dst: Endpoint) -> MappingKey {
        match self.keying {
            Keying::Independent => MappingKey::Independent { src },
            Keying::Dependent => MappingKey::Dependent { src, dst },
        }
    }

    fn allocate_port(&mut self, rng: &mut fastrand::Rng) -> u16 {
        match self.alloc {
            PortAlloc::Sequential => loop {
                let candidate = self.next_sequential;
                self.next_sequential = if candidate == u16::MAX {
                    1024
                } else {
                    candidate + 1
                };
                if !self.by_port.contains_key(&candidate) {
                    return candidate;
                }
            },
            PortAlloc::Random => loop {
                let candidate = rng.u16(1024..=65535);
                if !self.by_port.contains_key(&candidate) {
                    return candidate;
                }
            },
        }
    }

    /// Find or create the external port for an outbound flow `src -> dst`,
    /// refreshing the entry's TTL on reuse (spec.md §4.D "Outbound").
    pub fn allocate_or_reuse(
        &mut self,
        src: Endpoint,
        dst: Endpoint,
        now: LocalTime,
        rng: &mut fastrand::Rng,
    ) -> u16 {
        let key = self.key_of(src, dst);

        if let Some(&port) = self.map.get(&key) {
            let live = self
                .by_port
                .get(&port)
                .is_some_and(|m| now < m.expires);
            if live {
                let expires = now + self.ttl;
                if let Some(m) = self.by_port.get_mut(&port) {
                    m.expires = expires;
                }
                return port;
            }
            self.map.remove(&key);
            self.by_port.remove(&port);
        }

        let port = self.allocate_port(rng);
        let expires = now + self.ttl;
        self.map.insert(key, port);
        self.by_port.insert(
            port,
            Mapping {
                key,
                source: src,
                expires,
            },
        );
        port
    }

    /// Reverse an inbound packet arriving on external port `port`,
    /// refreshing the entry's TTL. `None` if there is no live mapping
    /// (spec.md §4.D "Inbound": dropped silently on a miss).
    pub fn reverse(&mut self, port: u16, now: LocalTime) -> Option<Endpoint> {
        let mapping = self.by_port.get(&port).copied()?;
        if now >= mapping.expires {
            self.by_port.remove(&port);
            self.map.remove(&mapping.key);
            return None;
        }
        let expires = now + self.ttl;
        if let Some(m) = self.by_port.get_mut(&port) {
            m.expires = expires;
        }
        Some(mapping.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ep(a: u8, b: u8, c: u8, d: u8, port: u16) -> Endpoint {
        Endpoint::new(Ipv4Addr::new(a, b, c, d), port)
    }

    #[test]
    fn map_and_unmap_are_inverses() {
        let mut nat = NatState::new(Keying::Independent, PortAlloc::Sequential, LocalDuration::from_mins(1), false);
        let mut rng = fastrand::Rng::with_seed(1);
        let now = LocalTime::default();
        let src = ep(10, 0, 0, 1, 4000);
        let dst = ep(9, 9, 9, 9, 80);

        let port = nat.allocate_or_reuse(src, dst, now, &mut rng);
        assert_eq!(nat.reverse(port, now), Some(src));
    }

    #[test]
    fn easy_keying_reuses_across_destinations() {
        let mut nat = NatState::new(Keying::Independent, PortAlloc::Sequential, LocalDuration::from_mins(1), false);
        let mut rng = fastrand::Rng::with_seed(1);
        let now = LocalTime::default();
        let src = ep(10, 0, 0, 1, 4000);

        let a = nat.allocate_or_reuse(src, ep(1, 1, 1, 1, 80), now, &mut rng);
        let b = nat.allocate_or_reuse(src, ep(2, 2, 2, 2, 80), now, &mut rng);
        assert_eq!(a, b);
    }

    #[test]
    fn hard_keying_issues_distinct_ports_per_destination() {
        let mut nat = NatState::new(Keying::Dependent, PortAlloc::Sequential, LocalDuration::from_mins(1), false);
        let mut rng = fastrand::Rng::with_seed(1);
        let now = LocalTime::default();
        let src = ep(10, 0, 0, 1, 4000);

        let a = nat.allocate_or_reuse(src, ep(1, 1, 1, 1, 80), now, &mut rng);
        let b = nat.allocate_or_reuse(src, ep(2, 2, 2, 2, 80), now, &mut rng);
        assert_ne!(a, b);
    }
}
