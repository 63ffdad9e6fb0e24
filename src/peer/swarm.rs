//! Component H: swarm membership. A swarm id maps to a set of member
//! peers plus the last-heard timestamp; `join` fan-out introductions live
//! here.
use std::collections::{BTreeMap, BTreeSet};

use super::ids::PeerId;
use super::record::{Liveness, PeerRecord, Timestamp};

/// A named set of peers that want to be mutually connected.
#[derive(Debug, Clone, Default)]
pub struct Swarm {
    pub members: BTreeSet<PeerId>,
    pub last_heard: Timestamp,
}

impl Swarm {
    pub fn new(now: Timestamp) -> Self {
        Self {
            members: BTreeSet::new(),
            last_heard: now,
        }
    }

    pub fn add(&mut self, id: PeerId, now: Timestamp) {
        self.members.insert(id);
        self.last_heard = now;
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// This swarm's members paired with their current [`Liveness`], read
    /// out of `peers` without mutating or evicting anything — the keepalive
    /// tick reclassifies on every pass but never drops a member on its own
    /// (spec.md §4.H leaves membership changes to explicit protocol events).
    /// A member we hold no record for at all (heard of only via another
    /// peer's `join` fan-out, never directly) counts as [`Liveness::Forgotten`].
    pub fn members_by_liveness<'a>(
        &'a self,
        peers: &'a BTreeMap<PeerId, PeerRecord>,
        now: Timestamp,
    ) -> impl Iterator<Item = (PeerId, Liveness)> + 'a {
        self.members.iter().map(move |id| {
            let liveness = peers
                .get(id)
                .map(|record| record.liveness(now))
                .unwrap_or(Liveness::Forgotten);
            (*id, liveness)
        })
    }
}
