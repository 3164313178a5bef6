//! Membership: peers heard from recently, in first-discovery order.

use crate::Millis;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerRecord {
    pub name: String,
    pub last_seen: Millis,
}

#[derive(Debug, Default)]
pub struct Membership {
    peers: Vec<PeerRecord>,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Refresh `name`'s last-seen time. Returns true if the peer was not known.
    pub fn upsert(&mut self, name: &str, now: Millis) -> bool {
        if let Some(peer) = self.peers.iter_mut().find(|p| p.name == name) {
            peer.last_seen = peer.last_seen.max(now);
            return false;
        }
        self.peers.push(PeerRecord {
            name: name.to_owned(),
            last_seen: now,
        });
        true
    }

    /// Remove peers silent for longer than `stale_after`. Returns the evicted names.
    pub fn evict_stale(&mut self, now: Millis, stale_after: Millis) -> Vec<String> {
        let mut evicted = Vec::new();
        self.peers.retain(|p| {
            let alive = now.saturating_sub(p.last_seen) <= stale_after;
            if !alive {
                evicted.push(p.name.clone());
            }
            alive
        });
        evicted
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.peers.len();
        self.peers.retain(|p| p.name != name);
        before != self.peers.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.peers.iter().any(|p| p.name == name)
    }

    pub fn peers(&self) -> &[PeerRecord] {
        &self.peers
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.peers.iter().map(|p| p.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}
