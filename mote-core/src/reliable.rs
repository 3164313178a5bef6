//! Reliable delivery bookkeeping: outstanding acknowledgements and duplicate suppression.
//!
//! The retry and giveup timers live in the owner's scheduler; this module keeps the
//! tables those timers act on.

use std::collections::{BTreeSet, HashMap};

use crate::scheduler::TaskId;
use crate::Millis;

/// Envelope id, unique per sender.
pub type EnvelopeId = u32;

/// Per-sender envelope id source. Starts at a random point so a rebooted device
/// does not collide with its own entries in peers' dedup caches.
#[derive(Debug)]
pub struct IdCounter(EnvelopeId);

impl IdCounter {
    pub fn new(start: EnvelopeId) -> Self {
        Self(start)
    }

    pub fn random() -> Self {
        Self(rand::random())
    }

    pub fn next_id(&mut self) -> EnvelopeId {
        let id = self.0;
        self.0 = self.0.wrapping_add(1);
        id
    }
}

/// A sent envelope some peers have not acknowledged yet.
#[derive(Debug)]
pub struct Outstanding {
    /// Serialized envelope, re-sent as-is on every retry.
    pub payload: Vec<u8>,
    /// Peers still owing an acknowledgement.
    pub pending: BTreeSet<String>,
    pub retry: TaskId,
    pub giveup: TaskId,
}

/// Result of recording an acknowledgement.
#[derive(Debug)]
pub enum AckOutcome {
    /// No such (id, peer) pair: timed out, already acknowledged, or never sent.
    Unknown,
    /// Peer removed; others still pending.
    Recorded,
    /// Last pending peer acknowledged. The caller cancels the timers.
    Completed(Outstanding),
}

/// Outstanding acknowledgements keyed by envelope id.
#[derive(Debug, Default)]
pub struct AckTable {
    outstanding: HashMap<EnvelopeId, Outstanding>,
}

impl AckTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `id`. Peers are deduplicated; an empty peer set is not tracked.
    pub fn track(
        &mut self,
        id: EnvelopeId,
        payload: Vec<u8>,
        peers: impl IntoIterator<Item = String>,
        retry: TaskId,
        giveup: TaskId,
    ) {
        let pending: BTreeSet<String> = peers.into_iter().collect();
        if pending.is_empty() {
            return;
        }
        self.outstanding.insert(
            id,
            Outstanding {
                payload,
                pending,
                retry,
                giveup,
            },
        );
    }

    pub fn acknowledge(&mut self, id: EnvelopeId, peer: &str) -> AckOutcome {
        let Some(entry) = self.outstanding.get_mut(&id) else {
            return AckOutcome::Unknown;
        };
        if !entry.pending.remove(peer) {
            return AckOutcome::Unknown;
        }
        if !entry.pending.is_empty() {
            return AckOutcome::Recorded;
        }
        match self.outstanding.remove(&id) {
            Some(done) => AckOutcome::Completed(done),
            None => AckOutcome::Unknown,
        }
    }

    /// Payload to re-send for `id`, if any peer is still pending.
    pub fn retransmission(&self, id: EnvelopeId) -> Option<&[u8]> {
        self.outstanding
            .get(&id)
            .filter(|o| !o.pending.is_empty())
            .map(|o| o.payload.as_slice())
    }

    /// Abandon `id` unconditionally.
    pub fn give_up(&mut self, id: EnvelopeId) -> Option<Outstanding> {
        self.outstanding.remove(&id)
    }

    /// Drop an evicted peer everywhere. Returns records that no longer wait on anyone.
    pub fn forget_peer(&mut self, peer: &str) -> Vec<Outstanding> {
        let mut emptied = Vec::new();
        for (id, entry) in self.outstanding.iter_mut() {
            if entry.pending.remove(peer) && entry.pending.is_empty() {
                emptied.push(*id);
            }
        }
        emptied
            .into_iter()
            .filter_map(|id| self.outstanding.remove(&id))
            .collect()
    }

    /// Abandon everything outstanding.
    pub fn clear(&mut self) -> Vec<Outstanding> {
        self.outstanding.drain().map(|(_, o)| o).collect()
    }

    pub fn pending_peers(&self, id: EnvelopeId) -> Vec<&str> {
        self.outstanding
            .get(&id)
            .map(|o| o.pending.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.outstanding.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Envelopes already handed to the application, keyed by (sender, id), each with an expiry.
#[derive(Debug)]
pub struct DedupCache {
    seen: HashMap<(String, EnvelopeId), Millis>,
    window: Millis,
}

impl DedupCache {
    pub fn new(window: Millis) -> Self {
        Self {
            seen: HashMap::new(),
            window,
        }
    }

    /// True the first time (sender, id) is seen within the window; records it.
    pub fn first_delivery(&mut self, sender: &str, id: EnvelopeId, now: Millis) -> bool {
        let expires_at = now.saturating_add(self.window);
        match self.seen.get_mut(&(sender.to_owned(), id)) {
            Some(existing) if *existing > now => false,
            Some(existing) => {
                *existing = expires_at;
                true
            }
            None => {
                self.seen.insert((sender.to_owned(), id), expires_at);
                true
            }
        }
    }

    pub fn purge_expired(&mut self, now: Millis) -> usize {
        let before = self.seen.len();
        self.seen.retain(|_, expires_at| *expires_at > now);
        before - self.seen.len()
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;

    fn tasks() -> (TaskId, TaskId) {
        let mut s: Scheduler<()> = Scheduler::new();
        (s.schedule((), 300, true, 0), s.schedule((), 3000, false, 0))
    }

    fn peers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn completes_after_every_peer_acks() {
        let (retry, giveup) = tasks();
        let mut table = AckTable::new();
        table.track(1, b"env".to_vec(), peers(&["a", "b"]), retry, giveup);
        assert_eq!(table.retransmission(1), Some(&b"env"[..]));
        assert!(matches!(table.acknowledge(1, "a"), AckOutcome::Recorded));
        assert_eq!(table.pending_peers(1), vec!["b"]);
        match table.acknowledge(1, "b") {
            AckOutcome::Completed(done) => {
                assert_eq!(done.retry, retry);
                assert_eq!(done.giveup, giveup);
            }
            other => panic!("expected Completed, got {other:?}"),
        }
        assert!(table.is_empty());
        assert_eq!(table.retransmission(1), None);
    }

    #[test]
    fn unknown_acks_are_noops() {
        let (retry, giveup) = tasks();
        let mut table = AckTable::new();
        assert!(matches!(table.acknowledge(9, "a"), AckOutcome::Unknown));
        table.track(1, vec![], peers(&["a", "b"]), retry, giveup);
        assert!(matches!(table.acknowledge(1, "zed"), AckOutcome::Unknown));
        assert!(matches!(table.acknowledge(1, "a"), AckOutcome::Recorded));
        assert!(matches!(table.acknowledge(1, "a"), AckOutcome::Unknown));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn give_up_removes_record() {
        let (retry, giveup) = tasks();
        let mut table = AckTable::new();
        table.track(3, vec![1], peers(&["a"]), retry, giveup);
        assert!(table.give_up(3).is_some());
        assert!(table.give_up(3).is_none());
        assert!(matches!(table.acknowledge(3, "a"), AckOutcome::Unknown));
    }

    #[test]
    fn empty_peer_set_not_tracked() {
        let (retry, giveup) = tasks();
        let mut table = AckTable::new();
        table.track(1, vec![], Vec::new(), retry, giveup);
        assert!(table.is_empty());
    }

    #[test]
    fn forgetting_peer_completes_records() {
        let (retry, giveup) = tasks();
        let mut table = AckTable::new();
        table.track(1, vec![], peers(&["a"]), retry, giveup);
        table.track(2, vec![], peers(&["a", "b"]), retry, giveup);
        let emptied = table.forget_peer("a");
        assert_eq!(emptied.len(), 1);
        assert_eq!(table.len(), 1);
        assert_eq!(table.pending_peers(2), vec!["b"]);
    }

    #[test]
    fn dedup_within_window_only() {
        let mut cache = DedupCache::new(8000);
        assert!(cache.first_delivery("a", 1, 0));
        assert!(!cache.first_delivery("a", 1, 100));
        assert!(cache.first_delivery("b", 1, 100));
        assert!(cache.first_delivery("a", 2, 100));
        assert_eq!(cache.purge_expired(7999), 0);
        assert_eq!(cache.purge_expired(8000), 1);
        assert!(cache.first_delivery("a", 1, 8000));
    }

    #[test]
    fn id_counter_wraps() {
        let mut ids = IdCounter::new(u32::MAX);
        assert_eq!(ids.next_id(), u32::MAX);
        assert_eq!(ids.next_id(), 0);
    }
}
