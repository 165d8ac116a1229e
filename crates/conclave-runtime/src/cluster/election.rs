use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::IteratorRandom;

use conclave_core::cluster::{ClusterKeys, NodeId};
use conclave_core::store::CoordinationStore;
use conclave_core::Result;

#[derive(Debug, Default)]
struct ElectionState {
    initiator: Option<NodeId>,
    voters: BTreeSet<NodeId>,
    votes: BTreeMap<NodeId, u32>,
}

/// Voting protocol of one node.
///
/// A round starts when some node wins the election lock and pushes itself
/// as initiator. Every node that sees the round registers as a voter and
/// casts one vote; the initiator tallies and writes the leader. This is a
/// best-effort election, not consensus.
pub struct Election {
    store: Arc<dyn CoordinationStore>,
    keys: ClusterKeys,
    node_id: NodeId,
    lock_ttl: Duration,
    state: Mutex<ElectionState>,
    pushed: AtomicBool,
    locked: AtomicBool,
}

impl Election {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        keys: ClusterKeys,
        node_id: NodeId,
        lock_ttl: Duration,
    ) -> Self {
        Self {
            store,
            keys,
            node_id,
            lock_ttl,
            state: Mutex::new(ElectionState::default()),
            pushed: AtomicBool::new(false),
            locked: AtomicBool::new(false),
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Record the round initiator.
    ///
    /// Returns true when a new round starts, after registering this node as
    /// a voter. `None` ends the local view of the round.
    pub async fn set_initiator(&self, initiator: Option<NodeId>) -> Result<bool> {
        let initiator = initiator.filter(|id| !id.is_empty());

        {
            let mut state = self.state.lock();
            if state.initiator == initiator {
                return Ok(false);
            }
            state.initiator = initiator.clone();
            if initiator.is_none() {
                state.voters.clear();
                state.votes.clear();
                self.pushed.store(false, Ordering::SeqCst);
                return Ok(false);
            }
        }

        self.store
            .put(&self.keys.voter(&self.node_id), self.node_id.as_str())
            .await?;

        tracing::info!(
            node_id = %self.node_id,
            initiator = ?initiator.as_ref().map(NodeId::as_str),
            "Election round started"
        );
        Ok(true)
    }

    pub fn initiator(&self) -> Option<NodeId> {
        self.state.lock().initiator.clone()
    }

    pub fn is_initiator(&self) -> bool {
        self.state.lock().initiator.as_ref() == Some(&self.node_id)
    }

    /// Cast this node's vote for a random registered voter.
    pub async fn vote(&self) -> Result<Option<NodeId>> {
        // Voters include this node, so a node may vote for itself.
        let choice = {
            let state = self.state.lock();
            state.voters.iter().choose(&mut rand::rng()).cloned()
        };

        let Some(choice) = choice else {
            tracing::warn!(node_id = %self.node_id, "No voters registered, skipping vote");
            return Ok(None);
        };

        self.store
            .put(&self.keys.vote(&self.node_id), choice.as_str())
            .await?;
        tracing::debug!(node_id = %self.node_id, candidate = %choice, "Vote cast");
        Ok(Some(choice))
    }

    /// Count one vote for a candidate.
    pub fn add_vote(&self, candidate: NodeId) {
        *self.state.lock().votes.entry(candidate).or_insert(0) += 1;
    }

    pub fn clear_votes(&self) {
        self.state.lock().votes.clear();
    }

    /// Current tally of a candidate.
    pub fn votes_for(&self, candidate: &NodeId) -> u32 {
        self.state.lock().votes.get(candidate).copied().unwrap_or(0)
    }

    pub fn add_voter(&self, id: NodeId) {
        self.state.lock().voters.insert(id);
    }

    pub fn has_voter(&self, id: &NodeId) -> bool {
        self.state.lock().voters.contains(id)
    }

    pub fn clear_voters(&self) {
        self.state.lock().voters.clear();
    }

    /// Candidate with the strictly greatest tally.
    ///
    /// Candidates are visited in id order, so a tie goes to the smallest id.
    pub fn calc(&self) -> Option<(NodeId, u32)> {
        let state = self.state.lock();
        let mut best: Option<(&NodeId, u32)> = None;

        for (candidate, &count) in &state.votes {
            if best.map_or(true, |(_, top)| count > top) {
                best = Some((candidate, count));
            }
        }

        best.map(|(id, count)| (id.clone(), count))
    }

    /// Publish the round result.
    pub async fn new_leader(&self, leader: &NodeId) -> Result<()> {
        self.store.put(&self.keys.leader(), leader.as_str()).await?;
        tracing::info!(leader = %leader, "New leader elected");
        Ok(())
    }

    /// Remove the round's keys and reset the tally. Safe to repeat.
    ///
    /// The initiator is kept until the watch reports the ELECTION key gone,
    /// so a late snapshot of this round does not announce it again.
    pub async fn clear(&self) -> Result<()> {
        self.store
            .delete(&format!("{}/", self.keys.votes()), true)
            .await?;
        self.store
            .delete(&format!("{}/", self.keys.voters()), true)
            .await?;
        self.store.delete(&self.keys.election(), false).await?;

        self.pushed.store(false, Ordering::SeqCst);
        let mut state = self.state.lock();
        state.voters.clear();
        state.votes.clear();
        Ok(())
    }

    /// Nominate this node as initiator, once per round.
    pub async fn push(&self) -> Result<bool> {
        if self.pushed.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }

        if let Err(e) = self
            .store
            .put(&self.keys.election(), self.node_id.as_str())
            .await
        {
            self.pushed.store(false, Ordering::SeqCst);
            return Err(e);
        }

        tracing::info!(node_id = %self.node_id, "Nominated as election initiator");
        Ok(true)
    }

    /// Take the cluster-wide election lock.
    pub async fn try_lock(&self) -> Result<bool> {
        let acquired = self
            .store
            .lock(&self.keys.election_lock(), self.lock_ttl)
            .await?;
        if acquired {
            self.locked.store(true, Ordering::SeqCst);
        }
        Ok(acquired)
    }

    /// Release the election lock if this node holds it.
    pub async fn end(&self) -> Result<()> {
        if !self.locked.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.store.unlock(&self.keys.election_lock()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn election(store: &MemoryStore, id: &str) -> Election {
        Election::new(
            Arc::new(store.clone()),
            ClusterKeys::new("c"),
            NodeId::from(id),
            Duration::from_secs(30),
        )
    }

    fn tally(election: &Election, votes: &[(&str, u32)]) {
        for (candidate, count) in votes {
            for _ in 0..*count {
                election.add_vote(NodeId::from(*candidate));
            }
        }
    }

    #[test]
    fn test_calc_picks_strict_maximum() {
        let store = MemoryStore::new();
        let election = election(&store, "a");

        tally(&election, &[("A", 3), ("B", 3), ("C", 5)]);
        assert_eq!(election.calc(), Some((NodeId::from("C"), 5)));
    }

    #[test]
    fn test_calc_tie_goes_to_first_key() {
        let store = MemoryStore::new();
        let election = election(&store, "a");

        tally(&election, &[("B", 5), ("A", 5)]);
        assert_eq!(election.calc(), Some((NodeId::from("A"), 5)));
    }

    #[test]
    fn test_calc_without_votes() {
        let store = MemoryStore::new();
        assert!(election(&store, "a").calc().is_none());
    }

    #[test]
    fn test_vote_accounting_resets() {
        let store = MemoryStore::new();
        let election = election(&store, "a");
        let x = NodeId::from("x");

        election.add_vote(x.clone());
        election.add_vote(x.clone());
        election.add_vote(x.clone());
        assert_eq!(election.votes_for(&x), 3);

        election.clear_votes();
        election.add_vote(x.clone());
        assert_eq!(election.votes_for(&x), 1);
        assert_eq!(election.calc(), Some((x, 1)));
    }

    #[tokio::test]
    async fn test_set_initiator_registers_voter_once() {
        let store = MemoryStore::new();
        let election = election(&store, "a");
        let keys = ClusterKeys::new("c");

        assert!(election.set_initiator(Some(NodeId::from("b"))).await.unwrap());
        assert!(!election.set_initiator(Some(NodeId::from("b"))).await.unwrap());
        assert!(!election.is_initiator());
        assert_eq!(
            store.get(&keys.voter(&NodeId::from("a"))).await.unwrap().as_deref(),
            Some("a")
        );

        assert!(!election.set_initiator(None).await.unwrap());
        assert!(election.initiator().is_none());
    }

    #[tokio::test]
    async fn test_vote_picks_a_registered_voter() {
        let store = MemoryStore::new();
        let election = election(&store, "a");

        assert!(election.vote().await.unwrap().is_none());

        election.add_voter(NodeId::from("a"));
        election.add_voter(NodeId::from("b"));
        let choice = election.vote().await.unwrap().unwrap();

        assert!(election.has_voter(&choice));
        let stored = store.get("c/VOTES/a").await.unwrap();
        assert_eq!(stored.as_deref(), Some(choice.as_str()));
    }

    #[tokio::test]
    async fn test_push_once_per_round() {
        let store = MemoryStore::new();
        let election = election(&store, "a");

        assert!(election.push().await.unwrap());
        assert!(!election.push().await.unwrap());
        assert_eq!(store.get("c/ELECTION").await.unwrap().as_deref(), Some("a"));

        election.clear().await.unwrap();
        assert!(store.get("c/ELECTION").await.unwrap().is_none());
        assert!(election.push().await.unwrap());
    }

    #[tokio::test]
    async fn test_clear_removes_round_keys() {
        let store = MemoryStore::new();
        let election = election(&store, "a");
        store.put("c/VOTERS/a", "a").await.unwrap();
        store.put("c/VOTES/a", "b").await.unwrap();
        store.put("c/ELECTION", "a").await.unwrap();
        store.put("c/LEADER", "b").await.unwrap();
        election.add_voter(NodeId::from("a"));

        election.clear().await.unwrap();
        election.clear().await.unwrap();

        let left = store.dump("c/");
        assert_eq!(left.len(), 1);
        assert!(left.contains_key("c/LEADER"));
        assert!(!election.has_voter(&NodeId::from("a")));
    }

    #[tokio::test]
    async fn test_lock_is_exclusive_until_end() {
        let store = MemoryStore::new();
        let a = election(&store, "a");
        let b = election(&store, "b");

        assert!(a.try_lock().await.unwrap());
        assert!(!b.try_lock().await.unwrap());

        // Only the holder releases.
        b.end().await.unwrap();
        assert!(!b.try_lock().await.unwrap());

        a.end().await.unwrap();
        assert!(b.try_lock().await.unwrap());
    }
}
