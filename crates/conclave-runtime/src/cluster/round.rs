use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use conclave_core::job::{Job, JobConfig, JobContext};
use conclave_core::Result;

use super::election::Election;

/// Group of the election round schedulers.
pub const ROUND_GROUP: &str = "cluster-election";

/// Drives one election round on this node.
///
/// `before` waits for voter registration to propagate and votes. `execute`
/// does the tally, on the initiator only.
pub struct ElectionRoundJob {
    election: Arc<Election>,
    vote_wait: Duration,
}

impl ElectionRoundJob {
    pub fn new(election: Arc<Election>, vote_wait: Duration) -> Self {
        Self {
            election,
            vote_wait,
        }
    }

    /// Scheduler config for one round: a single daemon pass.
    pub fn config() -> JobConfig {
        JobConfig::new(ROUND_GROUP)
            .with_interval(Duration::ZERO)
            .run_number_of_times(1)
            .before_after_only(true)
            .daemon(true)
    }

    async fn tally(&self) -> Result<()> {
        match self.election.calc() {
            Some((winner, votes)) if self.election.has_voter(&winner) => {
                tracing::debug!(winner = %winner, votes, "Election tally complete");
                self.election.new_leader(&winner).await
            }
            Some((winner, _)) => {
                tracing::warn!(winner = %winner, "Winner is not a registered voter, no leader this round");
                Ok(())
            }
            None => {
                tracing::warn!("No votes received, no leader this round");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Job for ElectionRoundJob {
    async fn before(&self, ctx: &JobContext) -> Result<()> {
        ctx.wait(self.vote_wait).await;
        self.election.vote().await?;
        Ok(())
    }

    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        if !self.election.is_initiator() {
            return Ok(());
        }

        ctx.wait(self.vote_wait).await;
        let tallied = self.tally().await;

        // The round is cleared and the lock released whatever the tally did.
        let cleared = self.election.clear().await;
        let ended = self.election.end().await;

        tallied.and(cleared).and(ended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use conclave_core::cluster::{ClusterKeys, NodeId};
    use conclave_core::store::CoordinationStore;

    fn setup(store: &MemoryStore, id: &str) -> (Arc<Election>, ElectionRoundJob) {
        let election = Arc::new(Election::new(
            Arc::new(store.clone()),
            ClusterKeys::new("c"),
            NodeId::from(id),
            Duration::from_secs(30),
        ));
        let job = ElectionRoundJob::new(election.clone(), Duration::from_millis(1));
        (election, job)
    }

    #[tokio::test]
    async fn test_initiator_writes_leader_and_clears() {
        let store = MemoryStore::new();
        let (election, job) = setup(&store, "a");
        let ctx = JobContext::detached("round", ROUND_GROUP);

        assert!(election.try_lock().await.unwrap());
        election.push().await.unwrap();
        election.set_initiator(Some(NodeId::from("a"))).await.unwrap();
        election.add_voter(NodeId::from("a"));
        election.add_voter(NodeId::from("b"));
        election.add_vote(NodeId::from("b"));
        election.add_vote(NodeId::from("b"));
        election.add_vote(NodeId::from("a"));

        job.execute(&ctx).await.unwrap();

        assert_eq!(store.get("c/LEADER").await.unwrap().as_deref(), Some("b"));
        assert!(store.get("c/ELECTION").await.unwrap().is_none());
        assert!(store.dump("c/VOTERS/").is_empty());
        // Lock released.
        assert!(election.try_lock().await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_winner_is_not_published() {
        let store = MemoryStore::new();
        let (election, job) = setup(&store, "a");
        let ctx = JobContext::detached("round", ROUND_GROUP);

        election.set_initiator(Some(NodeId::from("a"))).await.unwrap();
        election.add_voter(NodeId::from("a"));
        election.add_vote(NodeId::from("ghost"));

        job.execute(&ctx).await.unwrap();
        assert!(store.get("c/LEADER").await.unwrap().is_none());
        assert!(election.calc().is_none());
    }

    #[tokio::test]
    async fn test_non_initiator_only_votes() {
        let store = MemoryStore::new();
        let (election, job) = setup(&store, "b");
        let ctx = JobContext::detached("round", ROUND_GROUP);

        election.set_initiator(Some(NodeId::from("a"))).await.unwrap();
        election.add_voter(NodeId::from("a"));
        election.add_vote(NodeId::from("a"));

        job.before(&ctx).await.unwrap();
        assert_eq!(store.get("c/VOTES/b").await.unwrap().as_deref(), Some("a"));

        job.execute(&ctx).await.unwrap();
        assert!(store.get("c/LEADER").await.unwrap().is_none());
        assert_eq!(election.initiator(), Some(NodeId::from("a")));
    }
}
