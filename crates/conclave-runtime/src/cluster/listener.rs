use std::sync::Arc;

use conclave_core::cluster::{ClusterKey, ClusterKeys, NodeId, NodeStatus};
use conclave_core::store::{CoordinationStore, KvSnapshot, WatchStream};
use conclave_core::Result;

use super::election::Election;
use super::registry::{ClusterRegistry, ClusterView, RegistryWriter};
use super::round::{ElectionRoundJob, ROUND_GROUP};
use crate::scheduler::SchedulerFactory;

/// Consumer of the cluster watch.
///
/// Sole writer of the registry view. Feeds voter and vote changes to the
/// election, starts a round scheduler when a new initiator appears, and
/// moves the local node between `LOOKING`, `LEADER` and `FOLLOWING` as the
/// leader key changes.
pub struct ClusterListener {
    keys: ClusterKeys,
    store: Arc<dyn CoordinationStore>,
    registry: Arc<ClusterRegistry>,
    writer: RegistryWriter,
    election: Arc<Election>,
    factory: Arc<SchedulerFactory>,
    round: Arc<ElectionRoundJob>,
}

impl ClusterListener {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        registry: Arc<ClusterRegistry>,
        writer: RegistryWriter,
        election: Arc<Election>,
        factory: Arc<SchedulerFactory>,
        round: Arc<ElectionRoundJob>,
    ) -> Self {
        Self {
            keys: registry.keys().clone(),
            store,
            registry,
            writer,
            election,
            factory,
            round,
        }
    }

    /// Consume snapshots until the stream ends.
    pub async fn run(self, mut stream: WatchStream) {
        tracing::debug!(cluster_id = %self.keys.cluster_id(), "Cluster listener started");

        while let Some(snapshot) = stream.next().await {
            if let Err(e) = self.handle(&snapshot).await {
                tracing::warn!(error = %e, "Failed to process cluster update");
            }
        }

        tracing::debug!(cluster_id = %self.keys.cluster_id(), "Cluster listener stopped");
    }

    /// Apply one snapshot of the cluster prefix.
    pub async fn handle(&self, snapshot: &KvSnapshot) -> Result<()> {
        let view = self.writer.apply(snapshot);
        self.sync_election(snapshot).await?;
        self.sync_status(&view).await
    }

    async fn sync_election(&self, snapshot: &KvSnapshot) -> Result<()> {
        let mut initiator = None;

        // Snapshots are complete, so tallies are rebuilt rather than diffed.
        self.election.clear_voters();
        self.election.clear_votes();

        for (key, value) in snapshot {
            match self.keys.parse(key) {
                Some(ClusterKey::Voter(id)) => self.election.add_voter(id),
                Some(ClusterKey::Vote(_)) if !value.is_empty() => {
                    self.election.add_vote(NodeId::from(value.as_str()));
                }
                Some(ClusterKey::Election) => initiator = Some(NodeId::from(value.as_str())),
                _ => {}
            }
        }

        if self.election.set_initiator(initiator).await? {
            self.start_round()?;
        }
        Ok(())
    }

    fn start_round(&self) -> Result<()> {
        let pruned = self.factory.remove_group(ROUND_GROUP);
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned finished election rounds");
        }

        let scheduler = self
            .factory
            .submit(ElectionRoundJob::config(), self.round.clone(), true)?;
        tracing::debug!(scheduler_id = %scheduler.id(), "Election round scheduled");
        Ok(())
    }

    async fn sync_status(&self, view: &ClusterView) -> Result<()> {
        let local = self.registry.local_id();
        let status = match &view.leader {
            Some(leader) if *leader == local => NodeStatus::Leader,
            Some(_) => NodeStatus::Following,
            None => NodeStatus::Looking,
        };

        if !self.registry.set_status(status) {
            return Ok(());
        }

        match status {
            NodeStatus::Leader => tracing::info!(node_id = %local, "Became cluster leader"),
            _ => tracing::info!(
                node_id = %local,
                status = %status,
                leader = ?view.leader.as_ref().map(NodeId::as_str),
                "Cluster status changed"
            ),
        }

        if self.registry.is_leaving() {
            return Ok(());
        }

        let node = self.registry.current_node();
        self.store
            .put(&self.keys.node(&node.id), &node.encode()?)
            .await
    }
}
