use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use conclave_core::cluster::{Node, NodeStatus, WorkerDescriptor};
use conclave_core::config::ClusterTimings;
use conclave_core::job::{Job, JobConfig, JobContext};
use conclave_core::store::CoordinationStore;
use conclave_core::Result;

use super::election::Election;
use super::registry::ClusterRegistry;
use crate::scheduler::SchedulerFactory;

/// Group of the heartbeat scheduler.
pub const HEARTBEAT_GROUP: &str = "cluster-heartbeat";

/// Whether this node should start an election.
///
/// A leader never does. Anyone else does when no leader record is known or
/// the leader has been silent for longer than `sync_timeout`.
pub fn should_elect(
    status: NodeStatus,
    leader: Option<&Node>,
    now: DateTime<Utc>,
    sync_timeout: Duration,
) -> bool {
    if status == NodeStatus::Leader {
        return false;
    }

    match leader {
        None => true,
        Some(leader) => {
            let limit = i64::try_from(sync_timeout.as_millis()).unwrap_or(i64::MAX);
            leader.silence_ms(now) > limit
        }
    }
}

/// Liveness refresh and failure detector of the local node.
///
/// Each tick also brings the node's worker keys in line with the factory,
/// so instances appended or removed after load are advertised.
pub struct HeartbeatJob {
    store: Arc<dyn CoordinationStore>,
    registry: Arc<ClusterRegistry>,
    election: Arc<Election>,
    factory: Arc<SchedulerFactory>,
    timings: ClusterTimings,
}

impl HeartbeatJob {
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        registry: Arc<ClusterRegistry>,
        election: Arc<Election>,
        factory: Arc<SchedulerFactory>,
        timings: ClusterTimings,
    ) -> Self {
        Self {
            store,
            registry,
            election,
            factory,
            timings,
        }
    }

    /// Scheduler config for the heartbeat loop.
    pub fn config(timings: &ClusterTimings) -> JobConfig {
        JobConfig::new(HEARTBEAT_GROUP)
            .with_interval(timings.heartbeat_interval)
            .before_after_only(true)
            .daemon(true)
    }

    /// Take the election lock and, if won, nominate this node.
    pub async fn election(&self) -> Result<bool> {
        if !self.election.try_lock().await? {
            tracing::debug!("Election lock held elsewhere");
            return Ok(false);
        }

        if self.election.push().await? {
            return Ok(true);
        }

        // This node already announced the open round.
        self.election.end().await?;
        Ok(false)
    }

    /// Put worker keys for new instances and delete those of vanished ones.
    ///
    /// The local record only follows successful writes, so a failed key is
    /// retried on the next tick.
    pub async fn reconcile_workers(&self) {
        let node = self.registry.current_node();
        let keys = self.registry.keys();
        let wanted: BTreeMap<String, WorkerDescriptor> = self
            .factory
            .workers()
            .into_iter()
            .map(|worker| (worker.id.clone(), worker))
            .collect();

        for worker in wanted.values() {
            if node.workers.contains_key(&worker.id) {
                continue;
            }
            let key = keys.worker(&worker.job_type, &worker.id);
            match self.store.put(&key, node.id.as_str()).await {
                Ok(()) => {
                    tracing::debug!(worker_id = %worker.id, job_type = %worker.job_type, "Worker registered");
                    self.registry.add_worker(worker.clone());
                }
                Err(e) => tracing::warn!(worker_id = %worker.id, error = %e, "Failed to register worker"),
            }
        }

        for worker in node.workers.values() {
            if wanted.contains_key(&worker.id) {
                continue;
            }
            let key = keys.worker(&worker.job_type, &worker.id);
            match self.store.delete(&key, false).await {
                Ok(()) => {
                    tracing::debug!(worker_id = %worker.id, job_type = %worker.job_type, "Worker deregistered");
                    self.registry.remove_worker(&worker.id);
                }
                Err(e) => tracing::warn!(worker_id = %worker.id, error = %e, "Failed to remove worker key"),
            }
        }
    }

    async fn publish(&self, node: &Node) -> Result<()> {
        let key = self.registry.keys().node(&node.id);
        self.store.put(&key, &node.encode()?).await
    }
}

#[async_trait]
impl Job for HeartbeatJob {
    async fn before(&self, ctx: &JobContext) -> Result<()> {
        tracing::info!(
            node_id = %self.registry.local_id(),
            cluster_id = %self.registry.cluster_id(),
            "Heartbeat starting"
        );
        ctx.wait(self.timings.start_wait).await;
        Ok(())
    }

    async fn execute(&self, _ctx: &JobContext) -> Result<()> {
        self.reconcile_workers().await;

        let now = Utc::now();
        let node = self.registry.touch(now);

        // The next tick retries, so a failed write is only logged.
        if let Err(e) = self.publish(&node).await {
            tracing::warn!(node_id = %node.id, error = %e, "Failed to publish heartbeat");
        }

        let view = self.registry.snapshot();
        if should_elect(node.status, view.leader_node(), now, self.timings.sync_timeout) {
            tracing::debug!(node_id = %node.id, leader = ?view.leader, "Leader missing or silent");
            self.election().await?;
        }
        Ok(())
    }

    async fn destroy(&self, _ctx: &JobContext) -> Result<()> {
        let node = self.registry.current_node();
        let keys = self.registry.keys();

        for worker in node.workers.values() {
            if let Err(e) = self
                .store
                .delete(&keys.worker(&worker.job_type, &worker.id), false)
                .await
            {
                tracing::warn!(worker_id = %worker.id, error = %e, "Failed to remove worker key");
            }
        }

        self.store.delete(&keys.node(&node.id), false).await?;
        tracing::info!(node_id = %node.id, "Node deregistered");
        Ok(())
    }
}
