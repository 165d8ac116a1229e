use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use conclave_core::cluster::{ClusterKeys, Node};
use conclave_core::config::{ClusterConfig, NodeConfig};
use conclave_core::store::CoordinationStore;
use conclave_core::{ConclaveError, Result};

use super::election::Election;
use super::heartbeat::{HeartbeatJob, HEARTBEAT_GROUP};
use super::listener::ClusterListener;
use super::registry::ClusterRegistry;
use super::round::{ElectionRoundJob, ROUND_GROUP};
use crate::scheduler::{Scheduler, SchedulerFactory};

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

struct Loaded {
    registry: Arc<ClusterRegistry>,
    election: Arc<Election>,
    heartbeat: Arc<Scheduler>,
    watch: CancellationToken,
    listener: JoinHandle<()>,
}

/// Joins this process to its cluster and leaves it again.
pub struct ClusterLoader {
    cluster: ClusterConfig,
    node: NodeConfig,
    store: Arc<dyn CoordinationStore>,
    factory: Arc<SchedulerFactory>,
    loaded: AtomicBool,
    state: Mutex<Option<Loaded>>,
}

impl ClusterLoader {
    pub fn new(
        cluster: ClusterConfig,
        node: NodeConfig,
        store: Arc<dyn CoordinationStore>,
        factory: Arc<SchedulerFactory>,
    ) -> Self {
        Self {
            cluster,
            node,
            store,
            factory,
            loaded: AtomicBool::new(false),
            state: Mutex::new(None),
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    /// Registry of the joined cluster, while loaded.
    pub async fn registry(&self) -> Option<Arc<ClusterRegistry>> {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|loaded| loaded.registry.clone())
    }

    /// Register this node and start the watch and heartbeat.
    ///
    /// Returns false when clustering is disabled or already loaded.
    pub async fn load(&self) -> Result<bool> {
        if !self.cluster.enabled {
            tracing::info!("Cluster mode disabled");
            return Ok(false);
        }

        if self.loaded.swap(true, Ordering::SeqCst) {
            tracing::warn!("Cluster already loaded");
            return Ok(false);
        }

        match self.start().await {
            Ok(loaded) => {
                *self.state.lock().await = Some(loaded);
                Ok(true)
            }
            Err(e) => {
                self.loaded.store(false, Ordering::SeqCst);
                Err(e)
            }
        }
    }

    async fn start(&self) -> Result<Loaded> {
        if self.cluster.id.trim().is_empty() {
            return Err(ConclaveError::Config("cluster id is empty".to_string()));
        }

        let abilities = self.factory.registry().job_types();
        if abilities.is_empty() {
            return Err(ConclaveError::Config(
                "no job types registered for cluster mode".to_string(),
            ));
        }

        let host = self.node.resolve_host();
        let node_id = self.node.node_id(&host);
        if node_id.is_empty() {
            return Err(ConclaveError::Config("node id resolved to empty".to_string()));
        }

        let keys = ClusterKeys::new(self.cluster.id.clone());
        let timings = self.cluster.timings();

        let mut node = Node::new_local(node_id.clone(), host, abilities);
        for worker in self.factory.workers() {
            node.add_worker(worker);
        }

        self.store.put(&keys.node(&node_id), &node.encode()?).await?;
        for worker in node.workers.values() {
            self.store
                .put(&keys.worker(&worker.job_type, &worker.id), node_id.as_str())
                .await?;
        }

        tracing::info!(
            node_id = %node_id,
            cluster_id = %keys.cluster_id(),
            abilities = node.scheduler_ability.len(),
            workers = node.workers.len(),
            "Node registered"
        );

        let (registry, writer) = ClusterRegistry::new(keys.clone(), node);
        let election = Arc::new(Election::new(
            self.store.clone(),
            keys.clone(),
            node_id,
            timings.lock_ttl,
        ));

        let stream = self.store.watch(&keys.prefix()).await?;
        let watch = stream.cancellation_token();
        let listener = ClusterListener::new(
            self.store.clone(),
            registry.clone(),
            writer,
            election.clone(),
            self.factory.clone(),
            Arc::new(ElectionRoundJob::new(election.clone(), timings.vote_wait)),
        );
        let listener = tokio::spawn(listener.run(stream));

        let heartbeat = HeartbeatJob::new(
            self.store.clone(),
            registry.clone(),
            election.clone(),
            self.factory.clone(),
            timings,
        );
        let heartbeat = match self
            .factory
            .submit(HeartbeatJob::config(&timings), Arc::new(heartbeat), true)
        {
            Ok(scheduler) => scheduler,
            Err(e) => {
                watch.cancel();
                listener.abort();
                return Err(e);
            }
        };
        // Heartbeats of earlier loads are closed by now.
        self.factory.remove_group(HEARTBEAT_GROUP);

        Ok(Loaded {
            registry,
            election,
            heartbeat,
            watch,
            listener,
        })
    }

    /// Leave the cluster. Failures are logged, never returned.
    pub async fn close(&self) {
        let Some(loaded) = self.state.lock().await.take() else {
            return;
        };

        // Stop the listener first; it must not republish the node record
        // once the heartbeat has deleted it.
        loaded.registry.leave();
        loaded.watch.cancel();
        match tokio::time::timeout(CLOSE_TIMEOUT, loaded.listener).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!(error = %e, "Cluster listener failed"),
            Err(_) => tracing::warn!("Cluster listener did not stop in time"),
        }

        loaded.heartbeat.close();
        if !loaded.heartbeat.join(CLOSE_TIMEOUT).await {
            tracing::warn!("Heartbeat did not stop in time");
        }

        self.factory.close_group(ROUND_GROUP);
        if let Err(e) = loaded.election.end().await {
            tracing::warn!(error = %e, "Failed to release election lock");
        }

        self.loaded.store(false, Ordering::SeqCst);
        tracing::info!(node_id = %loaded.registry.local_id(), "Left cluster");
    }
}
