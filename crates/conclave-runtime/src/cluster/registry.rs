use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::watch;

use conclave_core::cluster::{ClusterKey, ClusterKeys, Node, NodeId, NodeStatus, WorkerDescriptor};
use conclave_core::store::KvSnapshot;

/// Read-only view of cluster membership, rebuilt from every watch snapshot.
#[derive(Debug, Clone, Default)]
pub struct ClusterView {
    pub cluster_id: String,
    pub nodes: BTreeMap<NodeId, Node>,
    pub leader: Option<NodeId>,
}

impl ClusterView {
    /// The leader's record, if a leader is set and its record exists.
    pub fn leader_node(&self) -> Option<&Node> {
        self.leader.as_ref().and_then(|id| self.nodes.get(id))
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }
}

/// Per-process cache of cluster membership.
///
/// The view is written only by the [`RegistryWriter`] held by the watch
/// consumer. The local node record is owned by this process and mutated
/// through the registry.
pub struct ClusterRegistry {
    keys: ClusterKeys,
    local: RwLock<Node>,
    leaving: AtomicBool,
    view: watch::Receiver<Arc<ClusterView>>,
}

/// Write half of the registry.
pub struct RegistryWriter {
    keys: ClusterKeys,
    tx: watch::Sender<Arc<ClusterView>>,
}

impl ClusterRegistry {
    /// Create a registry for the local node.
    pub fn new(keys: ClusterKeys, local: Node) -> (Arc<Self>, RegistryWriter) {
        let empty = ClusterView {
            cluster_id: keys.cluster_id().to_string(),
            ..ClusterView::default()
        };
        let (tx, view) = watch::channel(Arc::new(empty));

        let registry = Arc::new(Self {
            keys: keys.clone(),
            local: RwLock::new(local),
            leaving: AtomicBool::new(false),
            view,
        });
        (registry, RegistryWriter { keys, tx })
    }

    pub fn keys(&self) -> &ClusterKeys {
        &self.keys
    }

    pub fn cluster_id(&self) -> &str {
        self.keys.cluster_id()
    }

    /// Latest published view.
    pub fn snapshot(&self) -> Arc<ClusterView> {
        self.view.borrow().clone()
    }

    /// Current leader id.
    pub fn leader(&self) -> Option<NodeId> {
        self.view.borrow().leader.clone()
    }

    /// Wait for the next published view. Returns false once the writer is gone.
    pub async fn changed(&self) -> bool {
        let mut view = self.view.clone();
        view.changed().await.is_ok()
    }

    /// Copy of the local node record.
    pub fn current_node(&self) -> Node {
        self.local.read().clone()
    }

    pub fn local_id(&self) -> NodeId {
        self.local.read().id.clone()
    }

    pub fn status(&self) -> NodeStatus {
        self.local.read().status
    }

    /// Set the local status. Returns true if it changed.
    pub fn set_status(&self, status: NodeStatus) -> bool {
        let mut local = self.local.write();
        if local.status == status {
            return false;
        }
        local.status = status;
        true
    }

    pub fn add_worker(&self, worker: WorkerDescriptor) {
        self.local.write().add_worker(worker);
    }

    pub fn remove_worker(&self, id: &str) -> Option<WorkerDescriptor> {
        self.local.write().remove_worker(id)
    }

    /// Mark the node as deregistering. The local record is no longer
    /// published afterwards.
    pub fn leave(&self) {
        self.leaving.store(true, Ordering::SeqCst);
    }

    pub fn is_leaving(&self) -> bool {
        self.leaving.load(Ordering::SeqCst)
    }

    /// Record a heartbeat and return the updated record.
    pub fn touch(&self, now: DateTime<Utc>) -> Node {
        let mut local = self.local.write();
        local.touch(now);
        local.clone()
    }
}

impl RegistryWriter {
    /// Rebuild the view from a snapshot of the cluster prefix and publish it.
    pub fn apply(&self, snapshot: &KvSnapshot) -> Arc<ClusterView> {
        let mut view = ClusterView {
            cluster_id: self.keys.cluster_id().to_string(),
            ..ClusterView::default()
        };

        for (key, value) in snapshot {
            match self.keys.parse(key) {
                Some(ClusterKey::Node(id)) => match Node::decode(value) {
                    Ok(node) if node.id == id => {
                        view.nodes.insert(id, node);
                    }
                    Ok(node) => {
                        tracing::warn!(key = %key, node_id = %node.id, "Node record stored under another id");
                    }
                    Err(e) => {
                        tracing::warn!(key = %key, error = %e, "Skipping malformed node record");
                    }
                },
                Some(ClusterKey::Leader) if !value.is_empty() => {
                    view.leader = Some(NodeId::from(value.as_str()));
                }
                _ => {}
            }
        }

        let view = Arc::new(view);
        self.tx.send_replace(view.clone());
        view
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> (Arc<ClusterRegistry>, RegistryWriter, ClusterKeys) {
        let keys = ClusterKeys::new("c");
        let local = Node::new_local(NodeId::from("a"), "10.0.0.1", vec!["report".to_string()]);
        let (registry, writer) = ClusterRegistry::new(keys.clone(), local);
        (registry, writer, keys)
    }

    fn record(id: &str) -> String {
        Node::new_local(NodeId::from(id), "host", Vec::<String>::new())
            .encode()
            .unwrap()
    }

    #[test]
    fn test_apply_builds_view() {
        let (registry, writer, keys) = registry();
        let mut snapshot = KvSnapshot::new();
        snapshot.insert(keys.node(&NodeId::from("a")), record("a"));
        snapshot.insert(keys.node(&NodeId::from("b")), record("b"));
        snapshot.insert(keys.leader(), "b".to_string());
        snapshot.insert(keys.voter(&NodeId::from("a")), "a".to_string());

        writer.apply(&snapshot);

        let view = registry.snapshot();
        assert_eq!(view.cluster_id, "c");
        assert_eq!(view.nodes.len(), 2);
        assert_eq!(registry.leader(), Some(NodeId::from("b")));
        assert_eq!(view.leader_node().map(|n| n.id.as_str()), Some("b"));
    }

    #[test]
    fn test_malformed_records_are_skipped() {
        let (registry, writer, keys) = registry();
        let mut snapshot = KvSnapshot::new();
        snapshot.insert(keys.node(&NodeId::from("a")), "{not json".to_string());
        snapshot.insert(keys.node(&NodeId::from("b")), record("c"));
        snapshot.insert(keys.leader(), "z".to_string());

        writer.apply(&snapshot);

        let view = registry.snapshot();
        assert!(view.nodes.is_empty());
        // Leader set but its record is missing.
        assert!(view.leader.is_some());
        assert!(view.leader_node().is_none());
    }

    #[test]
    fn test_local_node_mutation() {
        let (registry, _writer, _keys) = registry();
        assert_eq!(registry.status(), NodeStatus::Looking);

        assert!(registry.set_status(NodeStatus::Leader));
        assert!(!registry.set_status(NodeStatus::Leader));

        let before = registry.current_node().livetime;
        let touched = registry.touch(before + chrono::Duration::seconds(5));
        assert!(touched.livetime > before);
        assert_eq!(registry.local_id().as_str(), "a");
    }

    #[tokio::test]
    async fn test_changed_wakes_on_publish() {
        let (registry, writer, keys) = registry();
        let waiter = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.changed().await })
        };
        tokio::task::yield_now().await;

        let mut snapshot = KvSnapshot::new();
        snapshot.insert(keys.leader(), "a".to_string());
        writer.apply(&snapshot);

        assert!(waiter.await.unwrap());
    }
}
