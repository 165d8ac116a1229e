use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Unique node identifier within a cluster.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Create from an existing string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build a node id from a template.
    ///
    /// `{host}` is replaced with the node's network address and `{pid}` with
    /// the process id, so several processes on one host stay distinct.
    pub fn from_template(template: &str, host: &str) -> Self {
        let id = template
            .replace("{host}", host)
            .replace("{pid}", &std::process::id().to_string());
        Self(id)
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check whether the id is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Node status in the cluster.
///
/// Every node joins as `Looking` and moves to `Leader` or `Following` once it
/// observes an election result. `Unknown` is what a malformed record decodes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    /// Waiting for an election result.
    Looking,
    /// This node is the elected leader.
    Leader,
    /// Another node is the elected leader.
    Following,
    /// Unrecognized state.
    #[serde(other)]
    Unknown,
}

impl NodeStatus {
    /// Convert to string for store records.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Looking => "LOOKING",
            Self::Leader => "LEADER",
            Self::Following => "FOLLOWING",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Parse from string.
    pub fn from_str(s: &str) -> Self {
        match s {
            "LOOKING" => Self::Looking,
            "LEADER" => Self::Leader,
            "FOLLOWING" => Self::Following,
            _ => Self::Unknown,
        }
    }

    /// Whether the node has seen an election result.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Leader | Self::Following)
    }
}

impl std::fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A locally running job instance, tracked under its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerDescriptor {
    /// Job type the instance was built from.
    pub job_type: String,
    /// Scheduler instance id.
    pub id: String,
}

impl WorkerDescriptor {
    pub fn new(job_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            job_type: job_type.into(),
            id: id.into(),
        }
    }
}

/// One process instance in the cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node ID.
    pub id: NodeId,
    /// Network address.
    pub host: String,
    /// Current status.
    pub status: NodeStatus,
    /// When the node joined.
    pub uptime: DateTime<Utc>,
    /// Most recent heartbeat.
    pub livetime: DateTime<Utc>,
    /// Job types this node can run.
    #[serde(default)]
    pub scheduler_ability: BTreeSet<String>,
    /// Local job instances keyed by instance id.
    #[serde(default)]
    pub workers: BTreeMap<String, WorkerDescriptor>,
}

impl Node {
    /// Create the record for the local node.
    pub fn new_local(
        id: NodeId,
        host: impl Into<String>,
        scheduler_ability: impl IntoIterator<Item = String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            host: host.into(),
            status: NodeStatus::Looking,
            uptime: now,
            livetime: now,
            scheduler_ability: scheduler_ability.into_iter().collect(),
            workers: BTreeMap::new(),
        }
    }

    /// Record a heartbeat. `livetime` never moves backwards.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.livetime {
            self.livetime = now;
        }
    }

    /// Milliseconds since the last heartbeat.
    pub fn silence_ms(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.livetime).num_milliseconds()
    }

    /// Check if this node is the leader.
    pub fn is_leader(&self) -> bool {
        self.status == NodeStatus::Leader
    }

    /// Check if this node can run a job type.
    pub fn has_ability(&self, job_type: &str) -> bool {
        self.scheduler_ability.contains(job_type)
    }

    /// Track a local job instance.
    pub fn add_worker(&mut self, worker: WorkerDescriptor) {
        self.workers.insert(worker.id.clone(), worker);
    }

    /// Stop tracking a local job instance.
    pub fn remove_worker(&mut self, id: &str) -> Option<WorkerDescriptor> {
        self.workers.remove(id)
    }

    /// Serialize for the store.
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Deserialize a store record.
    pub fn decode(value: &str) -> Result<Self> {
        Ok(serde_json::from_str(value)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_from_template() {
        let id = NodeId::from_template("node-{host}", "10.0.0.7");
        assert_eq!(id.as_str(), "node-10.0.0.7");

        let id = NodeId::from_template("{host}:{pid}", "box");
        assert_eq!(id.as_str(), format!("box:{}", std::process::id()));
    }

    #[test]
    fn test_node_status_conversion() {
        assert_eq!(NodeStatus::from_str("LEADER"), NodeStatus::Leader);
        assert_eq!(NodeStatus::from_str("FOLLOWING"), NodeStatus::Following);
        assert_eq!(NodeStatus::from_str("garbage"), NodeStatus::Unknown);
        assert_eq!(NodeStatus::Looking.as_str(), "LOOKING");
        assert!(NodeStatus::Leader.is_settled());
        assert!(!NodeStatus::Looking.is_settled());
    }

    #[test]
    fn test_new_local_node_is_looking() {
        let node = Node::new_local(NodeId::from("a"), "10.0.0.1", vec!["report".to_string()]);
        assert_eq!(node.status, NodeStatus::Looking);
        assert_eq!(node.uptime, node.livetime);
        assert!(node.has_ability("report"));
        assert!(!node.has_ability("billing"));
    }

    #[test]
    fn test_touch_is_monotonic() {
        let mut node = Node::new_local(NodeId::from("a"), "h", Vec::new());
        let later = node.livetime + chrono::Duration::seconds(10);
        node.touch(later);
        assert_eq!(node.livetime, later);

        node.touch(later - chrono::Duration::seconds(5));
        assert_eq!(node.livetime, later);
        assert_eq!(node.silence_ms(later + chrono::Duration::seconds(2)), 2_000);
    }

    #[test]
    fn test_unknown_status_in_record() {
        let mut node = Node::new_local(NodeId::from("a"), "h", Vec::new());
        node.add_worker(WorkerDescriptor::new("report", "report-1"));
        let encoded = node.encode().unwrap().replace("LOOKING", "SLEEPING");

        let decoded = Node::decode(&encoded).unwrap();
        assert_eq!(decoded.status, NodeStatus::Unknown);
        assert_eq!(decoded.workers["report-1"].job_type, "report");
    }
}
