use super::node::NodeId;

const VOTERS: &str = "VOTERS";
const VOTES: &str = "VOTES";
const ELECTION: &str = "ELECTION";
const ELECTION_LOCK: &str = "ELECTION_LOCK";
const LEADER: &str = "LEADER";
const NODE: &str = "NODE";
const WORKER: &str = "WORKER";

/// Key layout of one cluster inside the coordination store.
///
/// Every key lives under `{cluster_id}/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterKeys {
    cluster_id: String,
}

/// A parsed cluster key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterKey {
    /// `{cluster}/VOTERS/{node}`
    Voter(NodeId),
    /// `{cluster}/VOTES/{voter}`, value is the chosen node.
    Vote(NodeId),
    /// `{cluster}/ELECTION`, value is the round initiator.
    Election,
    /// `{cluster}/LEADER`, value is the leader id.
    Leader,
    /// `{cluster}/NODE/{node}`, value is the serialized node.
    Node(NodeId),
    /// `{cluster}/WORKER/{job_type}/{worker}`
    Worker { job_type: String, worker_id: String },
}

impl ClusterKeys {
    pub fn new(cluster_id: impl Into<String>) -> Self {
        Self {
            cluster_id: cluster_id.into(),
        }
    }

    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Prefix covering every key of the cluster.
    pub fn prefix(&self) -> String {
        format!("{}/", self.cluster_id)
    }

    pub fn voters(&self) -> String {
        self.path(VOTERS)
    }

    pub fn voter(&self, node: &NodeId) -> String {
        format!("{}/{}/{}", self.cluster_id, VOTERS, node)
    }

    pub fn votes(&self) -> String {
        self.path(VOTES)
    }

    pub fn vote(&self, voter: &NodeId) -> String {
        format!("{}/{}/{}", self.cluster_id, VOTES, voter)
    }

    pub fn election(&self) -> String {
        self.path(ELECTION)
    }

    /// Name of the lock serializing election rounds.
    pub fn election_lock(&self) -> String {
        self.path(ELECTION_LOCK)
    }

    pub fn leader(&self) -> String {
        self.path(LEADER)
    }

    pub fn nodes(&self) -> String {
        self.path(NODE)
    }

    pub fn node(&self, node: &NodeId) -> String {
        format!("{}/{}/{}", self.cluster_id, NODE, node)
    }

    pub fn workers(&self) -> String {
        self.path(WORKER)
    }

    pub fn worker(&self, job_type: &str, worker_id: &str) -> String {
        format!("{}/{}/{}/{}", self.cluster_id, WORKER, job_type, worker_id)
    }

    /// Parse a full store key. Keys outside this cluster or with an unknown
    /// shape yield `None`.
    pub fn parse(&self, key: &str) -> Option<ClusterKey> {
        let rest = key
            .strip_prefix(self.cluster_id.as_str())?
            .strip_prefix('/')?;

        match rest {
            ELECTION => return Some(ClusterKey::Election),
            LEADER => return Some(ClusterKey::Leader),
            _ => {}
        }

        let (kind, tail) = rest.split_once('/')?;
        if tail.is_empty() {
            return None;
        }

        match kind {
            VOTERS => Some(ClusterKey::Voter(NodeId::from(tail))),
            VOTES => Some(ClusterKey::Vote(NodeId::from(tail))),
            NODE => Some(ClusterKey::Node(NodeId::from(tail))),
            WORKER => {
                let (job_type, worker_id) = tail.split_once('/')?;
                if job_type.is_empty() || worker_id.is_empty() {
                    return None;
                }
                Some(ClusterKey::Worker {
                    job_type: job_type.to_string(),
                    worker_id: worker_id.to_string(),
                })
            }
            _ => None,
        }
    }

    fn path(&self, kind: &str) -> String {
        format!("{}/{}", self.cluster_id, kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        let keys = ClusterKeys::new("prod");
        let node = NodeId::from("node-1");

        assert_eq!(keys.prefix(), "prod/");
        assert_eq!(keys.voter(&node), "prod/VOTERS/node-1");
        assert_eq!(keys.vote(&node), "prod/VOTES/node-1");
        assert_eq!(keys.election(), "prod/ELECTION");
        assert_eq!(keys.leader(), "prod/LEADER");
        assert_eq!(keys.node(&node), "prod/NODE/node-1");
        assert_eq!(keys.worker("report", "report-0"), "prod/WORKER/report/report-0");
    }

    #[test]
    fn test_parse_keys() {
        let keys = ClusterKeys::new("prod");

        assert_eq!(
            keys.parse("prod/VOTERS/a"),
            Some(ClusterKey::Voter(NodeId::from("a")))
        );
        assert_eq!(
            keys.parse("prod/VOTES/b"),
            Some(ClusterKey::Vote(NodeId::from("b")))
        );
        assert_eq!(keys.parse("prod/ELECTION"), Some(ClusterKey::Election));
        assert_eq!(keys.parse("prod/LEADER"), Some(ClusterKey::Leader));
        assert_eq!(
            keys.parse("prod/WORKER/report/report-3"),
            Some(ClusterKey::Worker {
                job_type: "report".to_string(),
                worker_id: "report-3".to_string()
            })
        );
    }

    #[test]
    fn test_parse_rejects_foreign_keys() {
        let keys = ClusterKeys::new("prod");

        assert_eq!(keys.parse("staging/LEADER"), None);
        assert_eq!(keys.parse("production/LEADER"), None);
        assert_eq!(keys.parse("prod/ELECTION_LOCK"), None);
        assert_eq!(keys.parse("prod/VOTERS/"), None);
        assert_eq!(keys.parse("prod/WORKER/report"), None);
        assert_eq!(keys.parse("prod/SOMETHING/x"), None);
    }
}
