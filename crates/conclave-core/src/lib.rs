pub mod cluster;
pub mod config;
pub mod error;
pub mod job;
pub mod store;

pub use cluster::{ClusterKey, ClusterKeys, Node, NodeId, NodeStatus, WorkerDescriptor};
pub use config::{ClusterTimings, ConclaveConfig};
pub use error::{ConclaveError, Result};
pub use job::{Job, JobConfig, JobContext, Signal, Trigger};
pub use store::{CoordinationStore, KvSnapshot, WatchSender, WatchStream};
