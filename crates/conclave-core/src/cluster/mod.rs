mod keys;
mod node;

pub use keys::{ClusterKey, ClusterKeys};
pub use node::{Node, NodeId, NodeStatus, WorkerDescriptor};
