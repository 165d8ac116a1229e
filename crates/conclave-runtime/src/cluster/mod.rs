//! Cluster membership, failure detection and leader election.

mod election;
mod heartbeat;
mod listener;
mod loader;
mod registry;
mod round;

pub use election::Election;
pub use heartbeat::{should_elect, HeartbeatJob, HEARTBEAT_GROUP};
pub use listener::ClusterListener;
pub use loader::ClusterLoader;
pub use registry::{ClusterRegistry, ClusterView, RegistryWriter};
pub use round::{ElectionRoundJob, ROUND_GROUP};
