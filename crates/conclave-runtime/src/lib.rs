pub mod cluster;
pub mod scheduler;
pub mod store;

pub use cluster::{ClusterLoader, ClusterRegistry, ClusterView, Election};
pub use scheduler::{JobRegistry, Scheduler, SchedulerFactory, SchedulerState};
pub use store::{ConsulStore, MemoryStore};
