//! Conclave - cluster-aware periodic job scheduling.
//!
//! Nodes sharing a coordination store elect a leader with a best-effort
//! voting protocol and watch each other through heartbeats, while every
//! node runs its own periodic jobs.

pub mod demo;
mod runtime;

// Re-export the building blocks for applications
pub use conclave_core;
pub use conclave_runtime;

pub use runtime::prelude;
pub use runtime::{Conclave, ConclaveBuilder};
