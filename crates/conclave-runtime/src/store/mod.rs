//! Coordination store backends.

mod consul;
mod memory;

pub use consul::ConsulStore;
pub use memory::MemoryStore;

use std::sync::Arc;

use conclave_core::config::{StoreConfig, StoreKind};
use conclave_core::store::CoordinationStore;
use conclave_core::Result;

/// Build the store selected by configuration.
pub fn connect(config: &StoreConfig) -> Result<Arc<dyn CoordinationStore>> {
    match config.kind {
        StoreKind::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreKind::Consul => {
            tracing::info!(endpoint = %config.endpoint, "Using Consul coordination store");
            Ok(Arc::new(ConsulStore::new(config)?))
        }
    }
}
