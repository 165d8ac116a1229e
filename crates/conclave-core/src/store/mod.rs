//! Coordination store contract.
//!
//! The store is an external key/value service with prefix watches and
//! TTL-bounded locks. Everything cluster-wide goes through this trait so the
//! runtime never depends on a concrete backend.

mod watch;

pub use watch::{WatchSender, WatchStream};

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::Result;

/// Point-in-time view of every key under a watched prefix.
pub type KvSnapshot = BTreeMap<String, String>;

/// Key/value store with watch and lock primitives.
#[async_trait]
pub trait CoordinationStore: Send + Sync + 'static {
    /// Write a value.
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Read a value.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Delete a key, or every key under it when `recursive` is set.
    async fn delete(&self, key: &str, recursive: bool) -> Result<()>;

    /// Subscribe to a prefix.
    ///
    /// The stream yields a full snapshot of the prefix on every change,
    /// starting with the current contents. Delivery is at-least-once, so
    /// consumers must tolerate repeated identical snapshots.
    async fn watch(&self, prefix: &str) -> Result<WatchStream>;

    /// Try to take a named lock. The lock expires on its own after `ttl`.
    async fn lock(&self, name: &str, ttl: Duration) -> Result<bool>;

    /// Release a named lock.
    async fn unlock(&self, name: &str) -> Result<()>;
}
