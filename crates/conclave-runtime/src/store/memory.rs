use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

use conclave_core::store::{CoordinationStore, KvSnapshot, WatchStream};
use conclave_core::Result;

const WATCH_BUFFER: usize = 16;

#[derive(Default)]
struct Inner {
    data: BTreeMap<String, String>,
    locks: HashMap<String, Instant>,
}

impl Inner {
    fn prefixed(&self, prefix: &str) -> KvSnapshot {
        self.data
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// In-process coordination store.
///
/// Clones share the same data, so several nodes in one process can form a
/// cluster over a single instance.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    version: Arc<watch::Sender<u64>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            version: Arc::new(version),
        }
    }

    /// Current contents under a prefix.
    pub fn dump(&self, prefix: &str) -> KvSnapshot {
        self.inner.lock().prefixed(prefix)
    }

    fn bump(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let changed = {
            let mut inner = self.inner.lock();
            inner.data.insert(key.to_string(), value.to_string()).as_deref() != Some(value)
        };
        if changed {
            self.bump();
        }
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.inner.lock().data.get(key).cloned())
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let changed = {
            let mut inner = self.inner.lock();
            if recursive {
                let before = inner.data.len();
                inner.data.retain(|k, _| !k.starts_with(key));
                inner.data.len() != before
            } else {
                inner.data.remove(key).is_some()
            }
        };
        if changed {
            self.bump();
        }
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        let (sender, stream) = WatchStream::channel(WATCH_BUFFER);
        let inner = self.inner.clone();
        let mut version = self.version.subscribe();
        let prefix = prefix.to_string();

        tokio::spawn(async move {
            let mut last = inner.lock().prefixed(&prefix);
            version.mark_unchanged();
            if !sender.send(last.clone()).await {
                return;
            }

            loop {
                tokio::select! {
                    _ = sender.cancelled() => break,
                    changed = version.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = inner.lock().prefixed(&prefix);
                        if snapshot == last {
                            continue;
                        }
                        last = snapshot.clone();
                        if !sender.send(snapshot).await {
                            break;
                        }
                    }
                }
            }

            tracing::debug!(prefix = %prefix, "Memory store watch ended");
        });

        Ok(stream)
    }

    async fn lock(&self, name: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut inner = self.inner.lock();

        if let Some(expires) = inner.locks.get(name) {
            if *expires > now {
                return Ok(false);
            }
        }

        inner.locks.insert(name.to_string(), now + ttl);
        Ok(true)
    }

    async fn unlock(&self, name: &str) -> Result<()> {
        self.inner.lock().locks.remove(name);
        Ok(())
    }
}
