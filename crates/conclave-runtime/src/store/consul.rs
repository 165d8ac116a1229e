use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use parking_lot::Mutex;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use conclave_core::config::StoreConfig;
use conclave_core::store::{CoordinationStore, KvSnapshot, WatchSender, WatchStream};
use conclave_core::{ConclaveError, Result};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_DELAY: Duration = Duration::from_secs(1);
/// Consul rejects session TTLs below ten seconds.
const MIN_SESSION_TTL: Duration = Duration::from_secs(10);
const WATCH_BUFFER: usize = 4;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct KvEntry {
    key: String,
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

/// Coordination store backed by Consul's KV and session APIs.
#[derive(Clone)]
pub struct ConsulStore {
    client: Client,
    endpoint: String,
    token: Option<String>,
    watch_wait: Duration,
    sessions: std::sync::Arc<Mutex<HashMap<String, String>>>,
}

impl ConsulStore {
    /// Create a store client. No request is made until first use.
    pub fn new(config: &StoreConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(REQUEST_TIMEOUT)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| ConclaveError::Store(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
            watch_wait: Duration::from_secs(config.watch_wait_secs.max(1)),
            sessions: Default::default(),
        })
    }

    fn kv_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.endpoint, key.trim_start_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => builder.header("X-Consul-Token", token),
            None => builder,
        }
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        self.authorized(builder)
            .send()
            .await
            .map_err(|e| ConclaveError::Store(e.to_string()))
    }

    async fn create_session(&self, name: &str, ttl: Duration) -> Result<String> {
        let ttl = ttl.max(MIN_SESSION_TTL);
        let body = serde_json::json!({
            "Name": name,
            "TTL": format!("{}s", ttl.as_secs()),
            "Behavior": "delete",
        });

        let response = self
            .send(
                self.client
                    .put(format!("{}/v1/session/create", self.endpoint))
                    .timeout(REQUEST_TIMEOUT)
                    .json(&body),
            )
            .await?;
        let response = check(response).await?;
        let created: SessionCreated = response
            .json()
            .await
            .map_err(|e| ConclaveError::Store(e.to_string()))?;
        Ok(created.id)
    }

    async fn destroy_session(&self, session: &str) -> Result<()> {
        let response = self
            .send(
                self.client
                    .put(format!("{}/v1/session/destroy/{}", self.endpoint, session))
                    .timeout(REQUEST_TIMEOUT),
            )
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn acquire(&self, name: &str, session: &str, mode: &str) -> Result<bool> {
        let response = self
            .send(
                self.client
                    .put(self.kv_url(name))
                    .query(&[(mode, session)])
                    .timeout(REQUEST_TIMEOUT),
            )
            .await?;
        let text = check(response)
            .await?
            .text()
            .await
            .map_err(|e| ConclaveError::Store(e.to_string()))?;
        Ok(text.trim() == "true")
    }

    /// One blocking query. Returns the new index and the snapshot.
    async fn poll(&self, prefix: &str, index: u64) -> Result<(u64, KvSnapshot)> {
        let wait = format!("{}s", self.watch_wait.as_secs());
        let response = self
            .send(
                self.client
                    .get(self.kv_url(prefix))
                    .query(&[("recurse", "true"), ("wait", wait.as_str())])
                    .query(&[("index", index)])
                    .timeout(self.watch_wait + REQUEST_TIMEOUT),
            )
            .await?;

        let next = response
            .headers()
            .get("X-Consul-Index")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0);

        if response.status() == StatusCode::NOT_FOUND {
            return Ok((next, KvSnapshot::new()));
        }

        let entries: Vec<KvEntry> = check(response)
            .await?
            .json()
            .await
            .map_err(|e| ConclaveError::Store(e.to_string()))?;
        Ok((next, decode_entries(entries)?))
    }

    async fn run_watch(self, prefix: String, sender: WatchSender) {
        let mut index = 0u64;
        let mut delivered = false;

        loop {
            let polled = tokio::select! {
                _ = sender.cancelled() => break,
                polled = self.poll(&prefix, index) => polled,
            };

            match polled {
                Ok((next, snapshot)) => {
                    // A blocking query that times out returns the same index.
                    if delivered && next == index {
                        continue;
                    }
                    // The index can go backwards after a Consul restore.
                    index = if next < index { 0 } else { next };
                    delivered = true;
                    if !sender.send(snapshot).await {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!(prefix = %prefix, error = %e, "Consul watch failed, retrying");
                    index = 0;
                    tokio::select! {
                        _ = sender.cancelled() => break,
                        _ = tokio::time::sleep(RETRY_DELAY) => {}
                    }
                }
            }
        }

        tracing::debug!(prefix = %prefix, "Consul watch ended");
    }
}

#[async_trait]
impl CoordinationStore for ConsulStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let response = self
            .send(
                self.client
                    .put(self.kv_url(key))
                    .body(value.to_string())
                    .timeout(REQUEST_TIMEOUT),
            )
            .await?;
        check(response).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .send(self.client.get(self.kv_url(key)).timeout(REQUEST_TIMEOUT))
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let entries: Vec<KvEntry> = check(response)
            .await?
            .json()
            .await
            .map_err(|e| ConclaveError::Store(e.to_string()))?;
        Ok(decode_entries(entries)?.remove(key.trim_start_matches('/')))
    }

    async fn delete(&self, key: &str, recursive: bool) -> Result<()> {
        let mut builder = self.client.delete(self.kv_url(key)).timeout(REQUEST_TIMEOUT);
        if recursive {
            builder = builder.query(&[("recurse", "true")]);
        }
        check(self.send(builder).await?).await?;
        Ok(())
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        let (sender, stream) = WatchStream::channel(WATCH_BUFFER);
        tokio::spawn(self.clone().run_watch(prefix.to_string(), sender));
        Ok(stream)
    }

    async fn lock(&self, name: &str, ttl: Duration) -> Result<bool> {
        if self.sessions.lock().contains_key(name) {
            return Ok(false);
        }

        let session = self.create_session(name, ttl).await?;
        match self.acquire(name, &session, "acquire").await {
            Ok(true) => {
                self.sessions.lock().insert(name.to_string(), session);
                Ok(true)
            }
            Ok(false) => {
                self.destroy_session(&session).await?;
                Ok(false)
            }
            Err(e) => {
                if let Err(destroy) = self.destroy_session(&session).await {
                    tracing::warn!(lock = %name, error = %destroy, "Failed to destroy lock session");
                }
                Err(e)
            }
        }
    }

    async fn unlock(&self, name: &str) -> Result<()> {
        let Some(session) = self.sessions.lock().remove(name) else {
            return Ok(());
        };

        self.acquire(name, &session, "release").await?;
        self.destroy_session(&session).await
    }
}

async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ConclaveError::Store(format!(
        "Consul returned {}: {}",
        status,
        body.trim()
    )))
}

fn decode_entries(entries: Vec<KvEntry>) -> Result<KvSnapshot> {
    entries
        .into_iter()
        .map(|entry| {
            let value = match entry.value {
                Some(encoded) => {
                    let bytes = STANDARD.decode(encoded.as_bytes()).map_err(|e| {
                        ConclaveError::Serialization(format!("key '{}': {}", entry.key, e))
                    })?;
                    String::from_utf8(bytes).map_err(|e| {
                        ConclaveError::Serialization(format!("key '{}': {}", entry.key, e))
                    })?
                }
                None => String::new(),
            };
            Ok((entry.key, value))
        })
        .collect()
}
