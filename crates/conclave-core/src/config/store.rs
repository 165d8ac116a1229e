use serde::{Deserialize, Serialize};

/// Coordination store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend kind.
    #[serde(default)]
    pub kind: StoreKind,

    /// Store endpoint.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// ACL token sent with every request.
    pub token: Option<String>,

    /// How long one blocking watch query may wait, in seconds.
    #[serde(default = "default_watch_wait")]
    pub watch_wait_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            kind: StoreKind::default(),
            endpoint: default_endpoint(),
            token: None,
            watch_wait_secs: default_watch_wait(),
        }
    }
}

fn default_endpoint() -> String {
    "http://127.0.0.1:8500".to_string()
}

fn default_watch_wait() -> u64 {
    30
}

/// Coordination store backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// In-process store, for single-process runs and tests.
    #[default]
    Memory,

    /// Consul KV over HTTP.
    Consul,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_store_config() {
        let config = StoreConfig::default();
        assert_eq!(config.kind, StoreKind::Memory);
        assert_eq!(config.endpoint, "http://127.0.0.1:8500");
        assert!(config.token.is_none());
    }

    #[test]
    fn test_parse_consul_store() {
        let toml = r#"
            kind = "consul"
            endpoint = "http://consul:8500"
            token = "secret"
        "#;

        let config: StoreConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.kind, StoreKind::Consul);
        assert_eq!(config.token.as_deref(), Some("secret"));
        assert_eq!(config.watch_wait_secs, 30);
    }
}
