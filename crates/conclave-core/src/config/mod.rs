mod cluster;
mod logging;
mod store;

pub use cluster::{ClusterConfig, ClusterTimings};
pub use logging::{LogFormat, LoggingConfig};
pub use store::{StoreConfig, StoreKind};

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::cluster::NodeId;
use crate::error::{ConclaveError, Result};
use crate::job::{CronSchedule, JobConfig};

/// Root configuration for Conclave.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConclaveConfig {
    /// Cluster configuration.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Node configuration.
    #[serde(default)]
    pub node: NodeConfig,

    /// Coordination store configuration.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Job groups to load at start-up.
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobSpec>,
}

impl ConclaveConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConclaveError::Config(format!("Failed to read config file: {}", e)))?;

        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse_toml(content: &str) -> Result<Self> {
        // Substitute environment variables
        let content = substitute_env_vars(content);

        let config: Self = toml::from_str(&content)
            .map_err(|e| ConclaveError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.cluster.enabled && self.cluster.id.trim().is_empty() {
            return Err(ConclaveError::Config(
                "cluster.id must be set when the cluster is enabled".to_string(),
            ));
        }
        if self.cluster.enabled && self.node.id_template.trim().is_empty() {
            return Err(ConclaveError::Config(
                "node.id_template must not be empty".to_string(),
            ));
        }
        for job in &self.jobs {
            job.to_job_config()?;
        }
        Ok(())
    }
}

/// Node identity configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node id template. `{host}` and `{pid}` are substituted.
    #[serde(default = "default_id_template")]
    pub id_template: String,

    /// Network address override. Defaults to the host name.
    pub host: Option<String>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id_template: default_id_template(),
            host: None,
        }
    }
}

impl NodeConfig {
    /// The configured address, or the machine's host name.
    pub fn resolve_host(&self) -> String {
        if let Some(host) = self.host.as_ref().filter(|h| !h.is_empty()) {
            return host.clone();
        }
        hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string())
    }

    /// Node id for the given address.
    pub fn node_id(&self, host: &str) -> NodeId {
        NodeId::from_template(&self.id_template, host)
    }
}

fn default_id_template() -> String {
    "node-{host}".to_string()
}

/// A job group declared in configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Group name, also the registered job type.
    pub group: String,

    /// Instances to create.
    #[serde(default = "default_count")]
    pub count: usize,

    /// Fixed interval between passes, in milliseconds.
    pub interval_ms: Option<u64>,

    /// Cron expression, as an alternative to `interval_ms`.
    pub cron: Option<String>,

    /// Timezone for `cron`.
    pub timezone: Option<String>,

    /// Pause before the first pass, in milliseconds.
    #[serde(default)]
    pub delay_ms: u64,

    /// Whether shutdown skips waiting for these instances.
    #[serde(default)]
    pub daemon: bool,

    /// Run before/after once around the loop.
    #[serde(default)]
    pub before_after_only: bool,

    /// Bounded pass count, zero for unbounded.
    #[serde(default)]
    pub run_number_of_times: u64,

    /// Start the instances right away.
    #[serde(default = "default_auto_start")]
    pub auto_start: bool,
}

fn default_count() -> usize {
    1
}

fn default_auto_start() -> bool {
    true
}

impl JobSpec {
    /// Build the template config for this group.
    pub fn to_job_config(&self) -> Result<JobConfig> {
        if self.group.trim().is_empty() {
            return Err(ConclaveError::Config("job.group must not be empty".to_string()));
        }

        let mut config = JobConfig::new(&self.group)
            .with_delay(Duration::from_millis(self.delay_ms))
            .daemon(self.daemon)
            .before_after_only(self.before_after_only)
            .run_number_of_times(self.run_number_of_times);

        config = match (&self.interval_ms, &self.cron) {
            (Some(_), Some(_)) => {
                return Err(ConclaveError::Config(format!(
                    "job '{}' sets both interval_ms and cron",
                    self.group
                )))
            }
            (Some(ms), None) => config.with_interval(Duration::from_millis(*ms)),
            (None, Some(expr)) => {
                let mut schedule = CronSchedule::new(expr)
                    .map_err(|e| ConclaveError::Config(format!("job '{}': {}", self.group, e)))?;
                if let Some(tz) = &self.timezone {
                    schedule = schedule.with_timezone(tz).map_err(|e| {
                        ConclaveError::Config(format!("job '{}': {}", self.group, e))
                    })?;
                }
                config.with_cron(schedule)
            }
            (None, None) => config,
        };

        Ok(config)
    }
}

/// Substitute environment variables in the format ${VAR_NAME}.
fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    let Ok(re) = regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}") else {
        return result;
    };

    for cap in re.captures_iter(content) {
        let var_name = &cap[1];
        if let Ok(value) = std::env::var(var_name) {
            result = result.replace(&cap[0], &value);
        }
    }

    result
}
