//! Conclave node runtime.
//!
//! Wires one process together:
//! - local schedulers for the configured job groups
//! - the coordination store
//! - cluster membership and leader election, when enabled

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use conclave_core::config::ConclaveConfig;
use conclave_core::error::{ConclaveError, Result};
use conclave_core::job::{Job, JobConfig};
use conclave_core::store::CoordinationStore;
use conclave_runtime::cluster::ClusterLoader;
use conclave_runtime::scheduler::{JobRegistry, SchedulerFactory};
use conclave_runtime::store;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Prelude module for common imports.
pub mod prelude {
    pub use conclave_core::cluster::{Node, NodeId, NodeStatus};
    pub use conclave_core::config::ConclaveConfig;
    pub use conclave_core::error::{ConclaveError, Result};
    pub use conclave_core::job::{CronSchedule, Job, JobConfig, JobContext, Trigger};
    pub use conclave_runtime::scheduler::{JobRegistry, SchedulerFactory};

    pub use crate::{Conclave, ConclaveBuilder};
}

/// The Conclave node runtime.
pub struct Conclave {
    config: ConclaveConfig,
    store: Arc<dyn CoordinationStore>,
    factory: Arc<SchedulerFactory>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Conclave {
    /// Create a new builder.
    pub fn builder() -> ConclaveBuilder {
        ConclaveBuilder::new()
    }

    pub fn config(&self) -> &ConclaveConfig {
        &self.config
    }

    /// Local scheduler factory.
    pub fn factory(&self) -> Arc<SchedulerFactory> {
        self.factory.clone()
    }

    pub fn store(&self) -> Arc<dyn CoordinationStore> {
        self.store.clone()
    }

    /// Create the configured job instances.
    ///
    /// Returns how many schedulers were created.
    pub fn append_configured_jobs(&self) -> Result<usize> {
        let mut created = 0;
        for spec in &self.config.jobs {
            if !self.factory.registry().exists(&spec.group) {
                tracing::warn!(group = %spec.group, "No job type registered for configured group");
                continue;
            }
            created += self
                .factory
                .append(&spec.group, spec.count, spec.auto_start)?
                .len();
        }
        Ok(created)
    }

    /// Run the node until Ctrl-C or [`Conclave::shutdown`].
    pub async fn run(self) -> Result<()> {
        tracing::info!("Conclave runtime starting");

        let created = self.append_configured_jobs()?;
        tracing::info!(schedulers = created, "Local schedulers created");

        let loader = ClusterLoader::new(
            self.config.cluster.clone(),
            self.config.node.clone(),
            self.store.clone(),
            self.factory.clone(),
        );
        if loader.load().await? {
            tracing::info!(cluster_id = %self.config.cluster.id, "Joined cluster");
        }

        // Wait for shutdown signal
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Received shutdown signal");
            }
            _ = shutdown_rx.recv() => {
                tracing::info!("Received shutdown notification");
            }
        }

        tracing::info!("Starting graceful shutdown...");
        loader.close().await;

        if !self.factory.shutdown(SHUTDOWN_TIMEOUT).await {
            tracing::warn!("Some schedulers did not stop before the shutdown timeout");
        }

        tracing::info!("Conclave runtime stopped");
        Ok(())
    }

    /// Request shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Handle that requests shutdown from elsewhere.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }
}

/// Builder for configuring the Conclave runtime.
pub struct ConclaveBuilder {
    config: Option<ConclaveConfig>,
    job_registry: JobRegistry,
    store: Option<Arc<dyn CoordinationStore>>,
}

impl ConclaveBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            config: None,
            job_registry: JobRegistry::new(),
            store: None,
        }
    }

    /// Set the configuration.
    pub fn config(mut self, config: ConclaveConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use this store instead of the configured one.
    pub fn store(mut self, store: Arc<dyn CoordinationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Register a job type.
    pub fn job<F>(mut self, job_type: impl Into<String>, template: JobConfig, factory: F) -> Self
    where
        F: Fn(&JobConfig) -> Arc<dyn Job> + Send + Sync + 'static,
    {
        self.job_registry.register(job_type, template, factory);
        self
    }

    /// Get mutable access to the job registry.
    pub fn job_registry_mut(&mut self) -> &mut JobRegistry {
        &mut self.job_registry
    }

    /// Build the runtime.
    ///
    /// Configured `[[job]]` sections replace the template of the matching
    /// registered job type.
    pub fn build(self) -> Result<Conclave> {
        let config = self
            .config
            .ok_or_else(|| ConclaveError::Config("Configuration is required".to_string()))?;
        config.validate()?;

        let mut job_registry = self.job_registry;
        for spec in &config.jobs {
            let template = spec.to_job_config()?;
            if !job_registry.set_template(&spec.group, template) {
                tracing::warn!(group = %spec.group, "Configured job group has no registered type");
            }
        }

        let store = match self.store {
            Some(store) => store,
            None => store::connect(&config.store)?,
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Ok(Conclave {
            config,
            store,
            factory: Arc::new(SchedulerFactory::new(job_registry)),
            shutdown_tx,
        })
    }
}

impl Default for ConclaveBuilder {
    fn default() -> Self {
        Self::new()
    }
}
