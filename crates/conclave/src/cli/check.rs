use anyhow::Result;
use clap::Parser;
use console::style;

use conclave::conclave_core::config::ConclaveConfig;
use conclave::conclave_runtime::scheduler::JobRegistry;
use conclave::demo::register_demo_jobs;

/// Validate a configuration file without starting a node.
#[derive(Parser)]
pub struct CheckCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "conclave.toml")]
    pub config: String,
}

impl CheckCommand {
    /// Execute the check command.
    pub async fn execute(self) -> Result<()> {
        let _ = dotenvy::dotenv();

        let config = ConclaveConfig::from_file(&self.config)?;
        let mut registry = JobRegistry::new();
        register_demo_jobs(&mut registry);

        let unknown = unknown_groups(&config, &registry);

        let host = config.node.resolve_host();
        println!("  {} {}", style("config").bold(), self.config);
        println!(
            "  {} {} ({})",
            style("cluster").bold(),
            config.cluster.id,
            if config.cluster.enabled { "enabled" } else { "disabled" }
        );
        println!("  {} {}", style("node").bold(), config.node.node_id(&host));
        println!("  {} {:?}", style("store").bold(), config.store.kind);
        for job in &config.jobs {
            println!("  {} {} x{}", style("job").bold(), job.group, job.count);
        }

        if !unknown.is_empty() {
            anyhow::bail!("No job type registered for: {}", unknown.join(", "));
        }

        println!("  {} configuration is valid", style("ok").green().bold());
        Ok(())
    }
}

/// Configured groups with no registered job type.
fn unknown_groups(config: &ConclaveConfig, registry: &JobRegistry) -> Vec<String> {
    config
        .jobs
        .iter()
        .filter(|job| !registry.exists(&job.group))
        .map(|job| job.group.clone())
        .collect()
}
