use anyhow::Result;
use clap::Parser;
use console::style;
use tracing::info;
use tracing_subscriber::EnvFilter;

use conclave::conclave_core::config::{ConclaveConfig, LogFormat, LoggingConfig};
use conclave::demo::register_demo_jobs;
use conclave::Conclave;

/// Run a Conclave node.
#[derive(Parser)]
pub struct RunCommand {
    /// Configuration file path.
    #[arg(short, long, default_value = "conclave.toml")]
    pub config: String,

    /// Node id template (overrides config).
    #[arg(long)]
    pub node_id: Option<String>,

    /// Enable development mode (verbose logging).
    #[arg(long)]
    pub dev: bool,
}

impl RunCommand {
    /// Execute the run command.
    pub async fn execute(self) -> Result<()> {
        // Pick up a local .env before the config substitutes ${VARS}
        let _ = dotenvy::dotenv();

        let config_path = std::path::Path::new(&self.config);
        if !config_path.exists() {
            anyhow::bail!(
                "Configuration file not found: {}\nRun `conclave check` against a config file first.",
                self.config
            );
        }

        let mut config = ConclaveConfig::from_file(&self.config)?;
        if let Some(template) = &self.node_id {
            config.node.id_template = template.clone();
        }

        init_tracing(&config.logging, self.dev);
        info!("Loaded configuration from {}", self.config);

        println!();
        println!(
            "  {} v{}",
            style("CONCLAVE").bold().cyan(),
            env!("CARGO_PKG_VERSION")
        );
        if config.cluster.enabled {
            println!(
                "  {} cluster {} via {:?} store",
                style("»").bold(),
                style(&config.cluster.id).cyan(),
                config.store.kind
            );
        } else {
            println!("  {} cluster disabled, local schedulers only", style("»").bold());
        }
        if self.dev {
            println!("  {} Development mode enabled", style("»").bold());
        }
        println!();

        let mut builder = Conclave::builder().config(config);
        register_demo_jobs(builder.job_registry_mut());
        let conclave = builder.build()?;

        // Blocks until shutdown
        conclave.run().await?;

        println!("\n  {} Stopped.", style("»").bold());
        Ok(())
    }
}

/// `RUST_LOG` wins over the configured level.
fn init_tracing(logging: &LoggingConfig, dev: bool) {
    let level = if dev { "debug" } else { logging.level.as_str() };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match logging.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
        LogFormat::Pretty => tracing_subscriber::fmt().with_env_filter(filter).init(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_command_defaults() {
        let cmd = RunCommand::try_parse_from(["run"]).unwrap();
        assert_eq!(cmd.config, "conclave.toml");
        assert!(cmd.node_id.is_none());
        assert!(!cmd.dev);
    }

    #[test]
    fn test_run_command_with_overrides() {
        let cmd =
            RunCommand::try_parse_from(["run", "-c", "custom.toml", "--node-id", "n-{pid}", "--dev"])
                .unwrap();
        assert_eq!(cmd.config, "custom.toml");
        assert_eq!(cmd.node_id.as_deref(), Some("n-{pid}"));
        assert!(cmd.dev);
    }

    #[tokio::test]
    async fn test_missing_config_fails() {
        let cmd = RunCommand::try_parse_from(["run", "-c", "/nonexistent/conclave.toml"]).unwrap();
        let err = cmd.execute().await.unwrap_err();
        assert!(err.to_string().contains("Configuration file not found"));
    }
}
