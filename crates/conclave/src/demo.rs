//! Built-in job types available to the `conclave` binary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use conclave_core::job::{Job, JobConfig, JobContext};
use conclave_core::Result;
use conclave_runtime::scheduler::JobRegistry;

/// Job type name of [`EchoJob`].
pub const ECHO_JOB: &str = "echo";

/// Logs every pass. Useful for checking a deployment end to end.
#[derive(Debug, Default)]
pub struct EchoJob {
    executed: AtomicU64,
}

impl EchoJob {
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Job for EchoJob {
    async fn execute(&self, ctx: &JobContext) -> Result<()> {
        let count = self.executed.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::info!(scheduler_id = %ctx.id, group = %ctx.group, count, "echo");
        Ok(())
    }

    async fn destroy(&self, ctx: &JobContext) -> Result<()> {
        tracing::debug!(scheduler_id = %ctx.id, executed = self.executed(), "echo stopped");
        Ok(())
    }
}

/// Register the built-in job types.
pub fn register_demo_jobs(registry: &mut JobRegistry) {
    registry.register(
        ECHO_JOB,
        JobConfig::new(ECHO_JOB).with_interval(Duration::from_secs(10)),
        |_| Arc::new(EchoJob::default()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_counts_passes() {
        let job = EchoJob::default();
        let ctx = JobContext::detached("echo-1", ECHO_JOB);

        tokio_test::block_on(async {
            tokio_test::assert_ok!(job.execute(&ctx).await);
            tokio_test::assert_ok!(job.execute(&ctx).await);
        });
        assert_eq!(job.executed(), 2);
    }

    #[test]
    fn test_register_demo_jobs() {
        let mut registry = JobRegistry::new();
        register_demo_jobs(&mut registry);
        assert_eq!(registry.job_types(), vec![ECHO_JOB]);
    }
}
