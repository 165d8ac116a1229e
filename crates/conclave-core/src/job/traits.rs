use async_trait::async_trait;

use super::context::JobContext;
use crate::Result;

/// Hooks of a periodic job.
///
/// A scheduler drives them as `before → execute* → after → destroy`. Errors
/// are logged at the scheduler's loop boundary and never stop the loop.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    /// Runs before the pass (or once before the loop with
    /// `before_after_only`).
    async fn before(&self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// One pass of work.
    async fn execute(&self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// Runs after the pass (or once after the loop with `before_after_only`).
    async fn after(&self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }

    /// Runs once when the scheduler stops.
    async fn destroy(&self, _ctx: &JobContext) -> Result<()> {
        Ok(())
    }
}
