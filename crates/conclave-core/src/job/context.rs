use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::signal::Signal;

/// Context handed to every job hook.
#[derive(Clone)]
pub struct JobContext {
    /// Scheduler instance id.
    pub id: String,
    /// Group the instance belongs to.
    pub group: String,
    /// Display name.
    pub name: String,
    signal: Signal,
    close: Arc<AtomicBool>,
    passes: Arc<AtomicU64>,
}

impl JobContext {
    /// Create a new job context.
    pub fn new(
        id: impl Into<String>,
        group: impl Into<String>,
        name: impl Into<String>,
        signal: Signal,
        close: Arc<AtomicBool>,
        passes: Arc<AtomicU64>,
    ) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
            name: name.into(),
            signal,
            close,
            passes,
        }
    }

    /// Detached context for driving a job by hand.
    pub fn detached(id: impl Into<String>, group: impl Into<String>) -> Self {
        let group = group.into();
        Self::new(
            id,
            group.clone(),
            group,
            Signal::new(),
            Arc::new(AtomicBool::new(false)),
            Arc::new(AtomicU64::new(0)),
        )
    }

    /// Park this scheduler for up to `timeout`.
    ///
    /// Returns true when another thread woke it through `notify`.
    pub async fn wait(&self, timeout: Duration) -> bool {
        self.signal.wait(timeout).await
    }

    /// Wake this scheduler if it is parked.
    pub fn notify(&self) {
        self.signal.notify();
    }

    /// Whether a close has been requested. Long-running hooks may poll this.
    pub fn is_close_requested(&self) -> bool {
        self.close.load(Ordering::SeqCst)
    }

    /// Completed passes so far.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_context_shares_close_flag() {
        let close = Arc::new(AtomicBool::new(false));
        let ctx = JobContext::new(
            "report-0",
            "report",
            "nightly report",
            Signal::new(),
            close.clone(),
            Arc::new(AtomicU64::new(2)),
        );

        assert!(!ctx.is_close_requested());
        close.store(true, Ordering::SeqCst);
        assert!(ctx.is_close_requested());
        assert_eq!(ctx.passes(), 2);
        assert_eq!(ctx.name, "nightly report");
    }

    #[tokio::test]
    async fn test_notify_through_context() {
        let ctx = JobContext::detached("a-0", "a");
        ctx.notify();
        assert!(ctx.wait(Duration::from_millis(10)).await);
    }
}
