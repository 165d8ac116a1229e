use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use conclave_core::job::{Job, JobConfig, JobContext, Signal, Trigger};

/// Lifecycle state of a scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Registered, never started.
    Created,
    /// Loop is running.
    Running,
    /// Close requested, loop still finishing its pass.
    Closing,
    /// Loop has exited and `destroy` has run.
    Closed,
}

impl SchedulerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Created,
            1 => Self::Running,
            2 => Self::Closing,
            _ => Self::Closed,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Running => 1,
            Self::Closing => 2,
            Self::Closed => 3,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Before,
    Execute,
    After,
    Destroy,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Before => "before",
            Self::Execute => "execute",
            Self::After => "after",
            Self::Destroy => "destroy",
        }
    }
}

/// One periodic job instance and its own executor task.
///
/// Flags are atomics: the factory writes them, the loop and observers read
/// them, and nobody blocks the loop.
pub struct Scheduler {
    config: JobConfig,
    job: Arc<dyn Job>,
    state: AtomicU8,
    close: Arc<AtomicBool>,
    remove: AtomicBool,
    passes: Arc<AtomicU64>,
    signal: Signal,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    /// Create a scheduler. The config must carry its final id.
    pub fn new(config: JobConfig, job: Arc<dyn Job>) -> Arc<Self> {
        Arc::new(Self {
            config,
            job,
            state: AtomicU8::new(SchedulerState::Created.as_u8()),
            close: Arc::new(AtomicBool::new(false)),
            remove: AtomicBool::new(false),
            passes: Arc::new(AtomicU64::new(0)),
            signal: Signal::new(),
            handle: Mutex::new(None),
        })
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    pub fn group(&self) -> &str {
        &self.config.group
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    /// Running or finishing its last pass.
    pub fn is_started(&self) -> bool {
        matches!(
            self.state(),
            SchedulerState::Running | SchedulerState::Closing
        )
    }

    /// Whether a close has been requested and not yet cleared by a restart.
    pub fn is_close_requested(&self) -> bool {
        self.close.load(Ordering::SeqCst)
    }

    /// True only once the loop has fully exited.
    pub fn is_closed(&self) -> bool {
        self.state() == SchedulerState::Closed
    }

    /// Whether the scheduler was removed from its group.
    pub fn is_remove(&self) -> bool {
        self.remove.load(Ordering::SeqCst)
    }

    /// Completed passes since creation.
    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::SeqCst)
    }

    /// Wake the loop if it is parked.
    pub fn notify(&self) {
        self.signal.notify();
    }

    /// Start the loop. Only `Created` and `Closed` schedulers start.
    pub fn start(self: &Arc<Self>) -> bool {
        if self.is_remove() {
            return false;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(scheduler_id = %self.id(), "Cannot start scheduler outside a tokio runtime");
            return false;
        };

        let from = self.state();
        if !matches!(from, SchedulerState::Created | SchedulerState::Closed) {
            return false;
        }

        // Reset before publishing `Running`; a close racing this start must
        // survive it.
        self.close.store(false, Ordering::SeqCst);
        self.signal.drain();

        let started = self
            .state
            .compare_exchange(
                from.as_u8(),
                SchedulerState::Running.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if !started {
            return false;
        }

        let this = self.clone();
        let handle = runtime.spawn(async move { this.run().await });
        *self.handle.lock() = Some(handle);

        tracing::debug!(scheduler_id = %self.id(), group = %self.group(), "Scheduler started");
        true
    }

    /// Request a cooperative close.
    ///
    /// The loop observes the flag before its next pass, so an in-flight
    /// `execute`/`after` always completes. Returns true when this call moved
    /// a running scheduler to `Closing`.
    pub fn close(&self) -> bool {
        self.close.store(true, Ordering::SeqCst);

        let moved = self
            .state
            .compare_exchange(
                SchedulerState::Running.as_u8(),
                SchedulerState::Closing.as_u8(),
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok();

        if moved {
            self.signal.notify();
            tracing::debug!(scheduler_id = %self.id(), "Scheduler close requested");
        }
        moved
    }

    /// Mark as removed. Only closed schedulers can be removed.
    pub(crate) fn mark_removed(&self) -> bool {
        if !self.is_closed() {
            return false;
        }
        !self.remove.swap(true, Ordering::SeqCst)
    }

    /// Wait for the current loop to exit, up to `timeout`.
    ///
    /// Returns false on timeout.
    pub async fn join(&self, timeout: Duration) -> bool {
        let handle = self.handle.lock().take();
        let Some(handle) = handle else {
            return true;
        };

        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                tracing::error!(scheduler_id = %self.id(), error = %e, "Scheduler task failed");
                true
            }
            Err(_) => false,
        }
    }

    fn context(&self) -> JobContext {
        JobContext::new(
            self.config.id.clone(),
            self.config.group.clone(),
            self.config.name.clone(),
            self.signal.clone(),
            self.close.clone(),
            self.passes.clone(),
        )
    }

    async fn run(self: Arc<Self>) {
        let ctx = self.context();
        let bracket_once = self.config.before_after_only;

        if !self.config.delay.is_zero() {
            ctx.wait(self.config.delay).await;
        }

        if bracket_once {
            self.invoke(Phase::Before, &ctx).await;
        }

        // Cron passes run on fire times only, including the first one.
        if matches!(self.config.trigger, Trigger::Cron(_))
            && !self.is_close_requested()
            && !self.wait_for_trigger(&ctx).await
        {
            self.finish(&ctx, bracket_once, 0).await;
            return;
        }

        let mut passes = 0u64;
        loop {
            if self.is_close_requested() {
                break;
            }

            if !bracket_once {
                self.invoke(Phase::Before, &ctx).await;
            }
            self.invoke(Phase::Execute, &ctx).await;
            if !bracket_once {
                self.invoke(Phase::After, &ctx).await;
            }

            passes += 1;
            self.passes.fetch_add(1, Ordering::SeqCst);

            if self.config.is_bounded() && passes >= self.config.run_number_of_times {
                break;
            }
            if self.is_close_requested() {
                break;
            }

            if !self.wait_for_trigger(&ctx).await {
                break;
            }
        }

        self.finish(&ctx, bracket_once, passes).await;
    }

    /// Park until the trigger's next fire time. False when there is none.
    async fn wait_for_trigger(&self, ctx: &JobContext) -> bool {
        match self.config.trigger.next_wait(Utc::now()) {
            Some(wait) => {
                ctx.wait(wait).await;
                true
            }
            None => {
                tracing::warn!(scheduler_id = %self.id(), "Trigger has no upcoming fire time");
                false
            }
        }
    }

    async fn finish(&self, ctx: &JobContext, bracket_once: bool, passes: u64) {
        if bracket_once {
            self.invoke(Phase::After, ctx).await;
        }
        self.invoke(Phase::Destroy, ctx).await;

        tracing::debug!(scheduler_id = %self.id(), passes, "Scheduler closed");
        self.state
            .store(SchedulerState::Closed.as_u8(), Ordering::SeqCst);
    }

    async fn invoke(&self, phase: Phase, ctx: &JobContext) {
        let job = &self.job;
        let fut = async {
            match phase {
                Phase::Before => job.before(ctx).await,
                Phase::Execute => job.execute(ctx).await,
                Phase::After => job.after(ctx).await,
                Phase::Destroy => job.destroy(ctx).await,
            }
        };

        match AssertUnwindSafe(fut).catch_unwind().await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(
                    scheduler_id = %self.id(),
                    group = %self.group(),
                    phase = phase.as_str(),
                    error = %e,
                    "Scheduler phase failed"
                );
            }
            Err(_) => {
                tracing::error!(
                    scheduler_id = %self.id(),
                    group = %self.group(),
                    phase = phase.as_str(),
                    "Scheduler phase panicked"
                );
            }
        }
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("id", &self.config.id)
            .field("group", &self.config.group)
            .field("state", &self.state())
            .field("remove", &self.is_remove())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use conclave_core::job::CronSchedule;
    use conclave_core::ConclaveError;
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct Counting {
        before: AtomicUsize,
        execute: AtomicUsize,
        after: AtomicUsize,
        destroy: AtomicUsize,
    }

    #[async_trait]
    impl Job for Counting {
        async fn before(&self, _ctx: &JobContext) -> conclave_core::Result<()> {
            self.before.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn execute(&self, _ctx: &JobContext) -> conclave_core::Result<()> {
            self.execute.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn after(&self, _ctx: &JobContext) -> conclave_core::Result<()> {
            self.after.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn destroy(&self, _ctx: &JobContext) -> conclave_core::Result<()> {
            self.destroy.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Holds `execute` until released, to observe close mid-pass.
    struct Gate {
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
        finished: AtomicBool,
    }

    #[async_trait]
    impl Job for Gate {
        async fn execute(&self, _ctx: &JobContext) -> conclave_core::Result<()> {
            self.entered.notify_one();
            self.release.notified().await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Job for Failing {
        async fn execute(&self, _ctx: &JobContext) -> conclave_core::Result<()> {
            Err(ConclaveError::Internal("boom".into()))
        }
    }

    struct Panicking;

    #[async_trait]
    impl Job for Panicking {
        async fn execute(&self, _ctx: &JobContext) -> conclave_core::Result<()> {
            panic!("job bug");
        }
    }

    fn config(id: &str) -> JobConfig {
        JobConfig::new("test")
            .with_id(id)
            .with_interval(Duration::from_millis(5))
    }

    async fn wait_closed(scheduler: &Scheduler) {
        for _ in 0..400 {
            if scheduler.is_closed() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("scheduler {} did not close", scheduler.id());
    }

    #[tokio::test]
    async fn test_bounded_run_brackets_every_pass() {
        let job = Arc::new(Counting::default());
        let scheduler = Scheduler::new(config("a").run_number_of_times(3), job.clone());

        assert!(scheduler.start());
        wait_closed(&scheduler).await;

        assert_eq!(job.before.load(Ordering::SeqCst), 3);
        assert_eq!(job.execute.load(Ordering::SeqCst), 3);
        assert_eq!(job.after.load(Ordering::SeqCst), 3);
        assert_eq!(job.destroy.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.passes(), 3);
    }

    #[tokio::test]
    async fn test_before_after_only_brackets_loop_once() {
        let job = Arc::new(Counting::default());
        let scheduler = Scheduler::new(
            config("a").run_number_of_times(4).before_after_only(true),
            job.clone(),
        );

        assert!(scheduler.start());
        wait_closed(&scheduler).await;

        assert_eq!(job.before.load(Ordering::SeqCst), 1);
        assert_eq!(job.execute.load(Ordering::SeqCst), 4);
        assert_eq!(job.after.load(Ordering::SeqCst), 1);
        assert_eq!(job.destroy.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_waits_for_in_flight_execute() {
        let job = Arc::new(Gate {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            finished: AtomicBool::new(false),
        });
        let scheduler = Scheduler::new(config("gate"), job.clone());

        assert!(scheduler.start());
        job.entered.notified().await;

        assert!(scheduler.close());
        // Second close is a no-op on the state machine.
        assert!(!scheduler.close());
        assert_eq!(scheduler.state(), SchedulerState::Closing);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!scheduler.is_closed());
        assert!(!job.finished.load(Ordering::SeqCst));

        job.release.notify_one();
        wait_closed(&scheduler).await;
        assert!(job.finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_restart_after_close() {
        let job = Arc::new(Counting::default());
        let scheduler = Scheduler::new(config("a"), job.clone());

        assert!(scheduler.start());
        assert!(!scheduler.start());
        scheduler.close();
        wait_closed(&scheduler).await;

        assert!(scheduler.start());
        assert!(scheduler.is_started());
        assert!(!scheduler.is_close_requested());
        scheduler.close();
        wait_closed(&scheduler).await;

        assert_eq!(job.destroy.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_errors_and_panics_stay_inside_the_loop() {
        let failing = Scheduler::new(config("f").run_number_of_times(3), Arc::new(Failing));
        let panicking = Scheduler::new(config("p").run_number_of_times(3), Arc::new(Panicking));

        assert!(failing.start());
        assert!(panicking.start());
        wait_closed(&failing).await;
        wait_closed(&panicking).await;

        assert_eq!(failing.passes(), 3);
        assert_eq!(panicking.passes(), 3);
    }

    #[tokio::test]
    async fn test_notify_cuts_interval_short() {
        let job = Arc::new(Counting::default());
        let scheduler = Scheduler::new(
            JobConfig::new("slow")
                .with_id("slow")
                .with_interval(Duration::from_secs(60))
                .run_number_of_times(2),
            job.clone(),
        );

        assert!(scheduler.start());
        while job.execute.load(Ordering::SeqCst) < 1 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        scheduler.notify();
        assert!(scheduler.join(Duration::from_secs(5)).await);
        assert_eq!(job.execute.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_only_closed_schedulers_are_removable() {
        let scheduler = Scheduler::new(config("a"), Arc::new(Counting::default()));
        assert!(!scheduler.mark_removed());

        scheduler.start();
        scheduler.close();
        wait_closed(&scheduler).await;

        assert!(scheduler.mark_removed());
        assert!(scheduler.is_remove());
        assert!(!scheduler.start());
    }

    #[tokio::test]
    async fn test_close_right_after_start_is_not_lost() {
        let job = Arc::new(Counting::default());
        let scheduler = Scheduler::new(config("a"), job.clone());

        for round in 1..=50 {
            assert!(scheduler.start());
            assert!(scheduler.close());
            assert!(scheduler.is_close_requested());
            wait_closed(&scheduler).await;
            assert_eq!(job.destroy.load(Ordering::SeqCst), round);
        }
    }

    #[tokio::test]
    async fn test_start_while_closing_keeps_close_request() {
        let job = Arc::new(Gate {
            entered: tokio::sync::Notify::new(),
            release: tokio::sync::Notify::new(),
            finished: AtomicBool::new(false),
        });
        let scheduler = Scheduler::new(config("g"), job.clone());

        assert!(scheduler.start());
        job.entered.notified().await;
        assert!(scheduler.close());

        assert!(!scheduler.start());
        assert!(scheduler.is_close_requested());

        job.release.notify_one();
        wait_closed(&scheduler).await;
    }

    #[tokio::test]
    async fn test_cron_waits_for_first_fire_time() {
        let job = Arc::new(Counting::default());
        let yearly = CronSchedule::new("0 0 0 1 1 *").unwrap();
        let scheduler = Scheduler::new(
            JobConfig::new("cron").with_id("cron").with_cron(yearly),
            job.clone(),
        );

        assert!(scheduler.start());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(job.execute.load(Ordering::SeqCst), 0);
        assert_eq!(scheduler.passes(), 0);

        assert!(scheduler.close());
        wait_closed(&scheduler).await;
        assert_eq!(job.execute.load(Ordering::SeqCst), 0);
        assert_eq!(job.destroy.load(Ordering::SeqCst), 1);
    }
}
