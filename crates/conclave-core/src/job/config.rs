use std::time::Duration;

use chrono::{DateTime, Utc};

use super::schedule::CronSchedule;

/// When a scheduler runs its next pass.
#[derive(Debug, Clone)]
pub enum Trigger {
    /// Fixed pause between passes.
    Interval(Duration),
    /// Next fire time of a cron expression.
    Cron(CronSchedule),
}

impl Trigger {
    /// How long to wait before the next pass. `None` when a cron schedule has
    /// no upcoming fire time.
    pub fn next_wait(&self, now: DateTime<Utc>) -> Option<Duration> {
        match self {
            Self::Interval(interval) => Some(*interval),
            Self::Cron(schedule) => {
                let next = schedule.next_after(now)?;
                Some((next - now).to_std().unwrap_or(Duration::ZERO))
            }
        }
    }
}

impl Default for Trigger {
    fn default() -> Self {
        Self::Interval(Duration::from_secs(1))
    }
}

/// Configuration of one periodic job instance.
#[derive(Debug, Clone)]
pub struct JobConfig {
    /// Group the instance belongs to.
    pub group: String,
    /// Instance id, assigned by the factory when empty.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Pass cadence.
    pub trigger: Trigger,
    /// Pause before the first pass.
    pub delay: Duration,
    /// Daemon schedulers are not awaited on factory shutdown.
    pub daemon: bool,
    /// Run `before`/`after` once around the whole loop instead of around
    /// every pass.
    pub before_after_only: bool,
    /// Stop after this many passes. Zero runs until closed.
    pub run_number_of_times: u64,
}

impl JobConfig {
    /// Create a config for a group with default settings.
    pub fn new(group: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            name: group.clone(),
            group,
            id: String::new(),
            trigger: Trigger::default(),
            delay: Duration::ZERO,
            daemon: false,
            before_after_only: false,
            run_number_of_times: 0,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.trigger = Trigger::Interval(interval);
        self
    }

    pub fn with_cron(mut self, schedule: CronSchedule) -> Self {
        self.trigger = Trigger::Cron(schedule);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    pub fn before_after_only(mut self, before_after_only: bool) -> Self {
        self.before_after_only = before_after_only;
        self
    }

    pub fn run_number_of_times(mut self, times: u64) -> Self {
        self.run_number_of_times = times;
        self
    }

    /// Whether the pass count is bounded.
    pub fn is_bounded(&self) -> bool {
        self.run_number_of_times > 0
    }
}
