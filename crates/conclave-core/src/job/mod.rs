mod config;
mod context;
mod schedule;
mod signal;
mod traits;

pub use config::{JobConfig, Trigger};
pub use context::JobContext;
pub use schedule::{CronParseError, CronSchedule};
pub use signal::Signal;
pub use traits::Job;
