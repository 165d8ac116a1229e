//! Local scheduler engine.
//!
//! A [`Scheduler`] runs one periodic job on its own task. The
//! [`SchedulerFactory`] owns every scheduler of the process, grouped by job
//! type, and builds new instances from the [`JobRegistry`].

mod factory;
mod instance;
mod registry;

pub use conclave_core::job::Signal;
pub use factory::SchedulerFactory;
pub use instance::{Scheduler, SchedulerState};
pub use registry::{JobEntry, JobFactoryFn, JobRegistry};
