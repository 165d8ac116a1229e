use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use conclave_core::cluster::WorkerDescriptor;
use conclave_core::job::{Job, JobConfig};
use conclave_core::{ConclaveError, Result};

use super::instance::Scheduler;
use super::registry::JobRegistry;

/// Owns every local scheduler, grouped by name.
///
/// All operations are safe to call concurrently. Operations on unknown ids
/// or in the wrong state are rejected with `false` rather than an error.
pub struct SchedulerFactory {
    registry: JobRegistry,
    groups: RwLock<BTreeMap<String, Vec<Arc<Scheduler>>>>,
    sequence: AtomicU64,
}

impl SchedulerFactory {
    /// Create a factory for the given job types.
    pub fn new(registry: JobRegistry) -> Self {
        Self {
            registry,
            groups: RwLock::new(BTreeMap::new()),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Register an application-built instance.
    ///
    /// An empty config id is replaced by `{group}-{n}`.
    pub fn submit(
        &self,
        mut config: JobConfig,
        job: Arc<dyn Job>,
        auto_start: bool,
    ) -> Result<Arc<Scheduler>> {
        if config.group.trim().is_empty() {
            return Err(ConclaveError::InvalidArgument(
                "scheduler group must not be empty".to_string(),
            ));
        }

        let scheduler = {
            let mut groups = self.groups.write();

            if config.id.is_empty() {
                config.id = self.next_id(&config.group, &groups);
            } else if find(&groups, &config.id).is_some() {
                return Err(ConclaveError::InvalidArgument(format!(
                    "scheduler '{}' already exists",
                    config.id
                )));
            }

            let scheduler = Scheduler::new(config, job);
            groups
                .entry(scheduler.group().to_string())
                .or_default()
                .push(scheduler.clone());
            scheduler
        };

        tracing::debug!(
            scheduler_id = %scheduler.id(),
            group = %scheduler.group(),
            "Scheduler registered"
        );

        if auto_start {
            scheduler.start();
        }
        Ok(scheduler)
    }

    /// Build `count` new instances of a registered job type.
    ///
    /// Returns the new scheduler ids.
    pub fn append(&self, group: &str, count: usize, auto_start: bool) -> Result<Vec<String>> {
        let Some(entry) = self.registry.get(group) else {
            tracing::warn!(group = %group, "Cannot append to an unregistered job type");
            return Err(ConclaveError::NotFound(format!("job type '{}'", group)));
        };

        let mut ids = Vec::with_capacity(count);
        for _ in 0..count {
            let (config, job) = entry.build();
            let scheduler = self.submit(config, job, auto_start)?;
            ids.push(scheduler.id().to_string());
        }

        tracing::info!(group = %group, count, "Schedulers appended");
        Ok(ids)
    }

    /// Start one scheduler.
    pub fn start(&self, id: &str) -> bool {
        match self.scheduler(id) {
            Some(scheduler) => scheduler.start(),
            None => {
                tracing::warn!(scheduler_id = %id, "Cannot start unknown scheduler");
                false
            }
        }
    }

    /// Start every scheduler of a group. Returns how many started.
    pub fn start_group(&self, group: &str) -> usize {
        self.group(group).iter().filter(|s| s.start()).count()
    }

    /// Start every scheduler. Returns how many started.
    pub fn start_all(&self) -> usize {
        self.all().iter().filter(|s| s.start()).count()
    }

    /// Request close of one scheduler.
    pub fn close(&self, id: &str) -> bool {
        match self.scheduler(id) {
            Some(scheduler) => scheduler.close(),
            None => {
                tracing::warn!(scheduler_id = %id, "Cannot close unknown scheduler");
                false
            }
        }
    }

    /// Request close of every scheduler of a group. Returns how many were
    /// running.
    pub fn close_group(&self, group: &str) -> usize {
        self.group(group).iter().filter(|s| s.close()).count()
    }

    /// Request close of every scheduler. Returns how many were running.
    pub fn close_all(&self) -> usize {
        self.all().iter().filter(|s| s.close()).count()
    }

    /// Remove a closed scheduler from its group.
    ///
    /// Refused while the scheduler is not yet closed and when it is the
    /// last member of its group.
    pub fn remove_scheduler(&self, id: &str) -> bool {
        let mut groups = self.groups.write();

        let Some((group, index)) = find(&groups, id) else {
            tracing::warn!(scheduler_id = %id, "Cannot remove unknown scheduler");
            return false;
        };

        let Some(members) = groups.get_mut(&group) else {
            return false;
        };

        if members.len() <= 1 {
            tracing::warn!(scheduler_id = %id, group = %group, "Refusing to remove last scheduler of group");
            return false;
        }

        if !members[index].mark_removed() {
            tracing::warn!(scheduler_id = %id, "Cannot remove a scheduler that is not closed");
            return false;
        }

        members.remove(index);
        tracing::info!(scheduler_id = %id, group = %group, "Scheduler removed");
        true
    }

    /// Remove every closed scheduler of a group, keeping at least one.
    /// Returns how many were removed.
    pub fn remove_group(&self, group: &str) -> usize {
        let mut groups = self.groups.write();
        let Some(members) = groups.get_mut(group) else {
            tracing::warn!(group = %group, "Cannot remove unknown group");
            return 0;
        };

        let mut removed = 0;
        let mut index = 0;
        while index < members.len() {
            if members.len() > 1 && members[index].mark_removed() {
                members.remove(index);
                removed += 1;
            } else {
                index += 1;
            }
        }

        if removed > 0 {
            tracing::info!(group = %group, removed, "Group schedulers removed");
        }
        removed
    }

    /// Number of running or closing schedulers.
    pub fn started_size(&self) -> usize {
        self.all().iter().filter(|s| s.is_started()).count()
    }

    /// Number of schedulers not currently running.
    pub fn stopped_size(&self) -> usize {
        self.all().iter().filter(|s| !s.is_started()).count()
    }

    pub fn group_size(&self, group: &str) -> usize {
        self.groups.read().get(group).map_or(0, Vec::len)
    }

    pub fn scheduler(&self, id: &str) -> Option<Arc<Scheduler>> {
        self.groups
            .read()
            .values()
            .flatten()
            .find(|s| s.id() == id)
            .cloned()
    }

    pub fn group(&self, group: &str) -> Vec<Arc<Scheduler>> {
        self.groups.read().get(group).cloned().unwrap_or_default()
    }

    /// Names of every non-empty group.
    pub fn groups(&self) -> Vec<String> {
        self.groups
            .read()
            .iter()
            .filter(|(_, members)| !members.is_empty())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether a scheduler has fully stopped. Unknown ids report false.
    pub fn is_closed(&self, id: &str) -> bool {
        self.scheduler(id).is_some_and(|s| s.is_closed())
    }

    /// Wake a parked scheduler.
    pub fn notify(&self, id: &str) -> bool {
        match self.scheduler(id) {
            Some(scheduler) => {
                scheduler.notify();
                true
            }
            None => false,
        }
    }

    /// Descriptors of every instance built from a registered job type.
    pub fn workers(&self) -> Vec<WorkerDescriptor> {
        self.groups
            .read()
            .iter()
            .filter(|(group, _)| self.registry.exists(group))
            .flat_map(|(group, members)| {
                members
                    .iter()
                    .map(move |s| WorkerDescriptor::new(group.clone(), s.id()))
            })
            .collect()
    }

    /// Close everything and wait for non-daemon schedulers to stop.
    ///
    /// Returns false if any of them outlived `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        let closing = self.close_all();
        tracing::info!(closing, "Shutting down schedulers");

        let mut clean = true;
        for scheduler in self.all().into_iter().filter(|s| !s.config().daemon) {
            if !scheduler.join(timeout).await {
                tracing::warn!(scheduler_id = %scheduler.id(), "Scheduler did not stop in time");
                clean = false;
            }
        }
        clean
    }

    fn all(&self) -> Vec<Arc<Scheduler>> {
        self.groups.read().values().flatten().cloned().collect()
    }

    fn next_id(&self, group: &str, groups: &BTreeMap<String, Vec<Arc<Scheduler>>>) -> String {
        loop {
            let n = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
            let id = format!("{}-{}", group, n);
            if find(groups, &id).is_none() {
                return id;
            }
        }
    }
}

fn find(groups: &BTreeMap<String, Vec<Arc<Scheduler>>>, id: &str) -> Option<(String, usize)> {
    groups.iter().find_map(|(group, members)| {
        members
            .iter()
            .position(|s| s.id() == id)
            .map(|index| (group.clone(), index))
    })
}
