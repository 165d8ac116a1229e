use std::collections::BTreeMap;
use std::sync::Arc;

use conclave_core::job::{Job, JobConfig};

/// Builds a job instance from its config.
pub type JobFactoryFn = Arc<dyn Fn(&JobConfig) -> Arc<dyn Job> + Send + Sync>;

/// Entry in the job registry.
pub struct JobEntry {
    /// Job type, also the group new instances join.
    pub job_type: String,
    /// Config cloned for every new instance.
    pub template: JobConfig,
    /// Instance constructor.
    pub factory: JobFactoryFn,
}

impl JobEntry {
    /// Build a new instance config and job.
    pub fn build(&self) -> (JobConfig, Arc<dyn Job>) {
        let mut config = self.template.clone();
        config.group = self.job_type.clone();
        config.id = String::new();
        let job = (self.factory)(&config);
        (config, job)
    }
}

/// Registry of the job types this process can run.
///
/// Application start-up code registers every type explicitly; the registered
/// types are what the node advertises as its scheduler ability.
#[derive(Clone, Default)]
pub struct JobRegistry {
    jobs: BTreeMap<String, Arc<JobEntry>>,
}

impl JobRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            jobs: BTreeMap::new(),
        }
    }

    /// Register a job type.
    pub fn register<F>(&mut self, job_type: impl Into<String>, template: JobConfig, factory: F)
    where
        F: Fn(&JobConfig) -> Arc<dyn Job> + Send + Sync + 'static,
    {
        let job_type = job_type.into();
        let mut template = template;
        template.group = job_type.clone();

        if self.jobs.contains_key(&job_type) {
            tracing::warn!(job_type = %job_type, "Job type registered twice, keeping the latest");
        }

        self.jobs.insert(
            job_type.clone(),
            Arc::new(JobEntry {
                job_type,
                template,
                factory: Arc::new(factory),
            }),
        );
    }

    /// Replace the template of a registered type, keeping its factory.
    pub fn set_template(&mut self, job_type: &str, template: JobConfig) -> bool {
        let Some(entry) = self.jobs.get(job_type) else {
            return false;
        };

        let mut template = template;
        template.group = job_type.to_string();
        let entry = Arc::new(JobEntry {
            job_type: job_type.to_string(),
            template,
            factory: entry.factory.clone(),
        });
        self.jobs.insert(job_type.to_string(), entry);
        true
    }

    /// Get a job entry by type.
    pub fn get(&self, job_type: &str) -> Option<Arc<JobEntry>> {
        self.jobs.get(job_type).cloned()
    }

    /// Check if a job type exists.
    pub fn exists(&self, job_type: &str) -> bool {
        self.jobs.contains_key(job_type)
    }

    /// All registered job types, sorted.
    pub fn job_types(&self) -> Vec<String> {
        self.jobs.keys().cloned().collect()
    }

    /// Get the number of registered job types.
    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
