//! The job registry: a read-only catalog of job definitions.
//!
//! Jobs are registered during initialization and looked up by name at
//! trigger time. Uniqueness of job names across the registry and of step
//! names within a job is enforced at registration.

use crate::errors::BatchflowError;
use crate::params::ParameterKey;
use crate::step::Step;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A named step inside a job definition.
#[derive(Clone)]
pub struct StepDefinition {
    /// The step name, unique within its job.
    pub name: String,
    /// The step implementation.
    pub step: Arc<dyn Step>,
}

impl StepDefinition {
    /// Creates a step definition.
    #[must_use]
    pub fn new(name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        Self {
            name: name.into(),
            step,
        }
    }
}

impl std::fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .finish()
    }
}

/// An immutable job definition: name, ordered steps, recognized parameters.
#[derive(Debug, Clone)]
pub struct JobDefinition {
    /// The job name, unique across the registry.
    pub name: String,
    /// The ordered, non-empty step list.
    pub steps: Vec<StepDefinition>,
    /// Parameters the job recognizes, with types and defaults.
    pub parameter_keys: Vec<ParameterKey>,
}

impl JobDefinition {
    /// Starts a builder for a job with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> JobDefinitionBuilder {
        JobDefinitionBuilder {
            name: name.into(),
            steps: Vec::new(),
            parameter_keys: Vec::new(),
        }
    }

    /// Looks up a declared parameter key by name.
    #[must_use]
    pub fn parameter_key(&self, name: &str) -> Option<&ParameterKey> {
        self.parameter_keys.iter().find(|k| k.name == name)
    }
}

/// Builder for [`JobDefinition`].
#[derive(Debug)]
pub struct JobDefinitionBuilder {
    name: String,
    steps: Vec<StepDefinition>,
    parameter_keys: Vec<ParameterKey>,
}

impl JobDefinitionBuilder {
    /// Appends a step. Steps run in the order they are added.
    #[must_use]
    pub fn step(mut self, name: impl Into<String>, step: Arc<dyn Step>) -> Self {
        self.steps.push(StepDefinition::new(name, step));
        self
    }

    /// Declares a recognized parameter.
    #[must_use]
    pub fn parameter(mut self, key: ParameterKey) -> Self {
        self.parameter_keys.push(key);
        self
    }

    /// Validates and finishes the definition.
    ///
    /// # Errors
    ///
    /// Returns a registration error when the name is blank, the step list is
    /// empty, or step names repeat.
    pub fn build(self) -> Result<JobDefinition, BatchflowError> {
        if self.name.trim().is_empty() {
            return Err(BatchflowError::Registration(
                "job name must not be empty".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(BatchflowError::Registration(format!(
                "job '{}' must declare at least one step",
                self.name
            )));
        }
        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(BatchflowError::Registration(format!(
                    "job '{}' declares duplicate step name '{}'",
                    self.name, step.name
                )));
            }
        }
        Ok(JobDefinition {
            name: self.name,
            steps: self.steps,
            parameter_keys: self.parameter_keys,
        })
    }
}

/// Catalog mapping job name to definition. Read-only after startup.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Arc<JobDefinition>>>,
}

impl JobRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a job definition.
    ///
    /// # Errors
    ///
    /// Returns a registration error when a job with the same name exists.
    pub fn register(&self, job: JobDefinition) -> Result<(), BatchflowError> {
        let mut jobs = self.jobs.write();
        if jobs.contains_key(&job.name) {
            return Err(BatchflowError::Registration(format!(
                "job '{}' is already registered",
                job.name
            )));
        }
        jobs.insert(job.name.clone(), Arc::new(job));
        Ok(())
    }

    /// Looks up a job definition by name.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<JobDefinition>> {
        self.jobs.read().get(name).cloned()
    }

    /// Returns all registered job names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the number of registered jobs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.jobs.read().len()
    }

    /// Returns true if no jobs are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jobs.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{ParamValue, ParameterKey};
    use crate::step::{FnStep, StepContext, StepOutcome};

    fn noop_step() -> Arc<dyn Step> {
        Arc::new(FnStep::new(|_ctx: &StepContext| StepOutcome::Finished))
    }

    #[test]
    fn test_builder_produces_ordered_steps() {
        let job = JobDefinition::builder("largeFileProcessingJob")
            .step("generateLargeFile", noop_step())
            .step("processLargeFile", noop_step())
            .step("cleanupLargeFiles", noop_step())
            .build()
            .unwrap();

        let names: Vec<&str> = job.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["generateLargeFile", "processLargeFile", "cleanupLargeFiles"]
        );
    }

    #[test]
    fn test_builder_rejects_empty_step_list() {
        let err = JobDefinition::builder("emptyJob").build().unwrap_err();
        assert!(err.to_string().contains("at least one step"));
    }

    #[test]
    fn test_builder_rejects_duplicate_step_names() {
        let err = JobDefinition::builder("dupJob")
            .step("same", noop_step())
            .step("same", noop_step())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("duplicate step name"));
    }

    #[test]
    fn test_builder_rejects_blank_name() {
        let err = JobDefinition::builder("  ")
            .step("s1", noop_step())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_registry_register_and_lookup() {
        let registry = JobRegistry::new();
        let job = JobDefinition::builder("countyDailyReportJob")
            .step("extract", noop_step())
            .parameter(ParameterKey::long("recordCount").with_default(ParamValue::Long(1000)))
            .build()
            .unwrap();

        registry.register(job).unwrap();

        let found = registry.lookup("countyDailyReportJob").unwrap();
        assert_eq!(found.steps.len(), 1);
        assert!(found.parameter_key("recordCount").is_some());
        assert!(registry.lookup("missing").is_none());
    }

    #[test]
    fn test_registry_rejects_duplicate_job() {
        let registry = JobRegistry::new();
        let build = || {
            JobDefinition::builder("j")
                .step("s", noop_step())
                .build()
                .unwrap()
        };
        registry.register(build()).unwrap();
        assert!(registry.register(build()).is_err());
    }

    #[test]
    fn test_registry_names_sorted() {
        let registry = JobRegistry::new();
        for name in ["zJob", "aJob", "mJob"] {
            registry
                .register(
                    JobDefinition::builder(name)
                        .step("s", noop_step())
                        .build()
                        .unwrap(),
                )
                .unwrap();
        }
        assert_eq!(registry.names(), vec!["aJob", "mJob", "zJob"]);
    }
}
