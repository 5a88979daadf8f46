//! The trigger and launch coordinator.
//!
//! Turns external trigger requests into durable executions and hands them to
//! async workers. Only the metadata-creation phase is serialized: the store
//! exhibits serialization anomalies on concurrent inserts into the metadata
//! tables, so instance find-or-create and execution creation run under one
//! process-wide FIFO lock, held for milliseconds. Job bodies run outside the
//! lock with unbounded parallelism.

mod retry;

pub use retry::{BackoffStrategy, JitterStrategy, RetryPolicy};


use crate::cancellation::CancelToken;
use crate::config::CoordinatorConfig;
use crate::core::BatchStatus;
use crate::errors::BatchflowError;
use crate::events::JobEventPublisher;
use crate::params::{JobParameters, JobParametersBuilder, ParamValue};
use crate::pipeline::PipelineRuntime;
use crate::registry::{JobDefinition, JobRegistry};
use crate::store::{ExecutionStore, JobExecution, JobInstance};
use crate::utils::now_millis;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as FairMutex;
use tracing::{debug, error, info, warn};

/// Scheduler-facing result of a trigger request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    /// Whether the job was triggered.
    pub success: bool,
    /// The execution id for tracking, when triggered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<i64>,
    /// The job name from the request.
    pub job_name: String,
    /// The correlation id from the request.
    pub trigger_id: String,
    /// The execution status at response time.
    pub status: String,
    /// Human-readable description of the result.
    pub message: String,
}

impl TriggerResponse {
    /// Builds a success response from a fresh execution.
    #[must_use]
    pub fn success(execution: &JobExecution, trigger_id: &str) -> Self {
        Self {
            success: true,
            execution_id: Some(execution.id),
            job_name: execution.job_name.clone(),
            trigger_id: trigger_id.to_string(),
            status: execution.status.as_str().to_string(),
            message: format!("Job {} triggered", execution.job_name),
        }
    }

    /// Builds a failure response from a trigger error.
    #[must_use]
    pub fn failure(job_name: &str, trigger_id: &str, error: &BatchflowError) -> Self {
        Self {
            success: false,
            execution_id: None,
            job_name: job_name.to_string(),
            trigger_id: trigger_id.to_string(),
            status: BatchStatus::Failed.as_str().to_string(),
            message: error.to_string(),
        }
    }
}

/// Coordinates trigger requests, the metadata lock, and worker submission.
pub struct BatchCoordinator {
    registry: Arc<JobRegistry>,
    store: Arc<dyn ExecutionStore>,
    runtime: Arc<PipelineRuntime>,
    config: CoordinatorConfig,
    retry_policy: RetryPolicy,
    metadata_lock: FairMutex<()>,
    lock_waiters: AtomicUsize,
    peak_lock_waiters: AtomicUsize,
    trigger_counter: AtomicU64,
    running: Arc<Mutex<HashMap<i64, Arc<CancelToken>>>>,
}

impl BatchCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        registry: Arc<JobRegistry>,
        store: Arc<dyn ExecutionStore>,
        publisher: Arc<JobEventPublisher>,
        config: CoordinatorConfig,
    ) -> Arc<Self> {
        let runtime = Arc::new(PipelineRuntime::new(store.clone(), publisher));
        let retry_policy =
            RetryPolicy::exponential(config.metadata_retry_attempts.max(1), Duration::from_millis(50));
        info!(
            queue_timeout_seconds = config.queue_timeout_seconds,
            "coordinator initialized with metadata lock serialization"
        );
        Arc::new(Self {
            registry,
            store,
            runtime,
            config,
            retry_policy,
            metadata_lock: FairMutex::new(()),
            lock_waiters: AtomicUsize::new(0),
            peak_lock_waiters: AtomicUsize::new(0),
            trigger_counter: AtomicU64::new(0),
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// Triggers a job by name.
    ///
    /// Creates the job metadata under the serialized critical section, hands
    /// the execution to an async worker, and returns immediately; the caller
    /// never waits for the job body.
    ///
    /// # Errors
    ///
    /// `UnknownJob` when the name does not resolve, `ParameterCoercion` for
    /// bad parameters or a blank trigger id, `LockTimeout` when the metadata
    /// lock is not acquired within the configured wait, and `StorageFailure`
    /// after metadata-creation retries are exhausted.
    pub async fn trigger(
        self: &Arc<Self>,
        job_name: &str,
        trigger_id: &str,
        parameters: &HashMap<String, String>,
    ) -> Result<JobExecution, BatchflowError> {
        let request_num = self.trigger_counter.fetch_add(1, Ordering::SeqCst) + 1;

        let job = self
            .registry
            .lookup(job_name)
            .ok_or_else(|| BatchflowError::UnknownJob {
                name: job_name.to_string(),
            })?;

        if trigger_id.trim().is_empty() {
            return Err(BatchflowError::ParameterCoercion {
                key: "triggerId".to_string(),
                expected: crate::params::ParamKind::String,
                value: trigger_id.to_string(),
            });
        }

        let job_parameters = build_job_parameters(&job, trigger_id, parameters)?;

        debug!(
            request_num,
            job_name,
            trigger_id,
            queue_depth = self.queue_depth(),
            "trigger request waiting for metadata lock"
        );

        let waiters = self.lock_waiters.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_lock_waiters.fetch_max(waiters, Ordering::SeqCst);
        let guard = match tokio::time::timeout(
            self.config.queue_timeout(),
            self.metadata_lock.lock(),
        )
        .await
        {
            Ok(guard) => {
                self.lock_waiters.fetch_sub(1, Ordering::SeqCst);
                guard
            }
            Err(_) => {
                let queue_depth = self.lock_waiters.fetch_sub(1, Ordering::SeqCst) - 1;
                return Err(BatchflowError::LockTimeout {
                    job_name: job_name.to_string(),
                    trigger_id: trigger_id.to_string(),
                    queue_depth,
                });
            }
        };

        let lock_acquired_at = Instant::now();
        let execution = self.create_metadata(&job, &job_parameters).await?;
        drop(guard);

        info!(
            request_num,
            job_name,
            execution_id = execution.id,
            lock_held_ms = lock_acquired_at.elapsed().as_millis() as u64,
            queue_depth = self.queue_depth(),
            "job triggered"
        );

        self.submit(execution.id, job);
        Ok(execution)
    }

    /// Triggers a job and folds either outcome into the scheduler-facing
    /// response instead of surfacing errors to the transport layer.
    pub async fn handle_trigger(
        self: &Arc<Self>,
        job_name: &str,
        trigger_id: &str,
        parameters: &HashMap<String, String>,
    ) -> TriggerResponse {
        match self.trigger(job_name, trigger_id, parameters).await {
            Ok(execution) => TriggerResponse::success(&execution, trigger_id),
            Err(e) => {
                error!(job_name, trigger_id, error = %e, "trigger failed");
                TriggerResponse::failure(job_name, trigger_id, &e)
            }
        }
    }

    /// Requests a cooperative stop of a running execution.
    ///
    /// Returns true when the stop signal was persisted; false when the
    /// execution is unknown or already terminal (state unchanged).
    ///
    /// # Errors
    ///
    /// Returns a storage error if the execution cannot be read or updated.
    pub async fn stop(&self, execution_id: i64) -> Result<bool, BatchflowError> {
        info!(execution_id, "attempting to stop job execution");
        let Some(mut execution) = self.store.find_execution(execution_id).await? else {
            warn!(execution_id, "job execution not found");
            return Ok(false);
        };

        if !execution.status.is_running() {
            info!(
                execution_id,
                status = %execution.status,
                "job execution is not running"
            );
            return Ok(false);
        }

        execution.status = BatchStatus::Stopping;
        self.store.update_execution(&execution).await?;

        if let Some(token) = self.running.lock().get(&execution_id) {
            token.cancel("stop requested");
        }

        info!(execution_id, "stop signal sent");
        Ok(true)
    }

    /// Finds an execution by the scheduler's correlation id.
    ///
    /// Scans recent instances of every registered job and returns the first
    /// execution whose parameter snapshot records the trigger id; `None`
    /// when the id is blank or unmatched.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the scan fails.
    pub async fn find_by_trigger_id(
        &self,
        trigger_id: &str,
    ) -> Result<Option<JobExecution>, BatchflowError> {
        if trigger_id.trim().is_empty() {
            return Ok(None);
        }

        for job_name in self.registry.names() {
            let instances = self
                .store
                .find_recent_instances(&job_name, 0, self.config.recent_instance_page_size)
                .await?;
            for instance in instances {
                for execution in self.store.list_executions(instance.id).await? {
                    if execution.trigger_id() == Some(trigger_id) {
                        return Ok(Some(execution));
                    }
                }
            }
        }

        debug!(trigger_id, "no execution found for trigger id");
        Ok(None)
    }

    /// Acknowledges post-processing of a completed execution.
    ///
    /// Returns true when the execution moved `Completed -> Processed`; false
    /// when it is unknown or in any other status.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the execution cannot be read or updated.
    pub async fn mark_processed(&self, execution_id: i64) -> Result<bool, BatchflowError> {
        let Some(mut execution) = self.store.find_execution(execution_id).await? else {
            return Ok(false);
        };
        if execution.status != BatchStatus::Completed {
            return Ok(false);
        }
        execution.status = BatchStatus::Processed;
        self.store.update_execution(&execution).await?;
        info!(execution_id, "execution marked processed");
        Ok(true)
    }

    /// Startup recovery: sweeps executions orphaned by a crash into
    /// `Abandoned`. Returns the number of executions swept.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the sweep fails.
    pub async fn recover_orphaned(&self) -> Result<u64, BatchflowError> {
        let swept = self.store.mark_running_abandoned().await?;
        if swept > 0 {
            warn!(swept, "abandoned orphaned executions at startup");
        }
        Ok(swept)
    }

    /// Current number of requests waiting on the metadata lock.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.lock_waiters.load(Ordering::SeqCst)
    }

    /// Highest observed metadata-lock queue depth.
    #[must_use]
    pub fn peak_queue_depth(&self) -> usize {
        self.peak_lock_waiters.load(Ordering::SeqCst)
    }

    /// Total trigger requests received.
    #[must_use]
    pub fn trigger_count(&self) -> u64 {
        self.trigger_counter.load(Ordering::SeqCst)
    }

    /// All registered job names, for discovery.
    #[must_use]
    pub fn registered_job_names(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Executions currently held by a worker.
    #[must_use]
    pub fn running_count(&self) -> usize {
        self.running.lock().len()
    }

    /// The serialized part: instance find-or-create plus execution creation,
    /// retried on transient storage errors.
    async fn create_metadata(
        &self,
        job: &Arc<JobDefinition>,
        parameters: &JobParameters,
    ) -> Result<JobExecution, BatchflowError> {
        let mut attempt = 1;
        loop {
            match self.try_create_metadata(job, parameters).await {
                Ok(execution) => return Ok(execution),
                Err(e) if e.is_transient() && attempt < self.retry_policy.max_attempts => {
                    warn!(
                        job_name = %job.name,
                        attempt,
                        error = %e,
                        "metadata creation failed, retrying"
                    );
                    tokio::time::sleep(self.retry_policy.delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(job_name = %job.name, attempt, error = %e, "metadata creation failed");
                    return Err(BatchflowError::StorageFailure {
                        attempts: attempt,
                        source: e,
                    });
                }
            }
        }
    }

    async fn try_create_metadata(
        &self,
        job: &Arc<JobDefinition>,
        parameters: &JobParameters,
    ) -> Result<JobExecution, crate::errors::StoreError> {
        let instance: JobInstance = self.store.create_instance(&job.name, parameters).await?;
        self.store.create_execution(&instance, parameters).await
    }

    /// Hands the execution to an async worker running the pipeline.
    fn submit(self: &Arc<Self>, execution_id: i64, job: Arc<JobDefinition>) {
        let token = Arc::new(CancelToken::new());
        self.running.lock().insert(execution_id, token.clone());

        let runtime = self.runtime.clone();
        let running = self.running.clone();
        tokio::spawn(async move {
            runtime.run(execution_id, job, token).await;
            running.lock().remove(&execution_id);
        });
    }
}

/// Builds the parameter set for one trigger request.
///
/// Always injects the identifying `triggerId` and epoch-millis `timestamp`;
/// caller values are coerced against the job's declared keys, undeclared
/// keys fold in as non-identifying strings, and declared defaults fill gaps.
fn build_job_parameters(
    job: &JobDefinition,
    trigger_id: &str,
    parameters: &HashMap<String, String>,
) -> Result<JobParameters, BatchflowError> {
    let mut builder = JobParametersBuilder::default()
        .add_string("triggerId", trigger_id, true)
        .add_long("timestamp", now_millis(), true);

    for (key, raw) in parameters {
        match job.parameter_key(key) {
            Some(declared) => {
                let value = ParamValue::coerce(declared.kind, key, raw)?;
                builder = builder.add(key.clone(), value, declared.identifying);
            }
            None => {
                builder = builder.add(key.clone(), ParamValue::String(raw.clone()), false);
            }
        }
    }

    for declared in &job.parameter_keys {
        if parameters.contains_key(&declared.name)
            || declared.name == "triggerId"
            || declared.name == "timestamp"
        {
            continue;
        }
        if let Some(default) = &declared.default {
            builder = builder.add(declared.name.clone(), default.clone(), declared.identifying);
        }
    }

    Ok(builder.build())
}
