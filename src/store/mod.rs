//! Durable storage contracts for executions and aggregates.
//!
//! The execution store holds job instances, executions, parameter snapshots
//! and step executions; the aggregation store holds the keyed, replayable
//! aggregate table with commutative merge semantics. Both are adapter
//! traits; [`sqlite::SqliteStore`](crate::store::SqliteStore) implements
//! them over an embedded database.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::aggregation::AggregationType;
use crate::context::ExecutionContext;
use crate::core::{BatchStatus, ExitStatus};
use crate::errors::StoreError;
use crate::params::JobParameters;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The equivalence class of executions sharing identifying parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobInstance {
    /// Row id.
    pub id: i64,
    /// The job name.
    pub job_name: String,
    /// Digest over the identifying parameters.
    pub job_key: String,
}

/// A single attempt to run a job with specific parameters.
#[derive(Debug, Clone)]
pub struct JobExecution {
    /// Row id, assigned by the store.
    pub id: i64,
    /// The owning instance.
    pub instance_id: i64,
    /// The job name, denormalized from the instance.
    pub job_name: String,
    /// Lifecycle status.
    pub status: BatchStatus,
    /// Exit code and description.
    pub exit_status: ExitStatus,
    /// When the runtime picked the execution up.
    pub start_time: Option<DateTime<Utc>>,
    /// When the execution reached a terminal status.
    pub end_time: Option<DateTime<Utc>>,
    /// The full parameter snapshot.
    pub parameters: JobParameters,
    /// Scalar state shared across the execution's steps.
    pub context: ExecutionContext,
}

impl JobExecution {
    /// The external correlation id, when present in the parameter snapshot.
    #[must_use]
    pub fn trigger_id(&self) -> Option<&str> {
        self.parameters.get_string("triggerId")
    }
}

/// One step's progress within an execution.
#[derive(Debug, Clone)]
pub struct StepExecution {
    /// Row id, assigned by the store.
    pub id: i64,
    /// The owning execution.
    pub execution_id: i64,
    /// The step name from the job definition.
    pub step_name: String,
    /// Lifecycle status.
    pub status: BatchStatus,
    /// Exit code and description.
    pub exit_status: ExitStatus,
    /// When the step body was invoked.
    pub start_time: Option<DateTime<Utc>>,
    /// When the step body returned.
    pub end_time: Option<DateTime<Utc>>,
    /// Items read by the step body.
    pub read_count: u64,
    /// Items written by the step body.
    pub write_count: u64,
    /// Items skipped by the step body.
    pub skip_count: u64,
}

/// A buffered delta applied to one aggregation row.
///
/// The merge over deltas (sum counts and totals, min/max salary bounds) is
/// commutative and associative, so flush ordering across batches does not
/// matter. Re-applying the same delta is not idempotent; the engine never
/// flushes a buffer twice.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationDelta {
    /// Records folded into this delta.
    pub record_count: u64,
    /// Sum of salary values.
    pub total_salary: f64,
    /// Sum of hours worked.
    pub total_hours: f64,
    /// Sum of bonus values.
    pub total_bonus: f64,
    /// Minimum salary observed.
    pub min_salary: f64,
    /// Maximum salary observed.
    pub max_salary: f64,
}

/// A persisted aggregate row, keyed by `(execution, type, group)`.
#[derive(Debug, Clone)]
pub struct AggregationRow {
    /// The owning execution.
    pub execution_id: i64,
    /// The key-derivation family.
    pub aggregation_type: AggregationType,
    /// The derived group key, e.g. `DEPT_01_REGION_05`.
    pub group_key: String,
    /// Records merged into this row so far.
    pub record_count: u64,
    /// Sum of salary values.
    pub total_salary: f64,
    /// Sum of hours worked.
    pub total_hours: f64,
    /// Sum of bonus values.
    pub total_bonus: f64,
    /// Minimum salary observed.
    pub min_salary: f64,
    /// Maximum salary observed.
    pub max_salary: f64,
    /// When the row was first inserted.
    pub created_at: DateTime<Utc>,
    /// When the row last received a merge.
    pub updated_at: DateTime<Utc>,
}

/// Durable record of job instances, executions and step executions.
///
/// Writers for different executions may run concurrently; rows of a single
/// execution are only written by the one worker driving it. Instance
/// creation and execution-id sequencing interleave badly under concurrent
/// inserts, which is why the coordinator serializes calls to
/// [`create_instance`](ExecutionStore::create_instance) and
/// [`create_execution`](ExecutionStore::create_execution) behind the
/// metadata lock.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    /// Finds or creates the instance for `(job_name, identifying params)`.
    async fn create_instance(
        &self,
        job_name: &str,
        parameters: &JobParameters,
    ) -> Result<JobInstance, StoreError>;

    /// Creates a new execution in `Starting` with its parameter snapshot.
    async fn create_execution(
        &self,
        instance: &JobInstance,
        parameters: &JobParameters,
    ) -> Result<JobExecution, StoreError>;

    /// Persists status, exit status, times and context of an execution.
    ///
    /// Terminal rows only accept an identical status or the
    /// `Completed -> Processed` post-processing transition; a persisted
    /// `Stopping` is never downgraded to `Started` by a late runtime write.
    async fn update_execution(&self, execution: &JobExecution) -> Result<(), StoreError>;

    /// Loads an execution by id.
    async fn find_execution(&self, execution_id: i64) -> Result<Option<JobExecution>, StoreError>;

    /// Appends a step execution in `Started`.
    async fn create_step_execution(
        &self,
        execution_id: i64,
        step_name: &str,
    ) -> Result<StepExecution, StoreError>;

    /// Persists status, exit status, times and counters of a step execution.
    async fn update_step_execution(&self, step: &StepExecution) -> Result<(), StoreError>;

    /// Lists an execution's step executions in the order their steps ran.
    async fn list_step_executions(
        &self,
        execution_id: i64,
    ) -> Result<Vec<StepExecution>, StoreError>;

    /// Lists instances of a job, newest first, paged.
    async fn find_recent_instances(
        &self,
        job_name: &str,
        page: usize,
        size: usize,
    ) -> Result<Vec<JobInstance>, StoreError>;

    /// Lists all executions of an instance, newest first.
    async fn list_executions(&self, instance_id: i64) -> Result<Vec<JobExecution>, StoreError>;

    /// Marks every non-terminal execution (and its running steps) as
    /// `Abandoned`. Returns the number of executions swept.
    ///
    /// Startup recovery: a crashed coordinator must not leave executions in
    /// a non-terminal state.
    async fn mark_running_abandoned(&self) -> Result<u64, StoreError>;
}

/// Upsert-capable keyed table of aggregate rows.
///
/// Concurrent upserts from multiple pipeline workers are permitted; the
/// merge is commutative.
#[async_trait]
pub trait AggregationStore: Send + Sync {
    /// Atomically inserts the delta as a new row or merges it into the
    /// existing row for `(execution_id, aggregation_type, group_key)`.
    async fn upsert_batch(
        &self,
        execution_id: i64,
        aggregation_type: AggregationType,
        group_key: &str,
        delta: &AggregationDelta,
    ) -> Result<(), StoreError>;

    /// Counts distinct group keys of one family for an execution.
    async fn count_distinct_groups(
        &self,
        execution_id: i64,
        aggregation_type: AggregationType,
    ) -> Result<u64, StoreError>;

    /// Total records processed for an execution, summed over the canonical
    /// `BY_DEPARTMENT` family.
    async fn total_record_count(&self, execution_id: i64) -> Result<u64, StoreError>;

    /// Lists the rows of one family for an execution, largest groups first.
    async fn find_by_type(
        &self,
        execution_id: i64,
        aggregation_type: AggregationType,
    ) -> Result<Vec<AggregationRow>, StoreError>;

    /// Deletes every aggregate row of an execution. Returns rows removed.
    async fn delete_by_execution(&self, execution_id: i64) -> Result<u64, StoreError>;
}
