//! Step trait and execution-time context.
//!
//! Steps are the units of work the pipeline runtime drives in order. A step
//! body receives a [`StepContext`] giving it the parameter view, the shared
//! execution context, the cancel token, and its contribution counters.

use crate::cancellation::CancelToken;
use crate::context::ExecutionContext;
use crate::params::JobParameters;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// The outcome of one step body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step finished its work.
    Finished,
    /// The step failed; the message becomes the execution's exit description.
    Failed(String),
}

impl StepOutcome {
    /// Creates a failed outcome from any message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Returns true for [`StepOutcome::Finished`].
    #[must_use]
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Finished)
    }
}

/// Read/write/skip counters a step body reports through.
///
/// Copied into the persisted step-execution row when the step finishes.
#[derive(Debug, Default)]
pub struct StepContribution {
    read_count: AtomicU64,
    write_count: AtomicU64,
    skip_count: AtomicU64,
}

impl StepContribution {
    /// Creates zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds to the read counter.
    pub fn increment_read_count(&self, delta: u64) {
        self.read_count.fetch_add(delta, Ordering::Relaxed);
    }

    /// Adds to the write counter.
    pub fn increment_write_count(&self, delta: u64) {
        self.write_count.fetch_add(delta, Ordering::Relaxed);
    }

    /// Adds to the skip counter.
    pub fn increment_skip_count(&self, delta: u64) {
        self.skip_count.fetch_add(delta, Ordering::Relaxed);
    }

    /// Items read so far.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.read_count.load(Ordering::Relaxed)
    }

    /// Items written so far.
    #[must_use]
    pub fn write_count(&self) -> u64 {
        self.write_count.load(Ordering::Relaxed)
    }

    /// Items skipped so far.
    #[must_use]
    pub fn skip_count(&self) -> u64 {
        self.skip_count.load(Ordering::Relaxed)
    }
}

/// Everything a step body can see while it runs.
pub struct StepContext {
    execution_id: i64,
    job_name: String,
    step_name: String,
    parameters: Arc<JobParameters>,
    context: Arc<ExecutionContext>,
    cancel: Arc<CancelToken>,
    contribution: Arc<StepContribution>,
}

impl StepContext {
    /// Creates a step context. Called by the pipeline runtime.
    #[must_use]
    pub fn new(
        execution_id: i64,
        job_name: impl Into<String>,
        step_name: impl Into<String>,
        parameters: Arc<JobParameters>,
        context: Arc<ExecutionContext>,
        cancel: Arc<CancelToken>,
        contribution: Arc<StepContribution>,
    ) -> Self {
        Self {
            execution_id,
            job_name: job_name.into(),
            step_name: step_name.into(),
            parameters,
            context,
            cancel,
            contribution,
        }
    }

    /// The execution this step belongs to.
    #[must_use]
    pub fn execution_id(&self) -> i64 {
        self.execution_id
    }

    /// The job name.
    #[must_use]
    pub fn job_name(&self) -> &str {
        &self.job_name
    }

    /// The step name.
    #[must_use]
    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Read-only view of the execution's parameters.
    #[must_use]
    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    /// The shared execution context (read/write).
    #[must_use]
    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }

    /// The cancel token bound to the execution's stop flag.
    #[must_use]
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// Shorthand for polling the cancel token.
    #[must_use]
    pub fn is_stop_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The step's contribution counters.
    #[must_use]
    pub fn contribution(&self) -> &StepContribution {
        &self.contribution
    }
}

/// A unit of work within a job.
#[async_trait]
pub trait Step: Send + Sync {
    /// Runs the step body.
    ///
    /// Bodies should poll `ctx.is_stop_requested()` at I/O or chunk
    /// boundaries and return [`StepOutcome::Finished`] early when a stop has
    /// been requested; the runtime translates the observed stop into the
    /// execution's terminal status.
    async fn execute(&self, ctx: &StepContext) -> StepOutcome;
}

/// A step backed by a plain closure, for tests and simple tasklets.
pub struct FnStep<F>
where
    F: Fn(&StepContext) -> StepOutcome + Send + Sync,
{
    func: F,
}

impl<F> FnStep<F>
where
    F: Fn(&StepContext) -> StepOutcome + Send + Sync,
{
    /// Wraps a closure as a step.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F> Debug for FnStep<F>
where
    F: Fn(&StepContext) -> StepOutcome + Send + Sync,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnStep").finish()
    }
}

#[async_trait]
impl<F> Step for FnStep<F>
where
    F: Fn(&StepContext) -> StepOutcome + Send + Sync,
{
    async fn execute(&self, ctx: &StepContext) -> StepOutcome {
        (self.func)(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_step_context(contribution: Arc<StepContribution>) -> StepContext {
        StepContext::new(
            7,
            "testJob",
            "testStep",
            Arc::new(JobParameters::new()),
            Arc::new(ExecutionContext::new()),
            Arc::new(CancelToken::new()),
            contribution,
        )
    }

    #[test]
    fn test_contribution_counters() {
        let contribution = StepContribution::new();
        contribution.increment_read_count(10);
        contribution.increment_read_count(5);
        contribution.increment_write_count(12);
        contribution.increment_skip_count(3);

        assert_eq!(contribution.read_count(), 15);
        assert_eq!(contribution.write_count(), 12);
        assert_eq!(contribution.skip_count(), 3);
    }

    #[tokio::test]
    async fn test_fn_step_runs_closure() {
        let step = FnStep::new(|ctx: &StepContext| {
            ctx.contribution().increment_write_count(1);
            ctx.context().put_string("producedBy", ctx.step_name().to_string());
            StepOutcome::Finished
        });

        let contribution = Arc::new(StepContribution::new());
        let ctx = test_step_context(contribution.clone());
        let outcome = step.execute(&ctx).await;

        assert!(outcome.is_finished());
        assert_eq!(contribution.write_count(), 1);
        assert_eq!(ctx.context().get_string("producedBy").as_deref(), Some("testStep"));
    }

    #[tokio::test]
    async fn test_fn_step_failure() {
        let step = FnStep::new(|_ctx: &StepContext| StepOutcome::failed("boom"));
        let ctx = test_step_context(Arc::new(StepContribution::new()));

        assert_eq!(step.execute(&ctx).await, StepOutcome::Failed("boom".to_string()));
    }

    #[test]
    fn test_stop_visible_through_context() {
        let cancel = Arc::new(CancelToken::new());
        let ctx = StepContext::new(
            1,
            "j",
            "s",
            Arc::new(JobParameters::new()),
            Arc::new(ExecutionContext::new()),
            cancel.clone(),
            Arc::new(StepContribution::new()),
        );

        assert!(!ctx.is_stop_requested());
        cancel.cancel("stop requested");
        assert!(ctx.is_stop_requested());
    }
}
