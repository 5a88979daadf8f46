//! The step pipeline runtime.
//!
//! Drives one execution through its ordered step list: persists progress
//! through the execution store, publishes lifecycle events, and honors the
//! cooperative stop signal at step boundaries. Runs on a worker task; errors
//! never cross the worker boundary, so the outcome is observable only
//! through the persisted execution row and the published events.

use crate::cancellation::CancelToken;
use crate::core::{BatchStatus, ExitStatus};
use crate::events::JobEventPublisher;
use crate::registry::JobDefinition;
use crate::step::{StepContext, StepContribution, StepOutcome};
use crate::store::{ExecutionStore, JobExecution, StepExecution};
use crate::utils::now_utc;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Runs the ordered step list of one job execution.
pub struct PipelineRuntime {
    store: Arc<dyn ExecutionStore>,
    publisher: Arc<JobEventPublisher>,
}

impl PipelineRuntime {
    /// Creates a runtime over the given store and publisher.
    #[must_use]
    pub fn new(store: Arc<dyn ExecutionStore>, publisher: Arc<JobEventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Drives the execution to a terminal status.
    ///
    /// The result is observable via the execution's final status and the
    /// published events; this method never returns an error.
    pub async fn run(&self, execution_id: i64, job: Arc<JobDefinition>, cancel: Arc<CancelToken>) {
        let mut execution = match self.store.find_execution(execution_id).await {
            Ok(Some(execution)) => execution,
            Ok(None) => {
                error!(execution_id, "execution disappeared before the worker ran it");
                return;
            }
            Err(e) => {
                error!(execution_id, error = %e, "failed to load execution");
                return;
            }
        };

        execution.status = BatchStatus::Started;
        execution.start_time = Some(now_utc());
        if let Err(e) = self.store.update_execution(&execution).await {
            error!(execution_id, error = %e, "failed to mark execution started");
            return;
        }

        info!(
            job_name = %execution.job_name,
            execution_id,
            trigger_id = execution.trigger_id().unwrap_or(""),
            "job starting"
        );

        let mut steps: Vec<StepExecution> = Vec::new();
        self.publisher.publish_job_started(&execution, &steps);

        let context = Arc::new(execution.context.clone());
        let parameters = Arc::new(execution.parameters.clone());
        let total_steps = job.steps.len();
        let mut first_failure: Option<String> = None;
        let mut stopped = false;

        for (index, step_def) in job.steps.iter().enumerate() {
            if self.stop_observed(execution_id, &cancel).await {
                stopped = true;
                self.abandon_remaining(execution_id, &job, index, &mut steps)
                    .await;
                break;
            }

            let mut step_exec = match self
                .store
                .create_step_execution(execution_id, &step_def.name)
                .await
            {
                Ok(step_exec) => step_exec,
                Err(e) => {
                    error!(execution_id, step = %step_def.name, error = %e, "failed to create step execution");
                    first_failure = Some(format!("storage error: {e}"));
                    break;
                }
            };

            info!(step = %step_def.name, job_name = %execution.job_name, "step starting");

            let contribution = Arc::new(StepContribution::new());
            let step_ctx = StepContext::new(
                execution_id,
                execution.job_name.clone(),
                step_def.name.clone(),
                parameters.clone(),
                context.clone(),
                cancel.clone(),
                contribution.clone(),
            );

            let outcome = step_def.step.execute(&step_ctx).await;

            step_exec.end_time = Some(now_utc());
            step_exec.read_count = contribution.read_count();
            step_exec.write_count = contribution.write_count();
            step_exec.skip_count = contribution.skip_count();

            info!(
                step = %step_def.name,
                read = step_exec.read_count,
                write = step_exec.write_count,
                skip = step_exec.skip_count,
                "step finished"
            );

            match outcome {
                StepOutcome::Finished => {
                    step_exec.status = BatchStatus::Completed;
                    step_exec.exit_status = ExitStatus::completed();
                    if let Err(e) = self.store.update_step_execution(&step_exec).await {
                        error!(execution_id, step = %step_def.name, error = %e, "failed to persist step completion");
                    }
                    steps.push(step_exec);

                    // Persist context written by the step before the next one reads it.
                    execution.context = (*context).clone();
                    if let Err(e) = self.store.update_execution(&execution).await {
                        warn!(execution_id, error = %e, "failed to persist execution context");
                    }

                    let progress = (((index + 1) * 100) / total_steps) as u32;
                    self.publisher.publish_step_completed(
                        &execution,
                        &steps,
                        &step_def.name,
                        progress,
                    );
                }
                StepOutcome::Failed(message) => {
                    warn!(step = %step_def.name, error = %message, "step failed");
                    step_exec.status = BatchStatus::Failed;
                    step_exec.exit_status = ExitStatus::failed(&message);
                    if let Err(e) = self.store.update_step_execution(&step_exec).await {
                        error!(execution_id, step = %step_def.name, error = %e, "failed to persist step failure");
                    }
                    steps.push(step_exec);
                    first_failure = Some(message);
                    break;
                }
            }
        }

        // A stop during the final step still ends as Stopped.
        if !stopped && first_failure.is_none() {
            stopped = self.stop_observed(execution_id, &cancel).await;
        }

        let (status, exit_status) = if let Some(message) = first_failure {
            (BatchStatus::Failed, ExitStatus::failed(message))
        } else if stopped {
            (BatchStatus::Stopped, ExitStatus::stopped())
        } else {
            (BatchStatus::Completed, ExitStatus::completed())
        };

        execution.status = status;
        execution.exit_status = exit_status;
        execution.end_time = Some(now_utc());
        execution.context = (*context).clone();
        if let Err(e) = self.store.update_execution(&execution).await {
            error!(execution_id, error = %e, "failed to persist terminal status");
        }

        info!(
            job_name = %execution.job_name,
            execution_id,
            status = %status,
            step_count = steps.len(),
            "job finished"
        );

        // Step events have all been emitted; the terminal event goes last.
        match status {
            BatchStatus::Stopped => self.publisher.publish_job_stopped(&execution, &steps),
            _ => self.publisher.publish_job_completed(&execution, &steps),
        }
    }

    /// Re-reads the persisted status and merges it with the in-process token.
    async fn stop_observed(&self, execution_id: i64, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            return true;
        }
        match self.store.find_execution(execution_id).await {
            Ok(Some(current)) if current.status == BatchStatus::Stopping => {
                cancel.cancel("stop requested");
                true
            }
            Ok(_) => false,
            Err(e) => {
                warn!(execution_id, error = %e, "failed to re-read execution status");
                false
            }
        }
    }

    /// Records not-yet-run steps as abandoned after a stop.
    async fn abandon_remaining(
        &self,
        execution_id: i64,
        job: &JobDefinition,
        from_index: usize,
        steps: &mut Vec<StepExecution>,
    ) {
        for step_def in &job.steps[from_index..] {
            match self
                .store
                .create_step_execution(execution_id, &step_def.name)
                .await
            {
                Ok(mut step_exec) => {
                    step_exec.status = BatchStatus::Abandoned;
                    step_exec.exit_status = ExitStatus::abandoned();
                    step_exec.end_time = Some(now_utc());
                    if let Err(e) = self.store.update_step_execution(&step_exec).await {
                        error!(execution_id, step = %step_def.name, error = %e, "failed to persist abandoned step");
                    }
                    steps.push(step_exec);
                }
                Err(e) => {
                    error!(execution_id, step = %step_def.name, error = %e, "failed to record abandoned step");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EventChannels;
    use crate::core::{ExitCode, JobEvent, JobEventType};
    use crate::events::CollectingEventSink;
    use crate::params::JobParameters;
    use crate::step::{FnStep, Step};
    use crate::store::SqliteStore;
    use crate::utils::now_millis;
    use async_trait::async_trait;

    struct Fixture {
        store: Arc<SqliteStore>,
        sink: Arc<CollectingEventSink>,
        runtime: PipelineRuntime,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let sink = Arc::new(CollectingEventSink::new());
        let publisher = Arc::new(JobEventPublisher::new(
            sink.clone(),
            EventChannels::default(),
        ));
        let runtime = PipelineRuntime::new(store.clone(), publisher);
        Fixture {
            store,
            sink,
            runtime,
        }
    }

    async fn create_execution(store: &SqliteStore, job_name: &str) -> JobExecution {
        let parameters = JobParameters::builder()
            .add_string("triggerId", "trig-1", true)
            .add_long("timestamp", now_millis(), true)
            .build();
        let instance = store.create_instance(job_name, &parameters).await.unwrap();
        store.create_execution(&instance, &parameters).await.unwrap()
    }

    fn finished_step() -> Arc<dyn Step> {
        Arc::new(FnStep::new(|ctx: &StepContext| {
            ctx.contribution().increment_read_count(10);
            ctx.contribution().increment_write_count(10);
            StepOutcome::Finished
        }))
    }

    fn parse_events(payloads: Vec<String>) -> Vec<JobEvent> {
        payloads
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_happy_path_two_steps() {
        let f = fixture();
        let job = Arc::new(
            JobDefinition::builder("reportJob")
                .step("extract", finished_step())
                .step("publish", finished_step())
                .build()
                .unwrap(),
        );
        let execution = create_execution(&f.store, "reportJob").await;

        f.runtime
            .run(execution.id, job, Arc::new(CancelToken::new()))
            .await;

        let loaded = f.store.find_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Completed);
        assert_eq!(loaded.exit_status.exit_code, ExitCode::Completed);
        assert!(loaded.start_time.is_some());
        assert!(loaded.end_time.is_some());

        let steps = f.store.list_step_executions(execution.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert!(steps.iter().all(|s| s.status == BatchStatus::Completed));
        assert_eq!(steps[0].read_count, 10);

        let progress_events =
            parse_events(f.sink.events_on("batch:events:job-progress"));
        assert_eq!(progress_events.len(), 2);
        assert_eq!(progress_events[0].progress, Some(50));
        assert_eq!(progress_events[1].progress, Some(100));

        let completed = parse_events(f.sink.events_on("batch:events:job-completed"));
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].event_type, JobEventType::JobCompleted);
        assert_eq!(completed[0].read_count, 20);
    }

    #[tokio::test]
    async fn test_step_failure_stops_the_chain() {
        let f = fixture();
        let job = Arc::new(
            JobDefinition::builder("failingJob")
                .step("ok", finished_step())
                .step(
                    "boom",
                    Arc::new(FnStep::new(|_ctx: &StepContext| StepOutcome::failed("boom"))),
                )
                .step("never", finished_step())
                .build()
                .unwrap(),
        );
        let execution = create_execution(&f.store, "failingJob").await;

        f.runtime
            .run(execution.id, job, Arc::new(CancelToken::new()))
            .await;

        let loaded = f.store.find_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Failed);
        assert_eq!(loaded.exit_status.exit_code, ExitCode::Failed);
        assert!(loaded.exit_status.exit_description.contains("boom"));

        // The step after the failure never ran.
        let steps = f.store.list_step_executions(execution.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].status, BatchStatus::Failed);

        assert_eq!(f.sink.events_on("batch:events:job-progress").len(), 1);
        let failed = parse_events(f.sink.events_on("batch:events:job-failed"));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].event_type, JobEventType::JobFailed);
    }

    #[tokio::test]
    async fn test_context_flows_between_steps() {
        let f = fixture();
        let writer = Arc::new(FnStep::new(|ctx: &StepContext| {
            ctx.context().put_string("inputFilePath", "/tmp/in.dat");
            StepOutcome::Finished
        }));
        let reader = Arc::new(FnStep::new(|ctx: &StepContext| {
            match ctx.context().get_string("inputFilePath") {
                Some(path) if path == "/tmp/in.dat" => StepOutcome::Finished,
                other => StepOutcome::failed(format!("unexpected path: {other:?}")),
            }
        }));
        let job = Arc::new(
            JobDefinition::builder("contextJob")
                .step("write", writer)
                .step("read", reader)
                .build()
                .unwrap(),
        );
        let execution = create_execution(&f.store, "contextJob").await;

        f.runtime
            .run(execution.id, job, Arc::new(CancelToken::new()))
            .await;

        let loaded = f.store.find_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Completed);
        assert_eq!(
            loaded.context.get_string("inputFilePath").as_deref(),
            Some("/tmp/in.dat")
        );
    }

    #[tokio::test]
    async fn test_stop_between_steps_abandons_the_rest() {
        let f = fixture();

        struct StopRequestingStep {
            store: Arc<SqliteStore>,
        }

        #[async_trait]
        impl Step for StopRequestingStep {
            async fn execute(&self, ctx: &StepContext) -> StepOutcome {
                // Simulates an external stop landing while this step runs.
                let mut execution = self
                    .store
                    .find_execution(ctx.execution_id())
                    .await
                    .unwrap()
                    .unwrap();
                execution.status = BatchStatus::Stopping;
                self.store.update_execution(&execution).await.unwrap();
                StepOutcome::Finished
            }
        }

        let job = Arc::new(
            JobDefinition::builder("stoppableJob")
                .step(
                    "first",
                    Arc::new(StopRequestingStep {
                        store: f.store.clone(),
                    }),
                )
                .step("second", finished_step())
                .step("third", finished_step())
                .build()
                .unwrap(),
        );
        let execution = create_execution(&f.store, "stoppableJob").await;

        f.runtime
            .run(execution.id, job, Arc::new(CancelToken::new()))
            .await;

        let loaded = f.store.find_execution(execution.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, BatchStatus::Stopped);
        assert_eq!(loaded.exit_status.exit_code, ExitCode::Stopped);

        let steps = f.store.list_step_executions(execution.id).await.unwrap();
        assert_eq!(steps.len(), 3);
        assert_eq!(steps[0].status, BatchStatus::Completed);
        assert_eq!(steps[1].status, BatchStatus::Abandoned);
        assert_eq!(steps[2].status, BatchStatus::Abandoned);

        // Step events first, then the terminal event on the failed channel.
        let failed = parse_events(f.sink.events_on("batch:events:job-failed"));
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].event_type, JobEventType::JobStopped);
        let all = f.sink.events();
        assert_eq!(all.last().unwrap().0, "batch:events:job-failed");
    }

    #[tokio::test]
    async fn test_event_order_is_causal() {
        let f = fixture();
        let job = Arc::new(
            JobDefinition::builder("orderedJob")
                .step("only", finished_step())
                .build()
                .unwrap(),
        );
        let execution = create_execution(&f.store, "orderedJob").await;

        f.runtime
            .run(execution.id, job, Arc::new(CancelToken::new()))
            .await;

        let channels: Vec<String> = f.sink.events().into_iter().map(|(c, _)| c).collect();
        assert_eq!(
            channels,
            vec![
                "batch:events:job-started".to_string(),
                "batch:events:job-progress".to_string(),
                "batch:events:job-completed".to_string(),
            ]
        );
    }
}
