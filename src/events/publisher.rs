//! Publishes job lifecycle events onto the configured channels.
//!
//! The scheduler subscribes to these events to update execution status in
//! real time, trigger dependent jobs on success, and send notifications on
//! completion or failure. Publication failures are logged and never reach
//! the pipeline runtime: an event transport outage must not fail jobs.

use super::EventSink;
use crate::config::EventChannels;
use crate::core::{BatchStatus, JobEvent, JobEventType};
use crate::store::{JobExecution, StepExecution};
use crate::utils::{format_iso8601, iso_timestamp};
use std::sync::Arc;
use tracing::{error, info};

/// Builds event envelopes and routes them to channels through a sink.
pub struct JobEventPublisher {
    sink: Arc<dyn EventSink>,
    channels: EventChannels,
}

impl JobEventPublisher {
    /// Creates a publisher over a sink with the given channel names.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>, channels: EventChannels) -> Self {
        Self { sink, channels }
    }

    /// Publishes `JOB_STARTED` on the started channel.
    pub fn publish_job_started(&self, execution: &JobExecution, steps: &[StepExecution]) {
        let event = Self::base_event(execution, steps, JobEventType::JobStarted);
        self.publish(&self.channels.started, &event);
    }

    /// Publishes `STEP_COMPLETED` on the progress channel.
    pub fn publish_step_completed(
        &self,
        execution: &JobExecution,
        steps: &[StepExecution],
        step_name: &str,
        progress: u32,
    ) {
        let event = Self::base_event(execution, steps, JobEventType::StepCompleted)
            .with_step(step_name, progress);
        self.publish(&self.channels.progress, &event);
    }

    /// Publishes the terminal event for a completed or failed execution.
    ///
    /// `COMPLETED` goes to the completed channel; anything else is reported
    /// as `JOB_FAILED` on the failed channel.
    pub fn publish_job_completed(&self, execution: &JobExecution, steps: &[StepExecution]) {
        let (event_type, channel) = if execution.status == BatchStatus::Completed {
            (JobEventType::JobCompleted, &self.channels.completed)
        } else {
            (JobEventType::JobFailed, &self.channels.failed)
        };
        let event = Self::base_event(execution, steps, event_type);
        self.publish(channel, &event);
    }

    /// Publishes `JOB_STOPPED` on the failed channel.
    pub fn publish_job_stopped(&self, execution: &JobExecution, steps: &[StepExecution]) {
        let event = Self::base_event(execution, steps, JobEventType::JobStopped);
        self.publish(&self.channels.failed, &event);
    }

    fn base_event(
        execution: &JobExecution,
        steps: &[StepExecution],
        event_type: JobEventType,
    ) -> JobEvent {
        let read_count = steps.iter().map(|s| s.read_count).sum();
        let write_count = steps.iter().map(|s| s.write_count).sum();
        let skip_count = steps.iter().map(|s| s.skip_count).sum();

        JobEvent {
            event_type,
            timestamp: iso_timestamp(),
            execution_id: execution.id,
            job_name: execution.job_name.clone(),
            status: execution.status.as_str().to_string(),
            exit_code: execution.exit_status.exit_code.as_str().to_string(),
            exit_description: execution.exit_status.exit_description.clone(),
            start_time: execution.start_time.as_ref().map(format_iso8601),
            end_time: execution.end_time.as_ref().map(format_iso8601),
            trigger_id: execution
                .parameters
                .get_string("triggerId")
                .map(str::to_string),
            step_count: steps.len(),
            read_count,
            write_count,
            skip_count,
            step_name: None,
            progress: None,
        }
    }

    fn publish(&self, channel: &str, event: &JobEvent) {
        match serde_json::to_string(event) {
            Ok(payload) => {
                self.sink.try_publish(channel, &payload);
                info!(
                    event_type = %event.event_type,
                    channel = %channel,
                    job_name = %event.job_name,
                    execution_id = event.execution_id,
                    "published job event"
                );
            }
            Err(e) => {
                error!(
                    channel = %channel,
                    error = %e,
                    "failed to serialize job event"
                );
            }
        }
    }
}
