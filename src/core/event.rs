//! Lifecycle event envelope published to subscribers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle transitions that produce an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobEventType {
    /// The runtime picked up the execution and moved it to `Started`.
    JobStarted,
    /// A step finished successfully.
    StepCompleted,
    /// The execution reached `Completed`.
    JobCompleted,
    /// The execution reached `Failed`.
    JobFailed,
    /// The execution reached `Stopped`.
    JobStopped,
}

impl JobEventType {
    /// The stable string form used in event payloads.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::JobStarted => "JOB_STARTED",
            Self::StepCompleted => "STEP_COMPLETED",
            Self::JobCompleted => "JOB_COMPLETED",
            Self::JobFailed => "JOB_FAILED",
            Self::JobStopped => "JOB_STOPPED",
        }
    }
}

impl fmt::Display for JobEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The JSON envelope serialized onto an event channel.
///
/// Subscribers must tolerate unknown fields, duplicate deliveries, and
/// out-of-order delivery across executions; within one execution events are
/// emitted in causal order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    /// The lifecycle transition, e.g. `JOB_STARTED`.
    pub event_type: JobEventType,
    /// When the event was built (ISO 8601).
    pub timestamp: String,
    /// The execution id the event belongs to.
    pub execution_id: i64,
    /// The job name.
    pub job_name: String,
    /// The execution status at emission time.
    pub status: String,
    /// The execution exit code at emission time.
    pub exit_code: String,
    /// The execution exit description at emission time.
    pub exit_description: String,
    /// Execution start time (ISO 8601), once started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    /// Execution end time (ISO 8601), once finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    /// The external correlation id supplied at trigger time.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_id: Option<String>,
    /// Step executions recorded so far.
    pub step_count: usize,
    /// Items read, summed across all step executions.
    pub read_count: u64,
    /// Items written, summed across all step executions.
    pub write_count: u64,
    /// Items skipped, summed across all step executions.
    pub skip_count: u64,
    /// The completed step, for `STEP_COMPLETED` events.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step_name: Option<String>,
    /// Whole-percent progress through the step list, for `STEP_COMPLETED`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
}

impl JobEvent {
    /// Attaches step progress fields, turning a base envelope into a
    /// `STEP_COMPLETED` payload.
    #[must_use]
    pub fn with_step(mut self, step_name: impl Into<String>, progress: u32) -> Self {
        self.step_name = Some(step_name.into());
        self.progress = Some(progress);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_event() -> JobEvent {
        JobEvent {
            event_type: JobEventType::JobStarted,
            timestamp: crate::utils::iso_timestamp(),
            execution_id: 42,
            job_name: "paymentFileGenerationJob".to_string(),
            status: "STARTED".to_string(),
            exit_code: "UNKNOWN".to_string(),
            exit_description: String::new(),
            start_time: None,
            end_time: None,
            trigger_id: Some("abc".to_string()),
            step_count: 0,
            read_count: 0,
            write_count: 0,
            skip_count: 0,
            step_name: None,
            progress: None,
        }
    }

    #[test]
    fn test_event_type_strings() {
        assert_eq!(JobEventType::JobStarted.as_str(), "JOB_STARTED");
        assert_eq!(JobEventType::StepCompleted.as_str(), "STEP_COMPLETED");
        assert_eq!(JobEventType::JobStopped.as_str(), "JOB_STOPPED");
    }

    #[test]
    fn test_envelope_uses_camel_case() {
        let json = serde_json::to_value(sample_event()).unwrap();
        assert_eq!(json["eventType"], "JOB_STARTED");
        assert_eq!(json["executionId"], 42);
        assert_eq!(json["triggerId"], "abc");
        assert!(json.get("stepName").is_none());
    }

    #[test]
    fn test_with_step_sets_progress_fields() {
        let event = sample_event().with_step("parseAndAggregate", 50);
        assert_eq!(event.step_name.as_deref(), Some("parseAndAggregate"));
        assert_eq!(event.progress, Some(50));
    }

    #[test]
    fn test_subscribers_tolerate_unknown_fields() {
        let mut json = serde_json::to_value(sample_event()).unwrap();
        json["futureField"] = serde_json::json!("ignored");
        let parsed: JobEvent = serde_json::from_value(json).unwrap();
        assert_eq!(parsed.execution_id, 42);
    }
}
