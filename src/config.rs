//! Configuration types.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Coordinator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Bounded wait for the metadata lock, in seconds.
    #[serde(default = "default_queue_timeout_seconds")]
    pub queue_timeout_seconds: u64,
    /// Attempts for the metadata-creation critical section.
    #[serde(default = "default_metadata_retry_attempts")]
    pub metadata_retry_attempts: u32,
    /// Instances scanned per job when correlating by trigger id.
    #[serde(default = "default_recent_instance_page_size")]
    pub recent_instance_page_size: usize,
}

fn default_queue_timeout_seconds() -> u64 {
    120
}

fn default_metadata_retry_attempts() -> u32 {
    3
}

fn default_recent_instance_page_size() -> usize {
    100
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            queue_timeout_seconds: default_queue_timeout_seconds(),
            metadata_retry_attempts: default_metadata_retry_attempts(),
            recent_instance_page_size: default_recent_instance_page_size(),
        }
    }
}

impl CoordinatorConfig {
    /// The metadata-lock wait as a [`Duration`].
    #[must_use]
    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_seconds)
    }
}

/// Streaming aggregation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamingConfig {
    /// Records between flushes of the aggregation buffers.
    #[serde(default = "default_flush_size")]
    pub flush_size: usize,
}

fn default_flush_size() -> usize {
    5000
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            flush_size: default_flush_size(),
        }
    }
}

/// Aggregation key-family tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AggregationConfig {
    /// How many composite key families to maintain (1 to 3).
    #[serde(default = "default_depth")]
    pub depth: u8,
}

fn default_depth() -> u8 {
    3
}

impl Default for AggregationConfig {
    fn default() -> Self {
        Self {
            depth: default_depth(),
        }
    }
}

/// Logical event channel names.
///
/// Implementations map these to concrete pub/sub topics; the defaults match
/// the channels the scheduler subscribes to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventChannels {
    /// Channel for `JOB_STARTED`.
    #[serde(default = "default_started_channel")]
    pub started: String,
    /// Channel for `STEP_COMPLETED` progress events.
    #[serde(default = "default_progress_channel")]
    pub progress: String,
    /// Channel for `JOB_COMPLETED`.
    #[serde(default = "default_completed_channel")]
    pub completed: String,
    /// Channel for `JOB_FAILED` and `JOB_STOPPED`.
    #[serde(default = "default_failed_channel")]
    pub failed: String,
}

fn default_started_channel() -> String {
    "batch:events:job-started".to_string()
}

fn default_progress_channel() -> String {
    "batch:events:job-progress".to_string()
}

fn default_completed_channel() -> String {
    "batch:events:job-completed".to_string()
}

fn default_failed_channel() -> String {
    "batch:events:job-failed".to_string()
}

impl Default for EventChannels {
    fn default() -> Self {
        Self {
            started: default_started_channel(),
            progress: default_progress_channel(),
            completed: default_completed_channel(),
            failed: default_failed_channel(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Coordinator tuning.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,
    /// Streaming aggregation tuning.
    #[serde(default)]
    pub streaming: StreamingConfig,
    /// Aggregation key-family tuning.
    #[serde(default)]
    pub aggregation: AggregationConfig,
    /// Event channel names.
    #[serde(default)]
    pub channels: EventChannels,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.coordinator.queue_timeout_seconds, 120);
        assert_eq!(config.coordinator.metadata_retry_attempts, 3);
        assert_eq!(config.streaming.flush_size, 5000);
        assert_eq!(config.aggregation.depth, 3);
        assert_eq!(config.channels.started, "batch:events:job-started");
        assert_eq!(config.channels.failed, "batch:events:job-failed");
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: BatchConfig = serde_json::from_str(
            r#"{"coordinator": {"queue_timeout_seconds": 5}, "streaming": {"flush_size": 100}}"#,
        )
        .unwrap();
        assert_eq!(config.coordinator.queue_timeout_seconds, 5);
        assert_eq!(config.coordinator.metadata_retry_attempts, 3);
        assert_eq!(config.streaming.flush_size, 100);
        assert_eq!(config.aggregation.depth, 3);
    }

    #[test]
    fn test_queue_timeout_duration() {
        let config = CoordinatorConfig {
            queue_timeout_seconds: 2,
            ..CoordinatorConfig::default()
        };
        assert_eq!(config.queue_timeout(), Duration::from_secs(2));
    }
}
