//! Error types for the batchflow crate.
//!
//! Resolution and capacity errors are reported synchronously from the
//! coordinator; storage errors are retried before being surfaced; step-body
//! failures never escape the pipeline worker and are only observable through
//! the persisted execution row and published events.

use crate::core::BatchStatus;
use crate::params::ParamKind;
use thiserror::Error;

/// The main error type for batchflow operations.
#[derive(Debug, Error)]
pub enum BatchflowError {
    /// The requested job name is not present in the registry.
    #[error("job not found: {name}")]
    UnknownJob {
        /// The job name that failed to resolve.
        name: String,
    },

    /// A caller-supplied parameter could not be coerced to its declared type.
    #[error("parameter '{key}' is not a valid {expected}: '{value}'")]
    ParameterCoercion {
        /// The parameter key.
        key: String,
        /// The declared parameter kind.
        expected: ParamKind,
        /// The raw value that failed coercion.
        value: String,
    },

    /// The metadata lock was not acquired within the configured wait.
    #[error(
        "timeout waiting for metadata lock: {job_name}, triggerId: {trigger_id}, queue depth was: {queue_depth}"
    )]
    LockTimeout {
        /// The job being triggered.
        job_name: String,
        /// The external trigger id.
        trigger_id: String,
        /// Threads waiting on the lock when the wait expired.
        queue_depth: usize,
    },

    /// Metadata creation failed after exhausting all retry attempts.
    #[error("metadata creation failed after {attempts} attempts: {source}")]
    StorageFailure {
        /// How many attempts were made.
        attempts: u32,
        /// The last underlying storage error.
        #[source]
        source: StoreError,
    },

    /// A storage operation failed outside the retried critical section.
    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    /// A job or step definition failed validation at registration time.
    #[error("registration error: {0}")]
    Registration(String),

    /// An invalid configuration value was supplied.
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Errors produced by the execution and aggregation store adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The underlying SQL engine reported an error.
    #[error("sqlite: {0}")]
    Sql(#[from] rusqlite::Error),

    /// A referenced row does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// The entity kind (execution, instance, step execution).
        entity: &'static str,
        /// The missing row id.
        id: i64,
    },

    /// A status write would take an execution backwards out of a terminal state.
    #[error("illegal status transition: {from} -> {to}")]
    IllegalTransition {
        /// The persisted status.
        from: BatchStatus,
        /// The rejected target status.
        to: BatchStatus,
    },

    /// A persisted snapshot could not be decoded.
    #[error("corrupt snapshot: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Returns true if retrying the operation could succeed.
    ///
    /// Only engine-level failures are considered transient; missing rows and
    /// rejected transitions are permanent.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Sql(_))
    }
}

/// Error for a single malformed input record in the aggregation stream.
#[derive(Debug, Error)]
pub enum RecordError {
    /// The record is not valid JSON or not an object.
    #[error("malformed record: {0}")]
    Malformed(String),

    /// Reading the underlying stream failed.
    #[error("record read error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_job_message() {
        let err = BatchflowError::UnknownJob {
            name: "countyDailyReportJob".to_string(),
        };
        assert_eq!(err.to_string(), "job not found: countyDailyReportJob");
    }

    #[test]
    fn test_lock_timeout_message_includes_depth() {
        let err = BatchflowError::LockTimeout {
            job_name: "j".to_string(),
            trigger_id: "t".to_string(),
            queue_depth: 17,
        };
        assert!(err.to_string().contains("queue depth was: 17"));
    }

    #[test]
    fn test_store_error_transient() {
        assert!(StoreError::Sql(rusqlite::Error::InvalidQuery).is_transient());
        assert!(!StoreError::NotFound {
            entity: "execution",
            id: 1
        }
        .is_transient());
    }

    #[test]
    fn test_illegal_transition_message() {
        let err = StoreError::IllegalTransition {
            from: BatchStatus::Completed,
            to: BatchStatus::Started,
        };
        assert_eq!(
            err.to_string(),
            "illegal status transition: COMPLETED -> STARTED"
        );
    }
}
