//! # Batchflow
//!
//! Batch-job execution and coordination between an external scheduler and
//! long-running data-processing jobs.
//!
//! Batchflow turns external trigger requests into durable, uniquely
//! identified job runs and drives each run to a terminal status:
//!
//! - **Trigger coordination**: external trigger ids are correlated with
//!   internal executions; metadata creation is serialized behind a fair
//!   process-wide lock while job bodies run with unbounded parallelism.
//! - **Step pipelines**: each job is an ordered chain of idempotent steps
//!   sharing an execution context, with per-step progress, failure
//!   semantics, and cooperative stop handling.
//! - **Streaming aggregation**: large record streams reduce into keyed
//!   aggregate rows through bounded-memory buffers and batched upserts with
//!   commutative merge semantics.
//! - **Lifecycle events**: started/progress/completed/failed envelopes are
//!   published fire-and-forget onto named channels.
//!
//! ## Quick start
//!
//! ```rust,ignore
//! use batchflow::prelude::*;
//!
//! let registry = Arc::new(JobRegistry::new());
//! registry.register(
//!     JobDefinition::builder("reportJob")
//!         .step("extract", Arc::new(ExtractStep::new()))
//!         .step("aggregate", Arc::new(AggregateStep::new()))
//!         .step("publish", Arc::new(PublishStep::new()))
//!         .build()?,
//! )?;
//!
//! let store = Arc::new(SqliteStore::open("batch.db")?);
//! let publisher = Arc::new(JobEventPublisher::new(sink, EventChannels::default()));
//! let coordinator = BatchCoordinator::new(registry, store, publisher, config);
//!
//! let execution = coordinator.trigger("reportJob", &trigger_id, &params).await?;
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, missing_docs, rust_2018_idioms)]
#![allow(clippy::module_name_repetitions, clippy::must_use_candidate)]

pub mod aggregation;
pub mod cancellation;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod core;
pub mod errors;
pub mod events;
pub mod params;
pub mod pipeline;
pub mod records;
pub mod registry;
pub mod step;
pub mod store;
pub mod utils;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::aggregation::{
        AggregationStats, AggregationType, StreamingAggregator, WorkRecord,
    };
    pub use crate::cancellation::CancelToken;
    pub use crate::config::{BatchConfig, CoordinatorConfig, EventChannels};
    pub use crate::context::{ContextValue, ExecutionContext};
    pub use crate::coordinator::{BatchCoordinator, TriggerResponse};
    pub use crate::core::{BatchStatus, ExitCode, ExitStatus, JobEvent, JobEventType};
    pub use crate::errors::{BatchflowError, RecordError, StoreError};
    pub use crate::events::{
        CollectingEventSink, EventSink, JobEventPublisher, LoggingEventSink, NoOpEventSink,
    };
    pub use crate::params::{JobParameters, ParamKind, ParamValue, ParameterKey};
    pub use crate::pipeline::PipelineRuntime;
    pub use crate::records::{FieldSpec, RecordSchema, SchemaRegistry};
    pub use crate::registry::{JobDefinition, JobRegistry, StepDefinition};
    pub use crate::step::{FnStep, Step, StepContext, StepContribution, StepOutcome};
    pub use crate::store::{
        AggregationDelta, AggregationRow, AggregationStore, ExecutionStore, JobExecution,
        JobInstance, SqliteStore, StepExecution,
    };
}
