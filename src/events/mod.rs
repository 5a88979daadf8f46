//! Lifecycle event publication.

mod publisher;
mod sink;

pub use publisher::JobEventPublisher;
pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
