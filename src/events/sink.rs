//! Event sink trait and implementations.

use async_trait::async_trait;
use tracing::{debug, info};

/// Destination for serialized lifecycle events.
///
/// Implementations map logical channel names to concrete pub/sub topics.
/// Delivery is fire-and-forget: a sink must never let a publication failure
/// reach its caller.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publishes a payload to a channel.
    async fn publish(&self, channel: &str, payload: &str);

    /// Publishes without blocking and without failing.
    ///
    /// Errors are logged and suppressed.
    fn try_publish(&self, channel: &str, payload: &str);
}

/// A sink that discards all events.
///
/// The default when no event transport is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn publish(&self, _channel: &str, _payload: &str) {
        // Intentionally empty - discards all events
    }

    fn try_publish(&self, _channel: &str, _payload: &str) {
        // Intentionally empty - discards all events
    }
}

/// A sink that logs events through the tracing framework.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingEventSink;

impl LoggingEventSink {
    /// Creates a logging sink.
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    fn log(channel: &str, payload: &str) {
        debug!(channel = %channel, payload = %payload, "publishing event");
        info!(channel = %channel, "published event");
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn publish(&self, channel: &str, payload: &str) {
        Self::log(channel, payload);
    }

    fn try_publish(&self, channel: &str, payload: &str) {
        Self::log(channel, payload);
    }
}

/// A collecting sink for tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, String)>>,
}

impl CollectingEventSink {
    /// Creates an empty collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected `(channel, payload)` pairs, in emission order.
    #[must_use]
    pub fn events(&self) -> Vec<(String, String)> {
        self.events.read().clone()
    }

    /// Returns the payloads published to one channel.
    #[must_use]
    pub fn events_on(&self, channel: &str) -> Vec<String> {
        self.events
            .read()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn publish(&self, channel: &str, payload: &str) {
        self.events
            .write()
            .push((channel.to_string(), payload.to_string()));
    }

    fn try_publish(&self, channel: &str, payload: &str) {
        self.events
            .write()
            .push((channel.to_string(), payload.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_noop_sink() {
        let sink = NoOpEventSink;
        sink.publish("chan", "{}").await;
        sink.try_publish("chan", "{}");
        // Should not panic
    }

    #[tokio::test]
    async fn test_logging_sink() {
        let sink = LoggingEventSink::new();
        sink.publish("batch:events:job-started", "{}").await;
        sink.try_publish("batch:events:job-started", "{}");
        // Should not panic
    }

    #[tokio::test]
    async fn test_collecting_sink_orders_and_filters() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.publish("a", "1").await;
        sink.try_publish("b", "2");
        sink.try_publish("a", "3");

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.events_on("a"), vec!["1".to_string(), "3".to_string()]);
        assert_eq!(sink.events_on("b"), vec!["2".to_string()]);

        sink.clear();
        assert!(sink.is_empty());
    }
}
