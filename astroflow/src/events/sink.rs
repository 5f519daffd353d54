//! Event sink trait and implementations.

use super::PipelineEvent;
use parking_lot::RwLock;
use tracing::{debug, info, warn, Level};

/// Trait for sinks that receive pipeline events.
///
/// `emit` is called from the scheduler loop and the runner; implementations
/// must return quickly and must not panic.
pub trait EventSink: Send + Sync {
    /// Receives one event.
    fn emit(&self, event: &PipelineEvent);
}

/// A sink that discards all events.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event: &PipelineEvent) {}
}

/// A sink that logs events using the tracing framework.
///
/// Failures are always logged at `warn`; everything else at the configured
/// level.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a new logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        let event_type = event.event_type();
        let is_failure = matches!(
            event,
            PipelineEvent::StageFailed { .. }
                | PipelineEvent::RunFinished {
                    error: Some(_),
                    ..
                }
        );
        if is_failure {
            warn!(event_type, event = ?event, "Event: {}", event_type);
        } else if self.level == Level::DEBUG {
            debug!(event_type, event = ?event, "Event: {}", event_type);
        } else {
            info!(event_type, event = ?event, "Event: {}", event_type);
        }
    }
}

/// A sink that keeps every event, for tests and instrumentation.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<PipelineEvent>>,
}

impl CollectingEventSink {
    /// Creates a new collecting sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<PipelineEvent> {
        self.events.read().clone()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if no events have been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose dotted name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<PipelineEvent> {
        self.events
            .read()
            .iter()
            .filter(|e| e.event_type().starts_with(prefix))
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: &PipelineEvent) {
        self.events.write().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TickDropReason;

    #[test]
    fn test_noop_and_logging_sinks() {
        NoOpEventSink.emit(&PipelineEvent::TickIdle);
        LoggingEventSink::default().emit(&PipelineEvent::TickIdle);
        LoggingEventSink::debug().emit(&PipelineEvent::SchedulerStopped { reason: None });
        // should not panic
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit(&PipelineEvent::TickIdle);
        sink.emit(&PipelineEvent::TickDropped {
            reason: TickDropReason::Cooldown,
        });

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.events_of_type("tick.dropped").len(), 1);
        assert_eq!(sink.events_of_type("tick.").len(), 2);

        sink.clear();
        assert!(sink.is_empty());
    }
}
