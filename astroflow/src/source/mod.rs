//! Observation sources polled by the scheduler.
//!
//! A source answers "what should the next run process?" with either an
//! [`Observation`] or `None`, which the scheduler treats as an idle tick.

use crate::core::Observation;
use crate::stages::SYNTHETIC_SCHEME;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Trait for producers of observations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObservationSource: Send + Sync {
    /// Returns the next observation to process, if one is available.
    ///
    /// Must not block for long; the scheduler awaits it on every tick.
    async fn next_observation(&self) -> Option<Observation>;
}

/// Hands out an endless sequence of synthetic observations.
///
/// Ids are `obs-000001`, `obs-000002`, ... and artifact refs are
/// `synthetic://1`, `synthetic://2`, ...
#[derive(Debug, Default)]
pub struct SyntheticObservationSource {
    counter: AtomicU64,
}

impl SyntheticObservationSource {
    /// Creates a source starting at 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of observations handed out so far.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObservationSource for SyntheticObservationSource {
    async fn next_observation(&self) -> Option<Observation> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        let observation =
            Observation::new(format!("obs-{n:06}"), format!("{SYNTHETIC_SCHEME}{n}"));
        debug!(observation_id = %observation.id, "Generated synthetic observation");
        Some(observation)
    }
}

/// A FIFO of observations fed by callers.
#[derive(Debug, Default)]
pub struct QueuedObservationSource {
    queue: Mutex<VecDeque<Observation>>,
}

impl QueuedObservationSource {
    /// Creates an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an observation.
    pub fn push(&self, observation: Observation) {
        self.queue.lock().push_back(observation);
    }

    /// Number of queued observations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

impl FromIterator<Observation> for QueuedObservationSource {
    fn from_iter<T: IntoIterator<Item = Observation>>(iter: T) -> Self {
        Self {
            queue: Mutex::new(iter.into_iter().collect()),
        }
    }
}

#[async_trait]
impl ObservationSource for QueuedObservationSource {
    async fn next_observation(&self) -> Option<Observation> {
        self.queue.lock().pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_source_sequence() {
        let source = SyntheticObservationSource::new();
        let first = source.next_observation().await.unwrap();
        let second = source.next_observation().await.unwrap();

        assert_eq!(first.id, "obs-000001");
        assert_eq!(first.artifact_ref, "synthetic://1");
        assert_eq!(second.id, "obs-000002");
        assert_eq!(source.issued(), 2);
    }

    #[tokio::test]
    async fn test_queued_source_is_fifo() {
        let source: QueuedObservationSource = vec![
            Observation::new("a", "synthetic://a"),
            Observation::new("b", "synthetic://b"),
        ]
        .into_iter()
        .collect();

        assert_eq!(source.len(), 2);
        assert_eq!(source.next_observation().await.unwrap().id, "a");
        assert_eq!(source.next_observation().await.unwrap().id, "b");
        assert!(source.next_observation().await.is_none());
        assert!(source.is_empty());
    }

    #[tokio::test]
    async fn test_mock_source() {
        let mut mock = MockObservationSource::new();
        mock.expect_next_observation()
            .times(1)
            .returning(|| Some(Observation::new("m", "synthetic://m")));

        let obs = mock.next_observation().await.unwrap();
        assert_eq!(obs.id, "m");
    }
}
