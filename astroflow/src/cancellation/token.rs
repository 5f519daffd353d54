//! Stop signal shared between the scheduler loop and its handle.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A one-shot signal requesting that a background loop stop.
///
/// Stopping is idempotent - only the first reason is kept. The signal is
/// observed at loop boundaries only; it never interrupts work in progress.
#[derive(Default)]
pub struct StopSignal {
    stopped: AtomicBool,
    reason: RwLock<Option<String>>,
    notify: Notify,
}

impl StopSignal {
    /// Creates a new, unsignalled stop signal.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests a stop. Wakes every task waiting in [`StopSignal::stopped`].
    pub fn stop(&self, reason: impl Into<String>) {
        if self
            .stopped
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            *self.reason.write() = Some(reason.into());
            self.notify.notify_waiters();
        }
    }

    /// Returns whether a stop has been requested.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Returns the stop reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Completes once a stop has been requested.
    pub async fn stopped(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // register before checking the flag so a concurrent stop is not missed
        notified.as_mut().enable();
        if self.is_stopped() {
            return;
        }
        notified.await;
    }
}

impl std::fmt::Debug for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StopSignal")
            .field("stopped", &self.is_stopped())
            .field("reason", &self.reason())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_signal_default_not_stopped() {
        let signal = StopSignal::new();
        assert!(!signal.is_stopped());
        assert!(signal.reason().is_none());
    }

    #[test]
    fn test_stop_first_reason_wins() {
        let signal = StopSignal::new();
        signal.stop("shutdown");
        signal.stop("again");

        assert!(signal.is_stopped());
        assert_eq!(signal.reason(), Some("shutdown".to_string()));
    }

    #[tokio::test]
    async fn test_stopped_returns_immediately_when_already_stopped() {
        let signal = StopSignal::new();
        signal.stop("done");
        tokio::time::timeout(Duration::from_secs(1), signal.stopped())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_stopped_wakes_waiter() {
        let signal = Arc::new(StopSignal::new());
        let waiter = {
            let signal = signal.clone();
            tokio::spawn(async move { signal.stopped().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        signal.stop("test");

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_stopped_pending_until_stop() {
        let signal = StopSignal::new();
        let mut waiter = tokio_test::task::spawn(signal.stopped());

        tokio_test::assert_pending!(waiter.poll());
        signal.stop("test");
        assert!(waiter.is_woken());
        tokio_test::assert_ready!(waiter.poll());
    }
}
