//! Mock stages for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

use crate::errors::StageError;
use crate::stages::Stage;

/// A stage that always returns a clone of a fixed output.
pub struct FixedStage<I, O> {
    name: String,
    output: Mutex<O>,
    call_count: AtomicUsize,
    _input: PhantomData<fn(&I)>,
}

impl<I, O: Clone> FixedStage<I, O> {
    /// Creates a new fixed stage.
    #[must_use]
    pub fn new(name: impl Into<String>, output: O) -> Self {
        Self {
            name: name.into(),
            output: Mutex::new(output),
            call_count: AtomicUsize::new(0),
            _input: PhantomData,
        }
    }

    /// Replaces the output to return.
    pub fn set_output(&self, output: O) {
        *self.output.lock() = output;
    }

    /// Returns the number of times the stage was called.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }
}

impl<I, O> fmt::Debug for FixedStage<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedStage").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<I, O> Stage for FixedStage<I, O>
where
    I: Send + Sync,
    O: Clone + Send,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _input: &I) -> Result<O, StageError> {
        self.call_count.fetch_add(1, Ordering::SeqCst);
        Ok(self.output.lock().clone())
    }
}

/// A stage that always fails with the same error.
pub struct FailingStage<I, O> {
    name: String,
    error: StageError,
    _types: PhantomData<fn(&I) -> O>,
}

impl<I, O> FailingStage<I, O> {
    /// Creates a new failing stage.
    #[must_use]
    pub fn new(name: impl Into<String>, error: StageError) -> Self {
        Self {
            name: name.into(),
            error,
            _types: PhantomData,
        }
    }
}

impl<I, O> fmt::Debug for FailingStage<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FailingStage")
            .field("name", &self.name)
            .field("error", &self.error)
            .finish()
    }
}

#[async_trait]
impl<I, O> Stage for FailingStage<I, O>
where
    I: Send + Sync,
    O: Send,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _input: &I) -> Result<O, StageError> {
        Err(self.error.clone())
    }
}

/// A stage that panics when processed.
pub struct PanickingStage<I, O> {
    name: String,
    message: String,
    _types: PhantomData<fn(&I) -> O>,
}

impl<I, O> PanickingStage<I, O> {
    /// Creates a new panicking stage.
    #[must_use]
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            message: message.into(),
            _types: PhantomData,
        }
    }
}

impl<I, O> fmt::Debug for PanickingStage<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PanickingStage")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<I, O> Stage for PanickingStage<I, O>
where
    I: Send + Sync,
    O: Send,
{
    type Input = I;
    type Output = O;

    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, _input: &I) -> Result<O, StageError> {
        panic!("{}", self.message);
    }
}

/// Delays an inner stage.
#[derive(Debug)]
pub struct SlowStage<S> {
    inner: S,
    delay: Duration,
}

impl<S> SlowStage<S> {
    /// Wraps `inner` so every call sleeps for `delay` first.
    #[must_use]
    pub fn new(inner: S, delay: Duration) -> Self {
        Self { inner, delay }
    }
}

#[async_trait]
impl<S: Stage> Stage for SlowStage<S> {
    type Input = S::Input;
    type Output = S::Output;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, input: &S::Input) -> Result<S::Output, StageError> {
        tokio::time::sleep(self.delay).await;
        self.inner.process(input).await
    }
}

/// A latch that holds gated stages until opened.
///
/// Once opened it stays open.
#[derive(Debug, Default)]
pub struct StageGate {
    open: AtomicBool,
    entered: AtomicUsize,
    notify: Notify,
}

impl StageGate {
    /// Creates a closed gate.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Opens the gate, releasing all waiting stages.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Number of stage calls that reached the gate.
    #[must_use]
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }

    /// Waits until at least `count` calls reached the gate.
    pub async fn wait_entered(&self, count: usize) {
        while self.entered() < count {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    async fn pass(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.open.load(Ordering::SeqCst) {
            return;
        }
        notified.await;
    }
}

/// Holds an inner stage at a [`StageGate`] until the gate opens.
#[derive(Debug)]
pub struct GatedStage<S> {
    inner: S,
    gate: Arc<StageGate>,
}

impl<S> GatedStage<S> {
    /// Wraps `inner` behind `gate`.
    #[must_use]
    pub fn new(inner: S, gate: Arc<StageGate>) -> Self {
        Self { inner, gate }
    }
}

#[async_trait]
impl<S: Stage> Stage for GatedStage<S> {
    type Input = S::Input;
    type Output = S::Output;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, input: &S::Input) -> Result<S::Output, StageError> {
        self.gate.pass().await;
        self.inner.process(input).await
    }
}

/// Counts calls to an inner stage and tracks peak concurrency.
#[derive(Debug)]
pub struct CountingStage<S> {
    inner: S,
    calls: Arc<AtomicUsize>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl<S> CountingStage<S> {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared call counter, usable after the stage moved into a runner.
    #[must_use]
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }

    /// Shared peak-concurrency counter.
    #[must_use]
    pub fn max_in_flight(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.max_in_flight)
    }
}

#[async_trait]
impl<S: Stage> Stage for CountingStage<S> {
    type Input = S::Input;
    type Output = S::Output;

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn process(&self, input: &S::Input) -> Result<S::Output, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let result = self.inner.process(input).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}
