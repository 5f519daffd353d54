//! The latest-result store.
//!
//! One writer (the scheduler) publishes finalized runs; any number of
//! readers fetch the current snapshot. The snapshot is projected before the
//! write lock is taken, so the lock only ever guards an `Arc` swap and
//! readers never observe a half-built snapshot.

use crate::core::{PipelineRun, ResultSnapshot};
use crate::errors::AstroflowError;
use crate::preview::{PgmPreviewEncoder, PreviewEncoder};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{debug, info, warn};

static GLOBAL_STORE: OnceLock<Arc<ResultStore>> = OnceLock::new();

/// Installs the process-wide store.
///
/// Fails if a store was already installed.
pub fn init_global(store: ResultStore) -> Result<Arc<ResultStore>, AstroflowError> {
    let store = Arc::new(store);
    GLOBAL_STORE
        .set(Arc::clone(&store))
        .map_err(|_| AstroflowError::AlreadyInitialized("ResultStore"))?;
    info!("Global result store initialized");
    Ok(store)
}

/// Returns the process-wide store.
pub fn global() -> Result<Arc<ResultStore>, AstroflowError> {
    GLOBAL_STORE
        .get()
        .cloned()
        .ok_or(AstroflowError::NotInitialized("ResultStore"))
}

/// Holds the snapshot of the most recently finalized run.
pub struct ResultStore {
    slot: RwLock<Arc<ResultSnapshot>>,
    preview: Option<Arc<dyn PreviewEncoder>>,
    published: AtomicU64,
}

impl Default for ResultStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultStore {
    /// Creates an idle store that renders PGM previews.
    #[must_use]
    pub fn new() -> Self {
        Self::with_preview_encoder(Arc::new(PgmPreviewEncoder::new()))
    }

    /// Creates an idle store that never renders previews.
    #[must_use]
    pub fn without_preview() -> Self {
        Self {
            slot: RwLock::new(Arc::new(ResultSnapshot::idle())),
            preview: None,
            published: AtomicU64::new(0),
        }
    }

    /// Creates an idle store using `encoder` for previews.
    #[must_use]
    pub fn with_preview_encoder(encoder: Arc<dyn PreviewEncoder>) -> Self {
        Self {
            preview: Some(encoder),
            ..Self::without_preview()
        }
    }

    /// Projects a finalized run and makes it the current snapshot.
    ///
    /// A run carrying an older scheduler sequence than the current snapshot
    /// is not installed; the current snapshot is returned instead. Ad-hoc
    /// runs (sequence 0) always replace the snapshot.
    pub fn publish(&self, run: PipelineRun) -> Result<Arc<ResultSnapshot>, AstroflowError> {
        let preview = self.render_preview(&run);
        let snapshot = ResultSnapshot::from_run(&run, preview).ok_or_else(|| {
            AstroflowError::InvalidRun {
                run_id: run.run_id.to_string(),
            }
        })?;
        let snapshot = Arc::new(snapshot);

        {
            let mut slot = self.slot.write();
            if snapshot.sequence != 0 && snapshot.sequence < slot.sequence {
                warn!(
                    run_id = %run.run_id,
                    sequence = snapshot.sequence,
                    current = slot.sequence,
                    "Discarding out-of-order publish"
                );
                return Ok(Arc::clone(&slot));
            }
            *slot = Arc::clone(&snapshot);
        }
        self.published.fetch_add(1, Ordering::SeqCst);

        debug!(
            run_id = %run.run_id,
            sequence = snapshot.sequence,
            status = %snapshot.status,
            "Published result snapshot"
        );
        Ok(snapshot)
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn current(&self) -> Arc<ResultSnapshot> {
        Arc::clone(&self.slot.read())
    }

    /// Number of snapshots installed so far.
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    fn render_preview(&self, run: &PipelineRun) -> Option<String> {
        let encoder = self.preview.as_ref()?;
        let frame = run.latest_frame()?;
        match encoder.encode(frame) {
            Ok(encoded) => Some(encoded),
            Err(err) => {
                warn!(run_id = %run.run_id, error = %err, "Preview rendering failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for ResultStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultStore")
            .field("current_sequence", &self.current().sequence)
            .field("preview", &self.preview)
            .field("published", &self.published_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Observation, SnapshotStatus, StageOutcome};
    use crate::errors::StageError;
    use crate::testing::sample_frame;

    fn finished_run(sequence: u64, ok: bool) -> PipelineRun {
        let mut run = PipelineRun::new(Observation::new("obs-1", "synthetic://1"))
            .with_sequence(sequence);
        run.record(StageOutcome::success("ingest", sample_frame().into(), 1.0));
        if ok {
            run.finish_success();
        } else {
            run.finish_failed(StageError::model("detector offline"));
        }
        run
    }

    #[test]
    fn test_new_store_is_idle() {
        let store = ResultStore::new();
        assert!(store.current().is_idle());
        assert_eq!(store.published_count(), 0);
    }

    #[test]
    fn test_publish_replaces_snapshot() {
        let store = ResultStore::new();
        let snapshot = store.publish(finished_run(1, true)).unwrap();

        assert_eq!(snapshot.status, SnapshotStatus::Success);
        assert!(Arc::ptr_eq(&snapshot, &store.current()));
        assert!(snapshot.preview_image.is_some());
        assert_eq!(store.published_count(), 1);
    }

    #[test]
    fn test_failed_run_projection() {
        let store = ResultStore::without_preview();
        let snapshot = store.publish(finished_run(1, false)).unwrap();

        assert_eq!(snapshot.status, SnapshotStatus::Failed);
        assert_eq!(snapshot.error.as_deref(), Some("ModelError"));
        assert!(snapshot.preview_image.is_none());
    }

    #[test]
    fn test_pending_run_rejected() {
        let store = ResultStore::new();
        let run = PipelineRun::new(Observation::new("obs-1", "synthetic://1"));
        let err = store.publish(run).unwrap_err();

        assert!(matches!(err, AstroflowError::InvalidRun { .. }));
        assert!(store.current().is_idle());
    }

    #[test]
    fn test_out_of_order_publish_ignored() {
        let store = ResultStore::new();
        store.publish(finished_run(5, true)).unwrap();
        let kept = store.publish(finished_run(4, false)).unwrap();

        assert_eq!(kept.sequence, 5);
        assert_eq!(store.current().status, SnapshotStatus::Success);
        assert_eq!(store.published_count(), 1);
    }

    #[test]
    fn test_current_is_stable_between_publishes() {
        let store = ResultStore::new();
        store.publish(finished_run(1, true)).unwrap();
        assert!(Arc::ptr_eq(&store.current(), &store.current()));
    }

    #[test]
    fn test_global_store() {
        // only this test touches the process-wide slot
        let installed = init_global(ResultStore::without_preview()).unwrap();
        assert!(Arc::ptr_eq(&installed, &global().unwrap()));

        let err = init_global(ResultStore::new()).unwrap_err();
        assert!(matches!(err, AstroflowError::AlreadyInitialized(_)));
    }
}
