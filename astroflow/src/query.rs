//! Read-only access to the latest result.

use crate::core::ResultSnapshot;
use crate::errors::AstroflowError;
use crate::store::{self, ResultStore};
use std::sync::Arc;

/// Stateless façade over a [`ResultStore`].
///
/// Two calls with no publish in between return the same snapshot.
#[derive(Debug, Clone)]
pub struct QueryService {
    store: Arc<ResultStore>,
}

impl QueryService {
    /// Creates a service reading from `store`.
    #[must_use]
    pub fn new(store: Arc<ResultStore>) -> Self {
        Self { store }
    }

    /// Creates a service over the process-wide store.
    pub fn global() -> Result<Self, AstroflowError> {
        Ok(Self::new(store::global()?))
    }

    /// Returns the latest snapshot.
    #[must_use]
    pub fn latest(&self) -> Arc<ResultSnapshot> {
        self.store.current()
    }

    /// Returns the latest snapshot as a wire record.
    pub fn latest_record(&self) -> Result<serde_json::Value, AstroflowError> {
        Ok(serde_json::to_value(self.latest().as_ref())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_idle_record() {
        let query = QueryService::new(Arc::new(ResultStore::new()));
        let record = query.latest_record().unwrap();

        assert_eq!(record["status"], "idle");
        assert_eq!(record["detections"], serde_json::json!([]));
        assert_eq!(record["orbitalElements"], serde_json::json!([]));
        assert!(record["previewImage"].is_null());
        assert!(record["error"].is_null());
        assert!(record["observationId"].is_null());
    }

    #[test]
    fn test_latest_is_idempotent() {
        let query = QueryService::new(Arc::new(ResultStore::new()));
        let a = query.latest();
        let b = query.latest();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(query.latest_record().unwrap(), query.latest_record().unwrap());
    }
}
