//! Deadline, retry and metrics decorator for any [`DocumentStore`].
//!
//! Every call is bounded by [`StorePolicy::call_timeout`]; a call that
//! exceeds it fails with [`DocumentStoreError::Timeout`]. Reads (`get`,
//! `list`, `count`, `ping`) are retried on transient errors. Writes are never
//! retried here: a timed-out write may have been applied, and only the caller
//! knows how to reconcile it.

use crate::metrics::StoreMetrics;
use crate::retry::{RetryPolicy, retry_transient};
use std::sync::Arc;
use std::time::{Duration, Instant};
use studio_core::document_store::{
    Collection, Document, DocumentId, DocumentStore, DocumentStoreError, Filter, Patch, Query,
    StoreFuture,
};

/// Deadline and retry settings for store calls.
#[derive(Debug, Clone)]
pub struct StorePolicy {
    /// Deadline for a single store call
    pub call_timeout: Duration,
    /// Retry policy for idempotent reads
    pub read_retry: RetryPolicy,
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(5),
            read_retry: RetryPolicy::default(),
        }
    }
}

/// A [`DocumentStore`] wrapper that enforces deadlines and retries reads.
#[derive(Clone)]
pub struct ResilientStore {
    inner: Arc<dyn DocumentStore>,
    policy: StorePolicy,
}

impl ResilientStore {
    /// Wrap a store.
    #[must_use]
    pub fn new(inner: Arc<dyn DocumentStore>, policy: StorePolicy) -> Self {
        Self { inner, policy }
    }

    /// The active policy.
    #[must_use]
    pub const fn policy(&self) -> &StorePolicy {
        &self.policy
    }

    async fn guarded<T>(
        &self,
        operation: &'static str,
        collection: Option<Collection>,
        call: StoreFuture<'_, T>,
    ) -> Result<T, DocumentStoreError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.policy.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                let millis = u64::try_from(self.policy.call_timeout.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(operation, ?collection, timeout_ms = millis, "Store call timed out");
                Err(DocumentStoreError::Timeout(millis))
            }
        };
        StoreMetrics::record_call(operation, collection, start.elapsed(), &result);
        result
    }
}

impl DocumentStore for ResilientStore {
    fn get(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, Option<Document>> {
        Box::pin(async move {
            retry_transient(&self.policy.read_retry, move || {
                self.guarded("get", Some(collection), self.inner.get(collection, id.clone()))
            })
            .await
        })
    }

    fn list(&self, collection: Collection, query: Query) -> StoreFuture<'_, Vec<Document>> {
        Box::pin(async move {
            retry_transient(&self.policy.read_retry, move || {
                self.guarded("list", Some(collection), self.inner.list(collection, query.clone()))
            })
            .await
        })
    }

    fn count(&self, collection: Collection, filters: Vec<Filter>) -> StoreFuture<'_, u64> {
        Box::pin(async move {
            retry_transient(&self.policy.read_retry, move || {
                self.guarded(
                    "count",
                    Some(collection),
                    self.inner.count(collection, filters.clone()),
                )
            })
            .await
        })
    }

    fn create(&self, collection: Collection, document: Document) -> StoreFuture<'_, Document> {
        Box::pin(self.guarded(
            "create",
            Some(collection),
            self.inner.create(collection, document),
        ))
    }

    fn update(
        &self,
        collection: Collection,
        id: DocumentId,
        patch: Patch,
        precondition: Vec<Filter>,
    ) -> StoreFuture<'_, Document> {
        Box::pin(self.guarded(
            "update",
            Some(collection),
            self.inner.update(collection, id, patch, precondition),
        ))
    }

    fn delete(&self, collection: Collection, id: DocumentId) -> StoreFuture<'_, ()> {
        Box::pin(self.guarded("delete", Some(collection), self.inner.delete(collection, id)))
    }

    fn ping(&self) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            retry_transient(&self.policy.read_retry, move || {
                self.guarded("ping", None, self.inner.ping())
            })
            .await
        })
    }
}
