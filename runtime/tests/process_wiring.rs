//! Integration tests for the runtime pieces a server process wires together.
//!
//! Only the crate-root exports are used, the same way a binary imports them.

#![allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect

use std::sync::Arc;
use std::time::Duration;
use studio_core::document_store::{Collection, DocumentId, DocumentStore};
use studio_runtime::health::check_document_store;
use studio_runtime::{HealthReport, MetricsServer, ResilientStore, RetryPolicy, StorePolicy};
use studio_testing::InMemoryDocumentStore;

const LESSONS: Collection = Collection::new("lessons");

#[tokio::test]
async fn test_metrics_recorder_sees_store_calls() {
    let mut metrics = MetricsServer::new();
    assert!(metrics.render().is_none());
    metrics.start().expect("install recorder");

    let policy = StorePolicy {
        call_timeout: Duration::from_secs(1),
        read_retry: RetryPolicy::builder()
            .max_retries(1)
            .initial_delay(Duration::from_millis(1))
            .build(),
    };
    let store: Arc<dyn DocumentStore> =
        Arc::new(ResilientStore::new(Arc::new(InMemoryDocumentStore::new()), policy));

    let missing = store.get(LESSONS, DocumentId::new("l1")).await.unwrap();
    assert!(missing.is_none());

    let report = HealthReport::new(vec![check_document_store(store.as_ref(), 1_000).await]);
    assert!(report.is_healthy());

    let rendered = metrics.render().expect("recorder installed by this process");
    assert!(rendered.contains("store_calls_total"));
}
