//! Health check endpoints.
//!
//! These endpoints are used by load balancers and monitoring systems
//! to verify service health.

use axum::{Json, extract::State, http::StatusCode};
use serde_json::{Value, json};
use std::sync::Arc;
use studio_core::document_store::DocumentStore;
use studio_runtime::health::{HealthReport, HealthStatus, check_document_store};

/// Pings slower than this are reported as degraded.
const DEGRADED_AFTER_MS: u64 = 1_000;

/// Liveness check.
///
/// Returns 200 OK while the process is running. Does NOT check dependencies.
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Readiness check against the document store.
///
/// # Status Codes
///
/// - 200 OK: Healthy or Degraded
/// - 503 Service Unavailable: Unhealthy
///
/// ```text
/// GET /ready
/// ```
///
/// ```json
/// {
///   "status": "healthy",
///   "checks": [{ "component": "document_store", "status": "healthy", "latency_ms": 3 }]
/// }
/// ```
pub async fn readiness_check(
    State(store): State<Arc<dyn DocumentStore>>,
) -> (StatusCode, Json<Value>) {
    let report = HealthReport::new(vec![check_document_store(store.as_ref(), DEGRADED_AFTER_MS).await]);

    let status = match report.status {
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status, Json(report_json(&report)))
}

fn report_json(report: &HealthReport) -> Value {
    json!({
        "status": report.status.to_string(),
        "checks": report.checks.iter().map(|check| json!({
            "component": check.component,
            "status": check.status.to_string(),
            "message": check.message,
            "latency_ms": check.latency_ms,
        })).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_core::document_store::DocumentStoreError;
    use studio_testing::mocks::{InMemoryDocumentStore, StoreOp};

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }

    #[tokio::test]
    async fn test_readiness_reflects_store() {
        let memory = Arc::new(InMemoryDocumentStore::new());
        let store: Arc<dyn DocumentStore> = memory.clone();

        let (status, Json(body)) = readiness_check(State(Arc::clone(&store))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        memory.fail_next(StoreOp::Ping, DocumentStoreError::Unavailable("down".into()));
        let (status, Json(body)) = readiness_check(State(store)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["checks"][0]["message"], "Store unavailable: down");
    }
}
