//! Prometheus metrics for observability and monitoring.
//!
//! This module installs the Prometheus recorder and describes the metrics
//! emitted by the runtime layer:
//! - Document store calls (count, outcome, latency)
//! - Retry attempts
//!
//! Domain metrics (bookings, credits) are described by the application crate
//! through [`MetricsServer::start_with`].
//!
//! # Example
//!
//! ```rust,no_run
//! use studio_runtime::metrics::MetricsServer;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new();
//! server.start()?;
//! let exposition = server.render();
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;
use studio_core::document_store::{Collection, DocumentStoreError};
use thiserror::Error;

// Re-export metrics macros for use in other crates
pub use metrics::{counter, gauge, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder handle.
///
/// Holds the exporter handle only; the caller serves [`MetricsServer::render`]
/// on whichever listener it chooses.
#[derive(Default)]
pub struct MetricsServer {
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create an uninstalled metrics server.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Install the recorder and describe runtime metrics.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        self.start_with(|| {})
    }

    /// Install the recorder, describe runtime metrics, then run `describe`
    /// to register application metrics.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a recorder is already installed (e.g. in tests), this logs a warning
    /// and leaves [`Self::render`] returning `None`.
    pub fn start_with(&mut self, describe: impl FnOnce()) -> Result<(), MetricsError> {
        let builder = PrometheusBuilder::new()
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                register_metrics();
                describe();
                tracing::info!("Prometheus recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus text format.
    ///
    /// Returns `None` if this server did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register runtime metric descriptions.
fn register_metrics() {
    describe_counter!(
        "store_calls_total",
        "Total number of document store calls, by operation, collection and outcome"
    );
    describe_histogram!(
        "store_call_duration_seconds",
        "Time taken by document store calls"
    );

    describe_counter!("retry_attempts_total", "Total number of retry attempts");
    describe_counter!("retry_successes_total", "Total number of successful retries");
    describe_counter!(
        "retry_exhausted_total",
        "Total number of calls that exhausted max retries"
    );
}

/// Document store metrics recorder.
pub struct StoreMetrics;

impl StoreMetrics {
    /// Record one store call.
    pub fn record_call<T>(
        operation: &'static str,
        collection: Option<Collection>,
        duration: Duration,
        result: &Result<T, DocumentStoreError>,
    ) {
        let collection = collection.map_or("-", |c| c.as_str());
        counter!(
            "store_calls_total",
            "operation" => operation,
            "collection" => collection,
            "outcome" => outcome_label(result)
        )
        .increment(1);
        histogram!(
            "store_call_duration_seconds",
            "operation" => operation
        )
        .record(duration.as_secs_f64());
    }
}

const fn outcome_label<T>(result: &Result<T, DocumentStoreError>) -> &'static str {
    match result {
        Ok(_) => "ok",
        Err(DocumentStoreError::NotFound { .. }) => "not_found",
        Err(DocumentStoreError::Conflict { .. }) => "conflict",
        Err(DocumentStoreError::PreconditionFailed { .. }) => "precondition_failed",
        Err(DocumentStoreError::Timeout(_)) => "timeout",
        Err(DocumentStoreError::Unavailable(_)) => "unavailable",
        Err(DocumentStoreError::Serialization(_)) => "serialization",
        Err(DocumentStoreError::Database(_)) => "database",
    }
}

/// Retry metrics recorder.
pub struct RetryMetrics;

impl RetryMetrics {
    /// Record a retry attempt.
    pub fn record_attempt() {
        counter!("retry_attempts_total").increment(1);
    }

    /// Record a successful retry.
    pub fn record_success() {
        counter!("retry_successes_total").increment(1);
    }

    /// Record exhausted retries.
    pub fn record_exhausted() {
        counter!("retry_exhausted_total").increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use studio_core::document_store::DocumentId;

    #[test]
    fn test_metrics_server_creation() {
        let server = MetricsServer::new();
        assert!(server.handle().is_none());
        assert!(server.render().is_none());
    }

    #[test]
    fn test_metrics_server_start_is_idempotent() {
        let mut first = MetricsServer::new();
        assert!(first.start().is_ok());
        let mut second = MetricsServer::new();
        assert!(second.start().is_ok());
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(outcome_label(&Ok::<(), _>(())), "ok");
        assert_eq!(
            outcome_label::<()>(&Err(DocumentStoreError::PreconditionFailed {
                collection: Collection::new("credit_units"),
                id: DocumentId::new("c1"),
            })),
            "precondition_failed"
        );
        assert_eq!(outcome_label::<()>(&Err(DocumentStoreError::Timeout(5))), "timeout");
    }
}
