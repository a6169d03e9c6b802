//! # Studio Runtime
//!
//! Runtime plumbing shared by every process that talks to the document store.
//!
//! ## Core Components
//!
//! - **`ResilientStore`**: Wraps any [`DocumentStore`](studio_core::document_store::DocumentStore)
//!   with a per-call deadline, bounded retry of idempotent reads and call metrics
//! - **Retry**: Exponential backoff with jitter for transient failures
//! - **Metrics**: Prometheus recorder installation and metric descriptions
//! - **Health**: Component health checks aggregated into a readiness report
//!
//! ## Example
//!
//! ```ignore
//! use studio_runtime::{ResilientStore, StorePolicy};
//!
//! let store = ResilientStore::new(postgres_store, StorePolicy::default());
//! let store: Arc<dyn DocumentStore> = Arc::new(store);
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Deadline and retry decorator for document stores
pub mod resilient;

/// Prometheus metrics for observability
pub mod metrics;

/// Component health checks
pub mod health;

pub use health::{HealthCheck, HealthReport, HealthStatus};
pub use metrics::MetricsServer;
pub use resilient::{ResilientStore, StorePolicy};
pub use retry::RetryPolicy;
