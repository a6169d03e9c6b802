//! Axum integration for the studio booking engine.
//!
//! This crate holds the HTTP plumbing that is independent of booking rules:
//!
//! - [`AppError`]: JSON error bodies with a stable `code` per failure kind
//! - Extractors for correlation ids and bearer tokens
//! - Correlation-id middleware that also logs and counts every request
//! - Liveness and readiness handlers
//!
//! # Request Flow
//!
//! 1. **Middleware** assigns a correlation id and opens a tracing span
//! 2. **Extractors** pull the bearer token and JSON body
//! 3. **Handler** calls the booking engine
//! 4. **Errors** map to [`AppError`] and render as `{ "code", "message" }`
//!
//! # Example
//!
//! ```ignore
//! use studio_web::{AppError, correlation_id_layer, handlers::health_check};
//! use axum::{Router, routing::get};
//!
//! let app = Router::new()
//!     .route("/health", get(health_check))
//!     .layer(correlation_id_layer());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{BearerToken, CorrelationId};
pub use middleware::{CORRELATION_ID_HEADER, correlation_id_layer};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
