//! Application state shared by all handlers.

use crate::auth::SessionVerifier;
use crate::engine::BookingEngine;
use axum::extract::FromRef;
use std::sync::Arc;
use studio_core::document_store::DocumentStore;

/// Application state, cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Booking engine
    pub engine: Arc<BookingEngine>,
    /// Store handle for readiness checks
    pub store: Arc<dyn DocumentStore>,
    /// Session verification for the auth extractors
    pub verifier: Arc<dyn SessionVerifier>,
    /// Shared secret accepted by the scheduled reminder trigger
    pub cron_secret: Option<Arc<str>>,
}

impl AppState {
    /// Create the application state.
    #[must_use]
    pub fn new(
        engine: Arc<BookingEngine>,
        store: Arc<dyn DocumentStore>,
        verifier: Arc<dyn SessionVerifier>,
        cron_secret: Option<String>,
    ) -> Self {
        Self {
            engine,
            store,
            verifier,
            cron_secret: cron_secret.map(Arc::from),
        }
    }
}

impl FromRef<AppState> for Arc<dyn DocumentStore> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.store)
    }
}

impl FromRef<AppState> for Arc<dyn SessionVerifier> {
    fn from_ref(state: &AppState) -> Self {
        Arc::clone(&state.verifier)
    }
}
