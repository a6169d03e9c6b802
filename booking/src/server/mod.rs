//! HTTP server for the booking engine.
//!
//! - [`AppState`]: shared handles for every handler
//! - [`build_router`]: health checks plus the `/api` surface

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
