//! Router configuration.

use super::state::AppState;
use crate::api::{bookings, credits, lessons, revenue, students};
use axum::{
    Router,
    http::{Method, StatusCode, header},
    routing::{delete, get, post},
};
use std::time::Duration;
use studio_web::correlation_id_layer;
use studio_web::handlers::{health_check, readiness_check};
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Routes under `/api`.
fn api_routes() -> Router<AppState> {
    Router::new()
        // Bookings
        .route("/bookings/reserve", post(bookings::reserve))
        .route("/bookings/cancel", post(bookings::cancel))
        .route("/bookings/list", post(bookings::list))
        .route("/bookings/trial", post(bookings::trial))
        // Credits
        .route("/credits/add", post(credits::add))
        .route("/credits/welcome", post(credits::welcome))
        .route("/credits/history", post(credits::history))
        .route("/credits/summary", get(credits::summary))
        .route("/credits/migrate", post(credits::migrate))
        // Reporting
        .route("/revenue", get(revenue::revenue))
        // Students
        .route("/students", post(students::register))
        .route("/students/profile", post(students::update_profile))
        .route("/students/:id/stats", get(students::stats))
        // Lessons
        .route("/lessons", post(lessons::create))
        .route("/lessons/:id", delete(lessons::delete))
        .route("/lessons/upcoming", get(lessons::upcoming))
        .route("/lessons/archive", get(lessons::archive))
        .route("/lessons/reminders", post(lessons::reminders))
}

/// Build the complete router.
///
/// Health checks sit at the root without authentication; everything else
/// lives under `/api`. Requests taking longer than `request_timeout` are
/// answered with `408`.
pub fn build_router(state: AppState, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .nest("/api", api_routes())
        .layer(correlation_id_layer())
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, request_timeout))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
