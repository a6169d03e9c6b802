//! Student endpoints.
//!
//! - `POST /api/students`
//! - `POST /api/students/profile`
//! - `GET /api/students/:id/stats` (admin)

use super::body;
use crate::auth::{RequireAdmin, SessionUser};
use crate::engine::{ProfileUpdate, RegisterStudent, Registration, StudentStats};
use crate::server::AppState;
use crate::types::{Student, StudentId};
use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
};
use studio_web::AppError;

/// Create the caller's student record.
///
/// Answers `201` when created and `200` when it already existed.
///
/// # Errors
///
/// Validation, auth and store errors.
pub async fn register(
    State(state): State<AppState>,
    SessionUser(actor): SessionUser,
    payload: Result<Json<RegisterStudent>, JsonRejection>,
) -> Result<(StatusCode, Json<Registration>), AppError> {
    let details = body(payload)?;
    let registration = state.engine.register_student(&actor, details).await?;
    let status = if registration.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(registration)))
}

/// Update name, phone or date of birth.
///
/// # Errors
///
/// Validation, auth, not-found and store errors.
pub async fn update_profile(
    State(state): State<AppState>,
    SessionUser(actor): SessionUser,
    payload: Result<Json<ProfileUpdate>, JsonRejection>,
) -> Result<Json<Student>, AppError> {
    let update = body(payload)?;
    Ok(Json(state.engine.update_profile(&actor, update).await?))
}

/// Booking, credit and revenue figures of a student.
///
/// # Errors
///
/// Auth and store errors.
pub async fn stats(
    State(state): State<AppState>,
    RequireAdmin(actor): RequireAdmin,
    Path(student_id): Path<String>,
) -> Result<Json<StudentStats>, AppError> {
    let stats = state
        .engine
        .student_stats(&actor, StudentId::new(student_id))
        .await?;
    Ok(Json(stats))
}
